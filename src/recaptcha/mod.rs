//! Outbound recaptcha verification.
//!
//! One POST to the siteverify endpoint per check, bounded by the client
//! timeout and cancelled by dropping the caller's future. No retries; any
//! non-success is a failure. With no secret configured, verification is
//! disabled and every check passes, matching a development setup.

use anyhow::{anyhow, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

const VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";
const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Verifier {
    client: reqwest::Client,
    secret: SecretString,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

impl Verifier {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(secret: SecretString) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::web::APP_USER_AGENT)
            .timeout(VERIFY_TIMEOUT)
            .build()
            .context("failed to build recaptcha client")?;
        Ok(Self { client, secret })
    }

    /// Whether checks are enforced. Drives the form's recaptcha widget flag.
    #[must_use]
    pub fn enabled(&self) -> bool {
        !self.secret.expose_secret().is_empty()
    }

    /// Verify a client response token. All-or-nothing: a transport error, a
    /// malformed body, and a rejected token are all failures.
    /// # Errors
    /// Returns an error when verification is enabled and the check fails.
    #[instrument(skip(self, response))]
    pub async fn verify(&self, response: &str) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }

        let body = self
            .client
            .post(VERIFY_URL)
            .form(&[
                ("secret", self.secret.expose_secret()),
                ("response", response),
            ])
            .send()
            .await
            .context("recaptcha verification request failed")?
            .json::<VerifyResponse>()
            .await
            .context("invalid recaptcha verification response")?;

        if body.success {
            debug!("recaptcha verification passed");
            Ok(())
        } else {
            Err(anyhow!(
                "invalid verification: {:?}",
                body.error_codes.join(",")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_secret() {
        let verifier = Verifier::new(SecretString::default()).expect("verifier");
        assert!(!verifier.enabled());
    }

    #[tokio::test]
    async fn disabled_verifier_accepts_anything() -> Result<()> {
        let verifier = Verifier::new(SecretString::default())?;
        verifier.verify("any-response").await
    }

    #[test]
    fn enabled_with_secret() {
        let verifier = Verifier::new(SecretString::from("shared-secret")).expect("verifier");
        assert!(verifier.enabled());
    }

    #[test]
    fn error_codes_deserialize() -> Result<()> {
        let body: VerifyResponse = serde_json::from_str(
            r#"{"success": false, "challenge_ts": "", "hostname": "", "error-codes": ["timeout-or-duplicate"]}"#,
        )?;
        assert!(!body.success);
        assert_eq!(body.error_codes, vec!["timeout-or-duplicate".to_string()]);
        Ok(())
    }
}
