use crate::cli::actions::Action;
use crate::web;
use anyhow::Result;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server {
            port,
            dsn,
            domain,
            recaptcha_secret,
            session_ttl,
        } => {
            web::new(
                port,
                dsn,
                web::Domain::new(domain),
                recaptcha_secret,
                session_ttl,
            )
            .await?;
        }
    }

    Ok(())
}
