pub mod server;

use secrecy::SecretString;

/// Actions the CLI dispatches to.
#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        domain: String,
        recaptcha_secret: SecretString,
        session_ttl: i64,
    },
}
