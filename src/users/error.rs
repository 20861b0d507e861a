use thiserror::Error;

/// Failures surfaced by the user service.
///
/// `InvalidCredentials` and `InvalidToken` are deliberately undifferentiated:
/// an unknown handle, a wrong password, a missing token row, and an expired
/// token all collapse into the same variant so callers cannot enumerate
/// accounts or probe token state.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("invalid username")]
    InvalidHandle,
    #[error("password too short")]
    WeakPassword,
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("username already in use")]
    HandleInUse,
    #[error("invalid token")]
    InvalidToken,
    #[error("password hashing failed: {0}")]
    Hashing(anyhow::Error),
    #[error("storage error")]
    Storage(#[from] sqlx::Error),
}

impl UserError {
    /// True for malformed-input failures detected before any storage access.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidHandle | Self::WeakPassword)
    }
}

#[cfg(test)]
mod tests {
    use super::UserError;

    #[test]
    fn auth_failures_share_one_message() {
        // Anti-enumeration: the message must not reveal which check failed.
        assert_eq!(
            UserError::InvalidCredentials.to_string(),
            "invalid username or password"
        );
        assert_eq!(UserError::InvalidToken.to_string(), "invalid token");
    }

    #[test]
    fn validation_classification() {
        assert!(UserError::InvalidHandle.is_validation());
        assert!(UserError::WeakPassword.is_validation());
        assert!(!UserError::HandleInUse.is_validation());
        assert!(!UserError::InvalidCredentials.is_validation());
    }
}
