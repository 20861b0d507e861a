pub mod auth;
pub mod health;
pub mod pages;

// common functions for the handlers
use regex::Regex;

/// Trim user-supplied form text and strip control characters.
pub(crate) fn sanitize(input: &str) -> String {
    input.trim().chars().filter(|c| !c.is_control()).collect()
}

pub(crate) fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}
