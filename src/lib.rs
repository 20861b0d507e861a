pub mod cli;
pub mod recaptcha;
pub mod users;
pub mod web;
