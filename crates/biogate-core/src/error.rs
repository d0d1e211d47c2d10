use thiserror::Error;

/// Validation and configuration errors.
///
/// Device failures live in `biogate-device`; this type only covers input
/// that is rejected before any session is opened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid device address '{input}': {reason}")]
    InvalidAddress { input: String, reason: String },

    #[error("Invalid value for {key}: {message}")]
    Config { key: String, message: String },

    #[error("Invalid template {field}: {message}")]
    InvalidTemplate { field: &'static str, message: String },
}

impl Error {
    pub fn invalid_address(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn invalid_template(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            field,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
