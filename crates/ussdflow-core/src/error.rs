use thiserror::Error;

/// Top-level error type for the ussdflow system.
///
/// The `Validation` variant is a sentinel for user-correctable input
/// failures: menu handlers return it and the menu layer absorbs it into a
/// failed response. Every other variant propagates to the caller.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UssdError {
    /// User input failed validation. An empty message means the default
    /// status message should be used.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("menu not registered: {0}")]
    MenuNotFound(String),

    #[error("menu already registered: {0}")]
    MenuExists(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl UssdError {
    /// The validation sentinel with the default status message.
    pub fn validation() -> Self {
        UssdError::Validation(String::new())
    }

    /// True when this error is the user-correctable validation sentinel.
    pub fn is_validation(&self) -> bool {
        matches!(self, UssdError::Validation(_))
    }
}

impl From<serde_json::Error> for UssdError {
    fn from(err: serde_json::Error) -> Self {
        UssdError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for UssdError {
    fn from(err: toml::de::Error) -> Self {
        UssdError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for UssdError {
    fn from(err: toml::ser::Error) -> Self {
        UssdError::Config(err.to_string())
    }
}

/// A specialized `Result` type for ussdflow operations.
pub type Result<T> = std::result::Result<T, UssdError>;
