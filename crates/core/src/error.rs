/// Result alias that carries the custom [`LipSyncError`] type.
pub type Result<T> = std::result::Result<T, LipSyncError>;

/// Common error type for the core crate.
///
/// The scheduler itself never fails on bad transcript data; these variants
/// only surface at the configuration boundary and from sink implementations.
#[derive(Debug, thiserror::Error)]
pub enum LipSyncError {
    /// Free-form message for conditions that have no dedicated variant.
    #[error("{0}")]
    Message(String),
    /// A configuration value is outside its accepted range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The rendering collaborator rejected or could not apply a mouth target.
    #[error("viseme sink failure: {0}")]
    Sink(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration or transcript JSON could not be parsed.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl LipSyncError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn invalid_config<T: Into<String>>(msg: T) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

impl From<&str> for LipSyncError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for LipSyncError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
