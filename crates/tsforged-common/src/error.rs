//! Common error types used throughout tsforged.

/// Common error type for tsforged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Input bytes did not match the expected structure.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The stream uses a feature that is not supported.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Create a new InvalidData error.
    pub fn invalid_data<S: Into<String>>(msg: S) -> Self {
        Self::InvalidData(msg.into())
    }

    /// Create a new Unsupported error.
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a new Config error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
