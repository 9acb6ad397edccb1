//! Terminal transmuxing errors.

use std::fmt;

use crate::io::LoaderError;

/// Demux failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxErrorKind {
    /// Input is not a transport stream.
    FormatUnsupported,
    /// Stream structure broke after synchronization.
    FormatError,
    /// A stream could not be packaged.
    CodecUnsupported,
}

impl fmt::Display for DemuxErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DemuxErrorKind::FormatUnsupported => write!(f, "FormatUnsupported"),
            DemuxErrorKind::FormatError => write!(f, "FormatError"),
            DemuxErrorKind::CodecUnsupported => write!(f, "CodecUnsupported"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransmuxError {
    #[error("IO error: {0}")]
    Io(#[from] LoaderError),

    #[error("Demux error ({kind}): {message}")]
    Demux {
        kind: DemuxErrorKind,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TransmuxError {
    pub fn demux<S: Into<String>>(kind: DemuxErrorKind, message: S) -> Self {
        Self::Demux {
            kind,
            message: message.into(),
        }
    }
}

impl From<tsforged_common::Error> for TransmuxError {
    fn from(error: tsforged_common::Error) -> Self {
        Self::Config(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransmuxError>;
