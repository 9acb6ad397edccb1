//! Loader abstraction shared by the HTTP and file loaders.

use async_trait::async_trait;
use bytes::Bytes;

/// Byte range of one request. `to` is inclusive; `None` means open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoaderRange {
    pub from: u64,
    pub to: Option<u64>,
}

impl LoaderRange {
    pub fn from(from: u64) -> Self {
        Self { from, to: None }
    }

    /// Whether the range covers the whole resource.
    pub fn is_full(&self) -> bool {
        self.from == 0 && self.to.is_none()
    }
}

/// One loadable resource.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataSource {
    /// URL, or a filesystem path for the file loader.
    pub url: String,
    /// Total length when known up front.
    pub filesize: Option<u64>,
    /// Final URL of an earlier request that was redirected.
    pub redirected_url: Option<String>,
}

impl DataSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_filesize(mut self, filesize: u64) -> Self {
        self.filesize = Some(filesize);
        self
    }
}

/// Loader failure categories.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoaderError {
    #[error("Loader exception ({code}): {msg}")]
    Exception { code: i32, msg: String },

    #[error("HTTP status code invalid ({code}): {msg}")]
    HttpStatusCodeInvalid { code: i32, msg: String },

    #[error("Connecting timeout ({code}): {msg}")]
    ConnectingTimeout { code: i32, msg: String },

    /// The transfer ended before the expected length; recoverable by reconnecting.
    #[error("Early EOF ({code}): {msg}")]
    EarlyEof { code: i32, msg: String },

    #[error("Unrecoverable early EOF ({code}): {msg}")]
    UnrecoverableEarlyEof { code: i32, msg: String },
}

impl LoaderError {
    pub fn exception<S: Into<String>>(code: i32, msg: S) -> Self {
        Self::Exception {
            code,
            msg: msg.into(),
        }
    }

    pub fn early_eof<S: Into<String>>(msg: S) -> Self {
        Self::EarlyEof {
            code: -1,
            msg: msg.into(),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Exception { code, .. }
            | Self::HttpStatusCodeInvalid { code, .. }
            | Self::ConnectingTimeout { code, .. }
            | Self::EarlyEof { code, .. }
            | Self::UnrecoverableEarlyEof { code, .. } => *code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Exception { msg, .. }
            | Self::HttpStatusCodeInvalid { msg, .. }
            | Self::ConnectingTimeout { msg, .. }
            | Self::EarlyEof { msg, .. }
            | Self::UnrecoverableEarlyEof { msg, .. } => msg,
        }
    }

    /// Category name as reported in error events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Exception { .. } => "Exception",
            Self::HttpStatusCodeInvalid { .. } => "HttpStatusCodeInvalid",
            Self::ConnectingTimeout { .. } => "ConnectingTimeout",
            Self::EarlyEof { .. } => "EarlyEof",
            Self::UnrecoverableEarlyEof { .. } => "UnrecoverableEarlyEof",
        }
    }

    /// Same code and message, reclassified as unrecoverable.
    pub fn into_unrecoverable(self) -> Self {
        let code = self.code();
        let msg = self.message().to_string();
        Self::UnrecoverableEarlyEof { code, msg }
    }
}

/// An in-flight request. Dropping it aborts the transfer.
#[async_trait]
pub trait LoaderResponse: Send {
    /// Length of the requested range as announced by the source.
    fn content_length(&self) -> Option<u64>;

    /// Final URL when the request was redirected, with seek parameters removed.
    fn redirected_url(&self) -> Option<&str>;

    /// Next chunk of the body, `None` once the transfer is complete.
    ///
    /// Must be cancel safe: dropping the future between chunks loses no data.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, LoaderError>;
}

/// Opens byte-range requests against a [`DataSource`].
#[async_trait]
pub trait Loader: Send + Sync {
    /// Implementation name reported in statistics.
    fn loader_type(&self) -> &'static str;

    async fn open(
        &self,
        source: &DataSource,
        range: LoaderRange,
    ) -> Result<Box<dyn LoaderResponse>, LoaderError>;
}
