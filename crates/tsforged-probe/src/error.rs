//! Error types for tsforged-probe

/// Errors raised while parsing bitstreams and transport packets
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// A read ran past the end of the bounded syntactic region.
    ///
    /// Callers construct readers over exactly the payload they mean to
    /// parse, so this indicates a malformed or truncated structure.
    #[error("Bitstream overrun: needed {needed} more bits, {available} available")]
    BitstreamOverrun { needed: u32, available: u32 },

    /// More than 32 bits requested in a single read
    #[error("Invalid bit width: {0}")]
    InvalidBitWidth(u32),

    /// Structure decoded but violates the governing syntax
    #[error("Malformed bitstream: {0}")]
    Malformed(String),

    /// Input is not a recognised container or uses an unsupported feature
    #[error("Unsupported format: {0}")]
    FormatUnsupported(String),

    /// Packet synchronization was lost after the initial lock
    #[error("Sync lost at byte {position}: found 0x{found:02x}")]
    SyncLost { position: u64, found: u8 },
}

impl ProbeError {
    /// Create a new Malformed error.
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Self::Malformed(msg.into())
    }

    /// Create a new FormatUnsupported error.
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Self::FormatUnsupported(msg.into())
    }
}

/// Result type alias for probe operations.
pub type Result<T> = std::result::Result<T, ProbeError>;
