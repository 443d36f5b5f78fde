//! Domain-specific error types for the gridcast stream engine.
//!
//! All fallible operations return `Result<T, GridError>`.
//! No panics on malformed input: every error is typed and locally
//! recoverable. [`GridError::class`] tells the controller how a failure
//! should be surfaced.

use thiserror::Error;

/// How a failure is surfaced by the stream controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Malformed header, metadata, or payload. The message is dropped.
    Parse,
    /// A frame that cannot be placed in the stream (missing predecessor,
    /// wrong index). The message is dropped; the stream may be stuck
    /// until the next base frame or a reload.
    Sequence,
    /// The transport could not be opened or was lost.
    Transport,
    /// Invalid configuration.
    Config,
}

/// The canonical error type for the gridcast engine.
#[derive(Debug, Error)]
pub enum GridError {
    // ── Parse Errors ─────────────────────────────────────────────
    /// The buffer is shorter than the fixed wire header.
    #[error("message too short: {len} bytes (header needs {needed})")]
    TruncatedHeader { len: usize, needed: usize },

    /// The declared metadata block runs past the end of the buffer.
    #[error("metadata block truncated: declared {declared} bytes, {available} available")]
    TruncatedMetadata { declared: usize, available: usize },

    /// The metadata record is not valid JSON or lacks required fields.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(#[from] serde_json::Error),

    /// The metadata record parsed but describes an impossible grid.
    #[error("invalid metadata: {0}")]
    InvalidGrid(&'static str),

    /// A frame-kind tag did not map to any known kind.
    #[error("unknown frame kind: {0:#04x}")]
    UnknownFrameKind(u8),

    /// The message belongs to another stream channel.
    #[error("foreign channel {got} (listening on {expected})")]
    ForeignChannel { expected: u8, got: u8 },

    /// The generic (de)compression stage failed.
    #[error("compression stage failed: {0}")]
    Compression(std::io::Error),

    /// The decompressed payload does not match the grid geometry.
    #[error("payload size mismatch: expected {expected} bytes, got {actual}")]
    PayloadSize { expected: usize, actual: usize },

    /// The blocking decode task panicked or was cancelled.
    #[error("decode task failed: {0}")]
    DecodeTask(#[from] tokio::task::JoinError),

    // ── Sequence Errors ──────────────────────────────────────────
    /// No metadata has been established for this generation yet.
    #[error("no stream metadata established for this generation")]
    MissingMetadata,

    /// A later message tried to change the per-generation metadata.
    #[error("stream metadata changed mid-generation")]
    MetadataChanged,

    /// A delta frame arrived without a reconstructed predecessor.
    #[error("delta frame {index} has no reconstructed predecessor")]
    MissingPredecessor { index: usize },

    /// An append was attempted at the wrong index.
    #[error("out-of-order append: expected index {expected}, got {got}")]
    OutOfOrder { expected: usize, got: usize },

    /// A correction named a valid time no received frame carries.
    #[error("correction for unknown valid time {0}")]
    UnknownValidTime(u32),

    // ── Transport Errors ─────────────────────────────────────────
    /// The I/O layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// A stream record violated the container framing.
    #[error("container framing error: {0}")]
    Framing(&'static str),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Configuration Errors ─────────────────────────────────────
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl GridError {
    /// The recovery class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::TruncatedHeader { .. }
            | Self::TruncatedMetadata { .. }
            | Self::InvalidMetadata(_)
            | Self::InvalidGrid(_)
            | Self::UnknownFrameKind(_)
            | Self::ForeignChannel { .. }
            | Self::Compression(_)
            | Self::PayloadSize { .. }
            | Self::DecodeTask(_) => ErrorClass::Parse,
            Self::MissingMetadata
            | Self::MetadataChanged
            | Self::MissingPredecessor { .. }
            | Self::OutOfOrder { .. }
            | Self::UnknownValidTime(_) => ErrorClass::Sequence,
            Self::Connection(_) | Self::Framing(_) | Self::ChannelClosed => ErrorClass::Transport,
            Self::Config(_) => ErrorClass::Config,
        }
    }

    /// `true` for failures that leave the stream unable to decode further
    /// delta frames until a base frame arrives.
    pub fn blocks_stream(&self) -> bool {
        matches!(self, Self::MissingPredecessor { .. } | Self::MissingMetadata)
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for GridError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        GridError::ChannelClosed
    }
}

// ── Tests ────────────────────────────────────────────────────────
