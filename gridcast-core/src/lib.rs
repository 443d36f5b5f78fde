//! # gridcast-core
//!
//! Stream decode and frame-materialization engine for gridded field
//! time series.
//!
//! This crate contains:
//! - **Wire**: `WireMessage`, `StreamMeta`, `FrameKind`, the per-message
//!   header and metadata record
//! - **Codec**: spatial/temporal delta reversal, validity masks, and the
//!   `Compression` seam (zstd)
//! - **Encoder**: `StreamEncoder`, the producer side of the codec
//! - **Container**: `ChunkCodec` for append-only stream files via `tokio_util`
//! - **Store**: `FrameStore`, the per-generation ordered frame list
//! - **Materialize**: display buffers and the `Preloader` scheduler
//! - **Session**: `StreamSession`, the generation-guarded state machine
//! - **Transport**: `Connector` seam, file-tailing and in-memory connectors
//! - **Controller**: `StreamController`, the async single-consumer driver
//! - **Error**: `GridError`, a typed, `thiserror`-based error hierarchy

pub mod codec;
pub mod config;
pub mod container;
pub mod controller;
pub mod encoder;
pub mod error;
pub mod materialize;
pub mod session;
pub mod store;
pub mod transport;
pub mod wire;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{Compression, DecodedGrid, ValidityMask, Zstd};
pub use config::StreamConfig;
pub use container::{Chunk, ChunkCodec};
pub use controller::{ControllerHandle, StreamController};
pub use encoder::StreamEncoder;
pub use error::{ErrorClass, GridError};
pub use materialize::{Materialized, PreloadMode, PreloadProgress, Preloader};
pub use session::{
    Generation, ReloadCause, RenderFrame, SessionEvent, StatusNote, StreamPhase, StreamSession,
    StreamStatus,
};
pub use store::{Frame, FrameStore};
pub use transport::{
    ChannelAddress, ChunkFileConnector, Connector, MemoryConnector, MemoryLink, MessageStream,
};
pub use wire::{Extent, FrameKind, HEADER_SIZE, StreamMeta, WireMessage};
