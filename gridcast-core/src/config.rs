//! Stream engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GridError;

/// Tunables for [`StreamSession`](crate::session::StreamSession) and
/// [`StreamController`](crate::controller::StreamController).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Channel id accepted on the wire; other channels are dropped.
    pub channel_id: u8,
    /// Quiet period after the last inbound message before an unresolved
    /// sticky target gives up, in milliseconds.
    pub stall_threshold_ms: u64,
    /// Delay before reconnecting after a transport loss, in milliseconds.
    pub reconnect_backoff_ms: u64,
    /// Materialize frames in the background.
    pub preload: bool,
    /// Pause between background preload steps while streaming, in
    /// milliseconds.
    pub preload_step_ms: u64,
    /// Number of positions on the seek control, if bounded. A reload only
    /// captures a sticky target strictly inside this range.
    pub seek_positions: Option<usize>,
    /// Depth of the controller's inbound queue.
    pub queue_depth: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_id: 0,
            stall_threshold_ms: 400,
            reconnect_backoff_ms: 2000,
            preload: true,
            preload_step_ms: 5,
            seek_positions: None,
            queue_depth: 256,
        }
    }
}

impl StreamConfig {
    pub fn stall_threshold(&self) -> Duration {
        Duration::from_millis(self.stall_threshold_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn preload_step(&self) -> Duration {
        Duration::from_millis(self.preload_step_ms)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), GridError> {
        if self.stall_threshold_ms == 0 {
            return Err(GridError::Config("stall_threshold_ms must be > 0".into()));
        }
        if self.queue_depth == 0 {
            return Err(GridError::Config("queue_depth must be > 0".into()));
        }
        if self.seek_positions == Some(0) {
            return Err(GridError::Config("seek_positions must be > 0 when set".into()));
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
