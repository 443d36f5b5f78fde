//! Terminal playback: drives a [`StreamController`] over a stream file
//! and logs what a renderer would draw.

use std::sync::Arc;

use tracing::{info, warn};

use gridcast_core::{
    ChannelAddress, ControllerHandle, GridError, RenderFrame, StreamController, StreamStatus,
};

use crate::config::PlayerConfig;

/// Statistics of the visible cells of one rendered frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSummary {
    pub index: usize,
    pub valid_time: u32,
    pub visible: usize,
    pub min: f32,
    pub max: f32,
    pub mean: f32,
}

impl FrameSummary {
    pub fn of(frame: &RenderFrame) -> Self {
        let mut visible = 0usize;
        let (mut min, mut max, mut sum) = (f32::INFINITY, f32::NEG_INFINITY, 0f64);
        for pair in frame.buffer.data.chunks_exact(2) {
            if pair[1] == 0.0 {
                continue;
            }
            visible += 1;
            min = min.min(pair[0]);
            max = max.max(pair[0]);
            sum += pair[0] as f64;
        }
        if visible == 0 {
            (min, max) = (f32::NAN, f32::NAN);
        }
        Self {
            index: frame.index,
            valid_time: frame.valid_time,
            visible,
            min,
            max,
            mean: if visible == 0 { f32::NAN } else { (sum / visible as f64) as f32 },
        }
    }
}

fn log_status(status: &StreamStatus) {
    info!(
        phase = %status.phase,
        generation = %status.generation,
        frames = status.frames_received,
        display = status.display_index,
        sticky = ?status.sticky_target,
        preloaded = format_args!("{}/{}", status.preload.materialized, status.preload.total),
        "status"
    );
    if let Some(note) = &status.note {
        warn!("{note}");
    }
}

/// Spawn the controller for `address` using the configured file source.
pub fn start(
    config: &PlayerConfig,
    address: ChannelAddress,
) -> Result<ControllerHandle, GridError> {
    let connector = Arc::new(config.connector());
    let (handle, _task) = StreamController::spawn(config.stream.clone(), connector, address)?;
    Ok(handle)
}

/// Play until Ctrl-C.
///
/// `seek_value` > 0 reloads once connected with that seek position, so
/// playback jumps to the frame as soon as it arrives.
pub async fn run(config: PlayerConfig, seek_value: usize) -> Result<(), GridError> {
    let address = config.address();
    info!(channel = %address, path = %config.stream_path().display(), "playing");

    let handle = start(&config, address)?;
    if seek_value > 0 {
        handle.reload(seek_value).await?;
    }

    let mut frames = handle.frames();
    let mut status = handle.status_receiver();
    let mut last_logged = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
            changed = frames.changed() => {
                if changed.is_err() {
                    break;
                }
                let summary = frames.borrow_and_update().as_ref().map(FrameSummary::of);
                if let Some(s) = summary {
                    info!(
                        index = s.index,
                        valid_time = s.valid_time,
                        visible = s.visible,
                        min = s.min,
                        max = s.max,
                        mean = s.mean,
                        "frame rendered"
                    );
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = status.borrow_and_update().clone();
                // Lifecycle changes and new notes only.
                let key = (snapshot.phase, snapshot.generation, snapshot.note.clone());
                if last_logged.as_ref() != Some(&key) {
                    log_status(&snapshot);
                    last_logged = Some(key);
                }
            }
        }
    }

    handle.shutdown().await.ok();
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use gridcast_core::{Generation, Materialized};

    fn frame(data: Vec<f32>) -> RenderFrame {
        RenderFrame {
            generation: Generation::default(),
            index: 3,
            valid_time: 10_800,
            buffer: Materialized {
                width: (data.len() / 2) as u32,
                height: 1,
                data: data.into(),
            },
        }
    }

    #[test]
    fn summary_skips_hidden_cells() {
        let s = FrameSummary::of(&frame(vec![1.0, 1.0, 99.0, 0.0, 3.0, 1.0]));
        assert_eq!(s.visible, 2);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 3.0);
        assert_eq!(s.mean, 2.0);
        assert_eq!(s.index, 3);
    }

    #[test]
    fn all_hidden_frame_has_no_range() {
        let s = FrameSummary::of(&frame(vec![5.0, 0.0]));
        assert_eq!(s.visible, 0);
        assert!(s.min.is_nan() && s.mean.is_nan());
    }
}
