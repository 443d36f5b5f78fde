//! Demo stream file generator.
//!
//! Writes a drifting temperature-like field as an append-only stream
//! file. With a delay between frames the file grows while a player
//! tails it, which is how a live producer behaves.

use std::path::Path;
use std::time::Duration;

use futures::SinkExt;
use tokio_util::codec::FramedWrite;
use tracing::{debug, info};

use gridcast_core::{Chunk, ChunkCodec, Extent, GridError, StreamEncoder, StreamMeta};

/// Seconds between the valid times of consecutive frames.
const VALID_TIME_STEP: u32 = 3600;

#[derive(Debug, Clone)]
pub struct SynthOptions {
    pub frames: usize,
    pub width: u32,
    pub height: u32,
    pub iframe_interval: u64,
    /// Mask out a disc of cells as no-data.
    pub masked: bool,
    /// Pause between appended frames.
    pub delay: Duration,
}

impl Default for SynthOptions {
    fn default() -> Self {
        Self {
            frames: 24,
            width: 64,
            height: 32,
            iframe_interval: 8,
            masked: true,
            delay: Duration::ZERO,
        }
    }
}

impl SynthOptions {
    pub fn meta(&self) -> StreamMeta {
        StreamMeta {
            width: self.width,
            height: self.height,
            extent: Extent::from([-30.0, 30.0, 45.0, 70.0]),
            scale: 100.0,
            has_alpha: self.masked,
        }
    }
}

/// Field value of cell `(x, y)` at frame `t`, `NaN` for masked cells.
fn sample(opts: &SynthOptions, x: u32, y: u32, t: usize) -> f32 {
    let (w, h) = (opts.width as f32, opts.height as f32);
    let (fx, fy) = (x as f32 / w, y as f32 / h);

    if opts.masked {
        let (dx, dy) = (fx - 0.7, fy - 0.3);
        if dx * dx + dy * dy < 0.01 {
            return f32::NAN;
        }
    }

    let phase = t as f32 * 0.2;
    15.0 - 25.0 * fy + 6.0 * (fx * std::f32::consts::TAU + phase).sin()
}

/// Render frame `t` of the demo field.
pub fn frame_values(opts: &SynthOptions, t: usize) -> Vec<f32> {
    (0..opts.height)
        .flat_map(|y| (0..opts.width).map(move |x| (x, y)))
        .map(|(x, y)| sample(opts, x, y, t))
        .collect()
}

/// Write `opts.frames` frames to `path`, creating parent directories.
/// Returns the number of frames written.
pub async fn write_demo(path: &Path, opts: &SynthOptions) -> Result<usize, GridError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = tokio::fs::File::create(path).await?;
    let mut sink = FramedWrite::new(file, ChunkCodec);

    let mut encoder =
        StreamEncoder::new(opts.meta(), 0).with_iframe_interval(opts.iframe_interval);
    info!(
        path = %path.display(),
        frames = opts.frames,
        width = opts.width,
        height = opts.height,
        "writing demo stream"
    );

    for t in 0..opts.frames {
        let valid_time = t as u32 * VALID_TIME_STEP;
        let message = encoder.encode(&frame_values(opts, t), valid_time)?;
        sink.send(Chunk::from_wire(&message)?).await?;
        debug!(frame = t, bytes = message.len(), "frame appended");

        if !opts.delay.is_zero() {
            tokio::time::sleep(opts.delay).await;
        }
    }
    sink.flush().await?;
    Ok(encoder.frame_count() as usize)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use gridcast_core::{FrameKind, WireMessage};
    use tokio_util::codec::FramedRead;

    #[test]
    fn masked_disc_is_nan() {
        let opts = SynthOptions {
            width: 10,
            height: 10,
            ..Default::default()
        };
        let values = frame_values(&opts, 0);
        assert_eq!(values.len(), 100);
        assert!(values[3 * 10 + 7].is_nan());
        assert!(values[0].is_finite());
    }

    #[tokio::test]
    async fn demo_file_holds_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo/run/t2m.wepx");
        let opts = SynthOptions {
            frames: 5,
            width: 8,
            height: 4,
            iframe_interval: 4,
            ..Default::default()
        };
        assert_eq!(write_demo(&path, &opts).await.unwrap(), 5);

        let file = tokio::fs::File::open(&path).await.unwrap();
        let chunks: Vec<Chunk> = FramedRead::new(file, ChunkCodec)
            .map(|c| c.unwrap())
            .collect()
            .await;
        let kinds: Vec<FrameKind> = chunks
            .into_iter()
            .map(|c| WireMessage::parse(c.into_wire(0)).unwrap().kind)
            .collect();
        use FrameKind::*;
        assert_eq!(kinds, vec![Base, Delta, Delta, Delta, Base]);
    }
}
