//! Stream session: the single owned value holding all per-stream state.
//!
//! The session owns the generation counter, the connection phase, the
//! frame store, the per-generation [`StreamMeta`], the sticky target and
//! its stall deadline, and the preload scheduler. It performs no I/O and
//! never reads the clock: callers pass `now`, which keeps every
//! transition deterministic under test.
//!
//! Every deferred operation carries the [`Generation`] it was created
//! under and becomes a no-op once the live generation has moved on.
//!
//! ```text
//!  Idle ──► Connecting ──► Streaming ──► Reconnecting
//!              ▲                              │
//!              └──────── reload / reconnect ◄─┘
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::codec::{self, Compression, DecodedGrid, Zstd};
use crate::config::StreamConfig;
use crate::error::GridError;
use crate::materialize::{self, Materialized, PreloadMode, PreloadProgress, Preloader};
use crate::store::{Frame, FrameStore};
use crate::wire::{FrameKind, StreamMeta, WireMessage};

// ── Generation ───────────────────────────────────────────────────

/// Epoch counter; bumped on every reload, reconnect, and stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub fn get(self) -> u64 {
        self.0
    }

    fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}", self.0)
    }
}

// ── StreamPhase ──────────────────────────────────────────────────

/// Connection lifecycle of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamPhase {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Reconnecting,
}

impl std::fmt::Display for StreamPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}

impl StreamPhase {
    /// Transition to `Streaming`.
    ///
    /// Valid from: `Connecting`, `Reconnecting`, `Streaming`.
    pub fn mark_streaming(&mut self) -> Result<(), GridError> {
        match self {
            Self::Connecting | Self::Reconnecting | Self::Streaming => {
                *self = Self::Streaming;
                Ok(())
            }
            Self::Idle => Err(GridError::Config(
                "cannot stream: session is idle".into(),
            )),
        }
    }

    /// Transition to `Reconnecting`.
    ///
    /// Valid from: `Connecting`, `Streaming`.
    pub fn mark_lost(&mut self) -> Result<(), GridError> {
        match self {
            Self::Connecting | Self::Streaming => {
                *self = Self::Reconnecting;
                Ok(())
            }
            _ => Err(GridError::Config(format!(
                "cannot mark transport lost from {self}"
            ))),
        }
    }
}

// ── Outbound types ───────────────────────────────────────────────

/// Why a new generation was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadCause {
    /// Explicit user or host request (including a channel change).
    Requested,
    /// Automatic reconnect after a transport loss.
    Reconnect,
}

/// A frame handed to the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderFrame {
    pub generation: Generation,
    pub index: usize,
    pub valid_time: u32,
    pub buffer: Materialized,
}

/// User-visible condition raised by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusNote {
    /// The sticky target never arrived; the newest frame is shown instead.
    Stalled { target: usize, shown: Option<usize> },
    /// Delta frames cannot be decoded until the next base frame.
    Stuck { index: usize },
    /// The transport is down and nothing is left to preload.
    Idle,
}

impl std::fmt::Display for StatusNote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stalled {
                target,
                shown: Some(shown),
            } => write!(f, "frame {target} not received in time, showing frame {shown}"),
            Self::Stalled { target, shown: None } => {
                write!(f, "frame {target} not received in time, no frames yet")
            }
            Self::Stuck { index } => {
                write!(f, "stream stuck at frame {index}, waiting for a base frame")
            }
            Self::Idle => write!(f, "idle"),
        }
    }
}

/// Output of a session transition, consumed by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Render(RenderFrame),
    Notice(StatusNote),
}

/// Snapshot of the session for status displays.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamStatus {
    pub phase: StreamPhase,
    pub generation: Generation,
    /// Seek-control position.
    pub display_index: usize,
    /// Frame actually on screen.
    pub shown_index: Option<usize>,
    pub sticky_target: Option<usize>,
    pub frames_received: usize,
    pub preload: PreloadProgress,
    pub note: Option<StatusNote>,
}

// ── DecodeJob ────────────────────────────────────────────────────

/// Self-contained decode work for one message.
///
/// Owns everything it needs, so it can run on a blocking thread while
/// the session waits; [`StreamSession::commit`] applies the result.
pub struct DecodeJob {
    generation: Generation,
    kind: FrameKind,
    index: usize,
    valid_time: u32,
    meta: StreamMeta,
    payload: Bytes,
    previous: Option<Arc<[i32]>>,
    compression: Arc<dyn Compression>,
}

impl std::fmt::Debug for DecodeJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeJob")
            .field("generation", &self.generation)
            .field("kind", &self.kind)
            .field("index", &self.index)
            .field("valid_time", &self.valid_time)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl DecodeJob {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Store index the decoded grid is destined for.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Decompress and reconstruct.
    pub fn run(self) -> DecodedFrame {
        let grid = codec::decode_grid(
            self.compression.as_ref(),
            self.kind,
            &self.payload,
            &self.meta,
            self.previous.as_deref(),
            self.index,
        );
        DecodedFrame {
            generation: self.generation,
            kind: self.kind,
            index: self.index,
            valid_time: self.valid_time,
            grid,
        }
    }
}

/// Result of a [`DecodeJob`].
#[derive(Debug)]
pub struct DecodedFrame {
    generation: Generation,
    kind: FrameKind,
    index: usize,
    valid_time: u32,
    grid: Result<DecodedGrid, GridError>,
}

impl DecodedFrame {
    pub fn generation(&self) -> Generation {
        self.generation
    }
}

// ── StreamSession ────────────────────────────────────────────────

/// Owned state of one stream; see the module docs.
pub struct StreamSession {
    config: StreamConfig,
    compression: Arc<dyn Compression>,
    generation: Generation,
    phase: StreamPhase,
    store: FrameStore,
    meta: Option<StreamMeta>,
    display_index: usize,
    shown_index: Option<usize>,
    sticky_target: Option<usize>,
    stall_deadline: Option<Instant>,
    /// A base/delta message was lost; deltas are refused until a base frame.
    chain_broken: bool,
    preloader: Preloader,
    note: Option<StatusNote>,
}

impl StreamSession {
    /// Create an idle session using zstd payload compression.
    pub fn new(config: StreamConfig) -> Self {
        Self::with_compression(config, Arc::new(Zstd::default()))
    }

    pub fn with_compression(config: StreamConfig, compression: Arc<dyn Compression>) -> Self {
        let preloader = Preloader::new(config.preload);
        Self {
            config,
            compression,
            generation: Generation::default(),
            phase: StreamPhase::Idle,
            store: FrameStore::new(),
            meta: None,
            display_index: 0,
            shown_index: None,
            sticky_target: None,
            stall_deadline: None,
            chain_broken: false,
            preloader,
            note: None,
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn is_live(&self, generation: Generation) -> bool {
        generation == self.generation
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn store(&self) -> &FrameStore {
        &self.store
    }

    pub fn meta(&self) -> Option<&StreamMeta> {
        self.meta.as_ref()
    }

    pub fn display_index(&self) -> usize {
        self.display_index
    }

    pub fn sticky_target(&self) -> Option<usize> {
        self.sticky_target
    }

    /// When the stall timer fires, if armed.
    pub fn stall_deadline(&self) -> Option<Instant> {
        self.stall_deadline
    }

    pub fn preload_mode(&self) -> Option<PreloadMode> {
        self.preloader.armed()
    }

    pub fn status(&self) -> StreamStatus {
        StreamStatus {
            phase: self.phase,
            generation: self.generation,
            display_index: self.display_index,
            shown_index: self.shown_index,
            sticky_target: self.sticky_target,
            frames_received: self.store.len(),
            preload: Preloader::progress(&self.store),
            note: self.note.clone(),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Start a new generation and return it.
    ///
    /// `seek_value` is the seek-control position at the time of the
    /// reload. A position strictly inside the seek range (and above 0)
    /// becomes the sticky target and arms the stall timer.
    pub fn reload(&mut self, cause: ReloadCause, seek_value: usize, now: Instant) -> Generation {
        self.generation = self.generation.next();

        let in_range = self.config.seek_positions.is_none_or(|n| seek_value < n);
        self.sticky_target = (seek_value > 0 && in_range).then_some(seek_value);
        self.stall_deadline = self
            .sticky_target
            .map(|_| now + self.config.stall_threshold());

        self.store.reset();
        self.meta = None;
        self.display_index = seek_value;
        self.shown_index = None;
        self.chain_broken = false;
        self.note = None;
        self.preloader.disarm();
        self.phase = StreamPhase::Connecting;

        info!(
            generation = %self.generation,
            ?cause,
            sticky = ?self.sticky_target,
            "stream reloaded"
        );
        self.generation
    }

    /// The transport for `generation` is up.
    pub fn connected(&mut self, generation: Generation) -> bool {
        if !self.is_live(generation) {
            return false;
        }
        self.phase.mark_streaming().is_ok()
    }

    /// The transport for `generation` was lost.
    ///
    /// Returns `None` for a stale generation, otherwise the notices to
    /// publish. The caller schedules the reconnect.
    pub fn disconnected(&mut self, generation: Generation) -> Option<Vec<SessionEvent>> {
        if !self.is_live(generation) {
            return None;
        }
        if let Err(e) = self.phase.mark_lost() {
            debug!("ignoring disconnect: {e}");
            return None;
        }

        let mut events = Vec::new();
        if self.preloader.is_enabled() && !self.store.is_empty() {
            self.preloader.arm(PreloadMode::Forced);
        } else {
            self.note = Some(StatusNote::Idle);
            events.push(SessionEvent::Notice(StatusNote::Idle));
        }
        warn!(generation = %generation, frames = self.store.len(), "transport lost");
        Some(events)
    }

    /// The reconnect timer scheduled for `generation` fired.
    ///
    /// Starts the next generation, carrying the current seek position as
    /// the sticky target, unless a reload already superseded it.
    pub fn reconnect_due(&mut self, generation: Generation, now: Instant) -> Option<Generation> {
        if !self.is_live(generation) || self.phase != StreamPhase::Reconnecting {
            return None;
        }
        Some(self.reload(ReloadCause::Reconnect, self.display_index, now))
    }

    /// Stop streaming; all outstanding work becomes stale.
    pub fn stop(&mut self) {
        self.generation = self.generation.next();
        self.phase = StreamPhase::Idle;
        self.sticky_target = None;
        self.stall_deadline = None;
        self.preloader.disarm();
    }

    // ── Message path ─────────────────────────────────────────────

    /// Parse `raw` and prepare its decode.
    ///
    /// Returns `Ok(None)` for a stale generation or an idle session that
    /// has not been reloaded yet. Any inbound message of
    /// the live generation pushes the stall deadline back, even one that
    /// fails to parse.
    pub fn prepare(
        &mut self,
        generation: Generation,
        raw: Bytes,
        now: Instant,
    ) -> Result<Option<DecodeJob>, GridError> {
        if !self.is_live(generation) || self.phase == StreamPhase::Idle {
            return Ok(None);
        }
        if self.sticky_target.is_some() {
            self.stall_deadline = Some(now + self.config.stall_threshold());
        }
        self.phase.mark_streaming()?;

        let msg = WireMessage::parse(raw)?;
        if msg.channel != self.config.channel_id {
            return Err(GridError::ForeignChannel {
                expected: self.config.channel_id,
                got: msg.channel,
            });
        }

        match (&self.meta, msg.meta) {
            (None, Some(meta)) => {
                debug!(width = meta.width, height = meta.height, scale = meta.scale, "stream metadata");
                self.meta = Some(meta);
            }
            (Some(current), Some(meta)) if *current != meta => {
                return Err(GridError::MetadataChanged);
            }
            (None, None) => return Err(GridError::MissingMetadata),
            _ => {}
        }
        let meta = self.meta.clone().ok_or(GridError::MissingMetadata)?;

        let (index, previous) = match msg.kind {
            FrameKind::Base => (self.store.len(), None),
            FrameKind::Delta => {
                let index = self.store.len();
                if self.chain_broken {
                    return Err(GridError::MissingPredecessor { index });
                }
                (index, self.store.last().map(|f| Arc::clone(f.quantized())))
            }
            FrameKind::Correction => {
                let index = self
                    .store
                    .find_valid_time(msg.valid_time)
                    .ok_or(GridError::UnknownValidTime(msg.valid_time))?;
                (index, None)
            }
        };

        Ok(Some(DecodeJob {
            generation,
            kind: msg.kind,
            index,
            valid_time: msg.valid_time,
            meta,
            payload: msg.payload,
            previous,
            compression: Arc::clone(&self.compression),
        }))
    }

    /// Apply a finished decode.
    ///
    /// Stale results are discarded with no effect. A failed base or delta
    /// decode breaks the delta chain until the next base frame.
    pub fn commit(&mut self, decoded: DecodedFrame) -> Result<Vec<SessionEvent>, GridError> {
        if !self.is_live(decoded.generation) {
            return Ok(Vec::new());
        }

        let grid = match decoded.grid {
            Ok(grid) => grid,
            Err(e) => {
                if decoded.kind != FrameKind::Correction {
                    return Err(self.break_chain(decoded.index, e));
                }
                return Err(e);
            }
        };

        match decoded.kind {
            FrameKind::Correction => {
                self.store.correct(decoded.index, grid)?;
                debug!(index = decoded.index, "frame corrected");
                if self.shown_index == Some(decoded.index) {
                    return Ok(self.render(decoded.index).into_iter().collect());
                }
                Ok(Vec::new())
            }
            FrameKind::Base | FrameKind::Delta => {
                let frame = Frame::new(decoded.index, decoded.valid_time, grid);
                let index = self.store.append(frame)?;
                if decoded.kind == FrameKind::Base && self.chain_broken {
                    self.chain_broken = false;
                    self.note = None;
                    info!(index, "delta chain restored");
                }
                debug!(index, kind = %decoded.kind, valid_time = decoded.valid_time, "frame appended");
                self.preloader.arm(PreloadMode::Background);
                Ok(self.on_appended(index))
            }
        }
    }

    /// A decode job never produced a result.
    ///
    /// Handled like a failed decode: a lost base or delta frame breaks
    /// the chain so the next delta is not applied to the wrong grid.
    pub fn abandon(
        &mut self,
        generation: Generation,
        kind: FrameKind,
        index: usize,
        error: GridError,
    ) -> GridError {
        if !self.is_live(generation) || kind == FrameKind::Correction {
            return error;
        }
        self.break_chain(index, error)
    }

    /// Parse, decode and commit in one call.
    pub fn handle_message(
        &mut self,
        generation: Generation,
        raw: Bytes,
        now: Instant,
    ) -> Result<Vec<SessionEvent>, GridError> {
        match self.prepare(generation, raw, now)? {
            Some(job) => self.commit(job.run()),
            None => Ok(Vec::new()),
        }
    }

    fn break_chain(&mut self, index: usize, error: GridError) -> GridError {
        if !self.chain_broken {
            warn!(index, %error, "delta chain broken");
        }
        self.chain_broken = true;
        self.note = Some(StatusNote::Stuck { index });
        error
    }

    fn on_appended(&mut self, index: usize) -> Vec<SessionEvent> {
        let render = match self.sticky_target {
            Some(target) if target == index => {
                info!(index, "sticky target reached");
                self.sticky_target = None;
                self.stall_deadline = None;
                self.display_index = index;
                true
            }
            None => index == 0 || index == self.display_index,
            Some(_) => false,
        };
        if render {
            self.render(index).into_iter().collect()
        } else {
            Vec::new()
        }
    }

    fn render(&mut self, index: usize) -> Option<SessionEvent> {
        let meta = self.meta.as_ref()?;
        let buffer = materialize::ensure_materialized(&mut self.store, index, meta)?;
        let valid_time = self.store.get(index)?.valid_time();
        self.shown_index = Some(index);
        Some(SessionEvent::Render(RenderFrame {
            generation: self.generation,
            index,
            valid_time,
            buffer,
        }))
    }

    // ── Timers ───────────────────────────────────────────────────

    /// The stall timer armed under `generation` fired at `now`.
    ///
    /// A no-op for a stale generation, a resolved target, or a deadline
    /// that was pushed back by later traffic.
    pub fn stall_check(&mut self, generation: Generation, now: Instant) -> Vec<SessionEvent> {
        if !self.is_live(generation) {
            return Vec::new();
        }
        let (Some(target), Some(deadline)) = (self.sticky_target, self.stall_deadline) else {
            return Vec::new();
        };
        if now < deadline {
            return Vec::new();
        }

        self.sticky_target = None;
        self.stall_deadline = None;
        let last = self.store.last_index();
        self.display_index = last.unwrap_or(0);
        warn!(target, shown = ?last, "sticky target stalled");

        let note = StatusNote::Stalled { target, shown: last };
        self.note = Some(note.clone());
        let mut events: Vec<SessionEvent> = last.and_then(|i| self.render(i)).into_iter().collect();
        events.push(SessionEvent::Notice(note));
        events
    }

    // ── User interaction ─────────────────────────────────────────

    /// Manual seek: always wins over a pending sticky target.
    pub fn seek(&mut self, index: usize) -> Option<SessionEvent> {
        self.sticky_target = None;
        self.stall_deadline = None;
        self.display_index = index;
        if matches!(self.note, Some(StatusNote::Stalled { .. })) {
            self.note = None;
        }
        self.render(index)
    }

    /// Toggle background preloading.
    pub fn set_preload(&mut self, enabled: bool) {
        self.preloader.set_enabled(enabled);
        if enabled && self.phase == StreamPhase::Reconnecting {
            self.preloader.arm(PreloadMode::Forced);
        }
    }

    /// Materialize one frame for `generation`.
    ///
    /// Returns the frame index touched, or `None` when stale, disarmed,
    /// or caught up.
    pub fn preload_step(&mut self, generation: Generation) -> Option<usize> {
        if !self.is_live(generation) {
            return None;
        }
        let Some(meta) = self.meta.as_ref() else {
            self.preloader.disarm();
            return None;
        };
        let stepped = self
            .preloader
            .step(&mut self.store, meta, self.display_index);
        if stepped.is_none() && self.phase == StreamPhase::Reconnecting && self.note.is_none() {
            self.note = Some(StatusNote::Idle);
        }
        stepped
    }

    /// Pull frame `index` for the renderer, materializing it on demand.
    pub fn frame(&mut self, index: usize) -> Option<RenderFrame> {
        let meta = self.meta.as_ref()?;
        let buffer = materialize::ensure_materialized(&mut self.store, index, meta)?;
        let valid_time = self.store.get(index)?.valid_time();
        Some(RenderFrame {
            generation: self.generation,
            index,
            valid_time,
            buffer,
        })
    }

    /// Time left until the stall deadline, saturating at zero.
    pub fn stall_remaining(&self, now: Instant) -> Option<Duration> {
        self.stall_deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }
}

// ── Tests ────────────────────────────────────────────────────────
