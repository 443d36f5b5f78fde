//! Async driver around [`StreamSession`].
//!
//! One tokio task owns the session and processes a single ordered queue
//! of inbound events. Decodes run on the blocking pool but are awaited
//! before the next message is dequeued, so frame `N + 1` is never
//! reconstructed before frame `N`.
//!
//! Connection tasks tag everything they forward with the generation
//! they were opened under and exit as soon as the live generation moves
//! on; the session discards anything stale that is already queued.
//!
//! Rendered frames and status snapshots are published on
//! `tokio::sync::watch` channels; the renderer reads the latest value.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::error::GridError;
use crate::materialize::PreloadMode;
use crate::session::{
    Generation, ReloadCause, RenderFrame, SessionEvent, StatusNote, StreamSession, StreamStatus,
};
use crate::transport::{ChannelAddress, Connector};

// ── Commands & events ────────────────────────────────────────────

#[derive(Debug)]
enum Command {
    Reload {
        address: Option<ChannelAddress>,
        seek_value: usize,
    },
    Seek(usize),
    SetPreload(bool),
    Frame {
        index: usize,
        reply: oneshot::Sender<Option<RenderFrame>>,
    },
    Shutdown,
}

#[derive(Debug)]
enum Inbound {
    Connected(Generation),
    Message(Generation, Bytes),
    Lost(Generation, Option<GridError>),
}

// ── ControllerHandle ─────────────────────────────────────────────

/// Cloneable front end of a running [`StreamController`].
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    frames: watch::Receiver<Option<RenderFrame>>,
    status: watch::Receiver<StreamStatus>,
}

impl ControllerHandle {
    /// Start a new generation on the current channel.
    ///
    /// `seek_value` is the seek-control position; a position inside the
    /// seek range becomes the sticky target.
    pub async fn reload(&self, seek_value: usize) -> Result<(), GridError> {
        self.send(Command::Reload {
            address: None,
            seek_value,
        })
        .await
    }

    /// Switch to another channel, keeping `seek_value` as above.
    pub async fn switch_channel(
        &self,
        address: ChannelAddress,
        seek_value: usize,
    ) -> Result<(), GridError> {
        self.send(Command::Reload {
            address: Some(address),
            seek_value,
        })
        .await
    }

    /// Manual seek; cancels any sticky target.
    pub async fn seek(&self, index: usize) -> Result<(), GridError> {
        self.send(Command::Seek(index)).await
    }

    pub async fn set_preload(&self, enabled: bool) -> Result<(), GridError> {
        self.send(Command::SetPreload(enabled)).await
    }

    /// Pull frame `index`, materializing it if needed.
    pub async fn frame(&self, index: usize) -> Result<Option<RenderFrame>, GridError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Frame { index, reply }).await?;
        rx.await.map_err(|_| GridError::ChannelClosed)
    }

    /// Stop the controller task.
    pub async fn shutdown(&self) -> Result<(), GridError> {
        self.send(Command::Shutdown).await
    }

    /// Latest rendered frame.
    pub fn frames(&self) -> watch::Receiver<Option<RenderFrame>> {
        self.frames.clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<StreamStatus> {
        self.status.clone()
    }

    /// Current status snapshot.
    pub fn status(&self) -> StreamStatus {
        self.status.borrow().clone()
    }

    async fn send(&self, command: Command) -> Result<(), GridError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| GridError::ChannelClosed)
    }
}

// ── StreamController ─────────────────────────────────────────────

/// Owns a [`StreamSession`] and drives it from one task.
pub struct StreamController {
    session: StreamSession,
    connector: Arc<dyn Connector>,
    address: ChannelAddress,
    commands: mpsc::Receiver<Command>,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: mpsc::Receiver<Inbound>,
    /// Live generation, watched by connection tasks.
    live: watch::Sender<Generation>,
    reconnect: Option<(Generation, Instant)>,
    next_preload: Instant,
    frame_tx: watch::Sender<Option<RenderFrame>>,
    status_tx: watch::Sender<StreamStatus>,
}

impl StreamController {
    /// Validate `config`, spawn the controller task and start streaming
    /// `address`.
    pub fn spawn(
        config: StreamConfig,
        connector: Arc<dyn Connector>,
        address: ChannelAddress,
    ) -> Result<(ControllerHandle, JoinHandle<()>), GridError> {
        Self::spawn_with_session(StreamSession::new(config), connector, address)
    }

    /// Like [`spawn`](Self::spawn) with a pre-built session.
    pub fn spawn_with_session(
        session: StreamSession,
        connector: Arc<dyn Connector>,
        address: ChannelAddress,
    ) -> Result<(ControllerHandle, JoinHandle<()>), GridError> {
        session.config().validate()?;
        let depth = session.config().queue_depth;

        let (cmd_tx, cmd_rx) = mpsc::channel(depth);
        let (inbound_tx, inbound_rx) = mpsc::channel(depth);
        let (frame_tx, frame_rx) = watch::channel(None);
        let (status_tx, status_rx) = watch::channel(session.status());

        let controller = Self {
            session,
            connector,
            address,
            commands: cmd_rx,
            inbound_tx,
            inbound_rx,
            live: watch::Sender::new(Generation::default()),
            reconnect: None,
            next_preload: Instant::now(),
            frame_tx,
            status_tx,
        };
        let task = tokio::spawn(controller.run());

        let handle = ControllerHandle {
            commands: cmd_tx,
            frames: frame_rx,
            status: status_rx,
        };
        Ok((handle, task))
    }

    async fn run(mut self) {
        let generation = self
            .session
            .reload(ReloadCause::Requested, 0, Instant::now().into_std());
        self.open(generation);
        self.publish_status();

        loop {
            let stall_at = self.session.stall_deadline().map(Instant::from_std);
            let reconnect_at = self.reconnect.map(|(_, at)| at);
            let preload = self.session.preload_mode();
            let next_preload = self.next_preload;

            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.on_command(cmd),
                },

                Some(inbound) = self.inbound_rx.recv() => self.on_inbound(inbound).await,

                _ = sleep_until(stall_at.unwrap_or_else(Instant::now)), if stall_at.is_some() => {
                    let now = Instant::now().into_std();
                    let events = self.session.stall_check(self.session.generation(), now);
                    self.publish(events);
                }

                _ = sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                    self.on_reconnect_due();
                }

                _ = preload_pause(preload, next_preload), if preload.is_some() => {
                    let generation = self.session.generation();
                    if let Some(index) = self.session.preload_step(generation) {
                        debug!(index, "preloaded frame");
                    }
                    self.next_preload = Instant::now() + self.session.config().preload_step();
                }
            }

            self.publish_status();
        }

        self.session.stop();
        self.live.send_replace(self.session.generation());
        self.publish_status();
        info!("stream controller stopped");
    }

    // ── Handlers ─────────────────────────────────────────────────

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Reload {
                address,
                seek_value,
            } => {
                if let Some(address) = address {
                    info!(channel = %address, "switching channel");
                    self.address = address;
                }
                let generation =
                    self.session
                        .reload(ReloadCause::Requested, seek_value, Instant::now().into_std());
                self.open(generation);
            }
            Command::Seek(index) => {
                let event = self.session.seek(index);
                self.publish(event.into_iter().collect());
            }
            Command::SetPreload(enabled) => {
                info!(enabled, "preload toggled");
                self.session.set_preload(enabled);
            }
            Command::Frame { index, reply } => {
                let _ = reply.send(self.session.frame(index));
            }
            Command::Shutdown => {}
        }
    }

    async fn on_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Connected(generation) => {
                if self.session.connected(generation) {
                    info!(%generation, channel = %self.address, "stream connected");
                }
            }
            Inbound::Message(generation, raw) => {
                self.on_message(generation, raw).await;
            }
            Inbound::Lost(generation, error) => {
                let Some(events) = self.session.disconnected(generation) else {
                    return;
                };
                if let Some(error) = error {
                    warn!(%generation, %error, "transport error");
                }
                self.publish(events);
                let at = Instant::now() + self.session.config().reconnect_backoff();
                self.reconnect = Some((generation, at));
            }
        }
    }

    async fn on_message(&mut self, generation: Generation, raw: Bytes) {
        let job = match self
            .session
            .prepare(generation, raw, Instant::now().into_std())
        {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(e) => {
                warn!(class = ?e.class(), error = %e, "dropping message");
                return;
            }
        };

        let (generation, kind, index) = (job.generation(), job.kind(), job.index());
        let decoded = match tokio::task::spawn_blocking(move || job.run()).await {
            Ok(decoded) => decoded,
            Err(e) => {
                let e = self.session.abandon(generation, kind, index, e.into());
                warn!(index, error = %e, "decode task failed");
                return;
            }
        };

        match self.session.commit(decoded) {
            Ok(events) => self.publish(events),
            Err(e) => warn!(class = ?e.class(), error = %e, "dropping frame"),
        }
    }

    fn on_reconnect_due(&mut self) {
        let Some((generation, _)) = self.reconnect.take() else {
            return;
        };
        if let Some(next) = self
            .session
            .reconnect_due(generation, Instant::now().into_std())
        {
            info!(from = %generation, to = %next, "reconnecting");
            self.open(next);
        }
    }

    // ── Connection tasks ─────────────────────────────────────────

    /// Open a connection for `generation` in its own task.
    fn open(&mut self, generation: Generation) {
        self.reconnect = None;
        self.live.send_replace(generation);

        let connector = Arc::clone(&self.connector);
        let address = self.address.clone();
        let tx = self.inbound_tx.clone();
        tokio::spawn(pump(connector, address, generation, tx, self.live.subscribe()));
    }

    // ── Publishing ───────────────────────────────────────────────

    fn publish(&self, events: Vec<SessionEvent>) {
        for event in events {
            match event {
                SessionEvent::Render(frame) => {
                    debug!(index = frame.index, valid_time = frame.valid_time, "render");
                    self.frame_tx.send_replace(Some(frame));
                }
                SessionEvent::Notice(note @ StatusNote::Idle) => info!(%note, "stream status"),
                SessionEvent::Notice(note) => warn!(%note, "stream status"),
            }
        }
    }

    fn publish_status(&self) {
        let status = self.session.status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

async fn preload_pause(mode: Option<PreloadMode>, next: Instant) {
    match mode {
        Some(PreloadMode::Forced) => tokio::task::yield_now().await,
        _ => sleep_until(next).await,
    }
}

/// Forward one connection's messages, tagged with `generation`, until
/// the stream ends or the generation goes stale.
async fn pump(
    connector: Arc<dyn Connector>,
    address: ChannelAddress,
    generation: Generation,
    tx: mpsc::Sender<Inbound>,
    mut live: watch::Receiver<Generation>,
) {
    let connected = tokio::select! {
        result = connector.connect(&address) => result,
        _ = superseded(&mut live, generation) => return,
    };
    let mut stream = match connected {
        Ok(stream) => stream,
        Err(e) => {
            let _ = tx.send(Inbound::Lost(generation, Some(e))).await;
            return;
        }
    };
    if tx.send(Inbound::Connected(generation)).await.is_err() {
        return;
    }

    loop {
        let item = tokio::select! {
            item = stream.next() => item,
            _ = superseded(&mut live, generation) => {
                debug!(%generation, "connection superseded");
                return;
            }
        };
        let inbound = match item {
            Some(Ok(raw)) => Inbound::Message(generation, raw),
            Some(Err(e)) => Inbound::Lost(generation, Some(e)),
            None => Inbound::Lost(generation, None),
        };
        let lost = matches!(inbound, Inbound::Lost(..));
        if tx.send(inbound).await.is_err() || lost {
            return;
        }
    }
}

/// Resolves once the live generation differs from `generation`, or the
/// controller is gone.
async fn superseded(live: &mut watch::Receiver<Generation>, generation: Generation) {
    let _ = live.wait_for(|g| *g != generation).await;
}
