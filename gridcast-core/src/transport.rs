//! Transport seam: where raw wire messages come from.
//!
//! A [`Connector`] opens a [`MessageStream`] for a [`ChannelAddress`].
//! The stream yields one serialised wire message per item; its end, or
//! an `Err` item, is a transport loss.
//!
//! Two connectors ship with the crate:
//! - [`ChunkFileConnector`] tails an append-only stream file on disk.
//! - [`MemoryConnector`] hands every connection to the caller as an
//!   mpsc sender, for hosts that produce messages in-process and tests.

use std::fmt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::Stream;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::Decoder;
use tracing::{debug, info, warn};

use crate::container::ChunkCodec;
use crate::error::GridError;

/// Raw wire messages of one connection.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Bytes, GridError>> + Send>>;

/// Default extension of stream files.
pub const DEFAULT_EXTENSION: &str = "wepx";

/// Default pause between reads when the stream file has no new data.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

const READ_CHUNK: usize = 64 * 1024;

// ── ChannelAddress ───────────────────────────────────────────────

/// Identifies one stream: model/source, run, and variable+level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelAddress {
    pub model: String,
    pub run: String,
    pub variable: String,
}

impl ChannelAddress {
    pub fn new(model: impl Into<String>, run: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            run: run.into(),
            variable: variable.into(),
        }
    }

    /// `root/model/run/variable.extension`
    pub fn resolve(&self, root: &Path, extension: &str) -> PathBuf {
        root.join(&self.model)
            .join(&self.run)
            .join(format!("{}.{extension}", self.variable))
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.model, self.run, self.variable)
    }
}

// ── Connector ────────────────────────────────────────────────────

/// Opens message streams.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &ChannelAddress) -> Result<MessageStream, GridError>;
}

// ── ChunkFileConnector ───────────────────────────────────────────

/// Tails `root/model/run/variable.wepx` from the start.
///
/// Complete records are forwarded as soon as they are read; a partially
/// written record waits in the buffer until the writer appends the rest.
/// At end of file the reader sleeps for the poll interval and retries,
/// so the stream only ends when the consumer drops it or the file fails.
#[derive(Debug, Clone)]
pub struct ChunkFileConnector {
    root: PathBuf,
    extension: String,
    poll: Duration,
    channel: u8,
    depth: usize,
}

impl ChunkFileConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: DEFAULT_EXTENSION.to_string(),
            poll: DEFAULT_POLL_INTERVAL,
            channel: 0,
            depth: 64,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Channel id stamped on every forwarded message.
    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth.max(1);
        self
    }

    pub fn path_for(&self, address: &ChannelAddress) -> PathBuf {
        address.resolve(&self.root, &self.extension)
    }
}

#[async_trait]
impl Connector for ChunkFileConnector {
    async fn connect(&self, address: &ChannelAddress) -> Result<MessageStream, GridError> {
        let path = self.path_for(address);
        let file = tokio::fs::File::open(&path).await?;
        info!(path = %path.display(), "tailing stream file");

        let (tx, rx) = mpsc::channel(self.depth);
        tokio::spawn(tail(file, tx, self.channel, self.poll));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Forward complete records from `reader`, polling at end of input.
async fn tail<R: AsyncRead + Unpin>(
    mut reader: R,
    tx: mpsc::Sender<Result<Bytes, GridError>>,
    channel: u8,
    poll: Duration,
) {
    let mut codec = ChunkCodec;
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    loop {
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(chunk)) => {
                    if tx.send(Ok(chunk.into_wire(channel))).await.is_err() {
                        debug!("stream consumer dropped, stopping tail");
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "stream file framing error");
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }

        buf.reserve(READ_CHUNK);
        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                if tx.is_closed() {
                    return;
                }
                tokio::time::sleep(poll).await;
            }
            Ok(n) => debug!(bytes = n, "read from stream"),
            Err(e) => {
                let _ = tx.send(Err(e.into())).await;
                return;
            }
        }
    }
}

// ── MemoryConnector ──────────────────────────────────────────────

/// One connection opened through a [`MemoryConnector`].
///
/// Messages sent on `tx` reach the controller in order. Dropping `tx`
/// ends the stream; sending an `Err` reports a transport failure.
#[derive(Debug)]
pub struct MemoryLink {
    pub address: ChannelAddress,
    pub tx: mpsc::Sender<Result<Bytes, GridError>>,
}

/// In-process connector; every `connect` yields a fresh [`MemoryLink`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    links: mpsc::UnboundedSender<MemoryLink>,
    depth: usize,
}

impl MemoryConnector {
    /// Create the connector and the receiver its links are delivered on.
    pub fn new(depth: usize) -> (Self, mpsc::UnboundedReceiver<MemoryLink>) {
        let (links, rx) = mpsc::unbounded_channel();
        (
            Self {
                links,
                depth: depth.max(1),
            },
            rx,
        )
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, address: &ChannelAddress) -> Result<MessageStream, GridError> {
        let (tx, rx) = mpsc::channel(self.depth);
        self.links
            .send(MemoryLink {
                address: address.clone(),
                tx,
            })
            .map_err(|_| GridError::ChannelClosed)?;
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Chunk;
    use futures::StreamExt;
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::Encoder;

    fn record(kind: u8, body: &'static [u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        ChunkCodec
            .encode(Chunk { kind, body: Bytes::from_static(body) }, &mut buf)
            .unwrap();
        buf
    }

    #[test]
    fn resolves_channel_path() {
        let addr = ChannelAddress::new("icon", "2026101700", "t2m");
        let path = addr.resolve(Path::new("data"), DEFAULT_EXTENSION);
        assert_eq!(path, Path::new("data/icon/2026101700/t2m.wepx"));
        assert_eq!(addr.to_string(), "icon/2026101700/t2m");
    }

    #[tokio::test]
    async fn missing_file_fails_to_connect() {
        let dir = tempfile::tempdir().unwrap();
        let connector = ChunkFileConnector::new(dir.path());
        let err = connector
            .connect(&ChannelAddress::new("m", "r", "v"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GridError::Connection(_)));
    }

    #[tokio::test]
    async fn tails_records_as_they_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let addr = ChannelAddress::new("m", "r", "v");
        let connector = ChunkFileConnector::new(dir.path())
            .with_channel(3)
            .with_poll_interval(Duration::from_millis(5));
        let path = connector.path_for(&addr);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();

        let first = record(0, b"one");
        let second = record(1, b"two");
        let mut file = tokio::fs::File::create(&path).await.unwrap();
        file.write_all(&first).await.unwrap();
        file.write_all(&second[..3]).await.unwrap();
        file.flush().await.unwrap();

        let mut stream = connector.connect(&addr).await.unwrap();
        let msg = stream.next().await.unwrap().unwrap();
        assert_eq!(&msg[..], &[3, 0, b'o', b'n', b'e']);

        file.write_all(&second[3..]).await.unwrap();
        file.flush().await.unwrap();
        let msg = stream.next().await.unwrap().unwrap();
        assert_eq!(&msg[..], &[3, 1, b't', b'w', b'o']);
    }

    #[tokio::test(start_paused = true)]
    async fn split_record_is_held_until_complete() {
        let first = record(0, b"base");
        let second = record(1, b"delta");
        let reader = tokio_test::io::Builder::new()
            .read(&first[..7])
            .read(&first[7..])
            .read(&second[..2])
            .wait(Duration::from_millis(50))
            .read(&second[2..])
            .build();

        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(tail(reader, tx, 9, Duration::from_millis(10)));
        let mut stream = ReceiverStream::new(rx);

        assert_eq!(&stream.next().await.unwrap().unwrap()[..], b"\x09\x00base");
        assert_eq!(&stream.next().await.unwrap().unwrap()[..], b"\x09\x01delta");
    }

    #[tokio::test]
    async fn corrupt_length_ends_stream_with_error() {
        let mut bad = BytesMut::new();
        bad.extend_from_slice(&u32::MAX.to_le_bytes());
        bad.extend_from_slice(&[0]);
        let reader = tokio_test::io::Builder::new().read(&bad).build();

        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(tail(reader, tx, 0, Duration::from_millis(10)));
        let mut stream = ReceiverStream::new(rx);

        assert!(matches!(stream.next().await, Some(Err(GridError::Framing(_)))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn memory_links_carry_messages() {
        let (connector, mut links) = MemoryConnector::new(4);
        let addr = ChannelAddress::new("m", "r", "v");
        let mut stream = connector.connect(&addr).await.unwrap();

        let link = links.recv().await.unwrap();
        assert_eq!(link.address, addr);
        link.tx.send(Ok(Bytes::from_static(b"x"))).await.unwrap();
        drop(link);

        assert_eq!(&stream.next().await.unwrap().unwrap()[..], b"x");
        assert!(stream.next().await.is_none());
    }
}
