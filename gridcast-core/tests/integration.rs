//! Integration tests: the async controller end to end over in-memory
//! links (paused clock for stall and reconnect timing) and a real
//! stream file on disk.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;

use gridcast_core::{
    ChannelAddress, Chunk, ChunkCodec, ChunkFileConnector, ControllerHandle, Extent,
    MemoryConnector, MemoryLink, StatusNote, StreamConfig, StreamController, StreamEncoder,
    StreamMeta, StreamPhase,
};

// ── Helpers ──────────────────────────────────────────────────────

fn meta() -> StreamMeta {
    StreamMeta {
        width: 2,
        height: 1,
        extent: Extent::from([-10.0, 35.0, 30.0, 60.0]),
        scale: 100.0,
        has_alpha: true,
    }
}

/// Frame `i` holds `[i, i + 0.5]`.
fn messages(n: usize) -> Vec<Bytes> {
    let mut enc = StreamEncoder::new(meta(), 0).with_iframe_interval(4);
    (0..n)
        .map(|i| {
            let v = i as f32;
            Bytes::from(enc.encode(&[v, v + 0.5], 3600 * i as u32).unwrap())
        })
        .collect()
}

fn address() -> ChannelAddress {
    ChannelAddress::new("icon-eu", "2026101700", "t_2m")
}

fn start(config: StreamConfig) -> (ControllerHandle, mpsc::UnboundedReceiver<MemoryLink>) {
    let (connector, links) = MemoryConnector::new(64);
    let (handle, _task) = StreamController::spawn(config, Arc::new(connector), address()).unwrap();
    (handle, links)
}

async fn feed(link: &MemoryLink, msgs: &[Bytes]) {
    for m in msgs {
        link.tx.send(Ok(m.clone())).await.unwrap();
    }
}

async fn wait_rendered(handle: &ControllerHandle, index: usize) {
    let mut frames = handle.frames();
    frames
        .wait_for(|f| f.as_ref().is_some_and(|f| f.index == index))
        .await
        .unwrap();
}

// ── Rendering ────────────────────────────────────────────────────

#[tokio::test]
async fn first_frame_renders_and_later_frames_are_pullable() {
    let (handle, mut links) = start(StreamConfig::default());
    let link = links.recv().await.unwrap();
    assert_eq!(link.address, address());

    feed(&link, &messages(6)).await;
    wait_rendered(&handle, 0).await;

    let mut status = handle.status_receiver();
    status.wait_for(|s| s.frames_received == 6).await.unwrap();
    assert_eq!(handle.status().phase, StreamPhase::Streaming);

    let frame = handle.frame(5).await.unwrap().unwrap();
    assert_eq!(frame.valid_time, 5 * 3600);
    assert_eq!(frame.buffer.value(0), Some(5.0));
    assert_eq!(frame.buffer.value(1), Some(5.5));
    assert!(handle.frame(6).await.unwrap().is_none());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn correction_redraws_and_feeds_the_next_delta() {
    let (handle, mut links) = start(StreamConfig::default());
    let link = links.recv().await.unwrap();

    let mut enc = StreamEncoder::new(meta(), 0);
    let msgs = vec![
        Bytes::from(enc.encode(&[1.0, 1.5], 0).unwrap()),
        Bytes::from(enc.encode_correction(&[4.0, 4.5], 0).unwrap()),
        Bytes::from(enc.encode(&[6.0, 6.25], 3600).unwrap()),
    ];
    feed(&link, &msgs).await;

    let mut frames = handle.frames();
    frames
        .wait_for(|f| f.as_ref().is_some_and(|f| f.index == 0 && f.buffer.value(0) == Some(4.0)))
        .await
        .unwrap();
    let mut status = handle.status_receiver();
    status.wait_for(|s| s.frames_received == 2).await.unwrap();

    let next = handle.frame(1).await.unwrap().unwrap();
    assert_eq!(next.buffer.value(0), Some(6.0));
    assert_eq!(next.buffer.value(1), Some(6.25));

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn sticky_target_renders_when_it_arrives() {
    let (handle, mut links) = start(StreamConfig::default());
    let _first = links.recv().await.unwrap();

    handle.reload(7).await.unwrap();
    let link = links.recv().await.unwrap();
    assert_eq!(handle.status().sticky_target, Some(7));

    feed(&link, &messages(9)).await;
    wait_rendered(&handle, 7).await;

    let status = handle.status();
    assert_eq!(status.sticky_target, None);
    assert_eq!(status.display_index, 7);
    assert_eq!(status.note, None);
}

#[tokio::test(start_paused = true)]
async fn stalled_target_snaps_to_newest_frame() {
    let (handle, mut links) = start(StreamConfig::default());
    let _first = links.recv().await.unwrap();

    handle.reload(5).await.unwrap();
    let link = links.recv().await.unwrap();
    feed(&link, &messages(3)).await;

    let mut status = handle.status_receiver();
    let note = status
        .wait_for(|s| matches!(s.note, Some(StatusNote::Stalled { .. })))
        .await
        .unwrap()
        .note
        .clone();
    assert_eq!(
        note,
        Some(StatusNote::Stalled {
            target: 5,
            shown: Some(2)
        })
    );
    wait_rendered(&handle, 2).await;
    assert_eq!(handle.status().sticky_target, None);
}

#[tokio::test(start_paused = true)]
async fn manual_seek_cancels_sticky_target() {
    let (handle, mut links) = start(StreamConfig::default());
    let _first = links.recv().await.unwrap();

    handle.reload(4).await.unwrap();
    let link = links.recv().await.unwrap();
    feed(&link, &messages(2)).await;
    handle
        .status_receiver()
        .wait_for(|s| s.frames_received == 2)
        .await
        .unwrap();

    handle.seek(1).await.unwrap();
    wait_rendered(&handle, 1).await;
    assert_eq!(handle.status().sticky_target, None);

    // Frame 4 arriving later is stored, not rendered.
    feed(&link, &messages(5)[2..]).await;
    handle
        .status_receiver()
        .wait_for(|s| s.frames_received == 5)
        .await
        .unwrap();
    assert_eq!(handle.frames().borrow().as_ref().map(|f| f.index), Some(1));
}

// ── Generations & transport ──────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn reload_abandons_previous_connection() {
    let (handle, mut links) = start(StreamConfig::default());
    let old = links.recv().await.unwrap();

    handle.reload(0).await.unwrap();
    let new = links.recv().await.unwrap();

    old.tx.closed().await;
    feed(&new, &messages(1)).await;
    wait_rendered(&handle, 0).await;
    assert_eq!(handle.status().generation.get(), 2);
}

#[tokio::test(start_paused = true)]
async fn transport_loss_reconnects_with_display_index_as_target() {
    let config = StreamConfig {
        reconnect_backoff_ms: 2000,
        ..Default::default()
    };
    let (handle, mut links) = start(config);
    let link = links.recv().await.unwrap();
    feed(&link, &messages(4)).await;
    handle
        .status_receiver()
        .wait_for(|s| s.frames_received == 4)
        .await
        .unwrap();
    handle.seek(3).await.unwrap();
    wait_rendered(&handle, 3).await;
    let before = handle.status().generation;

    drop(link);
    let started = tokio::time::Instant::now();
    let link = links.recv().await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(2000));

    let status = handle.status();
    assert!(status.generation > before);
    assert_eq!(status.sticky_target, Some(3));
    assert_eq!(status.frames_received, 0);

    feed(&link, &messages(4)).await;
    let mut status = handle.status_receiver();
    let generation = status
        .wait_for(|s| s.shown_index == Some(3))
        .await
        .unwrap()
        .generation;
    assert_eq!(handle.status().sticky_target, None);
    assert_eq!(
        handle.frames().borrow().as_ref().map(|f| (f.generation, f.index)),
        Some((generation, 3))
    );
}

#[tokio::test(start_paused = true)]
async fn loss_without_frames_reports_idle() {
    let (handle, mut links) = start(StreamConfig::default());
    let link = links.recv().await.unwrap();
    drop(link);

    let mut status = handle.status_receiver();
    let phase = status
        .wait_for(|s| s.note == Some(StatusNote::Idle))
        .await
        .unwrap()
        .phase;
    assert_eq!(phase, StreamPhase::Reconnecting);
}

// ── Preload ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn preload_fills_every_frame() {
    let (handle, mut links) = start(StreamConfig::default());
    let link = links.recv().await.unwrap();
    feed(&link, &messages(10)).await;

    let mut status = handle.status_receiver();
    status
        .wait_for(|s| s.frames_received == 10 && s.preload.is_complete())
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn preload_disabled_leaves_frames_cold() {
    let config = StreamConfig {
        preload: false,
        ..Default::default()
    };
    let (handle, mut links) = start(config);
    let link = links.recv().await.unwrap();
    feed(&link, &messages(5)).await;

    let mut status = handle.status_receiver();
    status.wait_for(|s| s.frames_received == 5).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    // Only the rendered frame 0 was materialized.
    assert_eq!(handle.status().preload.materialized, 1);
}

// ── Stream file ──────────────────────────────────────────────────

#[tokio::test]
async fn plays_a_stream_file() {
    let dir = tempfile::tempdir().unwrap();
    let connector = ChunkFileConnector::new(dir.path()).with_poll_interval(Duration::from_millis(5));
    let path = connector.path_for(&address());
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();

    let file = tokio::fs::File::create(&path).await.unwrap();
    let mut writer = FramedWrite::new(file, ChunkCodec);
    for msg in messages(6) {
        writer.send(Chunk::from_wire(&msg).unwrap()).await.unwrap();
    }
    writer.flush().await.unwrap();

    let (handle, _task) =
        StreamController::spawn(StreamConfig::default(), Arc::new(connector), address()).unwrap();
    wait_rendered(&handle, 0).await;
    handle
        .status_receiver()
        .wait_for(|s| s.frames_received == 6)
        .await
        .unwrap();

    let frame = handle.frame(4).await.unwrap().unwrap();
    assert_eq!(frame.buffer.value(1), Some(4.5));
    handle.shutdown().await.unwrap();
}
