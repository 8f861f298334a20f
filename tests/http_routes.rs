//! HTTP surface over a real socket
//!
//! Run with: cargo test --test http_routes

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crabcctv::testing::{synthetic_frame, MemoryChunkSink};
use crabcctv::{serve, AppState, CctvError, FrameBus, Recorder, RecordingConfig, StatusReport};

struct TestServer {
    addr: SocketAddr,
    bus: FrameBus,
    recorder: Recorder,
    sink: MemoryChunkSink,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), CctvError>>,
}

async fn start_server() -> TestServer {
    let sink = MemoryChunkSink::new();
    let config = RecordingConfig::new(std::env::temp_dir(), 16, 16, 30.0);
    let recorder = Recorder::with_sink(config, Arc::new(sink.clone()));
    let bus = FrameBus::new(8, Some(recorder.clone()));
    let state = AppState::new(bus.clone(), recorder.clone(), 75);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    let shutdown_bus = bus.clone();
    let handle = tokio::spawn(serve(listener, state, async move {
        let _ = rx.await;
        shutdown_bus.close();
    }));

    TestServer {
        addr,
        bus,
        recorder,
        sink,
        shutdown: Some(tx),
        handle,
    }
}

/// Send one request and read the whole response
async fn get(addr: SocketAddr, path: &str) -> (u16, String, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n", path);
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut raw))
        .await
        .expect("response timed out")
        .unwrap();
    split_response(&raw)
}

fn split_response(raw: &[u8]) -> (u16, String, Vec<u8>) {
    let end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("no header terminator");
    let head = String::from_utf8_lossy(&raw[..end]).to_string();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("no status code");
    (status, head, raw[end + 4..].to_vec())
}

#[tokio::test]
async fn index_serves_viewer_page() {
    let server = start_server().await;
    let (status, head, body) = get(server.addr, "/").await;
    assert_eq!(status, 200);
    assert!(head.to_lowercase().contains("content-type: text/html"));
    assert!(String::from_utf8_lossy(&body).contains("/stream.mjpg"));
}

#[tokio::test]
async fn record_rejects_missing_or_unknown_action() {
    let server = start_server().await;

    let (status, _, body) = get(server.addr, "/record").await;
    assert_eq!(status, 400);
    assert!(String::from_utf8_lossy(&body).contains("Invalid action"));

    let (status, _, _) = get(server.addr, "/record?action=pause").await;
    assert_eq!(status, 400);
    assert!(!server.recorder.is_active());
}

#[tokio::test]
async fn record_start_and_stop() {
    let server = start_server().await;

    let (status, _, body) = get(server.addr, "/record?action=start").await;
    assert_eq!(status, 200);
    assert_eq!(String::from_utf8_lossy(&body), "Recording started");
    assert!(server.recorder.is_active());

    // starting twice is harmless
    let (status, _, _) = get(server.addr, "/record?action=start").await;
    assert_eq!(status, 200);

    for seq in 1..=5 {
        assert!(server
            .bus
            .publish(synthetic_frame(seq, Duration::from_millis(seq * 33), 16, 16))
            .recorded);
    }

    let (status, _, body) = get(server.addr, "/record?action=stop").await;
    assert_eq!(status, 200);
    assert!(String::from_utf8_lossy(&body).starts_with("Recording stopped"));
    assert!(!server.recorder.is_active());

    let chunks = server.sink.chunks();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].sequences(), vec![1, 2, 3, 4, 5]);
    assert_eq!(server.sink.open_writers(), 0);
}

#[tokio::test]
async fn status_reports_recorder_and_viewers() {
    let server = start_server().await;
    server.bus.publish(synthetic_frame(1, Duration::ZERO, 16, 16));

    let (status, head, body) = get(server.addr, "/status").await;
    assert_eq!(status, 200);
    assert!(head.to_lowercase().contains("application/json"));

    let report: StatusReport = serde_json::from_slice(&body).unwrap();
    assert!(!report.recorder.active);
    assert_eq!(report.subscribers, 0);
    assert_eq!(report.frames_captured, 1);
    assert!(!report.capture_running);
}

#[tokio::test]
async fn stream_sends_multipart_jpeg_parts() {
    let server = start_server().await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET /stream.mjpg HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    // keep frames coming until the viewer has registered and read some
    let bus = server.bus.clone();
    let publisher = tokio::spawn(async move {
        for seq in 1..=200u64 {
            bus.publish(synthetic_frame(seq, Duration::from_millis(seq * 33), 32, 24));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let mut raw = Vec::new();
    let mut buf = [0u8; 8192];
    let read_parts = async {
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "stream closed early");
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw);
            if text.matches("--frame\r\n").count() >= 2 {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), read_parts)
        .await
        .expect("no MJPEG parts arrived");

    let (status, head, body) = split_response(&raw);
    let head = head.to_lowercase();
    assert_eq!(status, 200);
    assert!(head.contains("content-type: multipart/x-mixed-replace; boundary=frame"));
    assert!(head.contains("cache-control: no-store, must-revalidate"));

    let body = String::from_utf8_lossy(&body);
    assert!(body.contains("Content-Type: image/jpeg\r\nContent-Length: "));
    assert_eq!(server.bus.subscriber_count(), 1);

    // hanging up unregisters the viewer
    drop(stream);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while server.bus.subscriber_count() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.bus.subscriber_count(), 0);
    publisher.abort();
}

#[tokio::test]
async fn shutdown_finishes_with_open_stream() {
    let mut server = start_server().await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET /stream.mjpg HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while server.bus.subscriber_count() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.bus.subscriber_count(), 1);

    if let Some(tx) = server.shutdown.take() {
        let _ = tx.send(());
    }
    let result = tokio::time::timeout(Duration::from_secs(5), &mut server.handle)
        .await
        .expect("server did not shut down");
    assert!(result.unwrap().is_ok());
}
