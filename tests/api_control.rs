use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use nearsight::api::{ApiConfig, ApiHandle, ApiServer};
use nearsight::{
    BoundingBox, Detector, DetectorResources, LogVoice, RawDetection, ScriptedDetector,
    SessionController, SessionOptions, SessionParts, SessionState, SyntheticConfig,
    SyntheticSource, Termination,
};

struct Harness {
    dir: TempDir,
    controller: SessionController,
    api: ApiHandle,
}

fn harness() -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let resources = DetectorResources {
        config_path: dir.path().join("yolov3.cfg"),
        weights_path: dir.path().join("yolov3.weights"),
        classes_path: dir.path().join("coco.names"),
    };
    fs::write(&resources.config_path, "[net]\n").unwrap();
    fs::write(&resources.weights_path, b"weights").unwrap();
    fs::write(&resources.classes_path, "person\nbicycle\ncar\n").unwrap();

    let factory = |_: &DetectorResources| -> anyhow::Result<Box<dyn Detector>> {
        Ok(Box::new(ScriptedDetector::repeating(vec![RawDetection::new(
            2,
            0.8,
            BoundingBox::new(10, 10, 20, 100),
        )])))
    };
    let source = SyntheticSource::new(SyntheticConfig {
        width: 64,
        height: 48,
        target_fps: 50,
        ..SyntheticConfig::default()
    });
    let controller = SessionController::new(
        SessionParts {
            source: Arc::new(source),
            detector: Arc::new(factory),
            resources,
            voice: Box::new(LogVoice),
        },
        SessionOptions::default(),
    )
    .expect("controller");

    let api = ApiServer::new(
        ApiConfig {
            addr: "127.0.0.1:0".to_string(),
        },
        controller.clone(),
    )
    .spawn()
    .expect("spawn api");

    Harness {
        dir,
        controller,
        api,
    }
}

fn request(addr: SocketAddr, method: &str, path: &str) -> (u16, serde_json::Value) {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    write!(stream, "{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).expect("read response");
    let text = String::from_utf8(raw).expect("utf8 response");
    let (head, body) = text.split_once("\r\n\r\n").expect("header terminator");
    let status: u16 = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status code");
    let body = serde_json::from_str(body).unwrap_or(serde_json::Value::Null);
    (status, body)
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    cond()
}

#[test]
fn control_commands_round_trip() {
    let h = harness();
    let addr = h.api.addr;

    let (status, body) = request(addr, "GET", "/health");
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");

    let (status, body) = request(addr, "POST", "/start");
    assert_eq!(status, 200);
    assert_eq!(body["state"], "running");

    let (status, body) = request(addr, "POST", "/start");
    assert_eq!(status, 409);
    assert_eq!(body["state"], "running");
    assert_eq!(body["error"], "already_running");

    let (status, body) = request(addr, "POST", "/toggle_voice");
    assert_eq!(status, 200);
    assert_eq!(body["voice_enabled"], false);

    let (status, body) = request(addr, "GET", "/status");
    assert_eq!(status, 200);
    assert_eq!(body["state"], "running");
    assert_eq!(body["voice_enabled"], false);

    let (status, body) = request(addr, "POST", "/stop");
    assert_eq!(status, 200);
    assert_eq!(body["state"], "stopped");

    let (status, body) = request(addr, "POST", "/stop");
    assert_eq!(status, 200);
    assert_eq!(body["state"], "stopped");

    let (_, body) = request(addr, "GET", "/status");
    assert_eq!(body["last_termination"]["reason"], "stop_requested");

    h.api.stop().unwrap();
}

#[test]
fn start_reports_missing_resources() {
    let h = harness();
    fs::remove_file(h.dir.path().join("coco.names")).unwrap();

    let (status, body) = request(h.api.addr, "POST", "/start");
    assert_eq!(status, 503);
    assert_eq!(body["state"], "idle");
    assert_eq!(body["error"], "resource_missing");
    assert!(body["detail"].as_str().unwrap().contains("class names"));
    assert_eq!(h.controller.state(), SessionState::Idle);

    h.api.stop().unwrap();
}

#[test]
fn video_feed_requires_running_session() {
    let h = harness();

    let (status, body) = request(h.api.addr, "GET", "/video_feed");
    assert_eq!(status, 409);
    assert_eq!(body["error"], "stream_unavailable");
    assert_eq!(body["state"], "idle");

    h.api.stop().unwrap();
}

#[test]
fn video_feed_streams_multipart_frames() {
    let h = harness();
    let addr = h.api.addr;
    assert_eq!(request(addr, "POST", "/start").0, 200);

    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    write!(stream, "GET /video_feed HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();

    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    let marker = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    while received
        .windows(marker.len())
        .filter(|w| *w == marker)
        .count()
        < 2
    {
        let n = stream.read(&mut buf).expect("read stream");
        assert!(n > 0, "stream closed early");
        received.extend_from_slice(&buf[..n]);
    }
    let head = String::from_utf8_lossy(&received[..64]).to_string();
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(String::from_utf8_lossy(&received)
        .contains("Content-Type: multipart/x-mixed-replace; boundary=frame"));

    // Only one stream per session.
    let (status, body) = request(addr, "GET", "/video_feed");
    assert_eq!(status, 409);
    assert_eq!(body["error"], "stream_unavailable");

    // Control stays responsive while streaming.
    assert_eq!(request(addr, "GET", "/status").1["state"], "running");

    drop(stream);
    assert!(wait_until(|| h.controller.state() == SessionState::Stopped));
    assert_eq!(
        h.controller.status().last_termination,
        Some(Termination::ClientDisconnected)
    );

    h.api.stop().unwrap();
}

#[test]
fn rejects_unknown_paths_and_methods() {
    let h = harness();

    assert_eq!(request(h.api.addr, "GET", "/admin").0, 404);
    let (status, body) = request(h.api.addr, "DELETE", "/stop");
    assert_eq!(status, 405);
    assert_eq!(body["error"], "method_not_allowed");

    h.api.stop().unwrap();
}
