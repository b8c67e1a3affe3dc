//! HTTP control surface.
//!
//! A small blocking HTTP/1.1 server on a std thread. Control commands are
//! answered inline on the accept loop; `/video_feed` connections get their own
//! thread so a streaming client never blocks control requests.
//!
//! | Path            | Result                                           |
//! |-----------------|--------------------------------------------------|
//! | `/start`        | 200 running, 409 already_running, 503 missing    |
//! | `/stop`         | 200 with the resulting state                     |
//! | `/toggle_voice` | 200 with the new voice flag                      |
//! | `/status`       | 200 with `SessionStatus`                         |
//! | `/health`       | 200                                              |
//! | `/video_feed`   | 200 multipart MJPEG, 409 stream_unavailable      |

use anyhow::{anyhow, Result};
use serde_json::json;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::SessionError;
use crate::session::{SessionController, SessionState};
use crate::stream::{FrameStream, CONTENT_TYPE};

const MAX_REQUEST_BYTES: usize = 8192;
const STREAM_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8800".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    controller: SessionController,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, controller: SessionController) -> Self {
        Self { cfg, controller }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let controller = self.controller;
        let join = std::thread::Builder::new()
            .name("nearsight-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, controller, shutdown_thread) {
                    log::error!("control api stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    controller: SessionController,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &controller) {
                    log::warn!("control api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, controller: &SessionController) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, &json!({"error": "forbidden"}))?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    if request.method != "GET" && request.method != "POST" {
        write_json_response(&mut stream, 405, &json!({"error": "method_not_allowed"}))?;
        return Ok(());
    }
    log::debug!("{} {} from {}", request.method, request.path, peer);

    match request.path.as_str() {
        "/health" => write_json_response(&mut stream, 200, &json!({"status": "ok"})),
        "/start" => {
            let (status, body) = match controller.start() {
                Ok(state) => (200, json!({ "state": state })),
                Err(err) => start_error(controller.state(), &err),
            };
            write_json_response(&mut stream, status, &body)
        }
        "/stop" => {
            let state = controller.stop();
            write_json_response(&mut stream, 200, &json!({ "state": state }))
        }
        "/toggle_voice" => {
            let enabled = controller.toggle_voice();
            write_json_response(&mut stream, 200, &json!({ "voice_enabled": enabled }))
        }
        "/status" => {
            let body = serde_json::to_value(controller.status())?;
            write_json_response(&mut stream, 200, &body)
        }
        "/video_feed" => match controller.stream() {
            Ok(frames) => spawn_stream_writer(stream, frames),
            Err(err) => write_json_response(
                &mut stream,
                409,
                &json!({ "error": err.code(), "state": controller.state() }),
            ),
        },
        _ => write_json_response(&mut stream, 404, &json!({"error": "not_found"})),
    }
}

fn start_error(state: SessionState, err: &SessionError) -> (u16, serde_json::Value) {
    let status = match err {
        SessionError::AlreadyRunning => 409,
        SessionError::ResourceMissing { .. } | SessionError::DeviceUnavailable { .. } => 503,
        _ => 500,
    };
    let body = match err {
        SessionError::AlreadyRunning => json!({ "state": state, "error": err.code() }),
        _ => json!({ "state": state, "error": err.code(), "detail": err.to_string() }),
    };
    (status, body)
}

fn spawn_stream_writer(stream: TcpStream, frames: FrameStream) -> Result<()> {
    std::thread::Builder::new()
        .name("nearsight-stream".to_string())
        .spawn(move || {
            if let Err(err) = write_stream(stream, frames) {
                log::info!("stream client went away: {}", err);
            }
        })?;
    Ok(())
}

/// Dropping `frames` on any write error tells the session its client is gone.
fn write_stream(mut stream: TcpStream, frames: FrameStream) -> Result<()> {
    stream.set_write_timeout(Some(STREAM_WRITE_TIMEOUT))?;
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        CONTENT_TYPE
    );
    stream.write_all(header.as_bytes())?;
    for chunk in frames {
        stream.write_all(&chunk)?;
        stream.flush()?;
    }
    Ok(())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}
