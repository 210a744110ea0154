//! HTTP surface: lifecycle routes, the detection feed and the annotated MJPEG stream.
//!
//! One accept loop on a nonblocking std `TcpListener`; every connection gets
//! its own thread so a long-lived `/video` client never blocks the JSON
//! routes. Handlers only read the session's published state.

mod http;

use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::Deserialize;
use serde_json::json;
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::StreamSettings;
use crate::frame::FrameResult;
use crate::session::{SessionManager, SessionState};
use crate::transport::MotorProxy;

use http::{write_json, write_no_content, HttpRequest, CORS_HEADERS};

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub stream: StreamSettings,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8000".to_string(),
            stream: StreamSettings::default(),
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
    /// Stop accepting connections and end open `/video` streams.
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
    session: Arc<SessionManager>,
    motor: MotorProxy,
}

struct ApiState {
    session: Arc<SessionManager>,
    motor: MotorProxy,
    stream: StreamSettings,
    shutdown: Arc<AtomicBool>,
}

#[derive(Debug, Deserialize)]
struct ConnectRequest {
    stream_url: String,
    pi_ip: String,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, session: Arc<SessionManager>, motor: MotorProxy) -> Self {
        Self {
            cfg,
            session,
            motor,
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        log::info!("sentinel api listening on {}", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let state = Arc::new(ApiState {
            session: self.session,
            motor: self.motor,
            stream: self.cfg.stream,
            shutdown: shutdown.clone(),
        });
        let join = std::thread::Builder::new()
            .name("api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, state) {
                    log::error!("sentinel api stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, state: Arc<ApiState>) -> Result<()> {
    loop {
        if state.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let state = state.clone();
                let spawned = std::thread::Builder::new()
                    .name("api-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &state) {
                            log::warn!("request from {} rejected: {:#}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("failed to spawn connection thread: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    log::info!("sentinel api shut down");
    Ok(())
}

fn handle_connection(mut stream: TcpStream, state: &ApiState) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = http::read_request(&mut stream)?;
    log::debug!("{} {}", request.method, request.path);

    if request.method == "OPTIONS" {
        return write_no_content(&mut stream);
    }

    let segments: Vec<&str> = request
        .path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["health"]) => health(&mut stream, state),
        ("POST", ["connect"]) => connect(&mut stream, state, &request),
        ("GET" | "POST", ["disconnect"]) => {
            state.session.disconnect();
            write_json(&mut stream, 200, &json!({"status": "disconnected"}))
        }
        ("GET", ["detections"]) => detections(&mut stream, state),
        ("GET", ["video"]) => video(stream, state),
        ("GET", ["status"]) => status(&mut stream, state),
        ("POST", ["move", direction]) => move_motor(&mut stream, state, direction),
        ("GET", ["pi", "test"]) => pi_test(&mut stream, state),
        (_, ["health" | "connect" | "disconnect" | "detections" | "video" | "status"])
        | (_, ["move", _])
        | (_, ["pi", "test"]) => write_json(
            &mut stream,
            405,
            &json!({"status": "error", "message": "method not allowed"}),
        ),
        _ => write_json(
            &mut stream,
            404,
            &json!({"status": "error", "message": "not found"}),
        ),
    }
}

fn health(stream: &mut TcpStream, state: &ApiState) -> Result<()> {
    let status = state.session.status();
    write_json(
        stream,
        200,
        &json!({
            "status": "ok",
            "connected": status.is_running,
            "stream_url": status.source_url,
            "pi_ip": status.controller_address,
            "frame_count": status.frame_count,
            "last_error": status.last_error,
        }),
    )
}

fn connect(stream: &mut TcpStream, state: &ApiState, request: &HttpRequest) -> Result<()> {
    let body: ConnectRequest = match serde_json::from_slice(&request.body) {
        Ok(body) => body,
        Err(err) => {
            return write_json(
                stream,
                400,
                &json!({"status": "error", "message": format!("invalid connect request: {}", err)}),
            );
        }
    };
    match state.session.connect(&body.stream_url, &body.pi_ip) {
        Ok(()) => write_json(
            stream,
            200,
            &json!({"status": "connected", "message": "Successfully connected to stream"}),
        ),
        Err(err) => write_json(
            stream,
            500,
            &json!({"status": "error", "message": err.to_string()}),
        ),
    }
}

fn detections(stream: &mut TcpStream, state: &ApiState) -> Result<()> {
    let detections = state.session.latest_detections();
    let connected = state.session.status().is_running;
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    write_json(
        stream,
        200,
        &json!({
            "timestamp": timestamp,
            "count": detections.len(),
            "detections": detections,
            "connected": connected,
        }),
    )
}

fn status(stream: &mut TcpStream, state: &ApiState) -> Result<()> {
    let status = state.session.status();
    write_json(
        stream,
        200,
        &json!({
            "state": status.state,
            "running": status.state == SessionState::Running,
            "stream_url": status.source_url,
            "pi_ip": status.controller_address,
            "frame_count": status.frame_count,
            "has_frame": status.has_frame,
            "detection_count": status.detection_count,
            "last_error": status.last_error,
            "model_loaded": status.model_loaded,
        }),
    )
}

fn move_motor(stream: &mut TcpStream, state: &ApiState, direction: &str) -> Result<()> {
    let controller = state.session.controller_address();
    match state.motor.move_motor(controller.as_deref(), direction) {
        Ok(direction) => write_json(
            stream,
            200,
            &json!({"status": "ok", "direction": direction.as_str()}),
        ),
        Err(err) => {
            log::warn!("motor command '{}' failed: {}", direction, err);
            write_json(
                stream,
                err.status_code(),
                &json!({"status": "error", "message": err.to_string()}),
            )
        }
    }
}

fn pi_test(stream: &mut TcpStream, state: &ApiState) -> Result<()> {
    let controller = state.session.controller_address();
    match state.motor.test_connection(controller.as_deref()) {
        Ok(()) => write_json(stream, 200, &json!({"status": "ok", "pi_ip": controller})),
        Err(err) => write_json(
            stream,
            err.status_code(),
            &json!({"status": "error", "message": err.to_string()}),
        ),
    }
}

// ----------------------------------------------------------------------------
// MJPEG output
// ----------------------------------------------------------------------------

/// Encoded form of whatever was last sent, so an unchanged frame is not
/// re-encoded every tick.
enum LastSent {
    Nothing,
    Frame(Arc<FrameResult>, Vec<u8>),
    Placeholder(Option<String>, Vec<u8>),
}

fn video(mut stream: TcpStream, state: &ApiState) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=frame\r\nCache-Control: no-cache\r\nConnection: close\r\n{}\r\n",
        CORS_HEADERS
    );
    stream.write_all(header.as_bytes())?;

    let interval = Duration::from_millis(state.stream.frame_interval_ms);
    let mut last = LastSent::Nothing;
    let mut parts_sent = 0u64;
    while !state.shutdown.load(Ordering::SeqCst) {
        last = next_part(state, last)?;
        let jpeg = match &last {
            LastSent::Frame(_, jpeg) | LastSent::Placeholder(_, jpeg) => jpeg,
            LastSent::Nothing => break,
        };
        if let Err(err) = write_part(&mut stream, jpeg) {
            log::debug!("video client went away after {} parts: {}", parts_sent, err);
            return Ok(());
        }
        parts_sent += 1;
        std::thread::sleep(interval);
    }
    Ok(())
}

fn next_part(state: &ApiState, last: LastSent) -> Result<LastSent> {
    match state.session.latest_frame() {
        Some(frame) => {
            if let LastSent::Frame(prev, _) = &last {
                if Arc::ptr_eq(prev, &frame) {
                    return Ok(last);
                }
            }
            let jpeg = encode_jpeg(&frame.image, state.stream.jpeg_quality)?;
            Ok(LastSent::Frame(frame, jpeg))
        }
        None => {
            let last_error = state.session.last_error();
            if let LastSent::Placeholder(prev, _) = &last {
                if *prev == last_error {
                    return Ok(last);
                }
            }
            let image = state.session.pipeline().annotator().placeholder(
                state.stream.placeholder_width,
                state.stream.placeholder_height,
                last_error.as_deref(),
            );
            let jpeg = encode_jpeg(&image, state.stream.jpeg_quality)?;
            Ok(LastSent::Placeholder(last_error, jpeg))
        }
    }
}

fn write_part(stream: &mut TcpStream, jpeg: &[u8]) -> std::io::Result<()> {
    let header = format!(
        "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(jpeg)?;
    stream.write_all(b"\r\n")?;
    stream.flush()
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(image)?;
    Ok(out)
}
