use anyhow::Result;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ppe_sentinel::api::{ApiConfig, ApiHandle, ApiServer};
use ppe_sentinel::detect::ScriptedBackend;
use ppe_sentinel::{
    Annotator, BoundingBox, CaptureSettings, DefaultOpener, EngineConfig, FramePipeline,
    ModelLoader, MotorProxy, MotorSettings, RawDetection, SessionManager, StreamSettings,
};

const STUB_URL: &str = "stub://dock?width=64&height=48&fps=60";

struct TestApi {
    session: Arc<SessionManager>,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new() -> Result<Self> {
        let backend = ScriptedBackend::new(vec![
            RawDetection::new("person", 0.9, BoundingBox::new(2, 2, 40, 46)),
            RawDetection::new("api", 0.5, BoundingBox::new(44, 4, 60, 20)),
        ]);
        let session = Arc::new(SessionManager::new(
            Arc::new(DefaultOpener::default()),
            ModelLoader::from_backend(backend),
            FramePipeline::new(EngineConfig::default(), Annotator::new()),
            CaptureSettings {
                open_settle_ms: 0,
                ..CaptureSettings::default()
            },
        ));
        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            stream: StreamSettings {
                placeholder_width: 160,
                placeholder_height: 120,
                ..StreamSettings::default()
            },
        };
        let motor = MotorProxy::new(MotorSettings {
            move_timeout_ms: 300,
            health_timeout_ms: 300,
            ..MotorSettings::default()
        });
        let api_handle = ApiServer::new(api_config, session.clone(), motor).spawn()?;
        Ok(Self {
            session,
            api_handle: Some(api_handle),
        })
    }

    fn handle(&self) -> &ApiHandle {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
    }

    fn request(&self, method: &str, path: &str, body: Option<&str>) -> Result<(String, String)> {
        let mut stream = TcpStream::connect(self.handle().addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(10)))?;
        let body = body.unwrap_or("");
        let request = format!(
            "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {len}\r\n\r\n{body}",
            len = body.len()
        );
        stream.write_all(request.as_bytes())?;
        read_response(&mut stream)
    }

    fn json(&self, method: &str, path: &str, body: Option<&str>) -> Result<(String, Value)> {
        let (headers, body) = self.request(method, path, body)?;
        Ok((headers, serde_json::from_str(&body)?))
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
        self.session.disconnect();
    }
}

fn read_response(stream: &mut TcpStream) -> Result<(String, String)> {
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    Ok((headers, body))
}

/// Fake motor controller answering every request with `status`; returns
/// the request lines it saw.
fn fake_controller(status: u16, requests: usize) -> (String, std::thread::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let handle = std::thread::spawn(move || {
        let mut seen = Vec::new();
        for _ in 0..requests {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let n = stream.read(&mut buf).unwrap_or(0);
            let text = String::from_utf8_lossy(&buf[..n]).to_string();
            seen.push(text.lines().next().unwrap_or("").to_string());
            let _ = write!(
                stream,
                "HTTP/1.1 {} X\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
                status
            );
        }
        seen
    });
    (addr, handle)
}

fn wait_for_detections(api: &TestApi) -> Result<Value> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let (_, value) = api.json("GET", "/detections", None)?;
        if value["count"] == 2 || Instant::now() > deadline {
            return Ok(value);
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn health_and_status_report_idle_session() -> Result<()> {
    let api = TestApi::new()?;

    let (headers, health) = api.json("GET", "/health", None)?;
    assert!(headers.contains("200 OK"));
    assert!(headers.contains("Access-Control-Allow-Origin: *"));
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connected"], false);
    assert!(health["stream_url"].is_null());

    let (_, status) = api.json("GET", "/status", None)?;
    assert_eq!(status["state"], "IDLE");
    assert_eq!(status["running"], false);
    assert_eq!(status["has_frame"], false);
    assert_eq!(status["model_loaded"], false);

    let (_, detections) = api.json("GET", "/detections", None)?;
    assert_eq!(detections["count"], 0);
    assert_eq!(detections["connected"], false);
    assert!(detections["timestamp"].as_f64().unwrap() > 0.0);

    Ok(())
}

#[test]
fn connect_publishes_detections_and_disconnect_clears_them() -> Result<()> {
    let api = TestApi::new()?;

    let body = format!(r#"{{"stream_url": "{}", "pi_ip": "10.1.1.9"}}"#, STUB_URL);
    let (headers, value) = api.json("POST", "/connect", Some(&body))?;
    assert!(headers.contains("200 OK"), "{}", headers);
    assert_eq!(value["status"], "connected");

    let detections = wait_for_detections(&api)?;
    assert_eq!(detections["count"], 2);
    assert_eq!(detections["connected"], true);
    let person = &detections["detections"][0];
    assert_eq!(person["displayName"], "PERSON");
    assert_eq!(person["safetyTier"], "UNSAFE");
    assert_eq!(person["box"], serde_json::json!([2, 2, 40, 46]));
    let fire = &detections["detections"][1];
    assert_eq!(fire["displayName"], "FIRE");
    assert_eq!(fire["rawLabel"], "api");
    assert_eq!(fire["category"], "HAZARD");

    let (_, status) = api.json("GET", "/status", None)?;
    assert_eq!(status["state"], "RUNNING");
    assert_eq!(status["pi_ip"], "10.1.1.9");
    assert_eq!(status["has_frame"], true);
    assert_eq!(status["model_loaded"], true);
    assert!(status["frame_count"].as_u64().unwrap() >= 1);

    let (_, value) = api.json("GET", "/disconnect", None)?;
    assert_eq!(value["status"], "disconnected");
    let (_, value) = api.json("POST", "/disconnect", None)?;
    assert_eq!(value["status"], "disconnected");

    let (_, detections) = api.json("GET", "/detections", None)?;
    assert_eq!(detections["count"], 0);
    assert_eq!(detections["connected"], false);

    Ok(())
}

#[test]
fn connect_failure_returns_500_with_message() -> Result<()> {
    let api = TestApi::new()?;

    let (headers, value) = api.json(
        "POST",
        "/connect",
        Some(r#"{"stream_url": "stub://dock?fail_after=0", "pi_ip": "10.1.1.9"}"#),
    )?;
    assert!(headers.contains("500 Internal Server Error"));
    assert_eq!(value["status"], "error");
    assert!(value["message"].as_str().unwrap().contains("cannot read frames"));

    let (_, health) = api.json("GET", "/health", None)?;
    assert_eq!(health["connected"], false);
    assert!(health["last_error"].is_string());

    let (headers, _) = api.json("POST", "/connect", Some("{not json"))?;
    assert!(headers.contains("400 Bad Request"));

    Ok(())
}

#[test]
fn video_streams_multipart_jpeg_frames() -> Result<()> {
    let api = TestApi::new()?;

    let mut stream = TcpStream::connect(api.handle().addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    stream.write_all(b"GET /video HTTP/1.1\r\nHost: localhost\r\n\r\n")?;

    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    let jpeg = loop {
        let n = stream.read(&mut buf)?;
        assert!(n > 0, "stream closed early");
        data.extend_from_slice(&buf[..n]);
        if let Some(start) = data.windows(2).position(|w| w == [0xFF, 0xD8]) {
            if let Some(len) = data[start + 2..].windows(2).position(|w| w == [0xFF, 0xD9]) {
                break data[start..start + 2 + len + 2].to_vec();
            }
        }
    };
    let head = String::from_utf8_lossy(&data[..64.min(data.len())]).to_string();
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    let text = String::from_utf8_lossy(&data).to_string();
    assert!(text.contains("multipart/x-mixed-replace; boundary=frame"));
    assert!(text.contains("--frame\r\nContent-Type: image/jpeg"));

    // Nothing published yet: the placeholder is served.
    let placeholder = image::load_from_memory(&jpeg)?;
    assert_eq!((placeholder.width(), placeholder.height()), (160, 120));

    Ok(())
}

#[test]
fn move_requires_a_controller_and_a_valid_direction() -> Result<()> {
    let api = TestApi::new()?;

    let (headers, value) = api.json("POST", "/move/forward", None)?;
    assert!(headers.contains("400 Bad Request"));
    assert_eq!(value["message"], "Not connected to Pi");

    let (headers, _) = api.json("GET", "/pi/test", None)?;
    assert!(headers.contains("400 Bad Request"));

    let (controller, server) = fake_controller(200, 2);
    api.session.connect(STUB_URL, &controller)?;

    let (headers, value) = api.json("POST", "/move/sideways", None)?;
    assert!(headers.contains("400 Bad Request"));
    assert_eq!(value["message"], "Invalid direction: sideways");

    let (headers, value) = api.json("POST", "/move/left", None)?;
    assert!(headers.contains("200 OK"), "{}", headers);
    assert_eq!(value["direction"], "left");

    let (headers, value) = api.json("GET", "/pi/test", None)?;
    assert!(headers.contains("200 OK"));
    assert_eq!(value["pi_ip"], controller.as_str());

    let seen = server.join().unwrap();
    assert_eq!(seen[0], "GET /move/left HTTP/1.1");
    assert_eq!(seen[1], "GET /health HTTP/1.1");

    Ok(())
}

#[test]
fn controller_errors_are_passed_through() -> Result<()> {
    let api = TestApi::new()?;
    let (controller, server) = fake_controller(503, 1);
    api.session.connect(STUB_URL, &controller)?;

    let (headers, value) = api.json("POST", "/move/stop", None)?;
    assert!(headers.contains("503 Service Unavailable"));
    assert_eq!(value["status"], "error");
    server.join().unwrap();

    // Nothing listening: transport error.
    let closed = TcpListener::bind("127.0.0.1:0")?.local_addr()?.to_string();
    api.session.connect(STUB_URL, &closed)?;
    let (headers, _) = api.json("POST", "/move/stop", None)?;
    assert!(headers.contains("500 Internal Server Error"));

    Ok(())
}

#[test]
fn preflight_and_unknown_routes() -> Result<()> {
    let api = TestApi::new()?;

    let (headers, body) = api.request("OPTIONS", "/connect", None)?;
    assert!(headers.contains("204 No Content"));
    assert!(headers.contains("Access-Control-Allow-Methods: GET, POST, OPTIONS"));
    assert!(body.is_empty());

    let (headers, _) = api.request("GET", "/nowhere", None)?;
    assert!(headers.contains("404 Not Found"));

    let (headers, _) = api.request("DELETE", "/status", None)?;
    assert!(headers.contains("405 Method Not Allowed"));

    let (headers, _) = api.request("GET", "/move/left", None)?;
    assert!(headers.contains("405 Method Not Allowed"));

    Ok(())
}
