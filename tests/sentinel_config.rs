use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use ppe_sentinel::config::SentinelConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SENTINEL_CONFIG",
        "SENTINEL_API_ADDR",
        "SENTINEL_STREAM_URL",
        "SENTINEL_CONTROLLER",
        "SENTINEL_MODEL_PATH",
        "SENTINEL_FONT_PATH",
        "SENTINEL_AUTOCONNECT",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "api": { "addr": "127.0.0.1:9100" },
        "stream_url": "http://10.0.0.5:8080/stream",
        "controller": "10.0.0.6",
        "engine": {
            "class_thresholds": { "Person": 0.6, "hardhat": 0.4 },
            "overlap_threshold": 0.1
        },
        "capture": { "max_consecutive_failures": 12 },
        "stream": { "jpeg_quality": 70 },
        "model": { "input_size": 320 },
        "motor": { "move_timeout_ms": 500 }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SENTINEL_CONFIG", file.path());
    std::env::set_var("SENTINEL_CONTROLLER", "pi.local:5001");
    std::env::set_var("SENTINEL_FONT_PATH", "/opt/fonts/label.ttf");

    let cfg = SentinelConfig::load().expect("load config");

    assert_eq!(cfg.api_addr, "127.0.0.1:9100");
    assert_eq!(cfg.stream_url.as_deref(), Some("http://10.0.0.5:8080/stream"));
    assert_eq!(cfg.controller.as_deref(), Some("pi.local:5001"));
    assert_eq!(cfg.font_path, Some(PathBuf::from("/opt/fonts/label.ttf")));
    assert_eq!(cfg.engine.threshold_for("person"), 0.6);
    assert_eq!(cfg.engine.threshold_for("hardhat"), 0.4);
    assert_eq!(cfg.engine.threshold_for("crack"), cfg.engine.default_threshold);
    assert_eq!(cfg.engine.overlap_threshold, 0.1);
    assert_eq!(cfg.engine.box_expansion_margin, 5);
    assert_eq!(cfg.capture.max_consecutive_failures, 12);
    assert_eq!(cfg.capture.stop_timeout_ms, 2_000);
    assert_eq!(cfg.stream.jpeg_quality, 70);
    assert_eq!(cfg.stream.frame_interval_ms, 30);
    assert_eq!(cfg.model.input_size, 320);
    assert_eq!(cfg.model.class_names[10], "api");
    assert_eq!(cfg.motor.move_timeout_ms, 500);
    assert_eq!(cfg.motor.default_port, 5000);
    assert!(!cfg.autoconnect);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
stream_url = "stub://yard?width=64&height=48"
autoconnect = true

[api]
addr = "127.0.0.1:0"

[engine]
ppe_classes = ["hardhat", "safety_vest"]
safe_overlaps = 1
fully_protected_overlaps = 2
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("SENTINEL_CONFIG", file.path());

    let cfg = SentinelConfig::load().expect("load config");
    assert!(cfg.autoconnect);
    assert_eq!(cfg.api_addr, "127.0.0.1:0");
    assert!(cfg.engine.is_ppe("safety_vest"));
    assert!(!cfg.engine.is_ppe("safety_boots"));
    assert_eq!(cfg.engine.safe_overlaps, 1);

    clear_env();
}

#[test]
fn rejects_invalid_engine_and_env_values() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{ "engine": { "safe_overlaps": 6, "fully_protected_overlaps": 5 } }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    std::env::set_var("SENTINEL_CONFIG", file.path());
    assert!(SentinelConfig::load().is_err());

    std::env::remove_var("SENTINEL_CONFIG");
    std::env::set_var("SENTINEL_AUTOCONNECT", "sometimes");
    assert!(SentinelConfig::load().is_err());

    std::env::set_var("SENTINEL_AUTOCONNECT", "false");
    std::env::set_var("SENTINEL_API_ADDR", "not-an-addr");
    assert!(SentinelConfig::load().is_err());

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("SENTINEL_CONFIG", "/nonexistent/sentinel.json");
    let err = SentinelConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
    let cfg = SentinelConfig::load().expect("defaults");
    assert_eq!(cfg.api_addr, "0.0.0.0:8000");
}
