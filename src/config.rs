use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::classify::EngineConfig;
use crate::ingest::MjpegConfig;
use crate::session::CaptureSettings;
use crate::transport::MotorSettings;

const DEFAULT_API_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_MODEL_INPUT_SIZE: u32 = 640;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_FRAME_INTERVAL_MS: u64 = 30;
const DEFAULT_PLACEHOLDER_WIDTH: u32 = 640;
const DEFAULT_PLACEHOLDER_HEIGHT: u32 = 480;

/// Class order of the bundled PPE/hazard model.
const DEFAULT_CLASS_NAMES: &[&str] = &[
    "person",
    "hardhat",
    "safety_boots",
    "safety_gloves",
    "safety_mask",
    "safety_vest",
    "gas",
    "leak",
    "crack",
    "damage",
    "api",
    "asap",
];

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    api: Option<ApiConfigFile>,
    stream_url: Option<String>,
    controller: Option<String>,
    autoconnect: Option<bool>,
    font_path: Option<PathBuf>,
    engine: Option<EngineConfig>,
    capture: Option<CaptureSettings>,
    mjpeg: Option<MjpegConfig>,
    stream: Option<StreamConfigFile>,
    model: Option<ModelConfigFile>,
    motor: Option<MotorSettings>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    jpeg_quality: Option<u8>,
    frame_interval_ms: Option<u64>,
    placeholder_width: Option<u32>,
    placeholder_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    input_size: Option<u32>,
    class_names: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub api_addr: String,
    /// Stream opened at startup when `autoconnect` is set.
    pub stream_url: Option<String>,
    pub controller: Option<String>,
    pub autoconnect: bool,
    pub font_path: Option<PathBuf>,
    pub engine: EngineConfig,
    pub capture: CaptureSettings,
    pub mjpeg: MjpegConfig,
    pub stream: StreamSettings,
    pub model: ModelSettings,
    pub motor: MotorSettings,
}

/// Output side of `/video`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    pub jpeg_quality: u8,
    pub frame_interval_ms: u64,
    pub placeholder_width: u32,
    pub placeholder_height: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
            placeholder_width: DEFAULT_PLACEHOLDER_WIDTH,
            placeholder_height: DEFAULT_PLACEHOLDER_HEIGHT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSettings {
    /// ONNX model file. `None` runs without a detector.
    pub path: Option<PathBuf>,
    pub input_size: u32,
    /// Class names indexed by the model's output channel.
    pub class_names: Vec<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: None,
            input_size: DEFAULT_MODEL_INPUT_SIZE,
            class_names: DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            api_addr: DEFAULT_API_ADDR.to_string(),
            stream_url: None,
            controller: None,
            autoconnect: false,
            font_path: None,
            engine: EngineConfig::default(),
            capture: CaptureSettings::default(),
            mjpeg: MjpegConfig::default(),
            stream: StreamSettings::default(),
            model: ModelSettings::default(),
            motor: MotorSettings::default(),
        }
    }
}

impl SentinelConfig {
    /// File named by `SENTINEL_CONFIG` (if any), then env overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> Self {
        let defaults = Self::default();
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or(defaults.api_addr);
        let stream = match file.stream {
            Some(stream) => StreamSettings {
                jpeg_quality: stream.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                frame_interval_ms: stream
                    .frame_interval_ms
                    .unwrap_or(DEFAULT_FRAME_INTERVAL_MS),
                placeholder_width: stream
                    .placeholder_width
                    .unwrap_or(DEFAULT_PLACEHOLDER_WIDTH),
                placeholder_height: stream
                    .placeholder_height
                    .unwrap_or(DEFAULT_PLACEHOLDER_HEIGHT),
            },
            None => defaults.stream,
        };
        let model = match file.model {
            Some(model) => ModelSettings {
                path: model.path,
                input_size: model.input_size.unwrap_or(DEFAULT_MODEL_INPUT_SIZE),
                class_names: model.class_names.unwrap_or(defaults.model.class_names),
            },
            None => defaults.model,
        };
        Self {
            api_addr,
            stream_url: file.stream_url,
            controller: file.controller,
            autoconnect: file.autoconnect.unwrap_or(false),
            font_path: file.font_path,
            engine: file.engine.unwrap_or(defaults.engine),
            capture: file.capture.unwrap_or(defaults.capture),
            mjpeg: file.mjpeg.unwrap_or(defaults.mjpeg),
            stream,
            model,
            motor: file.motor.unwrap_or(defaults.motor),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("SENTINEL_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(url) = non_empty_env("SENTINEL_STREAM_URL") {
            self.stream_url = Some(url);
        }
        if let Some(controller) = non_empty_env("SENTINEL_CONTROLLER") {
            self.controller = Some(controller);
        }
        if let Some(path) = non_empty_env("SENTINEL_MODEL_PATH") {
            self.model.path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty_env("SENTINEL_FONT_PATH") {
            self.font_path = Some(PathBuf::from(path));
        }
        if let Some(flag) = non_empty_env("SENTINEL_AUTOCONNECT") {
            self.autoconnect = match flag.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(anyhow!("SENTINEL_AUTOCONNECT must be a boolean, got '{}'", flag)),
            };
        }
        Ok(())
    }

    /// Normalise and check every section. Called by `load`; callers that
    /// build a config by hand (e.g. after CLI overrides) should call it too.
    pub fn validate(&mut self) -> Result<()> {
        self.api_addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("invalid api addr '{}': {}", self.api_addr, e))?;

        self.engine = std::mem::take(&mut self.engine).validated()?;

        if self.stream.jpeg_quality == 0 || self.stream.jpeg_quality > 100 {
            return Err(anyhow!("stream.jpeg_quality must be within 1..=100"));
        }
        if self.stream.frame_interval_ms == 0 {
            return Err(anyhow!("stream.frame_interval_ms must be greater than zero"));
        }
        if self.stream.placeholder_width == 0 || self.stream.placeholder_height == 0 {
            return Err(anyhow!("stream placeholder size must be non-zero"));
        }
        if self.model.input_size == 0 || self.model.input_size % 32 != 0 {
            return Err(anyhow!(
                "model.input_size must be a positive multiple of 32, got {}",
                self.model.input_size
            ));
        }
        if self.model.class_names.is_empty() {
            return Err(anyhow!("model.class_names must not be empty"));
        }
        if self.capture.stop_timeout_ms == 0 {
            return Err(anyhow!("capture.stop_timeout_ms must be greater than zero"));
        }
        if self.motor.default_port == 0 {
            return Err(anyhow!("motor.default_port must be non-zero"));
        }
        if self.autoconnect && self.stream_url.is_none() {
            return Err(anyhow!("autoconnect requires stream_url"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
