use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use url::Url;

use super::FrameSource;

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 15;
const MAX_DIMENSION: u32 = 4096;

/// Settings for a `stub://` source, taken from the URL query:
/// `stub://name?width=640&height=480&fps=15&fail_after=100`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    /// Pace frames at this rate. 0 produces frames as fast as they are read.
    pub fps: u32,
    /// Every read after this many frames fails, simulating a dropped stream.
    pub fail_after: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
            fail_after: None,
        }
    }
}

impl SyntheticConfig {
    pub fn from_url(url: &Url) -> Result<Self> {
        let mut cfg = Self::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "width" => cfg.width = parse_param(&key, &value)?,
                "height" => cfg.height = parse_param(&key, &value)?,
                "fps" => cfg.fps = parse_param(&key, &value)?,
                "fail_after" => cfg.fail_after = Some(parse_param(&key, &value)?),
                other => log::debug!("ignoring unknown stub parameter '{}'", other),
            }
        }
        if cfg.width == 0 || cfg.height == 0 || cfg.width > MAX_DIMENSION || cfg.height > MAX_DIMENSION {
            return Err(anyhow!(
                "stub frame size {}x{} out of range",
                cfg.width,
                cfg.height
            ));
        }
        Ok(cfg)
    }
}

fn parse_param<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("stub parameter '{}' must be an integer in range, got '{}'", key, value))
}

/// Synthetic frame source: a moving gradient, optionally failing after N frames.
pub struct SyntheticSource {
    url: String,
    config: SyntheticConfig,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    released: bool,
}

impl SyntheticSource {
    pub fn new(url: &str, config: SyntheticConfig) -> Self {
        log::info!(
            "synthetic source {} ({}x{} @ {} fps)",
            url,
            config.width,
            config.height,
            config.fps
        );
        Self {
            url: url.to_string(),
            config,
            frame_count: 0,
            last_frame_at: None,
            released: false,
        }
    }

    fn pace(&mut self) {
        if self.config.fps == 0 {
            return;
        }
        let interval = Duration::from_millis((1000 / self.config.fps as u64).max(1));
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }

    fn generate(&self) -> RgbImage {
        let shift = self.frame_count as u32;
        RgbImage::from_fn(self.config.width, self.config.height, |x, y| {
            Rgb([
                ((x + shift) % 256) as u8,
                ((y + shift / 2) % 256) as u8,
                ((x + y) % 256) as u8,
            ])
        })
    }
}

impl FrameSource for SyntheticSource {
    fn read_frame(&mut self) -> Result<RgbImage> {
        if self.released {
            return Err(anyhow!("synthetic source {} released", self.url));
        }
        if let Some(limit) = self.config.fail_after {
            if self.frame_count >= limit {
                return Err(anyhow!("synthetic source {} stopped producing frames", self.url));
            }
        }
        self.pace();
        self.frame_count += 1;
        Ok(self.generate())
    }

    fn release(&mut self) {
        self.released = true;
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
