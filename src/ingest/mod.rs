//! Frame ingestion sources.
//!
//! This module provides the video sources a session can open:
//! - HTTP MJPEG streams and single-JPEG snapshot endpoints (`http://`, `https://`)
//! - Synthetic frames for tests and demos (`stub://`)
//!
//! Sources hand out decoded RGB frames one at a time. They keep at most one
//! undelivered frame: when the producer runs ahead of the consumer, older
//! frames are dropped in favour of the newest.

mod mjpeg;
mod synthetic;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use url::Url;

pub use mjpeg::{MjpegConfig, MjpegSource};
pub use synthetic::{SyntheticConfig, SyntheticSource};

/// An open video source.
pub trait FrameSource: Send {
    /// Read the next frame. Errors are per-read; the caller decides whether
    /// the stream is lost.
    fn read_frame(&mut self) -> Result<RgbImage>;

    /// Release the underlying handle. Reads after release fail.
    fn release(&mut self) {}

    /// Human-readable origin for logs.
    fn describe(&self) -> String;
}

/// Opens sources by URL.
pub trait SourceOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<Box<dyn FrameSource>>;
}

/// Opener dispatching on the URL scheme.
#[derive(Clone, Debug, Default)]
pub struct DefaultOpener {
    pub mjpeg: MjpegConfig,
}

impl DefaultOpener {
    pub fn new(mjpeg: MjpegConfig) -> Self {
        Self { mjpeg }
    }
}

impl SourceOpener for DefaultOpener {
    fn open(&self, url: &str) -> Result<Box<dyn FrameSource>> {
        let parsed = Url::parse(url).with_context(|| format!("invalid stream url '{}'", url))?;
        match parsed.scheme() {
            "http" | "https" => {
                let source = MjpegSource::connect(url, &self.mjpeg)?;
                Ok(Box::new(source))
            }
            "stub" => {
                let config = SyntheticConfig::from_url(&parsed)?;
                Ok(Box::new(SyntheticSource::new(url, config)))
            }
            other => Err(anyhow!(
                "unsupported stream scheme '{}'; expected http(s) or stub",
                other
            )),
        }
    }
}
