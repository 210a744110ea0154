//! HTTP MJPEG frame source.
//!
//! Connects to an HTTP endpoint and decodes JPEG frames in-memory:
//! - `multipart/*` responses are treated as an MJPEG stream. A reader thread
//!   drains the socket continuously and keeps only the newest complete part
//!   in a single slot, so a slow consumer never works through a backlog.
//!   Parts are cut by their `Content-Length` header when present, else on
//!   JPEG SOI/EOI markers
//! - any other response is treated as a snapshot endpoint and re-fetched
//!   for every frame

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use serde::Deserialize;

use super::FrameSource;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const READ_CHUNK_BYTES: usize = 8192;

/// Transport settings for HTTP sources.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MjpegConfig {
    pub connect_timeout_ms: u64,
    /// Bounds how long a single frame read may block.
    pub read_timeout_ms: u64,
}

impl Default for MjpegConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            read_timeout_ms: 2_000,
        }
    }
}

pub struct MjpegSource {
    url: String,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    frames_decoded: u64,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    /// Snapshot endpoint; `pending` holds the body fetched while connecting.
    SingleJpeg { pending: Option<Vec<u8>> },
}

impl MjpegSource {
    /// Open the endpoint and detect whether it streams or serves snapshots.
    pub fn connect(url: &str, config: &MjpegConfig) -> Result<Self> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_millis(config.connect_timeout_ms))
            .timeout_read(Duration::from_millis(config.read_timeout_ms))
            .build();
        let response = agent
            .get(url)
            .call()
            .with_context(|| format!("connect to http stream {}", url))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        let stream = if content_type.contains("multipart") {
            log::info!("mjpeg stream connected: {} ({})", url, content_type);
            HttpStream::Mjpeg(MjpegStream::spawn(
                Box::new(response.into_reader()),
                Duration::from_millis(config.read_timeout_ms),
            )?)
        } else {
            log::info!("jpeg snapshot endpoint connected: {} ({})", url, content_type);
            HttpStream::SingleJpeg {
                pending: Some(read_body(response)?),
            }
        };
        Ok(Self {
            url: url.to_string(),
            agent,
            stream: Some(stream),
            frames_decoded: 0,
        })
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }
}

impl FrameSource for MjpegSource {
    fn read_frame(&mut self) -> Result<RgbImage> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("http source {} released", self.url))?;
        let jpeg_bytes = match stream {
            HttpStream::Mjpeg(stream) => stream.read_latest_jpeg()?,
            HttpStream::SingleJpeg { pending } => match pending.take() {
                Some(bytes) => bytes,
                None => fetch_single_jpeg(&self.agent, &self.url)?,
            },
        };
        let frame = decode_jpeg(&jpeg_bytes)?;
        self.frames_decoded += 1;
        Ok(frame)
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            log::info!(
                "http source {} released after {} frames",
                self.url,
                self.frames_decoded
            );
        }
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Reader thread plus the single-slot buffer it publishes into.
struct MjpegStream {
    latest: Arc<LatestPart>,
    stop: Arc<AtomicBool>,
    wait: Duration,
}

#[derive(Default)]
struct LatestPart {
    slot: Mutex<PartSlot>,
    ready: Condvar,
}

#[derive(Default)]
struct PartSlot {
    jpeg: Option<Vec<u8>>,
    ended: Option<String>,
    superseded: u64,
}

impl LatestPart {
    fn lock(&self) -> MutexGuard<'_, PartSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MjpegStream {
    fn spawn(reader: Box<dyn Read + Send>, wait: Duration) -> Result<Self> {
        let latest = Arc::new(LatestPart::default());
        let stop = Arc::new(AtomicBool::new(false));
        let mut parts = PartReader::new(reader);
        let (thread_latest, thread_stop) = (latest.clone(), stop.clone());
        std::thread::Builder::new()
            .name("mjpeg-reader".to_string())
            .spawn(move || loop {
                let part = parts.next_jpeg();
                if thread_stop.load(Ordering::SeqCst) {
                    return;
                }
                let mut slot = thread_latest.lock();
                match part {
                    Ok(jpeg) => {
                        if slot.jpeg.replace(jpeg).is_some() {
                            slot.superseded += 1;
                        }
                        thread_latest.ready.notify_all();
                    }
                    Err(err) => {
                        log::debug!("mjpeg reader stopped: {:#}", err);
                        slot.ended = Some(format!("{:#}", err));
                        thread_latest.ready.notify_all();
                        return;
                    }
                }
            })
            .context("spawn mjpeg reader thread")?;
        Ok(Self { latest, stop, wait })
    }

    /// Take the newest complete JPEG, waiting up to the read timeout for one.
    fn read_latest_jpeg(&mut self) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.wait;
        let mut slot = self.latest.lock();
        loop {
            if let Some(jpeg) = slot.jpeg.take() {
                if slot.superseded > 0 {
                    log::trace!("skipped {} stale mjpeg frames", slot.superseded);
                    slot.superseded = 0;
                }
                return Ok(jpeg);
            }
            if let Some(reason) = &slot.ended {
                return Err(anyhow!("{}", reason));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(anyhow!("no mjpeg frame within {} ms", self.wait.as_millis()));
            }
            slot = self
                .latest
                .ready
                .wait_timeout(slot, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }
}

impl Drop for MjpegStream {
    fn drop(&mut self) {
        // The reader exits after its current read returns or times out.
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Splits a multipart body into JPEG parts.
struct PartReader {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
    chunk: Vec<u8>,
}

impl PartReader {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
            chunk: vec![0u8; READ_CHUNK_BYTES],
        }
    }

    fn next_jpeg(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some((start, end)) = find_part_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut self.chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&self.chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    read_body(response)
}

fn read_body(response: ureq::Response) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    Ok(image.into_rgb8())
}

/// Bounds of the first complete part. The part's `Content-Length` wins
/// over marker scanning, which would stop at an embedded thumbnail's EOI.
fn find_part_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    match part_content_length(&buffer[..start]) {
        Some(len) => {
            let end = start + len;
            (buffer.len() >= end).then_some((start, end))
        }
        None => find_jpeg_bounds(buffer),
    }
}

fn part_content_length(headers: &[u8]) -> Option<usize> {
    String::from_utf8_lossy(headers)
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .filter(|len| (4..=MAX_JPEG_BYTES).contains(len))
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
