use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;

/// Backend that replays scripted responses instead of running a model.
///
/// Queued responses are consumed one per frame; once the queue is empty every
/// frame gets the fallback detections. A [`ScriptHandle`] lets a test or demo
/// feed responses while the backend is owned by a capture worker.
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}

#[derive(Default)]
struct Script {
    queued: VecDeque<Result<Vec<RawDetection>, String>>,
    fallback: Vec<RawDetection>,
    calls: u64,
}

/// Shared control handle for a [`ScriptedBackend`].
#[derive(Clone)]
pub struct ScriptHandle {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    pub fn new(fallback: Vec<RawDetection>) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                fallback,
                ..Script::default()
            })),
        }
    }

    pub fn handle(&self) -> ScriptHandle {
        ScriptHandle {
            script: self.script.clone(),
        }
    }
}

impl ScriptHandle {
    /// Queue detections for the next unscripted frame.
    pub fn push_detections(&self, detections: Vec<RawDetection>) {
        if let Ok(mut script) = self.script.lock() {
            script.queued.push_back(Ok(detections));
        }
    }

    /// Queue a model failure for the next unscripted frame.
    pub fn push_failure(&self, reason: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.queued.push_back(Err(reason.into()));
        }
    }

    /// Number of `detect` calls served so far.
    pub fn calls(&self) -> u64 {
        self.script.lock().map(|script| script.calls).unwrap_or(0)
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<RawDetection>> {
        let mut script = self
            .script
            .lock()
            .map_err(|_| anyhow!("scripted backend lock poisoned"))?;
        script.calls += 1;
        match script.queued.pop_front() {
            Some(Ok(detections)) => Ok(detections),
            Some(Err(reason)) => Err(anyhow!("scripted detector failure: {}", reason)),
            None => Ok(script.fallback.clone()),
        }
    }
}
