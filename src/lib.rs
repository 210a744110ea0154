//! PPE Sentinel
//!
//! Live PPE and hazard detection over an MJPEG camera feed.
//!
//! # Architecture
//!
//! A single capture worker per session pulls frames from a video source,
//! runs the detector, classifies every detection and publishes an annotated
//! frame. HTTP clients read the most recent published frame; they never wait
//! on the worker.
//!
//! Per-person safety is derived from geometry alone: each PPE item whose
//! expanded box overlaps a person's box enough counts toward that person, and
//! the count decides the tier (`UNSAFE`, `SAFE`, `FULLY_PROTECTED`).
//!
//! # Module Structure
//!
//! - `classify`: overlap scoring, thresholds, display names, safety tiers
//! - `annotate`: boxes, labels and the overlap diagnostic drawn onto frames
//! - `detect`: detector backends and the memoized model loader
//! - `ingest`: frame sources (HTTP MJPEG, snapshot endpoints, `stub://`)
//! - `pipeline`: detect → classify → annotate for one frame
//! - `session`: connect/disconnect lifecycle and the capture worker
//! - `frame`: published frame results
//! - `api`: HTTP routes and the annotated MJPEG stream
//! - `transport`: motor-command relay to the camera's controller
//! - `config`: file + env configuration

pub mod annotate;
pub mod api;
pub mod classify;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod session;
pub mod transport;

pub use annotate::Annotator;
pub use classify::{
    classify, overlap, Category, ClassifiedDetection, EngineConfig, SafetyTier, PERSON_CLASS,
};
pub use config::{ModelSettings, SentinelConfig, StreamSettings};
pub use detect::{BoundingBox, DetectorBackend, ModelLoader, RawDetection, SharedDetector};
pub use error::SessionError;
pub use frame::{FrameCell, FrameResult};
pub use ingest::{DefaultOpener, FrameSource, SourceOpener};
pub use pipeline::FramePipeline;
pub use session::{CaptureSettings, SessionManager, SessionState, SessionStatus};
pub use transport::{MotorDirection, MotorError, MotorProxy, MotorSettings};
