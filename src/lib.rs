//! guava-scan: object detection over images, video clips and camera streams.
//!
//! A `Session` owns a `Detector` (a loaded model behind the `ModelBackend`
//! trait), the confidence threshold, the login state and a bounded in-memory
//! `HistoryStore`. Frames come from `ingest` sources:
//!
//! - `ImageSource`: upload or default image; detection on explicit trigger,
//!   recorded in history
//! - `CameraSource::still`: one snapshot, recorded in history
//! - `VideoSource` / `CameraSource::polling`: streamed frame by frame, never
//!   recorded
//!
//! Modules:
//! - `frame`: RGB frames, bounding boxes, detection records
//! - `detect`: detector adapter and model backends
//! - `annotate`, `labels`: box rendering, class names and legend
//! - `session`, `history`: the pipeline state machine and its history
//! - `auth`, `config`: credential store and layered configuration
//! - `report`, `ui`: table rows and terminal feedback for the CLI

pub mod annotate;
pub mod auth;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod history;
pub mod ingest;
pub mod labels;
pub mod report;
pub mod session;
pub mod ui;

pub use auth::CredentialStore;
pub use config::AppConfig;
pub use detect::{BackendKind, Detector, DetectorOptions, ModelBackend, RawBox, ScriptedBackend};
pub use error::DetectError;
pub use frame::{BoundingBox, DetectionRecord, Frame, FrameResult, SourceKind};
pub use history::{HistoryEntry, HistoryKind, HistoryStore};
pub use ingest::{
    CameraConfig, CameraSource, FrameSource, ImageSource, RunFlag, Upload, VideoConfig,
    VideoSource,
};
pub use labels::{LabelDescriptions, LabelMap, LegendEntry};
pub use session::{Phase, Session, StreamSummary};
