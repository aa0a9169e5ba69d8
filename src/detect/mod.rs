mod adapter;
mod backend;
pub mod backends;

pub use crate::error::DetectError;
pub use adapter::{Detector, DetectorOptions};
pub use backend::{non_max_suppression, BackendKind, ModelBackend, RawBox};
pub use backends::{CallCounter, ScriptedBackend};
