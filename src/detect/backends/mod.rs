pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use scripted::{CallCounter, ScriptedBackend};

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
