//! Frame sources.
//!
//! - `ImageSource`: one uploaded or default still image
//! - `VideoSource`: a clip (`stub://` synthetic, an image-sequence directory,
//!   or FFmpeg decoding with feature `ingest-video-ffmpeg`)
//! - `CameraSource`: a polled device or a single still capture (`stub://`
//!   synthetic, or V4L2 with feature `ingest-v4l2`)
//!
//! Sources are fused: after the first `Ok(None)` they stay exhausted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::DetectError;
use crate::frame::{Frame, SourceKind};

pub mod camera;
pub mod normalize;
pub mod upload;
pub mod video;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;
#[cfg(feature = "ingest-video-ffmpeg")]
mod video_ffmpeg;

pub use camera::{CameraConfig, CameraSource};
pub use normalize::PixelFormat;
pub use upload::{ImageSource, Upload};
pub use video::{VideoConfig, VideoSource};

/// A producer of frames for the detection session.
pub trait FrameSource {
    fn kind(&self) -> SourceKind;

    /// Whether frames from this source are recorded in history.
    fn retains_history(&self) -> bool;

    /// Next frame, or `Ok(None)` once the source is exhausted or cancelled.
    fn next_frame(&mut self) -> Result<Option<Frame>, DetectError>;
}

/// Shared "keep going" flag, cleared from outside to stop a running stream.
#[derive(Clone, Debug)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic gradient test pattern shared by the synthetic backends.
pub(crate) fn synthetic_rgb(width: u32, height: u32, frame_index: u64) -> Vec<u8> {
    let len = (width as usize) * (height as usize) * 3;
    let mut pixels = vec![0u8; len];
    for (i, pixel) in pixels.iter_mut().enumerate() {
        *pixel = ((i as u64 + frame_index) % 256) as u8;
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flag_is_shared_between_clones() {
        let flag = RunFlag::new();
        let handle = flag.clone();
        assert!(flag.is_running());
        handle.stop();
        assert!(!flag.is_running());
    }

    #[test]
    fn synthetic_pattern_changes_per_frame() {
        assert_ne!(synthetic_rgb(4, 4, 1), synthetic_rgb(4, 4, 2));
        assert_eq!(synthetic_rgb(4, 4, 1).len(), 48);
    }
}
