//! Video clip source.
//!
//! Accepted locations:
//! - `stub://<name>?frames=N`: synthetic clip of N frames (default 30)
//! - a directory of `.jpg`/`.jpeg`/`.png` frames, decoded in file-name order
//! - any file or URL FFmpeg can open (feature `ingest-video-ffmpeg`)

use std::path::{Path, PathBuf};

use crate::error::DetectError;
use crate::frame::{Frame, SourceKind};
#[cfg(feature = "ingest-video-ffmpeg")]
use crate::ingest::video_ffmpeg::FfmpegVideoSource;
use crate::ingest::{synthetic_rgb, FrameSource, RunFlag};

const SYNTHETIC_DEFAULT_FRAMES: u64 = 30;
const SYNTHETIC_WIDTH: u32 = 320;
const SYNTHETIC_HEIGHT: u32 = 240;

/// Configuration for a video source.
#[derive(Clone, Debug)]
pub struct VideoConfig {
    /// Clip location: `stub://`, a frame directory, a file path or a URL.
    pub path: String,
    /// Preset name the clip was selected by, for logging.
    pub name: Option<String>,
}

impl VideoConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: None,
        }
    }

    pub fn named(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: Some(name.into()),
        }
    }

    fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.path)
    }
}

/// Video frame source. Not restartable; open a new one to replay a clip.
pub struct VideoSource {
    config: VideoConfig,
    backend: VideoBackend,
    run_flag: Option<RunFlag>,
    frames_read: u64,
    exhausted: bool,
}

enum VideoBackend {
    Synthetic(SyntheticClip),
    Sequence(FrameSequence),
    #[cfg(feature = "ingest-video-ffmpeg")]
    Ffmpeg(Box<FfmpegVideoSource>),
}

impl VideoSource {
    /// Open a clip. Any failure to open is `SourceUnavailable`.
    pub fn open(config: VideoConfig) -> Result<Self, DetectError> {
        if config.path.trim().is_empty() {
            return Err(DetectError::source_unavailable("empty video path"));
        }
        let backend = if let Some(target) = config.path.strip_prefix("stub://") {
            VideoBackend::Synthetic(SyntheticClip::parse(target)?)
        } else if Path::new(&config.path).is_dir() {
            VideoBackend::Sequence(FrameSequence::scan(Path::new(&config.path))?)
        } else {
            open_decoder(&config)?
        };
        log::info!("VideoSource: opened {} ({})", config.display_name(), backend.label());
        Ok(Self {
            config,
            backend,
            run_flag: None,
            frames_read: 0,
            exhausted: false,
        })
    }

    /// Stop yielding frames once `flag` is cleared.
    pub fn with_run_flag(mut self, flag: RunFlag) -> Self {
        self.run_flag = Some(flag);
        self
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn config(&self) -> &VideoConfig {
        &self.config
    }

    fn cancelled(&self) -> bool {
        self.run_flag.as_ref().is_some_and(|flag| !flag.is_running())
    }
}

impl FrameSource for VideoSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Video
    }

    fn retains_history(&self) -> bool {
        false
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, DetectError> {
        if self.exhausted {
            return Ok(None);
        }
        if self.cancelled() {
            log::info!(
                "VideoSource: {} cancelled after {} frames",
                self.config.display_name(),
                self.frames_read
            );
            self.exhausted = true;
            return Ok(None);
        }

        let next = match &mut self.backend {
            VideoBackend::Synthetic(clip) => clip.next_frame(),
            VideoBackend::Sequence(sequence) => sequence.next_frame(),
            #[cfg(feature = "ingest-video-ffmpeg")]
            VideoBackend::Ffmpeg(decoder) => decoder
                .next_frame()
                .map_err(|e| DetectError::source_unavailable(format!("{:#}", e))),
        };
        match next {
            Ok(Some(frame)) => {
                self.frames_read += 1;
                Ok(Some(frame))
            }
            Ok(None) => {
                log::debug!(
                    "VideoSource: end of {} after {} frames",
                    self.config.display_name(),
                    self.frames_read
                );
                self.exhausted = true;
                Ok(None)
            }
            Err(err) => {
                self.exhausted = true;
                Err(err)
            }
        }
    }
}

impl VideoBackend {
    fn label(&self) -> &'static str {
        match self {
            VideoBackend::Synthetic(_) => "synthetic",
            VideoBackend::Sequence(_) => "frame directory",
            #[cfg(feature = "ingest-video-ffmpeg")]
            VideoBackend::Ffmpeg(_) => "ffmpeg",
        }
    }
}

#[cfg(feature = "ingest-video-ffmpeg")]
fn open_decoder(config: &VideoConfig) -> Result<VideoBackend, DetectError> {
    FfmpegVideoSource::new(&config.path)
        .map(|source| VideoBackend::Ffmpeg(Box::new(source)))
        .map_err(|e| DetectError::source_unavailable(format!("{:#}", e)))
}

#[cfg(not(feature = "ingest-video-ffmpeg"))]
fn open_decoder(config: &VideoConfig) -> Result<VideoBackend, DetectError> {
    if !config.path.contains("://") && !Path::new(&config.path).exists() {
        return Err(DetectError::source_unavailable(format!(
            "video {} not found",
            config.path
        )));
    }
    Err(DetectError::source_unavailable(format!(
        "cannot decode {}: video decoding requires the ingest-video-ffmpeg feature",
        config.path
    )))
}

// ----------------------------------------------------------------------------
// Synthetic clip (stub://)
// ----------------------------------------------------------------------------

struct SyntheticClip {
    total: u64,
    emitted: u64,
}

impl SyntheticClip {
    fn parse(target: &str) -> Result<Self, DetectError> {
        let mut total = SYNTHETIC_DEFAULT_FRAMES;
        if let Some((_, query)) = target.split_once('?') {
            for pair in query.split('&') {
                if let Some(value) = pair.strip_prefix("frames=") {
                    total = value.parse().map_err(|_| {
                        DetectError::source_unavailable(format!("bad frame count '{}'", value))
                    })?;
                }
            }
        }
        Ok(Self { total, emitted: 0 })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, DetectError> {
        if self.emitted >= self.total {
            return Ok(None);
        }
        self.emitted += 1;
        let pixels = synthetic_rgb(SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT, self.emitted);
        Frame::from_rgb(SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT, pixels).map(Some)
    }
}

// ----------------------------------------------------------------------------
// Image-sequence directory
// ----------------------------------------------------------------------------

struct FrameSequence {
    paths: Vec<PathBuf>,
    next: usize,
}

impl FrameSequence {
    fn scan(dir: &Path) -> Result<Self, DetectError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| DetectError::source_unavailable(format!("{}: {}", dir.display(), e)))?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_frame_file(path))
            .collect();
        if paths.is_empty() {
            return Err(DetectError::source_unavailable(format!(
                "{} contains no image frames",
                dir.display()
            )));
        }
        paths.sort();
        Ok(Self { paths, next: 0 })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, DetectError> {
        let Some(path) = self.paths.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        Frame::open(path).map(Some)
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| matches!(ext.as_str(), "jpg" | "jpeg" | "png"))
}
