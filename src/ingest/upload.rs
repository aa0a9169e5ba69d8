//! Still-image source: an uploaded file, falling back to the bundled default image.

use std::path::{Path, PathBuf};

use crate::error::DetectError;
use crate::frame::{Frame, SourceKind};
use crate::ingest::FrameSource;

const ACCEPTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// An uploaded image: encoded bytes plus the client-side file name.
#[derive(Clone, Debug)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Read an upload from disk, keeping the file name for type checks.
    pub fn from_path(path: &Path) -> Result<Self, DetectError> {
        let bytes = std::fs::read(path)
            .map_err(|e| DetectError::source_unavailable(format!("{}: {}", path.display(), e)))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(file_name, bytes))
    }
}

fn check_extension(file_name: &str) -> Result<(), DetectError> {
    let extension = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    match extension {
        Some(ext) if ACCEPTED_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(DetectError::invalid(format!(
            "unsupported image type '{}' (expected jpg, jpeg or png)",
            file_name
        ))),
    }
}

/// Yields a single frame: the upload if present, else the default asset.
#[derive(Debug)]
pub struct ImageSource {
    frame: Option<Frame>,
    origin: Option<String>,
    consumed: bool,
}

impl ImageSource {
    /// Build from an optional upload and an optional default asset path.
    ///
    /// A rejected upload is an error. A missing default asset is not: the
    /// source is simply empty and `has_frame()` reports false.
    pub fn new(upload: Option<Upload>, default_asset: Option<&Path>) -> Result<Self, DetectError> {
        if let Some(upload) = upload {
            check_extension(&upload.file_name)?;
            let frame = Frame::decode(&upload.bytes)?;
            return Ok(Self {
                frame: Some(frame),
                origin: Some(upload.file_name),
                consumed: false,
            });
        }

        let Some(path) = default_asset else {
            return Ok(Self::empty());
        };
        match Frame::open(path) {
            Ok(frame) => Ok(Self {
                frame: Some(frame),
                origin: Some(path.display().to_string()),
                consumed: false,
            }),
            Err(err) => {
                log::warn!("default image unavailable: {}", err);
                Ok(Self::empty())
            }
        }
    }

    pub fn from_upload(upload: Upload) -> Result<Self, DetectError> {
        Self::new(Some(upload), None)
    }

    pub fn from_default(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::new(None, Some(&path)).unwrap_or_else(|_| Self::empty())
    }

    pub fn from_frame(frame: Frame) -> Self {
        Self {
            frame: Some(frame),
            origin: None,
            consumed: false,
        }
    }

    pub fn empty() -> Self {
        Self {
            frame: None,
            origin: None,
            consumed: false,
        }
    }

    pub fn has_frame(&self) -> bool {
        self.frame.is_some() && !self.consumed
    }

    /// The frame that `next_frame` would yield, without consuming it.
    pub fn preview(&self) -> Option<&Frame> {
        if self.consumed {
            None
        } else {
            self.frame.as_ref()
        }
    }

    /// Upload file name or default asset path.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }
}

impl FrameSource for ImageSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Image
    }

    fn retains_history(&self) -> bool {
        true
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, DetectError> {
        if self.consumed {
            return Ok(None);
        }
        self.consumed = true;
        Ok(self.frame.take())
    }
}
