//! Camera source.
//!
//! Two modes share one device backend:
//! - polling: conceptually endless, stopped by clearing the `RunFlag`; a
//!   device read failure ends the stream instead of failing it
//! - still: a single snapshot, recorded in history by the session
//!
//! `stub://<name>` opens a synthetic NV12 device (`?fail_after=N` makes the
//! N+1th read fail). Real devices need feature `ingest-v4l2`.

use anyhow::{anyhow, Result};

use crate::error::DetectError;
use crate::frame::{Frame, SourceKind};
#[cfg(feature = "ingest-v4l2")]
use crate::ingest::v4l2::V4l2Device;
use crate::ingest::{synthetic_rgb, FrameSource, PixelFormat, RunFlag};

/// Configuration for a camera device.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0") or `stub://...`.
    pub device: String,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
    /// Requested capture rate; 0 leaves the device default.
    pub target_fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            target_fps: 10,
        }
    }
}

enum Mode {
    Polling(RunFlag),
    Still { taken: bool },
}

pub struct CameraSource {
    config: CameraConfig,
    backend: CameraBackend,
    mode: Mode,
    frames_captured: u64,
    exhausted: bool,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "ingest-v4l2")]
    Device(Box<V4l2Device>),
}

impl CameraSource {
    /// Continuous capture until `run_flag` is cleared or the device fails.
    pub fn polling(config: CameraConfig, run_flag: RunFlag) -> Result<Self, DetectError> {
        Self::open(config, Mode::Polling(run_flag))
    }

    /// Single snapshot capture.
    pub fn still(config: CameraConfig) -> Result<Self, DetectError> {
        Self::open(config, Mode::Still { taken: false })
    }

    fn open(config: CameraConfig, mode: Mode) -> Result<Self, DetectError> {
        let backend = connect(&config)
            .map_err(|e| DetectError::source_unavailable(format!("{}: {:#}", config.device, e)))?;
        Ok(Self {
            config,
            backend,
            mode,
            frames_captured: 0,
            exhausted: false,
        })
    }

    pub fn is_still(&self) -> bool {
        matches!(self.mode, Mode::Still { .. })
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }

    pub fn device(&self) -> &str {
        &self.config.device
    }

    fn read(&mut self) -> Result<Frame> {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.read(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(device) => device.read(),
        }
    }
}

fn connect(config: &CameraConfig) -> Result<CameraBackend> {
    if let Some(target) = config.device.strip_prefix("stub://") {
        let camera = SyntheticCamera::new(config, target)?;
        log::info!("CameraSource: connected to {} (synthetic)", config.device);
        return Ok(CameraBackend::Synthetic(camera));
    }
    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(CameraBackend::Device(Box::new(V4l2Device::connect(config)?)))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        Err(anyhow!("camera capture requires the ingest-v4l2 feature"))
    }
}

impl FrameSource for CameraSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Camera
    }

    fn retains_history(&self) -> bool {
        self.is_still()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, DetectError> {
        if self.exhausted {
            return Ok(None);
        }
        match &mut self.mode {
            Mode::Polling(flag) => {
                if !flag.is_running() {
                    log::info!(
                        "CameraSource: {} stopped after {} frames",
                        self.config.device,
                        self.frames_captured
                    );
                    self.exhausted = true;
                    return Ok(None);
                }
            }
            Mode::Still { taken } => {
                if *taken {
                    self.exhausted = true;
                    return Ok(None);
                }
                *taken = true;
            }
        }

        match self.read() {
            Ok(frame) => {
                self.frames_captured += 1;
                Ok(Some(frame))
            }
            Err(err) => {
                self.exhausted = true;
                if self.is_still() {
                    return Err(DetectError::source_unavailable(format!(
                        "{}: {:#}",
                        self.config.device, err
                    )));
                }
                log::warn!("CameraSource: read from {} failed: {:#}", self.config.device, err);
                Ok(None)
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic device (stub://)
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    width: u32,
    height: u32,
    fail_after: Option<u64>,
    frame_count: u64,
}

impl SyntheticCamera {
    fn new(config: &CameraConfig, target: &str) -> Result<Self> {
        if config.width % 2 != 0 || config.height % 2 != 0 {
            return Err(anyhow!(
                "synthetic camera needs even dimensions, got {}x{}",
                config.width,
                config.height
            ));
        }
        let mut fail_after = None;
        if let Some((_, query)) = target.split_once('?') {
            for pair in query.split('&') {
                if let Some(value) = pair.strip_prefix("fail_after=") {
                    fail_after = Some(
                        value
                            .parse()
                            .map_err(|_| anyhow!("bad fail_after '{}'", value))?,
                    );
                }
            }
        }
        Ok(Self {
            width: config.width,
            height: config.height,
            fail_after,
            frame_count: 0,
        })
    }

    fn read(&mut self) -> Result<Frame> {
        if self.fail_after.is_some_and(|limit| self.frame_count >= limit) {
            return Err(anyhow!("synthetic device disconnected"));
        }
        self.frame_count += 1;
        let nv12 = self.generate_nv12();
        Frame::from_raw(&nv12, self.width, self.height, PixelFormat::Nv12)
            .map_err(anyhow::Error::from)
    }

    /// Luma from the shared test pattern, neutral chroma.
    fn generate_nv12(&self) -> Vec<u8> {
        let luma_len = (self.width as usize) * (self.height as usize);
        let rgb = synthetic_rgb(self.width, self.height, self.frame_count);
        let mut nv12: Vec<u8> = rgb.iter().step_by(3).copied().collect();
        debug_assert_eq!(nv12.len(), luma_len);
        nv12.resize(luma_len + luma_len / 2, 128);
        nv12
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub(device: &str) -> CameraConfig {
        CameraConfig {
            device: device.to_string(),
            width: 64,
            height: 48,
            target_fps: 10,
        }
    }

    #[test]
    fn polling_runs_until_flag_cleared() {
        let flag = RunFlag::new();
        let mut camera = CameraSource::polling(stub("stub://cam"), flag.clone()).unwrap();
        for _ in 0..3 {
            let frame = camera.next_frame().unwrap().unwrap();
            assert_eq!(frame.dimensions(), (64, 48));
        }
        flag.stop();
        assert!(camera.next_frame().unwrap().is_none());
        assert!(camera.next_frame().unwrap().is_none());
        assert_eq!(camera.frames_captured(), 3);
        assert!(!camera.retains_history());
    }

    #[test]
    fn read_failure_ends_polling_stream() {
        let mut camera =
            CameraSource::polling(stub("stub://cam?fail_after=2"), RunFlag::new()).unwrap();
        assert!(camera.next_frame().unwrap().is_some());
        assert!(camera.next_frame().unwrap().is_some());
        assert!(camera.next_frame().unwrap().is_none());
    }

    #[test]
    fn still_yields_one_frame() {
        let mut camera = CameraSource::still(stub("stub://cam")).unwrap();
        assert!(camera.retains_history());
        assert!(camera.next_frame().unwrap().is_some());
        assert!(camera.next_frame().unwrap().is_none());
    }

    #[test]
    fn still_read_failure_is_an_error() {
        let mut camera = CameraSource::still(stub("stub://cam?fail_after=0")).unwrap();
        let err = camera.next_frame().unwrap_err();
        assert!(matches!(err, DetectError::SourceUnavailable(_)));
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn real_device_needs_feature() {
        let err = CameraSource::still(stub("/dev/video0")).err();
        assert!(matches!(err, Some(DetectError::SourceUnavailable(_))));
    }
}
