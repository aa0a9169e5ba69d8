//! V4L2 capture device.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use crate::frame::Frame;
use crate::ingest::{CameraConfig, PixelFormat};

pub(crate) struct V4l2Device {
    device_path: String,
    state: DeviceState,
    width: u32,
    height: u32,
    format: PixelFormat,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

fn pixel_format(fourcc: &v4l::FourCC) -> Result<PixelFormat> {
    match &fourcc.repr {
        b"YUYV" => Ok(PixelFormat::Yuyv),
        b"NV12" => Ok(PixelFormat::Nv12),
        b"RGB3" => Ok(PixelFormat::Rgb24),
        other => Err(anyhow!(
            "unsupported pixel format {}",
            String::from_utf8_lossy(other)
        )),
    }
}

impl V4l2Device {
    pub(crate) fn connect(config: &CameraConfig) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&config.device)
            .with_context(|| format!("open v4l2 device {}", config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"YUYV");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "CameraSource: failed to set format on {}: {}",
                    config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let pixel_format = pixel_format(&format.fourcc)?;

        if config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("CameraSource: failed to set fps on {}: {}", config.device, err);
            }
        }

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "CameraSource: connected to {} ({}x{} {:?})",
            config.device,
            format.width,
            format.height,
            pixel_format
        );
        Ok(Self {
            device_path: config.device.clone(),
            state,
            width: format.width,
            height: format.height,
            format: pixel_format,
        })
    }

    pub(crate) fn read(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let (width, height, format) = (self.width, self.height, self.format);
        let device_path = &self.device_path;
        self.state.with_mut(|fields| {
            let (buf, meta) = fields
                .stream
                .next()
                .with_context(|| format!("capture frame from {}", device_path))?;
            let used = (meta.bytesused as usize).min(buf.len());
            let payload = if used == 0 { buf } else { &buf[..used] };
            Frame::from_raw(payload, width, height, format).map_err(anyhow::Error::from)
        })
    }
}
