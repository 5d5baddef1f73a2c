//! V4L2-backed capture session for 16-bit Bayer sensors.
//!
//! Setup (open, format negotiation, manual-exposure controls, stream start)
//! happens in `open`; failures there are fatal and surface to the host
//! before the pipeline starts. A constructed session is capture-capable.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::control::{Control, Value};
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::frame::{CfaPattern, FrameReader, RawFrame, BYTES_PER_SAMPLE};
use crate::capture::session::{CaptureError, CaptureParams, CaptureSession};
use crate::CaptureConfig;

// V4L2 control ids (videodev2.h). EXPOSURE_ABSOLUTE is in 100us units.
const CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;
const CID_ANALOGUE_GAIN: u32 = 0x009e_0903;
const EXPOSURE_MANUAL: i64 = 1;

/// 16-bit Bayer fourcc for each CFA layout.
pub fn bayer_fourcc(pattern: CfaPattern) -> FourCC {
    match pattern {
        CfaPattern::Grbg => FourCC::new(b"GR16"),
        CfaPattern::Rggb => FourCC::new(b"RG16"),
        CfaPattern::Gbrg => FourCC::new(b"GB16"),
        CfaPattern::Bggr => FourCC::new(b"BYR2"),
    }
}

pub struct V4l2Session {
    /// Keeps the device node open for the lifetime of the stream.
    _device: Box<Device>,
    stream: MmapStream<'static>,
    reader: Arc<FrameReader>,
    completions: flume::Sender<RawFrame>,
}

impl V4l2Session {
    /// Open and configure a raw capture session on `path`.
    pub fn open(
        path: &str,
        config: &CaptureConfig,
        reader: Arc<FrameReader>,
        completions: flume::Sender<RawFrame>,
    ) -> Result<Self> {
        info!(path, "opening raw capture device");

        let device = Device::with_path(path)?;

        let caps = device.query_caps()?;
        info!("device: {} ({})", caps.card, caps.driver);
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(eyre!("{path} does not support video capture"));
        }

        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = bayer_fourcc(config.pattern);
        let fmt = device.set_format(&fmt)?;
        if fmt.width != config.width || fmt.height != config.height {
            return Err(eyre!(
                "device negotiated {}x{}, configured for {}x{}",
                fmt.width,
                fmt.height,
                config.width,
                config.height
            ));
        }

        // Manual exposure is a fixed policy; drivers that lack these
        // controls still deliver frames, so failures only warn.
        let controls = [
            (CID_EXPOSURE_AUTO, EXPOSURE_MANUAL),
            (CID_EXPOSURE_ABSOLUTE, config.exposure_us as i64 / 100),
            (CID_ANALOGUE_GAIN, config.sensitivity as i64),
        ];
        for (id, value) in controls {
            if let Err(e) = device.set_control(Control {
                id,
                value: Value::Integer(value),
            }) {
                warn!(id = format_args!("{id:#x}"), error = %e, "control not applied");
            }
        }

        let device = Box::new(device);
        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)?;
        info!(buffers = config.buffer_count, "capture stream started");

        Ok(Self {
            _device: device,
            stream,
            reader,
            completions,
        })
    }
}

impl CaptureSession for V4l2Session {
    fn capture(&mut self, _params: &CaptureParams) -> Result<(), CaptureError> {
        // Exposure and gain were fixed on the device at open; a request is
        // one dequeue of the next completed buffer.
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CaptureError::Request(e.to_string()))?;

        let expected =
            self.reader.width() as usize * self.reader.height() as usize * BYTES_PER_SAMPLE;
        if buf.len() < expected {
            return Err(CaptureError::Request(format!(
                "short buffer: {} of {expected} bytes",
                buf.len()
            )));
        }

        let timestamp = Duration::from_secs(meta.timestamp.sec as u64)
            + Duration::from_micros(meta.timestamp.usec as u64);
        let frame = self
            .reader
            .acquire(Bytes::copy_from_slice(&buf[..expected]), timestamp);

        self.completions
            .send(frame)
            .map_err(|_| CaptureError::Disconnected)
    }
}
