//! Synthetic capture source.
//!
//! Produces deterministic moving-gradient Bayer frames without any
//! hardware. Used by the end-to-end tests and as the runtime fallback when
//! no raw-capable device is found.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::debug;

use crate::capture::frame::{FrameReader, RawFrame, BYTES_PER_SAMPLE};
use crate::capture::session::{CaptureError, CaptureParams, CaptureSession};

/// Sensor bit depth emulated by the generator; values stay in 12 bits like
/// typical packed RAW16 sensor output.
const SAMPLE_MASK: u16 = 0x0fff;

pub struct SyntheticSession {
    reader: Arc<FrameReader>,
    completions: flume::Sender<RawFrame>,
    started: Instant,
    ticks: u64,
    /// When set, every Nth request fails with a transient error.
    fail_every: Option<u64>,
}

impl SyntheticSession {
    pub fn new(reader: Arc<FrameReader>, completions: flume::Sender<RawFrame>) -> Self {
        debug!(
            width = reader.width(),
            height = reader.height(),
            "synthetic capture source ready"
        );
        Self {
            reader,
            completions,
            started: Instant::now(),
            ticks: 0,
            fail_every: None,
        }
    }

    /// Inject a transient request failure on every `every`th capture.
    pub fn with_failures(mut self, every: u64) -> Self {
        assert!(every > 0);
        self.fail_every = Some(every);
        self
    }

    fn generate(&self) -> Bytes {
        let (w, h) = (self.reader.width(), self.reader.height());
        let mut data = Vec::with_capacity(w as usize * h as usize * BYTES_PER_SAMPLE);
        // Diagonal gradient scrolling with the tick count so consecutive
        // frames differ.
        let offset = (self.ticks * 4) as u32;
        for y in 0..h {
            for x in 0..w {
                let value = ((x + y + offset) as u16) & SAMPLE_MASK;
                data.extend_from_slice(&value.to_le_bytes());
            }
        }
        Bytes::from(data)
    }
}

impl CaptureSession for SyntheticSession {
    fn capture(&mut self, _params: &CaptureParams) -> Result<(), CaptureError> {
        self.ticks += 1;
        if let Some(every) = self.fail_every {
            if self.ticks % every == 0 {
                return Err(CaptureError::Request("injected failure".into()));
            }
        }

        let frame = self.reader.acquire(self.generate(), self.started.elapsed());
        // The send hands ownership to the acquisition loop; if the loop is
        // gone the frame drops here, which releases it.
        self.completions
            .send(frame)
            .map_err(|_| CaptureError::Disconnected)
    }
}
