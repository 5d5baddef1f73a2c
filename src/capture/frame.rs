//! Raw frame buffers and their ownership discipline.
//!
//! A `RawFrame` is leased from a `FrameReader` and carries a `BufferLease`
//! that returns the buffer slot on drop. Release is therefore tied to
//! ownership: whichever path consumes the frame (conversion, overwrite in
//! the slot, shutdown drain) releases it exactly once.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Bytes per sample in the fixed raw encoding (16-bit packed sensor data).
pub const BYTES_PER_SAMPLE: usize = 2;

/// Color filter array layout of the sensor, named by its top-left 2x2 tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CfaPattern {
    Grbg,
    Rggb,
    Bggr,
    Gbrg,
}

/// Color of a single CFA site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CfaColor {
    Red,
    Green,
    Blue,
}

impl CfaPattern {
    /// Color of the CFA site at pixel coordinates `(x, y)`.
    pub(crate) fn color_at(self, x: u32, y: u32) -> CfaColor {
        use CfaColor::*;
        let tile = match self {
            CfaPattern::Grbg => [[Green, Red], [Blue, Green]],
            CfaPattern::Rggb => [[Red, Green], [Green, Blue]],
            CfaPattern::Bggr => [[Blue, Green], [Green, Red]],
            CfaPattern::Gbrg => [[Green, Blue], [Red, Green]],
        };
        tile[(y & 1) as usize][(x & 1) as usize]
    }
}

/// Single raw sensor frame with exclusive ownership of its backing memory.
///
/// Not `Clone`: there is exactly one owner at any time, and dropping the
/// frame is what releases the buffer back to its reader.
pub struct RawFrame {
    /// Packed little-endian 16-bit samples, `width * height` of them.
    data: Bytes,
    width: u32,
    height: u32,
    pattern: CfaPattern,
    sequence: u64,
    /// Monotonic device clock at capture completion.
    device_timestamp: Duration,
    /// Host instant the frame was handed over, for latency tracking.
    captured_at: Instant,
    _lease: BufferLease,
}

impl RawFrame {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pattern(&self) -> CfaPattern {
        self.pattern
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn device_timestamp(&self) -> Duration {
        self.device_timestamp
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Sample at `(x, y)`. Callers stay in bounds; the reader validated the
    /// buffer length against the frame dimensions.
    #[inline]
    pub fn sample(&self, x: u32, y: u32) -> u16 {
        let idx = (y as usize * self.width as usize + x as usize) * BYTES_PER_SAMPLE;
        u16::from_le_bytes([self.data[idx], self.data[idx + 1]])
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("sequence", &self.sequence)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pattern", &self.pattern)
            .field("device_timestamp", &self.device_timestamp)
            .finish()
    }
}

/// Returns the buffer slot to the reader exactly once, on drop.
struct BufferLease {
    outstanding: Arc<AtomicUsize>,
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Allocator and tracker for raw frame buffers.
///
/// Owned by the host application (the frame-source collaborator); the
/// pipeline only consumes the frames it hands out. `outstanding()` is the
/// number of leased frames not yet released and must read 0 once the
/// pipeline has fully stopped.
pub struct FrameReader {
    width: u32,
    height: u32,
    pattern: CfaPattern,
    sequence: AtomicU64,
    outstanding: Arc<AtomicUsize>,
}

impl FrameReader {
    pub fn new(width: u32, height: u32, pattern: CfaPattern) -> Self {
        assert!(width > 0 && height > 0, "frame dimensions must be non-zero");
        Self {
            width,
            height,
            pattern,
            sequence: AtomicU64::new(0),
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pattern(&self) -> CfaPattern {
        self.pattern
    }

    /// Wrap a completed capture buffer into an owned frame.
    ///
    /// Panics if the buffer does not match the reader's dimensions; a
    /// malformed buffer here is a device-glue bug, not a runtime condition.
    pub fn acquire(&self, data: Bytes, device_timestamp: Duration) -> RawFrame {
        let expected = self.width as usize * self.height as usize * BYTES_PER_SAMPLE;
        assert_eq!(
            data.len(),
            expected,
            "raw buffer is {} bytes, expected {} for {}x{}",
            data.len(),
            expected,
            self.width,
            self.height
        );

        self.outstanding.fetch_add(1, Ordering::AcqRel);
        RawFrame {
            data,
            width: self.width,
            height: self.height,
            pattern: self.pattern,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            device_timestamp,
            captured_at: Instant::now(),
            _lease: BufferLease {
                outstanding: Arc::clone(&self.outstanding),
            },
        }
    }

    /// Leased frames not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_buffer(width: u32, height: u32, value: u16) -> Bytes {
        let mut data = Vec::with_capacity((width * height) as usize * BYTES_PER_SAMPLE);
        for _ in 0..width * height {
            data.extend_from_slice(&value.to_le_bytes());
        }
        Bytes::from(data)
    }

    #[test]
    fn lease_is_released_on_drop() {
        let reader = FrameReader::new(4, 2, CfaPattern::Grbg);
        let frame = reader.acquire(flat_buffer(4, 2, 7), Duration::ZERO);
        assert_eq!(reader.outstanding(), 1);
        drop(frame);
        assert_eq!(reader.outstanding(), 0);
    }

    #[test]
    fn sequence_numbers_are_monotonic() {
        let reader = FrameReader::new(2, 2, CfaPattern::Rggb);
        let a = reader.acquire(flat_buffer(2, 2, 0), Duration::ZERO);
        let b = reader.acquire(flat_buffer(2, 2, 0), Duration::ZERO);
        assert!(b.sequence() > a.sequence());
    }

    #[test]
    fn samples_decode_little_endian() {
        let reader = FrameReader::new(2, 1, CfaPattern::Grbg);
        let frame = reader.acquire(Bytes::from(vec![0x34, 0x12, 0xff, 0x0f]), Duration::ZERO);
        assert_eq!(frame.sample(0, 0), 0x1234);
        assert_eq!(frame.sample(1, 0), 0x0fff);
    }

    #[test]
    #[should_panic(expected = "raw buffer")]
    fn mismatched_buffer_is_rejected() {
        let reader = FrameReader::new(4, 4, CfaPattern::Grbg);
        let _ = reader.acquire(Bytes::from(vec![0u8; 3]), Duration::ZERO);
    }

    #[test]
    fn grbg_tile_layout() {
        use CfaColor::*;
        let p = CfaPattern::Grbg;
        assert_eq!(p.color_at(0, 0), Green);
        assert_eq!(p.color_at(1, 0), Red);
        assert_eq!(p.color_at(0, 1), Blue);
        assert_eq!(p.color_at(1, 1), Green);
        // Tiles repeat with period two.
        assert_eq!(p.color_at(3, 2), Red);
    }
}
