//! Single-slot frame handoff between acquisition and conversion.
//!
//! Capacity is exactly one; a publish into an occupied slot drops the held
//! frame (newest overwrites oldest, the producer never blocks). The mutex
//! around the cell is the pipeline's only lock, and it is what makes the
//! at-most-one-frame invariant hold: replace and release happen inside one
//! critical section, so no two frames are ever held by the slot and none
//! escapes unreleased.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crossbeam::utils::CachePadded;

use crate::capture::frame::RawFrame;

pub struct FrameSlot {
    cell: Mutex<Option<RawFrame>>,
    available: Condvar,
    stats: CachePadded<SlotStats>,
}

#[derive(Default)]
struct SlotStats {
    published: AtomicU64,
    taken: AtomicU64,
    overwritten: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            cell: Mutex::new(None),
            available: Condvar::new(),
            stats: CachePadded::new(SlotStats::default()),
        }
    }

    /// Install `frame`, releasing any frame currently held. Never blocks.
    pub fn publish(&self, frame: RawFrame) {
        let mut cell = self.cell.lock().unwrap();
        if let Some(stale) = cell.replace(frame) {
            self.stats.overwritten.fetch_add(1, Ordering::Relaxed);
            drop(stale);
        }
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        drop(cell);
        self.available.notify_one();
    }

    /// Wait up to `timeout` for a frame. `None` is the timeout signal;
    /// a returned frame is owned exclusively by the caller.
    pub fn take(&self, timeout: Duration) -> Option<RawFrame> {
        let cell = self.cell.lock().unwrap();
        let (mut cell, _) = self
            .available
            .wait_timeout_while(cell, timeout, |held| held.is_none())
            .unwrap();
        let frame = cell.take();
        if frame.is_some() {
            self.stats.taken.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// Non-blocking removal, used by the supervisor's shutdown drain.
    pub fn drain(&self) -> Option<RawFrame> {
        self.cell.lock().unwrap().take()
    }

    /// (published, taken, overwritten) counters.
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.stats.published.load(Ordering::Relaxed),
            self.stats.taken.load(Ordering::Relaxed),
            self.stats.overwritten.load(Ordering::Relaxed),
        )
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{CfaPattern, FrameReader};
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Instant;

    fn reader() -> Arc<FrameReader> {
        Arc::new(FrameReader::new(4, 2, CfaPattern::Grbg))
    }

    fn frame(reader: &FrameReader, fill: u16) -> RawFrame {
        let mut data = Vec::new();
        for _ in 0..reader.width() * reader.height() {
            data.extend_from_slice(&fill.to_le_bytes());
        }
        reader.acquire(Bytes::from(data), Duration::ZERO)
    }

    #[test]
    fn take_returns_most_recent_publish() {
        let reader = reader();
        let slot = FrameSlot::new();

        let a = frame(&reader, 1);
        let b = frame(&reader, 2);
        let b_seq = b.sequence();

        slot.publish(a);
        slot.publish(b);

        let taken = slot.take(Duration::from_millis(10)).unwrap();
        assert_eq!(taken.sequence(), b_seq);
        assert_eq!(taken.sample(0, 0), 2);
    }

    #[test]
    fn overwrite_releases_previous_frame_exactly_once() {
        let reader = reader();
        let slot = FrameSlot::new();

        slot.publish(frame(&reader, 1));
        assert_eq!(reader.outstanding(), 1);

        // frameA is released by the publish of frameB, nowhere else.
        slot.publish(frame(&reader, 2));
        assert_eq!(reader.outstanding(), 1);
        assert_eq!(slot.stats().2, 1);

        let b = slot.take(Duration::from_millis(10)).unwrap();
        drop(b);
        assert_eq!(reader.outstanding(), 0);
    }

    #[test]
    fn take_on_empty_slot_times_out() {
        let slot = FrameSlot::new();
        let requested = Duration::from_millis(100);

        let started = Instant::now();
        let result = slot.take(requested);
        let elapsed = started.elapsed();

        assert!(result.is_none());
        assert!(elapsed >= requested, "returned after {elapsed:?}");
        // Bounded wait, not an unbounded one.
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn take_consumes_the_slot() {
        let reader = reader();
        let slot = FrameSlot::new();
        slot.publish(frame(&reader, 3));

        assert!(slot.take(Duration::from_millis(10)).is_some());
        assert!(slot.take(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn publish_wakes_a_blocked_take() {
        let reader = reader();
        let slot = Arc::new(FrameSlot::new());

        let taker = {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || slot.take(Duration::from_secs(5)))
        };
        // Give the taker time to block on the condvar.
        std::thread::sleep(Duration::from_millis(50));
        slot.publish(frame(&reader, 9));

        let taken = taker.join().unwrap();
        assert!(taken.is_some());
    }

    #[test]
    fn drain_removes_residual_frame() {
        let reader = reader();
        let slot = FrameSlot::new();
        slot.publish(frame(&reader, 4));

        assert!(slot.drain().is_some());
        assert!(slot.drain().is_none());
        assert_eq!(reader.outstanding(), 0);
    }
}
