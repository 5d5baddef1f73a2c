//! Acquisition loop: fixed-cadence capture requests, completions published
//! into the frame slot.
//!
//! One request per tick with the fixed manual-exposure parameters. A failed
//! request is logged and skipped; the next tick fires regardless, so the
//! loop rides out transient device hiccups. Completions arrive on the
//! registered channel and are drained every tick; anything still queued
//! when the loop exits is dropped, which releases it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::capture::frame::RawFrame;
use crate::capture::session::{CaptureError, CaptureParams, CaptureSession};
use crate::pipeline::slot::FrameSlot;

pub(crate) struct AcquisitionLoop {
    pub(crate) session: Box<dyn CaptureSession>,
    pub(crate) completions: flume::Receiver<RawFrame>,
    pub(crate) slot: Arc<FrameSlot>,
    pub(crate) params: CaptureParams,
    pub(crate) period: Duration,
    pub(crate) stop: Arc<AtomicBool>,
}

impl AcquisitionLoop {
    pub(crate) async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.stop.load(Ordering::Acquire) {
                break;
            }

            match self.session.capture(&self.params) {
                Ok(()) => {}
                Err(CaptureError::Disconnected) => {
                    warn!("capture source disconnected, acquisition ending");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "capture request failed, skipping tick");
                }
            }

            // Drain whatever completed since the last tick; publish drops
            // any frame the consumer did not collect in time.
            while let Ok(frame) = self.completions.try_recv() {
                self.slot.publish(frame);
            }
        }

        // No request is issued past this point; release in-flight frames.
        let undelivered = self.completions.drain().count();
        if undelivered > 0 {
            debug!(frames = undelivered, "released undelivered frames on shutdown");
        }
        debug!("acquisition loop exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{CfaPattern, FrameReader};
    use crate::capture::synthetic::SyntheticSession;

    fn params() -> CaptureParams {
        CaptureParams {
            exposure: Duration::from_micros(10_000),
            sensitivity: 800,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cadence_survives_failed_requests() {
        let reader = Arc::new(FrameReader::new(4, 4, CfaPattern::Grbg));
        let (tx, rx) = flume::bounded(4);
        let session = SyntheticSession::new(Arc::clone(&reader), tx).with_failures(2);
        let slot = Arc::new(FrameSlot::new());
        let stop = Arc::new(AtomicBool::new(false));

        let worker = tokio::spawn(
            AcquisitionLoop {
                session: Box::new(session),
                completions: rx,
                slot: Arc::clone(&slot),
                params: params(),
                period: Duration::from_millis(2),
                stop: Arc::clone(&stop),
            }
            .run(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.store(true, Ordering::Release);
        worker.await.unwrap();

        // Every other request fails, yet frames kept flowing.
        let (published, _, _) = slot.stats();
        assert!(published >= 2, "published only {published} frames");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_releases_unpublished_frames() {
        let reader = Arc::new(FrameReader::new(4, 4, CfaPattern::Grbg));
        let (tx, rx) = flume::bounded(4);
        let mut session = SyntheticSession::new(Arc::clone(&reader), tx);
        let slot = Arc::new(FrameSlot::new());
        let stop = Arc::new(AtomicBool::new(true));

        // Frames already completed before the loop ever runs.
        session.capture(&params()).unwrap();
        session.capture(&params()).unwrap();
        assert_eq!(reader.outstanding(), 2);

        AcquisitionLoop {
            session: Box::new(session),
            completions: rx,
            slot: Arc::clone(&slot),
            params: params(),
            period: Duration::from_millis(2),
            stop,
        }
        .run()
        .await;

        assert_eq!(reader.outstanding(), 0);
        assert_eq!(slot.stats().0, 0);
    }
}
