//! Pipeline supervisor: lifecycle of the two worker contexts.
//!
//! `Stopped -> Starting -> Running -> Stopping -> Stopped`. Start spawns
//! the acquisition task and the blocking conversion+render loop; stop
//! raises the shared flag, joins both, then drains the slot. After `stop`
//! returns the pipeline holds no RawFrame: both loops have confirmed
//! termination before the residual frame (if any) is released, so the host
//! may close the device safely.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::capture::frame::RawFrame;
use crate::capture::session::{CaptureParams, CaptureSession};
use crate::display::surface::DrawSurface;
use crate::pipeline::acquire::AcquisitionLoop;
use crate::pipeline::convert::{Converter, ConvertLoop};
use crate::pipeline::slot::FrameSlot;
use crate::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline is {0:?}, start requires Stopped")]
    InvalidState(PipelineState),
}

struct Workers {
    acquire: JoinHandle<()>,
    convert: JoinHandle<()>,
}

pub struct Supervisor {
    state: PipelineState,
    slot: Arc<FrameSlot>,
    stop: Arc<AtomicBool>,
    workers: Option<Workers>,
    params: CaptureParams,
    period: Duration,
    take_timeout: Duration,
}

impl Supervisor {
    pub fn new(config: &Config) -> Self {
        Self {
            state: PipelineState::Stopped,
            slot: Arc::new(FrameSlot::new()),
            stop: Arc::new(AtomicBool::new(false)),
            workers: None,
            params: CaptureParams {
                exposure: Duration::from_micros(config.capture.exposure_us),
                sensitivity: config.capture.sensitivity,
            },
            period: Duration::from_millis(config.capture.period_ms),
            take_timeout: Duration::from_millis(config.pipeline.take_timeout_ms),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn slot(&self) -> &Arc<FrameSlot> {
        &self.slot
    }

    /// Bring up both worker contexts. Valid only from `Stopped`; must be
    /// called from within a tokio runtime.
    pub fn start(
        &mut self,
        session: Box<dyn CaptureSession>,
        completions: flume::Receiver<RawFrame>,
        surface: Box<dyn DrawSurface>,
    ) -> Result<(), PipelineError> {
        if self.state != PipelineState::Stopped {
            return Err(PipelineError::InvalidState(self.state));
        }
        self.state = PipelineState::Starting;
        self.stop.store(false, Ordering::Release);

        let acquire = tokio::spawn(
            AcquisitionLoop {
                session,
                completions,
                slot: Arc::clone(&self.slot),
                params: self.params,
                period: self.period,
                stop: Arc::clone(&self.stop),
            }
            .run(),
        );

        let convert_loop = ConvertLoop {
            slot: Arc::clone(&self.slot),
            converter: Converter::new(),
            surface,
            take_timeout: self.take_timeout,
            stop: Arc::clone(&self.stop),
        };
        let convert = tokio::task::spawn_blocking(move || convert_loop.run());

        self.workers = Some(Workers { acquire, convert });
        self.state = PipelineState::Running;
        info!(
            period_ms = self.period.as_millis() as u64,
            "pipeline running"
        );
        Ok(())
    }

    /// Signal both contexts, wait for them to terminate, then drain the
    /// slot. No-op unless `Running`.
    pub async fn stop(&mut self) {
        if self.state != PipelineState::Running {
            return;
        }
        self.state = PipelineState::Stopping;
        self.stop.store(true, Ordering::Release);

        if let Some(workers) = self.workers.take() {
            if let Err(e) = workers.acquire.await {
                error!(error = %e, "acquisition worker panicked");
            }
            if let Err(e) = workers.convert.await {
                error!(error = %e, "conversion worker panicked");
            }
        }

        if let Some(residual) = self.slot.drain() {
            debug!(sequence = residual.sequence(), "released residual frame");
            drop(residual);
        }

        let (published, taken, overwritten) = self.slot.stats();
        info!(published, taken, overwritten, "pipeline stopped");
        self.state = PipelineState::Stopped;
    }
}
