//! Capture session boundary.
//!
//! A session is capture-capable by construction: device open and stream
//! configuration happen in the backend constructors, so a `CaptureSession`
//! in hand means requests can be issued. Completed frames are delivered
//! through the completion channel registered at construction time, not
//! returned from `capture`.

use std::time::Duration;

use thiserror::Error;

/// Fixed manual-exposure parameters applied to every capture request.
#[derive(Debug, Clone, Copy)]
pub struct CaptureParams {
    pub exposure: Duration,
    pub sensitivity: u32,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    /// A single request failed or was dropped by the device. Transient;
    /// the acquisition cadence continues.
    #[error("capture request failed: {0}")]
    Request(String),

    /// The device or the completion consumer is gone. The acquisition loop
    /// stops issuing requests.
    #[error("capture source disconnected")]
    Disconnected,
}

/// Fire-and-forget capture request issuer.
pub trait CaptureSession: Send {
    fn capture(&mut self, params: &CaptureParams) -> Result<(), CaptureError>;
}
