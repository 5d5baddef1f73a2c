pub mod frame;
pub mod session;
pub mod synthetic;
pub mod v4l2;

pub use frame::{CfaPattern, FrameReader, RawFrame};
pub use session::{CaptureError, CaptureParams, CaptureSession};
pub use synthetic::SyntheticSession;
pub use v4l2::V4l2Session;
