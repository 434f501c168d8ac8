//! The video source capability the capture loop depends on.

use crate::frame::Frame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("video source stopped")]
    Stopped,
}

/// Which way the requested camera should face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    User,
    Environment,
}

/// Requested stream shape. Sizes are preferences; the device may negotiate
/// something else, reported by [`VideoSource::resolution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConstraints {
    pub facing: Facing,
    pub ideal_width: u32,
    pub ideal_height: u32,
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self {
            facing: Facing::User,
            ideal_width: 640,
            ideal_height: 480,
        }
    }
}

/// A live camera stream.
pub trait VideoSource: Send {
    /// Native (negotiated) frame size.
    fn resolution(&self) -> (u32, u32);

    /// Grab the current frame as grayscale.
    fn capture_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Release the camera hardware. Idempotent; later captures fail with
    /// [`CaptureError::Stopped`].
    fn stop_tracks(&mut self);

    fn is_live(&self) -> bool;
}

/// Hands out video sources, e.g. by opening a camera device.
pub trait CameraProvider: Send + Sync {
    fn acquire(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<Box<dyn VideoSource>, CaptureError>;
}
