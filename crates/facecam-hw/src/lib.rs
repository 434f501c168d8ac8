//! facecam-hw: camera capture for the detection loop.
//!
//! Provides the [`VideoSource`] capability and a V4L2 implementation of it.

pub mod camera;
pub mod frame;
pub mod video;

pub use camera::{Camera, DeviceInfo, PixelFormat, V4lCameraProvider, DEFAULT_WARMUP_FRAMES};
pub use frame::Frame;
pub use video::{CameraProvider, CaptureError, Facing, StreamConstraints, VideoSource};
