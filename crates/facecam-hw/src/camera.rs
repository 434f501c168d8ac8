//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::video::{CameraProvider, CaptureError, Facing, StreamConstraints, VideoSource};
use std::io;
use std::path::Path;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel).
    Grey,
    /// 16-bit little-endian grayscale (2 bytes/pixel).
    Y16,
}

/// Frames discarded after stream-on while auto exposure settles.
pub const DEFAULT_WARMUP_FRAMES: usize = 4;

/// V4L2 camera device handle.
///
/// The mmap stream is started once and kept for the camera's lifetime, so a
/// capture is a single dequeue.
pub struct Camera {
    // Declared before `device` so the stream is turned off first on drop.
    stream: Option<MmapStream<'static>>,
    /// `None` once the tracks have been stopped.
    device: Option<Device>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

/// Map an OS error from opening or configuring the device.
fn classify_io_error(device_path: &str, e: &io::Error) -> CaptureError {
    match e.raw_os_error() {
        Some(libc::EACCES) | Some(libc::EPERM) => {
            CaptureError::PermissionDenied(format!("{device_path}: {e}"))
        }
        Some(libc::EBUSY) => CaptureError::DeviceUnavailable(format!("{device_path}: device busy")),
        _ => CaptureError::DeviceUnavailable(format!("{device_path}: {e}")),
    }
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str, constraints: &StreamConstraints) -> Result<Self, CaptureError> {
        if !Path::new(device_path).exists() {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{device_path}: no such device"
            )));
        }

        let device =
            Device::with_path(device_path).map_err(|e| classify_io_error(device_path, &e))?;

        let caps = device.query_caps().map_err(|e| {
            CaptureError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{device_path}: not a video capture device"
            )));
        }

        if constraints.facing != Facing::User {
            // V4L2 exposes no facing metadata; the configured device decides.
            tracing::debug!(facing = ?constraints.facing, "facing preference ignored for V4L2");
        }

        let mut fmt = device.format().map_err(|e| {
            CaptureError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = constraints.ideal_width;
        fmt.height = constraints.ideal_height;

        let negotiated = device.set_format(&fmt).map_err(|e| match e.raw_os_error() {
            Some(libc::EBUSY) | Some(libc::EACCES) | Some(libc::EPERM) => {
                classify_io_error(device_path, &e)
            }
            _ => CaptureError::FormatNegotiationFailed(format!("failed to set format: {e}")),
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            PixelFormat::Y16
        } else {
            return Err(CaptureError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or Y16)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            stream: None,
            device: Some(device),
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Start streaming and discard `warmup_frames` frames so auto exposure
    /// and gain settle before the first real capture.
    pub fn start_stream(&mut self, warmup_frames: usize) -> Result<(), CaptureError> {
        self.stream_mut()?;
        if warmup_frames > 0 {
            tracing::info!(count = warmup_frames, "discarding warmup frames");
            for _ in 0..warmup_frames {
                let _ = self.capture();
            }
        }
        Ok(())
    }

    fn stream_mut(&mut self) -> Result<&mut MmapStream<'static>, CaptureError> {
        let device = self.device.as_ref().ok_or(CaptureError::Stopped)?;
        if self.stream.is_none() {
            let stream = MmapStream::with_buffers(device, BufType::VideoCapture, 4).map_err(|e| {
                CaptureError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;
            self.stream = Some(stream);
        }
        self.stream.as_mut().ok_or(CaptureError::Stopped)
    }

    /// Dequeue the next frame, converting to grayscale.
    pub fn capture(&mut self) -> Result<Frame, CaptureError> {
        let (width, height, pixel_format) = (self.width, self.height, self.pixel_format);
        let stream = self.stream_mut()?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CaptureError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let gray = match pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, width, height),
            PixelFormat::Grey => frame::grey_to_grayscale(buf, width, height),
            PixelFormat::Y16 => frame::y16_to_grayscale(buf, width, height),
        }
        .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;

        Ok(Frame {
            data: gray,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence: meta.sequence,
        })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl VideoSource for Camera {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
        self.capture()
    }

    fn stop_tracks(&mut self) {
        self.stream = None;
        if self.device.take().is_some() {
            tracing::info!(device = %self.device_path, "camera released");
        }
    }

    fn is_live(&self) -> bool {
        self.device.is_some()
    }
}

/// Opens the configured V4L2 device for each new session.
pub struct V4lCameraProvider {
    device_path: String,
    warmup_frames: usize,
}

impl V4lCameraProvider {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            warmup_frames: DEFAULT_WARMUP_FRAMES,
        }
    }

    pub fn with_warmup_frames(mut self, warmup_frames: usize) -> Self {
        self.warmup_frames = warmup_frames;
        self
    }
}

impl CameraProvider for V4lCameraProvider {
    fn acquire(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<Box<dyn VideoSource>, CaptureError> {
        let mut camera = Camera::open(&self.device_path, constraints)?;
        camera.start_stream(self.warmup_frames)?;
        Ok(Box::new(camera))
    }
}
