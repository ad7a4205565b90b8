//! warden-hw: Hardware abstraction for colour camera capture.
//!
//! Provides V4L2-based camera access and the frame conversions needed to
//! hand a detector RGB input at the resolution it expects.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream, DeviceInfo, PixelFormat};
pub use frame::{ChannelOrder, Frame, FrameError};
