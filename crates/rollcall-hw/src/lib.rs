//! rollcall-hw: V4L2 webcam capture.
//!
//! Provides V4L2-based camera access and colour frame conversion.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream, DeviceInfo, PixelFormat};
pub use frame::{ChannelOrder, Frame, FrameError};
