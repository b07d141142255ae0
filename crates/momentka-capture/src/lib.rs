//! momentka-capture — Webcam capture for reference selfies.
//!
//! Provides V4L2-based camera access that hands back RGB frames ready for
//! the face pipeline, with dark-frame filtering for covered lenses.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::CapturedFrame;
