//! kiosk-hw — Hardware access for the kiosk sensing loop.
//!
//! Provides V4L2 camera capture (converted to grayscale) and the
//! line-oriented distance sensor feed from the proximity microcontroller.

pub mod camera;
pub mod frame;
pub mod sensor;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use sensor::{parse_distance_line, SensorError, SensorFeed};
