use kiosk_hw::{Camera, CameraError, Frame, SensorFeed};

/// A distance reading source. `None` means no usable reading this cycle.
pub trait DistanceSource: Send {
    fn poll(&mut self) -> Option<f32>;
}

impl DistanceSource for SensorFeed {
    fn poll(&mut self) -> Option<f32> {
        SensorFeed::poll(self)
    }
}

/// An open capture device.
pub trait FrameSource {
    fn capture(&mut self) -> Result<Frame, CameraError>;
}

impl FrameSource for Camera {
    fn capture(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }
}

/// Opens the capture device on demand.
pub trait DeviceFactory: Send {
    type Device: FrameSource;
    fn open(&mut self) -> Result<Self::Device, CameraError>;
}

pub struct CameraFactory {
    device_path: String,
}

impl CameraFactory {
    pub fn new(device_path: String) -> Self {
        Self { device_path }
    }
}

impl DeviceFactory for CameraFactory {
    type Device = Camera;

    fn open(&mut self) -> Result<Camera, CameraError> {
        Camera::open(&self.device_path)
    }
}

pub struct ProximityGate<S, F: DeviceFactory> {
    sensor: S,
    factory: F,
    device: Option<F::Device>,
    threshold_cm: f32,
}

impl<S: DistanceSource, F: DeviceFactory> ProximityGate<S, F> {
    pub fn new(sensor: S, factory: F, threshold_cm: f32) -> Self {
        Self {
            sensor,
            factory,
            device: None,
            threshold_cm,
        }
    }

    /// Read the sensor once and open or release the device to match.
    ///
    /// An in-range reading opens the device if it is closed. An
    /// out-of-range or missing reading releases it. A failed open is
    /// logged and retried on the next in-range reading.
    pub fn poll(&mut self) -> Option<f32> {
        let reading = self.sensor.poll();
        match reading {
            Some(distance) if distance < self.threshold_cm => {
                if self.device.is_none() {
                    match self.factory.open() {
                        Ok(device) => {
                            tracing::info!(distance, "customer in range; capture active");
                            self.device = Some(device);
                        }
                        Err(e) => tracing::warn!(error = %e, "camera open failed"),
                    }
                }
            }
            _ => {
                if self.device.take().is_some() {
                    tracing::info!(distance = ?reading, "no one in range; capture idle");
                }
            }
        }
        reading
    }

    /// The open device, if capture is active.
    pub fn device(&mut self) -> Option<&mut F::Device> {
        self.device.as_mut()
    }

    pub fn is_active(&self) -> bool {
        self.device.is_some()
    }
}
