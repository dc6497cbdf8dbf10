// SPDX-License-Identifier: GPL-3.0-only

//! Top-level frame grabber: one device plus its capture loop
//!
//! `FrameGrabber` is what the dataflow runtime holds. It opens a device by
//! serial, spawns the capture loop that pumps driver events and reconciles
//! stream state, and owns the shutdown protocol.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{error, info};

use crate::capture_loop::{CaptureLoopController, LoopAction};
use crate::device::Device;
use crate::driver::CameraDriver;
use crate::errors::{GrabberError, GrabberResult};
use crate::types::{Calibration, FrameConsumer, SensorKind};

/// Bound on each driver event-processing call
///
/// Short enough that stop requests and pending reconfiguration are observed
/// promptly; a stop is honored within roughly one timeout period.
const EVENT_TIMEOUT: Duration = Duration::from_millis(10);

/// One opened camera unit with its running capture loop
pub struct FrameGrabber {
    device: Arc<Device>,
    capture_loop: Option<CaptureLoopController>,
    failure: Arc<Mutex<Option<GrabberError>>>,
}

impl std::fmt::Debug for FrameGrabber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameGrabber").finish_non_exhaustive()
    }
}

impl FrameGrabber {
    /// Open a device and start its capture loop
    ///
    /// An empty `serial` selects the first device discovered. The capture
    /// loop starts immediately; no frames flow until a stream is started.
    pub fn open(driver: &mut dyn CameraDriver, serial: &str) -> GrabberResult<Self> {
        let serials = driver.list_device_serials()?;
        if serials.is_empty() {
            return Err(GrabberError::NoDeviceFound);
        }
        let target = if serial.is_empty() {
            serials[0].clone()
        } else if serials.iter().any(|s| s == serial) {
            serial.to_string()
        } else {
            return Err(GrabberError::SerialNotFound(serial.to_string()));
        };

        let handle = driver.open(&target)?;
        info!(serial = %target, "opened camera device");
        let device = Arc::new(Device::new(handle, target));

        let failure = Arc::new(Mutex::new(None));
        let loop_device = Arc::clone(&device);
        let loop_failure = Arc::clone(&failure);
        let capture_loop = CaptureLoopController::start("freenect-capture", move || {
            match loop_device.pump(EVENT_TIMEOUT) {
                Ok(()) => LoopAction::Continue,
                Err(err) => {
                    error!(error = %err, "capture loop terminated");
                    *loop_failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(err);
                    LoopAction::Stop
                }
            }
        });

        Ok(Self {
            device,
            capture_loop: Some(capture_loop),
            failure,
        })
    }

    pub fn serial(&self) -> &str {
        self.device.serial()
    }

    /// Factory calibration of the opened device; see [`Device::calibration`]
    pub fn calibration(&self) -> Calibration {
        self.device.calibration()
    }

    /// Bind a delivery consumer to a sensor kind
    pub fn set_consumer(&self, kind: SensorKind, consumer: Arc<dyn FrameConsumer>) {
        self.device.set_consumer(kind, consumer);
    }

    pub fn clear_consumer(&self, kind: SensorKind) {
        self.device.clear_consumer(kind);
    }

    /// Apply stream attributes; see [`Device::configure_stream`]
    pub fn configure_stream(
        &self,
        kind: SensorKind,
        format: Option<&str>,
        resolution: Option<&str>,
    ) -> GrabberResult<()> {
        self.device.configure_stream(kind, format, resolution)
    }

    /// Request a stream to run; applied by the next reconciliation
    pub fn start(&self, kind: SensorKind) {
        self.device.start(kind);
    }

    /// Request a stream to stop; applied by the next reconciliation
    pub fn stop(&self, kind: SensorKind) {
        self.device.stop(kind);
    }

    /// Whether this sensor's acquisition is currently running in hardware
    pub fn is_running(&self, kind: SensorKind) -> bool {
        self.device.is_running(kind)
    }

    /// True while the sensor's family runs in the fallback mode because the
    /// requested mode was unsupported
    pub fn is_degraded(&self, kind: SensorKind) -> bool {
        self.device.controller(kind.family()).is_degraded()
    }

    /// Frames dropped on this sensor's family due to stale buffer identity
    pub fn dropped_frames(&self, kind: SensorKind) -> u64 {
        self.device.controller(kind.family()).dropped_frames()
    }

    /// Whether the capture loop thread is still alive
    pub fn is_alive(&self) -> bool {
        self.capture_loop.as_ref().is_some_and(|l| l.is_running())
    }

    /// The error that terminated the capture loop, if it died
    ///
    /// Event-loop failures do not panic and are not silently swallowed;
    /// they land here for the owner to decide whether to reopen the device.
    pub fn failure(&self) -> Option<GrabberError> {
        self.failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Tear the grabber down in the required order
    ///
    /// Signal the capture loop, join its thread, then stop both hardware
    /// streams and release the buffers. The driver handle itself is
    /// released when the grabber is dropped. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(mut capture_loop) = self.capture_loop.take() {
            capture_loop.stop();
            self.device.stop_streams();
            info!(serial = %self.device.serial(), "frame grabber shut down");
        }
    }
}

impl Drop for FrameGrabber {
    fn drop(&mut self) {
        self.shutdown();
    }
}
