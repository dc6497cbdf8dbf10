// SPDX-License-Identifier: GPL-3.0-only

//! Device: stream controllers, consumer registry and frame routing
//!
//! A `Device` owns the exclusive driver handle, the two stream controllers
//! and at most one registered consumer per sensor kind. The capture loop
//! drives it through [`Device::pump`]; application threads only touch the
//! desired state and the consumer registry.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::driver::{DriverEvent, DriverHandle};
use crate::errors::{GrabberError, GrabberResult};
use crate::stream::StreamController;
use crate::types::{
    Calibration, DepthFormat, Frame, FrameConsumer, Resolution, SensorKind, StreamFamily,
    StreamFormat, VideoFormat,
};

/// Preferred video formats remembered per logical sensor
///
/// The shared pipeline has one desired format at a time; these record what
/// each side last configured so `start` can program it.
#[derive(Debug, Clone, Copy)]
struct VideoPrefs {
    color: VideoFormat,
    ir: VideoFormat,
}

#[derive(Default)]
struct ConsumerTable {
    rgb: Option<Arc<dyn FrameConsumer>>,
    ir: Option<Arc<dyn FrameConsumer>>,
    depth: Option<Arc<dyn FrameConsumer>>,
}

impl ConsumerTable {
    fn slot_mut(&mut self, kind: SensorKind) -> &mut Option<Arc<dyn FrameConsumer>> {
        match kind {
            SensorKind::Rgb => &mut self.rgb,
            SensorKind::Ir => &mut self.ir,
            SensorKind::Depth => &mut self.depth,
        }
    }

    fn get(&self, kind: SensorKind) -> Option<Arc<dyn FrameConsumer>> {
        match kind {
            SensorKind::Rgb => self.rgb.clone(),
            SensorKind::Ir => self.ir.clone(),
            SensorKind::Depth => self.depth.clone(),
        }
    }
}

/// One opened camera unit
pub struct Device {
    serial: String,
    calibration: Calibration,
    handle: Mutex<Box<dyn DriverHandle>>,
    video: StreamController,
    depth: StreamController,
    consumers: Mutex<ConsumerTable>,
    video_prefs: Mutex<VideoPrefs>,
}

impl Device {
    pub fn new(handle: Box<dyn DriverHandle>, serial: String) -> Self {
        // Copied once here; the device never asks the driver again.
        let calibration = handle.calibration();
        Self {
            serial,
            calibration,
            handle: Mutex::new(handle),
            video: StreamController::new(StreamFamily::Video),
            depth: StreamController::new(StreamFamily::Depth),
            consumers: Mutex::new(ConsumerTable::default()),
            video_prefs: Mutex::new(VideoPrefs {
                color: VideoFormat::Rgb,
                ir: VideoFormat::Ir8Bit,
            }),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Factory calibration copied at open, read-only afterwards
    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    pub fn controller(&self, family: StreamFamily) -> &StreamController {
        match family {
            StreamFamily::Video => &self.video,
            StreamFamily::Depth => &self.depth,
        }
    }

    fn lock_handle(&self) -> MutexGuard<'_, Box<dyn DriverHandle>> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_prefs(&self) -> MutexGuard<'_, VideoPrefs> {
        self.video_prefs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bind a delivery consumer to a sensor kind, replacing any previous one
    pub fn set_consumer(&self, kind: SensorKind, consumer: Arc<dyn FrameConsumer>) {
        let mut table = self.consumers.lock().unwrap_or_else(|e| e.into_inner());
        *table.slot_mut(kind) = Some(consumer);
    }

    pub fn clear_consumer(&self, kind: SensorKind) {
        let mut table = self.consumers.lock().unwrap_or_else(|e| e.into_inner());
        *table.slot_mut(kind) = None;
    }

    /// Apply stream attributes from the dataflow configuration
    ///
    /// Both attributes are optional; present ones are parsed through the
    /// format tables. A format that does not belong to the sensor kind is
    /// rejected here, but a parseable mode the hardware cannot serve is
    /// accepted and degrades to the family default at reconcile time.
    pub fn configure_stream(
        &self,
        kind: SensorKind,
        format: Option<&str>,
        resolution: Option<&str>,
    ) -> GrabberResult<()> {
        let resolution = match resolution {
            Some(name) => Some(Resolution::from_name(name).ok_or_else(|| {
                GrabberError::InvalidAttribute(format!("unknown resolution {name:?}"))
            })?),
            None => None,
        };

        match kind {
            SensorKind::Rgb | SensorKind::Ir => {
                if let Some(name) = format {
                    let parsed = VideoFormat::from_name(name).ok_or_else(|| {
                        GrabberError::InvalidAttribute(format!("unknown video format {name:?}"))
                    })?;
                    let want_ir = kind == SensorKind::Ir;
                    if parsed.is_infrared() != want_ir {
                        return Err(GrabberError::InvalidAttribute(format!(
                            "format {} does not belong to sensor {kind}",
                            parsed.name()
                        )));
                    }
                    let mut prefs = self.lock_prefs();
                    if want_ir {
                        prefs.ir = parsed;
                    } else {
                        prefs.color = parsed;
                    }
                    // Retarget the live pipeline only if this side owns it
                    if self.video.desired_mode().format.is_infrared() == want_ir {
                        self.video.set_format(StreamFormat::Video(parsed));
                    }
                }
                if let Some(resolution) = resolution {
                    self.video.set_resolution(resolution);
                }
            }
            SensorKind::Depth => {
                if let Some(name) = format {
                    let parsed = DepthFormat::from_name(name).ok_or_else(|| {
                        GrabberError::InvalidAttribute(format!("unknown depth format {name:?}"))
                    })?;
                    self.depth.set_format(StreamFormat::Depth(parsed));
                }
                if let Some(resolution) = resolution {
                    self.depth.set_resolution(resolution);
                }
            }
        }
        Ok(())
    }

    /// Request a stream to run; takes effect at the next reconciliation
    ///
    /// Starting RGB or IR claims the shared video pipeline for that side.
    pub fn start(&self, kind: SensorKind) {
        match kind {
            SensorKind::Rgb => {
                let color = self.lock_prefs().color;
                self.video.start_with_format(StreamFormat::Video(color));
            }
            SensorKind::Ir => {
                let ir = self.lock_prefs().ir;
                self.video.start_with_format(StreamFormat::Video(ir));
            }
            SensorKind::Depth => self.depth.set_running(true),
        }
    }

    /// Request a stream to stop; takes effect at the next reconciliation
    ///
    /// A video-family stop only applies while that side owns the pipeline,
    /// so stopping RGB never tears down a live IR stream.
    pub fn stop(&self, kind: SensorKind) {
        match kind {
            SensorKind::Rgb => self.video.stop_when(|f| !f.is_infrared()),
            SensorKind::Ir => self.video.stop_when(|f| f.is_infrared()),
            SensorKind::Depth => self.depth.set_running(false),
        }
    }

    /// Whether acquisition for this sensor is currently running in hardware
    pub fn is_running(&self, kind: SensorKind) -> bool {
        match kind {
            SensorKind::Rgb | SensorKind::Ir => {
                let want_ir = kind == SensorKind::Ir;
                self.video.actual_running()
                    && self
                        .video
                        .actual_mode()
                        .is_some_and(|m| m.format.is_infrared() == want_ir)
            }
            SensorKind::Depth => self.depth.actual_running(),
        }
    }

    /// One capture-loop iteration: pump events, route frames, reconcile
    ///
    /// Runs on the capture loop thread only. An event-processing failure is
    /// returned to the caller and must terminate the loop.
    pub fn pump(&self, timeout: Duration) -> GrabberResult<()> {
        let mut handle = self.lock_handle();
        let events = handle.process_events(timeout)?;
        for event in events {
            self.route(event);
        }
        self.video.reconcile(handle.as_mut());
        self.depth.reconcile(handle.as_mut());
        Ok(())
    }

    /// Route one completed-frame notification to its registered consumer
    ///
    /// The video callback is classified as color or infrared from the
    /// current buffer format, since both share one physical pipeline. A
    /// buffer identity that no longer matches the current allocation raced
    /// a reconfiguration; the frame is counted and dropped, never an error.
    fn route(&self, event: DriverEvent) {
        let controller = self.controller(event.family);
        let frame = {
            let slot = controller.slot().lock();
            match slot.as_ref() {
                Some(buffer) if buffer.id() == event.buffer => {
                    let mode = buffer.mode();
                    let Some((width, height)) = mode.dims() else {
                        // Allocation guarantees dims; treat a miss as stale.
                        controller.note_dropped_frame();
                        return;
                    };
                    Frame {
                        data: Arc::from(buffer.data()),
                        format: mode.format,
                        width,
                        height,
                        captured_at: Instant::now(),
                        driver_timestamp: event.timestamp,
                    }
                }
                _ => {
                    controller.note_dropped_frame();
                    debug!(
                        family = %event.family,
                        buffer = %event.buffer,
                        "dropping frame for stale buffer identity"
                    );
                    return;
                }
            }
            // Slot lock released here; delivery happens outside it.
        };

        let kind = match event.family {
            StreamFamily::Depth => SensorKind::Depth,
            StreamFamily::Video if frame.format.is_infrared() => SensorKind::Ir,
            StreamFamily::Video => SensorKind::Rgb,
        };
        let consumer = {
            let table = self.consumers.lock().unwrap_or_else(|e| e.into_inner());
            table.get(kind)
        };
        // No subscriber for this sensor: drop silently, not an error.
        if let Some(consumer) = consumer {
            consumer.deliver(frame);
        }
    }

    /// Shutdown-path hardware stop for both families
    ///
    /// Must only be called after the capture loop has been joined; the
    /// driver handle is not safe against concurrent event processing.
    pub fn stop_streams(&self) {
        let mut handle = self.lock_handle();
        self.video.halt(handle.as_mut());
        self.depth.halt(handle.as_mut());
    }
}
