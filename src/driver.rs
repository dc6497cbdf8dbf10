// SPDX-License-Identifier: GPL-3.0-only

//! Trait boundary to the hardware transport
//!
//! The grabber core never talks USB itself. A driver binding (libfreenect
//! style) implements these traits; the core programs modes and buffers
//! through them and consumes completed-frame events. Tests substitute mock
//! implementations.

use std::time::Duration;

use crate::buffer::{BufferId, FrameSlot};
use crate::errors::GrabberResult;
use crate::types::{Calibration, StreamFamily, StreamMode};

/// What reconciliation programs into the hardware for one stream family
///
/// `id` travels back unchanged in every `DriverEvent` for this buffer, `len`
/// is the exact frame size the binding must write, and `slot` is where the
/// pixel bytes go. The binding must only lock the slot from within
/// `process_events`, between frames, never from `program` itself.
#[derive(Debug, Clone)]
pub struct BufferHandle {
    pub id: BufferId,
    pub len: usize,
    pub slot: FrameSlot,
}

/// Completed-frame notification raised from within `process_events`
///
/// Carries buffer identity only, not the frame: the pixel bytes are already
/// in the programmed slot. Because events surface synchronously from
/// `process_events`, delivery runs on the capture loop thread.
#[derive(Debug, Clone, Copy)]
pub struct DriverEvent {
    pub family: StreamFamily,
    pub buffer: BufferId,
    /// Raw device timestamp, driver-defined units
    pub timestamp: u32,
}

/// Driver context: device discovery and opening
pub trait CameraDriver {
    /// Serials of all connected devices, discovery order
    fn list_device_serials(&mut self) -> GrabberResult<Vec<String>>;

    /// Open one device by serial, claiming it exclusively
    fn open(&mut self, serial: &str) -> GrabberResult<Box<dyn DriverHandle>>;
}

/// Exclusive handle to one opened device
///
/// Implementors release the hardware on drop. Releasing while another thread
/// may still call `process_events` is undefined behavior at the transport
/// level; the grabber's shutdown protocol joins the capture loop first.
pub trait DriverHandle: Send {
    /// Factory calibration block of the opened device
    ///
    /// Copied out once right after open; the device exposes it read-only
    /// for the rest of its lifetime.
    fn calibration(&self) -> Calibration;

    /// Program mode descriptor and frame buffer for one stream family
    fn program(
        &mut self,
        family: StreamFamily,
        mode: StreamMode,
        buffer: BufferHandle,
    ) -> GrabberResult<()>;

    /// Start acquisition on a previously programmed family
    fn start(&mut self, family: StreamFamily) -> GrabberResult<()>;

    /// Stop acquisition; idempotent, safe to call on a stopped stream
    fn stop(&mut self, family: StreamFamily);

    /// Pump the driver event loop, blocking at most `timeout`
    ///
    /// Returns the completed-frame events that fired during the call. An
    /// `Err` is fatal to the capture loop.
    fn process_events(&mut self, timeout: Duration) -> GrabberResult<Vec<DriverEvent>>;
}
