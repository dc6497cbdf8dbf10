// SPDX-License-Identifier: GPL-3.0-only

//! Frame grabber for Kinect-class structured-light cameras
//!
//! Streams color, infrared and depth frames from one device into a dataflow
//! graph. The hardware transport lives behind the [`driver`] traits; what
//! this crate owns is the stream-mode state machine: desired/actual state
//! reconciliation, the buffer reallocation policy, and the concurrency
//! contract between the capture loop thread and application-side
//! reconfiguration.
//!
//! # Architecture
//!
//! - [`types`]: formats, resolutions, mode tables, frames and consumers
//! - [`driver`]: trait boundary to the hardware transport
//! - [`buffer`]: hardware-sized frame buffers with allocation identity
//! - [`stream`]: per-stream desired/actual state and reconciliation
//! - [`device`]: consumer registry and frame routing for one device
//! - [`capture_loop`]: capture thread lifecycle with two-phase stop
//! - [`grabber`]: the public entry point tying it all together
//!
//! # Example
//!
//! ```ignore
//! use freenect_grabber::{FrameGrabber, SensorKind};
//!
//! let mut grabber = FrameGrabber::open(&mut driver, "")?;
//! grabber.set_consumer(SensorKind::Depth, consumer);
//! grabber.configure_stream(SensorKind::Depth, Some("mm"), Some("vga"))?;
//! grabber.start(SensorKind::Depth);
//! // frames arrive on the registered consumer until:
//! grabber.shutdown();
//! ```

pub mod buffer;
pub mod capture_loop;
pub mod device;
pub mod driver;
pub mod errors;
pub mod grabber;
pub mod stream;
pub mod types;

// Re-export commonly used types
pub use buffer::{BufferId, FrameBuffer, FrameSlot};
pub use capture_loop::{CaptureLoopController, LoopAction};
pub use device::Device;
pub use driver::{BufferHandle, CameraDriver, DriverEvent, DriverHandle};
pub use errors::{GrabberError, GrabberResult};
pub use grabber::FrameGrabber;
pub use types::{
    Calibration, DepthFormat, Frame, FrameConsumer, Resolution, SensorKind, StreamFamily,
    StreamFormat, StreamMode, VideoFormat,
};
