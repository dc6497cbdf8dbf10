// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the frame grabber

use crate::types::StreamMode;

/// Result type alias using GrabberError
pub type GrabberResult<T> = Result<T, GrabberError>;

/// Error taxonomy of the grabber core
///
/// Only two classes ever reach the owner of a running grabber: construction
/// failures from `open`, and `EventLoop` through the failure slot.
/// `UnsupportedMode` is recovered inside reconciliation and never escapes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrabberError {
    /// No camera devices present at all
    NoDeviceFound,
    /// A specific serial was requested but is not connected
    SerialNotFound(String),
    /// The driver failed to open the device
    DeviceOpen(String),
    /// Requested (format, resolution) pair is not in the hardware mode table
    UnsupportedMode(StreamMode),
    /// A stream attribute value could not be parsed or names a format that
    /// does not belong to the configured sensor kind
    InvalidAttribute(String),
    /// The event-processing primitive failed; fatal to the capture loop
    EventLoop(String),
    /// Mode programming or stream start rejected by the driver
    Driver(String),
}

impl std::fmt::Display for GrabberError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GrabberError::NoDeviceFound => write!(f, "no camera devices found"),
            GrabberError::SerialNotFound(serial) => {
                write!(f, "no camera with serial {serial}")
            }
            GrabberError::DeviceOpen(msg) => write!(f, "failed to open device: {msg}"),
            GrabberError::UnsupportedMode(mode) => {
                write!(f, "unsupported stream mode {mode}")
            }
            GrabberError::InvalidAttribute(msg) => {
                write!(f, "invalid stream attribute: {msg}")
            }
            GrabberError::EventLoop(msg) => write!(f, "event processing failed: {msg}"),
            GrabberError::Driver(msg) => write!(f, "driver error: {msg}"),
        }
    }
}

impl std::error::Error for GrabberError {}
