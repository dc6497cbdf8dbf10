// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for the frame grabber
//!
//! Formats, resolutions and mode descriptors mirror what the Kinect-class
//! hardware actually exposes. The name/enum mappings are plain match tables,
//! initialized in code and queried read-only; there is no mutable global
//! format registry.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Logical sensor a dataflow consumer subscribes to
///
/// `Rgb` and `Ir` share one physical video pipeline and are mutually
/// exclusive at any instant; `Depth` is independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorKind {
    Rgb,
    Ir,
    Depth,
}

impl SensorKind {
    /// The physical stream family this sensor is carried on
    pub fn family(&self) -> StreamFamily {
        match self {
            SensorKind::Rgb | SensorKind::Ir => StreamFamily::Video,
            SensorKind::Depth => StreamFamily::Depth,
        }
    }

    /// Parse a sensor kind from a dataflow attribute value
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "rgb" | "color" | "image" => Some(SensorKind::Rgb),
            "ir" | "infrared" => Some(SensorKind::Ir),
            "depth" => Some(SensorKind::Depth),
            _ => None,
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorKind::Rgb => write!(f, "rgb"),
            SensorKind::Ir => write!(f, "ir"),
            SensorKind::Depth => write!(f, "depth"),
        }
    }
}

/// Physical acquisition pipeline on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamFamily {
    /// Shared color/infrared pipeline
    Video,
    /// Depth pipeline
    Depth,
}

impl StreamFamily {
    /// Documented safe default mode for this family
    ///
    /// Reconciliation falls back to this when a requested mode is not
    /// supported by the hardware.
    pub fn default_mode(&self) -> StreamMode {
        match self {
            StreamFamily::Video => StreamMode {
                format: StreamFormat::Video(VideoFormat::Rgb),
                resolution: Resolution::Medium,
            },
            StreamFamily::Depth => StreamMode {
                format: StreamFormat::Depth(DepthFormat::Mm),
                resolution: Resolution::Medium,
            },
        }
    }
}

impl std::fmt::Display for StreamFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamFamily::Video => write!(f, "video"),
            StreamFamily::Depth => write!(f, "depth"),
        }
    }
}

/// Video pipeline pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoFormat {
    /// 24-bit RGB, demosaiced by the device
    Rgb,
    /// Raw 8-bit Bayer pattern from the color sensor
    Bayer,
    /// ISP-processed packed YUV 4:2:2
    YuvRaw,
    /// 8-bit infrared
    Ir8Bit,
    /// 10-bit infrared in 16-bit containers
    Ir10Bit,
}

impl VideoFormat {
    /// Parse a video format from a dataflow attribute value
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "rgb" => Some(VideoFormat::Rgb),
            "bayer" | "grbg" => Some(VideoFormat::Bayer),
            "yuv" | "uyvy" => Some(VideoFormat::YuvRaw),
            "ir8" | "ir_8bit" => Some(VideoFormat::Ir8Bit),
            "ir10" | "ir_10bit" => Some(VideoFormat::Ir10Bit),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VideoFormat::Rgb => "rgb",
            VideoFormat::Bayer => "bayer",
            VideoFormat::YuvRaw => "yuv",
            VideoFormat::Ir8Bit => "ir8",
            VideoFormat::Ir10Bit => "ir10",
        }
    }

    /// True for the infrared half of the shared video pipeline
    pub fn is_infrared(&self) -> bool {
        matches!(self, VideoFormat::Ir8Bit | VideoFormat::Ir10Bit)
    }

    /// Bytes per pixel as delivered by the hardware
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            VideoFormat::Rgb => 3,
            VideoFormat::Bayer => 1,
            VideoFormat::YuvRaw => 2,
            VideoFormat::Ir8Bit => 1,
            VideoFormat::Ir10Bit => 2,
        }
    }
}

/// Depth pipeline pixel format, always 16-bit containers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepthFormat {
    /// Depth in millimeters
    Mm,
    /// Depth in millimeters, registered to the color image
    Registered,
    /// Raw 11-bit disparity
    Raw11Bit,
    /// Raw 10-bit disparity
    Raw10Bit,
}

impl DepthFormat {
    /// Parse a depth format from a dataflow attribute value
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "mm" => Some(DepthFormat::Mm),
            "registered" => Some(DepthFormat::Registered),
            "raw11" | "11bit" => Some(DepthFormat::Raw11Bit),
            "raw10" | "10bit" => Some(DepthFormat::Raw10Bit),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DepthFormat::Mm => "mm",
            DepthFormat::Registered => "registered",
            DepthFormat::Raw11Bit => "raw11",
            DepthFormat::Raw10Bit => "raw10",
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        2
    }
}

/// Acquisition resolution tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    /// 320x240 (QVGA)
    Low,
    /// 640x480 (VGA)
    Medium,
    /// 1280x1024 (SXGA)
    High,
}

impl Resolution {
    /// Parse a resolution from a dataflow attribute value
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "low" | "qvga" | "320x240" => Some(Resolution::Low),
            "medium" | "vga" | "640x480" => Some(Resolution::Medium),
            "high" | "sxga" | "1280x1024" => Some(Resolution::High),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Resolution::Low => "low",
            Resolution::Medium => "medium",
            Resolution::High => "high",
        }
    }
}

/// Pixel format of either stream family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamFormat {
    Video(VideoFormat),
    Depth(DepthFormat),
}

impl StreamFormat {
    pub fn family(&self) -> StreamFamily {
        match self {
            StreamFormat::Video(_) => StreamFamily::Video,
            StreamFormat::Depth(_) => StreamFamily::Depth,
        }
    }

    /// True for infrared video payloads; depth formats are never infrared
    pub fn is_infrared(&self) -> bool {
        matches!(self, StreamFormat::Video(f) if f.is_infrared())
    }

    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            StreamFormat::Video(f) => f.bytes_per_pixel(),
            StreamFormat::Depth(f) => f.bytes_per_pixel(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StreamFormat::Video(f) => f.name(),
            StreamFormat::Depth(f) => f.name(),
        }
    }
}

impl std::fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Hardware mode descriptor: what gets programmed into the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamMode {
    pub format: StreamFormat,
    pub resolution: Resolution,
}

impl StreamMode {
    pub fn family(&self) -> StreamFamily {
        self.format.family()
    }

    /// Pixel dimensions for this mode, `None` if the hardware has no such mode
    ///
    /// The infrared sensor delivers eight extra rows at VGA (640x488), a
    /// hardware quirk of the Kinect IR readout.
    pub fn dims(&self) -> Option<(u32, u32)> {
        match (self.format, self.resolution) {
            (StreamFormat::Video(f), Resolution::Medium) if f.is_infrared() => Some((640, 488)),
            (StreamFormat::Video(VideoFormat::Rgb), Resolution::Medium)
            | (StreamFormat::Video(VideoFormat::Bayer), Resolution::Medium)
            | (StreamFormat::Video(VideoFormat::YuvRaw), Resolution::Medium) => Some((640, 480)),
            (StreamFormat::Video(VideoFormat::Rgb), Resolution::High)
            | (StreamFormat::Video(VideoFormat::Bayer), Resolution::High)
            | (StreamFormat::Video(VideoFormat::Ir10Bit), Resolution::High) => Some((1280, 1024)),
            // YuvRaw and Ir8Bit exist at VGA only; nothing streams at QVGA
            (StreamFormat::Depth(_), Resolution::Medium) => Some((640, 480)),
            _ => None,
        }
    }

    /// Required buffer length in bytes, `None` for unsupported mode pairs
    pub fn frame_bytes(&self) -> Option<usize> {
        let (w, h) = self.dims()?;
        Some(w as usize * h as usize * self.format.bytes_per_pixel())
    }

    /// True when the hardware supports this (format, resolution) pair
    pub fn is_supported(&self) -> bool {
        self.dims().is_some()
    }
}

impl std::fmt::Display for StreamMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.format.name(), self.resolution.name())
    }
}

/// Factory calibration block copied from the device at open time
///
/// Read-only after open. The grabber does not do registration math itself;
/// it carries these constants so a downstream point-cloud or registration
/// stage does not have to reopen the device. Distances are in the units the
/// hardware reports them in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// IR emitter to depth sensor distance, centimeters
    pub emitter_to_depth_cm: f32,
    /// Depth sensor to color sensor distance, centimeters
    pub depth_to_rgb_cm: f32,
    /// Reference plane distance used by the disparity model, millimeters
    pub reference_distance_mm: f32,
    /// Pixel size at the reference plane, millimeters
    pub reference_pixel_size_mm: f32,
}

impl Calibration {
    /// Stereo baseline between emitter and depth sensor, meters
    pub fn baseline_m(&self) -> f32 {
        0.01 * self.emitter_to_depth_cm
    }
}

/// A single validated frame handed to a registered consumer
///
/// Carries the raw hardware pixel bytes plus the metadata a downstream image
/// container needs to interpret them. Any channel reordering or bit-depth
/// expansion is the consumer's job; the grabber's obligation ends here.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw pixel bytes, exactly `width * height * bytes_per_pixel` long
    pub data: Arc<[u8]>,
    /// Pixel format of `data`
    pub format: StreamFormat,
    pub width: u32,
    pub height: u32,
    /// Host timestamp taken when the driver reported the frame complete
    pub captured_at: Instant,
    /// Raw device timestamp as reported by the driver
    pub driver_timestamp: u32,
}

impl Frame {
    pub fn bytes(&self) -> usize {
        self.data.len()
    }
}

/// Per-sensor delivery capability registered by the dataflow runtime
///
/// The device holds at most one consumer per sensor kind, as a non-owning
/// `Arc` whose lifetime the runtime manages. `deliver` runs on the capture
/// loop thread and must not block meaningfully; it may copy the data onward.
pub trait FrameConsumer: Send + Sync {
    fn deliver(&self, frame: Frame);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_kind_families() {
        assert_eq!(SensorKind::Rgb.family(), StreamFamily::Video);
        assert_eq!(SensorKind::Ir.family(), StreamFamily::Video);
        assert_eq!(SensorKind::Depth.family(), StreamFamily::Depth);
    }

    #[test]
    fn test_sensor_kind_attribute_aliases() {
        assert_eq!(SensorKind::from_name("color"), Some(SensorKind::Rgb));
        assert_eq!(SensorKind::from_name("Infrared"), Some(SensorKind::Ir));
        assert_eq!(SensorKind::from_name("depth"), Some(SensorKind::Depth));
        assert_eq!(SensorKind::from_name("thermal"), None);
    }

    #[test]
    fn test_format_name_round_trip() {
        for f in [
            VideoFormat::Rgb,
            VideoFormat::Bayer,
            VideoFormat::YuvRaw,
            VideoFormat::Ir8Bit,
            VideoFormat::Ir10Bit,
        ] {
            assert_eq!(VideoFormat::from_name(f.name()), Some(f));
        }
        for f in [
            DepthFormat::Mm,
            DepthFormat::Registered,
            DepthFormat::Raw11Bit,
            DepthFormat::Raw10Bit,
        ] {
            assert_eq!(DepthFormat::from_name(f.name()), Some(f));
        }
        assert_eq!(VideoFormat::from_name("nonsense"), None);
        assert_eq!(DepthFormat::from_name(""), None);
    }

    #[test]
    fn test_resolution_aliases() {
        assert_eq!(Resolution::from_name("VGA"), Some(Resolution::Medium));
        assert_eq!(Resolution::from_name("640x480"), Some(Resolution::Medium));
        assert_eq!(Resolution::from_name("sxga"), Some(Resolution::High));
        assert_eq!(Resolution::from_name("8k"), None);
    }

    #[test]
    fn test_frame_bytes_table() {
        let rgb_vga = StreamMode {
            format: StreamFormat::Video(VideoFormat::Rgb),
            resolution: Resolution::Medium,
        };
        assert_eq!(rgb_vga.frame_bytes(), Some(640 * 480 * 3));

        // IR at VGA has the 488-row readout quirk
        let ir_vga = StreamMode {
            format: StreamFormat::Video(VideoFormat::Ir8Bit),
            resolution: Resolution::Medium,
        };
        assert_eq!(ir_vga.frame_bytes(), Some(640 * 488));

        let ir10_high = StreamMode {
            format: StreamFormat::Video(VideoFormat::Ir10Bit),
            resolution: Resolution::High,
        };
        assert_eq!(ir10_high.frame_bytes(), Some(1280 * 1024 * 2));

        let depth_vga = StreamMode {
            format: StreamFormat::Depth(DepthFormat::Mm),
            resolution: Resolution::Medium,
        };
        assert_eq!(depth_vga.frame_bytes(), Some(640 * 480 * 2));
    }

    #[test]
    fn test_unsupported_modes_have_no_size() {
        // Nothing streams at QVGA
        for format in [
            StreamFormat::Video(VideoFormat::Rgb),
            StreamFormat::Video(VideoFormat::Ir8Bit),
            StreamFormat::Depth(DepthFormat::Mm),
        ] {
            let mode = StreamMode {
                format,
                resolution: Resolution::Low,
            };
            assert_eq!(mode.frame_bytes(), None, "{mode} should be unsupported");
        }
        // Depth exists at VGA only
        let depth_high = StreamMode {
            format: StreamFormat::Depth(DepthFormat::Registered),
            resolution: Resolution::High,
        };
        assert!(!depth_high.is_supported());
        // 8-bit IR has no high-res readout
        let ir8_high = StreamMode {
            format: StreamFormat::Video(VideoFormat::Ir8Bit),
            resolution: Resolution::High,
        };
        assert!(!ir8_high.is_supported());
    }

    #[test]
    fn test_default_modes_are_supported() {
        assert!(StreamFamily::Video.default_mode().is_supported());
        assert!(StreamFamily::Depth.default_mode().is_supported());
    }

    #[test]
    fn test_mode_descriptor_serde_round_trip() {
        let mode = StreamMode {
            format: StreamFormat::Video(VideoFormat::Ir10Bit),
            resolution: Resolution::High,
        };
        let json = serde_json::to_string(&mode).expect("serialize");
        let back: StreamMode = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, mode);
    }
}
