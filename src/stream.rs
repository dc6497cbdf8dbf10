// SPDX-License-Identifier: GPL-3.0-only

//! Per-stream desired/actual state tracking and reconciliation
//!
//! One controller exists for the shared color/IR video pipeline and one for
//! depth. Application threads write the desired state under its own lock;
//! only the capture loop thread runs `reconcile`, which converges the
//! hardware to the desired state with a stop/reallocate/reprogram/restart
//! cycle when anything diverged.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, error, warn};

use crate::buffer::{FrameBuffer, FrameSlot};
use crate::driver::{BufferHandle, DriverHandle};
use crate::types::{Resolution, StreamFamily, StreamFormat, StreamMode};

/// Target configuration requested by the application
#[derive(Debug, Clone, Copy)]
struct DesiredState {
    running: bool,
    mode: StreamMode,
}

/// Desired/actual state for one physical stream
///
/// Locking discipline: the desired state has its own lock so that
/// application-side reconfiguration never blocks on a frame currently being
/// delivered out of the buffer slot, and vice versa. `actual_running` and
/// `degraded` are plain flags mutated only by the capture loop thread.
pub struct StreamController {
    family: StreamFamily,
    desired: Mutex<DesiredState>,
    slot: FrameSlot,
    actual_running: AtomicBool,
    degraded: AtomicBool,
    dropped_frames: AtomicU64,
}

impl StreamController {
    pub fn new(family: StreamFamily) -> Self {
        Self {
            family,
            desired: Mutex::new(DesiredState {
                running: false,
                mode: family.default_mode(),
            }),
            slot: FrameSlot::new(),
            actual_running: AtomicBool::new(false),
            degraded: AtomicBool::new(false),
            dropped_frames: AtomicU64::new(0),
        }
    }

    pub fn family(&self) -> StreamFamily {
        self.family
    }

    /// The buffer slot frames are delivered out of
    pub fn slot(&self) -> &FrameSlot {
        &self.slot
    }

    fn desired_lock(&self) -> std::sync::MutexGuard<'_, DesiredState> {
        self.desired.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn desired_mode(&self) -> StreamMode {
        self.desired_lock().mode
    }

    pub fn desired_running(&self) -> bool {
        self.desired_lock().running
    }

    /// Set the desired format; the family must match this controller
    pub fn set_format(&self, format: StreamFormat) {
        debug_assert_eq!(format.family(), self.family);
        self.desired_lock().mode.format = format;
    }

    pub fn set_resolution(&self, resolution: Resolution) {
        self.desired_lock().mode.resolution = resolution;
    }

    /// Request the stream to run, switching to `format` in the same step
    ///
    /// Used by the video family where starting RGB or IR implies selecting
    /// that side of the shared pipeline.
    pub fn start_with_format(&self, format: StreamFormat) {
        debug_assert_eq!(format.family(), self.family);
        let mut desired = self.desired_lock();
        desired.mode.format = format;
        desired.running = true;
    }

    pub fn set_running(&self, running: bool) {
        self.desired_lock().running = running;
    }

    /// Request a stop only when the currently desired format satisfies
    /// `matches`
    ///
    /// Lets a video-family caller stop "the RGB stream" without killing a
    /// live IR stream that took over the pipeline in the meantime.
    pub fn stop_when(&self, matches: impl FnOnce(StreamFormat) -> bool) {
        let mut desired = self.desired_lock();
        if matches(desired.mode.format) {
            desired.running = false;
        }
    }

    /// Whether acquisition is currently programmed and started in hardware
    pub fn actual_running(&self) -> bool {
        self.actual_running.load(Ordering::SeqCst)
    }

    /// Mode of the currently allocated buffer, `None` before first use
    pub fn actual_mode(&self) -> Option<StreamMode> {
        self.slot.lock().as_ref().map(|b| b.mode())
    }

    /// True while the stream runs in the fallback mode because the
    /// requested one was unsupported
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Frames dropped because a hardware callback raced a reallocation
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::SeqCst)
    }

    pub(crate) fn note_dropped_frame(&self) {
        self.dropped_frames.fetch_add(1, Ordering::SeqCst);
    }

    /// Converge hardware state to the desired state
    ///
    /// Called periodically from the capture loop thread, which is the only
    /// context performing mode switches, reallocation and start/stop calls.
    /// Unsupported modes degrade to the family default instead of failing;
    /// nothing escapes this function.
    pub fn reconcile(&self, handle: &mut dyn DriverHandle) {
        let desired = *self.desired_lock();
        let mut slot = self.slot.lock();

        let actual_mode = slot.as_ref().map(|b| b.mode());
        let mode_changed = actual_mode != Some(desired.mode);
        let running_changed = self.actual_running.load(Ordering::SeqCst) != desired.running;
        if !mode_changed && !running_changed {
            return;
        }

        // A mode change leaves a stale buffer pointer programmed into the
        // hardware, so always stop first. The hardware stop is idempotent.
        handle.stop(self.family);
        self.actual_running.store(false, Ordering::SeqCst);

        if mode_changed {
            let buffer = match FrameBuffer::allocate(desired.mode) {
                Ok(buffer) => {
                    self.degraded.store(false, Ordering::SeqCst);
                    buffer
                }
                Err(err) => {
                    let fallback = self.family.default_mode();
                    warn!(
                        family = %self.family,
                        requested = %desired.mode,
                        fallback = %fallback,
                        error = %err,
                        "unsupported stream mode, falling back to default"
                    );
                    self.degraded.store(true, Ordering::SeqCst);
                    // Rewrite the desired mode to the fallback so the next
                    // tick does not retry the unsupported request. Skip the
                    // rewrite if the application asked for something else in
                    // the meantime.
                    {
                        let mut current = self.desired_lock();
                        if current.mode == desired.mode {
                            current.mode = fallback;
                        }
                    }
                    match FrameBuffer::allocate(fallback) {
                        Ok(buffer) => buffer,
                        Err(err) => {
                            // The default mode is in the hardware table;
                            // reaching this means the table itself broke.
                            error!(family = %self.family, error = %err,
                                "default mode allocation failed, stream left stopped");
                            *slot = None;
                            return;
                        }
                    }
                }
            };

            let programmed = BufferHandle {
                id: buffer.id(),
                len: buffer.len(),
                slot: self.slot.clone(),
            };
            let mode = buffer.mode();
            debug!(
                family = %self.family,
                mode = %mode,
                buffer = %buffer.id(),
                bytes = buffer.len(),
                "programming stream mode"
            );
            *slot = Some(buffer);
            if let Err(err) = handle.program(self.family, mode, programmed) {
                error!(family = %self.family, mode = %mode, error = %err,
                    "driver rejected mode, stream left stopped");
                *slot = None;
                return;
            }
        }

        // Re-read: a stop requested while we were reallocating wins.
        if self.desired_lock().running {
            match handle.start(self.family) {
                Ok(()) => self.actual_running.store(true, Ordering::SeqCst),
                Err(err) => {
                    error!(family = %self.family, error = %err, "failed to start stream");
                }
            }
        }
    }

    /// Shutdown-path stop: halt acquisition and release the buffer
    ///
    /// Must only be called after the capture loop has been joined.
    pub fn halt(&self, handle: &mut dyn DriverHandle) {
        handle.stop(self.family);
        self.actual_running.store(false, Ordering::SeqCst);
        self.set_running(false);
        *self.slot.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{Call, MockHandle, MockState};
    use crate::types::{DepthFormat, VideoFormat};
    use std::sync::Arc;

    fn video_mode(format: VideoFormat, resolution: Resolution) -> StreamMode {
        StreamMode {
            format: StreamFormat::Video(format),
            resolution,
        }
    }

    fn controller_and_handle(family: StreamFamily) -> (StreamController, MockState, MockHandle) {
        let state = MockState::default();
        let handle = MockHandle::new(state.clone());
        (StreamController::new(family), state, handle)
    }

    #[test]
    fn test_reconcile_noop_when_converged() {
        let (video, state, mut handle) = controller_and_handle(StreamFamily::Video);
        video.set_running(true);
        video.reconcile(&mut handle);
        state.clear_calls();

        // Converged: repeated reconciles must not touch the hardware
        video.reconcile(&mut handle);
        video.reconcile(&mut handle);
        assert!(state.calls().is_empty());
        assert!(video.actual_running());
    }

    #[test]
    fn test_first_start_runs_full_cycle() {
        let (video, state, mut handle) = controller_and_handle(StreamFamily::Video);
        video.set_running(true);
        video.reconcile(&mut handle);

        let mode = StreamFamily::Video.default_mode();
        assert_eq!(
            state.calls(),
            vec![
                Call::Stop(StreamFamily::Video),
                Call::Program(StreamFamily::Video, mode),
                Call::Start(StreamFamily::Video),
            ]
        );
        assert_eq!(video.actual_mode(), Some(mode));
        assert!(video.actual_running());
    }

    #[test]
    fn test_unsupported_mode_degrades_to_default() {
        let (depth, _state, mut handle) = controller_and_handle(StreamFamily::Depth);
        let bad = StreamMode {
            format: StreamFormat::Depth(DepthFormat::Mm),
            resolution: Resolution::High,
        };
        depth.set_format(bad.format);
        depth.set_resolution(bad.resolution);
        depth.set_running(true);
        depth.reconcile(&mut handle);

        let fallback = StreamFamily::Depth.default_mode();
        assert_eq!(depth.actual_mode(), Some(fallback));
        assert!(depth.is_degraded());
        assert!(depth.actual_running());
        // Desired was rewritten: the next tick is a no-op, not a retry
        assert_eq!(depth.desired_mode(), fallback);
    }

    #[test]
    fn test_degraded_clears_on_supported_request() {
        let (video, _state, mut handle) = controller_and_handle(StreamFamily::Video);
        video.set_resolution(Resolution::Low);
        video.set_running(true);
        video.reconcile(&mut handle);
        assert!(video.is_degraded());

        video.set_format(StreamFormat::Video(VideoFormat::Bayer));
        video.set_resolution(Resolution::High);
        video.reconcile(&mut handle);
        assert!(!video.is_degraded());
        assert_eq!(
            video.actual_mode(),
            Some(video_mode(VideoFormat::Bayer, Resolution::High))
        );
    }

    #[test]
    fn test_stop_wins_before_reconcile() {
        let (video, state, mut handle) = controller_and_handle(StreamFamily::Video);
        video.start_with_format(StreamFormat::Video(VideoFormat::Rgb));
        video.set_running(false);
        video.reconcile(&mut handle);

        assert!(!video.actual_running());
        assert!(
            !state.calls().contains(&Call::Start(StreamFamily::Video)),
            "stream must never start when the stop was observed first"
        );
    }

    #[test]
    fn test_color_ir_switch_always_reallocates() {
        let (video, _state, mut handle) = controller_and_handle(StreamFamily::Video);
        video.start_with_format(StreamFormat::Video(VideoFormat::Rgb));
        video.reconcile(&mut handle);
        let rgb_id = video.slot().lock().as_ref().map(|b| b.id());

        video.start_with_format(StreamFormat::Video(VideoFormat::Ir8Bit));
        video.reconcile(&mut handle);
        let ir_id = video.slot().lock().as_ref().map(|b| b.id());

        assert!(rgb_id.is_some() && ir_id.is_some());
        assert_ne!(rgb_id, ir_id, "RGB and IR buffers are never shared");

        // And back again: another fresh buffer
        video.start_with_format(StreamFormat::Video(VideoFormat::Rgb));
        video.reconcile(&mut handle);
        let rgb_again = video.slot().lock().as_ref().map(|b| b.id());
        assert_ne!(rgb_again, rgb_id);
        assert_ne!(rgb_again, ir_id);
    }

    #[test]
    fn test_running_only_change_keeps_buffer() {
        let (depth, state, mut handle) = controller_and_handle(StreamFamily::Depth);
        depth.set_running(true);
        depth.reconcile(&mut handle);
        let id = depth.slot().lock().as_ref().map(|b| b.id());
        state.clear_calls();

        depth.set_running(false);
        depth.reconcile(&mut handle);

        // Stop is issued, but the buffer survives a pure running change
        assert_eq!(state.calls(), vec![Call::Stop(StreamFamily::Depth)]);
        assert_eq!(depth.slot().lock().as_ref().map(|b| b.id()), id);
        assert!(!depth.actual_running());
    }

    #[test]
    fn test_concurrent_configuration_single_cycle() {
        let (video, state, mut handle) = controller_and_handle(StreamFamily::Video);
        video.set_running(true);
        video.reconcile(&mut handle);
        state.clear_calls();

        let video = Arc::new(video);
        let mut threads = Vec::new();
        for format in [VideoFormat::Bayer, VideoFormat::Ir8Bit, VideoFormat::Ir10Bit] {
            let video = Arc::clone(&video);
            threads.push(std::thread::spawn(move || {
                video.set_format(StreamFormat::Video(format));
                video.set_resolution(Resolution::Medium);
            }));
        }
        for t in threads {
            t.join().unwrap();
        }

        let last_written = video.desired_mode();
        video.reconcile(&mut handle);

        // Exactly one stop/program/start cycle for any number of writes
        assert_eq!(
            state.calls(),
            vec![
                Call::Stop(StreamFamily::Video),
                Call::Program(StreamFamily::Video, last_written),
                Call::Start(StreamFamily::Video),
            ]
        );
        assert_eq!(video.actual_mode(), Some(last_written));
    }

    #[test]
    fn test_halt_releases_buffer() {
        let (depth, state, mut handle) = controller_and_handle(StreamFamily::Depth);
        depth.set_running(true);
        depth.reconcile(&mut handle);
        assert!(depth.slot().lock().is_some());

        state.clear_calls();
        depth.halt(&mut handle);
        assert_eq!(state.calls(), vec![Call::Stop(StreamFamily::Depth)]);
        assert!(depth.slot().lock().is_none());
        assert!(!depth.actual_running());
        assert!(!depth.desired_running());
    }
}
