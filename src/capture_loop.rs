// SPDX-License-Identifier: GPL-3.0-only

//! Capture loop thread lifecycle
//!
//! Stopping is an explicit two-phase protocol: [`CaptureLoopController::request_stop`]
//! raises the cancellation flag, [`CaptureLoopController::join`] blocks until
//! the thread has observed it and returned. Only after the join may the
//! driver handle be touched again, since the loop body calls into it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

/// How long a join waits before flagging the loop as unresponsive
///
/// Each iteration blocks for one event-processing timeout at most, so a
/// healthy loop observes the stop flag well inside this window.
const JOIN_GRACE: Duration = Duration::from_millis(500);

/// Action returned by the loop body to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Run another iteration
    Continue,
    /// Stop the loop from the inside, e.g. on a fatal driver error
    Stop,
}

/// Controller for a capture loop running in a dedicated thread
///
/// The loop body is invoked repeatedly until it returns [`LoopAction::Stop`]
/// or the stop flag is raised. Each iteration is expected to block only for
/// a short bounded time, so a stop request is honored within roughly one
/// event-processing timeout.
pub struct CaptureLoopController {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl CaptureLoopController {
    /// Spawn the loop thread and start iterating immediately
    pub fn start<F>(name: &str, mut loop_fn: F) -> Self
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop_signal);
        let thread_name = name.to_string();

        info!(name = %name, "starting capture loop");

        let thread_handle = thread::spawn(move || {
            debug!(name = %thread_name, "capture loop thread started");
            loop {
                if stop_flag.load(Ordering::SeqCst) {
                    debug!(name = %thread_name, "stop signal observed");
                    break;
                }
                match loop_fn() {
                    LoopAction::Continue => {}
                    LoopAction::Stop => {
                        debug!(name = %thread_name, "loop requested stop");
                        break;
                    }
                }
            }
            info!(name = %thread_name, "capture loop thread exiting");
        });

        Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        }
    }

    /// Whether the loop thread is still executing
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Phase one: raise the cancellation flag without waiting
    pub fn request_stop(&self) {
        debug!(name = %self.name, "requesting capture loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Phase two: wait for the loop thread to return
    ///
    /// Bounded wait: if the thread has not finished within [`JOIN_GRACE`]
    /// the overrun is logged, then the join completes regardless. Returning
    /// with the thread still alive is not an option, since the caller is
    /// about to touch the driver handle the loop body calls into.
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let deadline = Instant::now() + JOIN_GRACE;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            if !handle.is_finished() {
                warn!(
                    name = %self.name,
                    grace_ms = JOIN_GRACE.as_millis() as u64,
                    "capture loop did not stop within the grace period"
                );
            }
            if handle.join().is_err() {
                warn!(name = %self.name, "capture loop thread panicked");
            } else {
                debug!(name = %self.name, "capture loop thread finished");
            }
        }
    }

    /// Both phases: signal, then wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "capture loop controller dropped, stopping loop");
            self.stop();
        }
    }
}
