// SPDX-License-Identifier: GPL-3.0-only

//! Hardware-sized frame buffers
//!
//! One buffer per stream family, sized exactly for the programmed
//! (format, resolution) pair. A mode change never resizes in place; it
//! allocates a fresh buffer with a fresh identity so that late hardware
//! callbacks referencing the old storage can be detected and dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::errors::{GrabberError, GrabberResult};
use crate::types::StreamMode;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one buffer allocation
///
/// Ids are never reused, so comparing the id carried by a driver event
/// against the current buffer detects frames raced by a reallocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One hardware-sized pixel buffer plus the mode it was allocated for
#[derive(Debug)]
pub struct FrameBuffer {
    data: Box<[u8]>,
    mode: StreamMode,
    id: BufferId,
}

impl FrameBuffer {
    /// Allocate storage sized exactly for `mode`
    ///
    /// Fails with `UnsupportedMode` when the pair is outside the hardware
    /// mode table; it never truncates. The caller decides whether to fall
    /// back to the family default.
    pub fn allocate(mode: StreamMode) -> GrabberResult<Self> {
        let len = mode
            .frame_bytes()
            .ok_or(GrabberError::UnsupportedMode(mode))?;
        Ok(Self {
            data: vec![0u8; len].into_boxed_slice(),
            mode,
            id: BufferId::next(),
        })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access for the driver writing a completed frame
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Shared slot holding a stream's current buffer, `None` until first use
///
/// This is the per-stream buffer lock: held only around reallocation and
/// around the identity-checked frame read at delivery time. The driver
/// binding receives a clone when a mode is programmed and locks it between
/// frames to write pixel data.
#[derive(Debug, Clone, Default)]
pub struct FrameSlot(Arc<Mutex<Option<FrameBuffer>>>);

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, Option<FrameBuffer>> {
        // A poisoned slot means a panic mid-delivery; the buffer contents
        // are still structurally valid, so keep going.
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}
