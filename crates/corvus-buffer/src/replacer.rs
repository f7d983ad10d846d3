//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Trait for page replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Selects a victim frame for eviction.
    ///
    /// Only frames for which `evictable` returns true are candidates.
    /// Returns None if no frame can be evicted.
    fn evict(&self, evictable: &dyn Fn(FrameId) -> bool) -> Option<FrameId>;
}

/// Clock replacement algorithm.
///
/// Uses atomic reference bits for lock-free access recording; the mutex
/// only guards the clock hand. Victim selection skips frames the caller's
/// predicate rejects (pinned frames).
pub struct ClockReplacer {
    /// Number of frames.
    num_frames: usize,
    /// Reference bits for each frame (atomic for lock-free access).
    reference_bits: Vec<AtomicBool>,
    /// Current clock hand position.
    clock_hand: Mutex<usize>,
}

impl ClockReplacer {
    /// Creates a new clock replacer with the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        let reference_bits: Vec<AtomicBool> =
            (0..num_frames).map(|_| AtomicBool::new(false)).collect();

        Self {
            num_frames,
            reference_bits,
            clock_hand: Mutex::new(0),
        }
    }

    /// Returns the total capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.num_frames
    }
}

impl Replacer for ClockReplacer {
    #[inline]
    fn record_access(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.reference_bits[idx].store(true, Ordering::Relaxed);
        }
    }

    fn evict(&self, evictable: &dyn Fn(FrameId) -> bool) -> Option<FrameId> {
        let mut hand = self.clock_hand.lock();

        // At most two full rotations: the first clears reference bits, the
        // second is guaranteed to find a candidate if one exists.
        for _ in 0..(2 * self.num_frames) {
            let frame_id = FrameId(*hand as u32);
            let idx = *hand;
            *hand = (*hand + 1) % self.num_frames;

            if !evictable(frame_id) {
                continue;
            }

            if self.reference_bits[idx].load(Ordering::Relaxed) {
                // Second chance: clear the bit and move on
                self.reference_bits[idx].store(false, Ordering::Relaxed);
            } else {
                return Some(frame_id);
            }
        }

        None
    }
}
