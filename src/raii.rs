//! RAII wrapper for a physical frame: returns it to the frame table when
//! dropped.

use core::ops::Deref;

use crate::mm::frame_table::{FrameNumber, FrameTable};
use crate::sync::Mutex;

/// Owns a [`FrameNumber`] and returns it to `table` on drop.
pub struct FrameGuard<'a> {
    frame: FrameNumber,
    table: &'a Mutex<FrameTable>,
}

impl<'a> FrameGuard<'a> {
    pub fn new(frame: FrameNumber, table: &'a Mutex<FrameTable>) -> Self {
        Self { frame, table }
    }

    /// Release ownership without freeing the frame.
    pub fn leak(self) -> FrameNumber {
        let frame = self.frame;
        core::mem::forget(self);
        frame
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.table.lock().free_frame(self.frame);
        log::trace!("[raii] released frame {:?}", self.frame);
    }
}

impl Deref for FrameGuard<'_> {
    type Target = FrameNumber;

    fn deref(&self) -> &Self::Target {
        &self.frame
    }
}
