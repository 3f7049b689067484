//! Simulated Physical Memory
//!
//! A host allocation standing in for a window of physical RAM, so that
//! backends and copy hardware can be exercised without a board.
//!
//! # Layout
//! - Physical address `base + n` maps to byte `n` of the window
//! - The window is allocated with [`WINDOW_ALIGN`] alignment so that any
//!   physical alignment up to that value is preserved on the host side
//!
//! # Safety Considerations
//! - All accesses are bounds-checked against the window
//! - Concurrent access to the same bytes is the caller's problem, as it
//!   would be for real memory; buffers handed out are disjoint

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use core::ptr::{self, NonNull};

use crate::error::{HeapError, Result};
use crate::mm::{PhysAddr, PhysRange};

/// Host alignment of the simulated window (2 MiB).
pub const WINDOW_ALIGN: usize = 2 * 1024 * 1024;

/// A window of simulated physical memory.
pub struct SimMemory {
    range: PhysRange,
    window: NonNull<u8>,
    layout: Layout,
}

// SAFETY: The window is a plain heap allocation owned by this struct.
// All access goes through bounds-checked raw copies.
unsafe impl Send for SimMemory {}
// SAFETY: See above; no interior references are ever handed out.
unsafe impl Sync for SimMemory {}

impl SimMemory {
    /// Allocate a zeroed window of `size` bytes answering at `base`.
    ///
    /// Returns `None` if `base` is not [`WINDOW_ALIGN`]-aligned, the
    /// range wraps, or the host is out of memory.
    pub fn new(base: PhysAddr, size: usize) -> Option<Self> {
        if size == 0 || !base.is_aligned_to(WINDOW_ALIGN) {
            return None;
        }
        let range = PhysRange::new(base, size)?;
        let layout = Layout::from_size_align(size, WINDOW_ALIGN).ok()?;

        // SAFETY: layout has non-zero size.
        let window = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        Some(Self { range, window, layout })
    }

    /// The physical range this window answers for.
    pub fn range(&self) -> PhysRange {
        self.range
    }

    /// Host pointer for `[addr, addr + len)`, if fully inside the window.
    pub(crate) fn translate(&self, addr: PhysAddr, len: usize) -> Option<*mut u8> {
        let query = PhysRange::new(addr, len)?;
        if len != 0 && !self.range.contains_range(&query) {
            return None;
        }
        let offset = addr.offset_from(self.range.start())?;
        if offset > self.range.len() {
            return None;
        }
        // SAFETY: offset is within (or one past) the window allocation.
        Some(unsafe { self.window.as_ptr().add(offset) })
    }

    /// Physical address of a host pointer inside the window.
    pub(crate) fn phys_of(&self, ptr: *const u8) -> Option<PhysAddr> {
        let offset = (ptr as usize).checked_sub(self.window.as_ptr() as usize)?;
        if offset >= self.range.len() {
            return None;
        }
        Some(self.range.start().add(offset))
    }

    /// Write `data` at `addr`.
    pub fn write(&self, addr: PhysAddr, data: &[u8]) -> Result<()> {
        let dst = self.translate(addr, data.len()).ok_or(HeapError::RangeMismatch)?;
        // SAFETY: dst is valid for data.len() bytes (bounds-checked above)
        // and cannot alias `data`, which lives outside the window.
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len()) };
        Ok(())
    }

    /// Read `buf.len()` bytes at `addr`.
    pub fn read(&self, addr: PhysAddr, buf: &mut [u8]) -> Result<()> {
        let src = self.translate(addr, buf.len()).ok_or(HeapError::RangeMismatch)?;
        // SAFETY: src is valid for buf.len() bytes; buf is outside the window.
        unsafe { ptr::copy_nonoverlapping(src, buf.as_mut_ptr(), buf.len()) };
        Ok(())
    }

    /// Move `len` bytes from `src` to `dst` inside the window, as a
    /// copy engine would. Overlapping ranges are handled.
    pub fn copy(&self, src: PhysAddr, dst: PhysAddr, len: usize) -> Result<()> {
        let from = self.translate(src, len).ok_or(HeapError::RangeMismatch)?;
        let to = self.translate(dst, len).ok_or(HeapError::RangeMismatch)?;
        // SAFETY: both ranges are bounds-checked; ptr::copy allows overlap.
        unsafe { ptr::copy(from, to, len) };
        Ok(())
    }
}

impl Drop for SimMemory {
    fn drop(&mut self) {
        // SAFETY: window was allocated in `new` with exactly this layout.
        unsafe { dealloc(self.window.as_ptr(), self.layout) };
    }
}
