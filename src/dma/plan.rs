//! Transfer Planning
//!
//! Splits a logical copy `[src_off, src_off + len) -> [dst_off, ...)`
//! into hardware segments, each physically contiguous on both sides.
//!
//! # Algorithm
//! Walk both extent lists in lock-step. Each segment runs until the
//! nearer of the two extent boundaries (or the end of the copy), then
//! whichever side hit its boundary moves to its next extent:
//! ```text
//! src: |----- e0 -----|-- e1 --|
//! dst: |-- f0 --|------ f1 ------|
//! seg: |   s0   | s1  |   s2   |
//! ```
//! Two contiguous buffers give exactly one segment. Running out of
//! extents on either side before `len` bytes are placed is a
//! `RangeMismatch`, detected before anything is issued.

use alloc::vec::Vec;

use crate::error::{HeapError, Result};
use crate::mm::{Extent, PhysAddr};

/// One hardware transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub src: PhysAddr,
    pub dst: PhysAddr,
    pub len: usize,
}

/// Position inside an extent list.
struct Cursor<'a> {
    extents: &'a [Extent],
    index: usize,
    offset: usize,
}

impl<'a> Cursor<'a> {
    /// Cursor at byte `offset` of the buffer.
    fn seek(extents: &'a [Extent], mut offset: usize) -> Result<Self> {
        for (index, ext) in extents.iter().enumerate() {
            if offset < ext.len {
                return Ok(Self { extents, index, offset });
            }
            offset -= ext.len;
        }
        Err(HeapError::RangeMismatch)
    }

    /// Bytes left in the current extent.
    fn remaining(&self) -> usize {
        self.extents.get(self.index).map_or(0, |e| e.len - self.offset)
    }

    fn addr(&self) -> PhysAddr {
        self.extents[self.index].phys_addr.add(self.offset)
    }

    /// Move `n` bytes forward (at most to the end of the current extent).
    fn advance(&mut self, n: usize) {
        self.offset += n;
        while self.index < self.extents.len() && self.offset == self.extents[self.index].len {
            self.index += 1;
            self.offset = 0;
        }
    }
}

/// Plan the segments for a copy.
///
/// # Errors
/// `RangeMismatch` if either side's extents do not cover the range or
/// an extent wraps the address space.
pub fn plan(src: &[Extent], src_off: usize, dst: &[Extent], dst_off: usize, len: usize) -> Result<Vec<Segment>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    if src.iter().chain(dst).any(|e| e.checked_end().is_none()) {
        return Err(HeapError::RangeMismatch);
    }
    let mut s = Cursor::seek(src, src_off)?;
    let mut d = Cursor::seek(dst, dst_off)?;
    let mut left = len;
    let mut segments = Vec::new();

    while left > 0 {
        let n = s.remaining().min(d.remaining()).min(left);
        if n == 0 {
            return Err(HeapError::RangeMismatch);
        }
        segments.push(Segment {
            src: s.addr(),
            dst: d.addr(),
            len: n,
        });
        s.advance(n);
        d.advance(n);
        left -= n;
    }
    Ok(segments)
}
