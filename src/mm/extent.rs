//! Buffer Extents
//!
//! An extent is one physically contiguous piece of a buffer. A buffer is
//! either a single extent or an ordered list of them (a fragmented
//! buffer, e.g. one imported from a scatter-gather exporter).

use alloc::vec::Vec;
use core::fmt;

use super::address::{PhysAddr, PhysRange};

/// One `(physical address, length)` piece of a buffer.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub phys_addr: PhysAddr,
    pub len: usize,
}

impl Extent {
    #[inline]
    pub const fn new(phys_addr: PhysAddr, len: usize) -> Self {
        Self { phys_addr, len }
    }

    /// One past the last byte, or `None` if the extent wraps.
    #[inline]
    pub const fn checked_end(&self) -> Option<PhysAddr> {
        self.phys_addr.checked_add(self.len)
    }

    /// The extent as a [`PhysRange`], if well-formed.
    #[inline]
    pub const fn range(&self) -> Option<PhysRange> {
        PhysRange::new(self.phys_addr, self.len)
    }
}

impl fmt::Debug for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Extent({}+{:#x})", self.phys_addr, self.len)
    }
}

/// The storage layout of a buffer as seen by consumers.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ExtentView {
    /// A single physically contiguous extent.
    Contiguous(Extent),
    /// Two or more extents, in buffer order.
    Fragmented(Vec<Extent>),
}

impl ExtentView {
    /// Build a view from an extent list, merging physically adjacent
    /// neighbours and dropping empty extents.
    ///
    /// Returns `None` for an empty list or one with only empty extents.
    pub fn from_extents(extents: &[Extent]) -> Option<Self> {
        let mut merged: Vec<Extent> = Vec::with_capacity(extents.len());
        for ext in extents.iter().filter(|e| e.len != 0) {
            match merged.last_mut() {
                Some(last) if last.checked_end() == Some(ext.phys_addr) => last.len += ext.len,
                _ => merged.push(*ext),
            }
        }

        match merged.len() {
            0 => None,
            1 => Some(Self::Contiguous(merged[0])),
            _ => Some(Self::Fragmented(merged)),
        }
    }

    /// The extents in buffer order.
    pub fn as_slice(&self) -> &[Extent] {
        match self {
            Self::Contiguous(ext) => core::slice::from_ref(ext),
            Self::Fragmented(exts) => exts,
        }
    }

    #[inline]
    pub fn is_contiguous(&self) -> bool {
        matches!(self, Self::Contiguous(_))
    }

    /// Total bytes covered by all extents.
    pub fn total_len(&self) -> usize {
        self.as_slice().iter().map(|e| e.len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn ext(addr: usize, len: usize) -> Extent {
        Extent::new(PhysAddr::new(addr), len)
    }

    #[test]
    fn test_adjacent_extents_merge() {
        let view = ExtentView::from_extents(&[ext(0x1000, 0x1000), ext(0x2000, 0x1000)]).unwrap();
        assert_eq!(view, ExtentView::Contiguous(ext(0x1000, 0x2000)));
        assert!(view.is_contiguous());
    }

    #[test]
    fn test_discontiguous_extents_stay_fragmented() {
        let view = ExtentView::from_extents(&[
            ext(0x1000, 0x1000),
            ext(0, 0),
            ext(0x8000, 0x800),
        ])
        .unwrap();
        assert_eq!(view, ExtentView::Fragmented(vec![ext(0x1000, 0x1000), ext(0x8000, 0x800)]));
        assert_eq!(view.total_len(), 0x1800);
        assert_eq!(view.as_slice().len(), 2);
    }

    #[test]
    fn test_empty_list_has_no_view() {
        assert!(ExtentView::from_extents(&[]).is_none());
        assert!(ExtentView::from_extents(&[ext(0x1000, 0)]).is_none());
    }
}
