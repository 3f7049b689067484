//! Heap descriptors

use core::fmt;

use super::kind::HeapKind;
use crate::config::DEFAULT_HEAP_ALIGN;
use crate::mm::{PhysAddr, PhysRange};

/// Bounds and policy of one heap.
///
/// An uninstalled heap is described by zero base and size.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct HeapDescriptor {
    pub kind: HeapKind,
    pub name: &'static str,
    pub base: PhysAddr,
    pub size: usize,
    /// Minimum alignment of buffers (and of the heap itself when carved).
    pub align: usize,
}

impl HeapDescriptor {
    /// Descriptor with the kind's default name and alignment.
    pub const fn new(kind: HeapKind, base: PhysAddr, size: usize) -> Self {
        Self {
            kind,
            name: kind.name(),
            base,
            size,
            align: DEFAULT_HEAP_ALIGN,
        }
    }

    /// Placeholder for a heap that is not installed.
    pub const fn uninstalled(kind: HeapKind) -> Self {
        Self::new(kind, PhysAddr::NULL, 0)
    }

    /// Override the alignment (builder style).
    pub const fn with_align(mut self, align: usize) -> Self {
        self.align = align;
        self
    }

    /// The heap's bounds, if well-formed.
    #[inline]
    pub const fn range(&self) -> Option<PhysRange> {
        PhysRange::new(self.base, self.size)
    }

    /// True if base/size describe real memory.
    #[inline]
    pub const fn is_present(&self) -> bool {
        !self.base.is_null() && self.size != 0
    }
}

impl fmt::Debug for HeapDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Heap({} '{}' {}+{:#x} align={:#x})",
            self.kind, self.name, self.base, self.size, self.align
        )
    }
}
