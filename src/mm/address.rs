//! Physical Address Types
//!
//! Type-safe wrapper for physical addresses handed out by the heap
//! manager and programmed into copy hardware.
//!
//! # Properties
//! - Physical addresses cannot be dereferenced directly
//! - Alignment helpers take the alignment explicitly since heaps carry
//!   their own alignment, not a fixed page size
//! - Range arithmetic is overflow-checked; a range that would wrap the
//!   address space is treated as malformed

use core::fmt;

/// Page size (4 KiB)
pub const PAGE_SIZE: usize = 4096;
/// Page size mask
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

/// A physical memory address.
///
/// This is a newtype wrapper that keeps bus/physical addresses apart
/// from host pointers. Physical addresses cannot be dereferenced;
/// they are only compared, offset, and passed to hardware.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysAddr(usize);

impl PhysAddr {
    /// The zero address. Never valid for a buffer.
    pub const NULL: Self = Self(0);

    /// Create a new physical address.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Get the raw address value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Check if the address is the zero address.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Check if the address is page-aligned.
    #[inline]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    /// Check alignment against an arbitrary power-of-two alignment.
    #[inline]
    pub const fn is_aligned_to(self, align: usize) -> bool {
        debug_assert!(align.is_power_of_two());
        self.0 & (align - 1) == 0
    }

    /// Align the address up to `align` (power of two).
    ///
    /// Returns `None` if rounding up would overflow.
    #[inline]
    pub const fn align_up(self, align: usize) -> Option<Self> {
        debug_assert!(align.is_power_of_two());
        match self.0.checked_add(align - 1) {
            Some(v) => Some(Self(v & !(align - 1))),
            None => None,
        }
    }

    /// Add an offset to this address.
    ///
    /// # Panics
    /// Panics in debug mode on overflow. Use [`PhysAddr::checked_add`]
    /// for untrusted offsets.
    #[inline]
    pub const fn add(self, offset: usize) -> Self {
        Self(self.0 + offset)
    }

    /// Add an offset, returning `None` on overflow.
    #[inline]
    pub const fn checked_add(self, offset: usize) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Distance in bytes from `base` to `self`, if `self >= base`.
    #[inline]
    pub const fn offset_from(self, base: PhysAddr) -> Option<usize> {
        self.0.checked_sub(base.0)
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#012x})", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#012x}", self.0)
    }
}

/// A half-open physical range `[start, start + len)`.
///
/// Used for heap bounds and memory-map blocks. An empty range contains
/// nothing and intersects nothing.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PhysRange {
    start: PhysAddr,
    len: usize,
}

impl PhysRange {
    /// Create a range. Returns `None` if `start + len` overflows.
    #[inline]
    pub const fn new(start: PhysAddr, len: usize) -> Option<Self> {
        match start.checked_add(len) {
            Some(_) => Some(Self { start, len }),
            None => None,
        }
    }

    #[inline]
    pub const fn start(&self) -> PhysAddr {
        self.start
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last byte.
    #[inline]
    pub const fn end(&self) -> PhysAddr {
        PhysAddr(self.start.0 + self.len)
    }

    /// True if `other` lies entirely within `self`.
    #[inline]
    pub const fn contains_range(&self, other: &PhysRange) -> bool {
        !other.is_empty()
            && other.start.0 >= self.start.0
            && other.start.0 + other.len <= self.start.0 + self.len
    }

    /// True if the two ranges share at least one byte.
    #[inline]
    pub const fn intersects(&self, other: &PhysRange) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.start.0 < other.start.0 + other.len
            && other.start.0 < self.start.0 + self.len
    }
}

impl fmt::Display for PhysRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{})", self.start, self.end())
    }
}
