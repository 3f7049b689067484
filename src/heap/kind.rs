//! Heap kinds
//!
//! The closed set of heap types the manager knows about, plus a bitset
//! used for the registry-wide "frozen kind" flags.

use core::fmt;

use bitflags::bitflags;

/// Type of a heap. At most one heap per kind is installed at a time.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(u8)]
pub enum HeapKind {
    /// Page-pooled system memory; buffers may be fragmented.
    SystemPooled = 0,
    /// Physically contiguous system memory.
    SystemContiguous = 1,
    /// Reserved region for a dedicated consumer, resizable.
    Carveout = 2,
    /// Small fixed-size chunk pool.
    FixedChunk = 3,
    /// Reclaimable CMA region other heaps are carved from.
    CmaBacked = 4,
    /// CMA-sourced reservation, resizable.
    CmaReserved = 5,
    /// On-chip SRAM.
    CustomSram = 6,
    /// Size-limited slice of on-chip SRAM, resizable.
    SramLimited = 7,
    /// Memory with inline ECC, resizable.
    InlineEcc = 8,
    /// Secondary CMA region.
    CmaExtra = 9,
}

impl HeapKind {
    /// Every kind, in table order.
    pub const ALL: [HeapKind; 10] = [
        Self::SystemPooled,
        Self::SystemContiguous,
        Self::Carveout,
        Self::FixedChunk,
        Self::CmaBacked,
        Self::CmaReserved,
        Self::CustomSram,
        Self::SramLimited,
        Self::InlineEcc,
        Self::CmaExtra,
    ];

    /// Short name used in logs and usage listings.
    pub const fn name(self) -> &'static str {
        match self {
            Self::SystemPooled => "system",
            Self::SystemContiguous => "system-contig",
            Self::Carveout => "carveout",
            Self::FixedChunk => "chunk",
            Self::CmaBacked => "cma",
            Self::CmaReserved => "cma-reserved",
            Self::CustomSram => "sram",
            Self::SramLimited => "sram-limited",
            Self::InlineEcc => "inline-ecc",
            Self::CmaExtra => "cma-extra",
        }
    }

    /// The heap this kind is carved from when it is (re)created at
    /// runtime. `None` means the kind only ever comes from board
    /// configuration and cannot be resized.
    pub const fn backing(self) -> Option<HeapKind> {
        match self {
            Self::Carveout | Self::CmaReserved => Some(Self::CmaBacked),
            Self::InlineEcc => Some(Self::CmaExtra),
            Self::SramLimited => Some(Self::CustomSram),
            _ => None,
        }
    }

    #[inline]
    pub const fn is_resizable(self) -> bool {
        self.backing().is_some()
    }

    /// True if buffers from this kind are always a single extent.
    #[inline]
    pub const fn is_contiguous(self) -> bool {
        !matches!(self, Self::SystemPooled)
    }

    /// The single-bit set for this kind.
    pub const fn bit(self) -> HeapKindSet {
        HeapKindSet::from_bits_truncate(1 << self as u8)
    }
}

impl fmt::Display for HeapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// A set of heap kinds, one bit per [`HeapKind`] discriminant.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HeapKindSet: u16 {
        const SYSTEM_POOLED = 1 << 0;
        const SYSTEM_CONTIGUOUS = 1 << 1;
        const CARVEOUT = 1 << 2;
        const FIXED_CHUNK = 1 << 3;
        const CMA_BACKED = 1 << 4;
        const CMA_RESERVED = 1 << 5;
        const CUSTOM_SRAM = 1 << 6;
        const SRAM_LIMITED = 1 << 7;
        const INLINE_ECC = 1 << 8;
        const CMA_EXTRA = 1 << 9;
    }
}

impl HeapKindSet {
    /// True if `kind` is a member.
    #[inline]
    pub fn has(self, kind: HeapKind) -> bool {
        self.contains(kind.bit())
    }
}
