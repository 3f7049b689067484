//! Platform collaborators
//!
//! The heap manager does not carve memory itself. It drives:
//! - a buffer-object backend ([`BufferBackend`]) that reserves bytes in
//!   a heap and reports where they ended up
//! - the platform memory map ([`MemoryMap`]) used to bounds-check heaps
//!
//! Host-runnable implementations ([`ArenaBackend`] over [`SimMemory`])
//! are provided for simulation and tests.

mod arena;
mod memmap;
mod sim;

pub use arena::ArenaBackend;
pub use memmap::{MemoryMap, StaticMemoryMap};
pub use sim::SimMemory;

use alloc::vec::Vec;
use core::fmt;

use crate::error::BackendError;
use crate::heap::{HeapDescriptor, HeapKind};
use crate::mm::Extent;

/// Identifier of one backend allocation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct BackendId(u64);

impl BackendId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bo#{}", self.0)
    }
}

/// The buffer-object backend.
///
/// Implementations synchronize internally; the heap manager calls in
/// from any thread, sometimes while holding its own locks.
pub trait BufferBackend: Send + Sync {
    /// Start serving allocations for a newly installed heap.
    fn attach_heap(&self, desc: &HeapDescriptor) -> Result<(), BackendError>;

    /// Stop serving a heap. Fails with `InUse` while allocations remain.
    fn detach_heap(&self, kind: HeapKind) -> Result<(), BackendError>;

    /// Reserve `size` bytes aligned to `align` in `heap`.
    fn allocate(&self, heap: HeapKind, size: usize, align: usize) -> Result<BackendId, BackendError>;

    /// Release an allocation. Unknown ids are ignored.
    fn free(&self, id: BackendId);

    /// Physical extents of an allocation, in buffer order.
    fn lookup(&self, id: BackendId) -> Option<Vec<Extent>>;
}
