//! Heap Registry
//!
//! Single source of truth for which heaps exist and their bounds.
//!
//! # Design
//! - One descriptor per [`HeapKind`], kept in an ordered map
//! - Shared-read/exclusive-write: `lookup`/`all` take the read lock,
//!   `install`/`uninstall` the write lock
//! - A separate frozen-kind set lets the resizer fence off a kind while
//!   it scans sessions; allocation paths hold an [`Admission`] (a read
//!   guard on that set) across reserve-and-record, so freezing waits for
//!   every in-flight creation to land before the scan starts
//!
//! # Invariants
//! - Installed ranges are pairwise disjoint, except that a heap carved
//!   from its backing heap lies fully inside it
//! - Every installed range lies inside one block of the memory map
//!
//! No I/O happens here; backends are notified by the callers.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::ops::Deref;

use log::{info, warn};
use spin::{RwLock, RwLockReadGuard};

use super::descriptor::HeapDescriptor;
use super::kind::{HeapKind, HeapKindSet};
use crate::backend::MemoryMap;
use crate::error::{HeapError, Result};
use crate::mm::PhysRange;

/// Table of installed heaps.
pub struct HeapRegistry {
    heaps: RwLock<BTreeMap<HeapKind, HeapDescriptor>>,
    frozen: RwLock<HeapKindSet>,
    memory: Box<dyn MemoryMap>,
}

/// Permission to create a buffer in a heap.
///
/// While any admission for a kind is alive, [`HeapRegistry::freeze`]
/// on that kind blocks.
pub struct Admission<'a> {
    _frozen: RwLockReadGuard<'a, HeapKindSet>,
    desc: HeapDescriptor,
}

impl Deref for Admission<'_> {
    type Target = HeapDescriptor;

    fn deref(&self) -> &HeapDescriptor {
        &self.desc
    }
}

/// How two installed heaps may relate.
fn may_share(new: &HeapDescriptor, new_range: &PhysRange, old: &HeapDescriptor, old_range: &PhysRange) -> bool {
    (new.kind.backing() == Some(old.kind) && old_range.contains_range(new_range))
        || (old.kind.backing() == Some(new.kind) && new_range.contains_range(old_range))
}

impl HeapRegistry {
    /// Create an empty registry over the given memory map.
    pub fn new(memory: Box<dyn MemoryMap>) -> Self {
        Self {
            heaps: RwLock::new(BTreeMap::new()),
            frozen: RwLock::new(HeapKindSet::empty()),
            memory,
        }
    }

    /// Install a heap.
    ///
    /// # Errors
    /// - `InvalidArgument` for a zero base/size or non-power-of-two alignment
    /// - `OutOfBounds` if the range is not inside one memory block
    /// - `Overlap` if the kind is already installed or the range
    ///   intersects another heap (other than its backing heap)
    pub fn install(&self, desc: HeapDescriptor) -> Result<()> {
        if !desc.is_present() || !desc.align.is_power_of_two() {
            return Err(HeapError::InvalidArgument);
        }
        let range = desc.range().ok_or(HeapError::OutOfBounds)?;

        match self.memory.containing_block(&range) {
            Some(block) => debug_assert!(block.range().is_some_and(|b| b.contains_range(&range))),
            None => {
                warn!("[HEAP] {} {} outside platform memory", desc.kind, range);
                return Err(HeapError::OutOfBounds);
            }
        }

        let mut heaps = self.heaps.write();
        if heaps.contains_key(&desc.kind) {
            warn!("[HEAP] {} already installed", desc.kind);
            return Err(HeapError::Overlap);
        }

        for old in heaps.values() {
            let Some(old_range) = old.range() else { continue };
            if range.intersects(&old_range) && !may_share(&desc, &range, old, &old_range) {
                warn!("[HEAP] {} {} overlaps {} {}", desc.kind, range, old.kind, old_range);
                return Err(HeapError::Overlap);
            }
        }

        heaps.insert(desc.kind, desc);
        info!("[HEAP] installed {:?}", desc);
        Ok(())
    }

    /// Remove a heap, returning its last descriptor.
    ///
    /// The caller guarantees no live handle references the heap.
    pub fn uninstall(&self, kind: HeapKind) -> Option<HeapDescriptor> {
        let removed = self.heaps.write().remove(&kind);
        if let Some(desc) = &removed {
            info!("[HEAP] uninstalled {:?}", desc);
        }
        removed
    }

    /// Descriptor of an installed heap.
    pub fn lookup(&self, kind: HeapKind) -> Option<HeapDescriptor> {
        self.heaps.read().get(&kind).copied()
    }

    /// Snapshot of every installed descriptor, in kind order.
    pub fn all(&self) -> impl Iterator<Item = HeapDescriptor> {
        let snapshot: Vec<HeapDescriptor> = self.heaps.read().values().copied().collect();
        snapshot.into_iter()
    }

    /// Number of installed heaps.
    pub fn len(&self) -> usize {
        self.heaps.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heaps.read().is_empty()
    }

    /// Admit a buffer creation in `kind`.
    ///
    /// # Errors
    /// `InvalidHeap` if the kind is frozen or not installed.
    pub fn admit(&self, kind: HeapKind) -> Result<Admission<'_>> {
        let frozen = self.frozen.read();
        if frozen.has(kind) {
            return Err(HeapError::InvalidHeap);
        }
        let desc = self.lookup(kind).ok_or(HeapError::InvalidHeap)?;
        Ok(Admission { _frozen: frozen, desc })
    }

    /// Mark `kind` frozen. Blocks until in-flight admissions drain.
    ///
    /// Returns false if it was already frozen.
    pub fn freeze(&self, kind: HeapKind) -> bool {
        let mut frozen = self.frozen.write();
        let was = frozen.has(kind);
        frozen.insert(kind.bit());
        !was
    }

    /// Clear the frozen mark on `kind`.
    pub fn thaw(&self, kind: HeapKind) {
        self.frozen.write().remove(kind.bit());
    }

    pub fn is_frozen(&self, kind: HeapKind) -> bool {
        self.frozen.read().has(kind)
    }

    /// Check the disjointness invariant over every installed pair.
    pub fn is_consistent(&self) -> bool {
        let heaps: Vec<HeapDescriptor> = self.all().collect();
        heaps.iter().enumerate().all(|(i, a)| {
            heaps[i + 1..].iter().all(|b| match (a.range(), b.range()) {
                (Some(ra), Some(rb)) => !ra.intersects(&rb) || may_share(a, &ra, b, &rb),
                _ => false,
            })
        })
    }
}
