//! Range Oracle
//!
//! Answers "is this physical range managed memory?" for collaborators
//! that are about to program hardware with a peer-supplied address
//! (e.g. an IOMMU mapping path for a co-processor).
//!
//! # Policy
//! - Zero address or zero length is never contained
//! - A range is contained iff some installed heap fully contains it and
//!   no installed heap partially overlaps it, so a range that mixes a
//!   carved heap with its backing heap's free space is rejected
//! - A range inside a carved heap is also inside its backing heap; both
//!   contain it fully, so it is contained
//! - Malformed input yields `false`, never a panic

use super::registry::HeapRegistry;
use crate::mm::{PhysAddr, PhysRange};

/// Containment queries over a [`HeapRegistry`].
#[derive(Clone, Copy)]
pub struct RangeOracle<'a> {
    registry: &'a HeapRegistry,
}

impl<'a> RangeOracle<'a> {
    pub fn new(registry: &'a HeapRegistry) -> Self {
        Self { registry }
    }

    /// True iff `[addr, addr + len)` lies inside managed memory.
    pub fn contains(&self, addr: PhysAddr, len: usize) -> bool {
        if addr.is_null() || len == 0 {
            return false;
        }
        let Some(query) = PhysRange::new(addr, len) else {
            return false;
        };

        let mut inside = false;
        for desc in self.registry.all() {
            let Some(range) = desc.range() else { continue };
            if range.contains_range(&query) {
                inside = true;
            } else if range.intersects(&query) {
                return false;
            }
        }
        inside
    }
}
