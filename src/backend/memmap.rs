//! Platform memory map

use alloc::vec::Vec;

use crate::config::MemoryBlock;
use crate::mm::PhysRange;

/// Reports which block of physical memory contains a range.
pub trait MemoryMap: Send + Sync {
    /// The block fully containing `range`, if any.
    fn containing_block(&self, range: &PhysRange) -> Option<MemoryBlock>;
}

/// A memory map fixed at boot from board configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticMemoryMap {
    blocks: Vec<MemoryBlock>,
}

impl StaticMemoryMap {
    pub fn new(blocks: Vec<MemoryBlock>) -> Self {
        Self { blocks }
    }

    pub fn blocks(&self) -> &[MemoryBlock] {
        &self.blocks
    }
}

impl MemoryMap for StaticMemoryMap {
    fn containing_block(&self, range: &PhysRange) -> Option<MemoryBlock> {
        self.blocks
            .iter()
            .find(|b| b.range().is_some_and(|r| r.contains_range(range)))
            .copied()
    }
}
