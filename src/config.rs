//! Configuration
//!
//! Compile-time defaults plus the runtime structures handed to
//! [`HeapCore::init`](crate::HeapCore::init). Board configuration arrives
//! already parsed; how it is loaded is the platform's business.

use alloc::vec::Vec;

use crate::heap::HeapDescriptor;
use crate::mm::{PhysAddr, PhysRange, PAGE_SIZE};

/// Copy-completion timeout (1 second).
pub const COPY_TIMEOUT_MS: u32 = 1000;

/// Chunk size of the `FixedChunk` heap.
pub const FIXED_CHUNK_SIZE: usize = 4096;

/// Alignment used when a descriptor or request does not give one.
pub const DEFAULT_HEAP_ALIGN: usize = PAGE_SIZE;

/// Bytes per MiB, for operator-facing sizes.
pub const MIB: usize = 1024 * 1024;

/// Runtime tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreConfig {
    /// How long a copy waits for each hardware completion.
    pub copy_timeout_ms: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            copy_timeout_ms: COPY_TIMEOUT_MS,
        }
    }
}

/// One block of the platform physical memory map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBlock {
    pub base: PhysAddr,
    pub size: usize,
}

impl MemoryBlock {
    pub const fn new(base: PhysAddr, size: usize) -> Self {
        Self { base, size }
    }

    /// The block as a range; `None` if it wraps the address space.
    pub const fn range(&self) -> Option<PhysRange> {
        PhysRange::new(self.base, self.size)
    }
}

/// Static board description: which memory exists and which heaps start
/// installed. A heap kind without a descriptor starts uninstalled.
#[derive(Debug, Clone, Default)]
pub struct BoardConfig {
    pub memory: Vec<MemoryBlock>,
    pub heaps: Vec<HeapDescriptor>,
}

impl BoardConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a memory block (builder style).
    pub fn with_memory(mut self, block: MemoryBlock) -> Self {
        self.memory.push(block);
        self
    }

    /// Add an initial heap (builder style).
    pub fn with_heap(mut self, desc: HeapDescriptor) -> Self {
        self.heaps.push(desc);
        self
    }
}
