//! Shared test rig: simulated RAM, arena backend and a standard board.

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::backend::{ArenaBackend, BufferBackend, SimMemory, StaticMemoryMap};
use crate::config::{BoardConfig, MemoryBlock, MIB};
use crate::context::HeapContext;
use crate::heap::{HeapDescriptor, HeapKind, HeapRegistry};
use crate::mm::PhysAddr;

pub const MEM_BASE: usize = 0x1000_0000;
pub const MEM_SIZE: usize = 32 * MIB;
/// Start of RAM not claimed by any standard heap, for imported buffers.
pub const IMPORT_BASE: usize = 0x1180_0000;

pub struct Rig {
    pub ctx: Arc<HeapContext>,
    pub backend: Arc<ArenaBackend>,
    pub memory: Arc<SimMemory>,
}

fn heap(kind: HeapKind, base: usize, size: usize) -> HeapDescriptor {
    HeapDescriptor::new(kind, PhysAddr::new(base), size)
}

/// The standard board: one 32 MiB block with six heaps installed.
pub fn board() -> BoardConfig {
    BoardConfig::new()
        .with_memory(MemoryBlock::new(PhysAddr::new(MEM_BASE), MEM_SIZE))
        .with_heap(heap(HeapKind::Carveout, 0x1000_0000, 4 * MIB))
        .with_heap(heap(HeapKind::CmaBacked, 0x1040_0000, 8 * MIB).with_align(MIB))
        .with_heap(heap(HeapKind::SystemContiguous, 0x10c0_0000, 4 * MIB))
        .with_heap(heap(HeapKind::SystemPooled, 0x1100_0000, 2 * MIB))
        .with_heap(heap(HeapKind::FixedChunk, 0x1120_0000, 256 * 1024))
        .with_heap(heap(HeapKind::CustomSram, 0x1140_0000, MIB))
}

pub fn memory() -> Arc<SimMemory> {
    Arc::new(SimMemory::new(PhysAddr::new(MEM_BASE), MEM_SIZE).unwrap())
}

/// A context over `backend` with the standard board installed.
pub fn context(backend: Arc<dyn BufferBackend>) -> Arc<HeapContext> {
    let board = board();
    let registry = HeapRegistry::new(Box::new(StaticMemoryMap::new(board.memory.clone())));
    let ctx = Arc::new(HeapContext::new(registry, backend));
    for desc in board.heaps {
        ctx.install_heap(desc).unwrap();
    }
    ctx
}

pub fn rig() -> Rig {
    let memory = memory();
    let backend = Arc::new(ArenaBackend::new(memory.clone()));
    let ctx = context(backend.clone());
    Rig { ctx, backend, memory }
}
