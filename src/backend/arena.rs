//! Arena Backend
//!
//! Reference buffer-object backend over [`SimMemory`].
//!
//! Each attached heap gets its own `linked_list_allocator::Heap` laid
//! over the heap's window of simulated RAM; allocator bookkeeping lives
//! in free holes only, so allocated buffers are never touched.
//!
//! # Policies
//! - Contiguous kinds: one first-fit block of the requested size
//! - `SystemPooled`: page-granular, one block per page, adjacent pages
//!   coalesced into extents (buffers may come back fragmented)
//! - `FixedChunk`: size rounded up to whole chunks, chunk-aligned

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::alloc::Layout;
use core::ptr::NonNull;

use linked_list_allocator::Heap;
use log::{debug, error};
use spin::Mutex;

use super::{BackendId, BufferBackend, SimMemory};
use crate::config::FIXED_CHUNK_SIZE;
use crate::error::BackendError;
use crate::heap::{HeapDescriptor, HeapKind};
use crate::mm::{Extent, ExtentView, PhysAddr, PAGE_SIZE};

/// Smallest heap the allocator can manage.
const MIN_HEAP_SIZE: usize = 64;

/// One heap's allocator.
struct ArenaHeap {
    desc: HeapDescriptor,
    heap: Heap,
    live: usize,
}

// SAFETY: The allocator only holds pointers into the SimMemory window,
// which outlives it (the backend holds an Arc). It is only touched under
// the backend mutex.
unsafe impl Send for ArenaHeap {}

/// One block handed out by an allocator, remembered for deallocation.
#[derive(Clone, Copy)]
struct Block {
    addr: PhysAddr,
    layout: Layout,
}

struct Allocation {
    kind: HeapKind,
    blocks: Vec<Block>,
    extents: Vec<Extent>,
}

struct ArenaInner {
    heaps: BTreeMap<HeapKind, ArenaHeap>,
    allocations: BTreeMap<BackendId, Allocation>,
    next_id: u64,
    frees: u64,
}

/// Buffer-object backend backed by simulated physical memory.
pub struct ArenaBackend {
    memory: Arc<SimMemory>,
    chunk_size: usize,
    inner: Mutex<ArenaInner>,
}

impl ArenaBackend {
    pub fn new(memory: Arc<SimMemory>) -> Self {
        Self::with_chunk_size(memory, FIXED_CHUNK_SIZE)
    }

    /// Backend with a non-default `FixedChunk` chunk size (power of two).
    pub fn with_chunk_size(memory: Arc<SimMemory>, chunk_size: usize) -> Self {
        debug_assert!(chunk_size.is_power_of_two());
        Self {
            memory,
            chunk_size,
            inner: Mutex::new(ArenaInner {
                heaps: BTreeMap::new(),
                allocations: BTreeMap::new(),
                next_id: 1,
                frees: 0,
            }),
        }
    }

    pub fn memory(&self) -> &Arc<SimMemory> {
        &self.memory
    }

    /// Number of allocations freed so far.
    pub fn free_count(&self) -> u64 {
        self.inner.lock().frees
    }

    /// Number of live allocations across all heaps.
    pub fn live_allocations(&self) -> usize {
        self.inner.lock().allocations.len()
    }

    /// `(used, size)` bytes of an attached heap.
    pub fn heap_usage(&self, kind: HeapKind) -> Option<(usize, usize)> {
        let inner = self.inner.lock();
        inner.heaps.get(&kind).map(|h| (h.heap.used(), h.heap.size()))
    }

    /// The layouts a request turns into for a given kind.
    fn plan_blocks(&self, kind: HeapKind, size: usize, align: usize) -> Result<Vec<Layout>, BackendError> {
        let invalid = |_| BackendError::InvalidLayout;
        match kind {
            HeapKind::SystemPooled => {
                let page = Layout::from_size_align(PAGE_SIZE, PAGE_SIZE.max(align)).map_err(invalid)?;
                Ok(alloc::vec![page; size.div_ceil(PAGE_SIZE)])
            }
            HeapKind::FixedChunk => {
                let chunks = size.div_ceil(self.chunk_size);
                let bytes = chunks.checked_mul(self.chunk_size).ok_or(BackendError::InvalidLayout)?;
                let layout = Layout::from_size_align(bytes, self.chunk_size.max(align)).map_err(invalid)?;
                Ok(alloc::vec![layout])
            }
            _ => Ok(alloc::vec![Layout::from_size_align(size, align).map_err(invalid)?]),
        }
    }

    /// Give blocks back to their allocator.
    fn release_blocks(&self, heap: &mut ArenaHeap, blocks: &[Block]) {
        for block in blocks {
            let Some(ptr) = self.memory.translate(block.addr, block.layout.size()).and_then(NonNull::new) else {
                error!("[ARENA] block {} outside simulated memory", block.addr);
                continue;
            };
            // SAFETY: ptr/layout are exactly what allocate_first_fit
            // returned for this heap, and the block is freed once.
            unsafe { heap.heap.deallocate(ptr, block.layout) };
        }
    }
}

impl BufferBackend for ArenaBackend {
    fn attach_heap(&self, desc: &HeapDescriptor) -> Result<(), BackendError> {
        if desc.size < MIN_HEAP_SIZE {
            return Err(BackendError::InvalidLayout);
        }
        let bottom = self.memory.translate(desc.base, desc.size).ok_or(BackendError::InvalidLayout)?;

        let mut inner = self.inner.lock();
        if inner.heaps.contains_key(&desc.kind) {
            return Err(BackendError::AlreadyAttached);
        }

        // SAFETY: [bottom, bottom + size) is inside the simulated window,
        // which the Arc keeps alive. The heap registry guarantees the
        // range is not owned by another attached allocator, except a
        // carve-out lying in a block its backing allocator handed out.
        let heap = unsafe { Heap::new(bottom, desc.size) };
        inner.heaps.insert(desc.kind, ArenaHeap { desc: *desc, heap, live: 0 });
        debug!("[ARENA] attached {:?}", desc);
        Ok(())
    }

    fn detach_heap(&self, kind: HeapKind) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        match inner.heaps.get(&kind) {
            None => Err(BackendError::UnknownHeap),
            Some(h) if h.live != 0 => Err(BackendError::InUse),
            Some(_) => {
                if let Some(heap) = inner.heaps.remove(&kind) {
                    debug!("[ARENA] detached {:?}", heap.desc);
                }
                Ok(())
            }
        }
    }

    fn allocate(&self, kind: HeapKind, size: usize, align: usize) -> Result<BackendId, BackendError> {
        if size == 0 || !align.is_power_of_two() {
            return Err(BackendError::InvalidLayout);
        }
        let layouts = self.plan_blocks(kind, size, align)?;

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let heap = inner.heaps.get_mut(&kind).ok_or(BackendError::UnknownHeap)?;

        let mut blocks = Vec::with_capacity(layouts.len());
        for layout in layouts {
            let got = heap
                .heap
                .allocate_first_fit(layout)
                .ok()
                .and_then(|ptr| self.memory.phys_of(ptr.as_ptr()));
            match got {
                Some(addr) => blocks.push(Block { addr, layout }),
                None => {
                    self.release_blocks(heap, &blocks);
                    debug!("[ARENA] {} exhausted: {:#x} bytes align {:#x}", kind, size, align);
                    return Err(BackendError::OutOfMemory);
                }
            }
        }

        let pieces: Vec<Extent> = blocks.iter().map(|b| Extent::new(b.addr, b.layout.size())).collect();
        let extents = match ExtentView::from_extents(&pieces) {
            Some(view) => view.as_slice().to_vec(),
            None => pieces,
        };

        heap.live += 1;
        let id = BackendId::new(inner.next_id);
        inner.next_id += 1;
        inner.allocations.insert(id, Allocation { kind, blocks, extents });
        Ok(id)
    }

    fn free(&self, id: BackendId) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let Some(allocation) = inner.allocations.remove(&id) else {
            error!("[ARENA] free of unknown {:?}", id);
            return;
        };
        match inner.heaps.get_mut(&allocation.kind) {
            Some(heap) => {
                self.release_blocks(heap, &allocation.blocks);
                heap.live -= 1;
            }
            None => error!("[ARENA] {:?} outlived heap {}", id, allocation.kind),
        }
        inner.frees += 1;
    }

    fn lookup(&self, id: BackendId) -> Option<Vec<Extent>> {
        self.inner.lock().allocations.get(&id).map(|a| a.extents.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIB;

    const BASE: usize = 0x1000_0000;

    fn backend() -> ArenaBackend {
        let memory = Arc::new(SimMemory::new(PhysAddr::new(BASE), 16 * MIB).unwrap());
        ArenaBackend::new(memory)
    }

    fn desc(kind: HeapKind, base: usize, size: usize) -> HeapDescriptor {
        HeapDescriptor::new(kind, PhysAddr::new(base), size)
    }

    #[test]
    fn test_contiguous_allocation_inside_heap() {
        let be = backend();
        be.attach_heap(&desc(HeapKind::Carveout, BASE, 4 * MIB)).unwrap();
        let id = be.allocate(HeapKind::Carveout, MIB, 0x1000).unwrap();
        let extents = be.lookup(id).unwrap();
        assert_eq!(extents.len(), 1);
        assert_eq!(extents[0].len, MIB);
        assert!(extents[0].phys_addr.is_aligned_to(0x1000));
        assert!(extents[0].phys_addr.as_usize() >= BASE);
        assert!(extents[0].phys_addr.as_usize() + MIB <= BASE + 4 * MIB);
    }

    #[test]
    fn test_exhaustion_and_reuse() {
        let be = backend();
        be.attach_heap(&desc(HeapKind::SystemContiguous, BASE, MIB)).unwrap();
        let a = be.allocate(HeapKind::SystemContiguous, MIB / 2, 0x1000).unwrap();
        assert_eq!(
            be.allocate(HeapKind::SystemContiguous, MIB, 0x1000),
            Err(BackendError::OutOfMemory)
        );
        be.free(a);
        assert_eq!(be.free_count(), 1);
        assert!(be.allocate(HeapKind::SystemContiguous, MIB, 0x1000).is_ok());
    }

    #[test]
    fn test_unknown_heap() {
        let be = backend();
        assert_eq!(be.allocate(HeapKind::CustomSram, 0x1000, 0x1000), Err(BackendError::UnknownHeap));
        assert_eq!(be.detach_heap(HeapKind::CustomSram), Err(BackendError::UnknownHeap));
    }

    #[test]
    fn test_fixed_chunk_rounds_up() {
        let be = backend();
        be.attach_heap(&desc(HeapKind::FixedChunk, BASE, 64 * 1024)).unwrap();
        let id = be.allocate(HeapKind::FixedChunk, 100, 8).unwrap();
        let extents = be.lookup(id).unwrap();
        assert_eq!(extents[0].len, FIXED_CHUNK_SIZE);
        assert!(extents[0].phys_addr.is_aligned_to(FIXED_CHUNK_SIZE));
    }

    #[test]
    fn test_pooled_allocation_is_page_granular() {
        let be = backend();
        be.attach_heap(&desc(HeapKind::SystemPooled, BASE, MIB)).unwrap();
        let id = be.allocate(HeapKind::SystemPooled, 3 * PAGE_SIZE + 1, 8).unwrap();
        let extents = be.lookup(id).unwrap();
        assert_eq!(extents.iter().map(|e| e.len).sum::<usize>(), 4 * PAGE_SIZE);
        assert!(extents.iter().all(|e| e.phys_addr.is_page_aligned()));
    }

    #[test]
    fn test_detach_refused_while_in_use() {
        let be = backend();
        be.attach_heap(&desc(HeapKind::CmaBacked, BASE, 8 * MIB)).unwrap();
        assert_eq!(
            be.attach_heap(&desc(HeapKind::CmaBacked, BASE, 8 * MIB)),
            Err(BackendError::AlreadyAttached)
        );
        let id = be.allocate(HeapKind::CmaBacked, 2 * MIB, MIB).unwrap();
        assert_eq!(be.detach_heap(HeapKind::CmaBacked), Err(BackendError::InUse));
        be.free(id);
        be.detach_heap(HeapKind::CmaBacked).unwrap();
        assert_eq!(be.live_allocations(), 0);
    }

    #[test]
    fn test_carved_heap_serves_from_backing_block() {
        let be = backend();
        be.attach_heap(&desc(HeapKind::CmaBacked, BASE, 8 * MIB)).unwrap();
        let carved = be.allocate(HeapKind::CmaBacked, 2 * MIB, MIB).unwrap();
        let block = be.lookup(carved).unwrap()[0];

        be.attach_heap(&desc(HeapKind::Carveout, block.phys_addr.as_usize(), block.len)).unwrap();
        let id = be.allocate(HeapKind::Carveout, MIB, 0x1000).unwrap();
        let ext = be.lookup(id).unwrap()[0];
        assert!(ext.phys_addr >= block.phys_addr);
        assert!(ext.phys_addr.add(ext.len) <= block.phys_addr.add(block.len));
    }
}
