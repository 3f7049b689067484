//! Heap Manager
//!
//! [`HeapCore`] owns one instance of every service and wires them
//! together. There is no global state: the platform calls
//! [`HeapCore::init`] at startup and [`HeapCore::shutdown`] at teardown,
//! and hands `&HeapCore` to whoever needs it.
//!
//! # Startup
//! 1. Build the memory map from the board's memory blocks
//! 2. Install every board heap; a heap the registry or backend rejects
//!    is logged and stays uninstalled, the rest still come up
//!
//! # Teardown
//! 1. Close every session
//! 2. Return carved heaps to their backing heaps
//! 3. Detach the remaining heaps

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use log::{info, warn};

use crate::backend::{BufferBackend, StaticMemoryMap};
use crate::buffer::{AllocationSession, HandleId, SessionId, SessionTable, SessionUsage};
use crate::config::{BoardConfig, CoreConfig};
use crate::context::HeapContext;
use crate::dma::{CopyEngine, CopyStats, DmaController};
use crate::error::Result;
use crate::heap::{CarveoutRecord, HeapDescriptor, HeapKind, HeapRegistry, HeapResizer, RangeOracle, ResizeState};

/// The physical-memory heap manager.
pub struct HeapCore {
    ctx: Arc<HeapContext>,
    sessions: SessionTable,
    resizer: HeapResizer,
    copier: CopyEngine,
}

impl HeapCore {
    /// Bring the manager up from a board description.
    pub fn init(
        config: CoreConfig,
        board: &BoardConfig,
        backend: Arc<dyn BufferBackend>,
        dma: Arc<dyn DmaController>,
    ) -> Self {
        let registry = HeapRegistry::new(Box::new(StaticMemoryMap::new(board.memory.clone())));
        let ctx = Arc::new(HeapContext::new(registry, backend));

        let mut skipped = 0;
        for desc in &board.heaps {
            if let Err(err) = ctx.install_heap(*desc) {
                warn!("[HEAP] skipping {:?}: {}", desc, err);
                skipped += 1;
            }
        }
        info!(
            "[HEAP] core up: {} heaps installed, {} skipped",
            ctx.registry().len(),
            skipped
        );

        Self {
            sessions: SessionTable::new(ctx.clone()),
            resizer: HeapResizer::new(ctx.clone()),
            copier: CopyEngine::new(dma, config.copy_timeout_ms),
            ctx,
        }
    }

    /// Tear everything down.
    pub fn shutdown(self) {
        self.sessions.close_all();
        self.resizer.discard_all();
        for desc in self.ctx.registry().all() {
            if let Err(err) = self.ctx.remove_heap(desc.kind) {
                warn!("[HEAP] {} left attached at shutdown: {}", desc.kind, err);
            }
        }
        info!("[HEAP] core down");
    }

    pub fn registry(&self) -> &HeapRegistry {
        self.ctx.registry()
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Containment queries for mapping paths.
    pub fn oracle(&self) -> RangeOracle<'_> {
        RangeOracle::new(self.ctx.registry())
    }

    pub fn heaps(&self) -> Vec<HeapDescriptor> {
        self.ctx.registry().all().collect()
    }

    pub fn open_session(&self, name: &str) -> Arc<AllocationSession> {
        self.sessions.open(name)
    }

    pub fn close_session(&self, id: SessionId) -> Result<()> {
        self.sessions.close(id)
    }

    /// Per-session live bytes by heap.
    pub fn usage(&self) -> Vec<SessionUsage> {
        self.sessions.usage()
    }

    /// Live bytes per heap, summed over all sessions.
    pub fn heap_usage(&self) -> BTreeMap<HeapKind, usize> {
        let mut total = BTreeMap::new();
        for line in self.sessions.usage() {
            for (kind, bytes) in line.bytes {
                *total.entry(kind).or_insert(0) += bytes;
            }
        }
        total
    }

    /// See [`HeapResizer::resize`].
    pub fn resize(&self, kind: HeapKind, new_size: usize) -> Result<()> {
        self.resizer.resize(&self.sessions, kind, new_size)
    }

    pub fn resize_mb(&self, kind: HeapKind, mb: usize) -> Result<()> {
        self.resizer.resize_mb(&self.sessions, kind, mb)
    }

    pub fn resize_state(&self, kind: HeapKind) -> Option<ResizeState> {
        self.resizer.state(kind)
    }

    pub fn carveout(&self, kind: HeapKind) -> Option<CarveoutRecord> {
        self.resizer.carveout(kind)
    }

    /// See [`CopyEngine::copy`].
    pub fn copy(&self, session: &AllocationSession, src: HandleId, dst: HandleId, len: usize) -> Result<()> {
        self.copier.copy(session, src, dst, len)
    }

    pub fn copy_at(
        &self,
        session: &AllocationSession,
        src: HandleId,
        src_off: usize,
        dst: HandleId,
        dst_off: usize,
        len: usize,
    ) -> Result<()> {
        self.copier.copy_at(session, src, src_off, dst, dst_off, len)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn copy_between(
        &self,
        src_session: &AllocationSession,
        src: HandleId,
        src_off: usize,
        dst_session: &AllocationSession,
        dst: HandleId,
        dst_off: usize,
        len: usize,
    ) -> Result<()> {
        self.copier
            .copy_between(src_session, src, src_off, dst_session, dst, dst_off, len)
    }

    pub fn copy_stats(&self) -> CopyStats {
        self.copier.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ArenaBackend, SimMemory};
    use crate::config::{MemoryBlock, MIB};
    use crate::dma::SimDma;
    use crate::error::HeapError;
    use crate::mm::{Extent, PhysAddr, PhysRange};
    use crate::testing::{board, memory, IMPORT_BASE, MEM_BASE, MEM_SIZE};
    use alloc::vec;

    struct Fixture {
        core: HeapCore,
        backend: Arc<ArenaBackend>,
        dma: Arc<SimDma>,
        memory: Arc<SimMemory>,
    }

    fn fixture_with(board: &BoardConfig) -> Fixture {
        let memory = memory();
        let backend = Arc::new(ArenaBackend::new(memory.clone()));
        let dma = Arc::new(SimDma::new(memory.clone(), 2));
        let core = HeapCore::init(CoreConfig::default(), board, backend.clone(), dma.clone());
        Fixture {
            core,
            backend,
            dma,
            memory,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(&board())
    }

    #[test]
    fn test_init_installs_board_heaps() {
        let f = fixture();
        assert_eq!(f.core.heaps().len(), 6);
        assert!(f.core.registry().is_consistent());
        let carveout = f.core.registry().lookup(HeapKind::Carveout).unwrap();
        assert_eq!(carveout.base, PhysAddr::new(0x1000_0000));
        assert_eq!(carveout.size, 4 * MIB);
        assert!(f.core.registry().lookup(HeapKind::CmaReserved).is_none());
    }

    #[test]
    fn test_init_skips_rejected_heaps() {
        let board = BoardConfig::new()
            .with_memory(MemoryBlock::new(PhysAddr::new(MEM_BASE), MEM_SIZE))
            .with_heap(HeapDescriptor::new(HeapKind::Carveout, PhysAddr::new(MEM_BASE), 4 * MIB))
            // Overlaps the carveout without being its backing heap.
            .with_heap(HeapDescriptor::new(
                HeapKind::SystemContiguous,
                PhysAddr::new(MEM_BASE + MIB),
                MIB,
            ))
            // Runs past the end of memory.
            .with_heap(HeapDescriptor::new(
                HeapKind::FixedChunk,
                PhysAddr::new(MEM_BASE + MEM_SIZE - MIB),
                2 * MIB,
            ))
            .with_heap(HeapDescriptor::new(
                HeapKind::CustomSram,
                PhysAddr::new(MEM_BASE + 8 * MIB),
                MIB,
            ));
        let f = fixture_with(&board);
        let kinds: Vec<HeapKind> = f.core.heaps().iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![HeapKind::Carveout, HeapKind::CustomSram]);
    }

    #[test]
    fn test_resize_scenario_end_to_end() {
        let f = fixture();
        let cam = f.core.open_session("camera");
        let h1 = cam.create_handle(HeapKind::Carveout, MIB, 0x1000).unwrap();

        assert_eq!(f.core.resize_mb(HeapKind::Carveout, 2), Err(HeapError::HeapBusy));
        cam.release(h1).unwrap();
        f.core.resize_mb(HeapKind::Carveout, 2).unwrap();

        assert_eq!(f.core.registry().lookup(HeapKind::Carveout).unwrap().size, 2 * MIB);
        assert_eq!(f.core.resize_state(HeapKind::Carveout), Some(ResizeState::Installed));
        let record = f.core.carveout(HeapKind::Carveout).unwrap();
        let cma = f.core.registry().lookup(HeapKind::CmaBacked).unwrap();
        let carved = PhysRange::new(record.start, record.size).unwrap();
        assert!(cma.range().unwrap().contains_range(&carved));
    }

    #[test]
    fn test_oracle_tracks_resizes() {
        let f = fixture();
        let old = f.core.registry().lookup(HeapKind::Carveout).unwrap();
        assert!(f.core.oracle().contains(old.base, 0x1000));
        assert!(!f.core.oracle().contains(PhysAddr::new(IMPORT_BASE), 0x1000));
        assert!(!f.core.oracle().contains(PhysAddr::NULL, 0x1000));
        assert!(!f.core.oracle().contains(old.base, 0));

        f.core.resize(HeapKind::Carveout, 0).unwrap();
        assert!(!f.core.oracle().contains(old.base, 0x1000));

        f.core.resize_mb(HeapKind::Carveout, 1).unwrap();
        let new = f.core.registry().lookup(HeapKind::Carveout).unwrap();
        assert!(f.core.oracle().contains(new.base, new.size));
        // Straddles the carved heap and the rest of its backing heap.
        assert!(!f.core.oracle().contains(new.base, new.size + 0x1000));
    }

    #[test]
    fn test_copy_through_facade() {
        let f = fixture();
        let s = f.core.open_session("g2d");
        let src = s.create_handle(HeapKind::SystemContiguous, 0x2000, 0x1000).unwrap();
        let dst = s
            .import(&[
                Extent::new(PhysAddr::new(IMPORT_BASE), 0x1000),
                Extent::new(PhysAddr::new(IMPORT_BASE + 0x3000), 0x1000),
            ])
            .unwrap();
        let data: Vec<u8> = (0..0x2000).map(|i| (i % 251) as u8).collect();
        f.memory.write(s.phys(src).unwrap(), &data).unwrap();

        f.core.copy_at(&s, src, 0x800, dst, 0x800, 0x1000).unwrap();

        let mut out = vec![0u8; 0x800];
        f.memory.read(PhysAddr::new(IMPORT_BASE + 0x800), &mut out).unwrap();
        assert_eq!(out, data[0x800..0x1000]);
        f.memory.read(PhysAddr::new(IMPORT_BASE + 0x3000), &mut out).unwrap();
        assert_eq!(out, data[0x1000..0x1800]);
        assert_eq!(f.core.copy_stats().segments, 2);

        assert_eq!(f.core.copy(&s, src, dst, 0x4000), Err(HeapError::RangeMismatch));
        assert_eq!(f.dma.acquisitions(), 1);
    }

    #[test]
    fn test_usage_listing() {
        let f = fixture();
        let cam = f.core.open_session("camera");
        let dsp = f.core.open_session("dsp");
        cam.create_handle(HeapKind::Carveout, 0x4000, 0x1000).unwrap();
        dsp.create_handle(HeapKind::Carveout, 0x2000, 0x1000).unwrap();
        dsp.create_handle(HeapKind::FixedChunk, 100, 8).unwrap();

        let lines = f.core.usage();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].name, "camera");
        let total = f.core.heap_usage();
        assert_eq!(total[&HeapKind::Carveout], 0x6000);
        assert_eq!(total[&HeapKind::FixedChunk], 4096);

        f.core.close_session(dsp.id()).unwrap();
        assert_eq!(f.core.heap_usage()[&HeapKind::Carveout], 0x4000);
        assert_eq!(f.core.close_session(dsp.id()), Err(HeapError::NotFound));
    }

    #[test]
    fn test_shutdown_returns_everything() {
        let f = fixture();
        let s = f.core.open_session("isp");
        s.create_handle(HeapKind::SystemPooled, 3 * 0x1000, 0x1000).unwrap();
        f.core.resize_mb(HeapKind::SramLimited, 0).unwrap();
        f.core.resize(HeapKind::SramLimited, 256 * 1024).unwrap();
        f.core.resize_mb(HeapKind::Carveout, 1).unwrap();

        let backend = f.backend.clone();
        f.core.shutdown();
        assert_eq!(backend.live_allocations(), 0);
        assert!(backend.heap_usage(HeapKind::CmaBacked).is_none());
        assert!(s.is_closed());
    }
}
