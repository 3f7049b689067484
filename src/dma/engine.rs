//! Copy Engine
//!
//! Moves bytes between two buffer handles with the copy hardware instead
//! of the CPU.
//!
//! # Flow
//! 1. Pin both handles (temporary references) and read their extents
//! 2. Plan segments; an uncovered range fails here, before any channel
//!    is claimed
//! 3. Claim one channel (fail fast with `NoChannel`)
//! 4. Per segment: submit, wait with the fixed timeout; on timeout the
//!    channel is terminated before returning
//! 5. Release the channel and unpin both handles, on every path
//!
//! A single segment (both sides contiguous) is atomic at this layer. A
//! multi-segment copy that fails part way leaves the destination
//! partially written and reports the failing segment's error.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use log::{debug, warn};

use super::channel::{ChannelGuard, DmaCaps, DmaController};
use super::plan::{plan, Segment};
use crate::buffer::{AllocationSession, HandleId};
use crate::error::{DmaFault, HeapError, Result};
use crate::mm::ExtentView;

/// Copy counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyStats {
    /// Copies that completed.
    pub copies: u64,
    /// Hardware segments that completed.
    pub segments: u64,
    /// Copies that failed, for any reason.
    pub failures: u64,
}

/// Hardware-offloaded buffer copies.
pub struct CopyEngine {
    dma: Arc<dyn DmaController>,
    timeout_ms: u32,
    copies: AtomicU64,
    segments: AtomicU64,
    failures: AtomicU64,
}

impl CopyEngine {
    pub fn new(dma: Arc<dyn DmaController>, timeout_ms: u32) -> Self {
        Self {
            dma,
            timeout_ms,
            copies: AtomicU64::new(0),
            segments: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CopyStats {
        CopyStats {
            copies: self.copies.load(Ordering::Relaxed),
            segments: self.segments.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Copy the first `len` bytes of `src` to the start of `dst`.
    pub fn copy(&self, session: &AllocationSession, src: HandleId, dst: HandleId, len: usize) -> Result<()> {
        self.copy_between(session, src, 0, session, dst, 0, len)
    }

    /// Copy `len` bytes at `src_off` in `src` to `dst_off` in `dst`.
    pub fn copy_at(
        &self,
        session: &AllocationSession,
        src: HandleId,
        src_off: usize,
        dst: HandleId,
        dst_off: usize,
        len: usize,
    ) -> Result<()> {
        self.copy_between(session, src, src_off, session, dst, dst_off, len)
    }

    /// Copy between handles rooted in different sessions.
    ///
    /// # Errors
    /// - `NotFound` if either handle is absent from its session
    /// - `RangeMismatch` if either side's extents do not cover the range
    /// - `NoChannel` if every channel is busy
    /// - `SubmitFailed` / `Timeout` on hardware failure
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
        let src_view = src_session.pin(src)?;
        let dst_view = match dst_session.pin(dst) {
            Ok(view) => view,
            Err(err) => {
                src_session.unpin(src);
                return Err(err);
            }
        };

        let result = self.transfer(&src_view, src_off, &dst_view, dst_off, len);

        dst_session.unpin(dst);
        src_session.unpin(src);

        match result {
            Ok(()) => self.copies.fetch_add(1, Ordering::Relaxed),
            Err(err) => {
                warn!("[COPY] {:?} -> {:?} ({:#x} bytes) failed: {}", src, dst, len, err);
                self.failures.fetch_add(1, Ordering::Relaxed)
            }
        };
        result
    }

    fn transfer(&self, src: &ExtentView, src_off: usize, dst: &ExtentView, dst_off: usize, len: usize) -> Result<()> {
        let segments = plan(src.as_slice(), src_off, dst.as_slice(), dst_off, len)?;
        if segments.is_empty() {
            return Ok(());
        }

        let dma = &*self.dma;
        let channel = ChannelGuard::acquire(dma, DmaCaps::MEM_TO_MEM).ok_or(HeapError::NoChannel)?;
        if segments.len() == 1 {
            debug!("[COPY] {:?}: contiguous {:#x} bytes", channel.id(), len);
        } else {
            debug!("[COPY] {:?}: {} segments for {:#x} bytes", channel.id(), segments.len(), len);
        }

        for segment in &segments {
            self.run_segment(&channel, segment)?;
            self.segments.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn run_segment(&self, channel: &ChannelGuard<'_>, seg: &Segment) -> Result<()> {
        let dma = &*self.dma;
        if let Err(fault) = dma.submit(channel.id(), seg.src, seg.dst, seg.len) {
            warn!("[COPY] {:?} submit {} -> {} failed: {}", channel.id(), seg.src, seg.dst, fault);
            return Err(HeapError::SubmitFailed);
        }

        match dma.wait(channel.id(), self.timeout_ms) {
            Ok(()) => Ok(()),
            Err(DmaFault::Timeout) => {
                dma.terminate(channel.id());
                warn!("[COPY] {:?} timed out after {} ms", channel.id(), self.timeout_ms);
                Err(HeapError::Timeout)
            }
            Err(fault) => {
                warn!("[COPY] {:?} transfer faulted: {}", channel.id(), fault);
                Err(HeapError::SubmitFailed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SessionTable;
    use crate::config::COPY_TIMEOUT_MS;
    use crate::dma::SimDma;
    use crate::heap::HeapKind;
    use crate::mm::{Extent, PhysAddr};
    use crate::testing::{rig, Rig, IMPORT_BASE};
    use alloc::vec;
    use alloc::vec::Vec;

    struct Bench {
        rig: Rig,
        table: SessionTable,
        dma: Arc<SimDma>,
        engine: CopyEngine,
    }

    fn bench(channels: usize) -> Bench {
        let rig = rig();
        let table = SessionTable::new(rig.ctx.clone());
        let dma = Arc::new(SimDma::new(rig.memory.clone(), channels));
        let dyn_dma: Arc<dyn DmaController> = dma.clone();
        let engine = CopyEngine::new(dyn_dma, COPY_TIMEOUT_MS);
        Bench { rig, table, dma, engine }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    fn read_view(rig: &Rig, view: &ExtentView) -> Vec<u8> {
        let mut out = Vec::new();
        for ext in view.as_slice() {
            let mut buf = vec![0u8; ext.len];
            rig.memory.read(ext.phys_addr, &mut buf).unwrap();
            out.extend_from_slice(&buf);
        }
        out
    }

    #[test]
    fn test_contiguous_copy_roundtrip() {
        let b = bench(2);
        let s = b.table.open("g2d");
        let src = s.create_handle(HeapKind::SystemContiguous, 0x3000, 0x1000).unwrap();
        let dst = s.create_handle(HeapKind::Carveout, 0x3000, 0x1000).unwrap();
        let data = pattern(0x3000);
        b.rig.memory.write(s.phys(src).unwrap(), &data).unwrap();

        b.engine.copy(&s, src, dst, 0x3000).unwrap();

        assert_eq!(read_view(&b.rig, &s.extents(dst).unwrap()), data);
        assert_eq!(b.dma.submissions(), 1);
        assert_eq!(b.dma.busy_channels(), 0);
        assert_eq!(s.refcount(src).unwrap(), 1);
        assert_eq!(b.engine.stats(), CopyStats { copies: 1, segments: 1, failures: 0 });
    }

    #[test]
    fn test_fragmented_destination_split_at_boundary() {
        let b = bench(1);
        let s = b.table.open("dsp");
        let src = s.create_handle(HeapKind::SystemContiguous, 0x2000, 0x1000).unwrap();
        // Two extents with a gap; the boundary falls 0x1100 bytes in.
        let first = Extent::new(PhysAddr::new(IMPORT_BASE), 0x1100);
        let second = Extent::new(PhysAddr::new(IMPORT_BASE + 0x8000), 0x1000);
        let dst = s.import(&[first, second]).unwrap();

        let data = pattern(0x2000);
        b.rig.memory.write(s.phys(src).unwrap(), &data).unwrap();
        b.engine.copy(&s, src, dst, 0x2000).unwrap();

        let mut head = vec![0u8; 0x1100];
        let mut tail = vec![0u8; 0xf00];
        b.rig.memory.read(first.phys_addr, &mut head).unwrap();
        b.rig.memory.read(second.phys_addr, &mut tail).unwrap();
        assert_eq!(head, data[..0x1100]);
        assert_eq!(tail, data[0x1100..]);
        assert_eq!(b.dma.submissions(), 2);
        assert_eq!(b.dma.acquisitions(), 1);

        // Nothing landed past the copied range in the second extent.
        let mut after = [0u8; 0x100];
        b.rig.memory.read(second.phys_addr.add(0xf00), &mut after).unwrap();
        assert!(after.iter().all(|&x| x == 0));
    }

    #[test]
    fn test_fragmented_source_with_offsets() {
        let b = bench(1);
        let s = b.table.open("isp");
        let exts = [
            Extent::new(PhysAddr::new(IMPORT_BASE), 0x800),
            Extent::new(PhysAddr::new(IMPORT_BASE + 0x4000), 0x800),
            Extent::new(PhysAddr::new(IMPORT_BASE + 0x9000), 0x800),
        ];
        let src = s.import(&exts).unwrap();
        let dst = s.create_handle(HeapKind::Carveout, 0x2000, 0x1000).unwrap();

        let data = pattern(0x1800);
        for (i, ext) in exts.iter().enumerate() {
            b.rig.memory.write(ext.phys_addr, &data[i * 0x800..(i + 1) * 0x800]).unwrap();
        }

        // Crosses both source boundaries.
        b.engine.copy_at(&s, src, 0x400, dst, 0x100, 0x1000).unwrap();
        let out = read_view(&b.rig, &s.extents(dst).unwrap());
        assert_eq!(out[0x100..0x1100], data[0x400..0x1400]);
        assert_eq!(b.dma.submissions(), 3);
    }

    #[test]
    fn test_uncovered_length_issues_nothing() {
        let b = bench(1);
        let s = b.table.open("g2d");
        let src = s.create_handle(HeapKind::SystemContiguous, 0x1000, 0x1000).unwrap();
        let dst = s.create_handle(HeapKind::SystemContiguous, 0x2000, 0x1000).unwrap();

        assert_eq!(b.engine.copy(&s, src, dst, 0x1001), Err(HeapError::RangeMismatch));
        assert_eq!(b.dma.acquisitions(), 0);
        assert_eq!(b.dma.submissions(), 0);
        assert_eq!(s.refcount(src).unwrap(), 1);
        assert_eq!(s.refcount(dst).unwrap(), 1);
        assert_eq!(b.engine.stats().failures, 1);
    }

    #[test]
    fn test_no_free_channel() {
        let b = bench(1);
        let s = b.table.open("g2d");
        let src = s.create_handle(HeapKind::SystemContiguous, 0x1000, 0x1000).unwrap();
        let dst = s.create_handle(HeapKind::SystemContiguous, 0x1000, 0x1000).unwrap();

        let held = b.dma.request_channel(DmaCaps::MEM_TO_MEM).unwrap();
        assert_eq!(b.engine.copy(&s, src, dst, 0x1000), Err(HeapError::NoChannel));
        b.dma.release_channel(held);
        b.engine.copy(&s, src, dst, 0x1000).unwrap();
    }

    #[test]
    fn test_submit_failure_releases_channel() {
        let b = bench(1);
        let s = b.table.open("g2d");
        let src = s.create_handle(HeapKind::SystemContiguous, 0x1000, 0x1000).unwrap();
        let dst = s.create_handle(HeapKind::SystemContiguous, 0x1000, 0x1000).unwrap();

        b.dma.inject_fault(1, DmaFault::Rejected);
        assert_eq!(b.engine.copy(&s, src, dst, 0x1000), Err(HeapError::SubmitFailed));
        assert_eq!(b.dma.busy_channels(), 0);
        assert_eq!(s.refcount(dst).unwrap(), 1);

        b.dma.inject_fault(1, DmaFault::Bus);
        assert_eq!(b.engine.copy(&s, src, dst, 0x1000), Err(HeapError::SubmitFailed));
        assert_eq!(b.dma.busy_channels(), 0);
    }

    #[test]
    fn test_timeout_terminates_then_releases() {
        let b = bench(1);
        let s = b.table.open("g2d");
        let src = s.create_handle(HeapKind::SystemContiguous, 0x1000, 0x1000).unwrap();
        let dst = s.create_handle(HeapKind::SystemContiguous, 0x1000, 0x1000).unwrap();

        b.dma.inject_fault(1, DmaFault::Timeout);
        assert_eq!(b.engine.copy(&s, src, dst, 0x1000), Err(HeapError::Timeout));
        assert_eq!(b.dma.terminations(), 1);
        assert_eq!(b.dma.busy_channels(), 0);
    }

    #[test]
    fn test_second_segment_failure_is_reported() {
        let b = bench(1);
        let s = b.table.open("dsp");
        let src = s.create_handle(HeapKind::SystemContiguous, 0x2000, 0x1000).unwrap();
        let dst = s
            .import(&[
                Extent::new(PhysAddr::new(IMPORT_BASE), 0x1000),
                Extent::new(PhysAddr::new(IMPORT_BASE + 0x4000), 0x1000),
            ])
            .unwrap();
        b.rig.memory.write(s.phys(src).unwrap(), &pattern(0x2000)).unwrap();

        b.dma.inject_fault(2, DmaFault::Timeout);
        assert_eq!(b.engine.copy(&s, src, dst, 0x2000), Err(HeapError::Timeout));
        // First half landed, second did not.
        let mut head = vec![0u8; 0x1000];
        b.rig.memory.read(PhysAddr::new(IMPORT_BASE), &mut head).unwrap();
        assert_eq!(head, pattern(0x2000)[..0x1000]);
        assert_eq!(b.dma.completions(), 1);
        assert_eq!(b.dma.busy_channels(), 0);
    }

    #[test]
    fn test_unknown_handle_and_zero_length() {
        let b = bench(1);
        let s = b.table.open("g2d");
        let src = s.create_handle(HeapKind::SystemContiguous, 0x1000, 0x1000).unwrap();
        assert_eq!(b.engine.copy(&s, src, HandleId::new(9999), 0x10), Err(HeapError::NotFound));
        assert_eq!(s.refcount(src).unwrap(), 1);
        b.engine.copy(&s, src, src, 0).unwrap();
        assert_eq!(b.dma.acquisitions(), 0);
    }

    #[test]
    fn test_copy_across_sessions() {
        let b = bench(1);
        let cam = b.table.open("camera");
        let g2d = b.table.open("g2d");
        let src = cam.create_handle(HeapKind::Carveout, 0x1000, 0x1000).unwrap();
        let dst = g2d.create_handle(HeapKind::SystemContiguous, 0x1000, 0x1000).unwrap();
        b.rig.memory.write(cam.phys(src).unwrap(), &pattern(0x1000)).unwrap();

        b.engine.copy_between(&cam, src, 0, &g2d, dst, 0, 0x1000).unwrap();
        assert_eq!(read_view(&b.rig, &g2d.extents(dst).unwrap()), pattern(0x1000));
        assert_eq!(b.rig.backend.free_count(), 0);
    }
}
