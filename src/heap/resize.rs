//! Heap Resizer
//!
//! Shrinks or grows a dynamically-sized heap at runtime by discarding it
//! and carving a new one from its backing heap.
//!
//! # State Machine
//! ```text
//! Requested -> CheckingSessions -> Aborted
//!                               -> Discarding -> Aborted
//!                                             -> Recreating -> Installed
//! ```
//!
//! # Safety Rule
//! A resize of kind K proceeds only if no session holds a live handle in
//! K. The check runs under the session-enumeration lock with K frozen in
//! the registry, so no handle in K can appear between the scan and the
//! discard.
//!
//! # Failure
//! - Live handles: `HeapBusy`, nothing touched, no retry
//! - Backend still holding allocations in the heap at discard time:
//!   `HeapBusy`, the heap stays installed
//! - Recreate failure: the heap stays uninstalled and `ResizeFailed` is
//!   returned; a later resize may bring it back

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use log::{debug, info, warn};
use spin::Mutex;

use super::carveout::{CarveoutRecord, CarveoutTable};
use super::descriptor::HeapDescriptor;
use super::kind::HeapKind;
use crate::buffer::{count_kind, SessionTable};
use crate::config::MIB;
use crate::context::HeapContext;
use crate::error::{HeapError, Result};
use crate::mm::ExtentView;

/// Progress of one resize operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeState {
    Requested,
    CheckingSessions,
    Aborted,
    Discarding,
    Recreating,
    Installed,
}

impl ResizeState {
    /// Legal transitions.
    const fn can_advance(self, next: ResizeState) -> bool {
        matches!(
            (self, next),
            (Self::Requested, Self::CheckingSessions)
                | (Self::CheckingSessions, Self::Aborted)
                | (Self::CheckingSessions, Self::Discarding)
                | (Self::Discarding, Self::Aborted)
                | (Self::Discarding, Self::Recreating)
                | (Self::Recreating, Self::Installed)
        )
    }
}

/// Discards and recreates resizable heaps.
pub struct HeapResizer {
    ctx: Arc<HeapContext>,
    carveouts: CarveoutTable,
    states: Mutex<BTreeMap<HeapKind, ResizeState>>,
}

impl HeapResizer {
    pub fn new(ctx: Arc<HeapContext>) -> Self {
        Self {
            ctx,
            carveouts: CarveoutTable::new(),
            states: Mutex::new(BTreeMap::new()),
        }
    }

    /// Last state reached by a resize of `kind`.
    pub fn state(&self, kind: HeapKind) -> Option<ResizeState> {
        self.states.lock().get(&kind).copied()
    }

    /// Carve-out record of `kind`, if it was carved at runtime.
    pub fn carveout(&self, kind: HeapKind) -> Option<CarveoutRecord> {
        self.carveouts.get(kind)
    }

    fn advance(&self, kind: HeapKind, next: ResizeState) {
        let mut states = self.states.lock();
        let prev = states.insert(kind, next);
        debug_assert!(
            next == ResizeState::Requested || prev.is_some_and(|p| p.can_advance(next)),
            "illegal resize transition {:?} -> {:?}",
            prev,
            next
        );
        debug!("[RESIZE] {}: {:?} -> {:?}", kind, prev, next);
    }

    /// Resize `kind` to `new_size` bytes; zero removes the heap.
    ///
    /// # Errors
    /// - `NotResizable` if the kind has no backing heap
    /// - `HeapBusy` if any session holds a handle in the heap
    /// - `ResizeFailed` if the new heap could not be carved or installed
    pub fn resize(&self, sessions: &SessionTable, kind: HeapKind, new_size: usize) -> Result<()> {
        let backing = kind.backing().ok_or(HeapError::NotResizable)?;
        let registry = self.ctx.registry();

        let current = registry.lookup(kind);
        if current.map_or(0, |d| d.size) == new_size {
            debug!("[RESIZE] {} already {:#x} bytes", kind, new_size);
            return Ok(());
        }

        self.advance(kind, ResizeState::Requested);
        let enumeration = sessions.enumerate();
        self.advance(kind, ResizeState::CheckingSessions);
        registry.freeze(kind);

        let live = count_kind(&enumeration, kind);
        if live > 0 {
            registry.thaw(kind);
            self.advance(kind, ResizeState::Aborted);
            warn!("[RESIZE] {} busy: {} live handles", kind, live);
            return Err(HeapError::HeapBusy);
        }

        self.advance(kind, ResizeState::Discarding);
        let old = match self.ctx.remove_heap(kind) {
            Ok(old) => old,
            Err(err) => {
                registry.thaw(kind);
                self.advance(kind, ResizeState::Aborted);
                warn!("[RESIZE] {} discard refused: {}", kind, err);
                return Err(HeapError::HeapBusy);
            }
        };
        if let Some(record) = self.carveouts.take(kind) {
            self.ctx.backend().free(record.backing_id);
            debug!("[RESIZE] {} returned {:#x} bytes to {}", kind, record.size, record.backing_heap);
        }

        self.advance(kind, ResizeState::Recreating);
        let result = if new_size == 0 {
            Ok(())
        } else {
            self.recreate(kind, backing, new_size, old)
        };
        registry.thaw(kind);
        drop(enumeration);

        match result {
            Ok(()) => {
                self.advance(kind, ResizeState::Installed);
                info!(
                    "[RESIZE] {} resized {:#x} -> {:#x} bytes",
                    kind,
                    old.map_or(0, |d| d.size),
                    new_size
                );
                Ok(())
            }
            Err(err) => {
                warn!("[RESIZE] {} recreate failed ({}); heap left uninstalled", kind, err);
                Err(HeapError::ResizeFailed)
            }
        }
    }

    /// Resize to `mb` MiB, as requested from the operator surface.
    pub fn resize_mb(&self, sessions: &SessionTable, kind: HeapKind, mb: usize) -> Result<()> {
        let bytes = mb.checked_mul(MIB).ok_or(HeapError::InvalidArgument)?;
        self.resize(sessions, kind, bytes)
    }

    /// Uninstall every carved heap and return its memory to the backing
    /// heap. Used at shutdown, after all sessions are closed.
    pub(crate) fn discard_all(&self) {
        for record in self.carveouts.drain() {
            if let Err(err) = self.ctx.remove_heap(record.heap_kind) {
                warn!("[RESIZE] {} still in use at discard: {}", record.heap_kind, err);
                continue;
            }
            self.ctx.backend().free(record.backing_id);
            debug!(
                "[RESIZE] {} discarded ({:#x} bytes back to {})",
                record.heap_kind, record.size, record.backing_heap
            );
        }
    }

    /// Carve `size` bytes from `backing` and install them as `kind`.
    fn recreate(
        &self,
        kind: HeapKind,
        backing: HeapKind,
        size: usize,
        old: Option<HeapDescriptor>,
    ) -> Result<()> {
        let template = old.unwrap_or_else(|| HeapDescriptor::uninstalled(kind));
        let backend = self.ctx.backend();

        let backing_id = backend.allocate(backing, size, template.align)?;
        let base = match backend.lookup(backing_id).and_then(|e| ExtentView::from_extents(&e)) {
            Some(ExtentView::Contiguous(ext)) if ext.len >= size => ext.phys_addr,
            _ => {
                backend.free(backing_id);
                return Err(HeapError::RangeMismatch);
            }
        };

        let desc = HeapDescriptor {
            base,
            size,
            ..template
        };
        if let Err(err) = self.ctx.install_heap(desc) {
            backend.free(backing_id);
            return Err(err);
        }

        self.carveouts.insert(CarveoutRecord {
            heap_kind: kind,
            backing_heap: backing,
            backing_id,
            start: base,
            size,
            valid: true,
        });
        Ok(())
    }
}
