//! Shared services
//!
//! The registry and backend are owned once per [`HeapCore`](crate::HeapCore)
//! and handed to every session and engine by `Arc`, never through a
//! global.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use log::warn;

use crate::backend::BufferBackend;
use crate::buffer::HandleId;
use crate::error::{BackendError, Result};
use crate::heap::{HeapDescriptor, HeapKind, HeapRegistry};

/// Services shared by all sessions, the resizer and the copy engine.
pub struct HeapContext {
    registry: HeapRegistry,
    backend: Arc<dyn BufferBackend>,
    next_handle: AtomicU64,
}

impl HeapContext {
    pub fn new(registry: HeapRegistry, backend: Arc<dyn BufferBackend>) -> Self {
        Self {
            registry,
            backend,
            next_handle: AtomicU64::new(1),
        }
    }

    #[inline]
    pub fn registry(&self) -> &HeapRegistry {
        &self.registry
    }

    #[inline]
    pub fn backend(&self) -> &dyn BufferBackend {
        &*self.backend
    }

    /// Install a heap and start serving it from the backend.
    ///
    /// If the backend refuses the heap, the registry entry is rolled
    /// back so the two never disagree.
    pub fn install_heap(&self, desc: HeapDescriptor) -> Result<()> {
        self.registry.install(desc)?;
        if let Err(err) = self.backend.attach_heap(&desc) {
            warn!("[HEAP] backend refused {:?}: {}", desc, err);
            self.registry.uninstall(desc.kind);
            return Err(err.into());
        }
        Ok(())
    }

    /// Detach a heap from the backend, then uninstall it.
    ///
    /// Returns `Ok(None)` if the heap was not installed. If the backend
    /// still holds allocations in it, nothing changes and the call fails
    /// with `HeapBusy`.
    pub fn remove_heap(&self, kind: HeapKind) -> Result<Option<HeapDescriptor>> {
        if self.registry.lookup(kind).is_none() {
            return Ok(None);
        }
        match self.backend.detach_heap(kind) {
            Ok(()) | Err(BackendError::UnknownHeap) => {}
            Err(err) => {
                warn!("[HEAP] backend detach of {} failed: {}", kind, err);
                return Err(err.into());
            }
        }
        Ok(self.registry.uninstall(kind))
    }

    /// Handle ids are unique across sessions and never reused.
    pub(crate) fn next_handle_id(&self) -> HandleId {
        HandleId::new(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }
}
