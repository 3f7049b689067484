//! Allocation Sessions
//!
//! A session owns the buffer handles created on behalf of one consumer
//! (camera pipeline, 2D engine, DSP client, ...).
//!
//! # Concurrency
//! - Every mutation of the handle map happens under the session lock,
//!   so create/retain/release within a session are totally ordered
//! - Creation holds a registry [`Admission`](crate::heap::Admission)
//!   from before the backend call until the handle is in the map, so a
//!   resize that freezes the kind sees either no handle or the handle
//! - A dying handle is removed from the map and freed in the backend
//!   under one hold of the session lock, so a resize scan never sees a
//!   handle gone while its memory is still allocated

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use log::{debug, error};
use spin::Mutex;

use super::handle::{BufferHandle, HandleId, Origin};
use crate::context::HeapContext;
use crate::error::{HeapError, Result};
use crate::heap::HeapKind;
use crate::mm::{Extent, ExtentView, PhysAddr};

/// Session identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SessionId(u64);

impl SessionId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s#{}", self.0)
    }
}

struct SessionInner {
    handles: BTreeMap<HandleId, BufferHandle>,
    closed: bool,
}

impl SessionInner {
    /// A handle the consumer can still see.
    fn visible(&self, id: HandleId) -> Result<&BufferHandle> {
        if self.closed {
            return Err(HeapError::SessionClosed);
        }
        self.handles.get(&id).filter(|h| !h.is_orphaned()).ok_or(HeapError::NotFound)
    }

    fn visible_mut(&mut self, id: HandleId) -> Result<&mut BufferHandle> {
        if self.closed {
            return Err(HeapError::SessionClosed);
        }
        self.handles.get_mut(&id).filter(|h| !h.is_orphaned()).ok_or(HeapError::NotFound)
    }
}

/// The ownership scope for one consumer's buffers.
pub struct AllocationSession {
    id: SessionId,
    name: String,
    ctx: Arc<HeapContext>,
    inner: Mutex<SessionInner>,
}

impl AllocationSession {
    pub(crate) fn new(id: SessionId, name: String, ctx: Arc<HeapContext>) -> Self {
        Self {
            id,
            name,
            ctx,
            inner: Mutex::new(SessionInner {
                handles: BTreeMap::new(),
                closed: false,
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Allocate a buffer of `size` bytes in `kind`.
    ///
    /// The buffer is aligned to at least the heap's own alignment.
    ///
    /// # Errors
    /// - `InvalidArgument` for zero size or non-power-of-two alignment
    /// - `InvalidHeap` if the kind is not installed or is being resized
    /// - `HeapExhausted` if the backend has no space
    /// - `SessionClosed` if the session was closed
    pub fn create_handle(&self, kind: HeapKind, size: usize, align: usize) -> Result<HandleId> {
        if size == 0 || !align.is_power_of_two() {
            return Err(HeapError::InvalidArgument);
        }
        if self.is_closed() {
            return Err(HeapError::SessionClosed);
        }

        let admission = self.ctx.registry().admit(kind)?;
        let align = align.max(admission.align);
        let backend = self.ctx.backend();
        let backing = backend.allocate(kind, size, align)?;

        let Some(view) = backend.lookup(backing).and_then(|e| ExtentView::from_extents(&e)) else {
            error!("[SESSION] backend lost fresh allocation {:?} in {}", backing, kind);
            backend.free(backing);
            return Err(HeapError::InvalidHeap);
        };
        debug_assert!(view
            .as_slice()
            .iter()
            .all(|e| admission.range().zip(e.range()).is_some_and(|(h, r)| h.contains_range(&r))));

        let id = self.ctx.next_handle_id();
        let mut inner = self.inner.lock();
        if inner.closed {
            drop(inner);
            backend.free(backing);
            return Err(HeapError::SessionClosed);
        }
        inner.handles.insert(id, BufferHandle::allocated(id, kind, backing, view));
        drop(inner);
        drop(admission);

        debug!("[SESSION] {} created {:?} in {} ({:#x} bytes)", self.name, id, kind, size);
        Ok(id)
    }

    /// Wrap an externally supplied (possibly fragmented) buffer.
    ///
    /// Imported buffers belong to no managed heap, so they never block a
    /// resize and nothing is freed when they die.
    pub fn import(&self, extents: &[Extent]) -> Result<HandleId> {
        if extents.iter().any(|e| e.phys_addr.is_null() || e.range().is_none()) {
            return Err(HeapError::InvalidArgument);
        }
        let view = ExtentView::from_extents(extents).ok_or(HeapError::InvalidArgument)?;

        let id = self.ctx.next_handle_id();
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(HeapError::SessionClosed);
        }
        inner.handles.insert(id, BufferHandle::imported(id, view));
        debug!("[SESSION] {} imported {:?} ({} extents)", self.name, id, extents.len());
        Ok(id)
    }

    /// Snapshot of a handle.
    pub fn get(&self, id: HandleId) -> Option<BufferHandle> {
        self.inner.lock().visible(id).ok().cloned()
    }

    /// Add a consumer reference. Returns the new refcount.
    pub fn retain(&self, id: HandleId) -> Result<u32> {
        self.inner.lock().visible_mut(id)?.retain()
    }

    /// Drop a consumer reference. Returns the remaining refcount; at
    /// zero the buffer has been freed and the handle is gone.
    pub fn release(&self, id: HandleId) -> Result<u32> {
        let mut inner = self.inner.lock();
        let handle = inner.visible_mut(id)?;
        let remaining = handle.release();
        if remaining == 0 {
            if let Some(handle) = inner.handles.remove(&id) {
                self.destroy(&handle);
            }
        }
        Ok(remaining)
    }

    /// Current refcount of a handle (consumer references plus pins).
    pub fn refcount(&self, id: HandleId) -> Result<u32> {
        Ok(self.inner.lock().visible(id)?.refcount())
    }

    /// The buffer's extent list.
    pub fn extents(&self, id: HandleId) -> Result<ExtentView> {
        Ok(self.inner.lock().visible(id)?.extents().clone())
    }

    /// Physical address of a contiguous buffer.
    ///
    /// # Errors
    /// `RangeMismatch` if the buffer is fragmented.
    pub fn phys(&self, id: HandleId) -> Result<PhysAddr> {
        match self.inner.lock().visible(id)?.extents() {
            ExtentView::Contiguous(ext) => Ok(ext.phys_addr),
            ExtentView::Fragmented(_) => Err(HeapError::RangeMismatch),
        }
    }

    /// Take a temporary hold on a handle and return its extents.
    pub(crate) fn pin(&self, id: HandleId) -> Result<ExtentView> {
        let mut inner = self.inner.lock();
        let handle = inner.visible_mut(id)?;
        handle.pin()?;
        Ok(handle.extents().clone())
    }

    /// Drop a temporary hold taken with [`pin`](Self::pin).
    pub(crate) fn unpin(&self, id: HandleId) {
        let mut inner = self.inner.lock();
        let last = match inner.handles.get_mut(&id) {
            Some(handle) => handle.unpin() == 0,
            None => {
                error!("[SESSION] unpin of unknown {:?}", id);
                false
            }
        };
        if last {
            if let Some(handle) = inner.handles.remove(&id) {
                self.destroy(&handle);
            }
        }
    }

    /// Live handles whose memory is in `kind`, orphans included.
    pub fn count_kind(&self, kind: HeapKind) -> usize {
        let inner = self.inner.lock();
        inner.handles.values().filter(|h| h.heap_kind() == Some(kind)).count()
    }

    /// Number of handles visible to the consumer.
    pub fn handle_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.handles.values().filter(|h| !h.is_orphaned()).count()
    }

    /// Ids of the handles visible to the consumer, in id order.
    pub fn handle_ids(&self) -> Vec<HandleId> {
        let inner = self.inner.lock();
        inner.handles.values().filter(|h| !h.is_orphaned()).map(|h| h.id()).collect()
    }

    /// Live bytes per heap kind.
    pub fn usage(&self) -> BTreeMap<HeapKind, usize> {
        let inner = self.inner.lock();
        let mut usage = BTreeMap::new();
        for handle in inner.handles.values() {
            if let Some(kind) = handle.heap_kind() {
                *usage.entry(kind).or_insert(0) += handle.size();
            }
        }
        usage
    }

    /// Drop every consumer reference and refuse further use.
    ///
    /// Buffers still pinned survive until their last unpin. Returns the
    /// number of buffers freed now.
    pub(crate) fn close(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let mut freed = 0;
        inner.handles.retain(|_, handle| {
            if handle.disown() == 0 {
                self.destroy(handle);
                freed += 1;
                false
            } else {
                true
            }
        });
        drop(inner);

        debug!("[SESSION] {} closed, {} buffers freed", self.name, freed);
        freed
    }

    /// Closed, with every pinned buffer since freed.
    pub(crate) fn is_drained(&self) -> bool {
        let inner = self.inner.lock();
        inner.closed && inner.handles.is_empty()
    }

    /// Release a handle's memory. Called with the session lock held.
    fn destroy(&self, handle: &BufferHandle) {
        if let Origin::Allocated(backing) = handle.origin() {
            self.ctx.backend().free(backing);
        }
        debug!("[SESSION] {} freed {:?}", self.name, handle.id());
    }
}

impl fmt::Debug for AllocationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocationSession")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
