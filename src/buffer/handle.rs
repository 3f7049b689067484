//! Buffer Handles
//!
//! A handle is a refcounted reference to one buffer, rooted in the
//! session that created or imported it.
//!
//! # Reference Counting
//! ```text
//! refcount = consumer references + pins
//! ```
//! - Consumer references come from `create`/`import` and `retain`
//! - Pins are temporary holds by in-flight operations (copies)
//! - With no consumer references left but pins outstanding, the handle
//!   is orphaned: invisible to the consumer, its memory still live
//! - At refcount zero the handle is destroyed and its memory released
//!
//! Counts only change under the owning session's lock.

use core::fmt;

use crate::backend::BackendId;
use crate::error::{HeapError, Result};
use crate::heap::HeapKind;
use crate::mm::ExtentView;

/// Handle identifier, unique across all sessions.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct HandleId(u64);

impl HandleId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h#{}", self.0)
    }
}

/// Where a buffer's memory came from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Origin {
    /// Allocated through the backend; freed when the handle dies.
    Allocated(BackendId),
    /// Imported from elsewhere; nothing to free.
    Imported,
}

/// A refcounted buffer reference.
#[derive(Clone, Debug)]
pub struct BufferHandle {
    id: HandleId,
    heap_kind: Option<HeapKind>,
    refcount: u32,
    pins: u32,
    origin: Origin,
    extents: ExtentView,
}

impl BufferHandle {
    /// A freshly allocated buffer with one consumer reference.
    pub(crate) fn allocated(id: HandleId, kind: HeapKind, backing: BackendId, extents: ExtentView) -> Self {
        Self {
            id,
            heap_kind: Some(kind),
            refcount: 1,
            pins: 0,
            origin: Origin::Allocated(backing),
            extents,
        }
    }

    /// An imported buffer with one consumer reference.
    pub(crate) fn imported(id: HandleId, extents: ExtentView) -> Self {
        Self {
            id,
            heap_kind: None,
            refcount: 1,
            pins: 0,
            origin: Origin::Imported,
            extents,
        }
    }

    #[inline]
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// The managed heap the buffer lives in; `None` for imports.
    #[inline]
    pub fn heap_kind(&self) -> Option<HeapKind> {
        self.heap_kind
    }

    #[inline]
    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    #[inline]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    #[inline]
    pub fn extents(&self) -> &ExtentView {
        &self.extents
    }

    /// Total buffer size in bytes.
    pub fn size(&self) -> usize {
        self.extents.total_len()
    }

    /// Consumer references (excluding pins).
    #[inline]
    pub fn consumer_refs(&self) -> u32 {
        self.refcount - self.pins
    }

    #[inline]
    pub fn is_orphaned(&self) -> bool {
        self.consumer_refs() == 0
    }

    pub(crate) fn retain(&mut self) -> Result<u32> {
        self.refcount = self.refcount.checked_add(1).ok_or(HeapError::RefOverflow)?;
        Ok(self.refcount)
    }

    pub(crate) fn pin(&mut self) -> Result<()> {
        self.retain()?;
        self.pins += 1;
        Ok(())
    }

    /// Drop one consumer reference. Returns the new refcount.
    pub(crate) fn release(&mut self) -> u32 {
        debug_assert!(self.consumer_refs() > 0);
        self.refcount -= 1;
        self.refcount
    }

    /// Drop one pin. Returns the new refcount.
    pub(crate) fn unpin(&mut self) -> u32 {
        debug_assert!(self.pins > 0);
        self.pins -= 1;
        self.refcount -= 1;
        self.refcount
    }

    /// Drop every consumer reference, keeping pins. Returns the new refcount.
    pub(crate) fn disown(&mut self) -> u32 {
        self.refcount = self.pins;
        self.refcount
    }
}
