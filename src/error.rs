//! Error types
//!
//! Every public operation returns [`HeapError`]. Collaborator failures
//! ([`BackendError`] from the buffer-object backend, [`DmaFault`] from
//! copy hardware) are converted at the boundary.
//!
//! # Taxonomy
//! - Install-time: `Overlap`, `OutOfBounds`
//! - Allocation-time: `HeapExhausted`, `InvalidHeap`, `NotFound`
//! - Resize-time: `HeapBusy`, `ResizeFailed`, `NotResizable`
//! - Copy-time: `NoChannel`, `RangeMismatch`, `SubmitFailed`, `Timeout`

use core::fmt;

/// Error type for heap manager operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// The heap range intersects an installed heap.
    Overlap,
    /// The heap range is not inside one memory block of the platform map.
    OutOfBounds,
    /// The backend has no space left in the heap.
    HeapExhausted,
    /// The heap kind is not installed (or is being replaced).
    InvalidHeap,
    /// No such handle in this session.
    NotFound,
    /// A session still holds handles from the heap being resized.
    HeapBusy,
    /// The heap could not be recreated; it is now uninstalled.
    ResizeFailed,
    /// The heap kind has no backing heap and cannot be resized.
    NotResizable,
    /// No free copy channel.
    NoChannel,
    /// The requested range is not covered by the buffers' extents.
    RangeMismatch,
    /// The copy hardware rejected or faulted a transfer.
    SubmitFailed,
    /// The copy hardware did not complete in time.
    Timeout,
    /// Zero size, bad alignment or an empty extent list.
    InvalidArgument,
    /// The session has been closed.
    SessionClosed,
    /// The handle reference count would overflow.
    RefOverflow,
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overlap => write!(f, "heap range overlaps an installed heap"),
            Self::OutOfBounds => write!(f, "heap range outside platform memory"),
            Self::HeapExhausted => write!(f, "heap exhausted"),
            Self::InvalidHeap => write!(f, "heap not installed"),
            Self::NotFound => write!(f, "handle not found"),
            Self::HeapBusy => write!(f, "heap has live handles"),
            Self::ResizeFailed => write!(f, "heap resize failed"),
            Self::NotResizable => write!(f, "heap kind is not resizable"),
            Self::NoChannel => write!(f, "no copy channel available"),
            Self::RangeMismatch => write!(f, "range not covered by buffer extents"),
            Self::SubmitFailed => write!(f, "copy submission failed"),
            Self::Timeout => write!(f, "copy timed out"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::SessionClosed => write!(f, "session closed"),
            Self::RefOverflow => write!(f, "reference count overflow"),
        }
    }
}

/// Errors reported by a buffer-object backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendError {
    /// No space in the heap for the request.
    OutOfMemory,
    /// The backend has no allocator attached for the heap.
    UnknownHeap,
    /// Size/alignment not representable.
    InvalidLayout,
    /// The heap is already attached.
    AlreadyAttached,
    /// The heap still has live allocations.
    InUse,
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::UnknownHeap => write!(f, "heap not attached"),
            Self::InvalidLayout => write!(f, "invalid size or alignment"),
            Self::AlreadyAttached => write!(f, "heap already attached"),
            Self::InUse => write!(f, "heap has live allocations"),
        }
    }
}

impl From<BackendError> for HeapError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::OutOfMemory => Self::HeapExhausted,
            BackendError::UnknownHeap => Self::InvalidHeap,
            BackendError::InvalidLayout => Self::InvalidArgument,
            BackendError::AlreadyAttached => Self::Overlap,
            BackendError::InUse => Self::HeapBusy,
        }
    }
}

/// Faults reported by copy hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaFault {
    /// The channel refused the descriptor.
    Rejected,
    /// Completion did not arrive within the timeout.
    Timeout,
    /// The transfer completed with a bus error.
    Bus,
}

impl fmt::Display for DmaFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected => write!(f, "descriptor rejected"),
            Self::Timeout => write!(f, "completion timeout"),
            Self::Bus => write!(f, "bus error"),
        }
    }
}

impl From<DmaFault> for HeapError {
    fn from(fault: DmaFault) -> Self {
        match fault {
            DmaFault::Timeout => Self::Timeout,
            DmaFault::Rejected | DmaFault::Bus => Self::SubmitFailed,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, HeapError>;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_backend_error_mapping() {
        assert_eq!(HeapError::from(BackendError::OutOfMemory), HeapError::HeapExhausted);
        assert_eq!(HeapError::from(BackendError::UnknownHeap), HeapError::InvalidHeap);
    }

    #[test]
    fn test_dma_fault_mapping() {
        assert_eq!(HeapError::from(DmaFault::Timeout), HeapError::Timeout);
        assert_eq!(HeapError::from(DmaFault::Bus), HeapError::SubmitFailed);
        assert_eq!(HeapError::NoChannel.to_string(), "no copy channel available");
    }
}
