//! Carve-out records
//!
//! Remembers which heaps were themselves allocated out of a backing
//! heap at runtime, so the resizer knows what to give back when the
//! heap is discarded. Heaps from board configuration have no record.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use spin::Mutex;

use super::kind::HeapKind;
use crate::backend::BackendId;
use crate::mm::PhysAddr;

/// A heap whose memory came from another heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarveoutRecord {
    pub heap_kind: HeapKind,
    pub backing_heap: HeapKind,
    /// The backend allocation holding the heap's memory.
    pub backing_id: BackendId,
    pub start: PhysAddr,
    pub size: usize,
    pub valid: bool,
}

/// Records keyed by the carved heap's kind.
#[derive(Default)]
pub struct CarveoutTable {
    records: Mutex<BTreeMap<HeapKind, CarveoutRecord>>,
}

impl CarveoutTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record, returning any record it replaces.
    pub fn insert(&self, record: CarveoutRecord) -> Option<CarveoutRecord> {
        self.records.lock().insert(record.heap_kind, record)
    }

    /// Remove and return the record for `kind`.
    pub fn take(&self, kind: HeapKind) -> Option<CarveoutRecord> {
        self.records.lock().remove(&kind)
    }

    /// Remove every record.
    pub fn drain(&self) -> Vec<CarveoutRecord> {
        core::mem::take(&mut *self.records.lock()).into_values().collect()
    }

    pub fn get(&self, kind: HeapKind) -> Option<CarveoutRecord> {
        self.records.lock().get(&kind).copied()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}
