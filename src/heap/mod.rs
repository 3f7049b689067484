//! Heap registry and lifecycle
//!
//! # Layout
//! - `kind` / `descriptor`: what a heap is
//! - `registry`: which heaps are installed, and admission control
//! - `oracle`: "is this physical range inside a managed heap?"
//! - `resize` / `carveout`: runtime discard and re-carve of heaps
//!
//! # Invariants
//! - Installed heaps are pairwise disjoint, except that a heap may lie
//!   entirely inside the heap it is carved from
//! - At most one heap per kind

mod carveout;
mod descriptor;
mod kind;
mod oracle;
mod registry;
mod resize;

pub use carveout::{CarveoutRecord, CarveoutTable};
pub use descriptor::HeapDescriptor;
pub use kind::{HeapKind, HeapKindSet};
pub use oracle::RangeOracle;
pub use registry::{Admission, HeapRegistry};
pub use resize::{HeapResizer, ResizeState};
