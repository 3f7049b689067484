//! Memory primitives for the heap manager
//!
//! Provides:
//! - Physical address and range types
//! - Extents and the contiguous/fragmented buffer view
//!
//! # Principles
//! - Physical addresses are never dereferenced by this crate
//! - Range arithmetic never wraps silently

pub mod address;
pub mod extent;

pub use address::{PhysAddr, PhysRange, PAGE_SIZE};
pub use extent::{Extent, ExtentView};
