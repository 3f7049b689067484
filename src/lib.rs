//! physheap - Physical-Memory Heap Manager
//!
//! Arbitrates a bounded pool of physically addressable memory among
//! independent consumers (camera pipeline, 2D engine, DSP clients) on an
//! embedded SoC.
//!
//! # Services
//! - Typed heaps with distinct allocation policies, installed from the
//!   board description and checked against the platform memory map
//! - Per-consumer sessions handing out refcounted buffer handles
//! - Runtime resize of carved heaps, refused while any session holds a
//!   buffer in the heap
//! - Hardware-offloaded copies between contiguous or fragmented buffers
//! - Containment checks for physical ranges supplied by peers
//!
//! # Architecture
//! - `no_std` + `alloc`; every lock is a `spin` lock
//! - No global state: [`HeapCore`] owns the services and is passed by
//!   reference
//! - The buffer-object backend and the copy hardware are traits;
//!   simulated implementations run on the host

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod backend;
pub mod buffer;
pub mod config;
pub mod context;
pub mod dma;
pub mod error;
pub mod heap;
pub mod manager;
pub mod mm;

#[cfg(test)]
mod testing;

pub use buffer::{AllocationSession, BufferHandle, HandleId, SessionId};
pub use config::{BoardConfig, CoreConfig, MemoryBlock};
pub use error::{HeapError, Result};
pub use heap::{HeapDescriptor, HeapKind, RangeOracle};
pub use manager::HeapCore;
pub use mm::{Extent, ExtentView, PhysAddr};

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
