//! Buffer handles and allocation sessions
//!
//! # Design
//! - Each consumer gets an [`AllocationSession`] holding its handles in
//!   an ordered map keyed by [`HandleId`]
//! - Handles are refcounted explicitly; nothing is freed by a destructor
//! - The [`SessionTable`] tracks every open session so the resizer can
//!   scan them all under one lock

mod handle;
mod session;
mod table;

pub use handle::{BufferHandle, HandleId, Origin};
pub use session::{AllocationSession, SessionId};
pub use table::{SessionTable, SessionUsage};

pub(crate) use table::count_kind;
