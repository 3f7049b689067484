//! Hardware copy offload
//!
//! # Components
//! - [`DmaController`]: the channel pool the platform provides
//! - [`plan`]: splits a copy over two extent lists into segments
//! - [`CopyEngine`]: pins, plans, submits and waits
//! - [`SimDma`]: host simulation with fault injection

mod channel;
mod engine;
mod plan;
mod sim;

pub use channel::{ChannelGuard, ChannelId, DmaCaps, DmaController};
pub use engine::{CopyEngine, CopyStats};
pub use plan::{plan, Segment};
pub use sim::SimDma;
