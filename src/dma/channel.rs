//! Copy Channels
//!
//! Interface to the hardware copy blocks. A controller owns a bounded
//! pool of channels; each channel runs one transfer at a time.
//!
//! # Design
//! - Acquisition never blocks: an empty pool is reported, not waited on
//! - A [`ChannelGuard`] gives the channel back on every exit path

use core::fmt;

use bitflags::bitflags;

use crate::error::DmaFault;
use crate::mm::PhysAddr;

bitflags! {
    /// What a channel can do.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DmaCaps: u8 {
        /// Memory-to-memory copies.
        const MEM_TO_MEM = 1 << 0;
    }
}

/// Index of a hardware channel.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ChannelId(u32);

impl ChannelId {
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dma{}", self.0)
    }
}

/// A pool of hardware copy channels.
pub trait DmaController: Send + Sync {
    /// Claim a free channel with at least `caps`. Never blocks.
    fn request_channel(&self, caps: DmaCaps) -> Option<ChannelId>;

    /// Return a channel to the pool.
    fn release_channel(&self, channel: ChannelId);

    /// Start a transfer of `len` bytes from `src` to `dst`.
    fn submit(&self, channel: ChannelId, src: PhysAddr, dst: PhysAddr, len: usize) -> Result<(), DmaFault>;

    /// Block until the submitted transfer completes or `timeout_ms` passes.
    fn wait(&self, channel: ChannelId, timeout_ms: u32) -> Result<(), DmaFault>;

    /// Abort whatever the channel is doing (best effort).
    fn terminate(&self, channel: ChannelId);
}

/// A claimed channel, released when dropped.
pub struct ChannelGuard<'a> {
    dma: &'a dyn DmaController,
    channel: ChannelId,
}

impl<'a> ChannelGuard<'a> {
    /// Claim a channel, or `None` if the pool is empty.
    pub fn acquire(dma: &'a dyn DmaController, caps: DmaCaps) -> Option<Self> {
        dma.request_channel(caps).map(|channel| Self { dma, channel })
    }

    #[inline]
    pub fn id(&self) -> ChannelId {
        self.channel
    }
}

impl Drop for ChannelGuard<'_> {
    fn drop(&mut self) {
        self.dma.release_channel(self.channel);
    }
}
