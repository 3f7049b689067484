//! Simulated Copy Controller
//!
//! A [`DmaController`] that performs transfers inside [`SimMemory`],
//! with counters and fault injection for exercising the copy engine.
//!
//! A submitted transfer is latched on its channel and executed on
//! `wait`, the way a real channel finishes some time after the doorbell.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use super::channel::{ChannelId, DmaCaps, DmaController};
use crate::backend::SimMemory;
use crate::error::DmaFault;
use crate::mm::PhysAddr;

#[derive(Clone, Copy)]
struct Pending {
    src: PhysAddr,
    dst: PhysAddr,
    len: usize,
    /// 1-based submission number.
    seq: u64,
}

struct SimChannel {
    caps: DmaCaps,
    busy: bool,
    pending: Option<Pending>,
}

/// A fault armed for one submission.
#[derive(Clone, Copy)]
struct Armed {
    seq: u64,
    fault: DmaFault,
}

/// Simulated copy hardware.
pub struct SimDma {
    memory: Arc<SimMemory>,
    channels: Mutex<Vec<SimChannel>>,
    armed: Mutex<Vec<Armed>>,
    acquisitions: AtomicU64,
    submissions: AtomicU64,
    completions: AtomicU64,
    terminations: AtomicU64,
}

impl SimDma {
    /// `count` memory-to-memory channels.
    pub fn new(memory: Arc<SimMemory>, count: usize) -> Self {
        let caps = core::iter::repeat(DmaCaps::MEM_TO_MEM).take(count);
        Self::with_channels(memory, caps)
    }

    /// One channel per entry, with the given capabilities.
    pub fn with_channels(memory: Arc<SimMemory>, caps: impl IntoIterator<Item = DmaCaps>) -> Self {
        let channels = caps
            .into_iter()
            .map(|caps| SimChannel {
                caps,
                busy: false,
                pending: None,
            })
            .collect();
        Self {
            memory,
            channels: Mutex::new(channels),
            armed: Mutex::new(Vec::new()),
            acquisitions: AtomicU64::new(0),
            submissions: AtomicU64::new(0),
            completions: AtomicU64::new(0),
            terminations: AtomicU64::new(0),
        }
    }

    /// Make the `nth` submission (1-based, counted from now on) fail.
    ///
    /// `Rejected` fails the submit itself; `Timeout` and `Bus` fail the
    /// wait that follows it.
    pub fn inject_fault(&self, nth: u64, fault: DmaFault) {
        let seq = self.submissions.load(Ordering::SeqCst) + nth;
        self.armed.lock().push(Armed { seq, fault });
    }

    fn take_fault(&self, seq: u64, matches: impl Fn(DmaFault) -> bool) -> Option<DmaFault> {
        let mut armed = self.armed.lock();
        let pos = armed.iter().position(|a| a.seq == seq && matches(a.fault))?;
        Some(armed.swap_remove(pos).fault)
    }

    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> u64 {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn completions(&self) -> u64 {
        self.completions.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> u64 {
        self.terminations.load(Ordering::SeqCst)
    }

    /// Channels currently claimed.
    pub fn busy_channels(&self) -> usize {
        self.channels.lock().iter().filter(|c| c.busy).count()
    }
}

impl DmaController for SimDma {
    fn request_channel(&self, caps: DmaCaps) -> Option<ChannelId> {
        let mut channels = self.channels.lock();
        let (index, channel) = channels
            .iter_mut()
            .enumerate()
            .find(|(_, c)| !c.busy && c.caps.contains(caps))?;
        channel.busy = true;
        channel.pending = None;
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Some(ChannelId::new(index as u32))
    }

    fn release_channel(&self, channel: ChannelId) {
        if let Some(c) = self.channels.lock().get_mut(channel.index()) {
            c.busy = false;
            c.pending = None;
        }
    }

    fn submit(&self, channel: ChannelId, src: PhysAddr, dst: PhysAddr, len: usize) -> Result<(), DmaFault> {
        let seq = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(fault) = self.take_fault(seq, |f| f == DmaFault::Rejected) {
            return Err(fault);
        }

        let mut channels = self.channels.lock();
        let c = channels.get_mut(channel.index()).ok_or(DmaFault::Rejected)?;
        if !c.busy || c.pending.is_some() {
            return Err(DmaFault::Rejected);
        }
        c.pending = Some(Pending { src, dst, len, seq });
        Ok(())
    }

    fn wait(&self, channel: ChannelId, _timeout_ms: u32) -> Result<(), DmaFault> {
        let pending = {
            let channels = self.channels.lock();
            channels.get(channel.index()).and_then(|c| c.pending).ok_or(DmaFault::Rejected)?
        };

        if let Some(fault) = self.take_fault(pending.seq, |f| f != DmaFault::Rejected) {
            // A timed-out transfer stays latched until terminated.
            if fault != DmaFault::Timeout {
                self.terminate(channel);
            }
            return Err(fault);
        }

        self.memory
            .copy(pending.src, pending.dst, pending.len)
            .map_err(|_| DmaFault::Bus)?;
        if let Some(c) = self.channels.lock().get_mut(channel.index()) {
            c.pending = None;
        }
        self.completions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn terminate(&self, channel: ChannelId) {
        if let Some(c) = self.channels.lock().get_mut(channel.index()) {
            if c.pending.take().is_some() {
                self.terminations.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dma(count: usize) -> SimDma {
        let memory = Arc::new(SimMemory::new(PhysAddr::new(0x1000_0000), 0x10_0000).unwrap());
        SimDma::new(memory, count)
    }

    #[test]
    fn test_channel_pool_is_bounded() {
        let dma = dma(2);
        let a = dma.request_channel(DmaCaps::MEM_TO_MEM).unwrap();
        let b = dma.request_channel(DmaCaps::MEM_TO_MEM).unwrap();
        assert_ne!(a, b);
        assert!(dma.request_channel(DmaCaps::MEM_TO_MEM).is_none());
        dma.release_channel(a);
        assert_eq!(dma.request_channel(DmaCaps::MEM_TO_MEM), Some(a));
        assert_eq!(dma.acquisitions(), 3);
    }

    #[test]
    fn test_caps_filter() {
        let memory = Arc::new(SimMemory::new(PhysAddr::new(0x1000_0000), 0x1000).unwrap());
        let dma = SimDma::with_channels(memory, [DmaCaps::empty(), DmaCaps::MEM_TO_MEM]);
        assert_eq!(dma.request_channel(DmaCaps::MEM_TO_MEM), Some(ChannelId::new(1)));
        assert!(dma.request_channel(DmaCaps::MEM_TO_MEM).is_none());
    }

    #[test]
    fn test_transfer_runs_on_wait() {
        let dma = dma(1);
        dma.memory.write(PhysAddr::new(0x1000_0000), &[7; 16]).unwrap();
        let ch = dma.request_channel(DmaCaps::MEM_TO_MEM).unwrap();
        dma.submit(ch, PhysAddr::new(0x1000_0000), PhysAddr::new(0x1000_1000), 16).unwrap();
        dma.wait(ch, 1000).unwrap();
        let mut buf = [0u8; 16];
        dma.memory.read(PhysAddr::new(0x1000_1000), &mut buf).unwrap();
        assert_eq!(buf, [7; 16]);
        assert_eq!(dma.completions(), 1);
    }

    #[test]
    fn test_injected_timeout_needs_terminate() {
        let dma = dma(1);
        dma.inject_fault(1, DmaFault::Timeout);
        let ch = dma.request_channel(DmaCaps::MEM_TO_MEM).unwrap();
        dma.submit(ch, PhysAddr::new(0x1000_0000), PhysAddr::new(0x1000_1000), 16).unwrap();
        assert_eq!(dma.wait(ch, 1000), Err(DmaFault::Timeout));
        // Still latched: a second submit is refused until terminate.
        assert_eq!(
            dma.submit(ch, PhysAddr::new(0x1000_0000), PhysAddr::new(0x1000_1000), 16),
            Err(DmaFault::Rejected)
        );
        dma.terminate(ch);
        assert_eq!(dma.terminations(), 1);
    }
}
