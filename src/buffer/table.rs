//! Session Table
//!
//! Registry of every open [`AllocationSession`]. Its lock doubles as the
//! global session-enumeration lock: while a resize holds it, no session
//! can be opened or closed and the set being scanned is stable.
//!
//! A closed session whose buffers are still pinned stays in the table,
//! hidden from lookups, until its last pinned buffer is freed. Its
//! buffers keep counting against their heap in the meantime.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use log::info;
use spin::{Mutex, MutexGuard};

use super::session::{AllocationSession, SessionId};
use crate::context::HeapContext;
use crate::error::{HeapError, Result};
use crate::heap::HeapKind;

/// Per-session usage line, as printed by a debug listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUsage {
    pub id: SessionId,
    pub name: String,
    pub bytes: BTreeMap<HeapKind, usize>,
}

pub(crate) type SessionMap = BTreeMap<SessionId, Arc<AllocationSession>>;

/// All open sessions.
pub struct SessionTable {
    ctx: Arc<HeapContext>,
    sessions: Mutex<SessionMap>,
    next_id: AtomicU64,
}

impl SessionTable {
    pub fn new(ctx: Arc<HeapContext>) -> Self {
        Self {
            ctx,
            sessions: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a session for a new consumer.
    pub fn open(&self, name: &str) -> Arc<AllocationSession> {
        let id = SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = Arc::new(AllocationSession::new(id, String::from(name), self.ctx.clone()));
        let mut sessions = self.sessions.lock();
        prune(&mut sessions);
        sessions.insert(id, session.clone());
        drop(sessions);
        info!("[SESSION] opened {:?} '{}'", id, name);
        session
    }

    /// Close a session, releasing every handle it still owns.
    ///
    /// Runs entirely under the enumeration lock, so a resize sees the
    /// session either before the close or after it, never halfway.
    pub fn close(&self, id: SessionId) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get(&id).filter(|s| !s.is_closed()).cloned().ok_or(HeapError::NotFound)?;
        let freed = session.close();
        prune(&mut sessions);
        drop(sessions);
        info!("[SESSION] closed {:?} '{}' ({} buffers freed)", id, session.name(), freed);
        Ok(())
    }

    /// Close every session.
    pub fn close_all(&self) {
        let mut sessions = self.sessions.lock();
        for session in sessions.values() {
            if !session.is_closed() {
                session.close();
            }
        }
        prune(&mut sessions);
    }

    /// An open session by id.
    pub fn get(&self, id: SessionId) -> Option<Arc<AllocationSession>> {
        self.sessions.lock().get(&id).filter(|s| !s.is_closed()).cloned()
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().values().filter(|s| !s.is_closed()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closed sessions still holding pinned buffers.
    pub fn draining(&self) -> usize {
        let mut sessions = self.sessions.lock();
        prune(&mut sessions);
        sessions.len() - sessions.values().filter(|s| !s.is_closed()).count()
    }

    /// Take the enumeration lock.
    pub(crate) fn enumerate(&self) -> MutexGuard<'_, SessionMap> {
        self.sessions.lock()
    }

    /// Live handles in `kind` across all sessions.
    pub fn live_handles(&self, kind: HeapKind) -> usize {
        count_kind(&self.enumerate(), kind)
    }

    /// Per-session live bytes by heap.
    pub fn usage(&self) -> Vec<SessionUsage> {
        let mut sessions = self.enumerate();
        prune(&mut sessions);
        sessions
            .values()
            .map(|s| SessionUsage {
                id: s.id(),
                name: String::from(s.name()),
                bytes: s.usage(),
            })
            .collect()
    }
}

/// Drop closed sessions that no longer hold any buffer.
fn prune(sessions: &mut SessionMap) {
    sessions.retain(|_, s| !s.is_drained());
}

/// Count live handles in `kind` over an enumerated session set.
pub(crate) fn count_kind(sessions: &SessionMap, kind: HeapKind) -> usize {
    sessions.values().map(|s| s.count_kind(kind)).sum()
}
