//! # Call Session Store
//!
//! Keeps the live state of every call between its first audio chunk and its
//! finalization or eviction. Nothing outside this module ever holds a
//! reference into the store: callers pass call ids and get copies back.
//!
//! ## Locking:
//! - The map of sessions sits behind one `RwLock`, held only long enough to
//!   look up, insert or remove an entry.
//! - Each session has its own `Mutex`. Merging a chunk (tokenization included)
//!   happens under that per-call lock, so chunks for the same call are
//!   serialized while different calls proceed independently.
//! - Lock order is always map → session. `append_chunk` drops the map lock
//!   before taking the session lock, so it never waits on the map while
//!   holding a session.
//!
//! ## Claiming:
//! `claim_and_remove` deletes the entry from the map under the write lock.
//! Whoever removes it owns the session; everyone else sees `None`. The claimant
//! then marks the entry closed, so an `append_chunk` that looked the entry up
//! just before the removal notices and starts a fresh session rather than
//! writing into one nobody will ever read.

use crate::error::AppResult;
use crate::session::context_window::{self, WindowLimits};
use crate::tokenize::TextTokenizer;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Snapshot of one live call.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub call_id: String,
    /// Token-bounded running transcript
    pub context: String,
    pub chunk_count: u64,
    /// Raw chunk transcripts in arrival order
    pub chunks: Vec<String>,
    /// Wall-clock start, written into the call record
    pub start_time: DateTime<Utc>,
    /// Monotonic start, used for the call duration
    pub started_at: Instant,
    pub last_activity: Instant,
}

impl CallSession {
    fn new(call_id: &str) -> Self {
        let now = Instant::now();
        Self {
            call_id: call_id.to_string(),
            context: String::new(),
            chunk_count: 0,
            chunks: Vec::new(),
            start_time: Utc::now(),
            started_at: now,
            last_activity: now,
        }
    }

    pub fn last_chunk(&self) -> Option<&str> {
        self.chunks.last().map(String::as_str)
    }

    /// Strictly older than `timeout` at `now`.
    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }
}

struct SessionEntry {
    session: CallSession,
    /// Set by the claimant once the entry has left the map
    closed: bool,
}

type SharedEntry = Arc<Mutex<SessionEntry>>;

fn lock_entry(entry: &SharedEntry) -> MutexGuard<'_, SessionEntry> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Concurrent keyed store of active calls.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SharedEntry>>,
    tokenizer: Arc<dyn TextTokenizer>,
    limits: WindowLimits,
}

impl SessionStore {
    pub fn new(tokenizer: Arc<dyn TextTokenizer>, limits: WindowLimits) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            tokenizer,
            limits,
        }
    }

    pub fn limits(&self) -> WindowLimits {
        self.limits
    }

    fn entry_for(&self, call_id: &str) -> SharedEntry {
        if let Some(entry) = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(call_id)
        {
            return Arc::clone(entry);
        }

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let entry = sessions.entry(call_id.to_string()).or_insert_with(|| {
            tracing::info!(call_id = %call_id, "Call session created");
            Arc::new(Mutex::new(SessionEntry {
                session: CallSession::new(call_id),
                closed: false,
            }))
        });
        Arc::clone(entry)
    }

    /// Return a copy of the session, creating an empty one if absent.
    pub fn get_or_create(&self, call_id: &str) -> CallSession {
        loop {
            let entry = self.entry_for(call_id);
            let guard = lock_entry(&entry);
            if !guard.closed {
                return guard.session.clone();
            }
        }
    }

    /// Append a transcribed chunk and return the bounded context.
    pub fn append_chunk(&self, call_id: &str, text: &str) -> AppResult<String> {
        loop {
            let entry = self.entry_for(call_id);
            let mut guard = lock_entry(&entry);
            if guard.closed {
                // Claimed between lookup and lock; the next lookup creates a
                // fresh session.
                continue;
            }

            let session = &mut guard.session;
            let context =
                context_window::merge(self.tokenizer.as_ref(), &session.context, text, self.limits)?;
            session.context = context.clone();
            session.chunk_count += 1;
            session.chunks.push(text.to_string());
            session.last_activity = session.last_activity.max(Instant::now());

            tracing::debug!(
                call_id = %call_id,
                chunk_count = session.chunk_count,
                context_chars = context.len(),
                "Chunk appended"
            );
            return Ok(context);
        }
    }

    /// Atomically remove the session and hand it to the caller.
    ///
    /// Of any number of concurrent callers for the same id, exactly one gets
    /// `Some`.
    pub fn claim_and_remove(&self, call_id: &str) -> Option<CallSession> {
        let entry = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(call_id)?;
        Some(Self::close(&entry))
    }

    /// Claim the session only if it is still idle at `now`.
    ///
    /// Check and removal happen under the map write lock, so a chunk that
    /// refreshed the session after a stale snapshot keeps it alive.
    pub fn claim_if_idle(&self, call_id: &str, now: Instant, timeout: Duration) -> Option<CallSession> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let idle = {
            let entry = sessions.get(call_id)?;
            lock_entry(entry).session.is_idle(now, timeout)
        };
        if !idle {
            return None;
        }
        let entry = sessions.remove(call_id)?;
        drop(sessions);
        Some(Self::close(&entry))
    }

    fn close(entry: &SharedEntry) -> CallSession {
        let mut guard = lock_entry(entry);
        guard.closed = true;
        guard.session.clone()
    }

    /// Ids of sessions whose last activity is strictly older than `timeout`.
    ///
    /// Read-only: removal goes through the claim operations.
    pub fn snapshot_stale_ids(&self, now: Instant, timeout: Duration) -> Vec<String> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .iter()
            .filter(|(_, entry)| lock_entry(entry).session.is_idle(now, timeout))
            .map(|(call_id, _)| call_id.clone())
            .collect()
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(call_id)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
