//! # Abandoned Call Sweep
//!
//! Calls whose client vanished without saving never get finalized. The
//! sweeper evicts their sessions once they have been idle longer than the
//! abandoned-call timeout, and on each tick also replays call records that
//! were parked in the pending queue.
//!
//! ## Race with finalization:
//! Stale ids are snapshotted first, then each one is claimed with
//! [`SessionStore::claim_if_idle`]. If a save or a new chunk got there first
//! the claim returns `None` and the id is skipped, so a session is never
//! finalized and evicted at the same time.
//!
//! Evicted sessions are discarded, not persisted.

use crate::session::store::SessionStore;
use crate::storage::{PendingRecordQueue, PersistenceGateway};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Timing knobs; both can be changed while the sweeper runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepTiming {
    pub abandoned_timeout: Duration,
    pub interval: Duration,
}

struct PendingReplay {
    queue: Arc<PendingRecordQueue>,
    gateway: Arc<dyn PersistenceGateway>,
}

pub struct SweepScheduler {
    store: Arc<SessionStore>,
    timing: RwLock<SweepTiming>,
    replay: Option<PendingReplay>,
}

impl SweepScheduler {
    pub fn new(store: Arc<SessionStore>, timing: SweepTiming) -> Self {
        Self {
            store,
            timing: RwLock::new(timing),
            replay: None,
        }
    }

    /// Also drain `queue` into `gateway` on every tick.
    pub fn with_pending_replay(
        mut self,
        queue: Arc<PendingRecordQueue>,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Self {
        self.replay = Some(PendingReplay { queue, gateway });
        self
    }

    pub fn timing(&self) -> SweepTiming {
        *self.timing.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_timing(&self, timing: SweepTiming) {
        *self.timing.write().unwrap_or_else(PoisonError::into_inner) = timing;
        info!(
            "Sweep timing updated: timeout {:?}, interval {:?}",
            timing.abandoned_timeout, timing.interval
        );
    }

    /// Evict every session idle for longer than the timeout at `now`.
    ///
    /// Returns how many sessions this pass removed. Ids that were claimed
    /// concurrently by someone else are skipped silently.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let timeout = self.timing().abandoned_timeout;
        let stale = self.store.snapshot_stale_ids(now, timeout);
        if stale.is_empty() {
            return 0;
        }

        let mut removed = 0;
        for call_id in stale {
            match self.store.claim_if_idle(&call_id, now, timeout) {
                Some(session) => {
                    info!(
                        call_id = %call_id,
                        chunks = session.chunk_count,
                        "Evicted abandoned call"
                    );
                    removed += 1;
                }
                None => debug!(call_id = %call_id, "Stale call already claimed or refreshed"),
            }
        }
        removed
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// One scheduled tick: replay pending records, then sweep.
    pub fn tick(&self) -> usize {
        if let Some(replay) = &self.replay {
            if let Err(e) = replay.queue.drain(replay.gateway.as_ref()) {
                warn!("Failed to replay pending call records: {}", e);
            }
        }
        self.sweep()
    }

    /// Run `tick` periodically on the blocking pool until `shutdown` is set.
    pub fn spawn(self: Arc<Self>, shutdown: &'static AtomicBool) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Abandoned call sweeper started");
            while !shutdown.load(Ordering::SeqCst) {
                tokio::time::sleep(self.timing().interval).await;
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }

                let sweeper = Arc::clone(&self);
                match tokio::task::spawn_blocking(move || sweeper.tick()).await {
                    Ok(removed) if removed > 0 => {
                        info!("Sweep removed {} abandoned calls", removed)
                    }
                    Ok(_) => {}
                    Err(e) => error!("Sweep tick panicked: {}", e),
                }
            }
            info!("Abandoned call sweeper stopped");
        })
    }
}
