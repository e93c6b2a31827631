//! Per-conversation async locks
//!
//! One [`ConversationLock`] exists per conversation key. Locks are created
//! with an atomic insert-if-absent on the lock table, so two tasks racing on
//! a new key always end up sharing the same lock.
//!
//! A holder keeps a lease identified by a token. Leases held longer than the
//! warn threshold are logged as suspicious once; leases held longer than the
//! force-release threshold are revoked by the next acquirer or by the
//! monitor, and the revoked guard becomes inert.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::LockConfig;
use crate::error::{RecallError, Result};
use crate::memory::types::ConversationKey;

#[derive(Debug)]
struct Lease {
    token: u64,
    owner: String,
    acquired_at: Instant,
    flagged: bool,
}

#[derive(Debug, Default)]
struct LockState {
    lease: Option<Lease>,
    next_token: u64,
}

/// The lock for one conversation
#[derive(Debug)]
pub struct ConversationLock {
    key: ConversationKey,
    state: Mutex<LockState>,
    released: Notify,
    last_used: AtomicU64,
}

/// Snapshot of who holds a lock
#[derive(Debug, Clone, PartialEq)]
pub struct LockHolder {
    pub owner: String,
    pub held_for: Duration,
}

impl ConversationLock {
    fn new(key: ConversationKey) -> Self {
        Self {
            key,
            state: Mutex::new(LockState::default()),
            released: Notify::new(),
            last_used: AtomicU64::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    pub fn holder(&self) -> Option<LockHolder> {
        self.state().lease.as_ref().map(|lease| LockHolder {
            owner: lease.owner.clone(),
            held_for: lease.acquired_at.elapsed(),
        })
    }

    pub fn is_held(&self) -> bool {
        self.state().lease.is_some()
    }

    /// Take the lease if it is free or stale.
    ///
    /// On failure returns the instant at which the current lease becomes stale.
    fn try_take(&self, owner: &str, force_after: Duration) -> std::result::Result<u64, Instant> {
        let mut state = self.state();
        if let Some(lease) = &state.lease {
            let stale_at = lease.acquired_at + force_after;
            if Instant::now() < stale_at {
                return Err(stale_at);
            }
            self.force_release(&mut state, force_after);
        }

        let token = state.next_token;
        state.next_token += 1;
        state.lease = Some(Lease {
            token,
            owner: owner.to_string(),
            acquired_at: Instant::now(),
            flagged: false,
        });
        Ok(token)
    }

    fn force_release(&self, state: &mut LockState, force_after: Duration) {
        if let Some(lease) = state.lease.take() {
            warn!(
                "Force-releasing lock '{}' held by '{}' for {:?} (limit {:?})",
                self.key,
                lease.owner,
                lease.acquired_at.elapsed(),
                force_after
            );
            self.released.notify_waiters();
        }
    }

    fn release(&self, token: u64) -> bool {
        let mut state = self.state();
        if !state.lease.as_ref().is_some_and(|lease| lease.token == token) {
            return false;
        }
        state.lease = None;
        drop(state);
        self.released.notify_waiters();
        true
    }

    fn holds(&self, token: u64) -> bool {
        self.state()
            .lease
            .as_ref()
            .is_some_and(|lease| lease.token == token)
    }
}

/// Held lease on a conversation lock; released on drop.
///
/// If the lease was force-released the guard is inert: dropping it does not
/// touch whoever holds the lock now.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LockGuard {
    lock: Arc<ConversationLock>,
    token: u64,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &ConversationKey {
        &self.lock.key
    }

    /// False once the lease has been force-released
    pub fn is_valid(&self) -> bool {
        !self.released && self.lock.holds(self.token)
    }

    /// Release now; returns false if the lease had already been revoked
    pub fn release(mut self) -> bool {
        self.released = true;
        self.lock.release(self.token)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            self.lock.release(self.token);
        }
    }
}

/// Result of a stale-lock sweep
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// Leases newly flagged as suspicious
    pub suspicious: usize,
    /// Leases force-released
    pub released: usize,
}

/// Table of conversation locks
#[derive(Debug)]
pub struct LockManager {
    locks: DashMap<ConversationKey, Arc<ConversationLock>>,
    config: LockConfig,
    ticks: AtomicU64,
}

impl LockManager {
    pub fn new(config: LockConfig) -> Self {
        Self {
            locks: DashMap::new(),
            config,
            ticks: AtomicU64::new(0),
        }
    }

    fn warn_after(&self) -> Duration {
        Duration::from_secs(self.config.lock_warn_timeout_s)
    }

    fn force_after(&self) -> Duration {
        Duration::from_secs(self.config.lock_force_release_timeout_s)
    }

    /// Number of lock entries in the table
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// The lock for `key`, created if absent. Never replaces an existing lock.
    pub fn lock_for(&self, key: &ConversationKey) -> Arc<ConversationLock> {
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(ConversationLock::new(key.clone())))
            .clone();
        lock.last_used
            .store(self.ticks.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);
        lock
    }

    pub fn holder(&self, key: &ConversationKey) -> Option<LockHolder> {
        self.locks.get(key).and_then(|lock| lock.holder())
    }

    /// Acquire with the configured timeout
    pub async fn acquire(&self, key: &ConversationKey, owner: &str) -> Result<LockGuard> {
        self.acquire_timeout(key, owner, Duration::from_millis(self.config.acquire_timeout_ms))
            .await
    }

    /// Acquire the lock for `key`, waiting at most `timeout`.
    ///
    /// Expiry yields a retryable [`RecallError::LockTimeout`]. A stale holder
    /// is force-released rather than waited on.
    pub async fn acquire_timeout(
        &self,
        key: &ConversationKey,
        owner: &str,
        timeout: Duration,
    ) -> Result<LockGuard> {
        let lock = self.lock_for(key);
        self.evict_idle();

        let started = Instant::now();
        let deadline = started + timeout;
        let force_after = self.force_after();
        let signal = Arc::clone(&lock);

        loop {
            let notified = signal.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let stale_at = match lock.try_take(owner, force_after) {
                Ok(token) => {
                    debug!("Lock '{}' acquired by '{}'", key, owner);
                    return Ok(LockGuard {
                        lock,
                        token,
                        released: false,
                    });
                }
                Err(stale_at) => stale_at,
            };

            if Instant::now() >= deadline {
                return Err(RecallError::LockTimeout {
                    key: key.to_string(),
                    waited: started.elapsed(),
                });
            }

            // Either released, timed out, or the holder went stale
            let _ = tokio::time::timeout_at(deadline.min(stale_at), notified).await;
        }
    }

    /// Flag suspicious leases and force-release stale ones
    pub fn sweep(&self) -> SweepReport {
        let warn_after = self.warn_after();
        let force_after = self.force_after();
        let mut report = SweepReport::default();

        let locks: Vec<Arc<ConversationLock>> =
            self.locks.iter().map(|entry| entry.value().clone()).collect();
        for lock in locks {
            let mut state = lock.state();
            let Some(lease) = state.lease.as_mut() else {
                continue;
            };
            let held = lease.acquired_at.elapsed();
            if held >= force_after {
                lock.force_release(&mut state, force_after);
                report.released += 1;
            } else if held >= warn_after && !lease.flagged {
                lease.flagged = true;
                info!(
                    "Lock '{}' held by '{}' for {:?}, longer than {:?}",
                    lock.key, lease.owner, held, warn_after
                );
                report.suspicious += 1;
            }
        }
        report
    }

    /// Run [`sweep`](Self::sweep) every `monitor_interval_s` until aborted
    pub fn spawn_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = Duration::from_secs(self.config.monitor_interval_s.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = manager.sweep();
                if report.released > 0 || report.suspicious > 0 {
                    debug!("Lock sweep: {:?}", report);
                }
            }
        })
    }

    /// Drop idle locks, least recently used first, until the table fits.
    ///
    /// A lock is idle when nobody holds it and nothing outside the table
    /// references it.
    fn evict_idle(&self) {
        let max = self.config.max_lock_entries.max(1);
        let excess = self.locks.len().saturating_sub(max);
        if excess == 0 {
            return;
        }

        let mut idle: Vec<(u64, ConversationKey)> = self
            .locks
            .iter()
            .filter(|entry| is_idle(entry.value()))
            .map(|entry| (entry.value().last_used.load(Ordering::Relaxed), entry.key().clone()))
            .collect();
        idle.sort_unstable_by_key(|(used, _)| *used);

        let mut evicted = 0;
        for (_, key) in idle {
            if evicted == excess {
                break;
            }
            if self.locks.remove_if(&key, |_, lock| is_idle(lock)).is_some() {
                evicted += 1;
            }
        }
        if evicted > 0 {
            debug!("Evicted {} idle conversation locks", evicted);
        }
    }
}

fn is_idle(lock: &Arc<ConversationLock>) -> bool {
    Arc::strong_count(lock) == 1 && !lock.is_held()
}
