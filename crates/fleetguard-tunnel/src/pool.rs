//! TunnelConnectionPool: bounded, reusable, loopback-only tunnels.
//!
//! # Locking
//!
//! - `state` (a std mutex) guards the entry map and slot accounting. It is
//!   never held across an await; probes, creation, and teardown all run
//!   outside it.
//! - Each key has its own async mutex. `acquire` holds it from lookup until
//!   the handle is returned, so same-key calls are linearized while
//!   different keys proceed concurrently. A spawned creation task takes over
//!   the key lock, which keeps a second caller waiting until the first
//!   creation has landed in the map or been torn down.
//!
//! # Cancellation
//!
//! Creation and teardown run in spawned tasks counted by `in_flight`. A
//! caller whose `acquire` times out (or is dropped) does not abort the
//! creation; the task notices the requester is gone and closes the tunnel.
//! `close_all` bumps the epoch and waits for `in_flight` to reach zero, so
//! no tunnel outlives it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{oneshot, watch, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fleetguard_ledger::{AuditEvent, AuditEventType, AuditLogger, Outcome};
use fleetguard_types::{PoolConfig, Severity};

use crate::error::{PoolError, ProviderError};
use crate::handle::{
    HandleState, PoolStats, SweepReport, TunnelDescriptor, TunnelHandle, TunnelInfo, TunnelKey,
};
use crate::provider::{free_loopback_port, BindingVerifier, NonLoopbackProbe, TunnelProvider};

struct Entry {
    handle: TunnelHandle,
    descriptor: TunnelDescriptor,
    state: HandleState,
    leases: usize,
    last_used: Instant,
    use_count: u64,
    idle_timeout: Duration,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.leases == 0 && now.saturating_duration_since(self.last_used) >= self.idle_timeout
    }
}

#[derive(Default)]
struct PoolState {
    entries: HashMap<TunnelKey, Entry>,
    /// Slots reserved by creations that have not finished.
    creating: usize,
    /// Bumped by `close_all`; creations started under an older epoch are discarded.
    epoch: u64,
}

impl PoolState {
    /// Remove the entry for `key` only if it is still the tunnel `id`.
    fn take_current(&mut self, key: &TunnelKey, id: Uuid) -> Option<Entry> {
        let current = self.entries.get(key).is_some_and(|e| e.handle.id == id);
        if current {
            self.entries.remove(key)
        } else {
            None
        }
    }
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    reused: AtomicU64,
    evicted: AtomicU64,
    expired: AtomicU64,
    closed: AtomicU64,
}

struct PoolInner {
    provider: Arc<dyn TunnelProvider>,
    verifier: Arc<dyn BindingVerifier>,
    audit: Option<Arc<AuditLogger>>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    key_locks: Mutex<HashMap<TunnelKey, Arc<tokio::sync::Mutex<()>>>>,
    in_flight: watch::Sender<usize>,
    counters: Counters,
}

/// Decrements the in-flight counter when dropped.
struct InFlight(Arc<PoolInner>);

impl InFlight {
    fn start(inner: &Arc<PoolInner>) -> Self {
        inner.in_flight.send_modify(|n| *n += 1);
        Self(Arc::clone(inner))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

type CreationResult = Result<TunnelHandle, PoolError>;

pub struct PoolBuilder {
    provider: Arc<dyn TunnelProvider>,
    config: PoolConfig,
    verifier: Option<Arc<dyn BindingVerifier>>,
    audit: Option<Arc<AuditLogger>>,
}

impl PoolBuilder {
    /// Replace the default [`NonLoopbackProbe`].
    #[must_use]
    pub fn verifier(mut self, verifier: Arc<dyn BindingVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    #[must_use]
    pub fn audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn build(self) -> TunnelConnectionPool {
        let verifier = self
            .verifier
            .unwrap_or_else(|| Arc::new(NonLoopbackProbe::new(self.config.probe_timeout())));
        let (in_flight, _) = watch::channel(0usize);
        TunnelConnectionPool {
            inner: Arc::new(PoolInner {
                provider: self.provider,
                verifier,
                audit: self.audit,
                config: self.config,
                state: Mutex::new(PoolState::default()),
                key_locks: Mutex::new(HashMap::new()),
                in_flight,
                counters: Counters::default(),
            }),
        }
    }
}

/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct TunnelConnectionPool {
    inner: Arc<PoolInner>,
}

impl TunnelConnectionPool {
    pub fn new(provider: Arc<dyn TunnelProvider>, config: PoolConfig) -> Self {
        Self::builder(provider, config).build()
    }

    pub fn builder(provider: Arc<dyn TunnelProvider>, config: PoolConfig) -> PoolBuilder {
        PoolBuilder {
            provider,
            config,
            verifier: None,
            audit: None,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Deadline `acquire_timeout_secs` from now.
    pub fn default_deadline(&self) -> Instant {
        Instant::now() + self.inner.config.acquire_timeout()
    }

    /// Get a tunnel for the key, reusing a healthy pooled one when possible.
    ///
    /// Fails with [`PoolError::Timeout`] once `deadline` passes; a creation
    /// still running at that point is torn down when it completes.
    pub async fn acquire(
        &self,
        broker_id: &str,
        target_id: &str,
        remote_port: u16,
        deadline: Instant,
    ) -> Result<TunnelHandle, PoolError> {
        let key = TunnelKey::new(broker_id, target_id, remote_port);
        let started = Instant::now();
        match tokio::time::timeout_at(deadline, self.acquire_key(key.clone())).await {
            Ok(result) => result,
            Err(_) => {
                let after = started.elapsed();
                warn!(key = %key, ?after, "tunnel acquire timed out");
                self.inner.record(
                    AuditEvent::new(
                        AuditEventType::AcquireTimeout,
                        self.inner.actor(),
                        key.to_string(),
                        "acquire",
                    )
                    .with_outcome(Outcome::Failure)
                    .with_severity(Severity::Medium)
                    .with_detail("elapsed_ms", after.as_millis()),
                );
                Err(PoolError::Timeout { after })
            }
        }
    }

    async fn acquire_key(&self, key: TunnelKey) -> Result<TunnelHandle, PoolError> {
        let key_guard = self.inner.key_lock(&key)?.lock_owned().await;

        if let Some(handle) = self.try_reuse(&key).await? {
            return Ok(handle);
        }

        let (epoch, in_flight) = self.reserve_slot(&key)?;

        let (tx, rx) = oneshot::channel();
        tokio::spawn(create_entry(
            Arc::clone(&self.inner),
            key,
            epoch,
            key_guard,
            tx,
            in_flight,
        ));
        rx.await
            .map_err(|_| PoolError::Internal("tunnel creation task ended without a result".into()))?
    }

    /// Reuse the pooled tunnel for `key` if it passes the liveness probe.
    ///
    /// An unhealthy tunnel is removed and torn down. Nothing is mutated
    /// before the probe await, so dropping this future leaves no trace.
    async fn try_reuse(&self, key: &TunnelKey) -> Result<Option<TunnelHandle>, PoolError> {
        let candidate = {
            let state = self.inner.lock_state()?;
            state
                .entries
                .get(key)
                .map(|e| (e.handle.id, e.descriptor.clone()))
        };
        let Some((id, descriptor)) = candidate else {
            return Ok(None);
        };

        let probe_timeout = self.inner.config.probe_timeout();
        let healthy = tokio::time::timeout(probe_timeout, self.inner.provider.probe(&descriptor))
            .await
            .unwrap_or(false);

        // The state guard must be gone before the teardown await below.
        let unhealthy = {
            let mut state = self.inner.lock_state()?;
            if healthy {
                let Some(entry) = state.entries.get_mut(key).filter(|e| e.handle.id == id) else {
                    return Ok(None);
                };
                entry.leases += 1;
                entry.use_count += 1;
                entry.last_used = Instant::now();
                entry.state = HandleState::Active;
                let handle = entry.handle.clone();
                let use_count = entry.use_count;
                drop(state);
                self.inner.counters.reused.fetch_add(1, Ordering::Relaxed);

                debug!(key = %key, tunnel = %handle.id, use_count, "reusing pooled tunnel");
                self.inner.record(
                    self.inner
                        .tunnel_event(AuditEventType::TunnelReused, &handle, "acquire")
                        .with_detail("use_count", use_count),
                );
                return Ok(Some(handle));
            }
            state
                .take_current(key, id)
                .map(|entry| (entry, InFlight::start(&self.inner)))
        };

        if let Some((entry, in_flight)) = unhealthy {
            warn!(key = %key, tunnel = %id, "pooled tunnel failed liveness probe; replacing it");
            // Awaited so a replacement is never created next to a live original.
            let _ = self
                .inner
                .spawn_teardown(entry, in_flight, HandleState::Closed, "unhealthy")
                .await;
        }
        Ok(None)
    }

    /// Claim a slot for a new tunnel, evicting the least recently used idle
    /// entry if the pool is full. Returns the current epoch and the in-flight
    /// guard for the creation, taken under the state lock so `close_all`
    /// cannot miss it.
    fn reserve_slot(&self, key: &TunnelKey) -> Result<(u64, InFlight), PoolError> {
        let limit = self.inner.config.max_tunnels;
        let mut state = self.inner.lock_state()?;

        let mut victim = None;
        if state.entries.len() + state.creating >= limit {
            let lru = state
                .entries
                .iter()
                .filter(|(_, e)| e.leases == 0)
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match lru {
                Some(lru_key) => {
                    victim = state
                        .entries
                        .remove(&lru_key)
                        .map(|entry| (entry, InFlight::start(&self.inner)));
                }
                None => {
                    drop(state);
                    warn!(key = %key, limit, "tunnel pool exhausted");
                    self.inner.record(
                        AuditEvent::new(
                            AuditEventType::PoolExhausted,
                            self.inner.actor(),
                            key.to_string(),
                            "acquire",
                        )
                        .with_outcome(Outcome::Denied)
                        .with_severity(Severity::High)
                        .with_detail("max_tunnels", limit),
                    );
                    return Err(PoolError::ResourceExhausted { limit });
                }
            }
        }

        state.creating += 1;
        let epoch = state.epoch;
        let creation = InFlight::start(&self.inner);
        drop(state);

        if let Some((entry, in_flight)) = victim {
            info!(evicted = %entry.handle.key, for_key = %key, "evicting least recently used idle tunnel");
            // Teardown continues in the background; the slot is already free.
            drop(
                self.inner
                    .spawn_teardown(entry, in_flight, HandleState::Evicted, "capacity"),
            );
        }
        Ok((epoch, creation))
    }

    /// Give a handle back. The tunnel stays open for reuse.
    pub fn release(&self, handle: &TunnelHandle) -> Result<(), PoolError> {
        let mut state = self.inner.lock_state()?;
        let entry = state
            .entries
            .get_mut(&handle.key)
            .filter(|e| e.handle.id == handle.id)
            .ok_or(PoolError::UnknownHandle(handle.id))?;
        entry.leases = entry.leases.saturating_sub(1);
        entry.last_used = Instant::now();
        if entry.leases == 0 {
            entry.state = HandleState::Idle;
        }
        let leases = entry.leases;
        drop(state);

        debug!(key = %handle.key, tunnel = %handle.id, leases, "tunnel released");
        self.inner.record(
            self.inner
                .tunnel_event(AuditEventType::TunnelReleased, handle, "release")
                .with_detail("leases", leases),
        );
        Ok(())
    }

    /// Tear the tunnel down and drop it from the pool.
    pub async fn close(&self, handle: &TunnelHandle) -> Result<(), PoolError> {
        let removed = {
            let mut state = self.inner.lock_state()?;
            state
                .take_current(&handle.key, handle.id)
                .map(|entry| (entry, InFlight::start(&self.inner)))
        };
        let (entry, in_flight) = removed.ok_or(PoolError::UnknownHandle(handle.id))?;
        match self
            .inner
            .spawn_teardown(entry, in_flight, HandleState::Closed, "explicit")
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PoolError::TunnelCreationFailed(e)),
            Err(e) => Err(PoolError::Internal(format!("teardown task failed: {e}"))),
        }
    }

    /// Close every tunnel, including ones still being created.
    ///
    /// Safe to call while `acquire` calls are in flight: their creations are
    /// closed as soon as they complete and the callers get
    /// [`PoolError::Cancelled`]. Returns once nothing is left open.
    pub async fn close_all(&self) -> Result<usize, PoolError> {
        let drained: Vec<(Entry, InFlight)> = {
            let mut state = self.inner.lock_state()?;
            state.epoch += 1;
            state
                .entries
                .drain()
                .map(|(_, e)| (e, InFlight::start(&self.inner)))
                .collect()
        };
        let count = drained.len();
        info!(count, "closing all pooled tunnels");

        let teardowns: Vec<_> = drained
            .into_iter()
            .map(|(e, in_flight)| {
                self.inner
                    .spawn_teardown(e, in_flight, HandleState::Closed, "shutdown")
            })
            .collect();
        for task in teardowns {
            let _ = task.await;
        }

        let mut in_flight = self.inner.in_flight.subscribe();
        in_flight
            .wait_for(|n| *n == 0)
            .await
            .map_err(|e| PoolError::Internal(format!("in-flight counter closed: {e}")))?;
        Ok(count)
    }

    /// Close every idle tunnel unused for longer than its idle timeout.
    ///
    /// Expired entries are removed under the lock, then closed one at a time
    /// outside it. A failed close is logged and the sweep moves on.
    pub async fn sweep_idle(&self) -> SweepReport {
        let (expired, in_flight): (Vec<Entry>, InFlight) = match self.inner.lock_state() {
            Ok(mut state) => {
                let now = Instant::now();
                let keys: Vec<TunnelKey> = state
                    .entries
                    .iter()
                    .filter(|(_, e)| e.is_expired(now))
                    .map(|(k, _)| k.clone())
                    .collect();
                let expired = keys
                    .iter()
                    .filter_map(|k| state.entries.remove(k))
                    .collect();
                (expired, InFlight::start(&self.inner))
            }
            Err(e) => {
                warn!(error = %e, "idle sweep skipped");
                return SweepReport::default();
            }
        };
        self.inner.prune_key_locks();

        if expired.is_empty() {
            return SweepReport::default();
        }

        // One task closes them sequentially, so aborting the caller cannot
        // strand a half-finished sweep.
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _in_flight = in_flight;
            let mut report = SweepReport {
                expired: expired.len(),
                close_failures: 0,
            };
            for entry in expired {
                if inner
                    .teardown(entry, HandleState::Expired, "idle timeout")
                    .await
                    .is_err()
                {
                    report.close_failures += 1;
                }
            }
            report
        });

        match task.await {
            Ok(report) => {
                info!(
                    expired = report.expired,
                    close_failures = report.close_failures,
                    "idle tunnel sweep complete"
                );
                report
            }
            Err(e) => {
                warn!(error = %e, "idle sweep task failed");
                SweepReport::default()
            }
        }
    }

    /// Number of pooled tunnels (not counting creations in progress).
    pub fn len(&self) -> usize {
        self.inner.lock_state().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.inner.counters;
        let mut stats = PoolStats {
            capacity: self.inner.config.max_tunnels,
            created: c.created.load(Ordering::Relaxed),
            reused: c.reused.load(Ordering::Relaxed),
            evicted: c.evicted.load(Ordering::Relaxed),
            expired: c.expired.load(Ordering::Relaxed),
            closed: c.closed.load(Ordering::Relaxed),
            ..PoolStats::default()
        };
        if let Ok(state) = self.inner.lock_state() {
            stats.active = state.entries.values().filter(|e| e.leases > 0).count();
            stats.idle = state.entries.len() - stats.active;
            stats.creating = state.creating;
        }
        stats
    }

    /// Copies of every pooled entry, most recently used first.
    pub fn snapshot(&self) -> Vec<TunnelInfo> {
        let Ok(state) = self.inner.lock_state() else {
            return Vec::new();
        };
        let now = Instant::now();
        let mut infos: Vec<(Instant, TunnelInfo)> = state
            .entries
            .values()
            .map(|e| {
                (
                    e.last_used,
                    TunnelInfo {
                        handle: e.handle.clone(),
                        state: e.state,
                        leases: e.leases,
                        use_count: e.use_count,
                        idle_for: if e.leases == 0 {
                            now.saturating_duration_since(e.last_used)
                        } else {
                            Duration::ZERO
                        },
                    },
                )
            })
            .collect();
        infos.sort_by(|a, b| b.0.cmp(&a.0));
        infos.into_iter().map(|(_, info)| info).collect()
    }
}

/// Body of the spawned creation task.
///
/// Holds the key lock until the outcome is settled so a second caller for
/// the same key sees either the new entry or a clean miss.
async fn create_entry(
    inner: Arc<PoolInner>,
    key: TunnelKey,
    epoch: u64,
    _key_guard: OwnedMutexGuard<()>,
    tx: oneshot::Sender<CreationResult>,
    _in_flight: InFlight,
) {
    debug!(key = %key, state = %HandleState::Creating, "creating tunnel");
    let created = open_tunnel(&inner, &key).await;

    let descriptor = match created {
        Ok(descriptor) => descriptor,
        Err(e) => {
            if let Ok(mut state) = inner.lock_state() {
                state.creating = state.creating.saturating_sub(1);
            }
            let _ = tx.send(Err(e));
            return;
        }
    };

    let handle = TunnelHandle {
        id: Uuid::new_v4(),
        key: key.clone(),
        local_addr: descriptor.local_addr,
        created_at: Utc::now(),
    };

    // Settle under the lock: either the entry lands in the map, or the
    // tunnel is handed back for teardown.
    let discard = match inner.lock_state() {
        Ok(mut state) => {
            state.creating = state.creating.saturating_sub(1);
            if state.epoch != epoch {
                Some(("pool closed during creation", PoolError::Cancelled))
            } else if tx.is_closed() {
                let after = Duration::ZERO;
                Some(("requester gave up", PoolError::Timeout { after }))
            } else {
                state.entries.insert(
                    key.clone(),
                    Entry {
                        handle: handle.clone(),
                        descriptor: descriptor.clone(),
                        state: HandleState::Active,
                        leases: 1,
                        last_used: Instant::now(),
                        use_count: 1,
                        idle_timeout: inner.config.idle_timeout(),
                    },
                );
                None
            }
        }
        Err(e) => Some(("pool state unavailable", e)),
    };

    if let Some((reason, err)) = discard {
        info!(key = %key, reason, "discarding newly created tunnel");
        close_descriptor(&inner, &key, &descriptor, reason).await;
        let _ = tx.send(Err(err));
        return;
    }

    inner.counters.created.fetch_add(1, Ordering::Relaxed);
    info!(key = %key, tunnel = %handle.id, local_addr = %handle.local_addr, "tunnel created");
    inner.record(inner.tunnel_event(AuditEventType::TunnelCreated, &handle, "acquire"));

    if let Err(Ok(handle)) = tx.send(Ok(handle)) {
        // Requester vanished between the check and the send.
        let entry = match inner.lock_state() {
            Ok(mut state) => state.take_current(&key, handle.id),
            Err(_) => None,
        };
        if let Some(entry) = entry {
            let _ = inner.teardown(entry, HandleState::Closed, "requester gave up").await;
        }
    }
}

/// Ask the provider for a tunnel and confirm it is loopback-only.
async fn open_tunnel(inner: &PoolInner, key: &TunnelKey) -> Result<TunnelDescriptor, PoolError> {
    let local_port = free_loopback_port()
        .map_err(|e| ProviderError::Other(format!("no free loopback port: {e}")))?;

    let descriptor = match inner
        .provider
        .create_tunnel(&key.broker_id, &key.target_id, local_port, key.remote_port)
        .await
    {
        Ok(d) => d,
        Err(e) => {
            warn!(key = %key, error = %e, "tunnel creation failed");
            inner.record(
                AuditEvent::new(
                    AuditEventType::TunnelCreationFailed,
                    inner.actor(),
                    key.to_string(),
                    "create",
                )
                .with_outcome(Outcome::Failure)
                .with_severity(Severity::High)
                .with_detail("error", &e),
            );
            return Err(PoolError::TunnelCreationFailed(e));
        }
    };

    if let Err(reason) = inner.verify_binding(&descriptor).await {
        let addr = descriptor.local_addr;
        warn!(key = %key, %addr, reason = %reason, "tunnel failed loopback verification");
        inner.record(
            AuditEvent::new(
                AuditEventType::TunnelRejected,
                inner.actor(),
                key.to_string(),
                "verify-binding",
            )
            .with_outcome(Outcome::Denied)
            .with_severity(Severity::Critical)
            .with_detail("local_addr", addr)
            .with_detail("reason", &reason)
            .with_tags(["NIST-SC-7"]),
        );
        close_descriptor(inner, key, &descriptor, "binding violation").await;
        return Err(PoolError::BindingViolation { addr, reason });
    }

    Ok(descriptor)
}

async fn close_descriptor(inner: &PoolInner, key: &TunnelKey, descriptor: &TunnelDescriptor, reason: &str) {
    if let Err(e) = inner.provider.close_tunnel(descriptor).await {
        warn!(key = %key, tunnel = %descriptor.tunnel_id, reason, error = %e, "failed to close tunnel");
    }
}

impl PoolInner {
    fn actor(&self) -> &str {
        self.audit.as_deref().map_or("fleetguard", AuditLogger::actor)
    }

    fn record(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.record(event);
        }
    }

    fn tunnel_event(&self, event_type: AuditEventType, handle: &TunnelHandle, action: &str) -> AuditEvent {
        AuditEvent::new(event_type, self.actor(), handle.key.to_string(), action)
            .with_detail("tunnel_id", handle.id)
            .with_detail("local_addr", handle.local_addr)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, PoolState>, PoolError> {
        self.state
            .lock()
            .map_err(|_| PoolError::Internal("pool state lock poisoned".into()))
    }

    fn key_lock(&self, key: &TunnelKey) -> Result<Arc<tokio::sync::Mutex<()>>, PoolError> {
        let mut locks = self
            .key_locks
            .lock()
            .map_err(|_| PoolError::Internal("key lock table poisoned".into()))?;
        Ok(Arc::clone(locks.entry(key.clone()).or_default()))
    }

    /// Forget per-key locks nobody holds for keys no longer pooled.
    fn prune_key_locks(&self) {
        let Ok(state) = self.state.lock() else { return };
        let Ok(mut locks) = self.key_locks.lock() else { return };
        locks.retain(|key, lock| Arc::strong_count(lock) > 1 || state.entries.contains_key(key));
    }

    async fn verify_binding(&self, descriptor: &TunnelDescriptor) -> Result<(), String> {
        let ip = descriptor.local_addr.ip();
        if !ip.is_loopback() {
            return Err(format!("tunnel bound to non-loopback address {ip}"));
        }
        if self.config.verify_loopback {
            self.verifier.verify(descriptor.local_addr).await?;
        }
        Ok(())
    }

    /// Close a removed entry's tunnel in its own task.
    ///
    /// `in_flight` must have been started while the entry was removed under
    /// the state lock.
    fn spawn_teardown(
        self: &Arc<Self>,
        entry: Entry,
        in_flight: InFlight,
        end_state: HandleState,
        reason: &'static str,
    ) -> JoinHandle<Result<(), ProviderError>> {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let _in_flight = in_flight;
            inner.teardown(entry, end_state, reason).await
        })
    }

    async fn teardown(
        &self,
        entry: Entry,
        end_state: HandleState,
        reason: &str,
    ) -> Result<(), ProviderError> {
        let handle = entry.handle;
        let result = self.provider.close_tunnel(&entry.descriptor).await;
        let (event_type, counter) = match end_state {
            HandleState::Evicted => (AuditEventType::TunnelEvicted, &self.counters.evicted),
            HandleState::Expired => (AuditEventType::TunnelExpired, &self.counters.expired),
            _ => (AuditEventType::TunnelClosed, &self.counters.closed),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        let mut event = self
            .tunnel_event(event_type, &handle, "close")
            .with_detail("state", end_state)
            .with_detail("reason", reason)
            .with_detail("use_count", entry.use_count);

        match &result {
            Ok(()) => {
                debug!(key = %handle.key, tunnel = %handle.id, state = %end_state, reason, "tunnel closed");
            }
            Err(e) => {
                warn!(key = %handle.key, tunnel = %handle.id, error = %e, "failed to close tunnel");
                event = event
                    .with_outcome(Outcome::Failure)
                    .with_severity(Severity::Medium)
                    .with_detail("error", e);
            }
        }
        self.record(event);
        result
    }
}
