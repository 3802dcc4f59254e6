//! Graph Cache
//!
//! Polls the master for the system state, resolves every participant to its
//! node address and publishes the result as one [`GraphView`].
//!
//! Readers load the current view through an `ArcSwap`; a refresh builds its
//! view off to the side and swaps it in only once it is complete, so a
//! reader never pairs a snapshot with a directory from another refresh.
//! Refreshes are serialized through a gate: a caller that arrives while
//! another refresh is in flight waits for it and gets its result back.

use crate::domain::ports::{MasterApiRef, ParticipantId};
use crate::error::{Error, Result};
use crate::graph::events::GraphEvent;
use crate::graph::metrics::{RefreshMetrics, RefreshStatsSnapshot};
use crate::graph::snapshot::{GraphSnapshot, GraphView, NodeDirectory};
use arc_swap::ArcSwap;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the graph cache
#[derive(Debug, Clone)]
pub struct GraphCacheConfig {
    /// Caller id presented to the master on node lookups
    pub caller_id: String,
    /// Period of the autonomous refresh
    pub refresh_interval: Duration,
    /// Upper bound on every registry round-trip
    pub call_timeout: Duration,
    /// Maximum concurrent participant lookups per refresh
    pub lookup_concurrency: usize,
    /// Event channel capacity
    pub event_channel_capacity: usize,
}

impl Default for GraphCacheConfig {
    fn default() -> Self {
        Self {
            caller_id: "/rosgraph_cache".to_string(),
            refresh_interval: Duration::from_secs(5),
            call_timeout: Duration::from_secs(3),
            lookup_concurrency: 8,
            event_channel_capacity: 256,
        }
    }
}

impl GraphCacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.caller_id.trim().is_empty() {
            return Err(Error::Configuration("caller id must not be empty".into()));
        }
        if self.refresh_interval.is_zero() {
            return Err(Error::Configuration(
                "refresh interval must be positive".into(),
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(Error::Configuration("call timeout must be positive".into()));
        }
        if self.lookup_concurrency == 0 {
            return Err(Error::Configuration(
                "lookup concurrency must be at least 1".into(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::Configuration(
                "event channel capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Refresh Report
// =============================================================================

/// Outcome of a successful refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    /// Generation of the view this refresh published
    pub generation: u64,
    /// Distinct participants in the snapshot
    pub participants: usize,
    /// Participants that resolved to an address
    pub resolved: usize,
    /// Participants dropped because their lookup failed
    pub unresolved: Vec<ParticipantId>,
    /// Participants displaced by a later one reporting the same address
    pub displaced: Vec<ParticipantId>,
    pub duration_ms: u64,
    /// True when this caller reused a refresh that was already in flight
    pub coalesced: bool,
}

impl RefreshReport {
    pub fn is_partial(&self) -> bool {
        !self.unresolved.is_empty()
    }
}

/// Result of the last refresh that ran to completion
struct CompletedRefresh {
    attempt: u64,
    outcome: std::result::Result<RefreshReport, String>,
}

impl CompletedRefresh {
    fn replay(&self) -> Result<RefreshReport> {
        match &self.outcome {
            Ok(report) => Ok(RefreshReport {
                coalesced: true,
                ..report.clone()
            }),
            Err(reason) => Err(Error::MasterUnavailable {
                reason: reason.clone(),
            }),
        }
    }
}

struct Scheduler {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

// =============================================================================
// Graph Cache
// =============================================================================

/// Eventually-consistent cache of the computation graph
pub struct GraphCache {
    config: GraphCacheConfig,
    master: MasterApiRef,
    /// The published (snapshot, directory) pair
    current: ArcSwap<GraphView>,
    /// Serializes refreshes and holds the last completed outcome
    gate: tokio::sync::Mutex<Option<CompletedRefresh>>,
    /// Attempt number of the last refresh that ran to completion
    last_completed: AtomicU64,
    metrics: RefreshMetrics,
    event_tx: broadcast::Sender<GraphEvent>,
    scheduler: parking_lot::Mutex<Option<Scheduler>>,
}

impl GraphCache {
    /// Create a new graph cache
    pub fn new(config: GraphCacheConfig, master: MasterApiRef) -> Result<Arc<Self>> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);

        Ok(Arc::new(Self {
            config,
            master,
            current: ArcSwap::from_pointee(GraphView::empty()),
            gate: tokio::sync::Mutex::new(None),
            last_completed: AtomicU64::new(0),
            metrics: RefreshMetrics::new(),
            event_tx,
            scheduler: parking_lot::Mutex::new(None),
        }))
    }

    pub fn config(&self) -> &GraphCacheConfig {
        &self.config
    }

    /// Subscribe to graph events
    pub fn subscribe_events(&self) -> broadcast::Receiver<GraphEvent> {
        self.event_tx.subscribe()
    }

    fn emit_event(&self, event: GraphEvent) {
        let _ = self.event_tx.send(event);
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// The current snapshot and its directory, as one consistent pair
    pub fn view(&self) -> Arc<GraphView> {
        self.current.load_full()
    }

    /// The most recently published snapshot; empty before the first refresh
    pub fn current_state(&self) -> Arc<GraphSnapshot> {
        self.current.load().snapshot.clone()
    }

    /// Participant listening at `address`, if the current directory knows it
    pub fn resolve_node_name(&self, address: &str) -> Option<ParticipantId> {
        self.current.load().directory.resolve(address).cloned()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation
    }

    pub fn stats(&self) -> RefreshStatsSnapshot {
        self.metrics.snapshot()
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Rebuild the graph from the master and publish it
    ///
    /// On failure the previous view stays current. A call made while another
    /// refresh is in flight waits for it and returns its outcome.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let seen = self.last_completed.load(Ordering::Acquire);
        let mut gate = self.gate.lock().await;

        if let Some(done) = gate.as_ref().filter(|done| done.attempt > seen) {
            self.metrics.record_coalesced();
            debug!(attempt = done.attempt, "Reusing outcome of in-flight refresh");
            return done.replay();
        }

        let attempt = gate.as_ref().map_or(0, |done| done.attempt) + 1;
        let outcome = self.run_refresh().await;

        *gate = Some(CompletedRefresh {
            attempt,
            outcome: outcome.as_ref().cloned().map_err(ToString::to_string),
        });
        self.last_completed.store(attempt, Ordering::Release);

        outcome
    }

    /// Bound a registry call by the configured timeout
    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::MasterUnavailable {
                reason: format!(
                    "registry call timed out after {}ms",
                    self.config.call_timeout.as_millis()
                ),
            }),
        }
    }

    async fn run_refresh(&self) -> Result<RefreshReport> {
        let started = Instant::now();

        let state = match self.bounded(self.master.system_state()).await {
            Ok(state) => state,
            Err(e) => {
                let e = e.into_unavailable();
                self.metrics.record_failure();
                warn!(error = %e, "Graph refresh failed, keeping previous view");
                self.emit_event(GraphEvent::RefreshFailed {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let snapshot = GraphSnapshot::from_system_state(&state);
        let participants = snapshot.participants();
        let total = participants.len();

        // Completion order is resolution order, which decides address clashes
        let caller_id = self.config.caller_id.as_str();
        let lookups: Vec<_> = stream::iter(participants)
            .map(|participant| async move {
                let result = self
                    .bounded(self.master.lookup_node(caller_id, &participant))
                    .await;
                (participant, result)
            })
            .buffer_unordered(self.config.lookup_concurrency)
            .collect()
            .await;

        let mut directory = NodeDirectory::new();
        let mut unresolved = Vec::new();
        let mut displaced = Vec::new();

        for (participant, result) in lookups {
            match result {
                Ok(address) => {
                    if let Some(previous) = directory.insert(participant.clone(), address) {
                        debug!(
                            participant = %participant,
                            displaced = %previous,
                            "Address reported by two participants, keeping the later one"
                        );
                        displaced.push(previous);
                    }
                }
                Err(e) => {
                    warn!(participant = %participant, error = %e, "Participant lookup failed");
                    unresolved.push(participant);
                }
            }
        }

        self.metrics.record_lookups(total, unresolved.len());
        if !unresolved.is_empty() {
            let partial = Error::ResolutionPartialFailure {
                failed: unresolved.len(),
                total,
            };
            warn!(error = %partial, "Dropped unresolvable participants from directory");
        }

        let previous = self.current.load_full();
        let generation = previous.generation + 1;
        let resolved = total - unresolved.len();
        self.current
            .store(Arc::new(GraphView::new(generation, snapshot, directory)));

        let elapsed = started.elapsed();
        self.metrics.record_success(elapsed);
        self.emit_membership_changes(&previous.snapshot, &self.current.load().snapshot);
        self.emit_event(GraphEvent::Refreshed {
            generation,
            participants: total,
            resolved,
            unresolved: unresolved.len(),
        });

        debug!(
            generation,
            participants = total,
            resolved,
            elapsed_ms = elapsed.as_millis() as u64,
            "Published graph view"
        );

        Ok(RefreshReport {
            generation,
            participants: total,
            resolved,
            unresolved,
            displaced,
            duration_ms: elapsed.as_millis() as u64,
            coalesced: false,
        })
    }

    fn emit_membership_changes(&self, before: &GraphSnapshot, after: &GraphSnapshot) {
        let before = before.participants();
        let after = after.participants();

        for participant in after.difference(&before) {
            self.emit_event(GraphEvent::ParticipantJoined {
                participant: participant.clone(),
            });
        }
        for participant in before.difference(&after) {
            self.emit_event(GraphEvent::ParticipantLeft {
                participant: participant.clone(),
            });
        }
    }

    // =========================================================================
    // Scheduler
    // =========================================================================

    /// Start refreshing every `refresh_interval`
    ///
    /// The first refresh runs before this returns and its outcome is
    /// returned. The timer keeps running whatever that outcome is.
    pub async fn start(self: &Arc<Self>) -> Result<RefreshReport> {
        {
            let mut scheduler = self.scheduler.lock();
            if scheduler.is_some() {
                return Err(Error::SchedulerRunning);
            }

            let token = CancellationToken::new();
            let handle = tokio::spawn(run_scheduler(
                Arc::downgrade(self),
                self.config.refresh_interval,
                token.clone(),
            ));
            *scheduler = Some(Scheduler { token, handle });
        }

        info!(
            interval_ms = self.config.refresh_interval.as_millis() as u64,
            "Started graph refresh scheduler"
        );
        self.refresh().await
    }

    /// Stop the scheduler
    ///
    /// No scheduled refresh begins after this returns; one that is in flight
    /// is cancelled. Returns false if the scheduler was not running.
    pub async fn stop(&self) -> bool {
        let scheduler = self.scheduler.lock().take();
        match scheduler {
            Some(Scheduler { token, handle }) => {
                token.cancel();
                if let Err(e) = handle.await {
                    error!(error = %e, "Graph refresh scheduler panicked");
                }
                info!("Stopped graph refresh scheduler");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.lock().is_some()
    }
}

impl Drop for GraphCache {
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler.get_mut().take() {
            scheduler.token.cancel();
        }
    }
}

async fn run_scheduler(cache: Weak<GraphCache>, interval: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(cache) = cache.upgrade() else { break };
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = cache.refresh() => {
                if let Err(e) = result {
                    error!(error = %e, "Scheduled graph refresh failed");
                }
            }
        }
    }

    debug!("Graph refresh scheduler exited");
}
