//! Reuse of addresses and invoices across repeated payment requests.
//!
//! A user who reloads the checkout page, or comes back a few minutes later,
//! should see the same address or invoice rather than a fresh one every time.
//! The [`AssignmentCache`] keeps the last assignment per
//! (identity, plan, network) and decides on each request whether it can be
//! served again:
//!
//! 1. no entry: [`Reuse::Miss`];
//! 2. older than twice the window since first assignment: evicted;
//! 3. requested amount drifted beyond the cache tolerance: evicted;
//! 4. touched within the window: reused without any upstream call;
//! 5. otherwise the rail's [`AssignmentProbe`] decides. Only a positively
//!    unpaid assignment is reused; settled, terminal, and unknown states evict.
//!
//! Adapters hold [`AssignmentCache::lock`] across the whole
//! get, probe, mint, put sequence.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::error::{RailError, Result};
use crate::timestamp::UnixTimestamp;

/// Default reuse window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(30 * 60);

/// Cache key: who is paying, for what, on which network.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssignmentKey {
    identity: String,
    plan: String,
    network: String,
}

impl AssignmentKey {
    /// Builds a key, normalizing the identity (trimmed, ASCII-lowercased).
    #[must_use]
    pub fn new(identity: &str, plan: &str, network: &str) -> Self {
        Self {
            identity: normalize_identity(identity),
            plan: plan.to_owned(),
            network: network.to_ascii_lowercase(),
        }
    }

    /// Normalized caller identity.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Plan id.
    #[must_use]
    pub fn plan(&self) -> &str {
        &self.plan
    }

    /// Rail-specific network.
    #[must_use]
    pub fn network(&self) -> &str {
        &self.network
    }
}

impl Display for AssignmentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.identity, self.plan, self.network)
    }
}

/// Trims and ASCII-lowercases a caller identity (email).
#[must_use]
pub fn normalize_identity(identity: &str) -> String {
    identity.trim().to_ascii_lowercase()
}

/// A cached address or invoice handed to one caller.
#[derive(Debug, Clone)]
pub struct Assignment<P> {
    /// Cache key.
    pub key: AssignmentKey,
    /// Address, invoice id, or provider payment id.
    pub correlation_id: String,
    /// Amount quoted, in the rail's display currency.
    pub amount: Decimal,
    /// Rail payload returned on reuse.
    pub payload: P,
    /// Wall-clock time the assignment was minted.
    pub issued_at: UnixTimestamp,
    first_assigned: Instant,
    touched: Instant,
}

impl<P> Assignment<P> {
    /// Time since the assignment was minted.
    #[must_use]
    pub fn lifetime(&self) -> Duration {
        self.first_assigned.elapsed()
    }

    /// Time since the assignment was last served.
    #[must_use]
    pub fn idle(&self) -> Duration {
        self.touched.elapsed()
    }
}

/// What a rail reports about an assignment whose window lapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Nothing received; safe to serve again.
    Unpaid,
    /// Funds arrived.
    Settled,
    /// Expired, invalid, or otherwise closed upstream.
    Terminal,
    /// The upstream could not be asked.
    Unavailable(String),
}

/// Rail-specific check of an assignment's upstream state.
#[async_trait]
pub trait AssignmentProbe<P>: Send + Sync {
    /// Inspects the address or invoice behind `assignment`.
    async fn probe(&self, assignment: &Assignment<P>) -> ProbeOutcome;
}

/// Why an assignment left the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictReason {
    /// Reached twice the window since first assignment.
    HardLimit,
    /// The requested amount no longer matches.
    AmountChanged,
    /// Upstream shows payment.
    Settled,
    /// Upstream shows a closed state.
    Terminal,
    /// Upstream state unknown.
    ProbeFailed(String),
    /// The correlation id was marked used.
    Used,
    /// Removed by the periodic sweep.
    Swept,
}

impl Display for EvictReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HardLimit => f.write_str("hard age limit"),
            Self::AmountChanged => f.write_str("amount changed"),
            Self::Settled => f.write_str("settled"),
            Self::Terminal => f.write_str("terminal"),
            Self::ProbeFailed(reason) => write!(f, "probe failed: {reason}"),
            Self::Used => f.write_str("used"),
            Self::Swept => f.write_str("swept"),
        }
    }
}

/// Decision returned by [`AssignmentCache::get`].
#[derive(Debug, Clone)]
pub enum Reuse<P> {
    /// Nothing cached.
    Miss,
    /// Serve this assignment again.
    Reused(Assignment<P>),
    /// The cached assignment was removed; mint a new one.
    Evicted(Assignment<P>, EvictReason),
}

/// Per-key reuse cache with staleness detection.
#[derive(Debug)]
pub struct AssignmentCache<P> {
    label: String,
    window: Duration,
    drift_basis_points: u32,
    entries: DashMap<AssignmentKey, Assignment<P>>,
    locks: DashMap<AssignmentKey, Arc<Mutex<()>>>,
}

impl<P: Clone + Send + Sync> AssignmentCache<P> {
    /// Creates a cache with the given reuse window and exact amount matching.
    #[must_use]
    pub fn new(label: impl Into<String>, window: Duration) -> Self {
        Self {
            label: label.into(),
            window,
            drift_basis_points: 0,
            entries: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Allows the requested amount to drift by this many basis points before
    /// an assignment is considered stale.
    #[must_use]
    pub const fn with_drift_basis_points(mut self, basis_points: u32) -> Self {
        self.drift_basis_points = basis_points;
        self
    }

    /// The reuse window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    fn hard_limit(&self) -> Duration {
        self.window.saturating_mul(2)
    }

    /// Serializes work on one key. Hold the guard across get, mint, and put.
    pub async fn lock(&self, key: &AssignmentKey) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.locks.entry(key.clone()).or_default().value());
        lock.lock_owned().await
    }

    /// Decides whether the assignment under `key` can be served for
    /// `requested`.
    pub async fn get<Q>(&self, key: &AssignmentKey, requested: Decimal, probe: &Q) -> Reuse<P>
    where
        Q: AssignmentProbe<P> + ?Sized,
    {
        let Some(current) = self.entries.get(key).map(|entry| entry.value().clone()) else {
            return Reuse::Miss;
        };

        if current.lifetime() >= self.hard_limit() {
            return self.evicted(key, current, EvictReason::HardLimit);
        }

        if let Err(err) = self.ensure_amount(current.amount, requested) {
            tracing::debug!(cache = %self.label, %key, %err, "assignment amount drifted");
            return self.evicted(key, current, EvictReason::AmountChanged);
        }

        if current.idle() < self.window {
            tracing::debug!(cache = %self.label, %key, correlation_id = %current.correlation_id, "reusing fresh assignment");
            return Reuse::Reused(self.refresh(key, current));
        }

        match probe.probe(&current).await {
            ProbeOutcome::Unpaid => {
                tracing::info!(cache = %self.label, %key, correlation_id = %current.correlation_id, "reusing unpaid assignment past window");
                Reuse::Reused(self.refresh(key, current))
            }
            ProbeOutcome::Settled => self.evicted(key, current, EvictReason::Settled),
            ProbeOutcome::Terminal => self.evicted(key, current, EvictReason::Terminal),
            ProbeOutcome::Unavailable(reason) => {
                tracing::warn!(cache = %self.label, %key, %reason, "assignment probe failed, minting new");
                self.evicted(key, current, EvictReason::ProbeFailed(reason))
            }
        }
    }

    fn ensure_amount(&self, assigned: Decimal, requested: Decimal) -> Result<()> {
        let diff = (assigned - requested).abs();
        let allowed = requested.abs() * Decimal::from(self.drift_basis_points) / Decimal::from(10_000);
        if diff <= allowed {
            Ok(())
        } else {
            Err(RailError::AmountMismatch {
                assigned,
                requested,
            })
        }
    }

    fn refresh(&self, key: &AssignmentKey, mut assignment: Assignment<P>) -> Assignment<P> {
        assignment.touched = Instant::now();
        self.entries.insert(key.clone(), assignment.clone());
        assignment
    }

    fn evicted(&self, key: &AssignmentKey, assignment: Assignment<P>, reason: EvictReason) -> Reuse<P> {
        self.entries.remove(key);
        tracing::info!(
            cache = %self.label,
            %key,
            correlation_id = %assignment.correlation_id,
            %reason,
            "assignment evicted"
        );
        Reuse::Evicted(assignment, reason)
    }

    /// Stores a freshly minted assignment, replacing any previous one.
    pub fn put(
        &self,
        key: AssignmentKey,
        correlation_id: impl Into<String>,
        amount: Decimal,
        payload: P,
        issued_at: UnixTimestamp,
    ) -> Assignment<P> {
        let now = Instant::now();
        let assignment = Assignment {
            key: key.clone(),
            correlation_id: correlation_id.into(),
            amount,
            payload,
            issued_at,
            first_assigned: now,
            touched: now,
        };
        self.entries.insert(key, assignment.clone());
        assignment
    }

    /// Marks the assignment as just served. Returns `false` if absent.
    pub fn touch(&self, key: &AssignmentKey) -> bool {
        self.entries
            .get_mut(key)
            .map(|mut entry| entry.touched = Instant::now())
            .is_some()
    }

    /// Removes the assignment under `key`.
    pub fn evict(&self, key: &AssignmentKey) -> Option<Assignment<P>> {
        self.entries.remove(key).map(|(_, assignment)| assignment)
    }

    /// Removes every assignment carrying `correlation_id`.
    pub fn evict_correlation(&self, correlation_id: &str) -> Vec<Assignment<P>> {
        self.evict_if(|assignment| assignment.correlation_id == correlation_id)
    }

    /// Removes every assignment matching `predicate`.
    ///
    /// Rails whose correlation id is shared between callers (a fixed
    /// merchant address) use this to retire one caller's quote.
    pub fn evict_if<F>(&self, predicate: F) -> Vec<Assignment<P>>
    where
        F: Fn(&Assignment<P>) -> bool,
    {
        let mut removed = Vec::new();
        self.entries.retain(|_, assignment| {
            if predicate(assignment) {
                removed.push(assignment.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Whether any live assignment carries `correlation_id`.
    #[must_use]
    pub fn contains_correlation(&self, correlation_id: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.value().correlation_id == correlation_id)
    }

    /// Removes assignments at or past the hard limit and drops idle locks.
    pub fn evict_stale(&self) -> Vec<Assignment<P>> {
        let limit = self.hard_limit();
        let mut removed = Vec::new();
        self.entries.retain(|_, assignment| {
            if assignment.lifetime() >= limit {
                removed.push(assignment.clone());
                false
            } else {
                true
            }
        });
        // Lock clones are only taken under the shard lock, so a count of one
        // means nobody is waiting on or holding this key.
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        if !removed.is_empty() {
            tracing::info!(cache = %self.label, evicted = removed.len(), "swept stale assignments");
        }
        removed
    }

    /// Number of live assignments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
