//! Query cache: the synchronization layer's state machine.
//!
//! # Design
//! `QueryCache` owns every cache entry and every pending optimistic mutation.
//! It never performs I/O: `read` hands out a `FetchTicket` when the host
//! should fetch, and the host reports back through `complete_fetch` or
//! `discard_fetch`. All operations take an explicit monotonic `now`, which
//! keeps staleness and eviction deterministic under test.
//!
//! Invariants:
//! - At most one fetch is in flight per key. While a marker is set, `read`
//!   returns the current entry without a ticket.
//! - Every ticket ends in `complete_fetch` or `discard_fetch`, and both clear
//!   the marker, so a failed fetch never blocks later reads.
//! - An entry that already holds data keeps its status while it refetches;
//!   only `is_fetching` changes.
//! - A mutation snapshots the data it patches and rollback restores that
//!   snapshot. Overlapping mutations on one key snapshot the already patched
//!   data, so only LIFO rollbacks are exact. Rollback therefore invalidates
//!   what it restored, and the refetch settles any other order.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::ApiError;
use crate::patch::OptimisticPatch;
use crate::query::{QueryData, QueryKey};

pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30);
pub const DEFAULT_GC_AFTER: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Age after which successful data is refetched on the next read.
    pub stale_after: Duration,
    /// Time an entry must stay unobserved before it may be evicted.
    pub gc_after: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_after: DEFAULT_STALE_AFTER,
            gc_after: DEFAULT_GC_AFTER,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// Snapshot of one cache entry as seen at a given instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: QueryKey,
    pub data: Option<QueryData>,
    pub status: FetchStatus,
    pub last_fetched_at: Option<Instant>,
    pub error: Option<ApiError>,
    pub is_fetching: bool,
    pub is_stale: bool,
}

/// Permission to fetch one key. Must be handed back exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct FetchTicket {
    key: QueryKey,
    id: u64,
}

impl FetchTicket {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

#[derive(Debug)]
pub struct ReadOutcome {
    pub entry: CacheEntry,
    pub fetch: Option<FetchTicket>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResolution {
    Committed(CacheEntry),
    /// The ticket was outdated (teardown, removal or a mutation cancelled it).
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    Applied,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub targets: Vec<QueryKey>,
    pub patch: Option<OptimisticPatch>,
    pub status: MutationStatus,
    snapshots: Vec<(QueryKey, QueryData)>,
}

impl PendingMutation {
    /// Keys whose data the patch actually changed.
    pub fn patched_keys(&self) -> impl Iterator<Item = &QueryKey> {
        self.snapshots.iter().map(|(key, _)| key)
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    id: u64,
    epoch: u64,
    cancelled: bool,
}

#[derive(Debug)]
struct Slot {
    data: Option<QueryData>,
    status: FetchStatus,
    last_fetched_at: Option<Instant>,
    error: Option<ApiError>,
    invalidated: bool,
    in_flight: Option<InFlight>,
    observers: usize,
    unobserved_since: Option<Instant>,
    /// Bumped by invalidations and patches; a fetch started under an older
    /// epoch cannot mark the entry fresh.
    epoch: u64,
}

impl Slot {
    fn new(now: Instant) -> Self {
        Self {
            data: None,
            status: FetchStatus::Idle,
            last_fetched_at: None,
            error: None,
            invalidated: false,
            in_flight: None,
            observers: 0,
            unobserved_since: Some(now),
            epoch: 0,
        }
    }

    fn is_stale(&self, now: Instant, stale_after: Duration) -> bool {
        self.status == FetchStatus::Success
            && (self.invalidated
                || self
                    .last_fetched_at
                    .is_some_and(|at| now.duration_since(at) > stale_after))
    }

    fn needs_fetch(&self, now: Instant, stale_after: Duration) -> bool {
        match self.status {
            FetchStatus::Idle | FetchStatus::Loading | FetchStatus::Error => true,
            FetchStatus::Success => self.is_stale(now, stale_after),
        }
    }

    /// Undo the `Loading` transition of a fetch that produced no result.
    fn settle_without_result(&mut self) {
        if self.status == FetchStatus::Loading {
            self.status = FetchStatus::Idle;
        }
    }

    fn cancel_in_flight(&mut self) {
        if let Some(flight) = &mut self.in_flight {
            flight.cancelled = true;
        }
    }
}

/// Explicitly owned query cache. Construct one per application (or per
/// test) and tear it down with [`QueryCache::clear`].
#[derive(Debug)]
pub struct QueryCache {
    config: CacheConfig,
    slots: HashMap<QueryKey, Slot>,
    mutations: HashMap<MutationId, PendingMutation>,
    next_fetch_id: u64,
    next_mutation_id: u64,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            slots: HashMap::new(),
            mutations: HashMap::new(),
            next_fetch_id: 1,
            next_mutation_id: 1,
        }
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current entry for `key`, plus a ticket when the caller must fetch it.
    pub fn read(&mut self, key: &QueryKey, now: Instant) -> ReadOutcome {
        let stale_after = self.config.stale_after;
        let fetch_id = self.next_fetch_id;
        let slot = self.slots.entry(key.clone()).or_insert_with(|| Slot::new(now));

        let fetch = if slot.in_flight.is_some() {
            debug!(key = %key, "fetch already in flight, joining");
            None
        } else if slot.needs_fetch(now, stale_after) {
            slot.in_flight = Some(InFlight {
                id: fetch_id,
                epoch: slot.epoch,
                cancelled: false,
            });
            if slot.data.is_none() {
                slot.status = FetchStatus::Loading;
            }
            debug!(key = %key, fetch = fetch_id, "fetch started");
            Some(FetchTicket {
                key: key.clone(),
                id: fetch_id,
            })
        } else {
            None
        };
        if fetch.is_some() {
            self.next_fetch_id += 1;
        }

        let entry = self.snapshot(key, now).unwrap_or_else(|| unreachable_entry(key));
        ReadOutcome { entry, fetch }
    }

    /// Entry for `key` without creating it or starting a fetch.
    pub fn peek(&self, key: &QueryKey, now: Instant) -> Option<CacheEntry> {
        self.snapshot(key, now)
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.slots.get(key).is_some_and(|slot| slot.in_flight.is_some())
    }

    pub fn in_flight(&self) -> usize {
        self.slots.values().filter(|slot| slot.in_flight.is_some()).count()
    }

    /// Record the result of the fetch `ticket` allowed.
    pub fn complete_fetch(
        &mut self,
        ticket: FetchTicket,
        result: Result<QueryData, ApiError>,
        now: Instant,
    ) -> FetchResolution {
        let Some(slot) = self.slots.get_mut(&ticket.key) else {
            debug!(key = %ticket.key, fetch = ticket.id, "entry gone, dropping response");
            return FetchResolution::Discarded;
        };
        let Some(flight) = slot.in_flight.take_if(|flight| flight.id == ticket.id) else {
            debug!(key = %ticket.key, fetch = ticket.id, "outdated ticket, dropping response");
            return FetchResolution::Discarded;
        };
        if flight.cancelled {
            slot.settle_without_result();
            debug!(key = %ticket.key, fetch = ticket.id, "cancelled fetch, dropping response");
            return FetchResolution::Discarded;
        }

        match result {
            Ok(data) => {
                slot.data = Some(data);
                slot.status = FetchStatus::Success;
                slot.last_fetched_at = Some(now);
                slot.error = None;
                slot.invalidated = slot.epoch != flight.epoch;
                debug!(key = %ticket.key, fetch = ticket.id, still_stale = slot.invalidated, "fetch committed");
            }
            Err(error) => {
                debug!(key = %ticket.key, fetch = ticket.id, %error, "fetch failed");
                slot.status = FetchStatus::Error;
                slot.error = Some(error);
            }
        }
        match self.snapshot(&ticket.key, now) {
            Some(entry) => FetchResolution::Committed(entry),
            None => FetchResolution::Discarded,
        }
    }

    /// Release the in-flight marker without touching data. Returns whether
    /// the ticket was still current.
    pub fn discard_fetch(&mut self, ticket: FetchTicket) -> bool {
        let Some(slot) = self.slots.get_mut(&ticket.key) else {
            return false;
        };
        match slot.in_flight.take_if(|flight| flight.id == ticket.id) {
            Some(_) => {
                slot.settle_without_result();
                debug!(key = %ticket.key, fetch = ticket.id, "fetch discarded");
                true
            }
            None => false,
        }
    }

    /// Mark matching entries stale. Returns the matching keys observed by a
    /// live view; those should be refetched in the background.
    pub fn invalidate(&mut self, predicate: impl Fn(&QueryKey) -> bool) -> Vec<QueryKey> {
        let mut observed = Vec::new();
        for (key, slot) in self.slots.iter_mut().filter(|(key, _)| predicate(*key)) {
            slot.invalidated = true;
            slot.epoch += 1;
            if slot.observers > 0 {
                observed.push(key.clone());
            }
        }
        observed.sort();
        debug!(refetch = observed.len(), "invalidated entries");
        observed
    }

    pub fn keys_matching(&self, predicate: impl Fn(&QueryKey) -> bool) -> Vec<QueryKey> {
        let mut keys: Vec<_> = self.slots.keys().filter(|key| predicate(*key)).cloned().collect();
        keys.sort();
        keys
    }

    /// Write authoritative data for `key` directly.
    pub fn set_data(&mut self, key: &QueryKey, data: QueryData, now: Instant) {
        let slot = self.slots.entry(key.clone()).or_insert_with(|| Slot::new(now));
        slot.data = Some(data);
        slot.status = FetchStatus::Success;
        slot.last_fetched_at = Some(now);
        slot.error = None;
        slot.invalidated = false;
        slot.epoch += 1;
        slot.cancel_in_flight();
    }

    pub fn remove(&mut self, key: &QueryKey) -> bool {
        self.slots.remove(key).is_some()
    }

    /// Apply `patch` to every target currently in `Success`, snapshotting
    /// the data it replaces.
    pub fn begin_mutation(&mut self, targets: Vec<QueryKey>, patch: Option<OptimisticPatch>) -> MutationId {
        let id = MutationId(self.next_mutation_id);
        self.next_mutation_id += 1;

        let mut snapshots = Vec::new();
        if let Some(patch) = &patch {
            for key in &targets {
                let Some(slot) = self.slots.get_mut(key) else {
                    continue;
                };
                if slot.status != FetchStatus::Success {
                    continue;
                }
                let Some(previous) = slot.data.take() else {
                    continue;
                };
                match patch.apply(key, &previous) {
                    Some(next) => {
                        slot.data = Some(next);
                        slot.epoch += 1;
                        slot.cancel_in_flight();
                        snapshots.push((key.clone(), previous));
                    }
                    None => slot.data = Some(previous),
                }
            }
        }
        debug!(mutation = id.0, targets = targets.len(), patched = snapshots.len(), "mutation applied");
        self.mutations.insert(
            id,
            PendingMutation {
                targets,
                patch,
                status: MutationStatus::Applied,
                snapshots,
            },
        );
        id
    }

    pub fn mutation(&self, id: MutationId) -> Option<&PendingMutation> {
        self.mutations.get(&id)
    }

    /// Confirm a mutation: drop its snapshots and invalidate its targets.
    /// Returns the observed targets to refetch.
    pub fn commit_mutation(&mut self, id: MutationId) -> Vec<QueryKey> {
        let targets: HashSet<QueryKey> = match self.mutations.get_mut(&id) {
            Some(mutation) if mutation.status == MutationStatus::Applied => {
                mutation.status = MutationStatus::Committed;
                mutation.snapshots.clear();
                mutation.targets.iter().cloned().collect()
            }
            _ => return Vec::new(),
        };
        debug!(mutation = id.0, "mutation committed");
        self.invalidate(|key| targets.contains(key))
    }

    /// Restore every snapshot the mutation took, then invalidate its
    /// targets. Returns the observed targets to refetch; rolling back a
    /// mutation that is no longer applied is a no-op returning nothing.
    ///
    /// A snapshot is only exact when overlapping mutations unwind in LIFO
    /// order, so restored data stays visible but is never trusted as fresh.
    pub fn rollback_mutation(&mut self, id: MutationId) -> Vec<QueryKey> {
        let (snapshots, targets) = match self.mutations.get_mut(&id) {
            Some(mutation) if mutation.status == MutationStatus::Applied => {
                mutation.status = MutationStatus::RolledBack;
                let targets: HashSet<QueryKey> = mutation.targets.iter().cloned().collect();
                (std::mem::take(&mut mutation.snapshots), targets)
            }
            _ => return Vec::new(),
        };
        for (key, previous) in snapshots {
            if let Some(slot) = self.slots.get_mut(&key) {
                slot.data = Some(previous);
            }
        }
        debug!(mutation = id.0, "mutation rolled back");
        self.invalidate(|key| targets.contains(key))
    }

    pub fn observe(&mut self, key: &QueryKey, now: Instant) {
        let slot = self.slots.entry(key.clone()).or_insert_with(|| Slot::new(now));
        slot.observers += 1;
        slot.unobserved_since = None;
    }

    pub fn unobserve(&mut self, key: &QueryKey, now: Instant) {
        if let Some(slot) = self.slots.get_mut(key) {
            slot.observers = slot.observers.saturating_sub(1);
            if slot.observers == 0 {
                slot.unobserved_since = Some(now);
            }
        }
    }

    pub fn observers(&self, key: &QueryKey) -> usize {
        self.slots.get(key).map_or(0, |slot| slot.observers)
    }

    /// Evict entries nobody has observed for `gc_after`, and forget settled
    /// mutations. Entries with a fetch in flight or referenced by an applied
    /// mutation are kept. Returns the number of evicted entries.
    pub fn collect_garbage(&mut self, now: Instant) -> usize {
        self.mutations.retain(|_, mutation| mutation.status == MutationStatus::Applied);
        let referenced: HashSet<&QueryKey> = self
            .mutations
            .values()
            .flat_map(|mutation| mutation.targets.iter())
            .collect();

        let gc_after = self.config.gc_after;
        let before = self.slots.len();
        let evictable: Vec<QueryKey> = self
            .slots
            .iter()
            .filter(|(key, slot)| {
                slot.observers == 0
                    && slot.in_flight.is_none()
                    && !referenced.contains(key)
                    && slot
                        .unobserved_since
                        .is_some_and(|since| now.duration_since(since) >= gc_after)
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in &evictable {
            self.slots.remove(key);
        }
        let evicted = before - self.slots.len();
        if evicted > 0 {
            debug!(evicted, "evicted unobserved entries");
        }
        evicted
    }

    /// Teardown: drop every entry and pending mutation. Tickets issued
    /// before the call are discarded when they come back. Returns how many
    /// fetches were in flight.
    pub fn clear(&mut self) -> usize {
        let aborted = self.in_flight();
        self.slots.clear();
        self.mutations.clear();
        debug!(aborted, "cache cleared");
        aborted
    }

    fn snapshot(&self, key: &QueryKey, now: Instant) -> Option<CacheEntry> {
        let slot = self.slots.get(key)?;
        Some(CacheEntry {
            key: key.clone(),
            data: slot.data.clone(),
            status: slot.status,
            last_fetched_at: slot.last_fetched_at,
            error: slot.error.clone(),
            is_fetching: slot.in_flight.is_some(),
            is_stale: slot.is_stale(now, self.config.stale_after),
        })
    }
}

// `read` inserts the slot before taking the snapshot, so this only exists to
// avoid a panic path.
fn unreachable_entry(key: &QueryKey) -> CacheEntry {
    CacheEntry {
        key: key.clone(),
        data: None,
        status: FetchStatus::Idle,
        last_fetched_at: None,
        error: None,
        is_fetching: false,
        is_stale: false,
    }
}
