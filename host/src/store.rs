//! Async driver for the core `QueryCache`.
//!
//! # Design
//! `TaskStore` owns one `QueryCache` behind a `parking_lot::Mutex`. The lock
//! is only taken between suspension points, so every cache transition runs
//! to completion. When the cache hands out a fetch ticket the calling task
//! becomes the fetch owner: it publishes a `watch` receiver for the key,
//! performs the request and reports the result back. Other readers of the
//! same key wait on that receiver instead of sending a second request.
//!
//! Tickets and optimistic mutations are wrapped in guards (`Flight`,
//! `PendingWrite`) whose `Drop` releases the cache state, so a cancelled
//! future never leaves a key marked as fetching or a patch applied.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use taskboard_core::form::{validate_create, validate_update};
use taskboard_core::{
    ApiError, CacheConfig, CacheEntry, CreateTask, FetchResolution, FetchStatus, FetchTicket, HttpRequest,
    HttpResponse, ListParams, MutationId, OptimisticPatch, QueryCache, QueryData, QueryKey, ResourceKind, Task,
    TaskClient, TaskId, TasksPage, UpdateTask, ValidationErrors,
};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::scheduler::ScheduledCallback;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    /// The entry settled without data, e.g. the store was cleared mid-fetch.
    #[error("no data available for {0}")]
    Unavailable(QueryKey),
}

type Waiter = watch::Receiver<Option<CacheEntry>>;

enum Step<T> {
    Ready(CacheEntry),
    Fetch(Flight<T>, CacheEntry),
    Join(Option<Waiter>),
}

struct State {
    cache: QueryCache,
    /// Fetches in flight, keyed by query. The sequence number tells a flight
    /// apart from a newer one for the same key started after `clear`.
    waiters: HashMap<QueryKey, (u64, Waiter)>,
    next_flight: u64,
}

struct Inner<T> {
    client: TaskClient,
    transport: T,
    state: Mutex<State>,
}

/// Shared handle to the cache and the transport. Clones are cheap and see
/// the same cache.
pub struct TaskStore<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for TaskStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Monotonic time that follows tokio's clock, so paused-time tests can
/// drive staleness and eviction.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

impl<T: Transport> TaskStore<T> {
    pub fn new(client: TaskClient, transport: T, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                transport,
                state: Mutex::new(State {
                    cache: QueryCache::new(config),
                    waiters: HashMap::new(),
                    next_flight: 1,
                }),
            }),
        }
    }

    pub fn client(&self) -> &TaskClient {
        &self.inner.client
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Current entry for `key`, fetching first when nothing is cached.
    ///
    /// Cached data is returned at once; if it is stale a background refetch
    /// starts and the entry reports `is_fetching`.
    pub async fn read(&self, key: &QueryKey) -> CacheEntry {
        self.read_if(key, |_| true).await
    }

    /// Like [`read`](Self::read), but a response for which `still_wanted`
    /// returns `false` on arrival is dropped instead of cached.
    pub async fn read_if(&self, key: &QueryKey, still_wanted: impl Fn(&QueryKey) -> bool) -> CacheEntry {
        loop {
            let step = {
                let mut state = self.inner.state.lock();
                let outcome = state.cache.read(key, now());
                match outcome.fetch {
                    Some(ticket) => Step::Fetch(self.begin_flight(&mut state, ticket), outcome.entry),
                    None if outcome.entry.data.is_some() || !outcome.entry.is_fetching => Step::Ready(outcome.entry),
                    None => Step::Join(state.waiters.get(key).map(|(_, rx)| rx.clone())),
                }
            };

            match step {
                Step::Ready(entry) => return entry,
                Step::Fetch(flight, entry) if entry.data.is_some() => {
                    self.spawn_flight(flight);
                    return entry;
                }
                Step::Fetch(flight, _) => return self.run_flight(flight, &still_wanted).await,
                Step::Join(None) => tokio::task::yield_now().await,
                // A flight that ends without a usable entry (dropped, or its
                // owner discarded the response) sends us back to the cache.
                Step::Join(Some(mut rx)) => {
                    debug!(key = %key, "joining in-flight fetch");
                    let settled = rx.wait_for(Option::is_some).await.ok().and_then(|entry| entry.clone());
                    if let Some(entry) = settled.filter(|entry| entry.status != FetchStatus::Idle) {
                        return entry;
                    }
                }
            }
        }
    }

    /// Entry for `key` without fetching.
    pub fn peek(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.inner.state.lock().cache.peek(key, now())
    }

    pub async fn tasks(&self, params: &ListParams) -> Result<TasksPage, StoreError> {
        let entry = self.read(&QueryKey::task_list(params)).await;
        page_of(entry)
    }

    pub async fn task(&self, id: &TaskId) -> Result<Task, StoreError> {
        let entry = self.read(&QueryKey::task(id)).await;
        match (&entry.data, entry.error) {
            (Some(QueryData::Task(task)), _) => Ok(task.clone()),
            (_, Some(error)) => Err(error.into()),
            _ => Err(StoreError::Unavailable(entry.key)),
        }
    }

    /// Register a live view of `key` until the returned guard is dropped.
    /// Observed keys are refetched after invalidation and never evicted.
    pub fn observe(&self, key: &QueryKey) -> Observer<T> {
        self.inner.state.lock().cache.observe(key, now());
        Observer {
            store: self.clone(),
            key: key.clone(),
        }
    }

    /// Mark matching entries stale and refetch the observed ones in the
    /// background. Returns the keys being refetched.
    pub fn invalidate(&self, predicate: impl Fn(&QueryKey) -> bool) -> Vec<QueryKey> {
        let keys = self.inner.state.lock().cache.invalidate(predicate);
        for key in &keys {
            self.revalidate(key);
        }
        keys
    }

    pub async fn create_task(&self, input: CreateTask) -> Result<Task, StoreError> {
        validate_create(&input)?;
        let request = self.inner.client.build_create_task(&input)?;
        let placeholder = Task::optimistic(&input, Utc::now());
        let write = self.begin_write(QueryKey::is_task_list, OptimisticPatch::Insert(placeholder));

        match self.send(request, TaskClient::parse_create_task).await {
            Ok(task) => {
                let refetch = write.commit(|_, _| {});
                info!(id = %task.id, "task created");
                self.refetch(refetch, None);
                Ok(task)
            }
            Err(error) => {
                write.rollback(&error);
                Err(error.into())
            }
        }
    }

    pub async fn update_task(&self, id: &TaskId, changes: UpdateTask) -> Result<Task, StoreError> {
        validate_update(&changes)?;
        let request = self.inner.client.build_update_task(id, &changes)?;
        let detail = QueryKey::task(id);
        let patch = OptimisticPatch::Update {
            id: id.clone(),
            changes,
            at: Utc::now(),
        };
        let write = self.begin_write(|key| key.is_task_list() || *key == detail, patch);

        match self.send(request, TaskClient::parse_update_task).await {
            Ok(task) => {
                let refetch = write.commit(|cache, at| cache.set_data(&detail, QueryData::Task(task.clone()), at));
                info!(id = %task.id, "task updated");
                self.refetch(refetch, None);
                Ok(task)
            }
            Err(error) => {
                write.rollback(&error);
                Err(error.into())
            }
        }
    }

    pub async fn delete_task(&self, id: &TaskId) -> Result<(), StoreError> {
        let request = self.inner.client.build_delete_task(id);
        let detail = QueryKey::task(id);
        let write = self.begin_write(
            |key| key.is_task_list() || *key == detail,
            OptimisticPatch::Remove(id.clone()),
        );

        match self.send(request, TaskClient::parse_delete_task).await {
            Ok(()) => {
                let refetch = write.commit(|cache, _| {
                    cache.remove(&detail);
                });
                info!(id = %id, "task deleted");
                self.refetch(refetch, Some(&detail));
                Ok(())
            }
            Err(error) => {
                write.rollback(&error);
                Err(error.into())
            }
        }
    }

    /// Evict entries left unobserved past the configured window.
    pub fn collect_garbage(&self) -> usize {
        self.inner.state.lock().cache.collect_garbage(now())
    }

    /// Run [`collect_garbage`](Self::collect_garbage) every `period` until
    /// the returned handle is cancelled or dropped.
    pub fn spawn_gc(&self, period: Duration) -> ScheduledCallback {
        let store = self.clone();
        ScheduledCallback::every(period, move || {
            store.collect_garbage();
        })
    }

    /// Teardown: drop every entry, pending mutation and in-flight marker.
    /// Responses still on the way are discarded when they arrive.
    pub fn clear(&self) -> usize {
        let mut state = self.inner.state.lock();
        state.waiters.clear();
        state.cache.clear()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn begin_flight(&self, state: &mut State, ticket: FetchTicket) -> Flight<T> {
        let (tx, rx) = watch::channel(None);
        let seq = state.next_flight;
        state.next_flight += 1;
        let key = ticket.key().clone();
        state.waiters.insert(key.clone(), (seq, rx));
        Flight {
            store: self.clone(),
            key,
            ticket: Some(ticket),
            seq,
            tx,
        }
    }

    fn spawn_flight(&self, flight: Flight<T>) {
        let store = self.clone();
        tokio::spawn(async move {
            store.run_flight(flight, &|_: &QueryKey| true).await;
        });
    }

    /// Start a background fetch of `key` if the cache wants one.
    fn revalidate(&self, key: &QueryKey) {
        let flight = {
            let mut state = self.inner.state.lock();
            let outcome = state.cache.read(key, now());
            outcome.fetch.map(|ticket| self.begin_flight(&mut state, ticket))
        };
        if let Some(flight) = flight {
            self.spawn_flight(flight);
        }
    }

    fn refetch(&self, keys: Vec<QueryKey>, skip: Option<&QueryKey>) {
        for key in keys.iter().filter(|key| Some(*key) != skip) {
            self.revalidate(key);
        }
    }

    async fn run_flight(&self, mut flight: Flight<T>, still_wanted: &impl Fn(&QueryKey) -> bool) -> CacheEntry {
        let key = flight.key.clone();
        let result = self.fetch(&key).await;
        if !still_wanted(&key) {
            debug!(key = %key, "response no longer wanted, dropping");
            return flight.discard();
        }
        flight.complete(result)
    }

    async fn fetch(&self, key: &QueryKey) -> Result<QueryData, ApiError> {
        let client = &self.inner.client;
        match key.kind {
            ResourceKind::TaskList => {
                let params = key.list_params().unwrap_or_default();
                self.send(client.build_list_tasks(&params), TaskClient::parse_list_tasks)
                    .await
                    .map(QueryData::TaskPage)
            }
            ResourceKind::Task => {
                let id = key
                    .task_id()
                    .ok_or_else(|| ApiError::Serialization(format!("{key} has no task id")))?;
                self.send(client.build_get_task(&id), TaskClient::parse_get_task)
                    .await
                    .map(QueryData::Task)
            }
        }
    }

    async fn send<R>(
        &self,
        request: HttpRequest,
        parse: impl FnOnce(&TaskClient, HttpResponse) -> Result<R, ApiError>,
    ) -> Result<R, ApiError> {
        let response = self.inner.transport.execute(request).await?;
        parse(&self.inner.client, response)
    }

    fn begin_write(&self, targets: impl Fn(&QueryKey) -> bool, patch: OptimisticPatch) -> PendingWrite<T> {
        let mut state = self.inner.state.lock();
        let targets = state.cache.keys_matching(targets);
        let id = state.cache.begin_mutation(targets, Some(patch));
        PendingWrite {
            store: self.clone(),
            id: Some(id),
        }
    }
}

fn page_of(entry: CacheEntry) -> Result<TasksPage, StoreError> {
    match (&entry.data, entry.error) {
        (Some(QueryData::TaskPage(page)), _) => Ok(page.clone()),
        (_, Some(error)) => Err(error.into()),
        _ => Err(StoreError::Unavailable(entry.key)),
    }
}

fn vacant(key: QueryKey) -> CacheEntry {
    CacheEntry {
        key,
        data: None,
        status: FetchStatus::Idle,
        last_fetched_at: None,
        error: None,
        is_fetching: false,
        is_stale: false,
    }
}

/// An owned fetch ticket. Dropping it without completing releases the
/// in-flight marker and wakes any joiners.
struct Flight<T> {
    store: TaskStore<T>,
    key: QueryKey,
    ticket: Option<FetchTicket>,
    seq: u64,
    tx: watch::Sender<Option<CacheEntry>>,
}

impl<T> Flight<T> {
    fn complete(&mut self, result: Result<QueryData, ApiError>) -> CacheEntry {
        self.settle(|cache, ticket, at| {
            let key = ticket.key().clone();
            match cache.complete_fetch(ticket, result, at) {
                FetchResolution::Committed(entry) => entry,
                FetchResolution::Discarded => cache.peek(&key, at).unwrap_or_else(|| vacant(key)),
            }
        })
    }

    fn discard(&mut self) -> CacheEntry {
        self.settle(|cache, ticket, at| {
            let key = ticket.key().clone();
            cache.discard_fetch(ticket);
            // Joiners re-read on an idle entry; the owner reports it as is.
            let mut entry = cache.peek(&key, at).unwrap_or_else(|| vacant(key));
            entry.status = FetchStatus::Idle;
            entry
        })
    }

    fn settle(
        &mut self,
        finish: impl FnOnce(&mut QueryCache, FetchTicket, Instant) -> CacheEntry,
    ) -> CacheEntry {
        let Some(ticket) = self.ticket.take() else {
            return self.tx.borrow().clone().unwrap_or_else(|| vacant(self.key.clone()));
        };
        let entry = {
            let mut state = self.store.inner.state.lock();
            if state.waiters.get(&self.key).is_some_and(|(seq, _)| *seq == self.seq) {
                state.waiters.remove(&self.key);
            }
            finish(&mut state.cache, ticket, now())
        };
        self.tx.send_replace(Some(entry.clone()));
        entry
    }
}

impl<T> Drop for Flight<T> {
    fn drop(&mut self) {
        if self.ticket.is_some() {
            debug!(key = %self.key, "fetch abandoned, releasing ticket");
            self.discard();
        }
    }
}

/// An optimistic mutation awaiting the server. Dropping it unsettled rolls
/// the patch back.
struct PendingWrite<T> {
    store: TaskStore<T>,
    id: Option<MutationId>,
}

impl<T> PendingWrite<T> {
    /// Confirm the patch, run `after` under the same lock, and return the
    /// observed keys to refetch.
    fn commit(mut self, after: impl FnOnce(&mut QueryCache, Instant)) -> Vec<QueryKey> {
        let Some(id) = self.id.take() else {
            return Vec::new();
        };
        let mut state = self.store.inner.state.lock();
        let refetch = state.cache.commit_mutation(id);
        after(&mut state.cache, now());
        refetch
    }
}

impl<T: Transport> PendingWrite<T> {
    /// Undo the patch and refetch the observed keys it touched.
    fn rollback(mut self, error: &ApiError) {
        let Some(id) = self.id.take() else {
            return;
        };
        warn!(mutation = ?id, %error, "write failed, rolling back");
        let refetch = self.store.inner.state.lock().cache.rollback_mutation(id);
        self.store.refetch(refetch, None);
    }
}

impl<T> Drop for PendingWrite<T> {
    // Restored entries are left stale; the next read refetches them.
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            warn!(mutation = ?id, "write abandoned, rolling back");
            self.store.inner.state.lock().cache.rollback_mutation(id);
        }
    }
}

/// Live view of one key. Dropping it releases the reference.
pub struct Observer<T> {
    store: TaskStore<T>,
    key: QueryKey,
}

impl<T> Observer<T> {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

impl<T> Drop for Observer<T> {
    fn drop(&mut self) {
        self.store.inner.state.lock().cache.unobserve(&self.key, now());
    }
}
