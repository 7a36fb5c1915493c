//! `TaskStore` and `ListSession` against an in-memory backend.
//!
//! Every test runs on a paused clock. The fake transport answers after a
//! fixed latency, so "while the request is in flight" is simply "before
//! `LATENCY` has passed".

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use taskboard_core::form::Field;
use taskboard_core::types::total_pages;
use taskboard_core::{
    ApiError, CacheConfig, CreateTask, FetchStatus, HttpMethod, HttpRequest, HttpResponse, ListParams, ListView,
    PageSize, QueryData, QueryKey, StatusFilter, Task, TaskClient, TaskId, TaskStatus, TasksPage, UpdateTask,
};
use taskboard_host::{ListSession, StoreError, TaskStore, Transport};

const BASE: &str = "http://fake/api";
const LATENCY: Duration = Duration::from_millis(50);

#[derive(Default)]
struct Backend {
    /// Newest first, like the real service.
    tasks: Mutex<Vec<Task>>,
    calls: Mutex<Vec<HttpRequest>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    next_id: AtomicUsize,
}

#[derive(Clone, Default)]
struct Fake(Arc<Backend>);

#[async_trait]
impl Transport for Fake {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        self.0.calls.lock().push(request.clone());
        tokio::time::sleep(LATENCY).await;
        Ok(self.0.respond(&request))
    }
}

fn reply(status: u16, body: String) -> HttpResponse {
    HttpResponse {
        status,
        headers: Vec::new(),
        body,
    }
}

fn stamp() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap().with_timezone(&Utc)
}

impl Backend {
    fn respond(&self, request: &HttpRequest) -> HttpResponse {
        let failing = match request.method {
            HttpMethod::Get => &self.fail_reads,
            _ => &self.fail_writes,
        };
        if failing.load(Ordering::SeqCst) {
            return reply(500, "boom".to_string());
        }

        let path = request.path.strip_prefix(BASE).expect("request outside base url");
        let (route, query) = path.split_once('?').unwrap_or((path, ""));
        let id = route.strip_prefix("/tasks/").map(TaskId::new);
        let mut tasks = self.tasks.lock();

        match (request.method, id) {
            (HttpMethod::Get, None) => {
                let mut status = None;
                let mut page = 1;
                let mut limit = 10;
                for pair in query.split('&').filter(|pair| !pair.is_empty()) {
                    let (name, value) = pair.split_once('=').unwrap();
                    match name {
                        "status" => status = Some(value.parse::<TaskStatus>().unwrap()),
                        "page" => page = value.parse().unwrap(),
                        "limit" => limit = value.parse().unwrap(),
                        other => panic!("unexpected query parameter {other}"),
                    }
                }
                let matching: Vec<&Task> = tasks
                    .iter()
                    .filter(|task| status.is_none_or(|status| task.status == status))
                    .collect();
                let total = matching.len() as u32;
                let data = matching
                    .into_iter()
                    .skip(((page - 1) * limit) as usize)
                    .take(limit as usize)
                    .cloned()
                    .collect();
                let body = TasksPage {
                    data,
                    total,
                    page,
                    limit,
                    total_pages: total_pages(total, limit),
                };
                reply(200, serde_json::to_string(&body).unwrap())
            }
            (HttpMethod::Post, None) => {
                let input: CreateTask = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
                let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                let task = Task {
                    id: TaskId::new(format!("new-{n}")),
                    title: input.title,
                    description: input.description,
                    status: TaskStatus::Todo,
                    created_at: stamp(),
                    updated_at: stamp(),
                };
                tasks.insert(0, task.clone());
                reply(201, serde_json::to_string(&task).unwrap())
            }
            (HttpMethod::Get, Some(id)) => match tasks.iter().find(|task| task.id == id) {
                Some(task) => reply(200, serde_json::to_string(task).unwrap()),
                None => reply(404, String::new()),
            },
            (HttpMethod::Patch, Some(id)) => {
                let changes: UpdateTask = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
                match tasks.iter_mut().find(|task| task.id == id) {
                    Some(task) => {
                        *task = changes.apply_to(task, stamp() + chrono::Duration::hours(1));
                        reply(200, serde_json::to_string(task).unwrap())
                    }
                    None => reply(404, String::new()),
                }
            }
            (HttpMethod::Delete, Some(id)) => match tasks.iter().position(|task| task.id == id) {
                Some(index) => {
                    tasks.remove(index);
                    reply(204, String::new())
                }
                None => reply(404, String::new()),
            },
            (method, _) => panic!("unexpected {method} {route}"),
        }
    }
}

impl Fake {
    fn seeded(count: usize) -> Self {
        let fake = Fake::default();
        *fake.0.tasks.lock() = (1..=count)
            .map(|n| Task {
                id: TaskId::new(format!("t{n}")),
                title: format!("Task {n}"),
                description: None,
                status: TaskStatus::Todo,
                created_at: stamp(),
                updated_at: stamp(),
            })
            .collect();
        fake
    }

    fn calls(&self) -> usize {
        self.0.calls.lock().len()
    }
}

fn store(fake: &Fake) -> TaskStore<Fake> {
    TaskStore::new(TaskClient::new(BASE), fake.clone(), CacheConfig::default())
}

fn first_page() -> QueryKey {
    QueryKey::task_list(&ListParams {
        status: None,
        page: Some(1),
        limit: Some(6),
    })
}

fn ids(store: &TaskStore<Fake>, key: &QueryKey) -> Vec<String> {
    let entry = store.peek(key).unwrap();
    let page = entry.data.as_ref().and_then(QueryData::as_page).unwrap();
    page.data.iter().map(|task| task.id.to_string()).collect()
}

fn total(store: &TaskStore<Fake>, key: &QueryKey) -> u32 {
    let entry = store.peek(key).unwrap();
    entry.data.as_ref().and_then(QueryData::as_page).unwrap().total
}

/// Let spawned tasks run up to their first request without finishing it.
async fn start() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Let every request in flight finish.
async fn settle() {
    tokio::time::sleep(LATENCY * 2).await;
}

// --- reads ---

#[tokio::test(start_paused = true)]
async fn concurrent_reads_share_one_request() {
    let fake = Fake::seeded(2);
    let store = store(&fake);
    let key = first_page();

    let (a, b) = tokio::join!(store.read(&key), store.read(&key));

    assert_eq!(fake.calls(), 1);
    assert_eq!(a, b);
    assert_eq!(a.status, FetchStatus::Success);
    assert_eq!(ids(&store, &key), ["t1", "t2"]);
}

#[tokio::test(start_paused = true)]
async fn fresh_data_is_served_from_cache() {
    let fake = Fake::seeded(1);
    let store = store(&fake);
    let key = first_page();

    store.read(&key).await;
    tokio::time::advance(Duration::from_secs(30)).await;
    let entry = store.read(&key).await;

    assert_eq!(fake.calls(), 1);
    assert!(!entry.is_stale);
    assert!(!entry.is_fetching);
}

#[tokio::test(start_paused = true)]
async fn stale_data_is_returned_while_revalidating() {
    let fake = Fake::seeded(1);
    let store = store(&fake);
    let key = first_page();
    store.read(&key).await;

    tokio::time::advance(Duration::from_secs(31)).await;
    let entry = store.read(&key).await;
    assert!(entry.is_stale);
    assert!(entry.is_fetching);
    assert_eq!(entry.status, FetchStatus::Success);
    assert!(entry.data.is_some());

    settle().await;
    assert_eq!(fake.calls(), 2);
    let entry = store.peek(&key).unwrap();
    assert!(!entry.is_stale);
    assert!(!entry.is_fetching);
}

#[tokio::test(start_paused = true)]
async fn failed_read_is_reported_and_retried_next_time() {
    let fake = Fake::seeded(1);
    let store = store(&fake);
    let params = ListParams::default();

    fake.0.fail_reads.store(true, Ordering::SeqCst);
    let err = store.tasks(&params).await.unwrap_err();
    assert!(matches!(err, StoreError::Api(ApiError::Server { status: 500, .. })));
    let entry = store.peek(&QueryKey::task_list(&params)).unwrap();
    assert_eq!(entry.status, FetchStatus::Error);
    assert!(!entry.is_fetching);

    fake.0.fail_reads.store(false, Ordering::SeqCst);
    let page = store.tasks(&params).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(fake.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn missing_task_is_not_found() {
    let fake = Fake::seeded(1);
    let store = store(&fake);

    let err = store.task(&TaskId::new("nope")).await.unwrap_err();
    assert_eq!(err, StoreError::Api(ApiError::NotFound));
    assert_eq!(store.task(&TaskId::new("t1")).await.unwrap().title, "Task 1");
}

#[tokio::test(start_paused = true)]
async fn invalidate_refetches_only_observed_keys() {
    let fake = Fake::seeded(3);
    let store = store(&fake);
    let watched = first_page();
    let other = QueryKey::task_list(&ListParams {
        status: Some(TaskStatus::Done),
        page: Some(1),
        limit: Some(6),
    });
    store.read(&watched).await;
    store.read(&other).await;
    let _observer = store.observe(&watched);

    assert_eq!(store.invalidate(QueryKey::is_task_list), vec![watched.clone()]);
    settle().await;

    assert_eq!(fake.calls(), 3);
    assert!(!store.peek(&watched).unwrap().is_stale);
    assert!(store.peek(&other).unwrap().is_stale);
}

// --- writes ---

#[tokio::test(start_paused = true)]
async fn create_shows_placeholder_then_server_task() {
    let fake = Fake::seeded(1);
    let store = store(&fake);
    let key = first_page();
    store.read(&key).await;
    let _observer = store.observe(&key);

    let writer = store.clone();
    let create = tokio::spawn(async move {
        writer
            .create_task(CreateTask {
                title: "Write report".to_string(),
                description: None,
            })
            .await
    });
    start().await;

    let optimistic = ids(&store, &key);
    assert_eq!(optimistic.len(), 2);
    assert!(TaskId::new(optimistic[0].as_str()).is_temporary());
    assert_eq!(optimistic[1], "t1");
    assert_eq!(total(&store, &key), 2);

    let created = create.await.unwrap().unwrap();
    assert_eq!(created.id, TaskId::new("new-1"));
    settle().await;

    assert_eq!(ids(&store, &key), ["new-1", "t1"]);
    assert_eq!(total(&store, &key), 2);
    assert!(!store.peek(&key).unwrap().is_stale);
}

#[tokio::test(start_paused = true)]
async fn failed_delete_restores_list_and_marks_it_stale() {
    let fake = Fake::seeded(2);
    let store = store(&fake);
    let key = first_page();
    store.read(&key).await;
    let before = store.peek(&key).unwrap();

    fake.0.fail_writes.store(true, Ordering::SeqCst);
    let writer = store.clone();
    let delete = tokio::spawn(async move { writer.delete_task(&TaskId::new("t1")).await });
    start().await;

    assert_eq!(ids(&store, &key), ["t2"]);
    assert_eq!(total(&store, &key), 1);

    let err = delete.await.unwrap().unwrap_err();
    assert!(matches!(err, StoreError::Api(ApiError::Server { status: 500, .. })));
    let restored = store.peek(&key).unwrap();
    assert_eq!(restored.data, before.data);
    assert!(restored.is_stale);

    // Nobody observes the list, so it waits for the next read.
    settle().await;
    assert_eq!(fake.calls(), 2);
    assert!(store.read(&key).await.is_fetching);
}

#[tokio::test(start_paused = true)]
async fn overlapping_failed_deletes_refetch_observed_list() {
    let fake = Fake::seeded(3);
    let store = store(&fake);
    let key = first_page();
    store.read(&key).await;
    let _observer = store.observe(&key);
    fake.0.fail_writes.store(true, Ordering::SeqCst);

    let writer = store.clone();
    let first = tokio::spawn(async move { writer.delete_task(&TaskId::new("t1")).await });
    start().await;
    let writer = store.clone();
    let second = tokio::spawn(async move { writer.delete_task(&TaskId::new("t2")).await });
    start().await;
    assert_eq!(ids(&store, &key), ["t3"]);

    // The first delete fails first, so its rollback is undone by the
    // second one restoring a list that still lacks t1.
    assert!(first.await.unwrap().is_err());
    assert!(second.await.unwrap().is_err());
    settle().await;

    assert_eq!(fake.0.tasks.lock().len(), 3);
    assert_eq!(ids(&store, &key), ["t1", "t2", "t3"]);
    let reads = fake
        .0
        .calls
        .lock()
        .iter()
        .filter(|request| request.method == HttpMethod::Get)
        .count();
    assert_eq!(reads, 2);
}

#[tokio::test(start_paused = true)]
async fn delete_drops_detail_entry() {
    let fake = Fake::seeded(2);
    let store = store(&fake);
    let id = TaskId::new("t1");
    store.task(&id).await.unwrap();

    store.delete_task(&id).await.unwrap();

    assert!(store.peek(&QueryKey::task(&id)).is_none());
    assert_eq!(fake.0.tasks.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn update_stores_server_task_in_detail_entry() {
    let fake = Fake::seeded(2);
    let store = store(&fake);
    let id = TaskId::new("t2");
    let list = first_page();
    store.read(&list).await;
    store.task(&id).await.unwrap();

    let changes = UpdateTask {
        title: Some("Renamed".to_string()),
        status: Some(TaskStatus::Done),
        ..UpdateTask::default()
    };
    let updated = store.update_task(&id, changes).await.unwrap();
    assert_eq!(updated.title, "Renamed");

    let detail = store.peek(&QueryKey::task(&id)).unwrap();
    assert_eq!(detail.data, Some(QueryData::Task(updated)));
    assert!(!detail.is_stale);

    // The unobserved list keeps its patched copy and refetches on next read.
    let entry = store.peek(&list).unwrap();
    assert!(entry.is_stale);
    let page = entry.data.as_ref().and_then(QueryData::as_page).unwrap();
    assert_eq!(page.data[1].title, "Renamed");
    assert_eq!(page.data[1].status, TaskStatus::Done);
}

#[tokio::test(start_paused = true)]
async fn invalid_input_never_reaches_the_server() {
    let fake = Fake::seeded(1);
    let store = store(&fake);

    let err = store
        .create_task(CreateTask {
            title: "   ".to_string(),
            description: None,
        })
        .await
        .unwrap_err();
    let StoreError::Validation(errors) = err else {
        panic!("expected validation error");
    };
    assert_eq!(errors.message_for(Field::Title), Some("Title is required"));

    let changes = UpdateTask {
        title: Some("x".repeat(201)),
        ..UpdateTask::default()
    };
    let err = store.update_task(&TaskId::new("t1"), changes).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    assert_eq!(fake.calls(), 0);
    assert!(store.is_empty());
}

// --- lifecycle ---

#[tokio::test(start_paused = true)]
async fn clear_discards_response_in_flight() {
    let fake = Fake::seeded(1);
    let store = store(&fake);
    let key = first_page();

    let reader = store.clone();
    let read = tokio::spawn(async move { reader.read(&first_page()).await });
    start().await;
    assert_eq!(store.clear(), 1);

    let entry = read.await.unwrap();
    assert!(entry.data.is_none());
    assert!(store.peek(&key).is_none());
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn unobserved_entries_are_collected() {
    let fake = Fake::seeded(1);
    let store = store(&fake);
    let watched = QueryKey::task(&TaskId::new("t1"));
    store.read(&first_page()).await;
    store.read(&watched).await;
    let observer = store.observe(&watched);

    tokio::time::advance(Duration::from_secs(299)).await;
    assert_eq!(store.collect_garbage(), 0);
    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(store.collect_garbage(), 1);
    assert!(store.peek(&watched).is_some());

    drop(observer);
    tokio::time::advance(Duration::from_secs(300)).await;
    assert_eq!(store.collect_garbage(), 1);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn periodic_gc_runs_in_background() {
    let fake = Fake::seeded(1);
    let store = store(&fake);
    store.read(&first_page()).await;

    let _gc = store.spawn_gc(Duration::from_secs(60));
    tokio::time::sleep(Duration::from_secs(301)).await;
    assert!(store.is_empty());
}

// --- list session ---

#[tokio::test(start_paused = true)]
async fn superseded_page_response_is_dropped() {
    let fake = Fake::seeded(8);
    let store = store(&fake);
    let session = Arc::new(ListSession::new(store.clone(), ListView::default()));

    let loader = Arc::clone(&session);
    let first = tokio::spawn(async move { loader.load().await });
    start().await;
    session.set_page(2).unwrap();

    assert_eq!(first.await.unwrap().unwrap(), None);
    let dropped = store.peek(&first_page()).unwrap();
    assert!(dropped.data.is_none());

    let page = session.load().await.unwrap().unwrap();
    assert_eq!(page.view.page(), 2);
    assert_eq!(page.tasks.data.len(), 2);
    assert_eq!(page.range.unwrap().describe(), "Showing 7 to 8 of 8 results");
}

#[tokio::test(start_paused = true)]
async fn page_past_the_end_is_clamped() {
    let fake = Fake::seeded(7);
    let store = store(&fake);
    let session = ListSession::new(store, ListView::default());
    session.set_page(5).unwrap();

    let page = session.load().await.unwrap().unwrap();
    assert_eq!(session.view().page(), 2);
    assert_eq!(page.view.page(), 2);
    assert_eq!(page.tasks.data.len(), 1);
    assert_eq!(page.range.unwrap().describe(), "Showing 7 to 7 of 7 results");
    assert!(page.window.is_some());
}

#[tokio::test(start_paused = true)]
async fn filter_change_reads_first_page_of_new_filter() {
    let fake = Fake::seeded(3);
    fake.0.tasks.lock()[0].status = TaskStatus::Done;
    let store = store(&fake);
    let session = ListSession::new(store, ListView::new(StatusFilter::All, PageSize::Twelve));
    session.set_page(1).unwrap();

    let key = session.set_status_filter(StatusFilter::Done);
    assert_eq!(key.status(), Some(TaskStatus::Done));
    let page = session.load().await.unwrap().unwrap();
    assert_eq!(page.tasks.total, 1);
    assert_eq!(page.tasks.data[0].id, TaskId::new("t1"));
    assert!(page.window.is_none());
}

#[tokio::test(start_paused = true)]
async fn previous_page_stays_on_screen_while_next_loads() {
    let fake = Fake::seeded(8);
    let store = store(&fake);
    let session = Arc::new(ListSession::new(store, ListView::default()));
    assert!(session.snapshot().is_none());
    session.load().await.unwrap().unwrap();

    session.set_page(2).unwrap();
    let loader = Arc::clone(&session);
    let next = tokio::spawn(async move { loader.load().await });
    start().await;

    let shown = session.snapshot().unwrap();
    assert!(shown.previous);
    assert!(shown.refreshing);
    assert_eq!(shown.view.page(), 1);
    assert_eq!(shown.tasks.data.len(), 6);
    assert_eq!(session.view().page(), 2);

    let loaded = next.await.unwrap().unwrap().unwrap();
    assert!(!loaded.previous);
    let shown = session.snapshot().unwrap();
    assert!(!shown.previous && !shown.refreshing);
    assert_eq!(shown, loaded);
    assert_eq!(shown.tasks.data.len(), 2);
}
