//! End-to-end tests for repo-memory.
//!
//! Drives the tool handlers over a fully initialized `SharedState` backed by
//! an in-memory remote store, including remote outages and restarts.

use std::sync::Arc;

use repo_memory::queue::Operation;
use repo_memory::{tools, DurableQueue, InMemoryStore, SharedState, INDEX_PATH};
use rmcp::model::CallToolResult;
use serde_json::Value;
use tempfile::TempDir;

/// A running store plus the state built on top of it.
struct TestEnv {
    _temp: TempDir,
    queue_path: std::path::PathBuf,
    store: Arc<InMemoryStore>,
    state: SharedState,
}

impl TestEnv {
    async fn start() -> Self {
        Self::start_with(Arc::new(InMemoryStore::new())).await
    }

    async fn start_with(store: Arc<InMemoryStore>) -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let queue_path = temp.path().join("queue.json");
        let state = SharedState::initialize(store.clone(), &queue_path, None)
            .await
            .expect("Failed to initialize");
        Self {
            _temp: temp,
            queue_path,
            store,
            state,
        }
    }

    async fn save(&self, category: &str, name: &str, content: &str) -> Value {
        let result = tools::save::execute(&self.state.writer, category, name, content)
            .expect("save failed");
        parse(&result)
    }

    async fn read(&self, path: &str) -> Value {
        let result = tools::read::execute(&self.state.writer, path)
            .await
            .expect("read failed");
        parse(&result)
    }

    fn list(&self) -> Value {
        let result =
            tools::list::execute(&self.state.cache, &self.state.queue).expect("list failed");
        parse(&result)
    }
}

fn parse(result: &CallToolResult) -> Value {
    let text = &result.content[0].raw.as_text().expect("Expected text").text;
    serde_json::from_str(text).expect("Expected valid JSON")
}

#[tokio::test]
async fn test_save_is_readable_before_remote_confirms() {
    let env = TestEnv::start().await;
    let gate = env.store.hold_writes().await;

    let saved = env.save("test", "sample.md", "# Test").await;
    assert_eq!(saved["success"], true);
    assert_eq!(saved["path"], "test/sample.md");

    let read = env.read("test/sample.md").await;
    assert_eq!(read["content"], "# Test");
    assert!(env.state.cache.get("test/sample.md").unwrap().is_pending());
    assert_eq!(env.store.content("test/sample.md"), None);

    drop(gate);
    env.state.writer.flush().await;

    assert_eq!(env.store.content("test/sample.md").as_deref(), Some("# Test"));
    assert!(!env.state.cache.get("test/sample.md").unwrap().is_pending());
}

#[tokio::test]
async fn test_list_includes_unconfirmed_save() {
    let env = TestEnv::start().await;
    let _gate = env.store.hold_writes().await;

    env.save("test", "sample.md", "# Test").await;
    let listed = env.list();

    let categories: Vec<&str> = listed["categories"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(categories.contains(&"test"));

    let files: Vec<&str> = listed["files"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|f| f["path"].as_str())
        .collect();
    assert!(files.contains(&"test/sample.md"));
}

#[tokio::test]
async fn test_failed_sync_is_queued_then_drained() {
    let env = TestEnv::start().await;
    env.store.set_failing(true);

    env.save("test", "sample.md", "# Test").await;
    env.state.writer.flush().await;

    let item = env.state.queue.get("test/sample.md").expect("Expected queued save");
    assert_eq!(item.operation, Operation::Save);
    assert_eq!(item.retry_count, 0);
    assert_eq!(item.content, "# Test");

    // Survives on disk in the wire format
    let raw: Value =
        serde_json::from_str(&std::fs::read_to_string(&env.queue_path).unwrap()).unwrap();
    assert_eq!(raw[0]["operation"], "save");
    assert_eq!(raw[0]["retryCount"], 0);

    let listed = env.list();
    assert_eq!(listed["pending"][0], "test/sample.md");

    env.store.set_failing(false);
    let report = env.state.writer.drain_queue().await;

    assert_eq!(report.synced, 1);
    assert!(env.state.queue.is_empty());
    assert_eq!(env.store.content("test/sample.md").as_deref(), Some("# Test"));
    assert!(env.store.content(INDEX_PATH).unwrap().contains("test/sample.md"));
}

#[tokio::test]
async fn test_delete_of_unknown_path_fails_without_queueing() {
    let env = TestEnv::start().await;

    let err = tools::delete::execute(&env.state.writer, "nope/missing.md").unwrap_err();
    assert!(err.message.contains("not found"));

    env.state.writer.flush().await;
    assert!(env.state.queue.is_empty());
    assert_eq!(env.store.delete_calls(), 0);
}

#[tokio::test]
async fn test_delete_removes_file_everywhere() {
    let store = Arc::new(InMemoryStore::new());
    store.insert("work/old.md", "stale");
    let env = TestEnv::start_with(store).await;

    tools::delete::execute(&env.state.writer, "work/old.md").unwrap();
    assert!(env.state.cache.get("work/old.md").is_none());

    env.state.writer.flush().await;
    assert_eq!(env.store.content("work/old.md"), None);
    assert!(!env.store.content(INDEX_PATH).unwrap().contains("work/old.md"));
}

#[tokio::test]
async fn test_read_your_writes_while_remote_is_down() {
    let env = TestEnv::start().await;
    env.store.set_failing(true);

    env.save("notes", "draft", "first").await;
    env.save("notes", "draft", "second").await;
    env.state.writer.flush().await;

    let read = env.read("notes/draft.md").await;
    assert_eq!(read["content"], "second");

    // The second save found the first still syncing and started nothing
    let queued = env.state.queue.get_all();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].content, "first");
}

#[tokio::test]
async fn test_save_during_sync_reaches_remote_with_next_save() {
    let env = TestEnv::start().await;
    let gate = env.store.hold_writes().await;

    env.save("notes", "draft", "first").await;
    env.save("notes", "draft", "second").await;
    drop(gate);
    env.state.writer.flush().await;

    // Remote lags behind the cache; the newer content stays pending
    assert_eq!(env.store.content("notes/draft.md").as_deref(), Some("first"));
    let cached = env.state.cache.get("notes/draft.md").unwrap();
    assert_eq!(cached.content, "second");
    assert!(cached.is_pending());
    assert!(env.state.queue.is_empty());

    env.save("notes", "draft", "third").await;
    env.state.writer.flush().await;

    assert_eq!(env.store.content("notes/draft.md").as_deref(), Some("third"));
    let cached = env.state.cache.get("notes/draft.md").unwrap();
    assert_eq!(Some(cached.revision), env.store.revision("notes/draft.md"));
}

#[tokio::test]
async fn test_read_after_failed_delete_stays_not_found() {
    let store = Arc::new(InMemoryStore::new());
    store.insert("w/old.md", "old");
    let env = TestEnv::start_with(store).await;

    env.store.set_failing(true);
    tools::delete::execute(&env.state.writer, "w/old.md").unwrap();
    env.state.writer.flush().await;
    env.store.set_failing(false);

    let err = tools::read::execute(&env.state.writer, "w/old.md").await.unwrap_err();
    assert!(err.message.contains("not found"));
    assert!(env.state.cache.get("w/old.md").is_none());
}

#[tokio::test]
async fn test_read_falls_back_to_remote() {
    let env = TestEnv::start().await;
    env.store.insert("late/arrival.md", "added after startup");

    let read = env.read("late/arrival.md").await;
    assert_eq!(read["content"], "added after startup");
    assert!(env.state.cache.get("late/arrival.md").is_some());
}

#[tokio::test]
async fn test_search_finds_saved_content() {
    let env = TestEnv::start().await;
    env.save("work", "plan", "Ship the Widget on Friday").await;
    env.state.writer.flush().await;

    let result = tools::search::execute(&env.state.cache, "widget").unwrap();
    let found = parse(&result);

    let results = found["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["path"], "work/plan.md");
}

#[tokio::test]
async fn test_draining_empty_queue_makes_no_remote_calls() {
    let env = TestEnv::start().await;
    let before = env.store.calls();

    let report = env.state.writer.drain_queue().await;

    assert_eq!(report.total(), 0);
    assert_eq!(env.store.calls(), before);
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let temp = TempDir::new().unwrap();
    let queue_path = temp.path().join("queue.json");

    // First session: remote is down for the whole run
    {
        let store = Arc::new(InMemoryStore::new());
        let state = SharedState::initialize(store.clone(), &queue_path, None)
            .await
            .unwrap();
        store.set_failing(true);
        tools::save::execute(&state.writer, "journal", "today", "offline entry").unwrap();
        state.shutdown().await;
        assert_eq!(DurableQueue::load(&queue_path).unwrap().len(), 1);
    }

    // Second session against a healthy remote replays it at startup
    let store = Arc::new(InMemoryStore::new());
    let state = SharedState::initialize(store.clone(), &queue_path, None)
        .await
        .unwrap();

    assert_eq!(
        store.content("journal/today.md").as_deref(),
        Some("offline entry")
    );
    assert!(state.queue.is_empty());
    assert!(DurableQueue::load(&queue_path).unwrap().is_empty());
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let env = TestEnv::start().await;
    env.store.set_failing(true);

    env.save("test", "doomed", "never lands").await;
    env.state.writer.flush().await;

    for _ in 0..repo_memory::queue::MAX_RETRIES {
        env.state.writer.drain_queue().await;
    }

    assert!(env.state.queue.is_empty());
    assert_eq!(env.read("test/doomed.md").await["content"], "never lands");
}

#[tokio::test]
async fn test_queued_save_replaces_existing_file_after_restart() {
    let temp = TempDir::new().unwrap();
    let queue_path = temp.path().join("queue.json");
    DurableQueue::open(&queue_path).enqueue("a/x.md", "v1", Operation::Save);
    let store = Arc::new(InMemoryStore::new());
    store.insert("a/x.md", "v0");

    let state = SharedState::initialize(store.clone(), &queue_path, None)
        .await
        .unwrap();

    assert_eq!(store.content("a/x.md").as_deref(), Some("v1"));
    let cached = state.cache.get("a/x.md").unwrap();
    assert_eq!(cached.content, "v1");
    assert_eq!(Some(cached.revision), store.revision("a/x.md"));

    let read = tools::read::execute(&state.writer, "a/x.md").await.unwrap();
    assert_eq!(parse(&read)["content"], "v1");
}

#[tokio::test]
async fn test_queued_delete_after_restart_removes_file_everywhere() {
    let temp = TempDir::new().unwrap();
    let queue_path = temp.path().join("queue.json");
    DurableQueue::open(&queue_path).enqueue("w/old.md", "", Operation::Delete);
    let store = Arc::new(InMemoryStore::new());
    store.insert("w/old.md", "old");

    let state = SharedState::initialize(store.clone(), &queue_path, None)
        .await
        .unwrap();

    assert_eq!(store.content("w/old.md"), None);
    assert!(state.cache.get("w/old.md").is_none());
    assert!(state.queue.is_empty());

    let listed = tools::list::execute(&state.cache, &state.queue).unwrap();
    assert!(!parse(&listed)["files"].to_string().contains("w/old.md"));
}
