//! Full round trip: a real server on an ephemeral port, driven through the
//! HTTP client and the reconciler.

use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::TcpListener;
use tree_core::persistence::FileBackend;
use tree_core::reconciler::SyncTransport;
use tree_core::{
    ManualClock, NodeKind, Reconciler, ReconcilerConfig, SyncService, TreeBuilder, TreeSource,
};
use tree_server::{router, AppState, HttpSyncClient};

struct Server {
    _temp: TempDir,
    root: PathBuf,
    client: HttpSyncClient,
    service: Arc<SyncService>,
}

async fn start_server() -> Server {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("proj");
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::create_dir_all(root.join(".git")).unwrap();
    std::fs::write(root.join(".git/HEAD"), "ref: refs/heads/main").unwrap();
    std::fs::write(root.join("src/index.ts"), "export {}").unwrap();
    std::fs::write(root.join("README.md"), "# proj").unwrap();

    let source = TreeSource::new(root.clone(), TreeBuilder::new([".git"]));
    let backend = Arc::new(FileBackend::new(&temp.path().join("state"), "proj"));
    let service = Arc::new(SyncService::new(source, backend).await);

    let app = router(Arc::new(AppState {
        service: service.clone(),
        page: tree_server::page::render_page(service.page_snapshot(), None),
        stylesheet: None,
    }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, app).into_future());

    Server {
        _temp: temp,
        root,
        client: HttpSyncClient::new(format!("http://{}", addr)),
        service,
    }
}

#[tokio::test]
async fn test_hide_save_and_rescan() {
    let server = start_server().await;
    let client = server.client.clone();

    // The scan skips .git and lists directories first.
    let tree = client.get_tree().await.unwrap();
    let children: Vec<_> = tree
        .children()
        .iter()
        .map(|c| (c.name.as_str(), c.is_dir()))
        .collect();
    assert_eq!(children, vec![("src", true), ("README.md", false)]);

    let clock = Arc::new(ManualClock::new(0));
    let embedded = server.service.page_snapshot().state.clone();
    let mut reconciler = Reconciler::new(
        tree,
        embedded,
        client.clone(),
        clock.clone(),
        ReconcilerConfig::default(),
    );
    reconciler.cold_start().await.unwrap();

    // Hide src; nothing is written until the debounce window has passed.
    assert!(reconciler.try_mutate(|s| s.set_hidden("src", true)).unwrap());
    clock.advance(Duration::from_millis(299));
    assert!(!reconciler.tick().await.saved);
    assert!(client.get_state().await.unwrap().hidden_paths.is_empty());

    clock.advance(Duration::from_millis(1));
    assert!(reconciler.tick().await.saved);
    assert!(reconciler.last_save_error().is_none());
    assert_eq!(client.get_state().await.unwrap().hidden_paths, vec!["src"]);

    // A new file shows up in the next scan; the saved state is untouched.
    std::fs::write(server.root.join("src/new.ts"), "").unwrap();
    let fresh = client.get_tree().await.unwrap();
    let added = fresh.find("src/new.ts").unwrap();
    assert_eq!(added.kind, NodeKind::File);
    assert_eq!(client.get_state().await.unwrap().hidden_paths, vec!["src"]);

    // The drift poll notices the change and waits for a manual refresh.
    clock.advance(Duration::from_secs(30));
    let report = reconciler.tick().await;
    assert!(report.polled);
    assert!(reconciler.is_stale());
    assert!(reconciler.tree().find("src/new.ts").is_none());

    reconciler.refresh().await.unwrap();
    assert!(!reconciler.is_stale());
    assert!(reconciler.tree().find("src/new.ts").is_some());
    assert!(reconciler.session().is_hidden("src"));
}

#[tokio::test]
async fn test_burst_of_edits_is_one_save_with_the_last_state() {
    let server = start_server().await;
    let client = server.client.clone();
    let tree = client.get_tree().await.unwrap();

    let clock = Arc::new(ManualClock::new(1_000));
    let mut reconciler = Reconciler::new(
        tree,
        Default::default(),
        client.clone(),
        clock.clone(),
        ReconcilerConfig::default(),
    );

    reconciler
        .try_mutate(|s| s.create_label("todo", Some("#FB6265")))
        .unwrap();
    clock.advance(Duration::from_millis(200));
    reconciler
        .try_mutate(|s| s.assign_label("README.md", "todo"))
        .unwrap();
    clock.advance(Duration::from_millis(200));

    // 400ms after the first edit, but only 200ms after the last one.
    assert!(!reconciler.tick().await.saved);
    assert!(client.get_state().await.unwrap().labels.is_empty());

    clock.advance(Duration::from_millis(100));
    assert!(reconciler.tick().await.saved);
    assert!(!reconciler.has_pending_save());

    let stored = client.get_state().await.unwrap();
    assert_eq!(stored.labels.len(), 1);
    assert_eq!(stored.labels[0].color, "#FB6265");
    assert_eq!(stored.label_map["README.md"], vec!["todo"]);
}

#[tokio::test]
async fn test_second_viewer_cold_start_sees_saved_state() {
    let server = start_server().await;
    let client = server.client.clone();
    let tree = client.get_tree().await.unwrap();
    let clock = Arc::new(ManualClock::new(0));

    let mut first = Reconciler::new(
        tree.clone(),
        Default::default(),
        client.clone(),
        clock.clone(),
        ReconcilerConfig::default(),
    );
    first.mutate(|s| s.set_note("shared note"));
    assert!(first.flush_now().await);

    // The second viewer was rendered with an older snapshot.
    let mut second = Reconciler::new(
        tree,
        server.service.page_snapshot().state.clone(),
        client.clone(),
        clock.clone(),
        ReconcilerConfig::default(),
    );
    assert_eq!(second.session().state().note_content, "");
    second.cold_start().await.unwrap();
    assert_eq!(second.session().state().note_content, "shared note");
}

#[tokio::test]
async fn test_invalid_body_is_reported_to_the_client() {
    let server = start_server().await;
    let url = format!("{}/state", server.client.base_url());

    let response = reqwest::Client::new()
        .post(&url)
        .header("Content-Type", "application/json")
        .body("{ broken")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "invalid JSON");

    let page = reqwest::get(server.client.base_url()).await.unwrap();
    assert_eq!(page.status(), reqwest::StatusCode::OK);
    assert!(page.text().await.unwrap().contains("Directory Tree - proj"));
}
