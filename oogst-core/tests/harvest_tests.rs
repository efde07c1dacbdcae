// Tests for the discover and process loops

use async_trait::async_trait;
use oogst_core::frontier::{EntryState, Frontier};
use oogst_core::harvest::{BatchMode, HarvestError, HarvestOptions, Harvester, ShutdownSignal};
use oogst_scanner::browser::{BrowserPage, ResponseSubscription};
use oogst_scanner::error::Result as ScanResult;
use oogst_scanner::paginator::{SearchOptions, SearchPaginator};
use oogst_scanner::scripted::{PageScript, ScriptedPage};
use oogst_scanner::visitor::{DetailVisitor, VisitOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn create_test_frontier() -> (TempDir, PathBuf, Arc<Frontier>) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("harvest.db");
    let frontier = Arc::new(Frontier::open(&db_path).unwrap());
    (temp_dir, db_path, frontier)
}

fn harvester(frontier: &Arc<Frontier>) -> Harvester {
    Harvester::new(
        Arc::clone(frontier),
        HarvestOptions {
            pace: Duration::ZERO,
            max_retries: 2,
        },
    )
}

fn paginator() -> SearchPaginator {
    SearchPaginator::new(SearchOptions {
        base_url: "https://x".to_string(),
        ..SearchOptions::default()
    })
    .unwrap()
}

fn visitor() -> DetailVisitor {
    DetailVisitor::new(VisitOptions {
        settle_delay: Duration::ZERO,
        ..VisitOptions::default()
    })
}

fn search_url(page: u32) -> String {
    format!("https://x/zoeken?zoeken=&pagina={}", page)
}

fn detail_page(pid: &str) -> PageScript {
    PageScript::new().json(
        &format!("https://x/api/documenten/{}", pid),
        &format!(r#"{{"document": {{"pid": "{}"}}, "plooiIntern": {{"aanbieder": "test"}}}}"#, pid),
    )
}

// ============================================================================
// Discover
// ============================================================================

#[tokio::test]
async fn test_discover_stops_at_first_empty_page() {
    let (_dir, _path, frontier) = create_test_frontier();
    let page = ScriptedPage::new()
        .with_page(&search_url(1), PageScript::new().link("/details/a").link("/details/b"))
        .with_page(&search_url(2), PageScript::new().link("/details/b").link("/details/c"))
        .with_page(&search_url(4), PageScript::new().link("/details/never"));

    let report = harvester(&frontier)
        .discover(&page, &paginator(), None)
        .await
        .unwrap();

    assert_eq!(report.pages_visited, 3);
    assert_eq!(report.links_found, 4);
    assert_eq!(report.new_urls, 3);
    assert_eq!(page.navigations(), vec![search_url(1), search_url(2), search_url(3)]);
    assert_eq!(frontier.stats(Duration::from_secs(600)).unwrap().total, 3);
}

#[tokio::test]
async fn test_discover_respects_page_limit() {
    let (_dir, _path, frontier) = create_test_frontier();
    let page = ScriptedPage::new()
        .with_page(&search_url(1), PageScript::new().link("/details/a"))
        .with_page(&search_url(2), PageScript::new().link("/details/b"));

    let report = harvester(&frontier)
        .discover(&page, &paginator(), Some(1))
        .await
        .unwrap();

    assert_eq!(report.pages_visited, 1);
    assert_eq!(page.navigations(), vec![search_url(1)]);
}

#[tokio::test]
async fn test_rediscovery_adds_nothing() {
    let (_dir, _path, frontier) = create_test_frontier();
    let page = ScriptedPage::new()
        .with_page(&search_url(1), PageScript::new().link("/details/a").link("/details/b"));

    let harvester = harvester(&frontier);
    let first = harvester.discover(&page, &paginator(), None).await.unwrap();
    let second = harvester.discover(&page, &paginator(), None).await.unwrap();

    assert_eq!(first.new_urls, 2);
    assert_eq!(second.new_urls, 0);
    assert_eq!(second.links_found, 2);
}

#[tokio::test]
async fn test_discover_gives_up_after_retries() {
    let (_dir, _path, frontier) = create_test_frontier();
    let page = ScriptedPage::new()
        .with_page(&search_url(1), PageScript::new().link("/details/a"))
        .with_page(&search_url(2), PageScript::new().link("/details/b").timeout());

    let result = harvester(&frontier).discover(&page, &paginator(), None).await;

    match result {
        Err(HarvestError::SearchPage { page, attempts, .. }) => {
            assert_eq!(page, 2);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected SearchPage error, got {:?}", other),
    }
    // page 1 was stored before the failure
    assert_eq!(frontier.stats(Duration::from_secs(600)).unwrap().total, 1);
    assert_eq!(
        page.navigations(),
        vec![search_url(1), search_url(2), search_url(2), search_url(2)]
    );
}

#[tokio::test]
async fn test_discover_honours_shutdown() {
    let (_dir, _path, frontier) = create_test_frontier();
    let page = ScriptedPage::new().with_page(&search_url(1), PageScript::new().link("/details/a"));

    let shutdown = ShutdownSignal::new();
    shutdown.request();
    let report = harvester(&frontier)
        .with_shutdown(shutdown)
        .discover(&page, &paginator(), None)
        .await
        .unwrap();

    assert_eq!(report.pages_visited, 0);
    assert!(page.navigations().is_empty());
}

#[tokio::test]
async fn test_discover_does_not_retry_after_shutdown() {
    let (_dir, _path, frontier) = create_test_frontier();
    let shutdown = ShutdownSignal::new();
    let page = StoppingPage {
        inner: ScriptedPage::new().with_page(&search_url(1), PageScript::new().timeout()),
        on_goto: Box::new({
            let shutdown = shutdown.clone();
            move |_: &str| shutdown.request()
        }),
    };

    let report = harvester(&frontier)
        .with_shutdown(shutdown)
        .discover(&page, &paginator(), None)
        .await
        .unwrap();

    assert_eq!(report.pages_visited, 0);
    assert_eq!(page.inner.navigations(), vec![search_url(1)]);
}

// ============================================================================
// Process
// ============================================================================

#[tokio::test]
async fn test_process_marks_every_entry() {
    let (_dir, _path, frontier) = create_test_frontier();
    frontier
        .insert(["https://x/details/a", "https://x/details/b"])
        .unwrap();
    let page = ScriptedPage::new()
        .with_page("https://x/details/a", detail_page("a"))
        .with_page("https://x/details/b", detail_page("b"));

    let mut visitor = visitor();
    let report = harvester(&frontier)
        .process(&page, &mut visitor, BatchMode::Next { limit: None })
        .await
        .unwrap();

    assert_eq!(report.attempted, 2);
    assert_eq!(report.processed, 2);
    assert_eq!(report.visit_errors, 0);

    let entry = frontier.get("https://x/details/b").unwrap().unwrap();
    assert_eq!(entry.state, EntryState::Processed);
    let metadata = entry.metadata.unwrap();
    assert_eq!(metadata.get_str("pid"), Some("b"));
    assert_eq!(metadata.get_str("aanbieder"), Some("test"));
    assert_eq!(entry.raw_capture.unwrap().captured.len(), 1);

    let stats = frontier.stats(Duration::from_secs(600)).unwrap();
    assert_eq!(stats.unprocessed, 0);
}

#[tokio::test]
async fn test_visit_failure_still_marks_processed() {
    let (_dir, _path, frontier) = create_test_frontier();
    frontier.insert(["https://x/details/slow"]).unwrap();
    let page = ScriptedPage::new().with_page("https://x/details/slow", detail_page("slow").timeout());

    let mut visitor = visitor();
    let report = harvester(&frontier)
        .process(&page, &mut visitor, BatchMode::Next { limit: None })
        .await
        .unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.visit_errors, 1);

    let entry = frontier.get("https://x/details/slow").unwrap().unwrap();
    assert!(entry.is_processed());
    assert!(entry.metadata.unwrap().is_empty());
    assert!(entry.raw_capture.unwrap().error.is_some());
}

#[tokio::test]
async fn test_process_empty_frontier_does_nothing() {
    let (_dir, _path, frontier) = create_test_frontier();
    let page = ScriptedPage::new();

    let mut visitor = visitor();
    let report = harvester(&frontier)
        .process(&page, &mut visitor, BatchMode::Next { limit: Some(10) })
        .await
        .unwrap();

    assert_eq!(report.attempted, 0);
    assert!(page.navigations().is_empty());
}

#[tokio::test]
async fn test_process_respects_limit() {
    let (_dir, _path, frontier) = create_test_frontier();
    frontier
        .insert(["https://x/details/a", "https://x/details/b", "https://x/details/c"])
        .unwrap();
    let page = ScriptedPage::new();

    let mut visitor = visitor();
    let report = harvester(&frontier)
        .process(&page, &mut visitor, BatchMode::Next { limit: Some(2) })
        .await
        .unwrap();

    assert_eq!(report.attempted, 2);
    assert_eq!(
        page.navigations(),
        vec!["https://x/details/a".to_string(), "https://x/details/b".to_string()]
    );
    assert_eq!(frontier.stats(Duration::from_secs(600)).unwrap().unprocessed, 1);
}

#[tokio::test]
async fn test_claim_mode_leases_batch() {
    let (_dir, path, frontier) = create_test_frontier();
    frontier
        .insert(["https://x/details/a", "https://x/details/b", "https://x/details/c"])
        .unwrap();

    // another worker holds the first entry
    let other = Frontier::open(&path).unwrap();
    let held = other.claim_batch(1, Duration::from_secs(300)).unwrap();
    assert_eq!(held[0].url, "https://x/details/a");

    let page = ScriptedPage::new();
    let mut visitor = visitor();
    let report = harvester(&frontier)
        .process(
            &page,
            &mut visitor,
            BatchMode::Claim {
                limit: 10,
                lease: Duration::from_secs(300),
            },
        )
        .await
        .unwrap();

    assert_eq!(report.processed, 2);
    assert_eq!(
        page.navigations(),
        vec!["https://x/details/b".to_string(), "https://x/details/c".to_string()]
    );
}

#[tokio::test]
async fn test_shutdown_stops_after_current_entry() {
    let (_dir, _path, frontier) = create_test_frontier();
    frontier
        .insert(["https://x/details/a", "https://x/details/b"])
        .unwrap();

    let shutdown = ShutdownSignal::new();
    let page = StoppingPage {
        inner: ScriptedPage::new(),
        on_goto: Box::new({
            let shutdown = shutdown.clone();
            move |_: &str| shutdown.request()
        }),
    };

    let mut visitor = visitor();
    let report = harvester(&frontier)
        .with_shutdown(shutdown)
        .process(&page, &mut visitor, BatchMode::Next { limit: None })
        .await
        .unwrap();

    // the in-flight entry is finished and stored
    assert_eq!(report.attempted, 1);
    assert_eq!(report.processed, 1);
    assert!(frontier.get("https://x/details/a").unwrap().unwrap().is_processed());
    assert!(!frontier.get("https://x/details/b").unwrap().unwrap().is_processed());
}

#[tokio::test]
async fn test_storage_failure_leaves_entry_discovered() {
    let (_dir, path, frontier) = create_test_frontier();
    frontier
        .insert(["https://x/details/a", "https://x/details/b"])
        .unwrap();

    // drop the row behind the frontier's back while the page is being visited
    let side_channel = Mutex::new(rusqlite::Connection::open(&path).unwrap());
    let page = StoppingPage {
        inner: ScriptedPage::new(),
        on_goto: Box::new(move |url: &str| {
            if url == "https://x/details/a" {
                side_channel
                    .lock()
                    .unwrap()
                    .execute("DELETE FROM frontier WHERE url = ?1", [url])
                    .unwrap();
            }
        }),
    };

    let mut visitor = visitor();
    let report = harvester(&frontier)
        .process(&page, &mut visitor, BatchMode::Next { limit: None })
        .await
        .unwrap();

    assert_eq!(report.attempted, 2);
    assert_eq!(report.processed, 1);
    assert_eq!(report.storage_errors, 1);
    assert!(frontier.get("https://x/details/b").unwrap().unwrap().is_processed());
}

#[tokio::test]
async fn test_shutdown_releases_unvisited_claims() {
    let (_dir, path, frontier) = create_test_frontier();
    frontier
        .insert(["https://x/details/a", "https://x/details/b", "https://x/details/c"])
        .unwrap();

    let shutdown = ShutdownSignal::new();
    shutdown.request();
    let page = ScriptedPage::new();
    let mut visitor = visitor();
    let lease = Duration::from_secs(600);
    let report = harvester(&frontier)
        .with_shutdown(shutdown)
        .process(&page, &mut visitor, BatchMode::Claim { limit: 10, lease })
        .await
        .unwrap();
    assert_eq!(report.attempted, 0);

    // a second worker can pick the batch up straight away
    let other = Frontier::open(&path).unwrap();
    assert_eq!(other.claim_batch(10, lease).unwrap().len(), 3);
}

#[tokio::test]
async fn test_shutdown_mid_batch_releases_the_rest() {
    let (_dir, path, frontier) = create_test_frontier();
    frontier
        .insert(["https://x/details/a", "https://x/details/b", "https://x/details/c"])
        .unwrap();

    let shutdown = ShutdownSignal::new();
    let page = StoppingPage {
        inner: ScriptedPage::new(),
        on_goto: Box::new({
            let shutdown = shutdown.clone();
            move |_: &str| shutdown.request()
        }),
    };
    let mut visitor = visitor();
    let lease = Duration::from_secs(600);
    let report = harvester(&frontier)
        .with_shutdown(shutdown)
        .process(&page, &mut visitor, BatchMode::Claim { limit: 10, lease })
        .await
        .unwrap();
    assert_eq!(report.processed, 1);

    let other = Frontier::open(&path).unwrap();
    let urls: Vec<String> = other
        .claim_batch(10, lease)
        .unwrap()
        .into_iter()
        .map(|e| e.url)
        .collect();
    assert_eq!(
        urls,
        vec!["https://x/details/b".to_string(), "https://x/details/c".to_string()]
    );
}

#[tokio::test]
async fn test_storage_failure_releases_claim() {
    let (_dir, path, frontier) = create_test_frontier();
    frontier
        .insert(["https://x/details/a", "https://x/details/b"])
        .unwrap();

    // refuse to mark one entry processed; the row itself stays in place
    let side_channel = rusqlite::Connection::open(&path).unwrap();
    side_channel
        .execute_batch(
            "CREATE TRIGGER refuse_a BEFORE UPDATE OF state ON frontier
             WHEN NEW.state = 'processed' AND OLD.url = 'https://x/details/a'
             BEGIN SELECT RAISE(ABORT, 'refused'); END;",
        )
        .unwrap();

    let page = ScriptedPage::new();
    let mut visitor = visitor();
    let lease = Duration::from_secs(600);
    let report = harvester(&frontier)
        .process(&page, &mut visitor, BatchMode::Claim { limit: 10, lease })
        .await
        .unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.storage_errors, 1);

    let entry = frontier.get("https://x/details/a").unwrap().unwrap();
    assert_eq!(entry.state, EntryState::Discovered);
    assert!(entry.lease_expires_at.is_none());

    let other = Frontier::open(&path).unwrap();
    let reclaimed = other.claim_batch(10, lease).unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].url, "https://x/details/a");
}

#[tokio::test]
async fn test_progress_callback_reports_each_entry() {
    let (_dir, _path, frontier) = create_test_frontier();
    frontier.insert(["https://x/details/a"]).unwrap();
    let page = ScriptedPage::new().with_page("https://x/details/a", detail_page("a"));

    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&messages);
    let mut visitor = visitor();
    harvester(&frontier)
        .with_progress_callback(Arc::new(move |msg: String| sink.lock().unwrap().push(msg)))
        .process(&page, &mut visitor, BatchMode::Next { limit: None })
        .await
        .unwrap();

    let messages = messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("[1/1] https://x/details/a"));
}

/// Runs a hook on every navigation, then behaves like the wrapped page.
struct StoppingPage {
    inner: ScriptedPage,
    on_goto: Box<dyn Fn(&str) + Send + Sync>,
}

#[async_trait]
impl BrowserPage for StoppingPage {
    async fn goto(&self, url: &str, timeout: Duration) -> ScanResult<()> {
        (self.on_goto)(url);
        self.inner.goto(url, timeout).await
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> ScanResult<bool> {
        self.inner.wait_for_selector(selector, timeout).await
    }

    async fn attribute_values(&self, selector: &str, attribute: &str) -> ScanResult<Vec<String>> {
        self.inner.attribute_values(selector, attribute).await
    }

    async fn subscribe_responses(&self) -> ScanResult<ResponseSubscription> {
        self.inner.subscribe_responses().await
    }
}
