use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use bcdl_core::browser::{
    BrowserError, BrowserResult, Locator, PageSession, PageSessionFactory, PendingDownload,
};
use bcdl_core::catalog::{AlbumStatus, CatalogScanner, ScanError, ScanOutcome};
use bcdl_core::config::{ScanSection, SelectorSection};

struct ScanFixture {
    catalog_url: String,
    grid_found: bool,
    grid_payload: Value,
    signals: HashMap<String, Value>,
    failing_urls: HashSet<String>,
}

impl ScanFixture {
    fn new(catalog_url: &str) -> Self {
        Self {
            catalog_url: catalog_url.to_string(),
            grid_found: true,
            grid_payload: json!([]),
            signals: HashMap::new(),
            failing_urls: HashSet::new(),
        }
    }
}

struct MockScanSession {
    fixture: Arc<ScanFixture>,
    current: String,
    visits: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<usize>>,
}

#[async_trait(?Send)]
impl PageSession for MockScanSession {
    async fn goto(&mut self, url: &str) -> BrowserResult<()> {
        if self.fixture.failing_urls.contains(url) {
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: "connection reset".into(),
            });
        }
        self.visits.lock().unwrap().push(url.to_string());
        self.current = url.to_string();
        Ok(())
    }

    async fn settle(&mut self, _bound: Duration) -> BrowserResult<()> {
        Ok(())
    }

    async fn wait_for(&mut self, locator: &Locator, _timeout: Duration) -> BrowserResult<bool> {
        match locator {
            Locator::Css(selector) if selector == "ol#music-grid" => Ok(self.fixture.grid_found),
            _ => Ok(false),
        }
    }

    async fn exists(&mut self, _locator: &Locator) -> BrowserResult<bool> {
        Ok(false)
    }

    async fn click(&mut self, _locator: &Locator) -> BrowserResult<()> {
        Ok(())
    }

    async fn force_click(&mut self, _locator: &Locator) -> BrowserResult<()> {
        Ok(())
    }

    async fn fill(&mut self, _locator: &Locator, _value: &str) -> BrowserResult<()> {
        Ok(())
    }

    async fn eval(&mut self, _script: &str) -> BrowserResult<Value> {
        if self.current == self.fixture.catalog_url {
            return Ok(self.fixture.grid_payload.clone());
        }
        Ok(self
            .fixture
            .signals
            .get(&self.current)
            .cloned()
            .unwrap_or_else(|| json!({ "header_text": null, "buy_button_text": null })))
    }

    async fn current_url(&mut self) -> BrowserResult<String> {
        Ok(self.current.clone())
    }

    async fn tag_name(&mut self, _locator: &Locator) -> BrowserResult<Option<String>> {
        Ok(None)
    }

    async fn select_option(&mut self, _locator: &Locator, _value: &str) -> BrowserResult<bool> {
        Ok(false)
    }

    async fn begin_download(
        &mut self,
        _trigger: &Locator,
        _dir: &Path,
        _timeout: Duration,
    ) -> BrowserResult<PendingDownload> {
        unreachable!("scans never download")
    }

    async fn finish_download(
        &mut self,
        _pending: PendingDownload,
        _timeout: Duration,
    ) -> BrowserResult<PathBuf> {
        unreachable!("scans never download")
    }

    async fn close(&mut self) -> BrowserResult<()> {
        *self.closed.lock().unwrap() += 1;
        Ok(())
    }
}

struct MockScanFactory {
    fixture: Arc<ScanFixture>,
    visits: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<usize>>,
}

impl MockScanFactory {
    fn new(fixture: ScanFixture) -> Self {
        Self {
            fixture: Arc::new(fixture),
            visits: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(Mutex::new(0)),
        }
    }
}

#[async_trait(?Send)]
impl PageSessionFactory for MockScanFactory {
    async fn create(&self) -> BrowserResult<Box<dyn PageSession>> {
        Ok(Box::new(MockScanSession {
            fixture: Arc::clone(&self.fixture),
            current: String::new(),
            visits: Arc::clone(&self.visits),
            closed: Arc::clone(&self.closed),
        }))
    }
}

const CATALOG: &str = "https://artist.bandcamp.com/music";

fn grid_entry(title: &str, href: &str) -> Value {
    json!({
        "title": title,
        "artist": "Artist",
        "url": href,
        "cover_url": "https://img.example/cover.jpg",
        "price": "",
    })
}

fn signals(header: &str) -> Value {
    json!({ "header_text": header, "buy_button_text": null })
}

fn three_album_fixture() -> ScanFixture {
    let mut fixture = ScanFixture::new(CATALOG);
    fixture.grid_payload = json!([
        grid_entry("First", "/album/first"),
        grid_entry("Second", "/album/second"),
        grid_entry("Third", "/album/third"),
    ]);
    fixture.signals.insert(
        "https://artist.bandcamp.com/album/first".into(),
        signals("free download"),
    );
    fixture.signals.insert(
        "https://artist.bandcamp.com/album/second".into(),
        signals("name your price"),
    );
    fixture.signals.insert(
        "https://artist.bandcamp.com/album/third".into(),
        signals("buy digital album $5 usd"),
    );
    fixture
}

fn scanner_with(factory: MockScanFactory) -> CatalogScanner {
    CatalogScanner::new(
        ScanSection::default(),
        SelectorSection::default(),
        Arc::new(factory),
    )
}

#[tokio::test]
async fn test_scan_classifies_each_album_in_grid_order() {
    let factory = MockScanFactory::new(three_album_fixture());
    let visits = Arc::clone(&factory.visits);
    let closed = Arc::clone(&factory.closed);
    let scanner = scanner_with(factory);

    let handle = scanner.begin_scan().expect("slot should be free");
    let mut streamed = Vec::new();
    let report = scanner
        .run(&handle, CATALOG, |album| streamed.push(album.title.clone()))
        .await
        .expect("scan should succeed");

    assert_eq!(report.outcome, ScanOutcome::Completed);
    let statuses: Vec<AlbumStatus> = report.albums.iter().map(|a| a.status).collect();
    assert_eq!(
        statuses,
        vec![
            AlbumStatus::Free,
            AlbumStatus::NameYourPrice,
            AlbumStatus::Paid
        ]
    );
    assert_eq!(streamed, vec!["First", "Second", "Third"]);
    assert_eq!(
        report.albums[0].url,
        "https://artist.bandcamp.com/album/first"
    );
    assert_eq!(
        visits.lock().unwrap().first().map(String::as_str),
        Some(CATALOG)
    );
    assert_eq!(*closed.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_cancellation_yields_partial_report() {
    let factory = MockScanFactory::new(three_album_fixture());
    let visits = Arc::clone(&factory.visits);
    let scanner = scanner_with(factory);

    let handle = scanner.begin_scan().expect("slot should be free");
    let canceller = handle.canceller();
    let mut seen = 0usize;
    let report = scanner
        .run(&handle, CATALOG, |_album| {
            seen += 1;
            if seen == 2 {
                canceller.cancel();
            }
        })
        .await
        .expect("cancelled scan still reports");

    assert_eq!(report.outcome, ScanOutcome::Cancelled);
    assert_eq!(report.albums.len(), 2);
    let visited = visits.lock().unwrap();
    assert!(!visited
        .iter()
        .any(|url| url.ends_with("/album/third")));
}

#[tokio::test]
async fn test_second_scan_rejected_while_handle_is_live() {
    let factory = MockScanFactory::new(ScanFixture::new(CATALOG));
    let scanner = scanner_with(factory);

    let first = scanner.begin_scan().expect("first claim succeeds");
    let second = scanner.begin_scan();
    assert!(matches!(second, Err(ScanError::ScanInProgress)));

    drop(first);
    scanner
        .begin_scan()
        .expect("slot frees when the handle drops");
}

#[tokio::test]
async fn test_missing_grid_is_an_error_and_page_still_closes() {
    let mut fixture = ScanFixture::new(CATALOG);
    fixture.grid_found = false;
    let factory = MockScanFactory::new(fixture);
    let closed = Arc::clone(&factory.closed);
    let scanner = scanner_with(factory);

    let handle = scanner.begin_scan().expect("slot should be free");
    let err = scanner
        .run(&handle, CATALOG, |_album| {})
        .await
        .expect_err("missing grid should fail");
    assert!(matches!(err, ScanError::GridNotFound(_)));
    assert_eq!(*closed.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_unreadable_album_page_downgrades_to_unavailable() {
    let mut fixture = three_album_fixture();
    fixture
        .failing_urls
        .insert("https://artist.bandcamp.com/album/second".into());
    let factory = MockScanFactory::new(fixture);
    let scanner = scanner_with(factory);

    let handle = scanner.begin_scan().expect("slot should be free");
    let report = scanner
        .run(&handle, CATALOG, |_album| {})
        .await
        .expect("scan should survive one bad page");

    assert_eq!(report.outcome, ScanOutcome::Completed);
    assert_eq!(report.albums.len(), 3);
    assert_eq!(report.albums[1].status, AlbumStatus::Unavailable);
    assert_eq!(report.albums[2].status, AlbumStatus::Paid);
}
