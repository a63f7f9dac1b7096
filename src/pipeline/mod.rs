//! Crawl orchestrator: listing pages → detail fetches → storage.
//!
//! Pages are processed strictly in order. Within a page every detail link is
//! dispatched at once and admitted through the shared [`ConcurrencyLimiter`];
//! the page's batch is persisted only after every fetch has settled.
//!
//! Failure scopes:
//!   * listing page transport fault → the run aborts
//!   * detail / phone fault → that listing is dropped, siblings carry on
//!   * batch insert fault → logged, the run moves on to the next page
//!
//! Nothing is retried; the next run re-crawls and the store skips known urls.

pub mod limiter;

use crate::config::{AppConfig, PipelineConfig};
use crate::models::{ListingPage, ListingRecord};
use crate::scraper::parsers::scan_listing_page;
use crate::scraper::error::ListingError;
use crate::scraper::{AutoRiaScraper, ListingSource};
use crate::storage::{ListingStore, Repository, RunOutcome};
use anyhow::{Context, Result};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub use self::limiter::ConcurrencyLimiter;

// ── Run settings / report ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub start_page: u32,
    pub max_pages: Option<u32>,
    pub page_delay: Duration,
    pub jitter_ms: u64,
}

impl From<&PipelineConfig> for CrawlSettings {
    fn from(cfg: &PipelineConfig) -> Self {
        Self {
            start_page: cfg.start_page.max(1),
            max_pages: cfg.max_pages,
            page_delay: cfg.page_delay(),
            jitter_ms: cfg.jitter_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No enabled "next" control.
    Exhausted,
    /// Page yielded no eligible links and no "next" control.
    EmptyPage,
    /// Page yielded no eligible links yet claims a next page.
    EmptyPageWithNext,
    /// `max_pages` reached.
    PageLimit,
}

#[derive(Debug, Default, Clone)]
pub struct CrawlReport {
    pub pages: usize,
    pub links: usize,
    pub inserted: usize,
    pub failed_listings: usize,
    pub failed_batches: usize,
    pub stop: Option<StopReason>,
}

// ── State machine ─────────────────────────────────────────────────────────────

enum Phase {
    FetchingListing,
    DispatchingDetails(ListingPage),
    Persisting { batch: Vec<ListingRecord>, has_next: bool, links: usize },
    DecidingContinue { has_next: bool, links: usize },
    Done(StopReason),
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::FetchingListing => "fetching-listing",
            Phase::DispatchingDetails(_) => "dispatching-details",
            Phase::Persisting { .. } => "persisting",
            Phase::DecidingContinue { .. } => "deciding-continue",
            Phase::Done(_) => "done",
        }
    }
}

/// Drives one sweep over the listing pages.
pub struct Crawler<S: ListingSource> {
    source: Arc<S>,
    limiter: ConcurrencyLimiter,
    settings: CrawlSettings,
    page: u32,
    report: CrawlReport,
}

impl<S: ListingSource> Crawler<S> {
    pub fn new(source: Arc<S>, limiter: ConcurrencyLimiter, settings: CrawlSettings) -> Self {
        let page = settings.start_page.max(1);
        Self {
            source,
            limiter,
            settings,
            page,
            report: CrawlReport::default(),
        }
    }

    pub fn report(&self) -> &CrawlReport {
        &self.report
    }

    /// Run until exhaustion. Errors only on a listing page fetch fault.
    pub async fn run<G: ListingStore>(&mut self, store: &G) -> Result<StopReason> {
        let mut phase = Phase::FetchingListing;

        loop {
            debug!(page = self.page, phase = phase.name(), "crawl state");
            phase = match phase {
                Phase::FetchingListing => {
                    let page = self
                        .source
                        .fetch_listing_page(self.page)
                        .await
                        .with_context(|| format!("Failed to fetch listing page {}", self.page))?;
                    self.report.pages += 1;
                    Phase::DispatchingDetails(page)
                }

                Phase::DispatchingDetails(page) => {
                    let scan = scan_listing_page(&page.html, &page.url);
                    info!("Page {}: {} links (next: {})", page.number, scan.links.len(), scan.has_next);

                    if scan.links.is_empty() {
                        Phase::DecidingContinue { has_next: scan.has_next, links: 0 }
                    } else {
                        let batch = self.dispatch(&scan.links).await;
                        Phase::Persisting { batch, has_next: scan.has_next, links: scan.links.len() }
                    }
                }

                Phase::Persisting { batch, has_next, links } => {
                    self.persist(store, &batch);
                    Phase::DecidingContinue { has_next, links }
                }

                Phase::DecidingContinue { has_next, links } => {
                    if let Some(reason) = self.stop_reason(has_next, links) {
                        Phase::Done(reason)
                    } else {
                        self.pause().await;
                        self.page += 1;
                        Phase::FetchingListing
                    }
                }

                Phase::Done(reason) => {
                    info!(
                        "Crawl finished ({:?}): {} pages | {} links | {} new | {} failed listings | {} failed batches",
                        reason,
                        self.report.pages,
                        self.report.links,
                        self.report.inserted,
                        self.report.failed_listings,
                        self.report.failed_batches,
                    );
                    self.report.stop = Some(reason);
                    return Ok(reason);
                }
            };
        }
    }

    fn stop_reason(&self, has_next: bool, links: usize) -> Option<StopReason> {
        if links == 0 {
            if has_next {
                warn!("Page {} has no listings but a next control; stopping", self.page);
                return Some(StopReason::EmptyPageWithNext);
            }
            return Some(StopReason::EmptyPage);
        }
        if !has_next {
            return Some(StopReason::Exhausted);
        }
        if let Some(max) = self.settings.max_pages {
            if self.report.pages >= max as usize {
                info!("Reached page limit ({}), stopping", max);
                return Some(StopReason::PageLimit);
            }
        }
        None
    }

    /// Fetch every link under the limiter and wait for all of them.
    /// Successes come back in link order.
    async fn dispatch(&mut self, links: &[String]) -> Vec<ListingRecord> {
        self.report.links += links.len();
        debug!(
            "Dispatching {} links ({}/{} slots free)",
            links.len(),
            self.limiter.available(),
            self.limiter.capacity()
        );

        let mut tasks = JoinSet::new();
        for (idx, link) in links.iter().cloned().enumerate() {
            let source = Arc::clone(&self.source);
            let limiter = self.limiter.clone();

            tasks.spawn(async move {
                let _permit = match limiter.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return (idx, link, Err(ListingError::Cancelled)),
                };
                let result = source.fetch_listing(&link).await;
                (idx, link, result)
            });
        }

        let mut settled = Vec::with_capacity(links.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, _, Ok(record))) => settled.push((idx, record)),
                Ok((_, link, Err(e))) => {
                    warn!("{}: {:#}", link, anyhow::Error::new(e));
                    self.report.failed_listings += 1;
                }
                Err(e) => {
                    error!("Detail task panicked: {}", e);
                    self.report.failed_listings += 1;
                }
            }
        }

        settled.sort_by_key(|(idx, _)| *idx);
        settled.into_iter().map(|(_, record)| record).collect()
    }

    fn persist<G: ListingStore>(&mut self, store: &G, batch: &[ListingRecord]) {
        if batch.is_empty() {
            warn!("Page {}: no usable listings", self.page);
            return;
        }
        match store.insert_if_absent(batch) {
            Ok(n) => {
                self.report.inserted += n;
                info!("Page {}: stored {} new of {} listings", self.page, n, batch.len());
            }
            Err(e) => {
                self.report.failed_batches += 1;
                error!("Page {}: batch of {} not stored: {:#}", self.page, batch.len(), e);
            }
        }
    }

    async fn pause(&self) {
        let jitter = if self.settings.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.settings.jitter_ms)
        } else {
            0
        };
        let total = self.settings.page_delay + Duration::from_millis(jitter);
        if !total.is_zero() {
            tokio::time::sleep(total).await;
        }
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self) -> Result<CrawlReport> {
        let repo = Repository::open(&self.config.storage.db_path)
            .context("Failed to open DuckDB")?;

        if self.config.storage.run_migrations {
            repo.run_migrations()?;
        }

        let scraper = Arc::new(
            AutoRiaScraper::new(&self.config.scraper)
                .context("Failed to build scraper")?,
        );
        let limiter = ConcurrencyLimiter::new(self.config.pipeline.concurrency);
        info!(
            "Crawling {} (concurrency {}, delay {:?})",
            self.config.scraper.base_url,
            limiter.capacity(),
            self.config.pipeline.page_delay(),
        );

        let run_id = repo
            .begin_scrape_run()
            .map_err(|e| warn!("Could not log scrape run: {:#}", e))
            .ok();

        let mut crawler = Crawler::new(scraper, limiter, CrawlSettings::from(&self.config.pipeline));
        let result = crawler.run(&repo).await;

        if let Some(run_id) = run_id {
            let report = crawler.report();
            let failure = result.as_ref().err().map(|e| format!("{:#}", e));
            repo.finish_scrape_run(
                run_id,
                &RunOutcome {
                    pages: report.pages,
                    links: report.links,
                    inserted: report.inserted,
                    failed_listings: report.failed_listings,
                    error: failure.as_deref(),
                },
            )
            .ok();
        }

        result?;
        Ok(crawler.report().clone())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScraperConfig;
    use crate::models::ABSENT;
    use crate::scraper::error::TransportError;
    use crate::scraper::fixtures::{self, Card, Detail, Next};
    use crate::scraper::testing::FixtureTransport;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::assert_ok;
    use url::Url;

    fn settings() -> CrawlSettings {
        CrawlSettings { start_page: 1, max_pages: None, page_delay: Duration::ZERO, jitter_ms: 0 }
    }

    fn store() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    fn page_url(n: u32) -> String {
        format!("{}?page={}", fixtures::BASE, n)
    }

    /// Serves canned listing pages and synthesises records, tracking how many
    /// detail fetches overlap.
    #[derive(Default)]
    struct ScriptedSource {
        pages: HashMap<u32, String>,
        fetch_delay: Duration,
        listing_requests: Mutex<Vec<u32>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        detail_calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn with_page(mut self, n: u32, html: String) -> Self {
            self.pages.insert(n, html);
            self
        }

        fn listing_requests(&self) -> Vec<u32> {
            self.listing_requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ListingSource for ScriptedSource {
        async fn fetch_listing_page(&self, page: u32) -> Result<ListingPage, TransportError> {
            self.listing_requests.lock().unwrap().push(page);
            let url = page_url(page);
            match self.pages.get(&page) {
                Some(html) => Ok(ListingPage {
                    number: page,
                    url: Url::parse(&url).unwrap(),
                    html: html.clone(),
                }),
                None => Err(TransportError::Status { status: 503, url }),
            }
        }

        async fn fetch_listing(&self, url: &str) -> Result<ListingRecord, ListingError> {
            self.detail_calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.fetch_delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            Ok(ListingRecord {
                url: url.to_string(),
                title: "Car".into(),
                price_usd: 1000,
                odometer: 0,
                username: "Seller".into(),
                phone_number: 380_671_234_567,
                image_url: String::new(),
                images_count: 0,
                car_number: ABSENT.into(),
                car_vin: ABSENT.into(),
                datetime_found: Utc::now(),
            })
        }
    }

    fn cards(ids: std::ops::Range<u64>) -> Vec<String> {
        ids.map(|i| fixtures::detail_url("car", i)).collect()
    }

    fn listing(links: &[String], next: Next) -> String {
        let cards: Vec<Card<'_>> = links.iter().map(|l| Card::used(l)).collect();
        fixtures::listing_html(&cards, next)
    }

    #[tokio::test]
    async fn end_to_end_single_page_fixture() {
        let good_a = fixtures::detail_url("toyota_camry", 101);
        let no_price = fixtures::detail_url("bmw_x5", 102);
        let good_b = fixtures::detail_url("audi_a6", 103);

        let transport = FixtureTransport {
            reveal_body: fixtures::reveal_json("0671234567"),
            cookie: Some("ria_sid=abc".into()),
            ..Default::default()
        }
        .page(page_url(1), listing(&[good_a.clone(), no_price.clone(), good_b.clone()], Next::Disabled))
        .page(&good_a, fixtures::detail_html(&Detail::default()))
        .page(&no_price, fixtures::detail_html(&Detail { price: None, ..Default::default() }))
        .page(&good_b, fixtures::detail_html(&Detail { title: Some("Audi A6"), ..Default::default() }));

        let cfg = ScraperConfig { base_url: fixtures::BASE.into(), ..Default::default() };
        let source = Arc::new(AutoRiaScraper::with_transport(transport, &cfg).unwrap());
        let repo = store();

        let mut crawler = Crawler::new(Arc::clone(&source), ConcurrencyLimiter::new(2), settings());
        let stop = assert_ok!(crawler.run(&repo).await);

        assert_eq!(stop, StopReason::Exhausted);
        assert_eq!(repo.count_all().unwrap(), 2);
        let report = crawler.report();
        assert_eq!(report.pages, 1);
        assert_eq!(report.links, 3);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.failed_listings, 1);
        assert_eq!(report.stop, Some(StopReason::Exhausted));

        // persisted in link order, so newest first is the reverse
        let urls: Vec<String> = repo.page(0, 10).unwrap().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec![good_b, good_a]);
        // one listing GET + three detail GETs, nothing more
        assert_eq!(source_gets(&source), 4);
    }

    fn source_gets(source: &AutoRiaScraper<FixtureTransport>) -> usize {
        source.transport().get_count()
    }

    #[tokio::test]
    async fn empty_page_without_next_is_done() {
        let source = Arc::new(ScriptedSource::default().with_page(1, listing(&[], Next::Absent)));
        let repo = store();

        let mut crawler = Crawler::new(Arc::clone(&source), ConcurrencyLimiter::new(2), settings());
        assert_eq!(crawler.run(&repo).await.unwrap(), StopReason::EmptyPage);
        assert_eq!(source.listing_requests(), vec![1]);
        assert_eq!(source.detail_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_page_with_next_stops_instead_of_looping() {
        let source = Arc::new(ScriptedSource::default().with_page(1, listing(&[], Next::Enabled)));
        let repo = store();

        let mut crawler = Crawler::new(Arc::clone(&source), ConcurrencyLimiter::new(2), settings());
        assert_eq!(crawler.run(&repo).await.unwrap(), StopReason::EmptyPageWithNext);
        assert_eq!(source.listing_requests(), vec![1]);
    }

    #[tokio::test]
    async fn follows_next_until_disabled() {
        let source = Arc::new(
            ScriptedSource::default()
                .with_page(1, listing(&cards(0..3), Next::Enabled))
                .with_page(2, listing(&cards(3..5), Next::Disabled)),
        );
        let repo = store();

        let mut crawler = Crawler::new(Arc::clone(&source), ConcurrencyLimiter::new(2), settings());
        assert_eq!(crawler.run(&repo).await.unwrap(), StopReason::Exhausted);
        assert_eq!(source.listing_requests(), vec![1, 2]);
        assert_eq!(repo.count_all().unwrap(), 5);
        assert_eq!(crawler.report().inserted, 5);
    }

    #[tokio::test]
    async fn page_limit_caps_the_run() {
        let source = Arc::new(
            ScriptedSource::default()
                .with_page(1, listing(&cards(0..2), Next::Enabled))
                .with_page(2, listing(&cards(2..4), Next::Enabled)),
        );
        let mut crawler = Crawler::new(
            Arc::clone(&source),
            ConcurrencyLimiter::new(2),
            CrawlSettings { max_pages: Some(1), ..settings() },
        );
        assert_eq!(crawler.run(&store()).await.unwrap(), StopReason::PageLimit);
        assert_eq!(source.listing_requests(), vec![1]);
    }

    #[tokio::test]
    async fn listing_page_fault_aborts_run() {
        let source = Arc::new(
            ScriptedSource::default().with_page(1, listing(&cards(0..2), Next::Enabled)),
        );
        let repo = store();

        let mut crawler = Crawler::new(Arc::clone(&source), ConcurrencyLimiter::new(2), settings());
        let err = crawler.run(&repo).await.unwrap_err();
        assert!(format!("{:#}", err).contains("listing page 2"));
        // page 1 was already committed
        assert_eq!(repo.count_all().unwrap(), 2);
        assert_eq!(crawler.report().stop, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn detail_fetches_never_exceed_ceiling() {
        let source = Arc::new(ScriptedSource {
            fetch_delay: Duration::from_millis(25),
            ..ScriptedSource::default()
                .with_page(1, listing(&cards(0..8), Next::Enabled))
                .with_page(2, listing(&cards(8..14), Next::Disabled))
        });
        let limiter = ConcurrencyLimiter::new(2);

        let mut crawler = Crawler::new(Arc::clone(&source), limiter.clone(), settings());
        crawler.run(&store()).await.unwrap();

        assert_eq!(source.detail_calls.load(Ordering::SeqCst), 14);
        assert_eq!(source.peak.load(Ordering::SeqCst), 2);
        assert_eq!(limiter.available(), 2);
    }

    struct FailingStore {
        attempts: AtomicUsize,
    }

    impl ListingStore for FailingStore {
        fn insert_if_absent(&self, _records: &[ListingRecord]) -> Result<usize> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("store unreachable")
        }
        fn count_all(&self) -> Result<i64> {
            Ok(0)
        }
        fn page(&self, _offset: usize, _limit: usize) -> Result<Vec<ListingRecord>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn batch_failure_does_not_stop_the_crawl() {
        let source = Arc::new(
            ScriptedSource::default()
                .with_page(1, listing(&cards(0..2), Next::Enabled))
                .with_page(2, listing(&cards(2..4), Next::Absent)),
        );
        let store = FailingStore { attempts: AtomicUsize::new(0) };

        let mut crawler = Crawler::new(Arc::clone(&source), ConcurrencyLimiter::new(2), settings());
        assert_eq!(crawler.run(&store).await.unwrap(), StopReason::Exhausted);
        assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(crawler.report().failed_batches, 2);
        assert_eq!(crawler.report().inserted, 0);
    }

    #[tokio::test]
    async fn rerun_inserts_nothing_new() {
        let links = cards(0..3);
        let repo = store();
        for _ in 0..2 {
            let source = Arc::new(ScriptedSource::default().with_page(1, listing(&links, Next::Absent)));
            let mut crawler = Crawler::new(source, ConcurrencyLimiter::new(2), settings());
            crawler.run(&repo).await.unwrap();
        }
        assert_eq!(repo.count_all().unwrap(), 3);
    }
}
