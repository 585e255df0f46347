use regex::Regex;
use serde::Serialize;
use sitesearch_core::config::{ConfigError, IndexingSettings};
use sitesearch_core::html::PageDocument;
use sitesearch_core::{IndexBuilder, Page, Site, SiteStatus, Store};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::fetch::{FetchOutcome, FetchPolicy, Fetcher};
use crate::frontier::Frontier;
use crate::links::{is_denied, CrawlScope, Link};

/// Saved pages between two liveness touches of the site status.
const PROGRESS_EVERY: usize = 100;

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("{0} is outside the site being crawled")]
    OutsideSite(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] sitesearch_core::Error),
    #[error("{url} answered with HTTP {code}")]
    Http { url: String, code: u16 },
    #[error("fetching {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("crawl cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    pub site: String,
    pub discovered: usize,
    pub saved: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
    pub cancelled: bool,
}

#[derive(Debug, Default)]
struct Counters {
    discovered: AtomicUsize,
    saved: AtomicUsize,
    failed: AtomicUsize,
}

/// A page waiting in the crawl queue. `path` is the dedup key, `url` is what
/// gets fetched.
#[derive(Debug)]
struct Target {
    path: String,
    url: Url,
    depth: u32,
}

/// State shared by the dispatcher and every page task of one run.
#[derive(Debug)]
struct Shared {
    site: Site,
    scope: CrawlScope,
    fetcher: Fetcher,
    store: Store,
    builder: IndexBuilder,
    frontier: Frontier,
    counters: Counters,
    max_depth: u32,
    exclude: Vec<Regex>,
    cancel: CancellationToken,
}

/// Crawls and indexes one site. Built once per site per run.
#[derive(Debug)]
pub struct SiteCrawler {
    shared: Arc<Shared>,
    max_concurrent_pages: usize,
}

impl SiteCrawler {
    pub fn new(
        site: Site,
        settings: &IndexingSettings,
        store: Store,
        builder: IndexBuilder,
        cancel: CancellationToken,
    ) -> Result<Self, CrawlError> {
        let scope = CrawlScope::new(&site.url).map_err(|source| CrawlError::InvalidUrl {
            url: site.url.clone(),
            source,
        })?;
        let domain = scope.domain();
        let fetcher = Fetcher::new(FetchPolicy {
            user_agent: settings.user_agent.clone(),
            timeout_ms: settings.timeout_ms,
            max_retries: settings.max_retries,
            min_delay_ms: settings.min_delay_ms,
            domain_delay_ms: settings.delay_for(&domain),
        })?;
        let shared = Shared {
            max_depth: settings.max_depth_for(&domain),
            exclude: settings.compiled_exclude_patterns()?,
            frontier: Frontier::new(settings.max_pages_per_site),
            counters: Counters::default(),
            site,
            scope,
            fetcher,
            store,
            builder,
            cancel,
        };
        Ok(Self {
            shared: Arc::new(shared),
            max_concurrent_pages: settings.max_concurrent_pages.max(1),
        })
    }

    pub fn site(&self) -> &Site {
        &self.shared.site
    }

    /// Breadth-first crawl from the site root. Marks the site INDEXED on
    /// normal completion; a cancelled run leaves the status to the canceller.
    pub async fn crawl_site(&self) -> Result<CrawlReport, CrawlError> {
        let started = Instant::now();
        let shared = &self.shared;
        info!(site = %shared.site.name, url = %shared.site.url, max_depth = shared.max_depth, "crawl started");

        let mut queue: VecDeque<Target> = VecDeque::new();
        if shared.frontier.admit("/") {
            shared.counters.discovered.fetch_add(1, Ordering::Relaxed);
            queue.push_back(Target { path: "/".to_string(), url: shared.scope.root(), depth: 0 });
        }

        let mut workers: JoinSet<Vec<Target>> = JoinSet::new();
        loop {
            while workers.len() < self.max_concurrent_pages && !shared.cancel.is_cancelled() {
                let Some(target) = queue.pop_front() else { break };
                let task = shared.clone();
                workers.spawn(async move { task.process(target).await });
            }
            if workers.is_empty() {
                break;
            }
            tokio::select! {
                _ = shared.cancel.cancelled() => {
                    workers.abort_all();
                    while workers.join_next().await.is_some() {}
                    break;
                }
                joined = workers.join_next() => match joined {
                    Some(Ok(found)) => queue.extend(found),
                    Some(Err(e)) if e.is_panic() => {
                        warn!(site = %shared.site.name, "page task panicked");
                        shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {}
                },
            }
        }

        let cancelled = shared.cancel.is_cancelled();
        if !cancelled {
            shared.store.transition_site_status(shared.site.id, SiteStatus::Indexing, SiteStatus::Indexed, None)?;
        }
        let report = self.report(started, cancelled);
        info!(
            site = %shared.site.name,
            saved = report.saved,
            failed = report.failed,
            elapsed_ms = report.elapsed_ms,
            cancelled,
            "crawl finished"
        );
        Ok(report)
    }

    /// Fetches and indexes one URL of this site, replacing the stored page at
    /// the same path.
    pub async fn crawl_single_page(&self, url: &str) -> Result<Page, CrawlError> {
        let shared = &self.shared;
        let target = Url::parse(url).map_err(|source| CrawlError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let path = shared
            .scope
            .path_of(&target)
            .ok_or_else(|| CrawlError::OutsideSite(url.to_string()))?;

        let body = match shared.fetcher.fetch(&target, &shared.cancel).await {
            FetchOutcome::Page { body, .. } => body,
            FetchOutcome::Rejected { code } => return Err(CrawlError::Http { url: url.to_string(), code }),
            FetchOutcome::Failed { error } => {
                return Err(CrawlError::Transport { url: url.to_string(), reason: error })
            }
            FetchOutcome::Cancelled => return Err(CrawlError::Cancelled),
        };

        if let Some(existing) = shared.store.find_page_by_path(shared.site.id, &path)? {
            shared.builder.remove_page(&existing)?;
        }
        let document = PageDocument::parse(&body);
        let page = shared.store.save_page(shared.site.id, &path, 200, &body)?;
        let lemmas = match shared.builder.index_page_content(&page, &document.text) {
            Ok(lemmas) => lemmas,
            Err(e) => {
                shared.store.delete_page(&page)?;
                return Err(e.into());
            }
        };
        info!(site = %shared.site.name, path = %path, lemmas, "page re-indexed");
        Ok(page)
    }

    fn report(&self, started: Instant, cancelled: bool) -> CrawlReport {
        let counters = &self.shared.counters;
        CrawlReport {
            site: self.shared.site.url.clone(),
            discovered: counters.discovered.load(Ordering::Relaxed),
            saved: counters.saved.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            elapsed_ms: started.elapsed().as_millis() as u64,
            cancelled,
        }
    }
}

impl Shared {
    /// Fetches, stores and indexes one page; returns the newly admitted links.
    async fn process(&self, target: Target) -> Vec<Target> {
        let Target { path, url, depth } = target;
        let (final_url, body) = match self.fetcher.fetch(&url, &self.cancel).await {
            FetchOutcome::Page { url, body, .. } => (url, body),
            FetchOutcome::Rejected { code } => {
                warn!(site = %self.site.name, path = %path, code, "page abandoned after retries");
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                return Vec::new();
            }
            FetchOutcome::Failed { error } => {
                warn!(site = %self.site.name, path = %path, error = %error, "page fetch failed");
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.frontier.release(&path);
                return Vec::new();
            }
            FetchOutcome::Cancelled => return Vec::new(),
        };

        let document = PageDocument::parse(&body);
        let page = match self.store.save_page(self.site.id, &path, 200, &body) {
            Ok(page) => page,
            Err(e) => {
                warn!(site = %self.site.name, path = %path, error = %e, "failed to save page");
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                return Vec::new();
            }
        };
        if let Err(e) = self.builder.index_page_content(&page, &document.text) {
            warn!(site = %self.site.name, path = %path, error = %e, "failed to index page");
            if let Err(e) = self.store.delete_page(&page) {
                warn!(site = %self.site.name, path = %path, error = %e, "failed to drop unindexed page");
            }
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            return Vec::new();
        }

        let saved = self.counters.saved.fetch_add(1, Ordering::Relaxed) + 1;
        if saved % PROGRESS_EVERY == 0 {
            debug!(site = %self.site.name, saved, "crawl progress");
            if let Err(e) = self.store.transition_site_status(self.site.id, SiteStatus::Indexing, SiteStatus::Indexing, None) {
                warn!(site = %self.site.name, error = %e, "failed to touch site status");
            }
        }

        let mut found = Vec::new();
        for href in &document.links {
            let Some(link) = self.scope.resolve(&final_url, href) else { continue };
            if self.should_skip(&link, depth + 1) {
                continue;
            }
            if self.frontier.admit(&link.path) {
                self.counters.discovered.fetch_add(1, Ordering::Relaxed);
                found.push(Target { path: link.path, url: link.url, depth: depth + 1 });
            }
        }
        found
    }

    fn should_skip(&self, link: &Link, depth: u32) -> bool {
        depth > self.max_depth
            || self.frontier.is_full()
            || self.exclude.iter().any(|re| re.is_match(&link.path))
            || is_denied(&link.raw)
    }
}
