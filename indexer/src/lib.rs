//! Indexing job lifecycle: fans a run out to one crawler per configured site,
//! tracks completion and handles cooperative stop.

use parking_lot::Mutex;
use sitesearch_core::config::SiteConfig;
use sitesearch_core::{IndexBuilder, LemmaExtractor, Settings, SiteStatus, Store};
use sitesearch_crawler::{CrawlError, SiteCrawler};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const STOPPED_BY_USER: &str = "Indexing stopped by user";

/// How often a stopping run checks whether its site tasks have unwound.
const STOP_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum IndexPageError {
    #[error("{0} is outside every configured site")]
    OutsideConfiguredSites(String),
    #[error("indexing run in progress")]
    IndexingRunning,
    #[error(transparent)]
    Crawl(#[from] CrawlError),
    #[error(transparent)]
    Store(#[from] sitesearch_core::Error),
}

#[derive(Debug)]
enum RunState {
    Idle,
    Running(ActiveRun),
    Stopping,
}

#[derive(Debug)]
struct ActiveRun {
    generation: u64,
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
}

#[derive(Debug)]
struct Inner {
    settings: Settings,
    store: Store,
    builder: IndexBuilder,
    state: Mutex<RunState>,
    generations: AtomicU64,
    idle: Notify,
    /// Held shared by single-page jobs and exclusively while a run resets a site.
    page_jobs: RwLock<()>,
}

/// Start/stop/status front for indexing runs. Cheap to clone.
#[derive(Debug, Clone)]
pub struct IndexingService {
    inner: Arc<Inner>,
}

struct SiteTask {
    site: SiteConfig,
    handle: JoinHandle<()>,
}

impl IndexingService {
    pub fn new(settings: Settings, store: Store, extractor: Arc<LemmaExtractor>) -> Self {
        let builder = IndexBuilder::new(store.clone(), extractor);
        Self {
            inner: Arc::new(Inner {
                settings,
                store,
                builder,
                state: Mutex::new(RunState::Idle),
                generations: AtomicU64::new(0),
                idle: Notify::new(),
                page_jobs: RwLock::new(()),
            }),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// True while a run is in flight, including while it is being stopped.
    pub fn is_running(&self) -> bool {
        !matches!(*self.inner.state.lock(), RunState::Idle)
    }

    /// Launches a run over every configured site. Returns false, doing
    /// nothing, when a run is already active or stopping.
    pub fn start_indexing(&self) -> bool {
        let mut state = self.inner.state.lock();
        if !matches!(*state, RunState::Idle) {
            return false;
        }
        let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let supervisor = tokio::spawn(supervise(self.inner.clone(), generation, cancel.clone()));
        *state = RunState::Running(ActiveRun {
            generation,
            cancel,
            supervisor,
        });
        info!(generation, sites = self.inner.settings.sites.len(), "indexing started");
        true
    }

    /// Cancels the active run, waits for it to unwind and fails every site
    /// still indexing. Returns false when no run is active.
    pub async fn stop_indexing(&self) -> bool {
        let run = {
            let mut state = self.inner.state.lock();
            match std::mem::replace(&mut *state, RunState::Stopping) {
                RunState::Running(run) => run,
                other => {
                    *state = other;
                    return false;
                }
            }
        };
        info!(generation = run.generation, "stopping indexing");
        run.cancel.cancel();

        let grace = Duration::from_millis(self.inner.settings.orchestrator.stop_grace_ms) + STOP_POLL * 10;
        let mut supervisor = run.supervisor;
        if tokio::time::timeout(grace, &mut supervisor).await.is_err() {
            warn!(generation = run.generation, "supervisor did not finish in time, aborting");
            supervisor.abort();
        }

        match self.inner.store.fail_indexing_sites(STOPPED_BY_USER) {
            Ok(failed) => info!(failed, "indexing stopped"),
            Err(e) => error!(error = %e, "failed to mark stopped sites"),
        }
        *self.inner.state.lock() = RunState::Idle;
        self.inner.idle.notify_waiters();
        true
    }

    /// Resolves once no run is active.
    pub async fn wait_until_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }

    /// Re-indexes a single page of a configured site. Refused while a run is
    /// active, since the run recreates every site.
    pub async fn index_page(&self, url: &str) -> Result<(), IndexPageError> {
        let url = url.trim();
        let config = self
            .inner
            .settings
            .site_for_url(url)
            .ok_or_else(|| IndexPageError::OutsideConfiguredSites(url.to_string()))?;

        let _job = self.inner.page_jobs.read().await;
        if self.is_running() {
            return Err(IndexPageError::IndexingRunning);
        }

        let store = &self.inner.store;
        let site = store.find_or_create_site(config.base_url(), &config.name)?;
        let result = match SiteCrawler::new(
            site.clone(),
            &self.inner.settings.indexing,
            store.clone(),
            self.inner.builder.clone(),
            CancellationToken::new(),
        ) {
            Ok(crawler) => crawler.crawl_single_page(url).await.map(|_| ()),
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => store.set_site_status(site.id, SiteStatus::Indexed, None)?,
            Err(e) => store.set_site_status(site.id, SiteStatus::Failed, Some(e.to_string()))?,
        }
        if let Err(e) = &result {
            warn!(url, error = %e, "single page indexing failed");
        }
        result.map_err(IndexPageError::from)
    }
}

async fn supervise(inner: Arc<Inner>, generation: u64, cancel: CancellationToken) {
    let sites = inner.settings.sites.clone();
    let permits = Arc::new(Semaphore::new(inner.settings.orchestrator.pool_size(sites.len())));

    let mut pending: Vec<SiteTask> = sites
        .into_iter()
        .map(|site| {
            let handle = tokio::spawn(run_site(inner.clone(), site.clone(), permits.clone(), cancel.clone()));
            SiteTask { site, handle }
        })
        .collect();

    let mut ticker = interval(Duration::from_millis(inner.settings.orchestrator.monitor_interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    while !pending.is_empty() {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => reap(&inner, &mut pending).await,
        }
    }

    if !pending.is_empty() {
        let deadline = Instant::now() + Duration::from_millis(inner.settings.orchestrator.stop_grace_ms);
        reap(&inner, &mut pending).await;
        while !pending.is_empty() && Instant::now() < deadline {
            sleep(STOP_POLL.min(deadline.saturating_duration_since(Instant::now()))).await;
            reap(&inner, &mut pending).await;
        }
        for task in pending.drain(..) {
            warn!(site = %task.site.name, "site task did not unwind in time, aborting");
            task.handle.abort();
        }
    }

    let mut state = inner.state.lock();
    if matches!(&*state, RunState::Running(run) if run.generation == generation) {
        *state = RunState::Idle;
        info!(generation, "indexing finished");
    }
    drop(state);
    inner.idle.notify_waiters();
}

/// Collects finished site tasks; a panicked task fails its site.
async fn reap(inner: &Inner, pending: &mut Vec<SiteTask>) {
    let mut i = 0;
    while i < pending.len() {
        if !pending[i].handle.is_finished() {
            i += 1;
            continue;
        }
        let task = pending.swap_remove(i);
        if let Err(e) = task.handle.await {
            if e.is_panic() {
                error!(site = %task.site.name, "site task panicked");
                fail_site(inner, &task.site, "site indexing task panicked");
            }
        }
    }
}

async fn run_site(inner: Arc<Inner>, config: SiteConfig, permits: Arc<Semaphore>, cancel: CancellationToken) {
    let _permit = tokio::select! {
        _ = cancel.cancelled() => return,
        permit = permits.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
    };

    let pages = tokio::select! {
        _ = cancel.cancelled() => return,
        guard = inner.page_jobs.write() => guard,
    };
    let recreated = inner.store.recreate_site(config.base_url(), &config.name);
    drop(pages);
    let site = match recreated {
        Ok(site) => site,
        Err(e) => {
            error!(site = %config.name, error = %e, "failed to reset site");
            return;
        }
    };

    let crawled = match SiteCrawler::new(
        site,
        &inner.settings.indexing,
        inner.store.clone(),
        inner.builder.clone(),
        cancel,
    ) {
        Ok(crawler) => crawler.crawl_site().await,
        Err(e) => Err(e),
    };
    match crawled {
        Ok(report) => info!(site = %config.name, saved = report.saved, failed = report.failed, "site done"),
        Err(e) => {
            warn!(site = %config.name, error = %e, "site indexing failed");
            fail_site(&inner, &config, &e.to_string());
        }
    }
}

fn fail_site(inner: &Inner, config: &SiteConfig, reason: &str) {
    let outcome = inner.store.find_site_by_url(config.base_url()).and_then(|site| match site {
        Some(site) => inner
            .store
            .transition_site_status(site.id, SiteStatus::Indexing, SiteStatus::Failed, Some(reason.to_string())),
        None => Ok(false),
    });
    if let Err(e) = outcome {
        error!(site = %config.name, error = %e, "failed to record site failure");
    }
}
