//! Concurrent same-site crawler feeding the lemma index.
//!
//! One [`SiteCrawler`] owns one run over one site: a breadth-first queue of
//! paths, a [`frontier::Frontier`] admission set and a bounded pool of page
//! tasks that fetch, store and index each page inline.

pub mod fetch;
pub mod frontier;
pub mod links;
pub mod site;

pub use fetch::{FetchOutcome, FetchPolicy, Fetcher};
pub use site::{CrawlError, CrawlReport, SiteCrawler};
