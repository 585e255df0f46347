use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

use crate::config::SearchSettings;
use crate::error::Error;
use crate::html::PageDocument;
use crate::lemma::LemmaExtractor;
use crate::model::{Lemma, PageId, Site, SiteStatus};
use crate::snippet::make_snippet;
use crate::store::Store;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("empty search query")]
    EmptyQuery,
    #[error("site {0} is not indexed")]
    SiteNotIndexed(String),
    #[error("no indexed sites")]
    NothingIndexed,
    #[error(transparent)]
    Store(#[from] Error),
}

#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    pub site: Option<&'a str>,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub site: String,
    pub site_name: String,
    pub uri: String,
    pub title: String,
    pub snippet: String,
    pub relevance: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResults {
    /// Size of the full result list before pagination.
    pub count: usize,
    pub data: Vec<SearchHit>,
}

/// Read-only query side of the index.
#[derive(Debug, Clone)]
pub struct SearchEngine {
    store: Store,
    extractor: Arc<LemmaExtractor>,
    settings: SearchSettings,
}

impl SearchEngine {
    pub fn new(store: Store, extractor: Arc<LemmaExtractor>, settings: SearchSettings) -> Self {
        Self { store, extractor, settings }
    }

    pub fn search(&self, request: &SearchRequest<'_>) -> Result<SearchResults, SearchError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }

        let sites = match request.site.map(str::trim).filter(|s| !s.is_empty()) {
            Some(url) => match self.store.find_site_by_url(url)? {
                Some(site) if site.status == SiteStatus::Indexed => vec![site],
                _ => return Err(SearchError::SiteNotIndexed(url.to_string())),
            },
            None => {
                let sites = self.store.sites_with_status(SiteStatus::Indexed)?;
                if sites.is_empty() {
                    return Err(SearchError::NothingIndexed);
                }
                sites
            }
        };

        let query_lemmas = self.extractor.extract_set(query);
        if query_lemmas.is_empty() {
            return Ok(SearchResults::default());
        }

        let mut hits = Vec::new();
        for site in &sites {
            hits.extend(self.search_site(site, query, &query_lemmas)?);
        }

        let mut seen = HashSet::new();
        hits.retain(|hit: &SearchHit| seen.insert(hit.uri.clone()));
        hits.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap_or(std::cmp::Ordering::Equal));

        let count = hits.len();
        let data = hits.into_iter().skip(request.offset).take(request.limit).collect();
        tracing::debug!(query, sites = sites.len(), count, "search complete");
        Ok(SearchResults { count, data })
    }

    fn search_site(
        &self,
        site: &Site,
        query: &str,
        query_lemmas: &HashSet<String>,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let total_pages = self.store.count_pages(site.id)?;
        let lemmas = self.selective_lemmas(site, query_lemmas, total_pages)?;
        if lemmas.is_empty() {
            return Ok(Vec::new());
        }

        let pages = self.pages_with_all(&lemmas)?;
        let scores = self.score(&pages, &lemmas, total_pages)?;

        let mut hits = Vec::with_capacity(scores.len());
        for (page_id, relevance) in scores {
            let Some(page) = self.store.page(page_id)? else { continue };
            if self.settings.excluded_path_markers.iter().any(|m| page.path.contains(m.as_str())) {
                continue;
            }
            let document = PageDocument::parse(&page.content);
            hits.push(SearchHit {
                site: site.url.clone(),
                site_name: site.name.clone(),
                uri: page.path.clone(),
                title: document.title.unwrap_or_else(|| self.settings.untitled_placeholder.clone()),
                snippet: make_snippet(&document.text, query, query_lemmas, &self.extractor),
                relevance,
            });
        }
        Ok(hits)
    }

    /// Query lemmas known on the site that are rare enough to discriminate,
    /// rarest first.
    fn selective_lemmas(
        &self,
        site: &Site,
        query_lemmas: &HashSet<String>,
        total_pages: u64,
    ) -> Result<Vec<Lemma>, SearchError> {
        let threshold = total_pages as f64 * self.settings.frequency_threshold;
        let mut lemmas = Vec::new();
        for text in query_lemmas {
            if let Some(lemma) = self.store.find_lemma(site.id, text)? {
                if lemma.frequency > 0 && lemma.frequency as f64 <= threshold {
                    lemmas.push(lemma);
                }
            }
        }
        lemmas.sort_by(|a, b| a.frequency.cmp(&b.frequency).then_with(|| a.lemma.cmp(&b.lemma)));
        Ok(lemmas)
    }

    /// Pages carrying every lemma, narrowed from the rarest posting list.
    fn pages_with_all(&self, lemmas: &[Lemma]) -> Result<Vec<PageId>, SearchError> {
        let mut lemmas = lemmas.iter();
        let Some(rarest) = lemmas.next() else {
            return Ok(Vec::new());
        };
        let mut pages = self.store.pages_with_lemma(rarest.id)?;
        for lemma in lemmas {
            if pages.is_empty() {
                break;
            }
            let next = self.store.pages_with_lemma(lemma.id)?;
            pages.retain(|id| next.contains(id));
        }
        let mut pages: Vec<PageId> = pages.into_iter().collect();
        pages.sort_unstable();
        Ok(pages)
    }

    /// Sum of rank * idf per page, divided by the site maximum.
    fn score(
        &self,
        pages: &[PageId],
        lemmas: &[Lemma],
        total_pages: u64,
    ) -> Result<Vec<(PageId, f32)>, SearchError> {
        let idf: HashMap<u64, f64> = lemmas
            .iter()
            .map(|l| (l.id, (total_pages as f64 / l.frequency as f64).ln()))
            .collect();

        let mut scores = Vec::with_capacity(pages.len());
        let mut max = 0.0f64;
        for &page_id in pages {
            let mut score = 0.0f64;
            for lemma in lemmas {
                if let Some(rank) = self.store.posting_rank(page_id, lemma.id)? {
                    score += rank as f64 * idf[&lemma.id];
                }
            }
            max = max.max(score);
            scores.push((page_id, score));
        }

        Ok(scores
            .into_iter()
            .map(|(id, score)| {
                let relevance = if max > 0.0 { score / max } else { 0.0 };
                (id, relevance as f32)
            })
            .collect())
    }
}
