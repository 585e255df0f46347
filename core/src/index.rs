use std::sync::Arc;

use crate::error::Result;
use crate::lemma::LemmaExtractor;
use crate::model::{LemmaId, Page, Posting};
use crate::store::Store;

/// Writes lemma frequencies and postings for crawled pages.
///
/// Frequency approximates document frequency: each page bumps a lemma by one
/// no matter how often the lemma occurs in it. The occurrence count goes into
/// the posting rank instead.
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    store: Store,
    extractor: Arc<LemmaExtractor>,
}

impl IndexBuilder {
    pub fn new(store: Store, extractor: Arc<LemmaExtractor>) -> Self {
        Self { store, extractor }
    }

    pub fn extractor(&self) -> &LemmaExtractor {
        &self.extractor
    }

    /// Indexes the plain text of `page`; returns the number of distinct lemmas.
    ///
    /// A lemma's frequency is bumped only once its posting is stored. On error
    /// every lemma already written for this page is taken back out.
    pub fn index_page_content(&self, page: &Page, text: &str) -> Result<usize> {
        let counts = self.extractor.extract_counts(text);
        let mut written = Vec::with_capacity(counts.len());
        for (lemma, occurrences) in &counts {
            match self.index_lemma(page, lemma, *occurrences as f32) {
                Ok(lemma_id) => written.push(lemma_id),
                Err(e) => {
                    self.undo(page, &written);
                    return Err(e);
                }
            }
        }
        tracing::trace!(page = page.id, path = %page.path, lemmas = counts.len(), "indexed page");
        Ok(counts.len())
    }

    fn index_lemma(&self, page: &Page, lemma: &str, rank: f32) -> Result<LemmaId> {
        let lemma_id = self.store.find_or_create_lemma(page.site_id, lemma)?;
        let stored = self
            .store
            .put_posting(Posting { page_id: page.id, lemma_id, rank })
            .and_then(|_| self.store.add_lemma_frequency(lemma_id, 1));
        if let Err(e) = stored {
            self.store.delete_posting(page.id, lemma_id)?;
            return Err(e);
        }
        Ok(lemma_id)
    }

    fn undo(&self, page: &Page, written: &[LemmaId]) {
        for &lemma_id in written {
            let outcome = self
                .store
                .delete_posting(page.id, lemma_id)
                .and_then(|_| self.store.add_lemma_frequency(lemma_id, -1));
            if let Err(e) = outcome {
                tracing::error!(page = page.id, lemma = lemma_id, error = %e, "failed to roll back posting");
            }
        }
    }

    /// Deletes `page` and its postings, giving back one frequency unit to each
    /// lemma it carried.
    pub fn remove_page(&self, page: &Page) -> Result<()> {
        for lemma_id in self.store.lemmas_of_page(page.id)? {
            self.store.add_lemma_frequency(lemma_id, -1)?;
        }
        self.store.delete_page(page)
    }
}
