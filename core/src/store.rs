//! sled-backed persistence for sites, pages, lemmas and postings.
//!
//! Every relation lives in its own tree. Composite keys are big-endian ids
//! concatenated with optional text, so that `scan_prefix(site_id)` walks all
//! rows owned by a site and `scan_prefix(lemma_id)` walks a posting list.
//!
//! | tree            | key                      | value            |
//! |-----------------|--------------------------|------------------|
//! | `sites`         | site id                  | bincode `Site`   |
//! | `site_urls`     | url                      | site id          |
//! | `pages`         | page id                  | bincode `Page`   |
//! | `site_pages`    | site id ++ page id       | empty            |
//! | `page_paths`    | site id ++ path          | page id          |
//! | `lemmas`        | lemma id                 | bincode record   |
//! | `lemma_keys`    | site id ++ lemma         | lemma id         |
//! | `lemma_freq`    | lemma id                 | u64              |
//! | `postings`      | lemma id ++ page id      | f32 rank         |
//! | `page_postings` | page id ++ lemma id      | empty            |

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::model::{Lemma, LemmaId, Page, PageId, Posting, Site, SiteId, SiteStatus};

const SITE_SEQUENCE: &[u8] = b"site";
const EMPTY: &[u8] = &[];

#[derive(Debug, Serialize, Deserialize)]
struct LemmaRecord {
    site_id: SiteId,
    lemma: String,
}

#[derive(Clone)]
pub struct Store {
    db: Db,
    sites: Tree,
    site_urls: Tree,
    pages: Tree,
    site_pages: Tree,
    page_paths: Tree,
    lemmas: Tree,
    lemma_keys: Tree,
    lemma_freq: Tree,
    postings: Tree,
    page_postings: Tree,
    sequences: Tree,
    // Serializes site creation and teardown; row-level writes do not take it.
    site_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory database removed on drop.
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            sites: db.open_tree("sites")?,
            site_urls: db.open_tree("site_urls")?,
            pages: db.open_tree("pages")?,
            site_pages: db.open_tree("site_pages")?,
            page_paths: db.open_tree("page_paths")?,
            lemmas: db.open_tree("lemmas")?,
            lemma_keys: db.open_tree("lemma_keys")?,
            lemma_freq: db.open_tree("lemma_freq")?,
            postings: db.open_tree("postings")?,
            page_postings: db.open_tree("page_postings")?,
            sequences: db.open_tree("sequences")?,
            site_lock: Arc::new(Mutex::new(())),
            db,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // --- sites ---

    /// Drops every row of the site registered under `url` (if any), resets the
    /// site sequence and registers a fresh site in `INDEXING` state.
    pub fn recreate_site(&self, url: &str, name: &str) -> Result<Site> {
        let _guard = self.site_lock.lock();
        if let Some(existing) = self.find_site_by_url(url)? {
            self.delete_site_locked(existing.id)?;
            self.reset_site_sequence()?;
        }
        self.insert_site_locked(url, name, SiteStatus::Indexing)
    }

    /// Registers a site without touching existing rows; returns the existing
    /// site when the url is already known.
    pub fn find_or_create_site(&self, url: &str, name: &str) -> Result<Site> {
        let _guard = self.site_lock.lock();
        match self.find_site_by_url(url)? {
            Some(site) => Ok(site),
            None => self.insert_site_locked(url, name, SiteStatus::Indexing),
        }
    }

    fn insert_site_locked(&self, url: &str, name: &str, status: SiteStatus) -> Result<Site> {
        let url = url.trim_end_matches('/');
        let id = self.next_site_id()?;
        let site = Site {
            id,
            url: url.to_string(),
            name: name.to_string(),
            status,
            status_time: OffsetDateTime::now_utc(),
            last_error: None,
        };
        self.sites.insert(id_key(id), bincode::serialize(&site)?)?;
        self.site_urls.insert(url.as_bytes(), &id_key(id)[..])?;
        Ok(site)
    }

    pub fn delete_site(&self, site_id: SiteId) -> Result<()> {
        let _guard = self.site_lock.lock();
        self.delete_site_locked(site_id)
    }

    fn delete_site_locked(&self, site_id: SiteId) -> Result<()> {
        let prefix = id_key(site_id);
        for entry in self.site_pages.scan_prefix(prefix) {
            let (key, _) = entry?;
            let page_id = suffix_id(&key, "site_pages")?;
            self.delete_page_rows(page_id)?;
            self.site_pages.remove(key)?;
        }
        for entry in self.page_paths.scan_prefix(prefix) {
            let (key, _) = entry?;
            self.page_paths.remove(key)?;
        }
        for entry in self.lemma_keys.scan_prefix(prefix) {
            let (key, value) = entry?;
            let lemma_id = decode_id(&value, "lemma_keys")?;
            self.lemmas.remove(id_key(lemma_id))?;
            self.lemma_freq.remove(id_key(lemma_id))?;
            self.lemma_keys.remove(key)?;
        }
        if let Some(site) = self.site(site_id)? {
            self.site_urls.remove(site.url.as_bytes())?;
        }
        self.sites.remove(id_key(site_id))?;
        Ok(())
    }

    fn next_site_id(&self) -> Result<SiteId> {
        let next = self.sequences.update_and_fetch(SITE_SEQUENCE, |old| {
            let current = old.and_then(|b| <[u8; 8]>::try_from(b).ok()).map_or(0, u64::from_be_bytes);
            Some((current + 1).to_be_bytes().to_vec())
        })?;
        match next {
            Some(bytes) => decode_id(&bytes, "sequences"),
            None => Err(Error::Corrupt { tree: "sequences", reason: "site sequence vanished".into() }),
        }
    }

    /// Rewinds the site sequence to the highest id still in use.
    pub fn reset_site_sequence(&self) -> Result<()> {
        let max = match self.sites.last()? {
            Some((key, _)) => decode_id(&key, "sites")?,
            None => 0,
        };
        self.sequences.insert(SITE_SEQUENCE, &max.to_be_bytes()[..])?;
        Ok(())
    }

    pub fn site(&self, site_id: SiteId) -> Result<Option<Site>> {
        match self.sites.get(id_key(site_id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn find_site_by_url(&self, url: &str) -> Result<Option<Site>> {
        match self.site_urls.get(url.trim_end_matches('/').as_bytes())? {
            Some(id) => self.site(decode_id(&id, "site_urls")?),
            None => Ok(None),
        }
    }

    pub fn sites(&self) -> Result<Vec<Site>> {
        self.sites
            .iter()
            .values()
            .map(|bytes| -> Result<Site> { Ok(bincode::deserialize(&bytes?)?) })
            .collect()
    }

    pub fn sites_with_status(&self, status: SiteStatus) -> Result<Vec<Site>> {
        Ok(self.sites()?.into_iter().filter(|s| s.status == status).collect())
    }

    /// Unconditionally sets the status and stamps `status_time`.
    pub fn set_site_status(&self, site_id: SiteId, status: SiteStatus, error: Option<String>) -> Result<()> {
        self.update_site(site_id, |site| {
            site.status = status;
            site.last_error = error.clone();
            true
        })
        .map(|_| ())
    }

    /// Moves a site from `from` to `to`. Returns false, leaving the record
    /// alone, when the current status is not `from`.
    pub fn transition_site_status(
        &self,
        site_id: SiteId,
        from: SiteStatus,
        to: SiteStatus,
        error: Option<String>,
    ) -> Result<bool> {
        self.update_site(site_id, |site| {
            if site.status != from {
                return false;
            }
            site.status = to;
            site.last_error = error.clone();
            true
        })
    }

    /// Fails every site still marked `INDEXING`; returns how many changed.
    pub fn fail_indexing_sites(&self, reason: &str) -> Result<usize> {
        let mut changed = 0;
        for site in self.sites_with_status(SiteStatus::Indexing)? {
            if self.transition_site_status(site.id, SiteStatus::Indexing, SiteStatus::Failed, Some(reason.to_string()))? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Compare-and-swap loop over one site record. `apply` returns false to
    /// abort without writing.
    fn update_site<F>(&self, site_id: SiteId, mut apply: F) -> Result<bool>
    where
        F: FnMut(&mut Site) -> bool,
    {
        let key = id_key(site_id);
        loop {
            let Some(current) = self.sites.get(key)? else {
                return Err(Error::SiteNotFound(site_id));
            };
            let mut site: Site = bincode::deserialize(&current)?;
            if !apply(&mut site) {
                return Ok(false);
            }
            site.status_time = OffsetDateTime::now_utc();
            let updated = bincode::serialize(&site)?;
            if self.sites.compare_and_swap(key, Some(&current), Some(updated))?.is_ok() {
                return Ok(true);
            }
        }
    }

    // --- pages ---

    pub fn save_page(&self, site_id: SiteId, path: &str, code: u16, content: &str) -> Result<Page> {
        let page = Page {
            id: self.db.generate_id()?,
            site_id,
            path: path.to_string(),
            code,
            content: content.to_string(),
        };
        self.pages.insert(id_key(page.id), bincode::serialize(&page)?)?;
        self.site_pages.insert(pair_key(site_id, page.id), EMPTY)?;
        self.page_paths.insert(scoped_key(site_id, path), &id_key(page.id)[..])?;
        Ok(page)
    }

    pub fn page(&self, page_id: PageId) -> Result<Option<Page>> {
        match self.pages.get(id_key(page_id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn find_page_by_path(&self, site_id: SiteId, path: &str) -> Result<Option<Page>> {
        match self.page_paths.get(scoped_key(site_id, path))? {
            Some(id) => self.page(decode_id(&id, "page_paths")?),
            None => Ok(None),
        }
    }

    pub fn count_pages(&self, site_id: SiteId) -> Result<u64> {
        Ok(self.site_pages.scan_prefix(id_key(site_id)).count() as u64)
    }

    pub fn total_pages(&self) -> u64 {
        self.pages.len() as u64
    }

    /// Removes a page, its postings and its path entry. Lemma frequencies are
    /// left to the caller.
    pub fn delete_page(&self, page: &Page) -> Result<()> {
        self.delete_page_rows(page.id)?;
        self.site_pages.remove(pair_key(page.site_id, page.id))?;
        let path_key = scoped_key(page.site_id, &page.path);
        if let Some(id) = self.page_paths.get(&path_key)? {
            if decode_id(&id, "page_paths")? == page.id {
                self.page_paths.remove(path_key)?;
            }
        }
        Ok(())
    }

    fn delete_page_rows(&self, page_id: PageId) -> Result<()> {
        for entry in self.page_postings.scan_prefix(id_key(page_id)) {
            let (key, _) = entry?;
            let lemma_id = suffix_id(&key, "page_postings")?;
            self.postings.remove(pair_key(lemma_id, page_id))?;
            self.page_postings.remove(key)?;
        }
        self.pages.remove(id_key(page_id))?;
        Ok(())
    }

    // --- lemmas ---

    /// Returns the id for (site, lemma), inserting it atomically if absent.
    pub fn find_or_create_lemma(&self, site_id: SiteId, lemma: &str) -> Result<LemmaId> {
        let key = scoped_key(site_id, lemma);
        if let Some(id) = self.lemma_keys.get(&key)? {
            return decode_id(&id, "lemma_keys");
        }
        let candidate = self.db.generate_id()?;
        match self.lemma_keys.compare_and_swap(&key, None::<&[u8]>, Some(&id_key(candidate)[..]))? {
            Ok(()) => {
                let record = LemmaRecord { site_id, lemma: lemma.to_string() };
                self.lemmas.insert(id_key(candidate), bincode::serialize(&record)?)?;
                Ok(candidate)
            }
            // Another worker won the race; use its id.
            Err(conflict) => match conflict.current {
                Some(id) => decode_id(&id, "lemma_keys"),
                None => Err(Error::Corrupt { tree: "lemma_keys", reason: "lost lemma key".into() }),
            },
        }
    }

    /// Atomically adds `delta` to the lemma frequency, saturating at zero.
    pub fn add_lemma_frequency(&self, lemma_id: LemmaId, delta: i64) -> Result<u64> {
        let updated = self.lemma_freq.update_and_fetch(id_key(lemma_id), |old| {
            let current = old.and_then(|b| <[u8; 8]>::try_from(b).ok()).map_or(0, u64::from_be_bytes);
            let next = if delta >= 0 {
                current.saturating_add(delta as u64)
            } else {
                current.saturating_sub(delta.unsigned_abs())
            };
            Some(next.to_be_bytes().to_vec())
        })?;
        match updated {
            Some(bytes) => decode_id(&bytes, "lemma_freq"),
            None => Ok(0),
        }
    }

    pub fn lemma_frequency(&self, lemma_id: LemmaId) -> Result<u64> {
        match self.lemma_freq.get(id_key(lemma_id))? {
            Some(bytes) => decode_id(&bytes, "lemma_freq"),
            None => Ok(0),
        }
    }

    pub fn find_lemma(&self, site_id: SiteId, lemma: &str) -> Result<Option<Lemma>> {
        let Some(id) = self.lemma_keys.get(scoped_key(site_id, lemma))? else {
            return Ok(None);
        };
        let id = decode_id(&id, "lemma_keys")?;
        Ok(Some(Lemma {
            id,
            site_id,
            lemma: lemma.to_string(),
            frequency: self.lemma_frequency(id)?,
        }))
    }

    pub fn lemmas_for_site(&self, site_id: SiteId) -> Result<Vec<Lemma>> {
        let prefix = id_key(site_id);
        let mut lemmas = Vec::new();
        for entry in self.lemma_keys.scan_prefix(prefix) {
            let (key, value) = entry?;
            let id = decode_id(&value, "lemma_keys")?;
            let text = String::from_utf8(key[8..].to_vec())
                .map_err(|e| Error::Corrupt { tree: "lemma_keys", reason: e.to_string() })?;
            lemmas.push(Lemma { id, site_id, lemma: text, frequency: self.lemma_frequency(id)? });
        }
        Ok(lemmas)
    }

    pub fn count_lemmas(&self, site_id: SiteId) -> Result<u64> {
        Ok(self.lemma_keys.scan_prefix(id_key(site_id)).count() as u64)
    }

    pub fn total_lemmas(&self) -> u64 {
        self.lemmas.len() as u64
    }

    // --- postings ---

    /// Creates or replaces the (page, lemma) posting.
    pub fn put_posting(&self, posting: Posting) -> Result<()> {
        self.postings.insert(pair_key(posting.lemma_id, posting.page_id), &posting.rank.to_be_bytes()[..])?;
        self.page_postings.insert(pair_key(posting.page_id, posting.lemma_id), EMPTY)?;
        Ok(())
    }

    pub fn delete_posting(&self, page_id: PageId, lemma_id: LemmaId) -> Result<()> {
        self.postings.remove(pair_key(lemma_id, page_id))?;
        self.page_postings.remove(pair_key(page_id, lemma_id))?;
        Ok(())
    }

    pub fn posting_rank(&self, page_id: PageId, lemma_id: LemmaId) -> Result<Option<f32>> {
        match self.postings.get(pair_key(lemma_id, page_id))? {
            Some(bytes) => {
                let raw = <[u8; 4]>::try_from(&bytes[..])
                    .map_err(|_| Error::Corrupt { tree: "postings", reason: "rank is not 4 bytes".into() })?;
                Ok(Some(f32::from_be_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    pub fn pages_with_lemma(&self, lemma_id: LemmaId) -> Result<HashSet<PageId>> {
        self.postings
            .scan_prefix(id_key(lemma_id))
            .keys()
            .map(|key| suffix_id(&key?, "postings"))
            .collect()
    }

    pub fn lemmas_of_page(&self, page_id: PageId) -> Result<Vec<LemmaId>> {
        self.page_postings
            .scan_prefix(id_key(page_id))
            .keys()
            .map(|key| suffix_id(&key?, "page_postings"))
            .collect()
    }
}

fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn pair_key(first: u64, second: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&first.to_be_bytes());
    key[8..].copy_from_slice(&second.to_be_bytes());
    key
}

fn scoped_key(site_id: SiteId, text: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + text.len());
    key.extend_from_slice(&site_id.to_be_bytes());
    key.extend_from_slice(text.as_bytes());
    key
}

fn decode_id(bytes: &[u8], tree: &'static str) -> Result<u64> {
    <[u8; 8]>::try_from(bytes)
        .map(u64::from_be_bytes)
        .map_err(|_| Error::Corrupt { tree, reason: format!("expected 8 bytes, got {}", bytes.len()) })
}

fn suffix_id(key: &[u8], tree: &'static str) -> Result<u64> {
    if key.len() != 16 {
        return Err(Error::Corrupt { tree, reason: format!("expected 16-byte key, got {}", key.len()) });
    }
    decode_id(&key[8..], tree)
}
