use serde::Serialize;

use crate::error::Result;
use crate::model::SiteStatus;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotalStatistics {
    pub sites: u64,
    pub pages: u64,
    pub lemmas: u64,
    pub indexing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteStatistics {
    pub url: String,
    pub name: String,
    pub status: SiteStatus,
    /// Seconds since the Unix epoch.
    pub status_time: i64,
    pub error: Option<String>,
    pub pages: u64,
    pub lemmas: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub total: TotalStatistics,
    pub detailed: Vec<SiteStatistics>,
}

/// Snapshot of every site in the store. `indexing` comes from the caller,
/// which knows whether a run is in flight.
pub fn collect(store: &Store, indexing: bool) -> Result<Statistics> {
    let mut detailed = Vec::new();
    for site in store.sites()? {
        detailed.push(SiteStatistics {
            pages: store.count_pages(site.id)?,
            lemmas: store.count_lemmas(site.id)?,
            url: site.url,
            name: site.name,
            status: site.status,
            status_time: site.status_time.unix_timestamp(),
            error: site.last_error,
        });
    }
    let total = TotalStatistics {
        sites: detailed.len() as u64,
        pages: detailed.iter().map(|s| s.pages).sum(),
        lemmas: detailed.iter().map(|s| s.lemmas).sum(),
        indexing,
    };
    Ok(Statistics { total, detailed })
}
