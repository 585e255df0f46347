pub mod config;
pub mod error;
pub mod html;
pub mod index;
pub mod lemma;
pub mod model;
pub mod morphology;
pub mod search;
pub mod snippet;
pub mod stats;
pub mod store;

pub use config::{ConfigError, Settings, SiteConfig};
pub use error::{Error, Result};
pub use index::IndexBuilder;
pub use lemma::LemmaExtractor;
pub use model::{Lemma, LemmaId, Page, PageId, Posting, Site, SiteId, SiteStatus};
pub use search::{SearchEngine, SearchError, SearchHit, SearchRequest, SearchResults};
pub use store::Store;
