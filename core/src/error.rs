use thiserror::Error;

use crate::config::ConfigError;
use crate::model::SiteId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("corrupt record in tree `{tree}`: {reason}")]
    Corrupt { tree: &'static str, reason: String },

    #[error("site {0} not found")]
    SiteNotFound(SiteId),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
