use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("invalid site URL: {0}")]
    InvalidUrl(String),
    #[error("invalid exclude pattern {pattern}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub sites: Vec<SiteConfig>,
    pub indexing: IndexingSettings,
    pub search: SearchSettings,
    pub orchestrator: OrchestratorSettings,
    pub storage: StorageSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteConfig {
    pub url: String,
    pub name: String,
}

impl SiteConfig {
    /// Site URL without its trailing slash, the form stored on `Site.url`.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// True when `url` is this site's base URL or lies beneath it.
    pub fn contains(&self, url: &str) -> bool {
        let base = self.base_url();
        match url.strip_prefix(base) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexingSettings {
    pub user_agent: String,
    pub timeout_ms: u64,
    pub min_delay_ms: u64,
    pub max_retries: u32,
    pub max_depth: u32,
    /// Per-domain depth overrides, keyed by host without a leading `www.`.
    pub site_depths: HashMap<String, u32>,
    pub max_pages_per_site: usize,
    pub max_concurrent_pages: usize,
    /// Regexes that must match the whole page path to exclude it.
    pub exclude_patterns: Vec<String>,
    pub delays: DelaySettings,
}

impl Default for IndexingSettings {
    fn default() -> Self {
        Self {
            user_agent: "sitesearch-bot/0.1 (+https://example.com/bot)".to_string(),
            timeout_ms: 10_000,
            min_delay_ms: 500,
            max_retries: 3,
            max_depth: 5,
            site_depths: HashMap::new(),
            max_pages_per_site: 1000,
            max_concurrent_pages: 8,
            exclude_patterns: Vec::new(),
            delays: DelaySettings::default(),
        }
    }
}

impl IndexingSettings {
    pub fn max_depth_for(&self, domain: &str) -> u32 {
        self.site_depths.get(domain).copied().unwrap_or(self.max_depth)
    }

    pub fn delay_for(&self, domain: &str) -> u64 {
        self.delays
            .site_specific
            .get(domain)
            .copied()
            .unwrap_or(self.delays.default)
    }

    /// Compiles `exclude_patterns`, anchored so each must match the full path.
    pub fn compiled_exclude_patterns(&self) -> Result<Vec<Regex>, ConfigError> {
        self.exclude_patterns
            .iter()
            .map(|pattern| {
                Regex::new(&format!("^(?:{pattern})$")).map_err(|source| {
                    ConfigError::InvalidPattern {
                        pattern: pattern.clone(),
                        source,
                    }
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DelaySettings {
    pub default: u64,
    pub site_specific: HashMap<String, u64>,
}

impl Default for DelaySettings {
    fn default() -> Self {
        Self {
            default: 1000,
            site_specific: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchSettings {
    /// Lemmas present on more than this share of a site's pages are ignored.
    pub frequency_threshold: f64,
    pub excluded_path_markers: Vec<String>,
    pub untitled_placeholder: String,
    pub default_limit: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            frequency_threshold: 0.8,
            excluded_path_markers: vec!["/admin/".to_string(), "/api/".to_string()],
            untitled_placeholder: "Без названия".to_string(),
            default_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub max_site_workers: usize,
    pub workers_per_site: usize,
    pub monitor_interval_ms: u64,
    pub stop_grace_ms: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_site_workers: 32,
            workers_per_site: 4,
            monitor_interval_ms: 5000,
            stop_grace_ms: 10_000,
        }
    }
}

impl OrchestratorSettings {
    pub fn pool_size(&self, site_count: usize) -> usize {
        self.max_site_workers
            .min(site_count.saturating_mul(self.workers_per_site))
            .max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageSettings {
    pub path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/index"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), sites = settings.sites.len(), "loaded settings");
        Ok(settings)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for site in &self.sites {
            let url = Url::parse(&site.url).map_err(|_| ConfigError::InvalidUrl(site.url.clone()))?;
            if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
                return Err(ConfigError::InvalidUrl(site.url.clone()));
            }
        }
        if self.indexing.max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "indexing.max_retries",
                reason: "must be at least 1".into(),
            });
        }
        if self.indexing.max_concurrent_pages == 0 {
            return Err(ConfigError::InvalidValue {
                field: "indexing.max_concurrent_pages",
                reason: "must be at least 1".into(),
            });
        }
        let threshold = self.search.frequency_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "search.frequency_threshold",
                reason: format!("{threshold} is outside (0, 1]"),
            });
        }
        self.indexing.compiled_exclude_patterns()?;
        Ok(())
    }

    /// The configured site whose base URL is the longest prefix of `url`.
    pub fn site_for_url(&self, url: &str) -> Option<&SiteConfig> {
        self.sites
            .iter()
            .filter(|site| site.contains(url))
            .max_by_key(|site| site.base_url().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[sites]]
        url = "https://www.playback.ru/"
        name = "PlayBack.Ru"

        [[sites]]
        url = "https://volochek.life"
        name = "Волочёк"

        [indexing]
        max_retries = 2
        exclude_patterns = ["/tag/.*"]

        [indexing.site_depths]
        "playback.ru" = 2

        [indexing.delays]
        default = 300
        site_specific = { "volochek.life" = 900 }
    "#;

    #[test]
    fn parses_sample_with_defaults() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        assert_eq!(settings.sites.len(), 2);
        assert_eq!(settings.indexing.max_retries, 2);
        assert_eq!(settings.indexing.timeout_ms, 10_000);
        assert_eq!(settings.indexing.max_depth_for("playback.ru"), 2);
        assert_eq!(settings.indexing.max_depth_for("volochek.life"), 5);
        assert_eq!(settings.indexing.delay_for("volochek.life"), 900);
        assert_eq!(settings.indexing.delay_for("other.ru"), 300);
        assert_eq!(settings.search.frequency_threshold, 0.8);
    }

    #[test]
    fn exclude_patterns_match_whole_path() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        let patterns = settings.indexing.compiled_exclude_patterns().unwrap();
        assert!(patterns[0].is_match("/tag/news"));
        assert!(!patterns[0].is_match("/blog/tag/news"));
    }

    #[test]
    fn rejects_invalid_values() {
        let bad_url = "[[sites]]\nurl = \"ftp://files\"\nname = \"x\"\n";
        assert!(matches!(Settings::from_toml_str(bad_url), Err(ConfigError::InvalidUrl(_))));

        let bad_retries = "[indexing]\nmax_retries = 0\n";
        assert!(matches!(
            Settings::from_toml_str(bad_retries),
            Err(ConfigError::InvalidValue { field: "indexing.max_retries", .. })
        ));

        let bad_pattern = "[indexing]\nexclude_patterns = [\"(\"]\n";
        assert!(matches!(
            Settings::from_toml_str(bad_pattern),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn site_lookup_respects_path_boundaries() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        let site = settings.site_for_url("https://www.playback.ru/catalog/1.html").unwrap();
        assert_eq!(site.name, "PlayBack.Ru");
        assert!(settings.site_for_url("https://volochek.life.evil.com/").is_none());
        assert!(settings.site_for_url("https://example.com/").is_none());
    }

    #[test]
    fn pool_size_is_capped() {
        let orchestrator = OrchestratorSettings::default();
        assert_eq!(orchestrator.pool_size(3), 12);
        assert_eq!(orchestrator.pool_size(100), 32);
        assert_eq!(orchestrator.pool_size(0), 1);
    }
}
