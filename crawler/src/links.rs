use lazy_static::lazy_static;
use regex::Regex;
use url::{Position, Url};

lazy_static! {
    static ref DENYLIST: Regex =
        Regex::new(r"(\.(php|asp|aspx|jsp|cgi|do|action)|\?|&|#|login|admin|auth|register)")
            .expect("valid regex");
}

/// A same-site link found on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Normalized path relative to the site root.
    pub path: String,
    /// Path, query and fragment as resolved, before normalization.
    pub raw: String,
    /// The resolved URL, fetched as written.
    pub url: Url,
}

/// The part of the web one site crawl may touch: everything under the base URL.
#[derive(Debug, Clone)]
pub struct CrawlScope {
    base: Url,
    /// Base path without its trailing slash; empty for a host root.
    base_path: String,
}

impl CrawlScope {
    pub fn new(base_url: &str) -> Result<Self, url::ParseError> {
        let base = Url::parse(base_url)?;
        let base_path = normalize_path(base.path());
        let base_path = if base_path == "/" { String::new() } else { base_path };
        Ok(Self { base, base_path })
    }

    /// Host without a leading `www.`, the key for per-domain settings.
    pub fn domain(&self) -> String {
        let host = self.base.host_str().unwrap_or_default();
        host.strip_prefix("www.").unwrap_or(host).to_string()
    }

    /// Where a crawl starts: the base URL as configured.
    pub fn root(&self) -> Url {
        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        url
    }

    /// Site-relative path of `url`, or `None` when it lies outside the scope.
    pub fn path_of(&self, url: &Url) -> Option<String> {
        if url.scheme() != self.base.scheme()
            || url.host_str() != self.base.host_str()
            || url.port_or_known_default() != self.base.port_or_known_default()
        {
            return None;
        }
        let path = normalize_path(url.path());
        let rest = path.strip_prefix(self.base_path.as_str())?;
        match rest {
            "" => Some("/".to_string()),
            rest if rest.starts_with('/') => Some(rest.to_string()),
            _ => None,
        }
    }

    /// Resolves `href` found on `current` into an in-scope link.
    pub fn resolve(&self, current: &Url, href: &str) -> Option<Link> {
        let href = href.trim();
        let lower = href.to_ascii_lowercase();
        if href.is_empty()
            || href.starts_with('#')
            || lower.starts_with("mailto:")
            || lower.starts_with("javascript:")
        {
            return None;
        }
        let target = current.join(href).ok()?;
        let path = self.path_of(&target)?;
        let raw = target[Position::BeforePath..].to_string();
        Some(Link { path, raw, url: target })
    }
}

/// Collapses repeated slashes and drops the trailing one; the root is `/`.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// Built-in rejections: dynamic pages, queries, fragments and account areas.
pub fn is_denied(raw: &str) -> bool {
    DENYLIST.is_match(&raw.to_lowercase())
}
