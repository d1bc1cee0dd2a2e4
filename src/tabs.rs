//! Tab descriptors as handed over by the host browser.
//!
//! The engine only reads tabs. The one thing derived from a tab is its
//! *text key*: `title + " " + registrable domain`, which is what gets
//! embedded and cached.

use serde::{Deserialize, Serialize};
use url::Url;

/// Leading host labels that carry no meaning for grouping.
const STRIPPED_SUBDOMAINS: &[&str] = &["www", "www2", "m", "mobile"];

/// An open browser tab.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TabDescriptor {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub pinned: bool,
}

impl TabDescriptor {
    pub fn new(id: u64, title: &str, url: &str) -> Self {
        Self {
            id,
            title: title.to_string(),
            url: url.to_string(),
            pinned: false,
        }
    }

    /// Registrable domain of the tab url, if the url has a host.
    pub fn domain(&self) -> Option<String> {
        registrable_domain(&self.url)
    }

    /// Text the embedding pipeline consumes for this tab.
    ///
    /// Falls back to the raw title, then the raw url, when the url cannot
    /// be parsed into a host.
    pub fn text_key(&self) -> String {
        let title = self.title.trim();

        match self.domain() {
            Some(domain) if title.is_empty() => domain,
            Some(domain) => format!("{title} {domain}"),
            None if !title.is_empty() => title.to_string(),
            None => {
                log::debug!("unparsable url {:?}, using it as text key", self.url);
                self.url.trim().to_string()
            }
        }
    }
}

/// Host name of `url` with a common leading subdomain stripped.
///
/// Returns `None` for urls without a host (`about:blank`, garbage input).
pub fn registrable_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?.trim_end_matches('.').to_lowercase();

    if host.is_empty() {
        return None;
    }

    let stripped = match host.split_once('.') {
        Some((first, rest)) if STRIPPED_SUBDOMAINS.contains(&first) && rest.contains('.') => {
            rest.to_string()
        }
        _ => host,
    };

    Some(stripped)
}
