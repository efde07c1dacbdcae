use crate::browser::BrowserPage;
use crate::error::{Result, ScanError};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub base_url: String,
    /// Path and query with a `{page}` placeholder.
    pub search_path: String,
    /// Substring every detail link contains.
    pub detail_marker: String,
    pub navigation_timeout: Duration,
    pub link_wait: Duration,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            base_url: "https://open.overheid.nl".to_string(),
            search_path: "/zoeken?zoeken=&pagina={page}".to_string(),
            detail_marker: "/details/".to_string(),
            navigation_timeout: Duration::from_secs(60),
            link_wait: Duration::from_secs(10),
        }
    }
}

/// Walks the numbered search-result pages and pulls out detail links.
pub struct SearchPaginator {
    options: SearchOptions,
    base: Url,
}

impl SearchPaginator {
    pub fn new(options: SearchOptions) -> Result<Self> {
        let base = Url::parse(&options.base_url)
            .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", options.base_url, e)))?;
        Ok(Self { options, base })
    }

    pub fn search_url(&self, page_index: u32) -> String {
        let path = self
            .options
            .search_path
            .replace("{page}", &page_index.to_string());
        format!("{}{}", self.options.base_url.trim_end_matches('/'), path)
    }

    pub fn link_selector(&self) -> String {
        format!("a[href*='{}']", self.options.detail_marker)
    }

    /// Detail links on search page `page_index`, deduplicated and sorted.
    ///
    /// An empty result means the catalog has no page `page_index`. Navigation
    /// failures are errors, not an empty page.
    pub async fn collect_links(&self, page: &dyn BrowserPage, page_index: u32) -> Result<Vec<String>> {
        let url = self.search_url(page_index);
        info!("Collecting URLs from page {}: {}", page_index, url);

        page.goto(&url, self.options.navigation_timeout).await?;

        let selector = self.link_selector();
        if !page.wait_for_selector(&selector, self.options.link_wait).await? {
            info!("No detail links found on page {}", page_index);
            return Ok(Vec::new());
        }

        let hrefs = page.attribute_values(&selector, "href").await?;
        let links: BTreeSet<String> = hrefs
            .iter()
            .filter_map(|href| self.resolve(href))
            .collect();

        debug!("Page {}: {} anchors, {} distinct detail links", page_index, hrefs.len(), links.len());
        Ok(links.into_iter().collect())
    }

    fn resolve(&self, href: &str) -> Option<String> {
        let mut resolved = self.base.join(href.trim()).ok()?;
        resolved.set_fragment(None);
        let resolved = resolved.to_string();
        resolved
            .contains(&self.options.detail_marker)
            .then_some(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{PageScript, ScriptedPage};

    fn paginator() -> SearchPaginator {
        SearchPaginator::new(SearchOptions {
            base_url: "https://x".to_string(),
            ..SearchOptions::default()
        })
        .unwrap()
    }

    #[test]
    fn test_search_url_fills_page_placeholder() {
        assert_eq!(paginator().search_url(3), "https://x/zoeken?zoeken=&pagina=3");
    }

    #[test]
    fn test_link_selector_uses_marker() {
        assert_eq!(paginator().link_selector(), "a[href*='/details/']");
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let result = SearchPaginator::new(SearchOptions {
            base_url: "not a url".to_string(),
            ..SearchOptions::default()
        });
        assert!(matches!(result, Err(ScanError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_collect_links_resolves_and_deduplicates() {
        let page = ScriptedPage::new().with_page(
            "https://x/zoeken?zoeken=&pagina=1",
            PageScript::new()
                .link("/details/ronl-1")
                .link("/details/ronl-2")
                .link("/details/ronl-1")
                .link("https://x/details/ronl-2#top")
                .link("/over-ons"),
        );

        let links = paginator().collect_links(&page, 1).await.unwrap();
        assert_eq!(links, vec!["https://x/details/ronl-1", "https://x/details/ronl-2"]);
    }

    #[tokio::test]
    async fn test_page_without_links_is_empty() {
        let page = ScriptedPage::new();
        let links = paginator().collect_links(&page, 99).await.unwrap();
        assert!(links.is_empty());
    }

    #[tokio::test]
    async fn test_navigation_timeout_is_an_error() {
        let page = ScriptedPage::new().with_page(
            "https://x/zoeken?zoeken=&pagina=2",
            PageScript::new().link("/details/ronl-9").timeout(),
        );
        let err = paginator().collect_links(&page, 2).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
