//! Merges candidate image URLs from media search, lookup results and the
//! AI title search fallback.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, warn};

use crate::backends::{AiTitleSearch, MediaSearch};
use crate::config::PipelineConfig;

/// Accepts absolute `http`/`https` URLs with a host and no whitespace.
pub fn is_well_formed_http_url(url: &str) -> bool {
    if url.chars().any(|ch| ch.is_whitespace() || ch.is_control()) {
        return false;
    }
    let lowered = url.to_ascii_lowercase();
    let Some(rest) = lowered
        .strip_prefix("https://")
        .or_else(|| lowered.strip_prefix("http://"))
    else {
        return false;
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host = authority.rsplit('@').next().unwrap_or("");
    let host = host.split(':').next().unwrap_or("");
    !host.is_empty()
}

/// Ordered URL list deduplicated by exact string and capped in length.
struct MergedUrls {
    urls: Vec<String>,
    seen: HashSet<String>,
    cap: usize,
}

impl MergedUrls {
    fn new(cap: usize) -> Self {
        Self {
            urls: Vec::new(),
            seen: HashSet::new(),
            cap,
        }
    }

    fn extend<'a>(&mut self, urls: impl IntoIterator<Item = &'a String>) {
        for url in urls {
            let url = url.trim();
            if !is_well_formed_http_url(url) {
                debug!("Skipping malformed candidate URL {:?}", url);
                continue;
            }
            if self.urls.len() < self.cap && self.seen.insert(url.to_string()) {
                self.urls.push(url.to_string());
            }
        }
    }
}

pub struct CandidateCollector {
    media_search: Arc<dyn MediaSearch>,
    ai_search: Option<Arc<dyn AiTitleSearch>>,
    max_candidates: usize,
    ai_search_threshold: usize,
}

impl CandidateCollector {
    pub fn new(
        media_search: Arc<dyn MediaSearch>,
        ai_search: Option<Arc<dyn AiTitleSearch>>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            media_search,
            ai_search,
            max_candidates: config.max_candidates,
            ai_search_threshold: config.ai_search_threshold,
        }
    }

    /// Collects candidate URLs for `title` in priority order.
    pub async fn collect(&self, title: &str, known_images: &[String]) -> Vec<String> {
        let mut merged = MergedUrls::new(self.max_candidates);

        let media_urls = match self.media_search.search(title).await {
            Ok(urls) => urls,
            Err(error) => {
                warn!("Media search failed for '{}': {}", title, error);
                Vec::new()
            }
        };
        merged.extend(&media_urls);
        // Distinct media URLs decide whether the AI search runs.
        let media_count = merged.urls.len();
        merged.extend(known_images);

        if media_count < self.ai_search_threshold {
            if let Some(ai_search) = &self.ai_search {
                match ai_search.search(title).await {
                    Ok(result) => {
                        debug!(
                            "AI search for '{}' matched '{}' with {} images",
                            title,
                            result.title,
                            result.images.len()
                        );
                        merged.extend(&result.images);
                    }
                    Err(error) => warn!("AI title search failed for '{}': {}", title, error),
                }
            }
        }

        merged.urls
    }
}
