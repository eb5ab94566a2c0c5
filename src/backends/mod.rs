//! Collaborator abstractions and concrete HTTP adapters.
//!
//! The AI services (title search, visual verification, photo cleanup and
//! synthetic generation) are only described here; callers inject their own
//! implementations.

pub mod http_fetcher;
pub mod open_food_facts;
pub mod upcitemdb;
pub mod wikimedia;

use std::time::Duration;

use async_trait::async_trait;

use crate::protocol::{AiSearchResult, GalleryItem, LookupResult, LookupSource};

/// Free product-database lookup by identifier.
#[async_trait]
pub trait ProductLookup: Send + Sync {
    fn source(&self) -> LookupSource;

    /// Returns `Ok(None)` when the database does not know the identifier.
    async fn lookup(
        &self,
        identifier: &str,
        deadline: Duration,
    ) -> Result<Option<LookupResult>, String>;
}

/// Best-effort title-based image search.
#[async_trait]
pub trait MediaSearch: Send + Sync {
    async fn search(&self, title: &str) -> Result<Vec<String>, String>;
}

/// AI-backed title search used when media search comes up short.
#[async_trait]
pub trait AiTitleSearch: Send + Sync {
    async fn search(&self, title: &str) -> Result<AiSearchResult, String>;
}

/// Downloads raw image bytes for a candidate URL.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, String>;
}

/// External judge deciding whether an image depicts the expected product.
#[async_trait]
pub trait VerificationOracle: Send + Sync {
    async fn verify(
        &self,
        image_bytes: &[u8],
        expected_title: &str,
        source_url: &str,
    ) -> Result<bool, String>;
}

/// Turns a verified real photo into a cleaned product shot.
#[async_trait]
pub trait PhotoCleaner: Send + Sync {
    async fn clean(&self, image_bytes: &[u8], expected_title: &str) -> Result<Vec<u8>, String>;
}

/// AI image generation seeded from an existing gallery photo.
#[async_trait]
pub trait SyntheticGenerator: Send + Sync {
    async fn generate(
        &self,
        seed_image_bytes: &[u8],
        title: &str,
        count: usize,
        offset: usize,
    ) -> Result<Vec<GalleryItem>, String>;
}

/// Builds the blocking HTTP agent shared by the adapters.
pub fn build_http_agent(http: &crate::config::HttpConfig) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(http.connect_timeout())
        .timeout_read(http.read_timeout())
        .timeout_write(http.read_timeout())
        .user_agent(&http.user_agent)
        .build()
}

/// Runs a blocking `ureq` call off the async scheduler thread.
///
/// A panic in the worker is resumed on the calling task so the session sees
/// it as a collaborator failure rather than an ordinary request error.
pub(crate) async fn run_blocking<T, F>(operation: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, String> + Send + 'static,
{
    match tokio::task::spawn_blocking(operation).await {
        Ok(result) => result,
        Err(error) if error.is_panic() => std::panic::resume_unwind(error.into_panic()),
        Err(error) => Err(format!("HTTP worker failed: {error}")),
    }
}

pub(crate) fn http_get_json(
    agent: &ureq::Agent,
    url: &str,
    timeout: Duration,
) -> Result<Option<serde_json::Value>, String> {
    let response = match agent
        .get(url)
        .set("Accept", "application/json")
        .timeout(timeout)
        .call()
    {
        Ok(response) => response,
        Err(ureq::Error::Status(404, _)) => return Ok(None),
        Err(error) => return Err(format!("Request failed: {error}")),
    };
    response
        .into_json::<serde_json::Value>()
        .map(Some)
        .map_err(|error| format!("Invalid JSON response: {error}"))
}

pub(crate) fn query_url(base: &str, params: &[(&str, &str)]) -> String {
    let mut url = base.to_string();
    if params.is_empty() {
        return url;
    }

    url.push('?');
    for (index, (key, value)) in params.iter().enumerate() {
        if index > 0 {
            url.push('&');
        }
        url.push_str(key);
        url.push('=');
        url.push_str(urlencoding::encode(value).as_ref());
    }
    url
}
