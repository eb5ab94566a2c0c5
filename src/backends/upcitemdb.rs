//! UPCitemdb trial API product lookup (DB_B).

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::state::NotKeyed;
use governor::{Quota, RateLimiter};
use serde_json::Value;

use super::{http_get_json, query_url, run_blocking, ProductLookup};
use crate::protocol::{LookupResult, LookupSource};

const UPCITEMDB_LOOKUP_URL: &str = "https://api.upcitemdb.com/prod/trial/lookup";

pub struct UpcItemDbLookup {
    http_client: ureq::Agent,
    limiter: RateLimiter<NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>,
}

impl UpcItemDbLookup {
    pub fn new(http_client: ureq::Agent, requests_per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            http_client,
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
        }
    }

    pub(crate) fn parse_items(identifier: &str, body: &Value) -> Option<LookupResult> {
        if body.get("code").and_then(Value::as_str) != Some("OK") {
            return None;
        }
        let item = body.get("items")?.as_array()?.first()?;
        let text = |key: &str| {
            item.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        let mut images: Vec<String> = Vec::new();
        for url in item
            .get("images")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
        {
            let url = url.trim().to_string();
            if !url.is_empty() && !images.contains(&url) {
                images.push(url);
            }
        }
        Some(LookupResult {
            identifier: identifier.to_string(),
            title: text("title"),
            brand: text("brand"),
            images,
            source: LookupSource::DbB,
        })
    }
}

#[async_trait]
impl ProductLookup for UpcItemDbLookup {
    fn source(&self) -> LookupSource {
        LookupSource::DbB
    }

    async fn lookup(
        &self,
        identifier: &str,
        deadline: Duration,
    ) -> Result<Option<LookupResult>, String> {
        self.limiter.until_ready().await;
        let agent = self.http_client.clone();
        let identifier = identifier.to_string();
        run_blocking(move || {
            let url = query_url(UPCITEMDB_LOOKUP_URL, &[("upc", identifier.as_str())]);
            let body = http_get_json(&agent, &url, deadline)?;
            Ok(body.and_then(|body| Self::parse_items(&identifier, &body)))
        })
        .await
    }
}
