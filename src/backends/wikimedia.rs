//! Title-based image search against Wikimedia Commons.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{http_get_json, query_url, run_blocking, MediaSearch};

const COMMONS_API_URL: &str = "https://commons.wikimedia.org/w/api.php";
const SEARCH_LIMIT: &str = "12";
const THUMB_WIDTH_PX: &str = "1200";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(6);

pub struct WikimediaSearch {
    http_client: ureq::Agent,
}

impl WikimediaSearch {
    pub fn new(http_client: ureq::Agent) -> Self {
        Self { http_client }
    }

    fn search_url(title: &str) -> String {
        query_url(
            COMMONS_API_URL,
            &[
                ("action", "query"),
                ("format", "json"),
                ("generator", "search"),
                ("gsrsearch", title),
                ("gsrnamespace", "6"),
                ("gsrlimit", SEARCH_LIMIT),
                ("prop", "imageinfo"),
                ("iiprop", "url|mime"),
                ("iiurlwidth", THUMB_WIDTH_PX),
            ],
        )
    }

    /// Image URLs in search-rank order, skipping non-raster files.
    pub(crate) fn parse_image_urls(body: &Value) -> Vec<String> {
        let Some(pages) = body.pointer("/query/pages").and_then(Value::as_object) else {
            return Vec::new();
        };
        let mut ranked: Vec<(i64, String)> = pages
            .values()
            .filter_map(|page| {
                let rank = page.get("index").and_then(Value::as_i64).unwrap_or(i64::MAX);
                let info = page.get("imageinfo")?.as_array()?.first()?;
                let mime = info.get("mime").and_then(Value::as_str).unwrap_or("");
                if !mime.is_empty() && !matches!(mime, "image/jpeg" | "image/png" | "image/webp") {
                    return None;
                }
                let url = info
                    .get("thumburl")
                    .or_else(|| info.get("url"))
                    .and_then(Value::as_str)?;
                Some((rank, url.to_string()))
            })
            .collect();
        ranked.sort_by_key(|(rank, _)| *rank);
        ranked.into_iter().map(|(_, url)| url).collect()
    }
}

#[async_trait]
impl MediaSearch for WikimediaSearch {
    async fn search(&self, title: &str) -> Result<Vec<String>, String> {
        let agent = self.http_client.clone();
        let url = Self::search_url(title);
        run_blocking(move || {
            let body = http_get_json(&agent, &url, SEARCH_TIMEOUT)?;
            Ok(body
                .map(|body| Self::parse_image_urls(&body))
                .unwrap_or_default())
        })
        .await
    }
}
