//! Open Food Facts product lookup (DB_A).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{http_get_json, query_url, run_blocking, ProductLookup};
use crate::protocol::{LookupResult, LookupSource};

const OPEN_FOOD_FACTS_PRODUCT_URL: &str = "https://world.openfoodfacts.org/api/v2/product";
const PRODUCT_FIELDS: &str = "product_name,brands,image_front_url,image_url";

pub struct OpenFoodFactsLookup {
    http_client: ureq::Agent,
}

impl OpenFoodFactsLookup {
    pub fn new(http_client: ureq::Agent) -> Self {
        Self { http_client }
    }

    fn product_url(identifier: &str) -> String {
        query_url(
            &format!("{OPEN_FOOD_FACTS_PRODUCT_URL}/{identifier}.json"),
            &[("fields", PRODUCT_FIELDS)],
        )
    }

    fn non_empty(value: &Value) -> Option<String> {
        value
            .as_str()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    }

    pub(crate) fn parse_product(identifier: &str, body: &Value) -> Option<LookupResult> {
        if body.get("status").and_then(Value::as_i64) != Some(1) {
            return None;
        }
        let product = body.get("product")?;
        let title = Self::non_empty(&product["product_name"]);
        // Brands come back as a comma separated list; the first is the owner.
        let brand = Self::non_empty(&product["brands"]).and_then(|brands| {
            brands
                .split(',')
                .map(str::trim)
                .find(|brand| !brand.is_empty())
                .map(str::to_string)
        });
        let mut images = Vec::new();
        for field in ["image_front_url", "image_url"] {
            if let Some(url) = Self::non_empty(&product[field]) {
                if !images.contains(&url) {
                    images.push(url);
                }
            }
        }
        if title.is_none() && images.is_empty() {
            return None;
        }
        Some(LookupResult {
            identifier: identifier.to_string(),
            title,
            brand,
            images,
            source: LookupSource::DbA,
        })
    }
}

#[async_trait]
impl ProductLookup for OpenFoodFactsLookup {
    fn source(&self) -> LookupSource {
        LookupSource::DbA
    }

    async fn lookup(
        &self,
        identifier: &str,
        deadline: Duration,
    ) -> Result<Option<LookupResult>, String> {
        let agent = self.http_client.clone();
        let identifier = identifier.to_string();
        run_blocking(move || {
            let body = http_get_json(&agent, &Self::product_url(&identifier), deadline)?;
            Ok(body.and_then(|body| Self::parse_product(&identifier, &body)))
        })
        .await
    }
}
