//! Image download over HTTP(S) with a body size cap.

use std::io::Read;

use async_trait::async_trait;

use super::{run_blocking, ImageFetcher};

pub struct HttpImageFetcher {
    http_client: ureq::Agent,
    max_image_bytes: u64,
}

impl HttpImageFetcher {
    pub fn new(http_client: ureq::Agent, max_image_bytes: u64) -> Self {
        Self {
            http_client,
            max_image_bytes,
        }
    }

    fn read_capped(reader: impl Read, max_image_bytes: u64) -> Result<Vec<u8>, String> {
        let mut bytes = Vec::new();
        reader
            .take(max_image_bytes.saturating_add(1))
            .read_to_end(&mut bytes)
            .map_err(|error| format!("Image read failed: {error}"))?;
        if bytes.is_empty() {
            return Err("Image response was empty".to_string());
        }
        if bytes.len() as u64 > max_image_bytes {
            return Err(format!("Image exceeds {max_image_bytes} bytes"));
        }
        Ok(bytes)
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, String> {
        let agent = self.http_client.clone();
        let url = url.to_string();
        let max_image_bytes = self.max_image_bytes;
        run_blocking(move || {
            let response = agent
                .get(&url)
                .set("Accept", "image/*")
                .call()
                .map_err(|error| format!("Image request failed: {error}"))?;
            Self::read_capped(response.into_reader(), max_image_bytes)
        })
        .await
    }
}
