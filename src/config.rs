//! Persistent pipeline configuration model and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};

use crate::protocol::LookupSource;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Screening, verification and gallery limits.
    pub pipeline: PipelineConfig,
    #[serde(default)]
    /// Free product-database lookup behavior.
    pub lookup: LookupConfig,
    #[serde(default)]
    /// Lookup cache storage.
    pub cache: CacheConfig,
    #[serde(default)]
    /// Outbound HTTP client settings.
    pub http: HttpConfig,
}

/// Limits applied by the batch scheduler, verification gate and assembler.
///
/// These encode rate-limit tuning for remote hosts and the verification
/// oracle rather than correctness requirements.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_pacing_ms")]
    pub batch_pacing_ms: u64,
    /// Maximum verification oracle calls per session.
    #[serde(default = "default_verification_budget")]
    pub verification_budget: u32,
    /// Maximum verified candidates admitted per session.
    #[serde(default = "default_max_admitted")]
    pub max_admitted: usize,
    /// Scheduling stops once this many candidates are accepted.
    #[serde(default = "default_target_accepted")]
    pub target_accepted: usize,
    #[serde(default = "default_gallery_size")]
    pub gallery_size: usize,
    #[serde(default = "default_min_dimension_px")]
    pub min_dimension_px: u32,
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    /// AI title search runs when media search yields fewer URLs than this.
    #[serde(default = "default_ai_search_threshold")]
    pub ai_search_threshold: usize,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LookupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_lookup_deadline_ms")]
    pub deadline_ms: u64,
    #[serde(default = "default_lookup_ttl_days")]
    pub ttl_days: u32,
    /// Sources queried in order for each identifier variant.
    #[serde(default = "default_lookup_sources")]
    pub sources: Vec<LookupSource>,
    /// Requests per minute allowed against the UPCitemdb trial endpoint.
    #[serde(default = "default_upcitemdb_requests_per_minute")]
    pub upcitemdb_requests_per_minute: u32,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CacheConfig {
    /// SQLite database path; the user cache directory is used when unset.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default = "default_cache_namespace")]
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
}

impl PipelineConfig {
    pub fn batch_pacing(&self) -> Duration {
        Duration::from_millis(self.batch_pacing_ms)
    }
}

impl LookupConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.ttl_days) * 24 * 60 * 60)
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_pacing_ms: default_batch_pacing_ms(),
            verification_budget: default_verification_budget(),
            max_admitted: default_max_admitted(),
            target_accepted: default_target_accepted(),
            gallery_size: default_gallery_size(),
            min_dimension_px: default_min_dimension_px(),
            max_candidates: default_max_candidates(),
            ai_search_threshold: default_ai_search_threshold(),
        }
    }
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            deadline_ms: default_lookup_deadline_ms(),
            ttl_days: default_lookup_ttl_days(),
            sources: default_lookup_sources(),
            upcitemdb_requests_per_minute: default_upcitemdb_requests_per_minute(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            namespace: default_cache_namespace(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            user_agent: default_user_agent(),
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    3
}

fn default_batch_pacing_ms() -> u64 {
    500
}

fn default_verification_budget() -> u32 {
    20
}

fn default_max_admitted() -> usize {
    5
}

fn default_target_accepted() -> usize {
    4
}

fn default_gallery_size() -> usize {
    4
}

fn default_min_dimension_px() -> u32 {
    200
}

fn default_max_candidates() -> usize {
    45
}

fn default_ai_search_threshold() -> usize {
    2
}

fn default_lookup_deadline_ms() -> u64 {
    4000
}

fn default_lookup_ttl_days() -> u32 {
    30
}

fn default_lookup_sources() -> Vec<LookupSource> {
    vec![LookupSource::DbA, LookupSource::DbB]
}

fn default_upcitemdb_requests_per_minute() -> u32 {
    6
}

fn default_cache_namespace() -> String {
    "product_gallery:".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_read_timeout_ms() -> u64 {
    10_000
}

fn default_user_agent() -> String {
    format!(
        "product_gallery/{} (product photo lookup)",
        env!("CARGO_PKG_VERSION")
    )
}

fn default_max_image_bytes() -> u64 {
    15 * 1024 * 1024
}

/// Clamps values that would otherwise stall or disable the pipeline.
pub fn sanitize_config(mut config: Config) -> Config {
    let pipeline = &mut config.pipeline;
    pipeline.batch_size = pipeline.batch_size.max(1);
    pipeline.target_accepted = pipeline.target_accepted.max(1);
    pipeline.gallery_size = pipeline.gallery_size.max(1);
    pipeline.max_admitted = pipeline.max_admitted.max(1);
    pipeline.max_candidates = pipeline.max_candidates.max(1);
    pipeline.min_dimension_px = pipeline.min_dimension_px.max(1);

    config.lookup.deadline_ms = config.lookup.deadline_ms.max(1);
    config.lookup.ttl_days = config.lookup.ttl_days.max(1);
    config.lookup.upcitemdb_requests_per_minute =
        config.lookup.upcitemdb_requests_per_minute.max(1);
    config.lookup.sources.dedup();

    config.http.max_image_bytes = config.http.max_image_bytes.max(1024);
    config
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("product_gallery")
        .join("config.toml")
}

/// Loads `path`, writing a default file when it does not exist yet.
pub fn load_config(path: &Path) -> Config {
    if !path.exists() {
        let default_config = Config::default();
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        match toml::to_string(&default_config) {
            Ok(serialized) => {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(error) = std::fs::write(path, serialized) {
                    warn!("Failed to write default config {}: {}", path.display(), error);
                }
            }
            Err(error) => warn!("Failed to serialize default config: {}", error),
        }
        return default_config;
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) => {
            warn!("Failed to read config {}: {}", path.display(), error);
            return Config::default();
        }
    };
    match toml::from_str::<Config>(&content) {
        Ok(config) => sanitize_config(config),
        Err(error) => {
            warn!(
                "Failed to parse config {}; using defaults: {}",
                path.display(),
                error
            );
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{sanitize_config, Config};
    use crate::protocol::LookupSource;

    #[test]
    fn test_default_config_matches_pipeline_constants() {
        let config = Config::default();
        assert_eq!(config.pipeline.batch_size, 3);
        assert_eq!(config.pipeline.batch_pacing_ms, 500);
        assert_eq!(config.pipeline.verification_budget, 20);
        assert_eq!(config.pipeline.max_admitted, 5);
        assert_eq!(config.pipeline.target_accepted, 4);
        assert_eq!(config.pipeline.gallery_size, 4);
        assert_eq!(config.pipeline.min_dimension_px, 200);
        assert_eq!(config.pipeline.max_candidates, 45);
        assert_eq!(config.lookup.deadline_ms, 4000);
        assert_eq!(config.lookup.ttl_days, 30);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [pipeline]
            batch_size = 5

            [lookup]
            sources = ["db_b"]
            "#,
        )
        .expect("valid toml");
        assert_eq!(config.pipeline.batch_size, 5);
        assert_eq!(config.pipeline.verification_budget, 20);
        assert_eq!(config.lookup.sources, vec![LookupSource::DbB]);
        assert_eq!(config.http, Config::default().http);
    }

    #[test]
    fn test_sanitize_config_clamps_zero_values() {
        let mut config = Config::default();
        config.pipeline.batch_size = 0;
        config.pipeline.gallery_size = 0;
        config.lookup.deadline_ms = 0;
        let sanitized = sanitize_config(config);
        assert_eq!(sanitized.pipeline.batch_size, 1);
        assert_eq!(sanitized.pipeline.gallery_size, 1);
        assert_eq!(sanitized.lookup.deadline_ms, 1);
    }

    #[test]
    fn test_config_roundtrips_through_toml() {
        let config = Config::default();
        let serialized = toml::to_string(&config).expect("serializable");
        let parsed: Config = toml::from_str(&serialized).expect("parsable");
        assert_eq!(parsed, config);
    }
}
