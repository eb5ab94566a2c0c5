//! Cached, deadline-bounded product lookup across identifier variants.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::broadcast::Sender;

use crate::backends::ProductLookup;
use crate::cache::TtlCache;
use crate::config::LookupConfig;
use crate::protocol::{publish, LookupResult, PipelineEvent};

pub const LOOKUP_KEY_PREFIX: &str = "lookup:";

pub fn lookup_cache_key(identifier: &str) -> String {
    format!("{LOOKUP_KEY_PREFIX}{identifier}")
}

pub struct LookupService {
    sources: Vec<Arc<dyn ProductLookup>>,
    cache: TtlCache<LookupResult>,
    deadline: Duration,
    ttl: Duration,
    bus: Sender<PipelineEvent>,
}

impl LookupService {
    pub fn new(
        sources: Vec<Arc<dyn ProductLookup>>,
        cache: TtlCache<LookupResult>,
        config: &LookupConfig,
        bus: Sender<PipelineEvent>,
    ) -> Self {
        Self {
            sources,
            cache,
            deadline: config.deadline(),
            ttl: config.ttl(),
            bus,
        }
    }

    /// Returns the first result found for any variant, cache first.
    ///
    /// The deadline bounds each remote attempt, one per source per variant,
    /// so a full miss can take up to `variants * sources * deadline`.
    /// Timeouts and source errors are reported as events and treated as a
    /// miss for that source.
    pub async fn lookup_variants(&self, variants: &[String]) -> Option<LookupResult> {
        for identifier in variants {
            if let Some(cached) = self.cache.get(&lookup_cache_key(identifier)) {
                debug!("Lookup cache hit for {}", identifier);
                publish(
                    &self.bus,
                    PipelineEvent::LookupHit {
                        identifier: identifier.clone(),
                        source: cached.source,
                        cached: true,
                    },
                );
                return Some(cached);
            }
        }

        for identifier in variants {
            for source in &self.sources {
                let attempt =
                    tokio::time::timeout(self.deadline, source.lookup(identifier, self.deadline))
                        .await;
                let reason = match attempt {
                    Ok(Ok(Some(result))) => {
                        info!(
                            "Lookup hit for {} from {}",
                            identifier,
                            result.source.source_name()
                        );
                        self.cache
                            .set(&lookup_cache_key(identifier), result.clone(), self.ttl);
                        publish(
                            &self.bus,
                            PipelineEvent::LookupHit {
                                identifier: identifier.clone(),
                                source: result.source,
                                cached: false,
                            },
                        );
                        return Some(result);
                    }
                    Ok(Ok(None)) => continue,
                    Ok(Err(error)) => error,
                    Err(_) => format!("deadline of {:?} exceeded", self.deadline),
                };
                debug!(
                    "Lookup for {} via {} failed: {}",
                    identifier,
                    source.source().source_name(),
                    reason
                );
                publish(
                    &self.bus,
                    PipelineEvent::LookupFailed {
                        identifier: identifier.clone(),
                        source: source.source(),
                        reason,
                    },
                );
            }
        }

        publish(
            &self.bus,
            PipelineEvent::LookupMiss {
                identifier: variants.first().cloned().unwrap_or_default(),
            },
        );
        None
    }
}
