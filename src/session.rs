//! Search session state machine: lookup, collection, screening, assembly and
//! manual-upload fallback.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use log::{info, warn};
use tokio::sync::broadcast::Sender;
use uuid::Uuid;

use crate::backends::{
    AiTitleSearch, ImageFetcher, MediaSearch, PhotoCleaner, ProductLookup, SyntheticGenerator,
    VerificationOracle,
};
use crate::batch_scheduler::BatchScheduler;
use crate::cache::{KeyValueStore, TtlCache};
use crate::candidate_collector::CandidateCollector;
use crate::config::Config;
use crate::errors::{panic_payload_to_string, PipelineError, PipelineResult};
use crate::gallery_assembler::GalleryAssembler;
use crate::identifier;
use crate::lookup_service::LookupService;
use crate::protocol::{publish, DropReason, GalleryItem, LookupResult, PipelineEvent, SessionState};
use crate::verification::VerificationGate;

/// Cooperative cancellation flag shared with the session's consumer.
///
/// Clearing it never aborts in-flight I/O; results that arrive afterwards
/// are discarded before they can mutate session state.
#[derive(Debug, Clone)]
pub struct SessionLiveness(Arc<AtomicBool>);

impl Default for SessionLiveness {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

impl SessionLiveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn ensure_live(&self) -> PipelineResult<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(PipelineError::Cancelled)
        }
    }
}

/// One-shot signal telling the caller to ask for a manually supplied image.
#[derive(Debug, Default)]
pub struct FallbackController {
    signal: Option<bool>,
}

impl FallbackController {
    /// Records the outcome; returns false if it had already been recorded.
    pub fn resolve(&mut self, manual_upload_required: bool) -> bool {
        if self.signal.is_some() {
            warn!("Fallback signal already resolved; ignoring {manual_upload_required}");
            return false;
        }
        self.signal = Some(manual_upload_required);
        true
    }

    pub fn is_resolved(&self) -> bool {
        self.signal.is_some()
    }

    pub fn manual_upload_required(&self) -> bool {
        self.signal.unwrap_or(false)
    }
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        if next == Error {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Idle, FastLookup)
                | (FastLookup, DeepSearch)
                | (DeepSearch, Verifying)
                | (DeepSearch, ManualFallback)
                | (Verifying, Assembling)
                | (Verifying, ManualFallback)
                | (Assembling, Done)
                | (Assembling, ManualFallback)
        )
    }
}

/// What the caller asked to search for.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub title: Option<String>,
    pub identifier: Option<String>,
}

/// External services a session depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub lookups: Vec<Arc<dyn ProductLookup>>,
    pub media_search: Arc<dyn MediaSearch>,
    pub ai_search: Option<Arc<dyn AiTitleSearch>>,
    pub fetcher: Arc<dyn ImageFetcher>,
    pub oracle: Arc<dyn VerificationOracle>,
    pub cleaner: Arc<dyn PhotoCleaner>,
    pub generator: Arc<dyn SyntheticGenerator>,
}

/// Final result of one search attempt.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub state: SessionState,
    pub title: String,
    pub lookup: Option<LookupResult>,
    pub gallery: Vec<GalleryItem>,
    pub manual_upload_required: bool,
    pub candidates_collected: usize,
    pub verification_calls: u32,
    pub dropped: Vec<(String, DropReason)>,
}

pub struct SearchSession {
    session_id: Uuid,
    state: SessionState,
    config: Config,
    collaborators: Collaborators,
    lookup_cache: TtlCache<LookupResult>,
    bus: Sender<PipelineEvent>,
    liveness: SessionLiveness,
    fallback: FallbackController,
}

impl SearchSession {
    pub fn new(
        config: Config,
        collaborators: Collaborators,
        cache_store: Arc<dyn KeyValueStore>,
        bus: Sender<PipelineEvent>,
    ) -> Self {
        let lookup_cache = TtlCache::new(cache_store, config.cache.namespace.clone());
        Self {
            session_id: Uuid::new_v4(),
            state: SessionState::Idle,
            config,
            collaborators,
            lookup_cache,
            bus,
            liveness: SessionLiveness::new(),
            fallback: FallbackController::default(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle the consumer keeps to cancel the search.
    pub fn liveness(&self) -> SessionLiveness {
        self.liveness.clone()
    }

    fn transition(&mut self, next: SessionState) -> PipelineResult<()> {
        self.liveness.ensure_live()?;
        if !self.state.can_transition_to(next) {
            warn!(
                "Session {}: ignoring invalid transition {:?} -> {:?}",
                self.session_id, self.state, next
            );
            return Ok(());
        }
        publish(
            &self.bus,
            PipelineEvent::StateChanged {
                from: self.state,
                to: next,
            },
        );
        self.state = next;
        Ok(())
    }

    fn ordered_lookups(&self) -> Vec<Arc<dyn ProductLookup>> {
        if !self.config.lookup.enabled {
            return Vec::new();
        }
        self.config
            .lookup
            .sources
            .iter()
            .filter_map(|source| {
                self.collaborators
                    .lookups
                    .iter()
                    .find(|lookup| lookup.source() == *source)
                    .cloned()
            })
            .collect()
    }

    /// Runs the whole pipeline once.
    ///
    /// Fatal errors move the session to `Error` and are returned; a cancelled
    /// session returns `PipelineError::Cancelled` without touching its state.
    /// A panicking collaborator surfaces as `PipelineError::Collaborator`.
    pub async fn run(mut self, request: SearchRequest) -> PipelineResult<SessionReport> {
        let outcome = AssertUnwindSafe(self.run_inner(request))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(PipelineError::Collaborator(panic_payload_to_string(
                    payload.as_ref(),
                )))
            });
        match outcome {
            Ok(report) => Ok(report),
            Err(PipelineError::Cancelled) => {
                info!("Session {} cancelled in {:?}", self.session_id, self.state);
                Err(PipelineError::Cancelled)
            }
            Err(error) => {
                warn!("Session {} failed: {}", self.session_id, error);
                if self.liveness.is_live() && self.state.can_transition_to(SessionState::Error) {
                    publish(
                        &self.bus,
                        PipelineEvent::StateChanged {
                            from: self.state,
                            to: SessionState::Error,
                        },
                    );
                    self.state = SessionState::Error;
                }
                Err(error)
            }
        }
    }

    async fn run_inner(&mut self, request: SearchRequest) -> PipelineResult<SessionReport> {
        let variants = match request.identifier.as_deref() {
            Some(raw) => identifier::validate_for_search(raw)?,
            None => Vec::new(),
        };

        self.transition(SessionState::FastLookup)?;
        let lookup = if variants.is_empty() {
            None
        } else {
            let service = LookupService::new(
                self.ordered_lookups(),
                self.lookup_cache.clone(),
                &self.config.lookup,
                self.bus.clone(),
            );
            let result = service.lookup_variants(&variants).await;
            self.liveness.ensure_live()?;
            result
        };

        let title = request
            .title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(str::to_string)
            .or_else(|| lookup.as_ref().and_then(LookupResult::display_title))
            .ok_or(PipelineError::MissingTitle)?;

        self.transition(SessionState::DeepSearch)?;
        let collector = CandidateCollector::new(
            Arc::clone(&self.collaborators.media_search),
            self.collaborators.ai_search.clone(),
            &self.config.pipeline,
        );
        let known_images = lookup
            .as_ref()
            .map(|result| result.images.clone())
            .unwrap_or_default();
        let urls = collector.collect(&title, &known_images).await;
        self.liveness.ensure_live()?;
        publish(
            &self.bus,
            PipelineEvent::CandidatesCollected { count: urls.len() },
        );

        let mut report = SessionReport {
            session_id: self.session_id,
            state: self.state,
            title: title.clone(),
            lookup,
            gallery: Vec::new(),
            manual_upload_required: false,
            candidates_collected: urls.len(),
            verification_calls: 0,
            dropped: Vec::new(),
        };

        if urls.is_empty() {
            info!("Session {}: no candidate URLs for '{}'", self.session_id, title);
            return self.finish_with_fallback(report);
        }

        self.transition(SessionState::Verifying)?;
        let gate = VerificationGate::new(
            Arc::clone(&self.collaborators.oracle),
            &self.config.pipeline,
        );
        let mut scheduler = BatchScheduler::new(
            Arc::clone(&self.collaborators.fetcher),
            gate,
            &self.config.pipeline,
            self.bus.clone(),
            self.liveness.clone(),
        );
        let outcome = scheduler.run(&urls, &title).await?;
        report.verification_calls = outcome.verification_calls;
        report.dropped = outcome.dropped;

        if outcome.accepted.is_empty() {
            info!(
                "Session {}: no verified images for '{}'",
                self.session_id, title
            );
            return self.finish_with_fallback(report);
        }

        self.transition(SessionState::Assembling)?;
        let assembler = GalleryAssembler::new(
            Arc::clone(&self.collaborators.cleaner),
            Arc::clone(&self.collaborators.generator),
            self.config.pipeline.gallery_size,
            self.bus.clone(),
            self.liveness.clone(),
        );
        let Some(gallery) = assembler.assemble(outcome.accepted, &title).await? else {
            return self.finish_with_fallback(report);
        };

        self.transition(SessionState::Done)?;
        self.fallback.resolve(false);
        report.state = self.state;
        report.gallery = gallery;
        report.manual_upload_required = self.fallback.manual_upload_required();
        Ok(report)
    }

    fn finish_with_fallback(&mut self, mut report: SessionReport) -> PipelineResult<SessionReport> {
        self.transition(SessionState::ManualFallback)?;
        if self.fallback.resolve(true) {
            publish(&self.bus, PipelineEvent::ManualUploadRequired);
        }
        report.state = self.state;
        report.manual_upload_required = self.fallback.manual_upload_required();
        Ok(report)
    }
}
