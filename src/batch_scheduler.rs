//! Drives candidate URLs through fetch, dedup, dimension screening and
//! visual verification in paced, concurrency-limited batches.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info};
use tokio::sync::broadcast::Sender;

use crate::backends::ImageFetcher;
use crate::config::PipelineConfig;
use crate::errors::PipelineResult;
use crate::image_pipeline::{prescreen, SignatureDeduper};
use crate::protocol::{publish, DropReason, ImageCandidate, PipelineEvent};
use crate::session::SessionLiveness;
use crate::verification::{Verdict, VerificationGate};

/// What the scheduler produced for one session.
#[derive(Debug, Default)]
pub struct ScheduleOutcome {
    /// Verified, gallery-eligible candidates.
    pub accepted: Vec<ImageCandidate>,
    /// Candidates that passed screening after the gate had closed.
    pub unverified: Vec<ImageCandidate>,
    pub dropped: Vec<(String, DropReason)>,
    pub verification_calls: u32,
    pub batches_run: usize,
}

/// Fetches `batch` concurrently, then dedups and screens in input order.
///
/// Each URL is paired with its screened candidate or the reason it was
/// dropped.
pub async fn prescreen_batch(
    fetcher: &dyn ImageFetcher,
    deduper: &mut SignatureDeduper,
    batch: &[String],
    base_index: usize,
    min_dimension_px: u32,
) -> Vec<(String, Result<ImageCandidate, DropReason>)> {
    let fetched = join_all(batch.iter().map(|url| fetcher.fetch(url))).await;
    batch
        .iter()
        .zip(fetched)
        .enumerate()
        .map(|(offset, (url, result))| {
            let screened = match result {
                Ok(bytes) => prescreen(deduper, base_index + offset, url, bytes, min_dimension_px),
                Err(error) => {
                    debug!("Fetch failed for {}: {}", url, error);
                    Err(DropReason::Fetch)
                }
            };
            (url.clone(), screened)
        })
        .collect()
}

pub struct BatchScheduler {
    fetcher: Arc<dyn ImageFetcher>,
    gate: VerificationGate,
    deduper: SignatureDeduper,
    batch_size: usize,
    pacing: Duration,
    target_accepted: usize,
    min_dimension_px: u32,
    bus: Sender<PipelineEvent>,
    liveness: SessionLiveness,
}

impl BatchScheduler {
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        gate: VerificationGate,
        config: &PipelineConfig,
        bus: Sender<PipelineEvent>,
        liveness: SessionLiveness,
    ) -> Self {
        Self {
            fetcher,
            gate,
            deduper: SignatureDeduper::new(),
            batch_size: config.batch_size.max(1),
            pacing: config.batch_pacing(),
            target_accepted: config.target_accepted,
            min_dimension_px: config.min_dimension_px,
            bus,
            liveness,
        }
    }

    fn drop_candidate(&self, outcome: &mut ScheduleOutcome, url: &str, reason: DropReason) {
        debug!("Dropping candidate {}: {}", url, reason);
        outcome.dropped.push((url.to_string(), reason));
        publish(
            &self.bus,
            PipelineEvent::CandidateDropped {
                url: url.to_string(),
                reason,
            },
        );
    }

    /// Processes `urls` in input order until enough candidates are accepted,
    /// the verification gate closes, or the list is exhausted.
    ///
    /// A batch that has started always runs to completion, so the accepted
    /// list may overshoot the target.
    pub async fn run(&mut self, urls: &[String], title: &str) -> PipelineResult<ScheduleOutcome> {
        let mut outcome = ScheduleOutcome::default();

        for (batch_index, batch) in urls.chunks(self.batch_size).enumerate() {
            if outcome.accepted.len() >= self.target_accepted {
                debug!("Accepted target reached; skipping remaining batches");
                break;
            }
            if !self.gate.is_open() {
                info!(
                    "Verification gate closed after {} calls; skipping remaining batches",
                    self.gate.calls_made()
                );
                break;
            }
            if batch_index > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
                self.liveness.ensure_live()?;
            }

            let base_index = batch_index * self.batch_size;
            let screened = self.fetch_and_screen(batch, base_index, &mut outcome).await?;
            self.verify_batch(screened, title, &mut outcome).await?;

            outcome.batches_run += 1;
            publish(
                &self.bus,
                PipelineEvent::BatchCompleted {
                    index: batch_index,
                    accepted_total: outcome.accepted.len(),
                },
            );
        }

        outcome.verification_calls = self.gate.calls_made();
        Ok(outcome)
    }

    async fn fetch_and_screen(
        &mut self,
        batch: &[String],
        base_index: usize,
        outcome: &mut ScheduleOutcome,
    ) -> PipelineResult<Vec<ImageCandidate>> {
        let results = prescreen_batch(
            self.fetcher.as_ref(),
            &mut self.deduper,
            batch,
            base_index,
            self.min_dimension_px,
        )
        .await;
        self.liveness.ensure_live()?;

        let mut screened = Vec::with_capacity(results.len());
        for (url, result) in results {
            match result {
                Ok(candidate) => screened.push(candidate),
                Err(reason) => self.drop_candidate(outcome, &url, reason),
            }
        }
        Ok(screened)
    }

    async fn verify_batch(
        &mut self,
        screened: Vec<ImageCandidate>,
        title: &str,
        outcome: &mut ScheduleOutcome,
    ) -> PipelineResult<()> {
        let granted = self.gate.reserve_calls(screened.len());
        let mut to_verify = screened;
        let over_budget = to_verify.split_off(granted.min(to_verify.len()));
        for candidate in over_budget {
            self.drop_candidate(outcome, &candidate.url, DropReason::BudgetExhausted);
            outcome.unverified.push(candidate);
        }
        if to_verify.is_empty() {
            return Ok(());
        }

        let oracle = self.gate.oracle();
        let verdicts = join_all(to_verify.iter().map(|candidate| {
            let bytes = candidate.fetched_bytes.as_deref().unwrap_or_default();
            VerificationGate::check(oracle.as_ref(), bytes, title, &candidate.url)
        }))
        .await;
        self.liveness.ensure_live()?;

        for (mut candidate, verdict) in to_verify.into_iter().zip(verdicts) {
            match verdict {
                Verdict::Match => {
                    if !self.gate.admit() {
                        self.drop_candidate(outcome, &candidate.url, DropReason::BudgetExhausted);
                        outcome.unverified.push(candidate);
                        continue;
                    }
                    candidate.verified = true;
                    publish(
                        &self.bus,
                        PipelineEvent::CandidateAccepted {
                            url: candidate.url.clone(),
                            width: candidate.width,
                            height: candidate.height,
                        },
                    );
                    outcome.accepted.push(candidate);
                }
                Verdict::Mismatch => {
                    self.drop_candidate(outcome, &candidate.url, DropReason::VerificationNegative)
                }
                Verdict::Failed(error) => {
                    debug!("Verification failed for {}: {}", candidate.url, error);
                    self.drop_candidate(outcome, &candidate.url, DropReason::VerificationError);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::broadcast;

    use super::BatchScheduler;
    use crate::config::PipelineConfig;
    use crate::errors::PipelineError;
    use crate::protocol::{DropReason, PipelineEvent};
    use crate::session::SessionLiveness;
    use crate::test_support::{drain_events, png_fixture, FakeFetcher, FakeOracle};
    use crate::verification::VerificationGate;

    fn scheduler(
        fetcher: FakeFetcher,
        oracle: Arc<FakeOracle>,
        config: &PipelineConfig,
    ) -> (BatchScheduler, broadcast::Receiver<PipelineEvent>, SessionLiveness) {
        let (bus, receiver) = broadcast::channel(512);
        let liveness = SessionLiveness::new();
        let gate = VerificationGate::new(oracle, config);
        (
            BatchScheduler::new(Arc::new(fetcher), gate, config, bus, liveness.clone()),
            receiver,
            liveness,
        )
    }

    fn url(index: usize) -> String {
        format!("https://img.test/{index}.png")
    }

    fn distinct_images(count: usize) -> FakeFetcher {
        let mut fetcher = FakeFetcher::new();
        for index in 0..count {
            fetcher = fetcher.with_image(&url(index), png_fixture(300, 300, index as u8));
        }
        fetcher
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_bytes_are_dropped_before_verification() {
        let image = png_fixture(400, 300, 7);
        let fetcher = FakeFetcher::new()
            .with_image(&url(0), image.clone())
            .with_image(&url(1), image);
        let oracle = Arc::new(FakeOracle::accept_all());
        let (mut scheduler, mut events, _) =
            scheduler(fetcher, oracle.clone(), &PipelineConfig::default());

        let outcome = scheduler
            .run(&[url(0), url(1)], "Kettle")
            .await
            .expect("run");
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].url, url(0));
        assert_eq!(oracle.calls(), 1);
        assert!(drain_events(&mut events).contains(&PipelineEvent::CandidateDropped {
            url: url(1),
            reason: DropReason::Duplicate,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_corrupt_and_unfetchable_candidates_are_dropped() {
        let fetcher = FakeFetcher::new()
            .with_image(&url(0), png_fixture(150, 600, 1))
            .with_image(&url(1), b"<html>oops</html>".to_vec())
            .with_image(&url(3), png_fixture(250, 250, 3));
        let oracle = Arc::new(FakeOracle::accept_all());
        let (mut scheduler, _events, _) =
            scheduler(fetcher, oracle.clone(), &PipelineConfig::default());

        let outcome = scheduler
            .run(&[url(0), url(1), url(2), url(3)], "Kettle")
            .await
            .expect("run");
        assert_eq!(
            outcome.dropped,
            vec![
                (url(0), DropReason::Dimension),
                (url(1), DropReason::Decode),
                (url(2), DropReason::Fetch),
            ]
        );
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].url, url(3));
        assert!(outcome.accepted[0].verified);
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_scheduling_once_target_reached_but_finishes_batch() {
        let fetcher = distinct_images(12);
        let oracle = Arc::new(FakeOracle::accept_all());
        let (mut scheduler, _events, _) =
            scheduler(fetcher.clone(), oracle.clone(), &PipelineConfig::default());

        let urls: Vec<String> = (0..12).map(url).collect();
        let outcome = scheduler.run(&urls, "Kettle").await.expect("run");
        // Two batches of three: the second pushes the total past four.
        assert_eq!(outcome.batches_run, 2);
        assert_eq!(fetcher.calls(), 6);
        assert_eq!(outcome.accepted.len(), 5);
        assert_eq!(oracle.calls(), 6);
        assert_eq!(outcome.unverified.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verification_budget_caps_oracle_calls() {
        let fetcher = distinct_images(45);
        let oracle = Arc::new(FakeOracle::reject_all());
        let (mut scheduler, _events, _) =
            scheduler(fetcher, oracle.clone(), &PipelineConfig::default());

        let urls: Vec<String> = (0..45).map(url).collect();
        let outcome = scheduler.run(&urls, "Kettle").await.expect("run");
        assert_eq!(oracle.calls(), 20);
        assert_eq!(outcome.verification_calls, 20);
        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.batches_run, 7);
        assert_eq!(outcome.unverified.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_cap_limits_verified_candidates() {
        let config = PipelineConfig {
            batch_size: 10,
            ..PipelineConfig::default()
        };
        let fetcher = distinct_images(10);
        let oracle = Arc::new(FakeOracle::accept_all());
        let (mut scheduler, _events, _) = scheduler(fetcher, oracle.clone(), &config);

        let urls: Vec<String> = (0..10).map(url).collect();
        let outcome = scheduler.run(&urls, "Kettle").await.expect("run");
        assert_eq!(outcome.accepted.len(), 5);
        assert!(outcome.accepted.iter().all(|candidate| candidate.verified));
        assert_eq!(outcome.unverified.len(), 5);
        assert!(outcome.unverified.iter().all(|candidate| !candidate.verified));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_are_paced() {
        let fetcher = distinct_images(9);
        let oracle = Arc::new(FakeOracle::reject_all());
        let (mut scheduler, _events, _) =
            scheduler(fetcher, oracle, &PipelineConfig::default());

        let started = tokio::time::Instant::now();
        let urls: Vec<String> = (0..9).map(url).collect();
        scheduler.run(&urls, "Kettle").await.expect("run");
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_discards_results() {
        let fetcher = distinct_images(3);
        let oracle = Arc::new(FakeOracle::accept_all());
        let (mut scheduler, mut events, liveness) =
            scheduler(fetcher, oracle.clone(), &PipelineConfig::default());
        liveness.cancel();

        let urls: Vec<String> = (0..3).map(url).collect();
        let result = scheduler.run(&urls, "Kettle").await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert_eq!(oracle.calls(), 0);
        assert!(drain_events(&mut events).is_empty());
    }
}
