//! Visual verification gate with a per-session oracle budget.

use std::sync::Arc;

use crate::backends::VerificationOracle;
use crate::config::PipelineConfig;

/// Oracle answer for a single candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Match,
    Mismatch,
    Failed(String),
}

/// Tracks oracle calls and admissions for one search session.
///
/// The gate closes once either the call budget is spent or enough verified
/// candidates were admitted; candidates arriving afterwards are never
/// verified and never become gallery-eligible.
pub struct VerificationGate {
    oracle: Arc<dyn VerificationOracle>,
    call_budget: u32,
    max_admitted: usize,
    calls_made: u32,
    admitted: usize,
}

impl VerificationGate {
    pub fn new(oracle: Arc<dyn VerificationOracle>, config: &PipelineConfig) -> Self {
        Self {
            oracle,
            call_budget: config.verification_budget,
            max_admitted: config.max_admitted,
            calls_made: 0,
            admitted: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.calls_made < self.call_budget && self.admitted < self.max_admitted
    }

    pub fn calls_made(&self) -> u32 {
        self.calls_made
    }

    pub fn admitted(&self) -> usize {
        self.admitted
    }

    /// Reserves up to `wanted` oracle calls, returning how many were granted.
    pub fn reserve_calls(&mut self, wanted: usize) -> usize {
        if !self.is_open() {
            return 0;
        }
        let remaining = (self.call_budget - self.calls_made) as usize;
        let granted = wanted.min(remaining);
        self.calls_made += granted as u32;
        granted
    }

    /// Admits one positively verified candidate if capacity remains.
    pub fn admit(&mut self) -> bool {
        if self.admitted >= self.max_admitted {
            return false;
        }
        self.admitted += 1;
        true
    }

    pub fn oracle(&self) -> Arc<dyn VerificationOracle> {
        Arc::clone(&self.oracle)
    }

    /// Runs one oracle call. Errors count as a failed verification.
    pub async fn check(
        oracle: &dyn VerificationOracle,
        image_bytes: &[u8],
        expected_title: &str,
        source_url: &str,
    ) -> Verdict {
        match oracle.verify(image_bytes, expected_title, source_url).await {
            Ok(true) => Verdict::Match,
            Ok(false) => Verdict::Mismatch,
            Err(error) => Verdict::Failed(error),
        }
    }
}
