//! Shared domain payloads and the pipeline event-bus protocol.
//!
//! This module defines the values exchanged between lookup, candidate
//! collection, screening, verification and gallery assembly, plus the
//! events published to observers while a search session runs.

use std::fmt;

/// Free product database that produced a lookup result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupSource {
    /// Open Food Facts.
    DbA,
    /// UPCitemdb trial API.
    DbB,
}

impl LookupSource {
    pub fn source_name(self) -> &'static str {
        match self {
            Self::DbA => "OpenFoodFacts",
            Self::DbB => "UPCitemdb",
        }
    }
}

/// Product facts returned by a free product-database lookup.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LookupResult {
    pub identifier: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub source: LookupSource,
}

impl LookupResult {
    /// Title with the brand prefixed when the title does not already mention it.
    pub fn display_title(&self) -> Option<String> {
        let title = self.title.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
        match self.brand.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
            Some(brand) if !title.to_lowercase().contains(&brand.to_lowercase()) => {
                Some(format!("{brand} {title}"))
            }
            _ => Some(title.to_string()),
        }
    }
}

/// Result of the AI title search collaborator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AiSearchResult {
    pub title: String,
    pub images: Vec<String>,
}

/// One candidate image travelling through screening and verification.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageCandidate {
    /// Position in the collector's merged URL list.
    pub discovery_index: usize,
    pub url: String,
    /// Present only after a successful fetch.
    pub fetched_bytes: Option<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub signature: String,
    pub verified: bool,
}

impl ImageCandidate {
    pub fn new(discovery_index: usize, url: impl Into<String>) -> Self {
        Self {
            discovery_index,
            url: url.into(),
            fetched_bytes: None,
            width: 0,
            height: 0,
            signature: String::new(),
            verified: false,
        }
    }

    pub fn pixel_area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Image payload carried by a gallery item.
#[derive(Debug, Clone, PartialEq)]
pub enum GalleryImage {
    Bytes(Vec<u8>),
    SourceUrl(String),
}

/// One photo in the assembled gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryItem {
    pub name: String,
    pub image: GalleryImage,
    pub is_synthetic: bool,
    /// Source URL of the verified candidate behind a real photo.
    pub origin_url: Option<String>,
}

/// Explicit search-session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    FastLookup,
    DeepSearch,
    Verifying,
    Assembling,
    Done,
    ManualFallback,
    Error,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::ManualFallback | Self::Error)
    }
}

/// Why a candidate was discarded before reaching the gallery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    Fetch,
    Duplicate,
    Decode,
    Dimension,
    VerificationNegative,
    VerificationError,
    BudgetExhausted,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Fetch => "fetch",
            Self::Duplicate => "duplicate",
            Self::Decode => "decode",
            Self::Dimension => "dimension",
            Self::VerificationNegative => "verification_negative",
            Self::VerificationError => "verification_error",
            Self::BudgetExhausted => "budget_exhausted",
        };
        f.write_str(label)
    }
}

/// Events published while a session runs.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    LookupHit {
        identifier: String,
        source: LookupSource,
        cached: bool,
    },
    LookupMiss {
        identifier: String,
    },
    LookupFailed {
        identifier: String,
        source: LookupSource,
        reason: String,
    },
    CandidatesCollected {
        count: usize,
    },
    CandidateDropped {
        url: String,
        reason: DropReason,
    },
    CandidateAccepted {
        url: String,
        width: u32,
        height: u32,
    },
    BatchCompleted {
        index: usize,
        accepted_total: usize,
    },
    SlotSkipped {
        slot: usize,
        reason: String,
    },
    ManualUploadRequired,
}

/// Publishes an event to the bus, mirroring it to the debug log.
pub fn publish(bus: &tokio::sync::broadcast::Sender<PipelineEvent>, event: PipelineEvent) {
    log::debug!("pipeline event: {:?}", event);
    // No subscribers is a valid configuration.
    let _ = bus.send(event);
}
