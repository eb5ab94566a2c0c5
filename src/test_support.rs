//! In-memory collaborators and image fixtures shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;

use crate::backends::{
    AiTitleSearch, ImageFetcher, MediaSearch, PhotoCleaner, ProductLookup, SyntheticGenerator,
    VerificationOracle,
};
use crate::protocol::{
    AiSearchResult, GalleryImage, GalleryItem, LookupResult, LookupSource, PipelineEvent,
};

/// PNG with seed-dependent noise so distinct seeds never share content.
pub fn png_fixture(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let mut state = (u32::from(seed) + 1).wrapping_mul(2_654_435_761) | 1;
    let image = RgbImage::from_fn(width, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let [r, g, b, _] = state.to_le_bytes();
        Rgb([r, g, b])
    });
    let mut cursor = Cursor::new(Vec::<u8>::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut cursor, ImageFormat::Png)
        .expect("png encoding should succeed");
    cursor.into_inner()
}

pub fn jpeg_fixture(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([90, 140, 210]));
    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, 85)
        .encode_image(&DynamicImage::ImageRgb8(image))
        .expect("jpeg encoding should succeed");
    encoded
}

pub fn drain_events(receiver: &mut Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    events
}

pub fn sample_lookup(identifier: &str, source: LookupSource) -> LookupResult {
    LookupResult {
        identifier: identifier.to_string(),
        title: Some("Kettle 1.7L".to_string()),
        brand: Some("Acme".to_string()),
        images: vec!["https://db.test/front.jpg".to_string()],
        source,
    }
}

pub struct FakeLookup {
    source: LookupSource,
    result: Option<LookupResult>,
    error: Option<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeLookup {
    pub fn new(source: LookupSource) -> Self {
        Self {
            source,
            result: None,
            error: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_result(mut self, result: LookupResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProductLookup for FakeLookup {
    fn source(&self) -> LookupSource {
        self.source
    }

    async fn lookup(
        &self,
        identifier: &str,
        _deadline: Duration,
    ) -> Result<Option<LookupResult>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        Ok(self
            .result
            .clone()
            .filter(|result| result.identifier == identifier))
    }
}

pub struct FakeMediaSearch {
    result: Result<Vec<String>, String>,
}

impl FakeMediaSearch {
    pub fn returning(urls: Vec<String>) -> Self {
        Self { result: Ok(urls) }
    }

    pub fn failing() -> Self {
        Self {
            result: Err("media search unavailable".to_string()),
        }
    }
}

#[async_trait]
impl MediaSearch for FakeMediaSearch {
    async fn search(&self, _title: &str) -> Result<Vec<String>, String> {
        self.result.clone()
    }
}

pub struct FakeAiSearch {
    result: Result<Vec<String>, String>,
    calls: AtomicUsize,
}

impl FakeAiSearch {
    pub fn returning(urls: Vec<String>) -> Self {
        Self {
            result: Ok(urls),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            result: Err("ai search unavailable".to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiTitleSearch for FakeAiSearch {
    async fn search(&self, title: &str) -> Result<AiSearchResult, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone().map(|images| AiSearchResult {
            title: title.to_string(),
            images,
        })
    }
}

#[derive(Clone, Default)]
pub struct FakeFetcher {
    images: HashMap<String, Vec<u8>>,
    calls: Arc<AtomicUsize>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.images.insert(url.to_string(), bytes);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.images
            .get(url)
            .cloned()
            .ok_or_else(|| format!("404 for {url}"))
    }
}

pub struct FakeOracle {
    default_answer: bool,
    rejecting: HashSet<String>,
    failing: HashSet<String>,
    panicking: HashSet<String>,
    calls: AtomicUsize,
}

impl FakeOracle {
    pub fn accept_all() -> Self {
        Self {
            default_answer: true,
            rejecting: HashSet::new(),
            failing: HashSet::new(),
            panicking: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn reject_all() -> Self {
        Self {
            default_answer: false,
            ..Self::accept_all()
        }
    }

    pub fn rejecting(mut self, url: &str) -> Self {
        self.rejecting.insert(url.to_string());
        self
    }

    pub fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn panicking(mut self, url: &str) -> Self {
        self.panicking.insert(url.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VerificationOracle for FakeOracle {
    async fn verify(
        &self,
        _image_bytes: &[u8],
        _expected_title: &str,
        source_url: &str,
    ) -> Result<bool, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panicking.contains(source_url) {
            panic!("oracle crashed on {source_url}");
        }
        if self.failing.contains(source_url) {
            return Err("oracle unavailable".to_string());
        }
        if self.rejecting.contains(source_url) {
            return Ok(false);
        }
        Ok(self.default_answer)
    }
}

/// Returns the input bytes; fails for payloads whose first byte is listed.
#[derive(Default)]
pub struct FakeCleaner {
    failing_first_bytes: HashSet<u8>,
}

impl FakeCleaner {
    pub fn working() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, first_bytes: &[u8]) -> Self {
        self.failing_first_bytes.extend(first_bytes.iter().copied());
        self
    }
}

#[async_trait]
impl PhotoCleaner for FakeCleaner {
    async fn clean(&self, image_bytes: &[u8], _expected_title: &str) -> Result<Vec<u8>, String> {
        match image_bytes.first() {
            Some(first) if self.failing_first_bytes.contains(first) => {
                Err("cleanup model rejected image".to_string())
            }
            _ => Ok(image_bytes.to_vec()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GeneratorMode {
    Working,
    Failing,
    Empty,
}

#[derive(Clone)]
pub struct FakeGenerator {
    mode: GeneratorMode,
    calls: Arc<AtomicUsize>,
}

impl FakeGenerator {
    fn with_mode(mode: GeneratorMode) -> Self {
        Self {
            mode,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn working() -> Self {
        Self::with_mode(GeneratorMode::Working)
    }

    pub fn failing() -> Self {
        Self::with_mode(GeneratorMode::Failing)
    }

    pub fn empty() -> Self {
        Self::with_mode(GeneratorMode::Empty)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyntheticGenerator for FakeGenerator {
    async fn generate(
        &self,
        seed_image_bytes: &[u8],
        title: &str,
        count: usize,
        offset: usize,
    ) -> Result<Vec<GalleryItem>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            GeneratorMode::Failing => Err("generation quota exhausted".to_string()),
            GeneratorMode::Empty => Ok(Vec::new()),
            GeneratorMode::Working => Ok((0..count)
                .map(|index| GalleryItem {
                    name: format!("{} - view {}", title, offset + index + 1),
                    image: GalleryImage::Bytes(seed_image_bytes.to_vec()),
                    is_synthetic: false,
                    origin_url: None,
                })
                .collect()),
        }
    }
}
