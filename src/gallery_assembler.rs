//! Ranks verified candidates, cleans them into product photos and fills
//! remaining slots with synthetic views.

use std::cmp::Reverse;
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::broadcast::Sender;

use crate::backends::{PhotoCleaner, SyntheticGenerator};
use crate::errors::{PipelineError, PipelineResult};
use crate::protocol::{publish, GalleryImage, GalleryItem, ImageCandidate, PipelineEvent};
use crate::session::SessionLiveness;

pub struct GalleryAssembler {
    cleaner: Arc<dyn PhotoCleaner>,
    generator: Arc<dyn SyntheticGenerator>,
    gallery_size: usize,
    bus: Sender<PipelineEvent>,
    liveness: SessionLiveness,
}

/// Orders candidates by pixel area, largest first; ties keep discovery order.
pub fn rank_candidates(mut candidates: Vec<ImageCandidate>) -> Vec<ImageCandidate> {
    candidates.sort_by_key(|candidate| (Reverse(candidate.pixel_area()), candidate.discovery_index));
    candidates
}

impl GalleryAssembler {
    pub fn new(
        cleaner: Arc<dyn PhotoCleaner>,
        generator: Arc<dyn SyntheticGenerator>,
        gallery_size: usize,
        bus: Sender<PipelineEvent>,
        liveness: SessionLiveness,
    ) -> Self {
        Self {
            cleaner,
            generator,
            gallery_size: gallery_size.max(1),
            bus,
            liveness,
        }
    }

    fn skip_slot(&self, slot: usize, reason: String) {
        warn!("Gallery slot {} skipped: {}", slot, reason);
        publish(&self.bus, PipelineEvent::SlotSkipped { slot, reason });
    }

    /// Builds the gallery, or returns `None` when nothing was verified.
    ///
    /// Failing to clean the top-ranked photo is fatal; later photos and
    /// synthetic fills are skipped individually.
    pub async fn assemble(
        &self,
        candidates: Vec<ImageCandidate>,
        title: &str,
    ) -> PipelineResult<Option<Vec<GalleryItem>>> {
        let verified: Vec<ImageCandidate> = candidates
            .into_iter()
            .filter(|candidate| candidate.verified && candidate.fetched_bytes.is_some())
            .collect();
        if verified.is_empty() {
            return Ok(None);
        }

        let mut gallery: Vec<GalleryItem> = Vec::with_capacity(self.gallery_size);
        for (rank, candidate) in rank_candidates(verified)
            .into_iter()
            .take(self.gallery_size)
            .enumerate()
        {
            let bytes = candidate.fetched_bytes.unwrap_or_default();
            let cleaned = self.cleaner.clean(&bytes, title).await;
            self.liveness.ensure_live()?;
            match cleaned {
                Ok(cleaned) => gallery.push(GalleryItem {
                    name: format!("{} - photo {}", title, gallery.len() + 1),
                    image: GalleryImage::Bytes(cleaned),
                    is_synthetic: false,
                    origin_url: Some(candidate.url),
                }),
                Err(error) if rank == 0 => return Err(PipelineError::PhotoCleanup(error)),
                Err(error) => self.skip_slot(rank, format!("cleanup failed: {error}")),
            }
        }

        self.fill_synthetic(&mut gallery, title).await?;
        info!(
            "Assembled gallery for '{}': {} photos ({} synthetic)",
            title,
            gallery.len(),
            gallery.iter().filter(|item| item.is_synthetic).count()
        );
        Ok(Some(gallery))
    }

    async fn fill_synthetic(&self, gallery: &mut Vec<GalleryItem>, title: &str) -> PipelineResult<()> {
        let real_count = gallery.len();
        if real_count == 0 || real_count >= self.gallery_size {
            return Ok(());
        }
        let seed = match &gallery[0].image {
            GalleryImage::Bytes(bytes) => bytes.clone(),
            GalleryImage::SourceUrl(_) => return Ok(()),
        };

        for slot in real_count..self.gallery_size {
            let generated = self.generator.generate(&seed, title, 1, slot).await;
            self.liveness.ensure_live()?;
            match generated {
                Ok(items) if items.is_empty() => {
                    info!("Synthetic generator returned nothing for slot {}; stopping", slot);
                    break;
                }
                Ok(items) => {
                    for mut item in items {
                        if gallery.len() >= self.gallery_size {
                            break;
                        }
                        item.is_synthetic = true;
                        item.origin_url = None;
                        gallery.push(item);
                    }
                }
                Err(error) => self.skip_slot(slot, format!("generation failed: {error}")),
            }
        }
        Ok(())
    }
}
