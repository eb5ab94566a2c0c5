//! Cheap image screening: partial-content signatures and header-only
//! dimension decoding.

use std::collections::HashSet;
use std::io::Cursor;

use zune_core::options::DecoderOptions;
use zune_jpeg::JpegDecoder;

use crate::protocol::{DropReason, ImageCandidate};

const SIGNATURE_WINDOW_BYTES: usize = 2048;
const SIGNATURE_SAMPLE_STRIDE: usize = 29;

/// Fingerprint of the first bytes of an image, formatted `"{len}-{checksum}"`.
///
/// Not a cryptographic hash. Identical payloads always collide; payloads that
/// differ only in unsampled bytes can collide too.
pub fn compute_signature(bytes: &[u8]) -> String {
    let window = &bytes[..bytes.len().min(SIGNATURE_WINDOW_BYTES)];
    let checksum = window
        .iter()
        .step_by(SIGNATURE_SAMPLE_STRIDE)
        .fold(0u32, |acc, byte| {
            acc.wrapping_mul(31).wrapping_add(u32::from(*byte))
        });
    format!("{}-{}", bytes.len(), checksum)
}

/// Remembers signatures seen during one search session.
#[derive(Debug, Default)]
pub struct SignatureDeduper {
    seen: HashSet<String>,
}

impl SignatureDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when `signature` was already admitted.
    pub fn admit(&mut self, signature: &str) -> bool {
        self.seen.insert(signature.to_string())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

fn looks_like_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xff && bytes[1] == 0xd8
}

fn jpeg_dimensions_non_strict(bytes: &[u8]) -> Option<(u32, u32)> {
    if !looks_like_jpeg(bytes) {
        return None;
    }

    let options = DecoderOptions::new_cmd().set_strict_mode(false);
    let mut decoder = JpegDecoder::new_with_options(bytes, options);
    decoder.decode_headers().ok()?;
    let (width, height) = decoder.dimensions()?;
    Some((width as u32, height as u32))
}

/// Reads image dimensions from headers without decoding pixels.
pub fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    // Primary reader covers PNG/WebP/GIF/BMP/etc; the non-strict JPEG path
    // only runs when it fails.
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()
        .and_then(|reader| reader.into_dimensions().ok())
        .or_else(|| jpeg_dimensions_non_strict(bytes))
}

/// Decodes dimensions and enforces the minimum edge length.
pub fn screen_dimensions(bytes: &[u8], min_dimension_px: u32) -> Result<(u32, u32), DropReason> {
    let (width, height) = image_dimensions(bytes).ok_or(DropReason::Decode)?;
    if width < min_dimension_px || height < min_dimension_px {
        return Err(DropReason::Dimension);
    }
    Ok((width, height))
}

/// Dedups and size-screens fetched bytes into a candidate ready to verify.
pub fn prescreen(
    deduper: &mut SignatureDeduper,
    discovery_index: usize,
    url: &str,
    bytes: Vec<u8>,
    min_dimension_px: u32,
) -> Result<ImageCandidate, DropReason> {
    let mut candidate = ImageCandidate::new(discovery_index, url);
    candidate.signature = compute_signature(&bytes);
    if !deduper.admit(&candidate.signature) {
        return Err(DropReason::Duplicate);
    }
    let (width, height) = screen_dimensions(&bytes, min_dimension_px)?;
    candidate.width = width;
    candidate.height = height;
    candidate.fetched_bytes = Some(bytes);
    Ok(candidate)
}
