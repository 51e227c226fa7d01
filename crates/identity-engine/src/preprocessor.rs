//! Portrait preprocessing: detect, crop, and normalize training photos
//!
//! Crops are centered on the detected face, not the image center: vertical
//! phone photos put the face in the top third, and a center crop would feed
//! the trainer headless torsos.

use crate::detector::{Portrait, PortraitDetector};
use crate::{IdentityError, Result};
use image::imageops::FilterType;
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// Crop side = face box * padding factor, so the crop keeps the full head and
// some shoulders
const CROP_PADDING: f32 = 2.5;
const MIN_CROP_SIDE: f32 = 256.0;

/// Preprocess raw uploaded photos into square portrait crops
pub struct PortraitPreprocessor {
    detector: PortraitDetector,
    /// Side length of the output crops
    portrait_size: u32,
}

impl PortraitPreprocessor {
    #[must_use]
    pub fn new(detector: PortraitDetector, portrait_size: u32) -> Self {
        Self {
            detector,
            portrait_size,
        }
    }

    /// Process a single photo: detect the portrait and write a square crop.
    /// Returns `false` when no usable face is found (the photo is discarded,
    /// not an error).
    pub fn process_image(&mut self, image_path: &Path, output_path: &Path) -> Result<bool> {
        let image = image::open(image_path)?.to_rgb8();

        let Some(portrait) = self.detector.best_portrait(&image)? else {
            return Ok(false);
        };

        let cropped = crop_around_portrait(&image, &portrait);
        let resized = image::imageops::resize(
            &cropped,
            self.portrait_size,
            self.portrait_size,
            FilterType::Lanczos3,
        );

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        resized
            .save(output_path)
            .map_err(|e| IdentityError::Image(e.to_string()))?;
        Ok(true)
    }

    /// Process a batch of photos into the user's dataset directory.
    /// Photos without a detectable face are skipped; the returned paths are
    /// the crops that survived.
    pub fn process_batch(
        &mut self,
        image_paths: &[PathBuf],
        dataset_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dataset_dir)?;

        let mut processed = Vec::with_capacity(image_paths.len());
        for (idx, image_path) in image_paths.iter().enumerate() {
            let output_path = dataset_dir.join(format!("{idx:04}.jpg"));
            match self.process_image(image_path, &output_path) {
                Ok(true) => processed.push(output_path),
                Ok(false) => {
                    info!("No face detected in {}, skipping", image_path.display());
                }
                Err(e) => {
                    warn!("Failed to preprocess {}: {}", image_path.display(), e);
                }
            }
        }

        Ok(processed)
    }
}

/// Crop a square region around the portrait, clamped into the image
fn crop_around_portrait(image: &RgbImage, portrait: &Portrait) -> RgbImage {
    let (w, h) = image.dimensions();
    let (cx, cy) = portrait.center();

    let side = (portrait.width().max(portrait.height()) * CROP_PADDING)
        .max(MIN_CROP_SIDE)
        .min(w.min(h) as f32);
    let half = side / 2.0;

    let start_x = (cx - half).clamp(0.0, (w as f32 - side).max(0.0)) as u32;
    let start_y = (cy - half).clamp(0.0, (h as f32 - side).max(0.0)) as u32;
    let side = (side as u32).min(w - start_x).min(h - start_y).max(1);

    image::imageops::crop_imm(image, start_x, start_y, side, side).to_image()
}

/// Pick the representative face image from a processed dataset.
/// Larger files carry less compression damage and tend to be the frontal,
/// well-lit shots, so file size is the ranking.
#[must_use]
pub fn best_face_image(dataset_dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dataset_dir).ok()?;

    entries
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "jpg"))
        .max_by_key(|p| fs::metadata(p).map_or(0, |m| m.len()))
}
