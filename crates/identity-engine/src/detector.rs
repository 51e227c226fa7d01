//! Portrait detection using an UltraFace RFB-320 model via ONNX Runtime
//!
//! The pipeline only ever needs the single best portrait per photo, so
//! postprocessing skips full non-maximum suppression and selects the highest
//! scoring detection directly (score weighted by box area, which favors the
//! subject over background faces).

use crate::IdentityError;
use image::RgbImage;
use ndarray::Array4;
use ort::{session::Session, value::TensorRef};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

// UltraFace RFB-320 geometry: 4 feature maps over a 320x240 input.
const INPUT_WIDTH: u32 = 320;
const INPUT_HEIGHT: u32 = 240;
const FEATURE_MAPS: [(usize, usize); 4] = [(40, 30), (20, 15), (10, 8), (5, 4)];
const STRIDES: [(f32, f32); 4] = [(8.0, 8.0), (16.0, 16.0), (32.0, 30.0), (64.0, 60.0)];
const MIN_BOXES: [&[f32]; 4] = [
    &[10.0, 16.0, 24.0],
    &[32.0, 48.0],
    &[64.0, 96.0],
    &[128.0, 192.0, 256.0],
];
const PRIOR_COUNT: usize = 4420;
// Regression variances from the UltraFace reference implementation
const CENTER_VARIANCE: f32 = 0.1;
const SIZE_VARIANCE: f32 = 0.2;

/// Configuration for portrait detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Minimum confidence for a detection to count as a usable portrait
    pub confidence_threshold: f32,
    /// Reject boxes smaller than this fraction of the image
    pub min_box_size: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.50,
            min_box_size: 0.03,
        }
    }
}

/// A detected portrait, in pixel coordinates of the source image
#[derive(Debug, Clone, PartialEq)]
pub struct Portrait {
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Portrait {
    #[must_use]
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Box center, the pivot for the dataset crop
    #[must_use]
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// Prior box in center form, normalized to [0, 1]
#[derive(Debug, Clone, Copy)]
struct Prior {
    cx: f32,
    cy: f32,
    w: f32,
    h: f32,
}

fn generate_priors() -> Vec<Prior> {
    let mut priors = Vec::with_capacity(PRIOR_COUNT);

    for (level, &(map_w, map_h)) in FEATURE_MAPS.iter().enumerate() {
        let (stride_w, stride_h) = STRIDES[level];
        for j in 0..map_h {
            for i in 0..map_w {
                let cx = ((i as f32 + 0.5) * stride_w / INPUT_WIDTH as f32).clamp(0.0, 1.0);
                let cy = ((j as f32 + 0.5) * stride_h / INPUT_HEIGHT as f32).clamp(0.0, 1.0);
                for &min_size in MIN_BOXES[level] {
                    priors.push(Prior {
                        cx,
                        cy,
                        w: (min_size / INPUT_WIDTH as f32).clamp(0.0, 1.0),
                        h: (min_size / INPUT_HEIGHT as f32).clamp(0.0, 1.0),
                    });
                }
            }
        }
    }

    debug_assert_eq!(priors.len(), PRIOR_COUNT);
    priors
}

/// Decode one regression output against its prior, returning corner-form
/// normalized coordinates
fn decode_box(loc: &[f32], prior: &Prior) -> [f32; 4] {
    let cx = prior.cx + loc[0] * CENTER_VARIANCE * prior.w;
    let cy = prior.cy + loc[1] * CENTER_VARIANCE * prior.h;
    let w = prior.w * (loc[2] * SIZE_VARIANCE).exp();
    let h = prior.h * (loc[3] * SIZE_VARIANCE).exp();
    [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]
}

/// Portrait detector bound to an ONNX session
pub struct PortraitDetector {
    session: Session,
    config: DetectorConfig,
    priors: Vec<Prior>,
}

impl PortraitDetector {
    /// Load the UltraFace model from an ONNX file
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        config: DetectorConfig,
    ) -> Result<Self, IdentityError> {
        let model_path = model_path.as_ref();
        info!("Loading portrait detection model from {:?}", model_path);

        let session = Session::builder()
            .map_err(|e| IdentityError::ModelLoad(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| IdentityError::ModelLoad(e.to_string()))?;

        Ok(Self {
            session,
            config,
            priors: generate_priors(),
        })
    }

    /// Find the best portrait in an image, or `None` when no face clears the
    /// confidence threshold. Zero faces is a normal outcome, not an error.
    pub fn best_portrait(&mut self, image: &RgbImage) -> Result<Option<Portrait>, IdentityError> {
        let (orig_w, orig_h) = image.dimensions();
        let input = preprocess(image);

        let input_tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| IdentityError::Inference(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e| IdentityError::Inference(e.to_string()))?;

        // UltraFace exports the score tensor as "confidences"; older RetinaFace
        // exports call it "scores"
        let scores_value = outputs
            .get("confidences")
            .or_else(|| outputs.get("scores"))
            .ok_or_else(|| IdentityError::Inference("confidences output not found".into()))?;
        let (scores_shape, scores) = scores_value
            .try_extract_tensor::<f32>()
            .map_err(|e| IdentityError::Inference(format!("failed to extract scores: {e}")))?;

        let boxes_value = outputs
            .get("boxes")
            .ok_or_else(|| IdentityError::Inference("boxes output not found".into()))?;
        let (boxes_shape, boxes) = boxes_value
            .try_extract_tensor::<f32>()
            .map_err(|e| IdentityError::Inference(format!("failed to extract boxes: {e}")))?;

        if scores_shape.len() != 3 || boxes_shape.len() != 3 {
            return Err(IdentityError::Inference(format!(
                "unexpected output shapes: scores={scores_shape:?}, boxes={boxes_shape:?}"
            )));
        }
        let num_boxes = scores_shape[1] as usize;
        if num_boxes != self.priors.len() {
            return Err(IdentityError::Inference(format!(
                "prior count mismatch: {} priors vs {} model boxes",
                self.priors.len(),
                num_boxes
            )));
        }

        // Scores are raw [background, face] logits per anchor; softmax them,
        // decode the surviving boxes and keep the best by score-weighted area.
        let mut best: Option<(f32, Portrait)> = None;
        for i in 0..num_boxes {
            let exp_bg = scores[i * 2].exp();
            let exp_face = scores[i * 2 + 1].exp();
            let confidence = exp_face / (exp_bg + exp_face);
            if confidence < self.config.confidence_threshold {
                continue;
            }

            let decoded = decode_box(&boxes[i * 4..i * 4 + 4], &self.priors[i]);
            let x1 = decoded[0].clamp(0.0, 1.0);
            let y1 = decoded[1].clamp(0.0, 1.0);
            let x2 = decoded[2].clamp(0.0, 1.0);
            let y2 = decoded[3].clamp(0.0, 1.0);
            if x2 <= x1 || y2 <= y1 {
                continue;
            }
            let (w, h) = (x2 - x1, y2 - y1);
            if w < self.config.min_box_size || h < self.config.min_box_size {
                continue;
            }

            let rank = confidence * w * h;
            if best.as_ref().is_none_or(|(r, _)| rank > *r) {
                best = Some((
                    rank,
                    Portrait {
                        confidence,
                        x1: x1 * orig_w as f32,
                        y1: y1 * orig_h as f32,
                        x2: x2 * orig_w as f32,
                        y2: y2 * orig_h as f32,
                    },
                ));
            }
        }

        debug!(
            "Portrait detection on {}x{} image: {}",
            orig_w,
            orig_h,
            best.as_ref()
                .map_or_else(|| "no face".to_string(), |(_, p)| format!(
                    "face at {:.0},{:.0} conf {:.2}",
                    p.x1, p.y1, p.confidence
                ))
        );

        Ok(best.map(|(_, p)| p))
    }
}

/// Resize to 320x240 and normalize to the (pixel - 127) / 128 range the
/// UltraFace export expects, in CHW layout
fn preprocess(image: &RgbImage) -> Array4<f32> {
    let resized = image::imageops::resize(
        image,
        INPUT_WIDTH,
        INPUT_HEIGHT,
        image::imageops::FilterType::Triangle,
    );

    let mut input =
        Array4::<f32>::zeros((1, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize));
    for y in 0..INPUT_HEIGHT as usize {
        for x in 0..INPUT_WIDTH as usize {
            let pixel = resized.get_pixel(x as u32, y as u32);
            for c in 0..3 {
                input[[0, c, y, x]] = (f32::from(pixel[c]) - 127.0) / 128.0;
            }
        }
    }
    input
}
