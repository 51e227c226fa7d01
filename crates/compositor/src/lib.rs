//! Product compositing: avatar video + product image, side by side
//!
//! The avatar takes the left 60% of the frame, the product the right 40%.
//! The product image is letterboxed onto a white canvas first so arbitrary
//! aspect ratios survive without distortion. Composition itself is one ffmpeg
//! filter-graph invocation; audio is copied through from the avatar video.
//!
//! Compositing is an enhancement stage: callers treat any failure here as
//! non-fatal and keep the pre-compositing video.

use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

/// Fraction of the output width given to the avatar video
const AVATAR_WIDTH_RATIO: f32 = 0.6;

/// Compositor errors
#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("Image error: {0}")]
    Image(String),

    #[error("FFmpeg error: {0}")]
    FFmpeg(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<image::ImageError> for CompositeError {
    fn from(err: image::ImageError) -> Self {
        CompositeError::Image(err.to_string())
    }
}

/// Result type for composition operations
pub type Result<T> = std::result::Result<T, CompositeError>;

/// Split the output width into avatar and product columns
#[must_use]
pub fn column_widths(output_width: u32) -> (u32, u32) {
    // Keep both columns even: libx264 rejects odd dimensions
    let avatar = ((output_width as f32 * AVATAR_WIDTH_RATIO) as u32) & !1;
    (avatar, output_width - avatar)
}

/// Letterbox the product image onto a white canvas of exactly
/// `target_width` x `target_height`
pub fn letterbox_product(
    product_image_path: &Path,
    target_width: u32,
    target_height: u32,
    output_path: &Path,
) -> Result<PathBuf> {
    let product = image::open(product_image_path)?.to_rgb8();
    let (w, h) = product.dimensions();

    // Fit inside the target while preserving aspect ratio
    let scale = (target_width as f32 / w as f32).min(target_height as f32 / h as f32);
    let new_w = ((w as f32 * scale) as u32).max(1);
    let new_h = ((h as f32 * scale) as u32).max(1);
    let resized = image::imageops::resize(
        &product,
        new_w,
        new_h,
        image::imageops::FilterType::Lanczos3,
    );

    let mut canvas = RgbImage::from_pixel(target_width, target_height, Rgb([255, 255, 255]));
    let x_offset = i64::from((target_width - new_w) / 2);
    let y_offset = i64::from((target_height - new_h) / 2);
    image::imageops::overlay(&mut canvas, &resized, x_offset, y_offset);

    canvas
        .save(output_path)
        .map_err(|e| CompositeError::Image(e.to_string()))?;
    Ok(output_path.to_path_buf())
}

/// Compose the avatar video with a product image into a side-by-side layout
pub async fn compose_with_product(
    avatar_video_path: &Path,
    product_image_path: &Path,
    output_path: &Path,
    output_size: (u32, u32),
) -> Result<PathBuf> {
    let (width, height) = output_size;
    let (avatar_w, product_w) = column_widths(width);

    // Prepare the product column next to the output
    let canvas_path = output_path.with_extension("product.png");
    letterbox_product(product_image_path, product_w, height, &canvas_path)?;

    let filter = format!(
        "[0:v]scale={avatar_w}:{height}:force_original_aspect_ratio=decrease,\
         pad={avatar_w}:{height}:(ow-iw)/2:(oh-ih)/2:white[left];\
         [left][1:v]hstack=inputs=2[v]"
    );

    let output = Command::new("ffmpeg")
        .arg("-i")
        .arg(avatar_video_path)
        .arg("-i")
        .arg(&canvas_path)
        .arg("-filter_complex")
        .arg(&filter)
        .arg("-map")
        .arg("[v]")
        .arg("-map")
        .arg("0:a?")
        .arg("-c:v")
        .arg("libx264")
        .arg("-c:a")
        .arg("aac")
        .arg("-y")
        .arg(output_path)
        .output()
        .await
        .map_err(|e| CompositeError::FFmpeg(format!("failed to execute ffmpeg: {e}")))?;

    // The product canvas is an intermediate artifact
    let _ = std::fs::remove_file(&canvas_path);

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CompositeError::FFmpeg(format!("ffmpeg failed: {stderr}")));
    }
    if !output_path.exists() {
        return Err(CompositeError::FFmpeg(
            "composed output was not created".to_string(),
        ));
    }

    info!(
        "Composed product layout: {} ({}x{}, avatar {}px / product {}px)",
        output_path.display(),
        width,
        height,
        avatar_w,
        product_w
    );
    Ok(output_path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_widths_are_even_and_sum() {
        let (avatar, product) = column_widths(1280);
        assert_eq!(avatar + product, 1280);
        assert_eq!(avatar % 2, 0);
        assert_eq!(avatar, 768);
        assert_eq!(product, 512);
    }

    #[test]
    fn test_column_widths_odd_total() {
        let (avatar, product) = column_widths(854);
        assert_eq!(avatar + product, 854);
        assert_eq!(avatar % 2, 0);
    }

    #[test]
    fn test_letterbox_wide_product() {
        let dir = tempfile::tempdir().unwrap();
        let product = dir.path().join("product.png");
        RgbImage::from_pixel(400, 100, Rgb([10, 20, 30]))
            .save(&product)
            .unwrap();

        let out = dir.path().join("canvas.png");
        letterbox_product(&product, 512, 720, &out).unwrap();

        let canvas = image::open(&out).unwrap().to_rgb8();
        assert_eq!(canvas.dimensions(), (512, 720));
        // Corners are white padding, center carries the product
        assert_eq!(canvas.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(canvas.get_pixel(256, 360), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_letterbox_tall_product() {
        let dir = tempfile::tempdir().unwrap();
        let product = dir.path().join("product.png");
        RgbImage::from_pixel(100, 400, Rgb([10, 20, 30]))
            .save(&product)
            .unwrap();

        let out = dir.path().join("canvas.png");
        letterbox_product(&product, 512, 720, &out).unwrap();

        let canvas = image::open(&out).unwrap().to_rgb8();
        assert_eq!(canvas.dimensions(), (512, 720));
        assert_eq!(canvas.get_pixel(5, 360), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_letterbox_missing_product() {
        let dir = tempfile::tempdir().unwrap();
        let result = letterbox_product(
            &dir.path().join("missing.png"),
            512,
            720,
            &dir.path().join("canvas.png"),
        );
        assert!(result.is_err());
    }
}
