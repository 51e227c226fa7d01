//! Caption sidecar generation for training datasets
//!
//! Captions are deterministic: every crop of a user gets the same trigger
//! phrase, which the trainer binds to the identity token.

use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Generate caption sidecar files for processed portrait crops
pub struct CaptionGenerator;

impl CaptionGenerator {
    /// Caption text for a user's training images
    #[must_use]
    pub fn caption_for(user_id: &str) -> String {
        format!("photo of <user_{user_id}> person")
    }

    /// Write one `.txt` sidecar per image, same stem as the image
    pub fn write_captions(user_id: &str, image_paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let caption = Self::caption_for(user_id);
        let mut caption_paths = Vec::with_capacity(image_paths.len());

        for image_path in image_paths {
            let caption_path = image_path.with_extension("txt");
            fs::write(&caption_path, &caption)?;
            caption_paths.push(caption_path);
        }

        Ok(caption_paths)
    }

    /// Validate dataset completeness: at least one image, and every image has
    /// its caption sidecar
    #[must_use]
    pub fn dataset_is_complete(dataset_dir: &Path) -> bool {
        let Ok(entries) = fs::read_dir(dataset_dir) else {
            return false;
        };

        let images: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "jpg"))
            .collect();

        !images.is_empty() && images.iter().all(|img| img.with_extension("txt").exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caption_format() {
        assert_eq!(
            CaptionGenerator::caption_for("u1"),
            "photo of <user_u1> person"
        );
    }

    #[test]
    fn test_write_captions_creates_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let images = vec![dir.path().join("0000.jpg"), dir.path().join("0001.jpg")];
        for img in &images {
            fs::write(img, b"jpeg").unwrap();
        }

        let captions = CaptionGenerator::write_captions("u1", &images).unwrap();
        assert_eq!(captions.len(), 2);
        for caption in &captions {
            assert_eq!(
                fs::read_to_string(caption).unwrap(),
                "photo of <user_u1> person"
            );
        }
    }

    #[test]
    fn test_dataset_completeness() {
        let dir = tempfile::tempdir().unwrap();
        // Empty dataset is incomplete
        assert!(!CaptionGenerator::dataset_is_complete(dir.path()));

        fs::write(dir.path().join("0000.jpg"), b"jpeg").unwrap();
        assert!(!CaptionGenerator::dataset_is_complete(dir.path()));

        fs::write(dir.path().join("0000.txt"), b"caption").unwrap();
        assert!(CaptionGenerator::dataset_is_complete(dir.path()));

        // A second image without caption breaks completeness again
        fs::write(dir.path().join("0001.jpg"), b"jpeg").unwrap();
        assert!(!CaptionGenerator::dataset_is_complete(dir.path()));
    }
}
