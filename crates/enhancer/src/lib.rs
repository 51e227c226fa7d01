//! Best-effort video enhancement chain
//!
//! Four filters run in order: face restoration, upscale to the target
//! resolution, temporal smoothing, color correction. Each filter's output
//! replaces the working video only if the filter succeeds; a failing filter
//! is logged and the chain continues with the previous artifact. The final
//! working video is moved to the final output directory.
//!
//! Face restoration needs an external model helper and is probed once at
//! startup; when absent that filter is a no-op. The remaining filters are
//! plain ffmpeg invocations.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

/// Enhancement errors (internal to the chain; the driver swallows them)
#[derive(Debug, Error)]
pub enum EnhanceError {
    #[error("FFmpeg error: {0}")]
    FFmpeg(String),

    #[error("Helper error: {0}")]
    Helper(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for individual filters
pub type Result<T> = std::result::Result<T, EnhanceError>;

/// Enhancement configuration
#[derive(Debug, Clone)]
pub struct EnhancerConfig {
    /// Target output resolution (width, height)
    pub target_resolution: (u32, u32),
    /// Target frame rate for temporal smoothing
    pub target_fps: u32,
    /// Face restoration helper script, bound at startup when present
    pub face_restore_script: Option<PathBuf>,
}

impl Default for EnhancerConfig {
    fn default() -> Self {
        Self {
            target_resolution: (1280, 720),
            target_fps: 25,
            face_restore_script: std::env::var("AVATAR_FACE_RESTORE_SCRIPT")
                .ok()
                .map(PathBuf::from)
                .filter(|p| p.exists()),
        }
    }
}

/// Video enhancer: ordered best-effort filter chain
pub struct VideoEnhancer {
    config: EnhancerConfig,
}

impl VideoEnhancer {
    #[must_use]
    pub fn new(config: EnhancerConfig) -> Self {
        if config.face_restore_script.is_none() {
            warn!("No face restoration helper bound; that filter will be skipped");
        }
        Self { config }
    }

    /// Run the full chain and move the result to
    /// `{final_dir}/{job_id}.mp4`. Never fails the caller: any filter error
    /// falls back to the last good artifact, and if even the final move
    /// fails the input path is returned unchanged.
    pub async fn enhance(&self, video_path: &Path, job_id: &str, final_dir: &Path) -> PathBuf {
        let mut current = video_path.to_path_buf();

        match self.restore_faces(&current).await {
            Ok(next) => current = next,
            Err(e) => warn!("face restoration failed, keeping previous video: {}", e),
        }
        match self.upscale(&current).await {
            Ok(next) => current = next,
            Err(e) => warn!("upscale filter failed, keeping previous video: {}", e),
        }
        match self.smooth(&current).await {
            Ok(next) => current = next,
            Err(e) => warn!("temporal smoothing failed, keeping previous video: {}", e),
        }
        match self.correct_colors(&current).await {
            Ok(next) => current = next,
            Err(e) => warn!("color correction failed, keeping previous video: {}", e),
        }

        // Relocate the working video to its final home
        let final_path = final_dir.join(format!("{job_id}.mp4"));
        if current == final_path {
            return final_path;
        }
        if let Err(e) = fs::create_dir_all(final_dir) {
            warn!("Could not create final dir {}: {}", final_dir.display(), e);
            return current;
        }
        match move_file(&current, &final_path) {
            Ok(()) => {
                info!("Enhanced video finalized at {}", final_path.display());
                final_path
            }
            Err(e) => {
                warn!("Could not move video to final dir: {}", e);
                current
            }
        }
    }

    /// Face restoration via the probed helper script; no-op when unbound
    async fn restore_faces(&self, input: &Path) -> Result<PathBuf> {
        let Some(script) = &self.config.face_restore_script else {
            return Ok(input.to_path_buf());
        };

        let output_path = sibling(input, "restored");
        let output = Command::new("python3")
            .arg(script)
            .arg("--input")
            .arg(input)
            .arg("--output")
            .arg(&output_path)
            .output()
            .await
            .map_err(|e| EnhanceError::Helper(format!("failed to launch helper: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EnhanceError::Helper(format!(
                "face restoration exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        if !output_path.exists() {
            return Err(EnhanceError::Helper(
                "face restoration produced no output".to_string(),
            ));
        }
        Ok(output_path)
    }

    /// Upscale to the target resolution with lanczos scaling
    async fn upscale(&self, input: &Path) -> Result<PathBuf> {
        let (w, h) = self.config.target_resolution;
        let output_path = sibling(input, &format!("{w}x{h}"));
        run_ffmpeg_filter(input, &output_path, &format!("scale={w}:{h}:flags=lanczos")).await?;
        Ok(output_path)
    }

    /// Motion-interpolated temporal smoothing at the target frame rate
    async fn smooth(&self, input: &Path) -> Result<PathBuf> {
        let fps = self.config.target_fps;
        let output_path = sibling(input, "smoothed");
        run_ffmpeg_filter(
            input,
            &output_path,
            &format!("minterpolate=fps={fps}:mi_mode=blend"),
        )
        .await?;
        Ok(output_path)
    }

    /// Mild contrast/saturation correction
    async fn correct_colors(&self, input: &Path) -> Result<PathBuf> {
        let output_path = sibling(input, "graded");
        run_ffmpeg_filter(input, &output_path, "eq=contrast=1.05:saturation=1.1").await?;
        Ok(output_path)
    }
}

/// Output path next to the input: `{stem}_{tag}.mp4`
fn sibling(input: &Path, tag: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map_or_else(|| "video".to_string(), |s| s.to_string_lossy().to_string());
    input.with_file_name(format!("{stem}_{tag}.mp4"))
}

/// Run one ffmpeg video filter, copying audio through
async fn run_ffmpeg_filter(input: &Path, output_path: &Path, filter: &str) -> Result<()> {
    let output = Command::new("ffmpeg")
        .arg("-i")
        .arg(input)
        .arg("-vf")
        .arg(filter)
        .arg("-c:v")
        .arg("libx264")
        .arg("-c:a")
        .arg("copy")
        .arg("-y")
        .arg(output_path)
        .output()
        .await
        .map_err(|e| EnhanceError::FFmpeg(format!("failed to execute ffmpeg: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(EnhanceError::FFmpeg(format!("ffmpeg failed: {stderr}")));
    }
    if !output_path.exists() {
        return Err(EnhanceError::FFmpeg(
            "filter output was not created".to_string(),
        ));
    }
    Ok(())
}

/// Rename, falling back to copy + remove across filesystems
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::rename(from, to).or_else(|_| {
        fs::copy(from, to)?;
        fs::remove_file(from)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sibling_naming() {
        assert_eq!(
            sibling(Path::new("/videos/j1.mp4"), "restored"),
            PathBuf::from("/videos/j1_restored.mp4")
        );
        assert_eq!(
            sibling(Path::new("/videos/j1.mp4"), "1280x720"),
            PathBuf::from("/videos/j1_1280x720.mp4")
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = EnhancerConfig {
            face_restore_script: None,
            ..EnhancerConfig::default()
        };
        assert_eq!(config.target_resolution, (1280, 720));
        assert_eq!(config.target_fps, 25);
    }

    #[test]
    fn test_move_file_within_dir() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.mp4");
        let to = dir.path().join("b.mp4");
        fs::write(&from, b"video").unwrap();

        move_file(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"video");
    }

    #[tokio::test]
    async fn test_face_restore_noop_without_helper() {
        let enhancer = VideoEnhancer::new(EnhancerConfig {
            target_resolution: (1280, 720),
            target_fps: 25,
            face_restore_script: None,
        });
        let input = Path::new("/videos/raw.mp4");
        let result = enhancer.restore_faces(input).await.unwrap();
        assert_eq!(result, input);
    }

    #[tokio::test]
    async fn test_enhance_falls_back_to_input_on_total_failure() {
        // Nonexistent input: every ffmpeg filter fails, the helper is
        // unbound, and the final move cannot find the source. The chain must
        // still return a path rather than an error.
        let dir = tempfile::tempdir().unwrap();
        let enhancer = VideoEnhancer::new(EnhancerConfig {
            target_resolution: (1280, 720),
            target_fps: 25,
            face_restore_script: None,
        });
        let input = dir.path().join("missing.mp4");
        let result = enhancer.enhance(&input, "j1", &dir.path().join("final")).await;
        assert_eq!(result, input);
    }
}
