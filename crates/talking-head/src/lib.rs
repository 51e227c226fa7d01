//! Talking-head renderer wrapper
//!
//! The renderer is an external GPU inference script (audio + reference image
//! in, lip-synced video out). The wrapper probes for it once at startup,
//! invokes it per job, and adopts the newest `.mp4` the script leaves in the
//! result directory (the script names its outputs with its own timestamps).

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

/// Renderer errors
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Renderer unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Render failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for render operations
pub type Result<T> = std::result::Result<T, RenderError>;

/// Renderer configuration
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Inference script location
    pub script_path: PathBuf,
    /// Model checkpoint directory handed to the script
    pub checkpoint_dir: PathBuf,
    /// Output resolution requested from the renderer
    pub resolution: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        let home = std::env::var("AVATAR_RENDERER_HOME")
            .unwrap_or_else(|_| "/workspace/renderer".to_string());
        Self {
            script_path: std::env::var("AVATAR_RENDER_SCRIPT")
                .map_or_else(|_| PathBuf::from(&home).join("inference.py"), PathBuf::from),
            checkpoint_dir: std::env::var("AVATAR_RENDER_CHECKPOINTS")
                .map_or_else(|_| PathBuf::from(&home).join("checkpoints"), PathBuf::from),
            resolution: 512,
        }
    }
}

/// Talking-head renderer bound to an inference script
pub struct TalkingHeadRenderer {
    config: RendererConfig,
    available: bool,
}

impl TalkingHeadRenderer {
    /// Probe for the inference script once at startup
    #[must_use]
    pub fn probe(config: RendererConfig) -> Self {
        let available = config.script_path.exists();
        if available {
            info!("Talking-head renderer bound: {}", config.script_path.display());
        } else {
            warn!(
                "Talking-head inference script not found at {}; rendering will fail",
                config.script_path.display()
            );
        }
        Self { config, available }
    }

    /// Whether a renderer is bound in this environment
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Validate render inputs before spawning the subprocess
    pub fn validate_inputs(image_path: &Path, audio_path: &Path) -> Result<()> {
        if !image_path.exists() {
            return Err(RenderError::InvalidInput(format!(
                "reference image not found: {}",
                image_path.display()
            )));
        }
        if !audio_path.exists() {
            return Err(RenderError::InvalidInput(format!(
                "audio file not found: {}",
                audio_path.display()
            )));
        }
        let image_ok = image_path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"));
        if !image_ok {
            return Err(RenderError::InvalidInput(
                "reference image must be jpg or png".to_string(),
            ));
        }
        let audio_ok = audio_path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
        if !audio_ok {
            return Err(RenderError::InvalidInput(
                "audio must be a WAV file".to_string(),
            ));
        }
        Ok(())
    }

    /// Render a talking-head video from a reference image and an audio track,
    /// leaving the result at `output_path`
    pub async fn render(
        &self,
        image_path: &Path,
        audio_path: &Path,
        output_path: &Path,
    ) -> Result<PathBuf> {
        if !self.available {
            return Err(RenderError::Unavailable(format!(
                "inference script not found at {}",
                self.config.script_path.display()
            )));
        }
        Self::validate_inputs(image_path, audio_path)?;

        let result_dir = output_path
            .parent()
            .ok_or_else(|| RenderError::InvalidInput("output path has no parent".to_string()))?;
        fs::create_dir_all(result_dir)?;

        info!(
            "Rendering talking head: image={}, audio={}",
            image_path.display(),
            audio_path.display()
        );

        let output = Command::new("python3")
            .arg(&self.config.script_path)
            .arg("--driven_audio")
            .arg(audio_path)
            .arg("--source_image")
            .arg(image_path)
            .arg("--result_dir")
            .arg(result_dir)
            .arg("--checkpoint_dir")
            .arg(&self.config.checkpoint_dir)
            .arg("--size")
            .arg(self.config.resolution.to_string())
            .arg("--preprocess")
            .arg("full")
            .current_dir(
                self.config
                    .script_path
                    .parent()
                    .unwrap_or_else(|| Path::new(".")),
            )
            .output()
            .await
            .map_err(|e| RenderError::Failed(format!("failed to launch renderer: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RenderError::Failed(format!(
                "renderer exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        // Adopt the newest mp4 in the result dir and move it to the requested
        // output path
        let rendered = newest_mp4(result_dir)?.ok_or_else(|| {
            RenderError::Failed("renderer produced no video output".to_string())
        })?;

        if rendered != output_path {
            fs::rename(&rendered, output_path).or_else(|_| {
                fs::copy(&rendered, output_path)
                    .and_then(|_| fs::remove_file(&rendered))
                    .map(|()| ())
            })?;
        }

        Ok(output_path.to_path_buf())
    }
}

/// Most recently modified `.mp4` in a directory
fn newest_mp4(dir: &Path) -> Result<Option<PathBuf>> {
    let newest = fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "mp4"))
        .max_by_key(|p| {
            fs::metadata(p)
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        });
    Ok(newest)
}
