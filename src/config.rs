//! # Configuration Management Module
//!
//! All tunables of the pipeline live in [`Config`].
//!
//! ## Responsibilities:
//! - Sensible defaults for every parameter
//! - Validation of the parameters before any batch starts
//! - Loading/saving as JSON, plus environment variable overrides
//!
//! ## Main parameters:
//! - `core_count`: preview workers; encoding uses half (both floored at 1)
//! - `preview_video_type`: `png`, `gif` or `screens`
//! - `preview_over_size`: images at or under this size are served as-is
//! - `screens_over_size`: above this size screens are captured by independent seeks
//! - `codecs_to_convert` / `codecs_to_ignore`: regexes deciding which videos re-encode
//! - `tool_timeout_secs`: deadline of every external tool call
//!
//! ## Example:
//! ```rust
//! use media_pipeline::{Config, PreviewVideoType};
//!
//! let config = Config {
//!     core_count: 8,
//!     preview_video_type: PreviewVideoType::Screens,
//!     ..Default::default()
//! };
//! config.validate()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// How a video preview is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PreviewVideoType {
    #[default]
    Png,
    Gif,
    Screens,
}

impl PreviewVideoType {
    /// Extension of the preview file produced for a video.
    pub fn extension(&self) -> &'static str {
        match self {
            PreviewVideoType::Png => "png",
            PreviewVideoType::Gif => "gif",
            PreviewVideoType::Screens => "webp",
        }
    }
}

impl fmt::Display for PreviewVideoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PreviewVideoType::Png => "png",
            PreviewVideoType::Gif => "gif",
            PreviewVideoType::Screens => "screens",
        };
        f.write_str(name)
    }
}

impl FromStr for PreviewVideoType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "png" => Ok(PreviewVideoType::Png),
            "gif" => Ok(PreviewVideoType::Gif),
            "screens" => Ok(PreviewVideoType::Screens),
            other => Err(anyhow::anyhow!(
                "preview video type must be png, gif or screens, got {}",
                other
            )),
        }
    }
}

/// Configuration for the media pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root media directory, scrubbed out of stored task messages
    pub dir: PathBuf,
    /// Number of preview workers; encoding uses half
    pub core_count: usize,
    pub preview_video_type: PreviewVideoType,
    /// Images larger than this (bytes) get a thumbnail
    pub preview_over_size: u64,
    /// Videos larger than this (bytes) are screened with independent seeks
    pub screens_over_size: u64,
    pub preview_number_of_screens: u32,
    /// Seconds skipped at the start of a video before the first screen
    pub preview_first_screen_offset: u32,
    /// Width of thumbnails and single frame previews
    pub preview_width: u32,
    /// Abort a preview batch on the first failure
    pub preview_create_fail_is_fatal: bool,
    /// Regex of codecs eligible for conversion
    pub codecs_to_convert: String,
    /// Regex of codecs never converted
    pub codecs_to_ignore: String,
    /// Encoder handed to ffmpeg (`libx265`, `hevc_nvenc`)
    pub codec_for_conversion: String,
    /// Codec name ffprobe reports for encoded output
    pub codec_for_conversion_name: String,
    /// Use the CUDA decode/encode path
    pub hardware_acceleration: bool,
    /// Directory for encoded files (None = next to the source)
    pub encoding_destination: Option<PathBuf>,
    pub encoding_filename_modifier: String,
    pub remove_duplicate_files: bool,
    /// Where removed duplicates are moved to (None = delete)
    pub remove_location: Option<PathBuf>,
    /// Deadline for a single external tool invocation
    pub tool_timeout_secs: u64,
    /// Deadline for one worker pool item
    pub item_timeout_secs: u64,
    pub task_queue_size: usize,
    pub max_concurrent_tasks: usize,
    /// Output progress and results as JSON lines
    pub json_output: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::new(),
            core_count: 4,
            preview_video_type: PreviewVideoType::Png,
            preview_over_size: 1_024_000,
            screens_over_size: 50 * 1_024_000,
            preview_number_of_screens: 12,
            preview_first_screen_offset: 5,
            preview_width: 640,
            preview_create_fail_is_fatal: false,
            codecs_to_convert: ".*".to_string(),
            codecs_to_ignore: "hevc".to_string(),
            codec_for_conversion: "libx265".to_string(),
            codec_for_conversion_name: "hevc".to_string(),
            hardware_acceleration: false,
            encoding_destination: None,
            encoding_filename_modifier: "_h265".to_string(),
            remove_duplicate_files: false,
            remove_location: None,
            tool_timeout_secs: 600,
            item_timeout_secs: 3600,
            task_queue_size: 100,
            max_concurrent_tasks: 2,
            json_output: false,
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        Regex::new(&self.codecs_to_convert)
            .with_context(|| format!("codecs_to_convert is not a valid regex: {}", self.codecs_to_convert))?;
        Regex::new(&self.codecs_to_ignore)
            .with_context(|| format!("codecs_to_ignore is not a valid regex: {}", self.codecs_to_ignore))?;

        if self.preview_number_of_screens == 0 {
            return Err(anyhow::anyhow!("Number of screens must be greater than 0"));
        }

        if self.preview_width == 0 {
            return Err(anyhow::anyhow!("Preview width must be greater than 0"));
        }

        if self.codec_for_conversion.trim().is_empty() {
            return Err(anyhow::anyhow!("A codec for conversion is required"));
        }

        if self.encoding_filename_modifier.is_empty() {
            return Err(anyhow::anyhow!(
                "Encoding filename modifier must not be empty, encoded files would overwrite their source"
            ));
        }

        if self.tool_timeout_secs == 0 || self.item_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Timeouts must be greater than 0"));
        }

        if let Some(ref dest) = self.encoding_destination {
            if !dest.is_dir() {
                return Err(anyhow::anyhow!(
                    "Encoding destination is not a directory: {}",
                    dest.display()
                ));
            }
        }

        Ok(())
    }

    /// Workers for the preview pool
    pub fn preview_workers(&self) -> usize {
        self.core_count.max(1)
    }

    /// Workers for the encoding pool, half of the preview pool
    pub fn encoding_workers(&self) -> usize {
        (self.core_count / 2).max(1)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }

    /// Removes the configured root directory from a message.
    pub fn scrub_paths(&self, message: &str) -> String {
        let root = self.dir.to_string_lossy();
        let root = root.trim_end_matches('/');
        if root.is_empty() {
            return message.to_string();
        }
        message
            .replace(&format!("{}/", root), "")
            .replace(root, "")
    }

    /// Load configuration from file
    pub async fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Override fields from environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: FromStr>(key: &str, value: &str) -> Result<T>
        where
            T::Err: fmt::Display,
        {
            value
                .trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("Invalid value for {}: {} ({})", key, value, e))
        }

        if let Some(v) = lookup("DIR") {
            self.dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("CORE_COUNT") {
            self.core_count = parse("CORE_COUNT", &v)?;
        }
        if let Some(v) = lookup("PREVIEW_VIDEO_TYPE") {
            self.preview_video_type = v.parse()?;
        }
        if let Some(v) = lookup("CREATE_PREVIEW_SIZE") {
            self.preview_over_size = parse("CREATE_PREVIEW_SIZE", &v)?;
        }
        if let Some(v) = lookup("SEEK_SCREEN_OVER_SIZE") {
            self.screens_over_size = parse("SEEK_SCREEN_OVER_SIZE", &v)?;
        }
        if let Some(v) = lookup("TOTAL_SCREENS") {
            self.preview_number_of_screens = parse("TOTAL_SCREENS", &v)?;
        }
        if let Some(v) = lookup("FIRST_SCREEN_OFFSET") {
            self.preview_first_screen_offset = parse("FIRST_SCREEN_OFFSET", &v)?;
        }
        if let Some(v) = lookup("CODECS_TO_CONVERT") {
            self.codecs_to_convert = v;
        }
        if let Some(v) = lookup("CODECS_TO_IGNORE") {
            self.codecs_to_ignore = v;
        }
        if let Some(v) = lookup("CODEC_FOR_CONVERSION") {
            self.codec_for_conversion = v;
        }
        if let Some(v) = lookup("CODEC_FOR_CONVERSION_NAME") {
            self.codec_for_conversion_name = v;
        }
        if let Some(v) = lookup("ENCODING_DESTINATION") {
            self.encoding_destination = Some(PathBuf::from(v)).filter(|p| !p.as_os_str().is_empty());
        }
        if let Some(v) = lookup("ENCODING_FILENAME_MODIFIER") {
            self.encoding_filename_modifier = v;
        }
        if let Some(v) = lookup("REMOVE_DUPLICATE_FILES") {
            self.remove_duplicate_files = parse("REMOVE_DUPLICATE_FILES", &v)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.codecs_to_convert = "(unclosed".to_string();
        assert!(config.validate().is_err());

        config.codecs_to_convert = ".*".to_string();
        config.preview_number_of_screens = 0;
        assert!(config.validate().is_err());

        config.preview_number_of_screens = 12;
        config.encoding_filename_modifier = String::new();
        assert!(config.validate().is_err());

        config.encoding_filename_modifier = "_h265".to_string();
        config.encoding_destination = Some(PathBuf::from("/definitely/not/here"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.core_count, 4);
        assert_eq!(config.preview_over_size, 1_024_000);
        assert_eq!(config.preview_number_of_screens, 12);
        assert_eq!(config.preview_first_screen_offset, 5);
        assert_eq!(config.codec_for_conversion_name, "hevc");
        assert_eq!(config.encoding_filename_modifier, "_h265");
        assert_eq!(config.preview_video_type, PreviewVideoType::Png);
        assert!(!config.remove_duplicate_files);
    }

    #[test]
    fn test_worker_counts_never_drop_to_zero() {
        let mut config = Config::default();
        assert_eq!(config.preview_workers(), 4);
        assert_eq!(config.encoding_workers(), 2);

        config.core_count = 0;
        assert_eq!(config.preview_workers(), 1);
        assert_eq!(config.encoding_workers(), 1);

        config.core_count = 1;
        assert_eq!(config.encoding_workers(), 1);
    }

    #[test]
    fn test_scrub_paths() {
        let config = Config {
            dir: PathBuf::from("/srv/media/"),
            ..Default::default()
        };
        assert_eq!(
            config.scrub_paths("failed to read /srv/media/trip/a.mp4"),
            "failed to read trip/a.mp4"
        );
        assert_eq!(config.scrub_paths("nothing here"), "nothing here");

        let unrooted = Config::default();
        assert_eq!(unrooted.scrub_paths("/tmp/x"), "/tmp/x");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CORE_COUNT", "8"),
            ("PREVIEW_VIDEO_TYPE", "screens"),
            ("TOTAL_SCREENS", "20"),
            ("CODECS_TO_IGNORE", "hevc|av1"),
            ("REMOVE_DUPLICATE_FILES", "true"),
            ("ENCODING_DESTINATION", ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_vars(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.core_count, 8);
        assert_eq!(config.preview_video_type, PreviewVideoType::Screens);
        assert_eq!(config.preview_number_of_screens, 20);
        assert_eq!(config.codecs_to_ignore, "hevc|av1");
        assert!(config.remove_duplicate_files);
        assert!(config.encoding_destination.is_none());

        let mut broken = Config::default();
        assert!(broken
            .apply_vars(|k| (k == "CORE_COUNT").then(|| "many".to_string()))
            .is_err());
    }

    #[tokio::test]
    async fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let original_config = Config {
            core_count: 6,
            preview_video_type: PreviewVideoType::Gif,
            codec_for_conversion: "hevc_nvenc".to_string(),
            hardware_acceleration: true,
            ..Default::default()
        };

        original_config.save_to_file(&config_path).await.unwrap();
        let loaded_config = Config::from_file(&config_path).await.unwrap();

        assert_eq!(loaded_config.core_count, 6);
        assert_eq!(loaded_config.preview_video_type, PreviewVideoType::Gif);
        assert_eq!(loaded_config.codec_for_conversion, "hevc_nvenc");
        assert!(loaded_config.hardware_acceleration);
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::from_file(&temp_dir.path().join("absent.json")).await.unwrap();
        assert_eq!(config.core_count, 4);
    }
}
