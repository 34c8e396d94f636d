//! # Platform-specific tool resolution
//!
//! Maps the external tools the pipeline shells out to (`ffmpeg`, `ffprobe`)
//! onto platform executable names, honouring `FFMPEG_PATH` / `FFPROBE_PATH`
//! overrides. Constructed once at startup and handed to the transcoder.

use std::path::PathBuf;

/// External tools the pipeline invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Ffmpeg,
    Ffprobe,
}

impl Tool {
    pub fn name(&self) -> &'static str {
        match self {
            Tool::Ffmpeg => "ffmpeg",
            Tool::Ffprobe => "ffprobe",
        }
    }

    fn env_override(&self) -> &'static str {
        match self {
            Tool::Ffmpeg => "FFMPEG_PATH",
            Tool::Ffprobe => "FFPROBE_PATH",
        }
    }
}

/// Resolved executable paths for the external tools.
#[derive(Debug, Clone)]
pub struct ToolCommands {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    which_command: &'static str,
}

impl Default for ToolCommands {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ToolCommands {
    /// Platform defaults, overridden by `FFMPEG_PATH` / `FFPROBE_PATH`.
    pub fn from_env() -> Self {
        let resolve = |tool: Tool| {
            std::env::var_os(tool.env_override())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(Self::platform_name(tool)))
        };
        Self {
            ffmpeg: resolve(Tool::Ffmpeg),
            ffprobe: resolve(Tool::Ffprobe),
            which_command: if cfg!(windows) { "where" } else { "which" },
        }
    }

    pub fn with_paths(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            ..Self::from_env()
        }
    }

    fn platform_name(tool: Tool) -> String {
        if cfg!(windows) {
            format!("{}.exe", tool.name())
        } else {
            tool.name().to_string()
        }
    }

    pub fn path(&self, tool: Tool) -> &PathBuf {
        match tool {
            Tool::Ffmpeg => &self.ffmpeg,
            Tool::Ffprobe => &self.ffprobe,
        }
    }

    /// Check if a tool can be executed
    pub async fn is_available(&self, tool: Tool) -> bool {
        let path = self.path(tool);
        if path.is_absolute() {
            return path.is_file();
        }

        tokio::process::Command::new(self.which_command)
            .arg(path)
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Names of the tools that cannot be executed.
    pub async fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        for tool in [Tool::Ffmpeg, Tool::Ffprobe] {
            if !self.is_available(tool).await {
                missing.push(tool.name());
            }
        }
        missing
    }
}
