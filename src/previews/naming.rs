//! Deterministic names for previews and screens.
//!
//! Screens of a video are written next to its preview as
//! `{source file}.screens.{index:03}ss{seconds:05}.jpg`. The same pattern is
//! used to find screens left behind by earlier runs, so regenerating is never
//! required just to rebuild the screen rows.

use regex::Regex;
use std::path::{Path, PathBuf};

use crate::config::PreviewVideoType;
use crate::error::PipelineError;
use crate::models::{Container, Content};

/// Directory inside every container holding its previews.
pub const PREVIEW_DIRECTORY: &str = "container_previews";

pub fn preview_dir(container: &Container) -> PathBuf {
    container.fq_path().join(PREVIEW_DIRECTORY)
}

/// Where the preview of `content` is written.
pub fn preview_destination(container: &Container, content: &Content, video_type: PreviewVideoType) -> PathBuf {
    let dir = preview_dir(container);
    if content.is_video() {
        dir.join(format!("{}.{}", content.src, video_type.extension()))
    } else {
        dir.join(&content.src)
    }
}

/// Preview path as stored on the content: relative to the container directory.
pub fn relative_preview(container: &Container, dst: &Path) -> Result<String, PipelineError> {
    let root = container.fq_path();
    dst.strip_prefix(&root)
        .map(|rel| rel.to_string_lossy().into_owned())
        .map_err(|_| {
            PipelineError::Validation(format!(
                "{} is not inside container {}",
                dst.display(),
                root.display()
            ))
        })
}

/// A screen file found on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundScreen {
    pub path: PathBuf,
    pub index: usize,
    pub seconds: u64,
    pub size_bytes: u64,
}

impl FoundScreen {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Naming scheme for the screens of one video.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenPattern {
    dir: PathBuf,
    stem: String,
}

impl ScreenPattern {
    /// Screens for a preview destination; a trailing `.png`, `.gif` or `.webp` is dropped.
    pub fn for_destination(dst: &Path) -> Self {
        let dir = dst.parent().map(Path::to_path_buf).unwrap_or_default();
        let name = dst
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = [".png", ".gif", ".webp"]
            .iter()
            .find_map(|ext| name.strip_suffix(ext))
            .unwrap_or(name.as_str())
            .to_string();
        Self { dir, stem }
    }

    pub fn for_content(container: &Container, content: &Content) -> Self {
        Self {
            dir: preview_dir(container),
            stem: content.src.clone(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File of the screen taken at `seconds`.
    pub fn screen_path(&self, index: usize, seconds: u64) -> PathBuf {
        self.dir
            .join(format!("{}.screens.{:03}ss{:05}.jpg", self.stem, index, seconds))
    }

    /// printf-style output pattern for a single pass that writes numbered frames.
    pub fn sequence_pattern(&self) -> String {
        let stem = self.stem.replace('%', "%%");
        self.dir
            .join(format!("{}.screens.%03dss00000.jpg", stem))
            .to_string_lossy()
            .into_owned()
    }

    /// Glob matching every screen, with glob metacharacters in the name escaped.
    pub fn glob(&self) -> String {
        let mut escaped = String::with_capacity(self.stem.len());
        for c in self.stem.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | '\\') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        let dir = escape_glob(&self.dir.to_string_lossy());
        format!("{}/{}.screens.*ss*.jpg", dir.trim_end_matches('/'), escaped)
    }

    /// Regex matching screen file names of this video.
    pub fn matcher(&self) -> Result<Regex, PipelineError> {
        Ok(Regex::new(&format!(
            r"^{}\.screens\.([0-9]+)ss([0-9]+)\.jpg$",
            regex::escape(&self.stem)
        ))?)
    }

    /// Screens already on disk, ordered by index.
    pub fn discover(&self) -> Result<Vec<FoundScreen>, PipelineError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let matcher = self.matcher()?;
        let mut found = Vec::new();

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(caps) = matcher.captures(&name) else {
                continue;
            };
            let index = caps[1].parse().unwrap_or(0);
            let seconds = caps[2].parse().unwrap_or(0);
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            found.push(FoundScreen {
                path: entry.path(),
                index,
                seconds,
                size_bytes,
            });
        }

        found.sort_by(|a, b| (a.index, a.seconds).cmp(&(b.index, b.seconds)));
        Ok(found)
    }
}

fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '{' | '}') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn container() -> Container {
        Container {
            id: 1,
            ..Container::new("/media", "trip")
        }
    }

    #[test]
    fn test_preview_destinations() {
        let cnt = container();
        let video = Content::new("clip.mp4", "video/mp4", 1);
        let image = Content::new("pic.jpg", "image/jpeg", 1);

        let dst = preview_destination(&cnt, &video, PreviewVideoType::Screens);
        assert_eq!(dst, PathBuf::from("/media/trip/container_previews/clip.mp4.webp"));
        assert_eq!(
            preview_destination(&cnt, &image, PreviewVideoType::Screens),
            PathBuf::from("/media/trip/container_previews/pic.jpg")
        );
        assert_eq!(relative_preview(&cnt, &dst).unwrap(), "container_previews/clip.mp4.webp");
        assert!(relative_preview(&cnt, Path::new("/elsewhere/x.png")).is_err());
    }

    #[test]
    fn test_screen_names() {
        let pattern = ScreenPattern::for_destination(Path::new("/p/container_previews/clip.mp4.webp"));
        assert_eq!(
            pattern.screen_path(3, 42),
            PathBuf::from("/p/container_previews/clip.mp4.screens.003ss00042.jpg")
        );
        assert_eq!(
            pattern.sequence_pattern(),
            "/p/container_previews/clip.mp4.screens.%03dss00000.jpg"
        );
        assert_eq!(pattern.glob(), "/p/container_previews/clip.mp4.screens.*ss*.jpg");

        let cnt = container();
        let content = Content::new("clip.mp4", "video/mp4", 1);
        assert_eq!(ScreenPattern::for_content(&cnt, &content).stem, pattern.stem);
    }

    #[test]
    fn test_special_characters_are_escaped() {
        let pattern = ScreenPattern::for_destination(Path::new("/p/[live] a*b (1).mp4.gif"));
        assert_eq!(pattern.glob(), r"/p/\[live\] a\*b (1).mp4.screens.*ss*.jpg");

        let matcher = pattern.matcher().unwrap();
        assert!(matcher.is_match("[live] a*b (1).mp4.screens.001ss00005.jpg"));
        assert!(!matcher.is_match("l a*b (1).mp4.screens.001ss00005.jpg"));
        assert!(!matcher.is_match("[live] a*b (1).mp4.screens.001ss00005.jpg.tmp"));

        let percent = ScreenPattern::for_destination(Path::new("/p/100%.mp4.png"));
        assert_eq!(percent.sequence_pattern(), "/p/100%%.mp4.screens.%03dss00000.jpg");
    }

    #[test]
    fn test_discover_finds_only_own_screens_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let pattern = ScreenPattern::for_destination(&temp_dir.path().join("clip.mp4.webp"));
        for name in [
            "clip.mp4.screens.002ss00010.jpg",
            "clip.mp4.screens.001ss00005.jpg",
            "clip.mp4.screens.010ss00050.jpg",
            "clip2.mp4.screens.001ss00005.jpg",
            "clip.mp4.webp",
        ] {
            std::fs::write(temp_dir.path().join(name), b"jpg").unwrap();
        }

        let found = pattern.discover().unwrap();
        let indexes: Vec<_> = found.iter().map(|s| (s.index, s.seconds)).collect();
        assert_eq!(indexes, vec![(1, 5), (2, 10), (10, 50)]);
        assert_eq!(found[0].file_name(), "clip.mp4.screens.001ss00005.jpg");
        assert_eq!(found[0].size_bytes, 3);

        let missing = ScreenPattern::for_destination(&temp_dir.path().join("nope").join("x.webp"));
        assert!(missing.discover().unwrap().is_empty());
    }
}
