//! Finding originals that were left behind after re-encoding, and removing them.
//!
//! An encoded file is named `{stem}{modifier}.mp4`; its original is the video
//! in the same container whose file stem is `{stem}`, whatever its extension.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::detector::is_duplicate_video;
use crate::config::Config;
use crate::error::PipelineError;
use crate::file_manager::FileManager;
use crate::models::{Container, Content, DuplicateRecord};
use crate::previews::ItemFailure;
use crate::store::ContentManager;
use crate::transcoder::Transcoder;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DuplicateReport {
    pub container_id: i64,
    /// Encoded/original pairs compared.
    pub checked: usize,
    pub duplicates: Vec<DuplicateRecord>,
    pub failures: Vec<ItemFailure>,
}

impl DuplicateReport {
    pub fn check(&self) -> Result<(), PipelineError> {
        let failures: Vec<String> = self.failures.iter().map(ItemFailure::describe).collect();
        match PipelineError::batch(self.checked, &failures) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn file_stem(src: &str) -> String {
    Path::new(src)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Stem of the original an encoded file was produced from, if it is one.
pub fn original_stem(config: &Config, encoded_src: &str) -> Option<String> {
    if config.encoding_filename_modifier.is_empty() {
        return None;
    }
    let stem = file_stem(encoded_src);
    stem.strip_suffix(&config.encoding_filename_modifier)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Pairs of (encoded, original) videos in a container, by name.
pub fn candidate_pairs(config: &Config, contents: &[Content]) -> Vec<(Content, Content)> {
    let videos: Vec<&Content> = contents.iter().filter(|c| c.is_video()).collect();
    let mut pairs = Vec::new();
    for encoded in &videos {
        let Some(stem) = original_stem(config, &encoded.src) else {
            continue;
        };
        for original in &videos {
            if original.id != encoded.id && file_stem(&original.src) == stem {
                pairs.push(((*encoded).clone(), (*original).clone()));
            }
        }
    }
    pairs
}

/// Checks every encoded/original pair of a container and flags duplicates.
///
/// Confirmed originals get `duplicate = true`; nothing is removed here.
pub async fn find_duplicate_contents(
    manager: &dyn ContentManager,
    transcoder: &dyn Transcoder,
    config: &Config,
    container_id: i64,
) -> Result<DuplicateReport, PipelineError> {
    let container = manager.get_container(container_id)?;
    let contents = manager.list_content(container_id)?;
    let pairs = candidate_pairs(config, &contents);
    let mut report = DuplicateReport {
        container_id,
        checked: pairs.len(),
        ..Default::default()
    };
    info!(
        "Checking {} possible duplicates in {}",
        pairs.len(),
        container.name
    );

    for (encoded, mut original) in pairs {
        let encoded_path = encoded.fq_path(&container);
        let original_path = original.fq_path(&container);

        match is_duplicate_video(transcoder, config, &encoded_path, &original_path).await {
            Ok(true) => {
                original.duplicate = true;
                manager.update_content(&original)?;
                report.duplicates.push(DuplicateRecord {
                    keep_content_id: encoded.id,
                    duplicate_id: original.id,
                    container_id,
                    container_name: container.name.clone(),
                    keep_src: encoded.src.clone(),
                    duplicate_src: original.src.clone(),
                    fq_path: container.fq_path(),
                });
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Could not compare {} with {}: {}", encoded.src, original.src, e);
                report.failures.push(ItemFailure {
                    content_id: original.id,
                    src: original.src.clone(),
                    error: config.scrub_paths(&e.to_string()),
                });
            }
        }
    }

    info!(
        "Found {} duplicates in {}",
        report.duplicates.len(),
        container.name
    );
    Ok(report)
}

/// Where a removed duplicate is moved to, if anywhere.
pub fn removal_destination(config: &Config, container: &Container, content: &Content) -> Option<PathBuf> {
    let location = config.remove_location.as_ref()?;
    let base = Path::new(&content.src)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| content.src.clone());
    Some(location.join(format!("{}_{}_{}", container.name, content.id, base)))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemovedItem {
    pub content_id: i64,
    pub src: String,
    pub moved_to: Option<PathBuf>,
    pub deleted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RemovalReport {
    pub container_id: i64,
    pub removed: Vec<RemovedItem>,
    pub failures: Vec<ItemFailure>,
}

impl RemovalReport {
    pub fn check(&self) -> Result<(), PipelineError> {
        let failures: Vec<String> = self.failures.iter().map(ItemFailure::describe).collect();
        match PipelineError::batch(self.removed.len() + self.failures.len(), &failures) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Destroys every content flagged as duplicate in a container.
///
/// The file is moved to `remove_location` when one is set, deleted when
/// `remove_duplicate_files` is on, and otherwise left on disk.
pub async fn remove_duplicate_contents(
    manager: &dyn ContentManager,
    config: &Config,
    container_id: i64,
) -> Result<RemovalReport, PipelineError> {
    let container = manager.get_container(container_id)?;
    let mut report = RemovalReport {
        container_id,
        ..Default::default()
    };

    for content in manager.list_content(container_id)? {
        if !content.duplicate {
            continue;
        }
        manager.destroy_content(content.id)?;

        let src = content.fq_path(&container);
        let outcome = match removal_destination(config, &container, &content) {
            Some(dst) => FileManager::relocate(&src, &dst).await.map(|moved| (Some(moved), false)),
            None if config.remove_duplicate_files => FileManager::remove_if_exists(&src).await.map(|gone| (None, gone)),
            None => Ok((None, false)),
        };

        match outcome {
            Ok((moved_to, deleted)) => {
                info!("Removed duplicate {} from {}", content.src, container.name);
                report.removed.push(RemovedItem {
                    content_id: content.id,
                    src: content.src.clone(),
                    moved_to,
                    deleted,
                });
            }
            Err(e) => {
                warn!("Removed {} from the store but not from disk: {}", content.src, e);
                report.failures.push(ItemFailure {
                    content_id: content.id,
                    src: content.src.clone(),
                    error: config.scrub_paths(&e.to_string()),
                });
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{gradient, video_probe, FakeTranscoder, Fixture};
    use tempfile::TempDir;

    #[test]
    fn test_original_stem() {
        let config = Config::default();
        assert_eq!(original_stem(&config, "clip_h265.mp4").as_deref(), Some("clip"));
        assert_eq!(original_stem(&config, "a_h265_h265.mp4").as_deref(), Some("a_h265"));
        assert_eq!(original_stem(&config, "clip.mp4"), None);
        assert_eq!(original_stem(&config, "_h265.mp4"), None);
        // Only a trailing modifier counts.
        assert_eq!(original_stem(&config, "my_h265_trip.mp4"), None);
    }

    #[tokio::test]
    async fn test_find_marks_original_as_duplicate() {
        let fx = Fixture::new();
        let original = fx.add_file("clip.mov", "video/quicktime", b"original");
        let encoded = fx.add_file("clip_h265.mp4", "video/mp4", b"enc");
        let unrelated = fx.add_file("other.mp4", "video/mp4", b"other");
        let frames = |_: f64| gradient(160, 90, false);
        let transcoder = FakeTranscoder::new()
            .with_probe(fx.path_of("clip_h265.mp4"), video_probe("hevc", 42.0))
            .with_probe(fx.path_of("clip.mov"), video_probe("h264", 42.3))
            .with_frames(fx.path_of("clip_h265.mp4"), frames)
            .with_frames(fx.path_of("clip.mov"), frames);

        let report = find_duplicate_contents(&*fx.store, &transcoder, &fx.config, fx.container.id)
            .await
            .unwrap();
        report.check().unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.duplicates.len(), 1);
        let record = &report.duplicates[0];
        assert_eq!((record.keep_content_id, record.duplicate_id), (encoded.id, original.id));
        assert_eq!(record.duplicate_path(), fx.path_of("clip.mov"));

        assert!(fx.store.get_content(original.id).unwrap().duplicate);
        assert!(!fx.store.get_content(unrelated.id).unwrap().duplicate);
    }

    #[tokio::test]
    async fn test_comparison_errors_are_reported() {
        let fx = Fixture::new();
        fx.add_file("clip.mp4", "video/mp4", b"original");
        fx.add_file("clip_h265.mp4", "video/mp4", b"enc");
        let transcoder = FakeTranscoder::new().with_probe(fx.path_of("clip_h265.mp4"), video_probe("hevc", 42.0));

        let report = find_duplicate_contents(&*fx.store, &transcoder, &fx.config, fx.container.id)
            .await
            .unwrap();
        assert!(report.duplicates.is_empty());
        let err = report.check().unwrap_err().to_string();
        assert!(err.contains("clip.mp4"), "{}", err);
    }

    #[tokio::test]
    async fn test_remove_relocates_flagged_content() {
        let fx = Fixture::new();
        let trash = TempDir::new().unwrap();
        let mut dupe = fx.add_file("clip.mov", "video/quicktime", b"original");
        dupe.duplicate = true;
        fx.store.update_content(&dupe).unwrap();
        let keep = fx.add_file("clip_h265.mp4", "video/mp4", b"enc");
        let config = Config {
            remove_location: Some(trash.path().to_path_buf()),
            ..fx.config.clone()
        };

        let report = remove_duplicate_contents(&*fx.store, &config, fx.container.id).await.unwrap();
        report.check().unwrap();
        assert_eq!(report.removed.len(), 1);
        let moved = trash.path().join(format!("trip_{}_clip.mov", dupe.id));
        assert_eq!(report.removed[0].moved_to.as_deref(), Some(moved.as_path()));
        assert!(moved.exists());
        assert!(!fx.path_of("clip.mov").exists());

        assert!(fx.store.get_content(dupe.id).is_err());
        assert!(fx.store.get_content(keep.id).is_ok());
    }

    #[tokio::test]
    async fn test_remove_deletes_or_keeps_file_by_config() {
        let fx = Fixture::new();
        let mut a = fx.add_file("a.mp4", "video/mp4", b"a");
        a.duplicate = true;
        fx.store.update_content(&a).unwrap();

        let report = remove_duplicate_contents(&*fx.store, &fx.config, fx.container.id).await.unwrap();
        assert!(!report.removed[0].deleted);
        assert!(fx.path_of("a.mp4").exists());

        let mut b = fx.add_file("b.mp4", "video/mp4", b"b");
        b.duplicate = true;
        fx.store.update_content(&b).unwrap();
        let deleting = Config {
            remove_duplicate_files: true,
            ..fx.config.clone()
        };
        let report = remove_duplicate_contents(&*fx.store, &deleting, fx.container.id).await.unwrap();
        assert!(report.removed[0].deleted);
        assert!(!fx.path_of("b.mp4").exists());
    }
}
