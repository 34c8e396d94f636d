//! # File Management Module
//!
//! Filesystem helpers used by the pipeline and the batch CLI.
//!
//! ## Responsibilities:
//! - MIME detection for content (extension based, sniffing images as a fallback)
//! - A trivial crawler turning a directory tree into containers and content
//! - Relocating or deleting files removed as duplicates
//!
//! ## Crawling:
//! Every directory under the root (the root included) becomes a container whose
//! content is the regular files directly inside it. Hidden entries and the
//! preview directories generated by the pipeline are skipped.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::PipelineError;
use crate::models::{Container, Content};
use crate::previews::naming::PREVIEW_DIRECTORY;
use crate::store::ContentManager;

/// One directory discovered by [`FileManager::crawl`].
#[derive(Debug, Clone)]
pub struct CrawledContainer {
    pub container: Container,
    pub content: Vec<Content>,
}

/// Manages file operations and discovery
pub struct FileManager;

impl FileManager {
    /// MIME type of a file, `application/octet-stream` when unknown.
    pub fn mime_type(path: &Path) -> String {
        if let Some(mime) = mime_guess::from_path(path).first() {
            return mime.essence_str().to_string();
        }
        Self::sniff_image(path).unwrap_or_else(|| "application/octet-stream".to_string())
    }

    fn sniff_image(path: &Path) -> Option<String> {
        let mut header = [0u8; 32];
        let read = {
            use std::io::Read;
            let mut file = std::fs::File::open(path).ok()?;
            file.read(&mut header).ok()?
        };
        let format = image::guess_format(&header[..read]).ok()?;
        let ext = format.extensions_str().first()?;
        mime_guess::from_ext(ext).first().map(|m| m.essence_str().to_string())
    }

    pub fn is_video(path: &Path) -> bool {
        Self::mime_type(path).starts_with("video")
    }

    pub fn is_image(path: &Path) -> bool {
        Self::mime_type(path).starts_with("image")
    }

    /// Size of a file in bytes.
    pub async fn file_size(path: &Path) -> Result<u64, PipelineError> {
        Ok(fs::metadata(path).await?.len())
    }

    fn is_hidden(name: &str) -> bool {
        name.starts_with('.')
    }

    /// Walks `root` and returns one container per directory, in path order.
    pub fn crawl(root: &Path) -> Result<Vec<CrawledContainer>, PipelineError> {
        if !root.is_dir() {
            return Err(PipelineError::Validation(format!(
                "not a directory: {}",
                root.display()
            )));
        }

        let mut found = Vec::new();
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                e.depth() == 0 || !(Self::is_hidden(&name) || name == PREVIEW_DIRECTORY)
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }

            let dir = entry.path();
            let (parent, name) = match (dir.parent(), dir.file_name()) {
                (Some(parent), Some(name)) => (parent.to_path_buf(), name.to_string_lossy().into_owned()),
                _ => continue,
            };

            let content = Self::list_files(dir)?;
            debug!("Crawled {} ({} files)", dir.display(), content.len());
            found.push(CrawledContainer {
                container: Container::new(parent, name),
                content,
            });
        }

        Ok(found)
    }

    fn list_files(dir: &Path) -> Result<Vec<Content>, PipelineError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if Self::is_hidden(&name) {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            files.push(Content::new(name, Self::mime_type(entry.path()), size));
        }
        Ok(files)
    }

    /// Merges a crawl into the store and returns the registered containers.
    ///
    /// Containers are matched by path and name, content by `src`. Records
    /// already stored keep their ids and pipeline fields.
    pub fn register(
        manager: &dyn ContentManager,
        crawled: Vec<CrawledContainer>,
    ) -> Result<Vec<Container>, PipelineError> {
        let mut known = manager.list_containers()?;
        let mut registered = Vec::with_capacity(crawled.len());

        for CrawledContainer { container, content } in crawled {
            let container = match known
                .iter()
                .find(|c| c.path == container.path && c.name == container.name)
            {
                Some(existing) => existing.clone(),
                None => {
                    let created = manager.create_container(container)?;
                    known.push(created.clone());
                    created
                }
            };

            let existing = manager.list_content(container.id)?;
            let mut added = 0;
            for item in content {
                if existing.iter().any(|c| c.src == item.src) {
                    continue;
                }
                manager.create_content(Content {
                    container_id: Some(container.id),
                    ..item
                })?;
                added += 1;
            }
            if added > 0 {
                debug!("Registered {} new files in {}", added, container.name);
            }
            registered.push(container);
        }
        Ok(registered)
    }

    /// Moves a file, copying across filesystems when a rename is not possible.
    pub async fn relocate(src: &Path, dst: &Path) -> Result<PathBuf, PipelineError> {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }
        if fs::rename(src, dst).await.is_err() {
            fs::copy(src, dst).await?;
            fs::remove_file(src).await?;
        }
        Ok(dst.to_path_buf())
    }

    /// Deletes a file, treating "already gone" as success.
    pub async fn remove_if_exists(path: &Path) -> Result<bool, PipelineError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use tempfile::TempDir;

    #[test]
    fn test_mime_type_by_extension() {
        assert_eq!(FileManager::mime_type(Path::new("a.mp4")), "video/mp4");
        assert_eq!(FileManager::mime_type(Path::new("a.JPG")), "image/jpeg");
        assert!(FileManager::is_video(Path::new("clip.mkv")));
        assert!(FileManager::is_image(Path::new("pic.png")));
        assert!(!FileManager::is_video(Path::new("notes.txt")));
    }

    #[test]
    fn test_mime_type_sniffs_images_without_extension() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("noext");
        image::RgbImage::new(4, 4).save_with_format(&path, image::ImageFormat::Png).unwrap();
        assert_eq!(FileManager::mime_type(&path), "image/png");

        let garbage = temp_dir.path().join("garbage");
        std::fs::write(&garbage, b"zzzz").unwrap();
        assert_eq!(FileManager::mime_type(&garbage), "application/octet-stream");
    }

    #[test]
    fn test_crawl_skips_hidden_and_previews() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("media");
        std::fs::create_dir_all(root.join("trip").join(PREVIEW_DIRECTORY)).unwrap();
        std::fs::create_dir_all(root.join(".cache")).unwrap();
        std::fs::write(root.join("top.jpg"), b"x").unwrap();
        std::fs::write(root.join("trip").join("b.mp4"), b"xx").unwrap();
        std::fs::write(root.join("trip").join("a.jpg"), b"xxx").unwrap();
        std::fs::write(root.join("trip").join(".DS_Store"), b"x").unwrap();
        std::fs::write(root.join("trip").join(PREVIEW_DIRECTORY).join("a.jpg"), b"x").unwrap();

        let crawled = FileManager::crawl(&root).unwrap();
        let names: Vec<_> = crawled.iter().map(|c| c.container.name.as_str()).collect();
        assert_eq!(names, vec!["media", "trip"]);

        let trip = &crawled[1];
        assert_eq!(trip.container.fq_path(), root.join("trip"));
        let files: Vec<_> = trip.content.iter().map(|c| (c.src.as_str(), c.size_bytes)).collect();
        assert_eq!(files, vec![("a.jpg", 3), ("b.mp4", 2)]);
        assert_eq!(trip.content[1].content_type, "video/mp4");
    }

    #[test]
    fn test_register_is_incremental() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("media");
        std::fs::create_dir_all(root.join("trip")).unwrap();
        std::fs::write(root.join("trip").join("a.jpg"), b"x").unwrap();
        let store = MemoryStore::new();

        let first = FileManager::register(&store, FileManager::crawl(&root).unwrap()).unwrap();
        let trip = first.iter().find(|c| c.name == "trip").unwrap().clone();
        let mut a = store.list_content(trip.id).unwrap().remove(0);
        a.preview = "container_previews/a.jpg".to_string();
        store.update_content(&a).unwrap();

        std::fs::write(root.join("trip").join("b.jpg"), b"y").unwrap();
        let second = FileManager::register(&store, FileManager::crawl(&root).unwrap()).unwrap();
        assert_eq!(second.len(), first.len());
        assert_eq!(store.list_containers().unwrap().len(), 2);

        let contents = store.list_content(trip.id).unwrap();
        let names: Vec<_> = contents.iter().map(|c| c.src.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "b.jpg"]);
        assert_eq!(contents[0].preview, "container_previews/a.jpg");
    }

    #[tokio::test]
    async fn test_relocate_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("a.mp4");
        std::fs::write(&src, b"data").unwrap();

        let dst = temp_dir.path().join("removed").join("trip_1_a.mp4");
        FileManager::relocate(&src, &dst).await.unwrap();
        assert!(!src.exists());
        assert_eq!(std::fs::read(&dst).unwrap(), b"data");

        assert!(FileManager::remove_if_exists(&dst).await.unwrap());
        assert!(!FileManager::remove_if_exists(&dst).await.unwrap());
    }
}
