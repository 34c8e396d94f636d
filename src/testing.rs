//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use crate::config::Config;
use crate::error::PipelineError;
use crate::models::{Container, Content, Screen, TaskRequest, TaskStatus};
use crate::store::{ContentManager, MemoryStore};
use crate::transcoder::{FfmpegJob, ProbeInfo, Transcoder};

pub type FrameFn = Arc<dyn Fn(f64) -> RgbImage + Send + Sync>;

/// Scripted [`Transcoder`] that counts every call.
///
/// `run` writes a small placeholder to the job output (expanding `%03d`
/// sequences), `read_frame` renders the registered frame function as JPEG.
pub struct FakeTranscoder {
    probes: Mutex<HashMap<PathBuf, ProbeInfo>>,
    frames: Mutex<HashMap<PathBuf, FrameFn>>,
    fail_on: Mutex<Vec<String>>,
    panic_on: Mutex<Vec<String>>,
    sequence_frames: usize,
    pub jobs: Mutex<Vec<FfmpegJob>>,
    pub probe_calls: AtomicUsize,
    pub run_calls: AtomicUsize,
    pub frame_calls: AtomicUsize,
}

impl Default for FakeTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTranscoder {
    pub fn new() -> Self {
        Self {
            probes: Mutex::new(HashMap::new()),
            frames: Mutex::new(HashMap::new()),
            fail_on: Mutex::new(Vec::new()),
            panic_on: Mutex::new(Vec::new()),
            sequence_frames: 3,
            jobs: Mutex::new(Vec::new()),
            probe_calls: AtomicUsize::new(0),
            run_calls: AtomicUsize::new(0),
            frame_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_probe(self, path: impl Into<PathBuf>, info: ProbeInfo) -> Self {
        self.set_probe(path, info);
        self
    }

    pub fn set_probe(&self, path: impl Into<PathBuf>, info: ProbeInfo) {
        self.probes.lock().insert(path.into(), info);
    }

    pub fn with_frames<F>(self, path: impl Into<PathBuf>, frame: F) -> Self
    where
        F: Fn(f64) -> RgbImage + Send + Sync + 'static,
    {
        self.frames.lock().insert(path.into(), Arc::new(frame));
        self
    }

    /// Any call touching a path containing `needle` fails.
    pub fn fail_on(self, needle: &str) -> Self {
        self.fail_on.lock().push(needle.to_string());
        self
    }

    /// Any call touching a path containing `needle` panics.
    pub fn panic_on(self, needle: &str) -> Self {
        self.panic_on.lock().push(needle.to_string());
        self
    }

    pub fn with_sequence_frames(mut self, frames: usize) -> Self {
        self.sequence_frames = frames;
        self
    }

    pub fn runs(&self) -> usize {
        self.run_calls.load(Ordering::SeqCst)
    }

    pub fn frames_read(&self) -> usize {
        self.frame_calls.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    /// Total subprocess work performed.
    pub fn invocations(&self) -> usize {
        self.runs() + self.frames_read() + self.probes()
    }

    fn check(&self, subject: &str) -> Result<(), PipelineError> {
        if self.panic_on.lock().iter().any(|n| subject.contains(n.as_str())) {
            panic!("scripted panic for {}", subject);
        }
        if self.fail_on.lock().iter().any(|n| subject.contains(n.as_str())) {
            return Err(PipelineError::FFmpeg(format!("scripted failure for {}", subject)));
        }
        Ok(())
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn probe(&self, file: &Path) -> Result<ProbeInfo, PipelineError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        self.check(&file.to_string_lossy())?;
        self.probes
            .lock()
            .get(file)
            .cloned()
            .ok_or_else(|| PipelineError::FFmpeg(format!("{}: Invalid data found", file.display())))
    }

    async fn run(&self, job: &FfmpegJob) -> Result<(), PipelineError> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        let subject = job
            .inputs
            .iter()
            .map(|i| i.source.clone())
            .chain(std::iter::once(job.output.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ");
        self.check(&subject)?;
        self.jobs.lock().push(job.clone());

        let output = job.output.to_string_lossy().into_owned();
        if output.contains("%03d") {
            for idx in 1..=self.sequence_frames {
                let file = output.replace("%03d", &format!("{:03}", idx));
                std::fs::write(file, b"frame")?;
            }
        } else {
            std::fs::write(&job.output, b"encoded")?;
        }
        Ok(())
    }

    async fn read_frame(&self, file: &Path, seconds: f64) -> Result<Vec<u8>, PipelineError> {
        self.frame_calls.fetch_add(1, Ordering::SeqCst);
        self.check(&file.to_string_lossy())?;
        let frame = self.frames.lock().get(file).cloned();
        let img = match frame {
            Some(render) => render(seconds),
            None => RgbImage::from_pixel(64, 36, Rgb([128, 128, 128])),
        };
        Ok(jpeg_bytes(&img))
    }
}

pub fn jpeg_bytes(img: &RgbImage) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img.clone())
        .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Jpeg(90))
        .unwrap();
    buf
}

/// Horizontal gradient, optionally mirrored, easy to tell apart perceptually.
pub fn gradient(width: u32, height: u32, mirrored: bool) -> RgbImage {
    RgbImage::from_fn(width, height, |x, _| {
        let v = (x * 255 / width.max(1)) as u8;
        let v = if mirrored { 255 - v } else { v };
        Rgb([v, v / 2, 255 - v])
    })
}

pub fn video_probe(codec: &str, duration: f64) -> ProbeInfo {
    ProbeInfo {
        duration,
        codec: codec.to_string(),
        width: 1280,
        height: 720,
        fps: 30.0,
        bitrate: 1_000_000,
    }
}

/// A store with one container backed by a temp directory.
pub struct Fixture {
    pub dir: TempDir,
    pub store: Arc<MemoryStore>,
    pub container: Container,
    pub config: Config,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let container_dir = dir.path().join("trip");
        std::fs::create_dir_all(&container_dir).unwrap();

        let store = Arc::new(MemoryStore::new());
        let container = store
            .create_container(Container::new(dir.path(), "trip"))
            .unwrap();
        let config = Config {
            dir: dir.path().to_path_buf(),
            core_count: 3,
            ..Default::default()
        };

        Self {
            dir,
            store,
            container,
            config,
        }
    }

    pub fn container_dir(&self) -> PathBuf {
        self.container.fq_path()
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.container_dir().join(name)
    }

    /// Writes `bytes` into the container directory and registers the content.
    pub fn add_file(&self, name: &str, content_type: &str, bytes: &[u8]) -> Content {
        std::fs::write(self.path_of(name), bytes).unwrap();
        self.store
            .create_content(Content {
                container_id: Some(self.container.id),
                ..Content::new(name, content_type, bytes.len() as u64)
            })
            .unwrap()
    }

    /// Writes a real JPEG of the given size and registers it.
    pub fn add_jpeg(&self, name: &str, width: u32, height: u32) -> Content {
        let bytes = jpeg_bytes(&gradient(width, height, false));
        self.add_file(name, "image/jpeg", &bytes)
    }

    pub fn manager(&self) -> Arc<dyn ContentManager> {
        self.store.clone()
    }
}

/// Store whose `update_content` fails for the listed content ids.
pub struct FailingWrites {
    inner: Arc<MemoryStore>,
    fail_ids: Vec<i64>,
}

impl FailingWrites {
    pub fn new(inner: Arc<MemoryStore>, fail_ids: Vec<i64>) -> Self {
        Self { inner, fail_ids }
    }
}

impl ContentManager for FailingWrites {
    fn get_content(&self, id: i64) -> Result<Content, PipelineError> {
        self.inner.get_content(id)
    }

    fn list_content(&self, container_id: i64) -> Result<Vec<Content>, PipelineError> {
        self.inner.list_content(container_id)
    }

    fn create_content(&self, content: Content) -> Result<Content, PipelineError> {
        self.inner.create_content(content)
    }

    fn update_content(&self, content: &Content) -> Result<(), PipelineError> {
        if self.fail_ids.contains(&content.id) {
            return Err(PipelineError::Environment(format!("store unavailable for content {}", content.id)));
        }
        self.inner.update_content(content)
    }

    fn destroy_content(&self, id: i64) -> Result<Content, PipelineError> {
        self.inner.destroy_content(id)
    }

    fn get_container(&self, id: i64) -> Result<Container, PipelineError> {
        self.inner.get_container(id)
    }

    fn list_containers(&self) -> Result<Vec<Container>, PipelineError> {
        self.inner.list_containers()
    }

    fn create_container(&self, container: Container) -> Result<Container, PipelineError> {
        self.inner.create_container(container)
    }

    fn update_container(&self, container: &Container) -> Result<(), PipelineError> {
        self.inner.update_container(container)
    }

    fn create_screen(&self, screen: Screen) -> Result<Screen, PipelineError> {
        self.inner.create_screen(screen)
    }

    fn clear_screens(&self, content_id: i64) -> Result<usize, PipelineError> {
        self.inner.clear_screens(content_id)
    }

    fn list_screens(&self, content_id: i64) -> Result<Vec<Screen>, PipelineError> {
        self.inner.list_screens(content_id)
    }

    fn create_task(&self, task: TaskRequest) -> Result<TaskRequest, PipelineError> {
        self.inner.create_task(task)
    }

    fn update_task(&self, task: &TaskRequest, expected: TaskStatus) -> Result<TaskRequest, PipelineError> {
        self.inner.update_task(task, expected)
    }

    fn get_task(&self, id: i64) -> Result<TaskRequest, PipelineError> {
        self.inner.get_task(id)
    }

    fn list_tasks(&self) -> Result<Vec<TaskRequest>, PipelineError> {
        self.inner.list_tasks()
    }
}
