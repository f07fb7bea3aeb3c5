#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use audiobook_jobs::{
    AssemblyRequest, BookMetadata, BoxError, Chapter, DocumentExtractor, JobManager, JobStore,
    MediaMuxer, ProcessingOptions, SourceKind, SpeechEngine, SubmitRequest, Synthesized, Worker,
    WorkerSettings,
};

pub const WORKER_ID: &str = "test-worker";
pub const CHUNK_SIZE: usize = 100;

/// Temporary database, spool and input file.
pub struct TestEnv {
    pub dir: TempDir,
    pub store: JobStore,
    pub manager: JobManager,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(&dir.path().join("jobs.db")).unwrap();
        let manager = JobManager::new(store.clone()).with_spool_dir(dir.path().join("spool"));
        Self {
            dir,
            store,
            manager,
        }
    }

    pub fn spool_dir(&self) -> PathBuf {
        self.dir.path().join("spool")
    }

    /// Writes a text input file and returns its path.
    pub fn input(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, "placeholder text for the fake extractor").unwrap();
        path
    }

    pub fn submit(&self, name: &str) -> String {
        let input = self.input(&format!("{}.txt", name));
        self.manager
            .submit_job(SubmitRequest::new(
                input,
                self.dir.path().join("out").join(format!("{}.wav", name)),
            ))
            .unwrap()
    }

    /// A manager on its own connection, as another process would have.
    pub fn other_manager(&self) -> JobManager {
        JobManager::new(self.store.reopen().unwrap())
    }

    pub fn settings(&self) -> WorkerSettings {
        let mut settings = WorkerSettings::new(WORKER_ID, self.spool_dir());
        settings.poll_interval = Duration::from_millis(10);
        settings.chunk_size = CHUNK_SIZE;
        settings
    }

    pub fn worker(
        &self,
        extractor: Arc<FakeExtractor>,
        engine: Arc<FakeEngine>,
        muxer: Arc<FakeMuxer>,
    ) -> Worker {
        Worker::new(
            self.store.reopen().unwrap(),
            self.settings(),
            extractor,
            engine,
            muxer,
        )
    }
}

/// One sentence per chunk: each sentence is over half of [`CHUNK_SIZE`].
pub fn sentence(chapter: usize, index: usize) -> String {
    format!(
        "Chapter {} sentence {} carries enough words to fill most of a chunk.",
        chapter + 1,
        index + 1
    )
}

pub fn book(chapters: usize, sentences_per_chapter: usize) -> Vec<Chapter> {
    (0..chapters)
        .map(|c| {
            let text: Vec<String> = (0..sentences_per_chapter).map(|s| sentence(c, s)).collect();
            Chapter::new(format!("Chapter {}", c + 1), text.join(" "), c + 1)
        })
        .collect()
}

// ─── Fakes ───

pub struct FakeExtractor {
    chapters: Vec<Chapter>,
}

impl FakeExtractor {
    pub fn new(chapters: Vec<Chapter>) -> Arc<Self> {
        Arc::new(Self { chapters })
    }
}

impl DocumentExtractor for FakeExtractor {
    fn extract(&self, _path: &Path, _kind: SourceKind) -> Result<Vec<Chapter>, BoxError> {
        Ok(self.chapters.clone())
    }

    fn read_metadata(&self, _path: &Path, _kind: SourceKind) -> Result<BookMetadata, BoxError> {
        Ok(BookMetadata::default())
    }
}

type Hook = Box<dyn FnMut() + Send>;

/// Produces one sample per character of input.
#[derive(Default)]
pub struct FakeEngine {
    calls: AtomicUsize,
    texts: Mutex<Vec<String>>,
    fail_marker: Mutex<Option<String>>,
    hook: Mutex<Option<(usize, Hook)>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    pub fn fail_when_text_contains(&self, marker: &str) {
        *self.fail_marker.lock().unwrap() = Some(marker.to_string());
    }

    pub fn stop_failing(&self) {
        *self.fail_marker.lock().unwrap() = None;
    }

    /// Runs `hook` right after the `call`-th successful synthesis.
    pub fn after_call(&self, call: usize, hook: impl FnMut() + Send + 'static) {
        *self.hook.lock().unwrap() = Some((call, Box::new(hook)));
    }
}

impl SpeechEngine for FakeEngine {
    fn synthesize(&self, text: &str, _options: &ProcessingOptions) -> Result<Synthesized, BoxError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(marker) = self.fail_marker.lock().unwrap().as_deref() {
            if text.contains(marker) {
                return Err(format!("voice model crashed on '{}'", marker).into());
            }
        }
        self.texts.lock().unwrap().push(text.to_string());

        if let Some((at, hook)) = self.hook.lock().unwrap().as_mut() {
            if *at == call {
                hook();
            }
        }

        Ok(Synthesized {
            samples: vec![0.25; text.chars().count()],
            sample_rate: 24_000,
        })
    }
}

/// Records what it was asked to assemble and writes a small file.
#[derive(Default)]
pub struct FakeMuxer {
    fail: AtomicBool,
    assembled: Mutex<Vec<Vec<(String, usize)>>>,
}

impl FakeMuxer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// `(title, sample count)` per chapter of every assembly.
    pub fn assembled(&self) -> Vec<Vec<(String, usize)>> {
        self.assembled.lock().unwrap().clone()
    }
}

impl MediaMuxer for FakeMuxer {
    fn assemble(&self, request: &AssemblyRequest<'_>) -> Result<(), BoxError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err("ffmpeg exited with status 1".into());
        }

        let chapters = request
            .chapters
            .iter()
            .map(|c| (c.title.clone(), c.samples.len()))
            .collect();
        self.assembled.lock().unwrap().push(chapters);

        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(request.output_path, vec![0u8; request.total_samples() * 2])?;
        Ok(())
    }
}
