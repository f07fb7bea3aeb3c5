use std::cell::Cell;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::cancel::CancelToken;
use super::execute::{ExecuteJob, Outcome};
use crate::config::{QueueConfig, WorkerConfig};
use crate::db::DatabaseError;
use crate::engine::{CommandSpeechEngine, DocumentExtractor, MediaMuxer, SpeechEngine};
use crate::error::ConfigError;
use crate::events::JobEventBroadcaster;
use crate::extractor::ExtractorRegistry;
use crate::logger::JobLogger;
use crate::muxer::DefaultMuxer;
use crate::store::JobStore;

/// Longest uninterrupted sleep, so shutdown is noticed promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub worker_id: String,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Target characters per Speech Engine call.
    pub chunk_size: usize,
    pub spool_dir: PathBuf,
}

impl WorkerSettings {
    pub fn new(worker_id: impl Into<String>, spool_dir: impl Into<PathBuf>) -> Self {
        let defaults = WorkerConfig::default();
        Self {
            worker_id: worker_id.into(),
            poll_interval: defaults.poll_interval(),
            heartbeat_interval: defaults.heartbeat_interval(),
            chunk_size: defaults.chunk_size,
            spool_dir: spool_dir.into(),
        }
    }

    pub fn from_config(config: &QueueConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            worker_id: config.worker.resolved_worker_id(),
            poll_interval: config.worker.poll_interval(),
            heartbeat_interval: config.worker.heartbeat_interval(),
            chunk_size: config.worker.chunk_size,
            spool_dir: config.resolved_spool_directory()?,
        })
    }
}

/// Rate-limited heartbeat writer.
pub(crate) struct Heartbeat {
    worker_id: String,
    interval: Duration,
    last: Cell<Option<Instant>>,
}

impl Heartbeat {
    fn new(worker_id: &str, interval: Duration) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            interval,
            last: Cell::new(None),
        }
    }

    /// Upserts the heartbeat if the interval has passed, or always when
    /// `force` is set. Failures are logged and otherwise ignored.
    pub(crate) fn beat(&self, store: &JobStore, current_job: Option<&str>, force: bool) {
        let due = force
            || self
                .last
                .get()
                .map_or(true, |at| at.elapsed() >= self.interval);
        if !due {
            return;
        }

        match store.upsert_heartbeat(&self.worker_id, current_job) {
            Ok(()) => self.last.set(Some(Instant::now())),
            Err(e) => tracing::warn!(worker_id = %self.worker_id, error = %e, "heartbeat failed"),
        }
    }
}

/// Single-threaded polling loop that claims and executes queued jobs.
///
/// Several workers may share one store; the store's atomic claim keeps
/// them from ever running the same job.
pub struct Worker {
    store: JobStore,
    settings: WorkerSettings,
    extractor: Arc<dyn DocumentExtractor>,
    engine: Arc<dyn SpeechEngine>,
    muxer: Arc<dyn MediaMuxer>,
    events: JobEventBroadcaster,
    shutdown: CancelToken,
    heartbeat: Heartbeat,
    /// Job whose execution hit a storage failure and still needs requeueing.
    pending_requeue: Option<String>,
}

impl Worker {
    pub fn new(
        store: JobStore,
        settings: WorkerSettings,
        extractor: Arc<dyn DocumentExtractor>,
        engine: Arc<dyn SpeechEngine>,
        muxer: Arc<dyn MediaMuxer>,
    ) -> Self {
        let heartbeat = Heartbeat::new(&settings.worker_id, settings.heartbeat_interval);
        Self {
            store,
            settings,
            extractor,
            engine,
            muxer,
            events: JobEventBroadcaster::default(),
            shutdown: CancelToken::new(),
            heartbeat,
            pending_requeue: None,
        }
    }

    /// Builds a worker with the bundled extractors, the command speech
    /// engine and the WAV/ffmpeg muxer.
    pub fn from_config(store: JobStore, config: &QueueConfig) -> Result<Self, ConfigError> {
        let settings = WorkerSettings::from_config(config)?;
        Ok(Self::new(
            store,
            settings,
            Arc::new(ExtractorRegistry::new()),
            Arc::new(CommandSpeechEngine::new(
                config.speech.program.clone(),
                config.speech.args.clone(),
            )),
            Arc::new(DefaultMuxer::new(config.muxer.ffmpeg_path.clone())),
        ))
    }

    pub fn with_events(mut self, events: JobEventBroadcaster) -> Self {
        self.events = events;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancelToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.settings.worker_id
    }

    pub fn events(&self) -> &JobEventBroadcaster {
        &self.events
    }

    /// Token that stops the loop at the next chunk boundary.
    pub fn shutdown_token(&self) -> CancelToken {
        self.shutdown.clone()
    }

    /// Polls until shutdown is requested.
    ///
    /// A job interrupted by shutdown goes back to the queue with its
    /// checkpoint; errors never end the loop.
    pub fn run(&mut self) {
        tracing::info!(
            worker_id = %self.settings.worker_id,
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            spool = %self.settings.spool_dir.display(),
            "worker started"
        );

        while !self.shutdown.is_cancelled() {
            match self.poll_once() {
                Ok(Some(_)) => {}
                Ok(None) => self.sleep(self.settings.poll_interval),
                Err(e) => {
                    tracing::error!(worker_id = %self.settings.worker_id, error = %e, "poll failed");
                    self.sleep(self.settings.poll_interval);
                }
            }
        }

        if let Err(e) = self.retry_pending_requeue() {
            tracing::error!(error = %e, "could not requeue interrupted job");
        }
        if let Err(e) = self.store.remove_heartbeat(&self.settings.worker_id) {
            tracing::warn!(error = %e, "failed to remove heartbeat");
        }
        tracing::info!(worker_id = %self.settings.worker_id, "worker stopped");
    }

    /// One poll cycle: claim the oldest queued job and execute it.
    ///
    /// Returns `None` when nothing was queued.
    pub fn poll_once(&mut self) -> Result<Option<Outcome>, DatabaseError> {
        let span = tracing::debug_span!("worker.poll", worker_id = %self.settings.worker_id);
        let _guard = span.enter();

        self.retry_pending_requeue()?;
        self.heartbeat.beat(&self.store, None, false);
        if self.shutdown.is_cancelled() {
            return Ok(None);
        }

        let Some(job) = self.store.claim_next_queued_by(&self.settings.worker_id)? else {
            return Ok(None);
        };
        let job_id = job.id.clone();
        tracing::info!(job_id = %job_id, "claimed job");

        self.heartbeat.beat(&self.store, Some(&job_id), true);
        let tracker = self.events.track(&job_id);
        tracker.claimed(&self.settings.worker_id);

        let execution = ExecuteJob {
            store: &self.store,
            extractor: self.extractor.as_ref(),
            engine: self.engine.as_ref(),
            muxer: self.muxer.as_ref(),
            settings: &self.settings,
            heartbeat: &self.heartbeat,
            shutdown: &self.shutdown,
            tracker,
            logger: JobLogger::new(&job_id, self.store.clone()),
        };
        let result = execution.run(job);
        self.heartbeat.beat(&self.store, None, true);

        match result {
            Ok(outcome) => {
                tracing::info!(job_id = %job_id, ?outcome, "job finished");
                Ok(Some(outcome))
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "storage failure, job will be requeued");
                self.pending_requeue = Some(job_id);
                Err(e)
            }
        }
    }

    /// Polls until the queue is empty or shutdown is requested.
    pub fn run_until_idle(&mut self) -> Result<Vec<Outcome>, DatabaseError> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.poll_once()? {
            outcomes.push(outcome);
            if self.shutdown.is_cancelled() {
                break;
            }
        }
        Ok(outcomes)
    }

    fn retry_pending_requeue(&mut self) -> Result<(), DatabaseError> {
        let Some(job_id) = self.pending_requeue.clone() else {
            return Ok(());
        };

        match self.store.release_job(&job_id, &self.settings.worker_id) {
            Ok(()) => {
                tracing::info!(job_id = %job_id, "requeued job after storage failure");
                JobLogger::new(&job_id, self.store.clone())
                    .warning("Requeued after a storage failure", None);
                self.events.track(&job_id).requeued("Storage failure");
            }
            Err(DatabaseError::InvalidTransition { .. })
            | Err(DatabaseError::NotFound(_))
            | Err(DatabaseError::OwnershipLost { .. }) => {
                tracing::debug!(job_id = %job_id, "job no longer ours, nothing to requeue");
            }
            Err(e) => return Err(e),
        }

        self.pending_requeue = None;
        Ok(())
    }

    fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.shutdown.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}
