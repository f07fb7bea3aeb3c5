//! One execution attempt of a claimed job.
//!
//! Chapters are synthesized strictly in order, chunk by chunk. After every
//! chunk the audio is written to the job's spool and the checkpoint is
//! persisted, so a resumed attempt skips everything already on disk.

use std::fs;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;

use super::cancel::CancelToken;
use super::chunker::chunk_text;
use super::runner::{Heartbeat, WorkerSettings};
use super::spool::JobSpool;
use crate::db::DatabaseError;
use crate::engine::{AssemblyRequest, Chapter, ChapterAudio, DocumentExtractor, MediaMuxer, SpeechEngine};
use crate::error::{BoxError, JobError};
use crate::events::JobEventTracker;
use crate::extractor::shape_chapters;
use crate::jobs::{Job, JobStatus, ResumeData};
use crate::logger::JobLogger;
use crate::store::{FileKind, JobStore};

/// Sample rate recorded for a chapter that produced no audio at all.
const FALLBACK_SAMPLE_RATE: u32 = 24_000;

/// A progress line is written to the job log each time the percentage
/// crosses a multiple of this.
const PROGRESS_LOG_STEP: f64 = 10.0;

/// How an execution attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
    /// The job was cancelled while it ran.
    Cancelled,
    /// The worker is shutting down; the job went back to the queue.
    Interrupted,
    /// The job was deleted, moved out of `running`, or claimed by another
    /// worker.
    Abandoned,
}

struct ChapterPlan {
    title: String,
    chunks: Vec<String>,
}

pub(crate) struct ExecuteJob<'a> {
    pub store: &'a JobStore,
    pub extractor: &'a dyn DocumentExtractor,
    pub engine: &'a dyn SpeechEngine,
    pub muxer: &'a dyn MediaMuxer,
    pub settings: &'a WorkerSettings,
    pub heartbeat: &'a Heartbeat,
    pub shutdown: &'a CancelToken,
    pub tracker: JobEventTracker,
    pub logger: JobLogger,
}

fn checkpoint_of(job: &mut Job) -> &mut ResumeData {
    job.resume_data.get_or_insert_with(ResumeData::new)
}

impl ExecuteJob<'_> {
    /// Runs `job` to an outcome. Only a storage failure is returned as an
    /// error; the caller is expected to requeue the job once the store is
    /// reachable again.
    pub fn run(&self, mut job: Job) -> Result<Outcome, DatabaseError> {
        let span = tracing::info_span!(
            "job.execute",
            job_id = %job.id,
            input = %job.input.path.display(),
        );
        let _guard = span.enter();

        let started = Instant::now();
        let mut site = None;

        match self.process(&mut job, &mut site, started) {
            Ok(Outcome::Cancelled) => {
                self.on_cancelled(&mut job);
                Ok(Outcome::Cancelled)
            }
            Ok(Outcome::Interrupted) => {
                if let Err(e) = self.store.release_job(&job.id, &self.settings.worker_id) {
                    let outcome = self.rejected_write(&job.id, e)?;
                    if outcome == Outcome::Cancelled {
                        self.on_cancelled(&mut job);
                    }
                    return Ok(outcome);
                }
                self.logger.info(
                    "Worker shutting down, job returned to the queue",
                    Some(json!({
                        "completed_chunks": job.progress.completed_chunks,
                        "total_chunks": job.progress.total_chunks,
                    })),
                );
                self.tracker.requeued("Worker shutdown");
                Ok(Outcome::Interrupted)
            }
            Ok(Outcome::Abandoned) => {
                tracing::warn!(job_id = %job.id, "job is no longer ours to run, dropping it");
                Ok(Outcome::Abandoned)
            }
            Ok(outcome) => Ok(outcome),
            Err(JobError::Storage(e)) => Err(e),
            Err(err) => self.fail(&mut job, err, site, started),
        }
    }

    fn process(
        &self,
        job: &mut Job,
        site: &mut Option<usize>,
        started: Instant,
    ) -> Result<Outcome, JobError> {
        self.logger.info(
            &format!("Processing {}", job.input.path.display()),
            Some(json!({
                "input_kind": job.input.kind.as_str(),
                "output_format": job.output.format.as_str(),
                "resuming": job.resume_data.as_ref().is_some_and(|r| !r.is_empty()),
            })),
        );

        let chapters = self.load_chapters(job)?;
        let plans: Vec<ChapterPlan> = chapters
            .into_iter()
            .map(|c| ChapterPlan {
                chunks: chunk_text(&c.content, self.settings.chunk_size),
                title: c.title,
            })
            .collect();

        let spool = JobSpool::open(&self.settings.spool_dir, &job.id).map_err(|source| {
            JobError::Spool {
                path: self.settings.spool_dir.join(&job.id),
                source,
            }
        })?;

        self.reconcile_checkpoint(job, &plans, &spool);
        self.init_progress(job, &plans);
        if let Some(outcome) = self.checkpoint(job)? {
            return Ok(outcome);
        }

        let mut synthesized = 0u64;
        for index in 0..plans.len() {
            if checkpoint_of(job).is_chapter_completed(index) {
                self.logger
                    .debug(&format!("Chapter {} already synthesized, skipping", index + 1));
                continue;
            }
            *site = Some(index);
            if let Some(outcome) =
                self.synthesize_chapter(job, &spool, index, &plans, &mut synthesized, started)?
            {
                return Ok(outcome);
            }
        }
        *site = None;

        job.progress.current_chapter = None;
        job.progress.current_operation = Some("Assembling audiobook".to_string());
        if let Some(outcome) = self.checkpoint(job)? {
            return Ok(outcome);
        }

        self.assemble(job, &spool, &plans)?;
        self.complete(job, &spool, started)
    }

    // ─── Extraction ───

    fn load_chapters(&self, job: &mut Job) -> Result<Vec<Chapter>, JobError> {
        let path = job.input.path.clone();
        if !path.is_file() {
            return Err(JobError::Validation(format!(
                "Input file not found: {}",
                path.display()
            )));
        }

        job.progress.current_operation = Some("Extracting chapters".to_string());
        let chapters = self
            .extractor
            .extract(&path, job.input.kind)
            .map_err(|source| JobError::Extraction {
                path: path.clone(),
                source,
            })?;

        if job.metadata.is_none() && job.input.kind.is_book() {
            match self.extractor.read_metadata(&path, job.input.kind) {
                Ok(metadata) if !metadata.is_empty() => job.metadata = Some(metadata),
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "reading metadata failed"),
            }
        }

        let chapters = match &job.audiobook_options {
            Some(options) => shape_chapters(chapters, options, job.metadata.as_ref())
                .map_err(|e| JobError::Validation(e.to_string()))?,
            None => chapters,
        };

        if chapters.is_empty() {
            return Err(JobError::Validation(format!(
                "No chapters found in {}",
                path.display()
            )));
        }

        let titles: Vec<&str> = chapters.iter().map(|c| c.title.as_str()).collect();
        self.logger.info(
            &format!("Extracted {} chapters", chapters.len()),
            Some(json!({ "chapter_count": chapters.len(), "titles": titles })),
        );
        Ok(chapters)
    }

    // ─── Checkpoint ───

    /// Drops checkpoint markers whose audio is no longer in the spool or
    /// whose chapter was chunked differently.
    fn reconcile_checkpoint(&self, job: &mut Job, plans: &[ChapterPlan], spool: &JobSpool) {
        let Some(resume) = job.resume_data.as_mut() else {
            return;
        };

        let stale = resume.retain_chapters_below(plans.len());
        if !stale.is_empty() {
            self.logger.warning(
                "Checkpoint refers to chapters the document no longer has",
                Some(json!({ "chapters": stale })),
            );
        }

        for chapter in resume.completed_chapters() {
            if !spool.has_chapter(chapter) {
                resume.forget_chapter(chapter);
                self.logger.warning(
                    &format!(
                        "Audio for chapter {} is missing from the spool, synthesizing it again",
                        chapter + 1
                    ),
                    Some(json!({ "chapter_index": chapter })),
                );
            }
        }

        for chapter in resume.partial_chapters() {
            let expected = plans[chapter].chunks.len();
            if spool.layout(chapter) != Some(expected) {
                resume.forget_chapter(chapter);
                if let Err(e) = spool.discard_chapter(chapter) {
                    tracing::warn!(chapter, error = %e, "failed to discard stale chunks");
                }
                self.logger.warning(
                    &format!("Chapter {} was split differently, restarting it", chapter + 1),
                    Some(json!({ "chapter_index": chapter, "chunk_count": expected })),
                );
                continue;
            }

            for chunk in resume.partial_chunks(chapter) {
                if chunk >= expected || !spool.has_chunk(chapter, chunk) {
                    resume.forget_chunk(chapter, chunk);
                }
            }
        }

        if !resume.is_empty() {
            self.logger.info(
                &format!(
                    "Resuming with {}/{} chapters already complete",
                    resume.completed_chapters().len(),
                    plans.len()
                ),
                Some(json!({
                    "completed_chapters": resume.completed_chapters(),
                    "partial_chunks": resume.completed_chunk_count(),
                })),
            );
        }
    }

    /// Sets totals and credits the work banked by earlier attempts.
    fn init_progress(&self, job: &mut Job, plans: &[ChapterPlan]) {
        let resume = checkpoint_of(job);
        let mut completed_chapters = 0u32;
        let mut completed_chunks = 0u64;
        for (index, plan) in plans.iter().enumerate() {
            if resume.is_chapter_completed(index) {
                completed_chapters += 1;
                completed_chunks += plan.chunks.len() as u64;
            } else {
                completed_chunks += resume.partial_chunks(index).len() as u64;
            }
        }

        let progress = &mut job.progress;
        progress.total_chapters = plans.len() as u32;
        progress.completed_chapters = completed_chapters;
        progress.total_chunks = plans.iter().map(|p| p.chunks.len() as u64).sum();
        progress.completed_chunks = completed_chunks;
        progress.chunks_per_second = 0.0;
        progress.eta_seconds = None;
        progress.current_operation = Some("Synthesizing".to_string());
        progress.update_percentage();
    }

    /// Persists progress and the checkpoint. Returns an outcome when the
    /// job must stop because it is no longer ours to run.
    fn checkpoint(&self, job: &mut Job) -> Result<Option<Outcome>, JobError> {
        self.heartbeat.beat(self.store, Some(&job.id), false);
        checkpoint_of(job).checkpoint_at = Utc::now();

        match self.store.update_progress(job, &self.settings.worker_id) {
            Ok(JobStatus::Running) => Ok(None),
            Ok(JobStatus::Cancelled) => Ok(Some(Outcome::Cancelled)),
            Ok(_) | Err(DatabaseError::NotFound(_)) | Err(DatabaseError::OwnershipLost { .. }) => {
                Ok(Some(Outcome::Abandoned))
            }
            Err(e) => Err(e.into()),
        }
    }

    // ─── Synthesis ───

    fn synthesize_chapter(
        &self,
        job: &mut Job,
        spool: &JobSpool,
        index: usize,
        plans: &[ChapterPlan],
        synthesized: &mut u64,
        started: Instant,
    ) -> Result<Option<Outcome>, JobError> {
        let plan = &plans[index];
        let span = tracing::info_span!("job.chapter", chapter = index, chunks = plan.chunks.len());
        let _guard = span.enter();
        let chapter_started = Instant::now();

        self.logger.log_chapter_start(index, &plan.title, plans.len());
        job.progress.current_chapter = Some(plan.title.clone());
        job.progress.current_operation = Some(format!(
            "Synthesizing chapter {}/{}",
            index + 1,
            plans.len()
        ));
        self.tracker.chapter_started(&plan.title, &job.progress);

        spool
            .write_layout(index, plan.chunks.len())
            .map_err(|source| JobError::Spool {
                path: spool.dir().to_path_buf(),
                source,
            })?;

        for (chunk, text) in plan.chunks.iter().enumerate() {
            if checkpoint_of(job).is_chunk_completed(index, chunk) {
                continue;
            }

            let audio = self
                .engine
                .synthesize(text, &job.processing_options)
                .map_err(|source| JobError::Synthesis {
                    chapter: index,
                    chunk,
                    source,
                })?;
            let path = spool
                .write_chunk(index, chunk, &audio)
                .map_err(|source| JobError::Spool {
                    path: spool.chunk_path(index, chunk),
                    source,
                })?;
            let size = fs::metadata(&path).map(|m| m.len()).ok();
            self.store.add_job_file(&job.id, &path, FileKind::Chunk, size)?;

            let resume = checkpoint_of(job);
            resume.mark_chunk_completed(index, chunk);
            resume.partial_audio_path = Some(path);

            let step_before = (job.progress.percentage / PROGRESS_LOG_STEP).floor();
            *synthesized += 1;
            job.progress.completed_chunks += 1;
            job.progress.update_percentage();
            job.progress.update_eta(*synthesized, started.elapsed());

            if let Some(outcome) = self.checkpoint(job)? {
                return Ok(Some(outcome));
            }
            self.tracker.progress(&job.progress);
            if (job.progress.percentage / PROGRESS_LOG_STEP).floor() > step_before {
                self.logger.log_progress(
                    job.progress.completed_chunks,
                    job.progress.total_chunks,
                    "Synthesizing",
                );
            }

            if self.shutdown.is_cancelled() {
                return Ok(Some(Outcome::Interrupted));
            }
        }

        let path = spool
            .commit_chapter(index, plan.chunks.len(), FALLBACK_SAMPLE_RATE)
            .map_err(|source| JobError::Spool {
                path: spool.chapter_path(index),
                source,
            })?;
        let size = fs::metadata(&path).map(|m| m.len()).ok();
        self.store.add_job_file(&job.id, &path, FileKind::Chunk, size)?;

        checkpoint_of(job).mark_chapter_completed(index);
        job.progress.completed_chapters += 1;
        job.progress.update_percentage();
        self.logger.log_chapter_complete(
            index,
            &plan.title,
            plan.chunks.len(),
            chapter_started.elapsed(),
        );

        if let Some(outcome) = self.checkpoint(job)? {
            return Ok(Some(outcome));
        }
        if self.shutdown.is_cancelled() {
            return Ok(Some(Outcome::Interrupted));
        }
        Ok(None)
    }

    // ─── Assembly ───

    fn assemble(&self, job: &Job, spool: &JobSpool, plans: &[ChapterPlan]) -> Result<(), JobError> {
        let output_path = job.output.path.as_path();
        let assembly_error = |source: BoxError| JobError::Assembly {
            path: output_path.to_path_buf(),
            source,
        };

        let mut chapters = Vec::with_capacity(plans.len());
        let mut sample_rate = None;
        for (index, plan) in plans.iter().enumerate() {
            let audio = spool.read_chapter(index).map_err(|source| JobError::Spool {
                path: spool.chapter_path(index),
                source,
            })?;

            if !audio.samples.is_empty() {
                match sample_rate {
                    None => sample_rate = Some(audio.sample_rate),
                    Some(rate) if rate != audio.sample_rate => {
                        return Err(assembly_error(
                            format!(
                                "chapter {} is {} Hz, earlier chapters are {} Hz",
                                index + 1,
                                audio.sample_rate,
                                rate
                            )
                            .into(),
                        ));
                    }
                    Some(_) => {}
                }
            }

            chapters.push(ChapterAudio {
                title: plan.title.clone(),
                samples: audio.samples,
            });
        }

        let request = AssemblyRequest {
            chapters: &chapters,
            sample_rate: sample_rate.unwrap_or(FALLBACK_SAMPLE_RATE),
            output_path,
            format: job.output.format,
            metadata: job.metadata.as_ref(),
        };

        let _span = tracing::info_span!(
            "job.assemble",
            format = job.output.format.as_str(),
            samples = request.total_samples(),
        )
        .entered();
        self.muxer.assemble(&request).map_err(assembly_error)
    }

    fn complete(&self, job: &mut Job, spool: &JobSpool, started: Instant) -> Result<Outcome, JobError> {
        let size = fs::metadata(&job.output.path)
            .map(|m| m.len())
            .map_err(|e| JobError::Assembly {
                path: job.output.path.clone(),
                source: Box::new(e),
            })?;

        let now = Utc::now();
        job.status = JobStatus::Completed;
        job.completed_at = Some(now);
        job.output.size = Some(size);
        job.processing_time_seconds = Some(processing_seconds(job, started));

        let progress = &mut job.progress;
        progress.completed_chapters = progress.total_chapters;
        progress.completed_chunks = progress.total_chunks;
        progress.percentage = 100.0;
        progress.eta_seconds = Some(0.0);
        progress.current_chapter = None;
        progress.current_operation = Some("Completed".to_string());

        if let Err(e) = self.store.update_claimed_job(job, &self.settings.worker_id) {
            return Ok(self.rejected_write(&job.id, e)?);
        }

        if let Err(e) = self
            .store
            .add_job_file(&job.id, &job.output.path, FileKind::Output, Some(size))
        {
            tracing::warn!(error = %e, "failed to record output file");
        }
        if let Err(e) = spool.remove() {
            tracing::warn!(error = %e, dir = %spool.dir().display(), "failed to remove spool");
        }
        if let Err(e) = self.store.remove_job_files(&job.id, FileKind::Chunk) {
            tracing::warn!(error = %e, "failed to forget chunk files");
        }

        let output = job.output.path.display().to_string();
        self.logger.info(
            &format!("Audiobook created: {}", output),
            Some(json!({
                "output_path": output,
                "output_size": size,
                "chapters": job.progress.total_chapters,
                "processing_time_seconds": job.processing_time_seconds,
            })),
        );
        self.tracker.completed(&output, &job.progress);
        Ok(Outcome::Completed)
    }

    // ─── Endings ───

    fn fail(
        &self,
        job: &mut Job,
        err: JobError,
        site: Option<usize>,
        started: Instant,
    ) -> Result<Outcome, DatabaseError> {
        let info = err.to_error_info(site);
        self.logger.log_error_with_context(
            &err,
            err.kind(),
            err.operation(),
            info.chapter_index,
            info.chunk_index,
        );

        job.status = JobStatus::Failed;
        job.completed_at = Some(Utc::now());
        job.processing_time_seconds = Some(processing_seconds(job, started));
        job.error_info = Some(info);
        if job.resume_data.is_none() {
            job.resume_data = Some(ResumeData::new());
        }
        job.progress.current_operation = Some("Failed".to_string());
        job.progress.eta_seconds = None;

        if let Err(e) = self.store.update_claimed_job(job, &self.settings.worker_id) {
            let outcome = self.rejected_write(&job.id, e)?;
            if outcome == Outcome::Cancelled {
                self.on_cancelled(job);
            }
            return Ok(outcome);
        }

        self.tracker.failed(&err.to_string(), &job.progress);
        Ok(Outcome::Failed)
    }

    /// Clears the checkpoint markers, then drops the spooled audio they
    /// referred to. The spool is kept if the markers could not be cleared.
    fn on_cancelled(&self, job: &mut Job) {
        self.logger.warning(
            "Job cancelled, stopped at a chunk boundary",
            Some(json!({
                "completed_chunks": job.progress.completed_chunks,
                "total_chunks": job.progress.total_chunks,
            })),
        );
        self.tracker.cancelled(&job.progress);

        job.resume_data = Some(ResumeData::new());
        if let Err(e) = self.store.update_progress(job, &self.settings.worker_id) {
            tracing::warn!(error = %e, "failed to clear checkpoint of cancelled job, keeping spool");
            return;
        }
        if let Err(e) = JobSpool::locate(&self.settings.spool_dir, &job.id).remove() {
            tracing::warn!(error = %e, "failed to remove spool of cancelled job");
        }
        if let Err(e) = self.store.remove_job_files(&job.id, FileKind::Chunk) {
            tracing::warn!(error = %e, "failed to forget chunk files");
        }
    }

    /// Maps a rejected write from this worker onto an outcome. Anything other
    /// than a lost claim, a forbidden transition or a missing row is passed
    /// back as a storage failure.
    fn rejected_write(&self, job_id: &str, err: DatabaseError) -> Result<Outcome, DatabaseError> {
        match err {
            DatabaseError::OwnershipLost { .. } => {
                tracing::warn!(job_id, "job was claimed by another worker");
                Ok(Outcome::Abandoned)
            }
            DatabaseError::InvalidTransition { .. } | DatabaseError::NotFound(_) => {
                Ok(self.lost_ownership(job_id))
            }
            e => Err(e),
        }
    }

    /// Decides what a rejected final write means: the job was either
    /// cancelled, deleted or moved elsewhere while it ran.
    fn lost_ownership(&self, job_id: &str) -> Outcome {
        match self.store.job_status(job_id) {
            Ok(Some(JobStatus::Cancelled)) => Outcome::Cancelled,
            Ok(_) => Outcome::Abandoned,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read back job status");
                Outcome::Abandoned
            }
        }
    }
}

fn processing_seconds(job: &Job, started: Instant) -> f64 {
    let attempt = started.elapsed().as_secs_f64();
    job.elapsed()
        .map(|d| d.as_secs_f64())
        .unwrap_or(attempt)
        .max(attempt)
}
