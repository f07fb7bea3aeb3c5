//! Progress counters and the derived percentage/ETA figures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Progress of one job, written by the worker that owns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobProgress {
    pub total_chapters: u32,
    pub completed_chapters: u32,
    pub total_chunks: u64,
    pub completed_chunks: u64,

    /// Display only.
    pub current_chapter: Option<String>,
    /// Display only.
    pub current_operation: Option<String>,

    pub percentage: f64,
    pub chunks_per_second: f64,
    pub eta_seconds: Option<f64>,
}

impl JobProgress {
    /// `completed_chunks / total_chunks * 100`, clamped to `0..=100`, and
    /// 0 when nothing is known about the total yet.
    pub fn compute_percentage(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        let pct = self.completed_chunks as f64 / self.total_chunks as f64 * 100.0;
        pct.clamp(0.0, 100.0)
    }

    pub fn update_percentage(&mut self) {
        self.percentage = self.compute_percentage();
    }

    /// Recomputes throughput and ETA.
    ///
    /// `chunks_done` counts chunks synthesized during `elapsed`, so chunks
    /// credited from an earlier attempt do not inflate the throughput.
    pub fn update_eta(&mut self, chunks_done: u64, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 || chunks_done == 0 {
            self.chunks_per_second = 0.0;
            self.eta_seconds = None;
            return;
        }

        self.chunks_per_second = chunks_done as f64 / secs;
        let remaining = self.total_chunks.saturating_sub(self.completed_chunks);
        self.eta_seconds = Some(remaining as f64 / self.chunks_per_second);
    }

    /// Human-readable ETA: `Calculating...`, `42s`, `3m 5s` or `1h 2m`.
    pub fn format_eta(&self) -> String {
        let Some(eta) = self.eta_seconds else {
            return "Calculating...".to_string();
        };

        let seconds = eta.max(0.0) as u64;
        if seconds < 60 {
            format!("{}s", seconds)
        } else if seconds < 3600 {
            format!("{}m {}s", seconds / 60, seconds % 60)
        } else {
            format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
        }
    }
}
