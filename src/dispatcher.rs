//! Batch dispatcher
//!
//! Splits the file list into batches of bounded size and runs them strictly
//! one after the other, each on a freshly spawned worker that is killed once
//! it has replied. At most one batch worth of documents is therefore being
//! parsed at any time, and a worker that degrades over many documents is
//! discarded after every batch.
//!
//! A worker that times out, dies, or answers with the wrong results only
//! costs its own batch: every path of that batch gets a failure marker and
//! the run continues.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::combinations::{CombinationQuery, CombinationStatistics, merge_combination_outcomes};
use crate::error::{Result, StatsError};
use crate::merger::{CorpusStatistics, merge_outcomes};
use crate::worker::{AnalysisMode, FailureKind, FileFailure, FileOutcome, WorkerSpawner};

/// Default number of files handed to one worker
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default time a worker gets to answer one batch
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(300);

/// Dispatcher configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Maximum number of files per batch
    pub batch_size: usize,
    /// Maximum time to wait for a worker's reply
    pub worker_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            worker_timeout: DEFAULT_WORKER_TIMEOUT,
        }
    }
}

/// An ordered slice of the file list processed by one worker lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// 1-based position of the batch
    pub index: usize,
    /// Number of batches in the run
    pub total: usize,
    pub files: Vec<PathBuf>,
}

/// Split `files` into consecutive batches of at most `capacity` paths
///
/// A capacity of zero is treated as one.
pub fn partition(files: Vec<PathBuf>, capacity: usize) -> Vec<Batch> {
    let capacity = capacity.max(1);
    let total = files.len().div_ceil(capacity);

    let mut batches = Vec::with_capacity(total);
    let mut remaining = files.into_iter().peekable();
    while remaining.peek().is_some() {
        let files: Vec<PathBuf> = remaining.by_ref().take(capacity).collect();
        batches.push(Batch {
            index: batches.len() + 1,
            total,
            files,
        });
    }
    batches
}

/// Notification emitted when a batch is handed to a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    /// 1-based index of the batch being dispatched
    pub batch_index: usize,
    pub total_batches: usize,
    /// Number of files in the batch
    pub batch_len: usize,
}

/// Progress callback type for batch notifications
pub type ProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// Ordered outcomes of a whole run
#[derive(Debug, Clone)]
pub struct DispatchReport {
    /// One outcome per input path, in input order
    pub outcomes: Vec<FileOutcome>,
    /// Number of batches dispatched
    pub batches: usize,
    pub duration: Duration,
}

/// Runs batches one at a time on fresh workers
pub struct BatchDispatcher {
    spawner: Arc<dyn WorkerSpawner>,
    config: DispatchConfig,
    progress: Option<ProgressCallback>,
}

impl BatchDispatcher {
    pub fn new(spawner: Arc<dyn WorkerSpawner>, config: DispatchConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(StatsError::Config(
                "Batch size must be greater than 0".to_string(),
            ));
        }
        if config.worker_timeout.is_zero() {
            return Err(StatsError::Config(
                "Worker timeout must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            spawner,
            config,
            progress: None,
        })
    }

    /// Register a callback invoked once per dispatched batch
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Build a frequency tree for every file, outcomes in input order
    pub async fn run(&self, files: Vec<PathBuf>) -> Result<DispatchReport> {
        self.run_mode(files, &AnalysisMode::Frequencies).await
    }

    /// Analyze every file in `mode` and return the outcomes in input order
    ///
    /// Only a failure to spawn a worker aborts the run.
    pub async fn run_mode(
        &self,
        files: Vec<PathBuf>,
        mode: &AnalysisMode,
    ) -> Result<DispatchReport> {
        let start = Instant::now();
        let batches = partition(files, self.config.batch_size);
        let total_batches = batches.len();

        let mut outcomes = Vec::new();
        for batch in batches {
            if let Some(ref callback) = self.progress {
                callback(BatchProgress {
                    batch_index: batch.index,
                    total_batches,
                    batch_len: batch.files.len(),
                });
            }
            info!(
                "Batch {}/{} ({} files)",
                batch.index,
                batch.total,
                batch.files.len()
            );

            outcomes.extend(self.run_batch(batch, mode).await?);
        }

        Ok(DispatchReport {
            outcomes,
            batches: total_batches,
            duration: start.elapsed(),
        })
    }

    /// Run all files through the workers and merge the results
    pub async fn collect(&self, files: Vec<PathBuf>) -> Result<CorpusStatistics> {
        let report = self.run(files).await?;
        let statistics = merge_outcomes(report.outcomes)?;
        info!(
            analyzed = statistics.analyzed_files,
            failed = statistics.failed_files(),
            batches = report.batches,
            elapsed = ?report.duration,
            "Analysis complete"
        );
        Ok(statistics)
    }

    /// Count attribute value combinations in every file and sum them
    pub async fn collect_combinations(
        &self,
        files: Vec<PathBuf>,
        query: CombinationQuery,
    ) -> Result<CombinationStatistics> {
        let mode = AnalysisMode::Combinations(query.clone());
        let report = self.run_mode(files, &mode).await?;
        let statistics = merge_combination_outcomes(report.outcomes, &query);
        info!(
            analyzed = statistics.analyzed_files,
            failed = statistics.failed_files(),
            combinations = statistics.combinations.len(),
            batches = report.batches,
            elapsed = ?report.duration,
            "Combination count complete"
        );
        Ok(statistics)
    }

    async fn run_batch(&self, batch: Batch, mode: &AnalysisMode) -> Result<Vec<FileOutcome>> {
        let mut worker = self.spawner.spawn().await?;

        let reply =
            tokio::time::timeout(self.config.worker_timeout, worker.analyze(&batch.files, mode))
                .await;

        let outcomes = match reply {
            Ok(Ok(results)) if matches_batch(&results, &batch.files, mode) => results,
            Ok(Ok(results)) => {
                let err = StatsError::WorkerProtocol {
                    details: format!(
                        "expected {} results for {} files in order, got {}",
                        mode.label(),
                        batch.files.len(),
                        results.len()
                    ),
                };
                warn!(batch = batch.index, error = %err, "Discarding batch");
                fail_batch(&batch.files, FailureKind::Worker, &err)
            }
            Ok(Err(err)) => {
                warn!(batch = batch.index, error = %err, "Worker failed");
                fail_batch(&batch.files, FailureKind::Worker, &err)
            }
            Err(_) => {
                let err = StatsError::WorkerTimeout {
                    timeout: self.config.worker_timeout,
                };
                warn!(batch = batch.index, error = %err, "Worker timed out");
                fail_batch(&batch.files, FailureKind::Timeout, &err)
            }
        };

        if let Err(e) = worker.kill().await {
            warn!(batch = batch.index, error = %e, "Failed to terminate worker");
        } else {
            debug!(batch = batch.index, "Worker terminated");
        }

        Ok(outcomes)
    }
}

fn matches_batch(results: &[FileOutcome], files: &[PathBuf], mode: &AnalysisMode) -> bool {
    results.len() == files.len()
        && results.iter().zip(files).all(|(outcome, path)| {
            outcome.path() == Some(path.as_path()) && outcome.answers(mode)
        })
}

fn fail_batch(files: &[PathBuf], kind: FailureKind, err: &StatsError) -> Vec<FileOutcome> {
    files
        .iter()
        .map(|path| FileOutcome::Failed(FileFailure::new(path.clone(), kind, err.to_string())))
        .collect()
}
