//! Batch workers
//!
//! A worker receives a list of file paths, analyzes the files one after the
//! other and answers with one [`FileOutcome`] per path, in input order. Read
//! and parse failures are turned into failure markers so a single bad file
//! never aborts its batch.
//!
//! Workers speak a line-delimited JSON protocol:
//!
//! ```text
//! -> {"type":"analyze","file_list":["a.xml","b.xml"]}
//! <- {"type":"results","results":[{"analyzed":{...}},{"failed":{...}}]}
//! -> {"type":"kill"}
//! ```
//!
//! An `analyze` request may carry a `mode`; combination mode answers with
//! `combinations` outcomes instead of `analyzed` ones.
//!
//! The same protocol is served by a child process ([`ProcessSpawner`]) and by
//! an in-process task connected through in-memory pipes ([`TaskSpawner`]).
//! Nothing but serialized messages crosses between a worker and its owner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::analyzer;
use crate::cli::VerbosityLevel;
use crate::combinations::{self, CombinationQuery, CombinationTable};
use crate::error::{AnalyzeError, Result, StatsError};
use crate::tree::FrequencyTree;

/// Hidden command-line flag that puts the binary in worker mode
pub const WORKER_FLAG: &str = "--worker";

/// Time a worker gets to exit on its own after `kill`
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Why a file did not contribute a tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The file could not be read
    Read,
    /// The file is not well-formed XML
    Parse,
    /// The worker handling the file's batch did not reply in time
    Timeout,
    /// The worker handling the file's batch died or broke the protocol
    Worker,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::Read => "read error",
            FailureKind::Parse => "parse error",
            FailureKind::Timeout => "timeout",
            FailureKind::Worker => "worker failure",
        };
        f.write_str(name)
    }
}

/// Failure marker standing in for the tree of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub kind: FailureKind,
    pub message: String,
}

impl FileFailure {
    pub fn new(path: PathBuf, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            path,
            kind,
            message: message.into(),
        }
    }
}

impl From<AnalyzeError> for FileFailure {
    fn from(err: AnalyzeError) -> Self {
        let kind = match err {
            AnalyzeError::Read { .. } => FailureKind::Read,
            AnalyzeError::Parse { .. } => FailureKind::Parse,
        };
        let path = err.path().clone();
        FileFailure::new(path, kind, err.to_string())
    }
}

/// Result for one input path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOutcome {
    Analyzed(FrequencyTree),
    Combinations(CombinationTable),
    Failed(FileFailure),
}

impl FileOutcome {
    /// Path the outcome belongs to
    pub fn path(&self) -> Option<&Path> {
        match self {
            FileOutcome::Analyzed(tree) => tree.file_name.as_deref(),
            FileOutcome::Combinations(table) => table.file_name.as_deref(),
            FileOutcome::Failed(failure) => Some(&failure.path),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FileOutcome::Failed(_))
    }

    /// Whether this is a result a worker in `mode` may produce
    pub fn answers(&self, mode: &AnalysisMode) -> bool {
        match (self, mode) {
            (FileOutcome::Failed(_), _) => true,
            (FileOutcome::Analyzed(_), AnalysisMode::Frequencies) => true,
            (FileOutcome::Combinations(_), AnalysisMode::Combinations(_)) => true,
            _ => false,
        }
    }
}

/// What a worker computes for each file
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Element, attribute and value frequency trees
    #[default]
    Frequencies,
    /// Attribute value combinations of selected elements
    Combinations(CombinationQuery),
}

impl AnalysisMode {
    fn is_frequencies(&self) -> bool {
        matches!(self, AnalysisMode::Frequencies)
    }

    pub fn label(&self) -> &'static str {
        match self {
            AnalysisMode::Frequencies => "frequency",
            AnalysisMode::Combinations(_) => "combination",
        }
    }
}

/// Messages sent to a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    Analyze {
        file_list: Vec<PathBuf>,
        #[serde(default, skip_serializing_if = "AnalysisMode::is_frequencies")]
        mode: AnalysisMode,
    },
    Kill,
    #[serde(other)]
    Unknown,
}

/// Messages sent back by a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerReply {
    Results { results: Vec<FileOutcome> },
    #[serde(other)]
    Unknown,
}

/// Read and analyze one file
pub async fn analyze_path(path: &Path, mode: &AnalysisMode) -> FileOutcome {
    let result = match mode {
        AnalysisMode::Frequencies => analyzer::analyze_file(path)
            .await
            .map(FileOutcome::Analyzed),
        AnalysisMode::Combinations(query) => combinations::count_file(path, query)
            .await
            .map(FileOutcome::Combinations),
    };

    result.unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "Skipping file");
        FileOutcome::Failed(e.into())
    })
}

/// Analyze a batch sequentially, one outcome per path in input order
pub async fn analyze_batch(paths: &[PathBuf], mode: &AnalysisMode) -> Vec<FileOutcome> {
    let mut outcomes = Vec::with_capacity(paths.len());
    for path in paths {
        outcomes.push(analyze_path(path, mode).await);
    }
    outcomes
}

/// Serve the worker protocol until `kill` or end of input
pub async fn serve<R, W>(input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<WorkerRequest>(&line) {
            Ok(WorkerRequest::Analyze { file_list, mode }) => {
                debug!(files = file_list.len(), ?mode, "Analyzing batch");
                let results = analyze_batch(&file_list, &mode).await;
                let mut reply = serde_json::to_string(&WorkerReply::Results { results })?;
                reply.push('\n');
                output.write_all(reply.as_bytes()).await?;
                output.flush().await?;
            }
            Ok(WorkerRequest::Kill) => {
                debug!("Worker received kill");
                return Ok(());
            }
            Ok(WorkerRequest::Unknown) => warn!(message = %line, "Unknown message type"),
            Err(e) => warn!(message = %line, error = %e, "Unreadable message"),
        }
    }
    Ok(())
}

/// Serve the worker protocol on this process's stdin and stdout
pub async fn serve_stdio() -> Result<()> {
    serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

/// A live worker owning one batch at a time
#[async_trait]
pub trait BatchWorker: Send {
    /// Send a batch and wait for the complete reply
    async fn analyze(
        &mut self,
        files: &[PathBuf],
        mode: &AnalysisMode,
    ) -> Result<Vec<FileOutcome>>;

    /// Terminate the worker; it must not be used afterwards
    async fn kill(&mut self) -> Result<()>;
}

/// Creates a fresh worker for every batch
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(&self) -> Result<Box<dyn BatchWorker>>;
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReplies = Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>;

enum WorkerHandle {
    Process(Child),
    Task(JoinHandle<Result<()>>),
}

/// Client end of the worker protocol
struct PipeWorker {
    requests: BoxedWriter,
    replies: BoxedReplies,
    handle: WorkerHandle,
}

impl PipeWorker {
    fn new(
        requests: BoxedWriter,
        replies: Box<dyn AsyncRead + Send + Unpin>,
        handle: WorkerHandle,
    ) -> Self {
        Self {
            requests,
            replies: BufReader::new(replies).lines(),
            handle,
        }
    }

    async fn send(&mut self, request: &WorkerRequest) -> Result<()> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        self.requests.write_all(line.as_bytes()).await?;
        self.requests.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl BatchWorker for PipeWorker {
    async fn analyze(
        &mut self,
        files: &[PathBuf],
        mode: &AnalysisMode,
    ) -> Result<Vec<FileOutcome>> {
        self.send(&WorkerRequest::Analyze {
            file_list: files.to_vec(),
            mode: mode.clone(),
        })
        .await?;

        loop {
            let line = self.replies.next_line().await?.ok_or_else(|| {
                StatsError::WorkerProtocol {
                    details: "worker exited before replying".to_string(),
                }
            })?;

            match serde_json::from_str::<WorkerReply>(&line) {
                Ok(WorkerReply::Results { results }) => return Ok(results),
                Ok(WorkerReply::Unknown) => warn!(message = %line, "Unknown message type"),
                Err(e) => warn!(message = %line, error = %e, "Unreadable worker message"),
            }
        }
    }

    async fn kill(&mut self) -> Result<()> {
        // The worker may already be gone; the handle below is authoritative.
        if let Err(e) = self.send(&WorkerRequest::Kill).await {
            debug!(error = %e, "Could not deliver kill message");
        }

        match &mut self.handle {
            WorkerHandle::Process(child) => {
                match tokio::time::timeout(KILL_GRACE, child.wait()).await {
                    Ok(status) => {
                        debug!(status = ?status?, "Worker process exited");
                    }
                    Err(_) => {
                        warn!("Worker process ignored kill message, terminating");
                        child.kill().await?;
                    }
                }
            }
            WorkerHandle::Task(handle) => {
                if tokio::time::timeout(KILL_GRACE, &mut *handle).await.is_err() {
                    warn!("Worker task ignored kill message, aborting");
                    handle.abort();
                }
            }
        }
        Ok(())
    }
}

/// Arguments that put the binary in worker mode at the given verbosity
pub fn worker_args(verbosity: VerbosityLevel) -> Vec<String> {
    std::iter::once(WORKER_FLAG)
        .chain(verbosity.flag())
        .map(str::to_string)
        .collect()
}

/// Spawns each worker as a child process speaking the protocol on stdio
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-run the current executable in worker mode
    ///
    /// The worker logs at the same verbosity as its owner.
    pub fn current_exe(verbosity: VerbosityLevel) -> Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program, worker_args(verbosity)))
    }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    async fn spawn(&self) -> Result<Box<dyn BatchWorker>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StatsError::WorkerSpawn {
                details: format!("{}: {}", self.program.display(), e),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| StatsError::WorkerSpawn {
            details: "worker stdin is not piped".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| StatsError::WorkerSpawn {
            details: "worker stdout is not piped".to_string(),
        })?;
        debug!(pid = ?child.id(), "Spawned worker process");

        Ok(Box::new(PipeWorker::new(
            Box::new(stdin),
            Box::new(stdout),
            WorkerHandle::Process(child),
        )))
    }
}

/// Spawns each worker as a tokio task connected through in-memory pipes
#[derive(Debug, Clone)]
pub struct TaskSpawner {
    buffer_size: usize,
}

impl TaskSpawner {
    pub fn new() -> Self {
        Self {
            buffer_size: 64 * 1024,
        }
    }
}

impl Default for TaskSpawner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerSpawner for TaskSpawner {
    async fn spawn(&self) -> Result<Box<dyn BatchWorker>> {
        let (client_requests, worker_requests) = tokio::io::duplex(self.buffer_size);
        let (worker_replies, client_replies) = tokio::io::duplex(self.buffer_size);

        let handle = tokio::spawn(serve(BufReader::new(worker_requests), worker_replies));
        debug!("Spawned worker task");

        Ok(Box::new(PipeWorker::new(
            Box::new(client_requests),
            Box::new(client_replies),
            WorkerHandle::Task(handle),
        )))
    }
}
