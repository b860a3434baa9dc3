//! Status model and the shared status file writer.
//!
//! The status file (`~/.claude-companion/status.json` by default) is a single JSON
//! object that is fully replaced on every publish:
//!
//! ```json
//! { "status": "working", "action": "Running ls...", "timestamp": 1739624251178,
//!   "usage": { "context": 8000, "output": 300 } }
//! ```
//!
//! Writes go through one writer task, so they land in the order `publish` was
//! called even when callers do not await each other.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{trace, warn};

/// Agent state shown by the companion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PetState {
    Idle,
    Thinking,
    Working,
    Reading,
    /// Blocked on the user (e.g. command approval)
    Waiting,
    Done,
    Error,
}

impl PetState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Thinking => "thinking",
            Self::Working => "working",
            Self::Reading => "reading",
            Self::Waiting => "waiting",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

/// Token accounting for the latest model request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input tokens, cached tokens included
    pub context: u64,
    pub output: u64,
}

/// A derived "what is the agent doing" value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: PetState,
    pub action: String,
    pub usage: Option<TokenUsage>,
}

impl StatusUpdate {
    pub fn new(status: PetState, action: impl Into<String>) -> Self {
        Self {
            status,
            action: action.into(),
            usage: None,
        }
    }
}

/// On-disk shape of the status file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFile {
    pub status: PetState,
    pub action: String,
    /// Unix epoch milliseconds, captured at write time
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// Read the current status file, if any.
pub fn read_status_file(path: &Path) -> Option<StatusFile> {
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to write status file: {0}")]
    Io(#[from] io::Error),
    #[error("failed to serialize status: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("status writer is no longer running")]
    Closed,
}

/// Destination for serialized status records.
pub trait StatusSink: Send + Sync + 'static {
    /// Replace the persisted status with `data`.
    fn write(&self, data: Vec<u8>) -> impl Future<Output = io::Result<()>> + Send;
}

/// Writes the status file atomically, creating its directory first.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StatusSink for FileSink {
    fn write(&self, data: Vec<u8>) -> impl Future<Output = io::Result<()>> + Send {
        let path = self.path.clone();
        async move {
            tokio::task::spawn_blocking(move || write_status_file(&path, &data))
                .await
                .map_err(io::Error::other)?
        }
    }
}

fn write_status_file(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    atomic_write(path, data)
}

/// Write bytes to a file atomically: write to a temp file in the same
/// directory, then rename over the target. Readers never see partial JSON.
fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    use std::io::Write;

    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

struct WriteJob {
    status: PetState,
    action: String,
    usage: Option<TokenUsage>,
    done: oneshot::Sender<Result<(), PublishError>>,
}

/// FIFO status writer.
///
/// Cloning is cheap; all clones feed the same queue.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    tx: mpsc::UnboundedSender<WriteJob>,
}

impl StatusPublisher {
    /// Spawn a writer for the status file at `path`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(path: impl Into<PathBuf>) -> Self {
        Self::with_sink(FileSink::new(path))
    }

    /// Spawn a writer backed by a custom sink.
    pub fn with_sink<S: StatusSink>(sink: S) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(sink, rx));
        Self { tx }
    }

    /// Queue a status write.
    ///
    /// The write is enqueued before this returns, so queue order is call order.
    /// The returned handle resolves once this write has finished (or failed);
    /// dropping it does not cancel the write.
    pub fn publish(
        &self,
        status: PetState,
        action: impl Into<String>,
        usage: Option<TokenUsage>,
    ) -> PublishHandle {
        let (done, rx) = oneshot::channel();
        let job = WriteJob {
            status,
            action: action.into(),
            usage,
            done,
        };
        if let Err(mpsc::error::SendError(job)) = self.tx.send(job) {
            let _ = job.done.send(Err(PublishError::Closed));
        }
        PublishHandle { rx }
    }
}

/// Completion of a single queued write
#[derive(Debug)]
pub struct PublishHandle {
    rx: oneshot::Receiver<Result<(), PublishError>>,
}

impl Future for PublishHandle {
    type Output = Result<(), PublishError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(PublishError::Closed)))
    }
}

async fn run_writer<S: StatusSink>(sink: S, mut rx: mpsc::UnboundedReceiver<WriteJob>) {
    while let Some(job) = rx.recv().await {
        let result = write_one(&sink, job.status, job.action, job.usage).await;
        if let Err(e) = &result {
            // Keep draining; one failed write must not starve later ones.
            warn!(error = %e, "status write failed");
        }
        let _ = job.done.send(result);
    }
}

async fn write_one<S: StatusSink>(
    sink: &S,
    status: PetState,
    action: String,
    usage: Option<TokenUsage>,
) -> Result<(), PublishError> {
    let record = StatusFile {
        status,
        action,
        timestamp: chrono::Utc::now().timestamp_millis(),
        usage,
    };
    let data = serde_json::to_vec_pretty(&record)?;
    sink.write(data).await?;
    trace!(status = record.status.as_str(), action = %record.action, "status written");
    Ok(())
}
