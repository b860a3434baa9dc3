//! Codex session rollout tailer.
//!
//! Follows the active rollout under `~/.codex/sessions/YYYY/MM/DD/rollout-*.jsonl`
//! (or `$CODEX_HOME/sessions`) and hands every newly appended record to a
//! callback. Only bytes written after the watch starts are delivered; there is
//! no replay of earlier history.
//!
//! # Architecture
//!
//! One worker task owns the [`TailState`]. `notify` callbacks never touch it;
//! they push [`Signal`]s into a channel. After every read pass the worker drains
//! whatever arrived meanwhile, so a burst of growth notifications collapses into
//! a single catch-up read and two reads can never overlap.
//!
//! A second, recursive watch on the sessions root notices new rollouts. When one
//! appears the worker drops the old file and tails the new one from offset zero.
//! A rollout written into a freshly created date directory may produce no event
//! of its own, so directory-level changes and the poll tick rescan the tree for
//! a session log not seen before.

mod chunk;
mod paths;

pub use self::chunk::{ParsedChunk, parse_jsonl_chunk};
pub use self::paths::find_latest_session;

use super::entry::SessionEntry;
use crate::config::{SessionFileSpec, Settings};
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to initialize file watcher: {0}")]
    Notify(#[from] notify::Error),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Where session logs live and how often to poll as a fallback.
#[derive(Debug, Clone)]
pub struct TailConfig {
    pub sessions_root: PathBuf,
    pub session: SessionFileSpec,
    /// Growth is re-checked at this interval even without a notification.
    pub poll_interval: Duration,
}

impl From<&Settings> for TailConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            sessions_root: settings.sessions_root.clone(),
            session: settings.session.clone(),
            poll_interval: settings.poll_interval,
        }
    }
}

/// Work requested by a watcher callback.
#[derive(Debug, PartialEq, Eq)]
enum Signal {
    /// The tailed file changed
    Grew,
    /// A session log appeared under the sessions root
    Created(PathBuf),
    /// Events may have been lost or lacked a session path; look for a newer
    /// rollout and re-read the current one
    Rescan,
}

/// Read position within one session log.
#[derive(Debug)]
struct TailState {
    path: PathBuf,
    /// Bytes already consumed; never beyond the file's size.
    offset: u64,
    /// Text after the last newline that did not parse yet.
    remainder: String,
    /// Trailing bytes of a UTF-8 sequence cut by the last read.
    utf8_carry: Vec<u8>,
    /// More data may be waiting; read again.
    dirty: bool,
}

impl TailState {
    /// Start at the current end of `path` (offset zero if it cannot be stat'ed).
    async fn at_end(path: PathBuf) -> Self {
        let offset = file_len(&path).await.unwrap_or(0);
        Self {
            path,
            offset,
            remainder: String::new(),
            utf8_carry: Vec::new(),
            dirty: false,
        }
    }

    /// A newly rotated-in log: read it from the start, right away.
    fn rotated(path: PathBuf) -> Self {
        Self {
            path,
            offset: 0,
            remainder: String::new(),
            utf8_carry: Vec::new(),
            dirty: true,
        }
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Read `[offset, len)` and return the records it completes.
    ///
    /// I/O failures (file rotated away, permissions) end the pass quietly; the
    /// next notification retries.
    async fn read_new_content(&mut self) -> Vec<SessionEntry> {
        let len = match file_len(&self.path).await {
            Ok(len) => len,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "failed to stat codex rollout");
                return Vec::new();
            }
        };

        if len < self.offset {
            debug!(path = %self.path.display(), "codex rollout truncated; skipping to end");
            self.offset = len;
            self.remainder.clear();
            self.utf8_carry.clear();
            return Vec::new();
        }
        if len == self.offset {
            return Vec::new();
        }

        let bytes = match read_range(&self.path, self.offset, len - self.offset).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "failed to read codex rollout");
                return Vec::new();
            }
        };
        self.offset += bytes.len() as u64;
        debug!(path = %self.path.display(), bytes = bytes.len(), "read new rollout bytes");

        let text = decode_utf8(&mut self.utf8_carry, &bytes);
        let parsed = parse_jsonl_chunk::<SessionEntry>(&text, &self.remainder);
        self.remainder = parsed.remainder;
        trace!(entries = parsed.entries.len(), "parsed rollout chunk");
        parsed.entries
    }
}

async fn file_len(path: &Path) -> io::Result<u64> {
    tokio::fs::metadata(path).await.map(|m| m.len())
}

async fn read_range(path: &Path, offset: u64, len: u64) -> io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
    file.take(len).read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Decode `bytes` after any carried-over partial character, holding back a
/// new incomplete trailing sequence. Invalid bytes elsewhere decode lossily.
fn decode_utf8(carry: &mut Vec<u8>, bytes: &[u8]) -> String {
    carry.extend_from_slice(bytes);
    let keep = incomplete_utf8_suffix(carry);
    let tail = carry.split_off(carry.len() - keep);
    let text = String::from_utf8_lossy(carry).into_owned();
    *carry = tail;
    text
}

/// Length of an unfinished multi-byte sequence at the end of `buf`.
fn incomplete_utf8_suffix(buf: &[u8]) -> usize {
    for back in 1..=buf.len().min(3) {
        let byte = buf[buf.len() - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if width > back { back } else { 0 };
    }
    0
}

enum Phase {
    /// No session log yet; waiting for the first one to be created.
    Seeking,
    Tailing(TailState),
}

struct TailWorker<F> {
    config: TailConfig,
    phase: Phase,
    on_event: F,
    rx: mpsc::UnboundedReceiver<Signal>,
    file_watcher: RecommendedWatcher,
    dir_watcher: RecommendedWatcher,
    dir_armed: bool,
    /// Session logs already tailed or present when tailing began.
    seen: HashSet<PathBuf>,
}

impl<F> TailWorker<F>
where
    F: FnMut(SessionEntry) + Send + 'static,
{
    fn new(config: TailConfig, phase: Phase, on_event: F) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let file_tx = tx.clone();
        let file_watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) if matches!(event.kind, EventKind::Access(_)) => {}
                    Ok(_) => {
                        let _ = file_tx.send(Signal::Grew);
                    }
                    Err(err) => {
                        debug!(error = %err, "codex rollout watcher error");
                        let _ = file_tx.send(Signal::Rescan);
                    }
                }
            })?;

        let root = config.sessions_root.clone();
        let spec = config.session.clone();
        let dir_watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                let event = match res {
                    Ok(e) => e,
                    Err(err) => {
                        debug!(error = %err, "codex sessions watcher error");
                        let _ = tx.send(Signal::Rescan);
                        return;
                    }
                };
                for signal in dir_signals(&root, &spec, event) {
                    let _ = tx.send(signal);
                }
            })?;

        let mut worker = Self {
            config,
            phase,
            on_event,
            rx,
            file_watcher,
            dir_watcher,
            dir_armed: false,
            seen: HashSet::new(),
        };
        let initial = match &worker.phase {
            Phase::Tailing(state) => Some(state.path.clone()),
            Phase::Seeking => None,
        };
        if let Some(path) = initial {
            worker.watch_file(&path);
            worker.seen.insert(path);
        }
        worker.arm_dir_watch();
        Ok(worker)
    }

    fn watch_file(&mut self, path: &Path) {
        if let Err(e) = self.file_watcher.watch(path, RecursiveMode::NonRecursive) {
            // The poll tick still picks up growth.
            debug!(path = %path.display(), error = %e, "failed to watch codex rollout");
        }
    }

    fn unwatch_file(&mut self, path: &Path) {
        if let Err(e) = self.file_watcher.unwatch(path) {
            debug!(path = %path.display(), error = %e, "failed to unwatch codex rollout");
        }
    }

    fn arm_dir_watch(&mut self) {
        if self.dir_armed {
            return;
        }
        let root = &self.config.sessions_root;
        match self.dir_watcher.watch(root, RecursiveMode::Recursive) {
            Ok(()) => {
                self.dir_armed = true;
                debug!(path = %root.display(), "watching codex sessions root");
            }
            Err(e) => {
                debug!(path = %root.display(), error = %e, "codex sessions root not watchable yet");
            }
        }
    }

    /// While tailing, rollouts that already exist are not rotation targets;
    /// only ones created afterwards are.
    async fn remember_existing_sessions(&mut self) {
        if matches!(self.phase, Phase::Seeking) {
            return;
        }
        if let Some(latest) = find_latest_session(&self.config.sessions_root, &self.config.session).await {
            self.seen.insert(latest);
        }
    }

    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        self.remember_existing_sessions().await;

        let mut tick = tokio::time::interval(self.config.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                signal = self.rx.recv() => match signal {
                    Some(signal) => self.absorb(signal).await,
                    None => break,
                },
                _ = tick.tick() => self.on_tick().await,
            }

            self.drain_signals().await;
            self.catch_up().await;
        }

        debug!("codex session watcher stopped");
    }

    /// Read until no growth is pending.
    async fn catch_up(&mut self) {
        loop {
            let Phase::Tailing(state) = &mut self.phase else {
                return;
            };
            if !state.take_dirty() {
                return;
            }

            let entries = state.read_new_content().await;
            for entry in entries {
                trace!(kind = entry.kind(), "codex rollout entry");
                (self.on_event)(entry);
            }

            // Growth signalled during the read sets `dirty` again.
            self.drain_signals().await;
        }
    }

    async fn drain_signals(&mut self) {
        while let Ok(signal) = self.rx.try_recv() {
            self.absorb(signal).await;
        }
    }

    async fn absorb(&mut self, signal: Signal) {
        match signal {
            Signal::Grew => {
                if let Phase::Tailing(state) = &mut self.phase {
                    state.mark_dirty();
                }
            }
            Signal::Rescan => self.rescan().await,
            Signal::Created(path) => self.on_created(path).await,
        }
    }

    async fn rescan(&mut self) {
        if let Phase::Tailing(state) = &mut self.phase {
            state.mark_dirty();
        }
        let Some(latest) = find_latest_session(&self.config.sessions_root, &self.config.session).await else {
            return;
        };
        if self.seen.contains(&latest) {
            return;
        }
        debug!(path = %latest.display(), "rescan found new codex session");
        self.on_created(latest).await;
    }

    async fn on_created(&mut self, path: PathBuf) {
        self.seen.insert(path.clone());
        let current = match &self.phase {
            Phase::Seeking => None,
            Phase::Tailing(state) if state.path == path => return,
            Phase::Tailing(state) => Some(state.path.clone()),
        };

        match current {
            None => {
                info!(path = %path.display(), "discovered first codex session");
                self.watch_file(&path);
                // Only content appended from here on is delivered.
                self.phase = Phase::Tailing(TailState::at_end(path).await);
            }
            Some(old) => {
                info!(from = %old.display(), to = %path.display(), "switching to new codex session");
                self.unwatch_file(&old);
                self.watch_file(&path);
                self.phase = Phase::Tailing(TailState::rotated(path));
            }
        }
    }

    async fn on_tick(&mut self) {
        self.arm_dir_watch();
        self.rescan().await;
    }
}

/// Signals for one event from the sessions-root watch.
fn dir_signals(root: &Path, spec: &SessionFileSpec, event: notify::Event) -> Vec<Signal> {
    if matches!(event.kind, EventKind::Other) || event.need_rescan() || event.paths.is_empty() {
        return vec![Signal::Rescan];
    }
    if !is_creation(&event.kind) {
        return Vec::new();
    }

    let mut signals = Vec::new();
    for path in event.paths {
        if !paths::within_session_depth(root, &path) {
            continue;
        }
        if spec.matches(&path) {
            signals.push(Signal::Created(path));
        } else if !signals.iter().any(|s| matches!(s, Signal::Rescan)) {
            // A new date directory; files created in it before its own watch
            // was added report nothing.
            signals.push(Signal::Rescan);
        }
    }
    signals
}

fn is_creation(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To))
    )
}

/// Handle to a running session watch.
///
/// Dropping the handle stops the watch as well.
#[derive(Debug)]
pub struct SessionWatch {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SessionWatch {
    /// Stop watching. An in-flight read finishes first; nothing is scheduled
    /// after it. Calling this again is a no-op.
    pub async fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "codex session watcher task failed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_none()
    }
}

fn spawn_worker<F>(config: TailConfig, phase: Phase, on_event: F) -> Result<SessionWatch, WatchError>
where
    F: FnMut(SessionEntry) + Send + 'static,
{
    let worker = TailWorker::new(config, phase, on_event)?;
    let (shutdown, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(worker.run(shutdown_rx));
    Ok(SessionWatch {
        shutdown: Some(shutdown),
        task: Some(task),
    })
}

/// Tail `path` from its current end, following rotation to newer rollouts.
pub async fn watch_session<F>(
    path: impl Into<PathBuf>,
    config: TailConfig,
    on_event: F,
) -> Result<SessionWatch, WatchError>
where
    F: FnMut(SessionEntry) + Send + 'static,
{
    let path = path.into();
    info!(path = %path.display(), "watching codex session");
    let state = TailState::at_end(path).await;
    spawn_worker(config, Phase::Tailing(state), on_event)
}

/// Wait for the first rollout to be created, then tail it like [`watch_session`].
pub async fn watch_for_first_session<F>(
    config: TailConfig,
    on_event: F,
) -> Result<SessionWatch, WatchError>
where
    F: FnMut(SessionEntry) + Send + 'static,
{
    info!(path = %config.sessions_root.display(), "waiting for first codex session");
    spawn_worker(config, Phase::Seeking, on_event)
}
