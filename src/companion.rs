//! Wires the Codex session tailer to the status publisher.

use crate::agents::codex::entry::EventMsg;
use crate::agents::codex::{self, EntryItem, SessionEntry, TailConfig, WatchError};
use crate::config::Settings;
use crate::status::{PublishHandle, StatusPublisher, TokenUsage};
use notify::{RecursiveMode, Watcher};
use std::future::Future;
use std::path::Path;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

/// Turns rollout records into status-file writes.
///
/// Remembers the most recent token usage so that every status published within
/// a session carries it, not just the update following a `token_count` event.
#[derive(Debug)]
pub struct CompanionWatcher {
    publisher: StatusPublisher,
    latest_usage: Option<TokenUsage>,
}

impl CompanionWatcher {
    pub fn new(publisher: StatusPublisher) -> Self {
        Self {
            publisher,
            latest_usage: None,
        }
    }

    /// Process one record. Returns the pending write if it changed the status.
    pub fn handle_entry(&mut self, entry: &SessionEntry) -> Option<PublishHandle> {
        log_entry(entry);
        if entry.is_session_start() {
            self.latest_usage = None;
        }
        if let Some(usage) = codex::extract_usage(entry) {
            self.latest_usage = Some(usage);
        }

        let update = codex::classify(entry)?;
        debug!(status = update.status.as_str(), action = %update.action, "codex status");
        let usage = update.usage.or(self.latest_usage);
        Some(self.publisher.publish(update.status, update.action, usage))
    }
}

fn log_entry(entry: &SessionEntry) {
    match &entry.item {
        EntryItem::SessionMeta(meta) => info!(
            id = meta.id.as_deref().unwrap_or("-"),
            cwd = meta.cwd.as_deref().unwrap_or("-"),
            cli_version = meta.cli_version.as_deref().unwrap_or("-"),
            "codex session started"
        ),
        EntryItem::TurnContext(turn) => debug!(
            model = turn.model.as_deref().unwrap_or("-"),
            cwd = turn.cwd.as_deref().unwrap_or("-"),
            "codex turn"
        ),
        EntryItem::EventMsg(EventMsg::TokenCount { info: Some(info) }) => {
            if let Some(total) = info.total_token_usage {
                trace!(
                    total_tokens = total.total_tokens,
                    reasoning_tokens = total.reasoning_output_tokens,
                    context_window = ?info.model_context_window,
                    "codex session token totals"
                );
            }
        }
        _ => {}
    }
}

/// Run the companion until `shutdown` resolves.
///
/// A missing Codex home is not an error: there is nothing to watch, so this
/// returns immediately.
pub async fn run(settings: &Settings, shutdown: impl Future<Output = ()>) -> Result<(), WatchError> {
    tokio::pin!(shutdown);

    if !is_dir(&settings.sessions_root).await {
        if !is_dir(&settings.codex_home).await {
            info!(path = %settings.codex_home.display(), "codex home not found; nothing to watch");
            return Ok(());
        }
        tokio::select! {
            _ = &mut shutdown => return Ok(()),
            res = wait_for_sessions_root(settings) => res?,
        }
    }

    let mut companion = CompanionWatcher::new(StatusPublisher::spawn(&settings.status_file));
    let on_event = move |entry: SessionEntry| {
        let _ = companion.handle_entry(&entry);
    };

    let config = TailConfig::from(settings);
    let mut watch = match codex::find_latest_session(&settings.sessions_root, &settings.session).await {
        Some(path) => codex::watch_session(path, config, on_event).await?,
        None => codex::watch_for_first_session(config, on_event).await?,
    };

    shutdown.await;
    info!("shutting down");
    watch.close().await;
    Ok(())
}

/// Block until `<codex_home>/sessions` exists.
async fn wait_for_sessions_root(settings: &Settings) -> Result<(), WatchError> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |_res: notify::Result<notify::Event>| {
        let _ = tx.send(());
    })?;
    watcher.watch(&settings.codex_home, RecursiveMode::NonRecursive)?;
    info!(path = %settings.sessions_root.display(), "waiting for codex sessions directory");

    let mut tick = tokio::time::interval(settings.poll_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Checked after the watch is armed so a directory created in between is seen.
    loop {
        if is_dir(&settings.sessions_root).await {
            debug!(path = %settings.sessions_root.display(), "codex sessions directory appeared");
            return Ok(());
        }
        tokio::select! {
            _ = rx.recv() => {}
            _ = tick.tick() => {}
        }
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{PetState, read_status_file};
    use serde_json::{Value, json};
    use std::time::Duration;
    use tempfile::TempDir;

    fn entry(value: Value) -> SessionEntry {
        serde_json::from_value(value).unwrap()
    }

    fn token_count(input: u64, output: u64) -> SessionEntry {
        entry(json!({
            "type": "event_msg",
            "payload": {
                "type": "token_count",
                "info": { "last_token_usage": { "input_tokens": input, "output_tokens": output } }
            }
        }))
    }

    fn reasoning(text: &str) -> SessionEntry {
        entry(json!({
            "type": "event_msg",
            "payload": { "type": "agent_reasoning", "text": text }
        }))
    }

    #[tokio::test]
    async fn token_count_alone_publishes_nothing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("status.json");
        let mut companion = CompanionWatcher::new(StatusPublisher::spawn(&path));

        assert!(companion.handle_entry(&token_count(1200, 30)).is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn later_updates_carry_latest_usage() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("status.json");
        let mut companion = CompanionWatcher::new(StatusPublisher::spawn(&path));

        let _ = companion.handle_entry(&token_count(5000, 120));
        companion
            .handle_entry(&reasoning("Planning"))
            .unwrap()
            .await
            .unwrap();

        let record = read_status_file(&path).unwrap();
        assert_eq!(record.status, PetState::Thinking);
        assert_eq!(record.action, "Thinking: \"Planning\"");
        assert_eq!(
            record.usage,
            Some(TokenUsage {
                context: 5000,
                output: 120
            })
        );
    }

    #[tokio::test]
    async fn session_start_clears_usage() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("status.json");
        let mut companion = CompanionWatcher::new(StatusPublisher::spawn(&path));

        let _ = companion.handle_entry(&token_count(5000, 120));
        companion
            .handle_entry(&entry(json!({ "type": "session_meta", "payload": { "id": "next" } })))
            .unwrap()
            .await
            .unwrap();

        let record = read_status_file(&path).unwrap();
        assert_eq!(record.status, PetState::Idle);
        assert_eq!(record.action, "Codex session started!");
        assert!(record.usage.is_none());

        // Nothing from the previous session leaks into the next update.
        companion
            .handle_entry(&reasoning("Starting over"))
            .unwrap()
            .await
            .unwrap();
        assert!(read_status_file(&path).unwrap().usage.is_none());
    }

    #[tokio::test]
    async fn unclassified_entries_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("status.json");
        let mut companion = CompanionWatcher::new(StatusPublisher::spawn(&path));

        let turn = entry(json!({ "type": "turn_context", "payload": { "model": "gpt-5" } }));
        assert!(companion.handle_entry(&turn).is_none());
    }

    #[tokio::test]
    async fn run_without_codex_home_returns() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings::for_codex_home(tmp.path().join("missing"), tmp.path().join("s.json"));

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run(&settings, std::future::pending::<()>()),
        )
        .await
        .expect("run should return when the codex home is missing");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_while_waiting_for_sessions_dir() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings::for_codex_home(tmp.path(), tmp.path().join("s.json"));

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run(&settings, tokio::time::sleep(Duration::from_millis(50))),
        )
        .await
        .expect("run should honour shutdown");
        assert!(result.is_ok());
        assert!(!settings.status_file.exists());
    }

    #[tokio::test]
    async fn run_publishes_first_session_created_in_new_day_directory() {
        use std::io::Write;

        let tmp = TempDir::new().unwrap();
        let mut settings =
            Settings::for_codex_home(tmp.path().join("codex"), tmp.path().join("out/status.json"));
        settings.poll_interval = Duration::from_millis(50);
        std::fs::create_dir_all(&settings.sessions_root).unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let rollout = settings.sessions_root.join("2026/02/15/rollout-a.jsonl");
        let complete = format!(
            "{}\n",
            json!({ "type": "event_msg", "payload": { "type": "task_complete" } })
        );

        let driver = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            std::fs::create_dir_all(rollout.parent().unwrap()).unwrap();
            std::fs::write(&rollout, "").unwrap();

            let start = tokio::time::Instant::now();
            let mut done = false;
            while !done && start.elapsed() < Duration::from_secs(10) {
                let mut file = std::fs::OpenOptions::new().append(true).open(&rollout).unwrap();
                file.write_all(complete.as_bytes()).unwrap();
                tokio::time::sleep(Duration::from_millis(200)).await;
                done = read_status_file(&settings.status_file)
                    .is_some_and(|record| record.status == PetState::Done);
            }
            let _ = stop_tx.send(());
            done
        };

        let (result, done) = tokio::join!(
            run(&settings, async {
                let _ = stop_rx.await;
            }),
            driver
        );
        assert!(result.is_ok());
        assert!(done, "first session in a new day directory was never published");
    }
}
