use crate::config::SessionFileSpec;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Find the most recent session log under `root` (`root/YYYY/MM/DD/<file>`).
///
/// Walks years, then months, then days, newest first, and stops at the first day
/// directory holding at least one matching file. Within that day the file with
/// the latest modification time wins; an older day is never consulted once a
/// newer one matched. Filesystem errors end the search with `None`.
pub async fn find_latest_session(root: &Path, spec: &SessionFileSpec) -> Option<PathBuf> {
    match scan_latest(root, spec).await {
        Ok(found) => found,
        Err(e) => {
            debug!(path = %root.display(), error = %e, "codex session scan failed");
            None
        }
    }
}

async fn scan_latest(root: &Path, spec: &SessionFileSpec) -> io::Result<Option<PathBuf>> {
    for year in numeric_child_dirs(root).await? {
        for month in numeric_child_dirs(&year).await? {
            for day in numeric_child_dirs(&month).await? {
                if let Some(found) = latest_in_day(&day, spec).await? {
                    return Ok(Some(found));
                }
            }
        }
    }
    Ok(None)
}

/// Purely-numeric child directories, newest first.
async fn numeric_child_dirs(parent: &Path) -> io::Result<Vec<PathBuf>> {
    let mut rd = tokio::fs::read_dir(parent).await?;
    let mut out = Vec::new();

    while let Some(entry) = rd.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !is_numeric(name) || !entry.file_type().await?.is_dir() {
            continue;
        }
        out.push((name.to_string(), entry.path()));
    }

    sort_newest_first(&mut out);
    Ok(out.into_iter().map(|(_, path)| path).collect())
}

fn is_numeric(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

/// Codex writes fixed-width components, where numeric order and string order
/// agree. Ordering by value keeps unpadded names (`9` vs `10`) correct as well.
fn sort_newest_first(dirs: &mut [(String, PathBuf)]) {
    dirs.sort_by(|(a, _), (b, _)| {
        let key = |s: &str| s.parse::<u64>().unwrap_or(u64::MAX);
        (key(b), b.as_str()).cmp(&(key(a), a.as_str()))
    });
}

async fn latest_in_day(day: &Path, spec: &SessionFileSpec) -> io::Result<Option<PathBuf>> {
    let mut rd = tokio::fs::read_dir(day).await?;
    let mut best: Option<(SystemTime, PathBuf)> = None;

    while let Some(entry) = rd.next_entry().await? {
        let name = entry.file_name();
        if !name.to_str().is_some_and(|n| spec.matches_name(n)) {
            continue;
        }
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified()?;
        match &best {
            Some((best_time, _)) if modified <= *best_time => {}
            _ => best = Some((modified, entry.path())),
        }
    }

    Ok(best.map(|(_, path)| path))
}

/// Number of path components of `path` below `root`, if it is inside it.
fn depth_below(root: &Path, path: &Path) -> Option<usize> {
    path.strip_prefix(root).ok().map(|rel| rel.components().count())
}

/// Whether `path` sits at `root/YYYY/MM/DD/<file>` depth (or shallower).
pub(super) fn within_session_depth(root: &Path, path: &Path) -> bool {
    depth_below(root, path).is_some_and(|depth| (1..=4).contains(&depth))
}
