//! Pollers for the sidecar JSON files the game rewrites whole.
//!
//! A watcher hands a parsed document to the handler only when the file's
//! mtime moved. Content that fails to parse at the very start (empty or
//! truncated mid-rewrite) is a transient: the mtime is not recorded, so the
//! next poll tries again, and nothing user-visible is emitted.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use fs_err as fs;
use serde_json::Value;
use tracing::debug;

use crate::log_once::LogOnce;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchedFile {
    Status,
    Market,
    Cargo,
    NavRoute,
}

impl WatchedFile {
    pub const ALL: [WatchedFile; 4] = [
        WatchedFile::Status,
        WatchedFile::Market,
        WatchedFile::Cargo,
        WatchedFile::NavRoute,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            WatchedFile::Status => "Status.json",
            WatchedFile::Market => "Market.json",
            WatchedFile::Cargo => "Cargo.json",
            WatchedFile::NavRoute => "NavRoute.json",
        }
    }

    pub fn min_interval(self) -> Duration {
        match self {
            WatchedFile::Status => Duration::from_millis(500),
            WatchedFile::Market | WatchedFile::Cargo | WatchedFile::NavRoute => Duration::from_secs(1),
        }
    }
}

pub struct StatusWatcher {
    kind: WatchedFile,
    path: PathBuf,
    interval: Duration,
    last_poll: Option<Instant>,
    last_mtime: Option<SystemTime>,
    log_once: Arc<LogOnce>,
}

enum ParseOutcome {
    Parsed(Value),
    Transient,
    Broken(String),
}

fn parse_document(content: &str) -> ParseOutcome {
    if content.trim().is_empty() {
        return ParseOutcome::Transient;
    }
    match serde_json::from_str::<Value>(content) {
        Ok(value) => ParseOutcome::Parsed(value),
        Err(err) if err.is_eof() || (err.line() == 1 && err.column() <= 1) => ParseOutcome::Transient,
        Err(err) => ParseOutcome::Broken(err.to_string()),
    }
}

impl StatusWatcher {
    pub fn new(kind: WatchedFile, dir: &Path, log_once: Arc<LogOnce>) -> Self {
        Self {
            kind,
            path: dir.join(kind.file_name()),
            interval: kind.min_interval(),
            last_poll: None,
            last_mtime: None,
            log_once,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn kind(&self) -> WatchedFile {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn poll(&mut self) -> Option<Value> {
        self.poll_at(Instant::now())
    }

    /// Returns the freshly parsed document when the file changed since the last read.
    pub fn poll_at(&mut self, now: Instant) -> Option<Value> {
        if let Some(last) = self.last_poll {
            if now.saturating_duration_since(last) < self.interval {
                return None;
            }
        }
        self.last_poll = Some(now);

        let mtime = std::fs::metadata(&self.path).and_then(|m| m.modified()).ok()?;
        if self.last_mtime == Some(mtime) {
            return None;
        }

        let key = format!("watch:{}", self.kind.file_name());
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) => {
                self.log_once
                    .warn(&format!("{key}:read"), &format!("Could not read {}: {err}", self.path.display()));
                return None;
            }
        };

        match parse_document(&content) {
            ParseOutcome::Parsed(value) => {
                self.last_mtime = Some(mtime);
                self.log_once.reset(&format!("{key}:parse"));
                Some(value)
            }
            ParseOutcome::Transient => {
                debug!(file = %self.kind.file_name(), "File mid-rewrite; retrying next poll");
                None
            }
            ParseOutcome::Broken(message) => {
                self.last_mtime = Some(mtime);
                self.log_once.warn(
                    &format!("{key}:parse"),
                    &format!("{} is not valid JSON: {message}", self.kind.file_name()),
                );
                None
            }
        }
    }
}

/// One watcher per sidecar file in `dir`.
pub fn watchers_for(dir: &Path, log_once: &Arc<LogOnce>) -> Vec<StatusWatcher> {
    WatchedFile::ALL
        .iter()
        .map(|kind| StatusWatcher::new(*kind, dir, Arc::clone(log_once)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{File, FileTimes};
    use tempfile::TempDir;

    fn touch(path: &Path, content: &str, secs: u64) {
        std::fs::write(path, content).unwrap();
        let file = File::options().write(true).open(path).unwrap();
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs);
        file.set_times(FileTimes::new().set_modified(t)).unwrap();
    }

    #[test]
    fn test_unchanged_mtime_is_skipped() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("Status.json");
        touch(&path, r#"{"Flags": 16}"#, 1);
        let mut w = StatusWatcher::new(WatchedFile::Status, temp.path(), Arc::new(LogOnce::new()))
            .with_interval(Duration::ZERO);

        let t0 = Instant::now();
        assert_eq!(w.poll_at(t0).unwrap()["Flags"], 16);
        assert!(w.poll_at(t0).is_none());

        touch(&path, r#"{"Flags": 24}"#, 2);
        assert_eq!(w.poll_at(t0).unwrap()["Flags"], 24);
    }

    #[test]
    fn test_interval_respected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("Cargo.json");
        touch(&path, r#"{"Inventory": []}"#, 1);
        let mut w = StatusWatcher::new(WatchedFile::Cargo, temp.path(), Arc::new(LogOnce::new()));
        let t0 = Instant::now();
        assert!(w.poll_at(t0).is_some());
        touch(&path, r#"{"Inventory": [{"Name": "gold", "Count": 4}]}"#, 2);
        assert!(w.poll_at(t0 + Duration::from_millis(200)).is_none());
        assert!(w.poll_at(t0 + Duration::from_secs(1)).is_some());
    }

    #[test]
    fn test_empty_file_retried_until_complete() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("Market.json");
        touch(&path, "", 1);
        let log_once = Arc::new(LogOnce::new());
        let mut w = StatusWatcher::new(WatchedFile::Market, temp.path(), log_once.clone())
            .with_interval(Duration::ZERO);
        let t0 = Instant::now();

        assert!(w.poll_at(t0).is_none());
        // same mtime, now with content: still read because the transient was not recorded
        std::fs::write(&path, r#"{"Items": []}"#).unwrap();
        let file = File::options().write(true).open(&path).unwrap();
        file.set_times(FileTimes::new().set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_001)))
            .unwrap();
        assert!(w.poll_at(t0).is_some());
        // no parse warning was ever recorded for the transient
        assert!(log_once.warn("watch:Market.json:parse", "probe"));
    }

    #[test]
    fn test_broken_json_reported_once() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("NavRoute.json");
        touch(&path, r#"{"Route": [}"#, 1);
        let log_once = Arc::new(LogOnce::new());
        let mut w = StatusWatcher::new(WatchedFile::NavRoute, temp.path(), log_once.clone())
            .with_interval(Duration::ZERO);
        assert!(w.poll_at(Instant::now()).is_none());
        assert!(!log_once.warn("watch:NavRoute.json:parse", "probe"));
    }

    #[test]
    fn test_missing_file_is_quiet() {
        let temp = TempDir::new().unwrap();
        let mut ws = watchers_for(temp.path(), &Arc::new(LogOnce::new()));
        assert_eq!(ws.len(), 4);
        assert!(ws.iter_mut().all(|w| w.poll_at(Instant::now()).is_none()));
    }
}
