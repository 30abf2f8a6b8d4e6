//! Journal tailer.
//!
//! Finds the newest `Journal.*.log`, replays the latest loadout and location
//! from its tail, then follows appended lines. Sidecar files are polled from
//! the same loop while idle, so journal lines are never reordered. A newer
//! journal file ends the current tail and the loop restarts on it.

pub mod watchers;

use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use fs_err as fs;
use serde_json::Value;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::bus::StatusLevel;
use crate::error::{NavError, Result};
use crate::log_once::LogOnce;
use crate::notify::Notifier;
use watchers::{watchers_for, StatusWatcher, WatchedFile};

pub const BOOTSTRAP_LINES: usize = 2000;
pub const IDLE_SLEEP: Duration = Duration::from_millis(300);
pub const MISSING_JOURNAL_SLEEP: Duration = Duration::from_secs(2);

const LOCATION_EVENTS: [&str; 3] = ["Location", "FSDJump", "CarrierJump"];

/// Receiver of everything the tailer reads.
pub trait JournalSink {
    fn on_line(&mut self, line: &str);
    fn on_sidecar(&mut self, kind: WatchedFile, document: Value);
    fn set_bootstrap(&mut self, active: bool);
}

fn is_journal_name(name: &str) -> bool {
    name.starts_with("Journal.") && name.ends_with(".log")
}

/// Newest `Journal.*.log` in `dir` by modification time.
pub fn find_latest_journal(dir: &Path) -> Option<PathBuf> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() || !is_journal_name(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) else {
            continue;
        };
        let replace = match &newest {
            Some((best, best_path)) => {
                modified > *best || (modified == *best && entry.path() > best_path.as_path())
            }
            None => true,
        };
        if replace {
            newest = Some((modified, entry.into_path()));
        }
    }
    newest.map(|(_, path)| path)
}

/// The last `n` non-empty lines of `path`.
pub fn read_last_lines(path: &Path, n: usize) -> Result<Vec<String>> {
    let content = fs::read(path).map_err(|e| NavError::io("read journal", e))?;
    let text = String::from_utf8_lossy(&content);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let skip = lines.len().saturating_sub(n);
    Ok(lines[skip..].iter().map(|l| l.to_string()).collect())
}

fn event_name(line: &str) -> Option<String> {
    let value: Value = serde_json::from_str(line).ok()?;
    value.get("event")?.as_str().map(str::to_string)
}

enum TailExit {
    Stopped,
    Rotated(PathBuf),
}

pub struct JournalTailer<S: JournalSink> {
    dir: PathBuf,
    sink: S,
    notifier: Notifier,
    log_once: Arc<LogOnce>,
    watchers: Vec<StatusWatcher>,
    bootstrap_lines: usize,
    idle_sleep: Duration,
    missing_sleep: Duration,
}

impl<S: JournalSink> JournalTailer<S> {
    pub fn new(dir: PathBuf, sink: S, notifier: Notifier) -> Self {
        let log_once = Arc::new(LogOnce::new());
        let watchers = watchers_for(&dir, &log_once);
        Self {
            dir,
            sink,
            notifier,
            log_once,
            watchers,
            bootstrap_lines: BOOTSTRAP_LINES,
            idle_sleep: IDLE_SLEEP,
            missing_sleep: MISSING_JOURNAL_SLEEP,
        }
    }

    pub fn with_sleeps(mut self, idle: Duration, missing: Duration) -> Self {
        self.idle_sleep = idle;
        self.missing_sleep = missing;
        self
    }

    pub fn with_watchers(mut self, watchers: Vec<StatusWatcher>) -> Self {
        self.watchers = watchers;
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Replays the latest `Loadout`, then the latest location event, with the bootstrap flag set.
    pub fn bootstrap(&mut self, path: &Path) -> Result<()> {
        let lines = read_last_lines(path, self.bootstrap_lines)?;
        let named: Vec<(Option<String>, &String)> =
            lines.iter().map(|l| (event_name(l), l)).collect();

        self.sink.set_bootstrap(true);
        if let Some((_, line)) = named
            .iter()
            .rev()
            .find(|(event, _)| event.as_deref() == Some("Loadout"))
        {
            self.sink.on_line(line);
        }
        if let Some((_, line)) = named
            .iter()
            .rev()
            .find(|(event, _)| event.as_deref().is_some_and(|e| LOCATION_EVENTS.contains(&e)))
        {
            self.sink.on_line(line);
        }
        self.sink.set_bootstrap(false);
        info!(path = %path.display(), lines = lines.len(), "Journal bootstrap complete");
        Ok(())
    }

    /// Runs until `stop` is set.
    pub fn run(&mut self, stop: &AtomicBool) {
        info!(dir = %self.dir.display(), "Journal watch started");
        let mut current = None;
        while !stop.load(Ordering::Relaxed) {
            let path = match current.take().or_else(|| find_latest_journal(&self.dir)) {
                Some(path) => path,
                None => {
                    self.notifier.status_throttled(
                        StatusLevel::Info,
                        "JOURNAL_WAITING",
                        format!("Waiting for journal in {}", self.dir.display()),
                        "journal",
                        Duration::from_secs(60),
                        None,
                    );
                    self.log_once.warn("journal:missing", "No journal found; waiting");
                    self.poll_watchers();
                    thread::sleep(self.missing_sleep);
                    continue;
                }
            };
            self.log_once.reset("journal:missing");

            if let Err(err) = self.bootstrap(&path) {
                self.log_once.warn("journal:bootstrap", &format!("Journal bootstrap failed: {err}"));
            }
            match self.tail(&path, stop) {
                Ok(TailExit::Stopped) => break,
                Ok(TailExit::Rotated(next)) => {
                    info!(from = %path.display(), to = %next.display(), "Newer journal detected");
                    current = Some(next);
                }
                Err(err) => {
                    self.log_once.warn("journal:tail", &format!("Journal tail failed: {err}"));
                    thread::sleep(self.missing_sleep);
                }
            }
        }
        info!("Journal watch stopped");
    }

    fn tail(&mut self, path: &Path, stop: &AtomicBool) -> Result<TailExit> {
        let mut file = fs::File::open(path).map_err(|e| NavError::io("open journal", e))?;
        file.seek(SeekFrom::End(0))
            .map_err(|e| NavError::io("seek journal", e))?;
        let mut reader = BufReader::new(file);
        // Bytes; a non-UTF-8 line is decoded lossily.
        let mut pending: Vec<u8> = Vec::new();

        loop {
            if stop.load(Ordering::Relaxed) {
                return Ok(TailExit::Stopped);
            }
            let read = reader
                .read_until(b'\n', &mut pending)
                .map_err(|e| NavError::io("read journal", e))?;
            if read > 0 {
                if pending.ends_with(b"\n") {
                    let decoded = String::from_utf8_lossy(&pending);
                    let line = decoded.trim();
                    if !line.is_empty() {
                        self.sink.on_line(line);
                    }
                    pending.clear();
                }
                continue;
            }

            self.poll_watchers();
            if let Some(latest) = find_latest_journal(&self.dir) {
                if latest != path {
                    return Ok(TailExit::Rotated(latest));
                }
            }
            thread::sleep(self.idle_sleep);
        }
    }

    fn poll_watchers(&mut self) {
        for watcher in &mut self.watchers {
            if let Some(document) = watcher.poll() {
                debug!(file = %watcher.kind().file_name(), "Sidecar file changed");
                self.sink.on_sidecar(watcher.kind(), document);
            }
        }
    }
}
