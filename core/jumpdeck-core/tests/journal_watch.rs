//! The engine's journal watch thread against a real directory.

mod common;

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{fsd_jump_line, location_line, neutron_result, rig, status_codes, write_file, ScriptedPlanner};
use jumpdeck_core::{NavError, PlannerMode, RouteRequest};
use serde_json::json;

fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    check()
}

#[test]
fn test_watch_bootstraps_then_follows_appended_lines() {
    let journal_dir = tempfile::TempDir::new().unwrap();
    let r = rig(
        ScriptedPlanner::new(json!([])),
        json!({"log_dir": journal_dir.path().to_string_lossy()}),
    );
    let journal = "Journal.2026-03-01T120000.01.log";
    write_file(
        journal_dir.path(),
        journal,
        &format!("{}\n{}\n", location_line("Achenar"), location_line("Sol")),
    );

    let stop = Arc::new(AtomicBool::new(false));
    let handle = r.engine.start_journal_watch(Arc::clone(&stop)).unwrap();

    let session = r.engine.session().clone();
    assert!(wait_for(Duration::from_secs(5), || {
        session.current_system().as_deref() == Some("Sol")
    }));
    assert!(!session.snapshot().has_live_system_event);

    // The tailer seeks to the end after bootstrap; keep appending until it catches one.
    let appended = wait_for(Duration::from_secs(10), || {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(journal_dir.path().join(journal))
            .unwrap();
        writeln!(file, "{}", fsd_jump_line("Lave")).unwrap();
        thread::sleep(Duration::from_millis(400));
        session.current_system().as_deref() == Some("Lave")
    });
    assert!(appended);
    assert!(session.snapshot().has_live_system_event);

    stop.store(true, Ordering::Relaxed);
    handle.join().unwrap();
}

#[test]
fn test_watch_on_missing_directory_reports_status() {
    let r = rig(
        ScriptedPlanner::new(json!([])),
        json!({"log_dir": "/definitely/not/a/journal/dir"}),
    );
    let err = r
        .engine
        .start_journal_watch(Arc::new(AtomicBool::new(false)))
        .unwrap_err();
    assert!(matches!(err, NavError::JournalDirNotFound(_)));
    assert!(status_codes(r.engine.bus()).contains(&"JOURNAL_DIR_MISSING".to_string()));
}

fn append_line(path: &std::path::Path, line: &[u8]) {
    let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(line).unwrap();
    file.write_all(b"\n").unwrap();
}

#[test]
fn test_watch_keeps_following_route_after_invalid_utf8_line() {
    let journal_dir = tempfile::TempDir::new().unwrap();
    let r = rig(
        ScriptedPlanner::new(neutron_result()),
        json!({
            "log_dir": journal_dir.path().to_string_lossy(),
            "planner_allow_manual_range_override": true
        }),
    );
    let journal = journal_dir.path().join("Journal.2026-03-01T120000.01.log");
    write_file(journal_dir.path(), "Journal.2026-03-01T120000.01.log", "{\"event\":\"Fileheader\"}\n");

    let request = RouteRequest {
        start: Some("Sol".into()),
        destination: Some("Colonia".into()),
        jump_range: Some(42.5),
        ..RouteRequest::default()
    };
    r.engine.plan_route_sync(PlannerMode::Neutron, request).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let handle = r.engine.start_journal_watch(Arc::clone(&stop)).unwrap();
    let session = r.engine.session().clone();
    let live = wait_for(Duration::from_secs(10), || {
        append_line(&journal, location_line("Sol").as_bytes());
        thread::sleep(Duration::from_millis(400));
        session.snapshot().has_live_system_event
    });
    assert!(live);
    assert_eq!(r.clipboard.last().as_deref(), Some("Lave"));

    append_line(&journal, b"{\"event\":\"Music\",\"MusicTrack\":\"\xff\xfe\"}");
    append_line(&journal, fsd_jump_line("Lave").as_bytes());

    let clipboard = r.clipboard.clone();
    assert!(wait_for(Duration::from_secs(5), || {
        clipboard.last().as_deref() == Some("Leesti")
    }));
    assert_eq!(session.current_system().as_deref(), Some("Lave"));

    stop.store(true, Ordering::Relaxed);
    handle.join().unwrap();
}

#[test]
fn test_watch_moves_to_newer_journal() {
    let journal_dir = tempfile::TempDir::new().unwrap();
    let r = rig(
        ScriptedPlanner::new(json!([])),
        json!({"log_dir": journal_dir.path().to_string_lossy()}),
    );
    write_file(
        journal_dir.path(),
        "Journal.2026-03-01T120000.01.log",
        &format!("{}\n", location_line("Sol")),
    );

    let stop = Arc::new(AtomicBool::new(false));
    let handle = r.engine.start_journal_watch(Arc::clone(&stop)).unwrap();
    let session = r.engine.session().clone();
    assert!(wait_for(Duration::from_secs(5), || {
        session.current_system().as_deref() == Some("Sol")
    }));

    // Game restart: a new journal opens with the arrival location.
    let newer = journal_dir.path().join("Journal.2026-03-01T180000.01.log");
    write_file(journal_dir.path(), "journal.partial", &format!("{}\n", location_line("Lave")));
    std::fs::rename(journal_dir.path().join("journal.partial"), &newer).unwrap();
    assert!(wait_for(Duration::from_secs(5), || {
        session.current_system().as_deref() == Some("Lave")
    }));
    assert!(!session.snapshot().has_live_system_event);

    let followed = wait_for(Duration::from_secs(10), || {
        append_line(&newer, fsd_jump_line("Leesti").as_bytes());
        thread::sleep(Duration::from_millis(400));
        session.current_system().as_deref() == Some("Leesti")
    });
    assert!(followed);
    assert!(session.snapshot().has_live_system_event);

    stop.store(true, Ordering::Relaxed);
    handle.join().unwrap();
}
