//! Shared fixtures: a scripted planner host and an engine wired to it.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use jumpdeck_core::planner::transport::{Headers, HttpReply, PlannerTransport};
use jumpdeck_core::{ConfigStore, MemoryClipboard, Message, MessageBus, NavEngine, PlannerError};
use serde_json::{json, Value};
use tempfile::TempDir;

/// Answers every submit with a job id and every results poll with `result`.
pub struct ScriptedPlanner {
    result: Value,
    poll_delay: Duration,
    pub posts: Mutex<Vec<(String, Vec<(String, String)>)>>,
    pub polls: AtomicUsize,
}

impl ScriptedPlanner {
    pub fn new(result: Value) -> Self {
        Self {
            result,
            poll_delay: Duration::ZERO,
            posts: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn last_post(&self) -> Option<(String, Vec<(String, String)>)> {
        self.posts.lock().unwrap().last().cloned()
    }
}

impl PlannerTransport for ScriptedPlanner {
    fn post_form(
        &self,
        url: &str,
        fields: &[(String, String)],
        _headers: &Headers,
    ) -> Result<HttpReply, PlannerError> {
        self.posts
            .lock()
            .unwrap()
            .push((url.to_string(), fields.to_vec()));
        Ok(HttpReply::new(202, r#"{"job": "job-1", "status": "queued"}"#))
    }

    fn post_json(&self, url: &str, _body: &Value, _headers: &Headers) -> Result<HttpReply, PlannerError> {
        self.posts.lock().unwrap().push((url.to_string(), Vec::new()));
        Ok(HttpReply::new(202, r#"{"job": "job-1"}"#))
    }

    fn get(
        &self,
        url: &str,
        _query: &[(String, String)],
        _headers: &Headers,
    ) -> Result<HttpReply, PlannerError> {
        if url.contains("/results/") {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if !self.poll_delay.is_zero() {
                thread::sleep(self.poll_delay);
            }
            let body = json!({"status": "ok", "result": self.result});
            return Ok(HttpReply::new(200, body.to_string()));
        }
        Ok(HttpReply::new(200, "[]"))
    }
}

/// A neutron plan from Sol to Colonia through Lave and Leesti.
pub fn neutron_result() -> Value {
    json!({
        "total_jumps": 9,
        "distance": 22000.4,
        "via": [],
        "system_jumps": [
            {"system": "Sol", "distance_jumped": 0.0, "distance_left": 22000.4, "jumps": 0, "neutron_star": false},
            {"system": "Lave", "distance_jumped": 108.5, "distance_left": 21891.9, "jumps": 3, "neutron_star": true},
            {"system": "Leesti", "distance_jumped": 4200.0, "distance_left": 17691.9, "jumps": 3, "neutron_star": true},
            {"system": "Colonia", "distance_jumped": 17691.9, "distance_left": 0.0, "jumps": 3, "neutron_star": false}
        ]
    })
}

pub fn fast_config(overrides: Value) -> ConfigStore {
    let mut base = json!({
        "spansh_poll_interval": 0.0,
        "spansh_retries": 0,
        "voice_enabled": false
    });
    if let (Value::Object(base_map), Value::Object(extra)) = (&mut base, overrides) {
        base_map.extend(extra);
    }
    ConfigStore::in_memory_with(base)
}

pub struct Rig {
    pub temp: TempDir,
    pub planner: Arc<ScriptedPlanner>,
    pub clipboard: Arc<MemoryClipboard>,
    pub engine: NavEngine,
}

pub fn rig(planner: ScriptedPlanner, config: Value) -> Rig {
    let temp = TempDir::new().unwrap();
    let planner = Arc::new(planner);
    let clipboard = Arc::new(MemoryClipboard::new());
    let engine = NavEngine::with_parts(
        fast_config(config),
        planner.clone(),
        clipboard.clone(),
        temp.path().join("cache").join("spansh"),
        temp.path().join("cache").join("spansh_suggest"),
    );
    Rig {
        temp,
        planner,
        clipboard,
        engine,
    }
}

pub fn status_codes(bus: &MessageBus) -> Vec<String> {
    bus.take_all()
        .into_iter()
        .filter_map(|m| match m {
            Message::StatusEvent(event) => Some(event.code),
            _ => None,
        })
        .collect()
}

pub fn location_line(system: &str) -> String {
    json!({
        "timestamp": "2026-03-01T12:00:00Z",
        "event": "Location",
        "StarSystem": system,
        "Docked": false
    })
    .to_string()
}

pub fn fsd_jump_line(system: &str) -> String {
    json!({
        "timestamp": "2026-03-01T12:05:00Z",
        "event": "FSDJump",
        "StarSystem": system,
        "JumpDist": 12.5,
        "FuelLevel": 28.0
    })
    .to_string()
}

pub fn write_file(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).unwrap();
}
