//! System and station autocomplete.
//!
//! Queries shorter than two characters return nothing. Identical queries are
//! debounced, answers cached for an hour, and a failed primary lookup falls
//! back to EDSM when enabled. Background lookups are stamped with a
//! per-field generation so a late answer for an old query discards itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::transport::{HttpReply, PlannerTransport};
use super::{PlannerSettings, PROVIDER};
use crate::cache::{make_cache_key, CacheStore, CacheTags, SUGGEST_TTL};
use crate::error::PlannerError;
use crate::notify::NotificationGate;

pub const MIN_QUERY_CHARS: usize = 2;
const MAX_SUGGESTIONS: usize = 20;

// ─────────────────────────────────────────────────────────────────────────────
// Generations
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct SuggestGenerations {
    current: Mutex<HashMap<String, u64>>,
}

impl SuggestGenerations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new lookup for `field`; earlier generations become stale.
    pub fn begin(&self, field: &str) -> u64 {
        let mut current = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = current.get(field).copied().unwrap_or(0) + 1;
        current.insert(field.to_string(), next);
        next
    }

    pub fn is_current(&self, field: &str, generation: u64) -> bool {
        let current = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        current.get(field).copied() == Some(generation)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

pub struct SuggestClient {
    transport: Arc<dyn PlannerTransport>,
    settings: PlannerSettings,
    cache: CacheStore,
    debounce: NotificationGate,
}

fn query_too_short(query: &str) -> bool {
    query.trim().chars().count() < MIN_QUERY_CHARS
}

/// Accepts `["Sol", ...]`, `{"values": [...]}`, `{"systems": [{"name": ...}]}` and similar.
fn extract_names(value: &Value) -> Vec<String> {
    let items = match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => ["values", "results", "systems", "stations", "result"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_array))
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        _ => &[],
    };
    let mut names: Vec<String> = Vec::new();
    for item in items {
        let name = match item {
            Value::String(s) => Some(s.trim()),
            Value::Object(obj) => obj
                .get("name")
                .or_else(|| obj.get("system"))
                .and_then(Value::as_str)
                .map(str::trim),
            _ => None,
        };
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                names.push(name.to_string());
            }
        }
        if names.len() >= MAX_SUGGESTIONS {
            break;
        }
    }
    names
}

impl SuggestClient {
    pub fn new(transport: Arc<dyn PlannerTransport>, settings: PlannerSettings, cache: CacheStore) -> Self {
        Self {
            transport,
            settings,
            cache,
            debounce: NotificationGate::new(),
        }
    }

    pub fn systems_suggest(&self, query: &str) -> Result<Vec<String>, PlannerError> {
        if query_too_short(query) {
            return Ok(Vec::new());
        }
        let q = query.trim();
        let primary = format!("{}/systems", self.settings.base_url);
        let fallback = format!("{}/api-v1/systems", self.settings.fallback_base_url);
        self.lookup(
            "systems",
            json!({ "q": q }),
            || self.get_with_retries(&primary, &[("q".into(), q.to_string())]),
            || self.get_with_retries(&fallback, &[("systemName".into(), q.to_string())]),
            |names| names,
        )
    }

    pub fn stations_for_system(&self, system: &str, query: &str) -> Result<Vec<String>, PlannerError> {
        let system = system.trim();
        if system.is_empty() {
            return Ok(Vec::new());
        }
        let q = query.trim().to_string();
        let primary = format!("{}/stations", self.settings.base_url);
        let fallback = format!("{}/api-system-v1/stations", self.settings.fallback_base_url);
        let needle = q.to_lowercase();
        self.lookup(
            "stations",
            json!({ "system": system, "q": q }),
            || {
                self.get_with_retries(
                    &primary,
                    &[("system".into(), system.to_string()), ("q".into(), q.clone())],
                )
            },
            || self.get_with_retries(&fallback, &[("systemName".into(), system.to_string())]),
            |names| {
                names
                    .into_iter()
                    .filter(|n| needle.is_empty() || n.to_lowercase().contains(&needle))
                    .collect()
            },
        )
    }

    fn lookup<P, F, M>(
        &self,
        endpoint: &str,
        params: Value,
        primary: P,
        fallback: F,
        refine: M,
    ) -> Result<Vec<String>, PlannerError>
    where
        P: FnOnce() -> Result<Value, PlannerError>,
        F: FnOnce() -> Result<Value, PlannerError>,
        M: Fn(Vec<String>) -> Vec<String>,
    {
        let key = make_cache_key(PROVIDER, &format!("/{endpoint}"), &params);
        if let Some(entry) = self.cache.get(&key) {
            return Ok(refine(extract_names(&entry.value)));
        }
        if !self
            .debounce
            .can_send(endpoint, self.settings.suggest_debounce, Some(&key))
        {
            debug!(endpoint = %endpoint, "Autocomplete debounced");
            return Ok(Vec::new());
        }

        let value = match primary() {
            Ok(value) => value,
            Err(err) if self.settings.suggest_fallback => {
                warn!(endpoint = %endpoint, error = %err, "Autocomplete failed; trying fallback provider");
                fallback()?
            }
            Err(err) => return Err(err),
        };
        let names = refine(extract_names(&value));
        if !names.is_empty() {
            let tags = CacheTags {
                provider: PROVIDER.to_string(),
                endpoint: format!("/{endpoint}"),
                mode: "suggest".to_string(),
            };
            if let Err(err) = self.cache.set(&key, &Value::from(names.clone()), SUGGEST_TTL, tags) {
                debug!(error = %err, "Autocomplete cache write failed");
            }
        }
        Ok(names)
    }

    fn get_with_retries(&self, url: &str, query: &[(String, String)]) -> Result<Value, PlannerError> {
        let headers = self.settings.headers(None);
        let mut last_err = PlannerError::Transport("no attempt made".to_string());
        for attempt in 0..=self.settings.retries {
            if attempt > 0 {
                thread::sleep(self.settings.retry_backoff);
            }
            let result = self
                .transport
                .get(url, query, &headers)
                .and_then(|reply| accept_reply(&reply));
            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_client_error() => return Err(err),
                Err(err) => {
                    debug!(url = %url, attempt, error = %err, "Autocomplete attempt failed");
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }
}

fn accept_reply(reply: &HttpReply) -> Result<Value, PlannerError> {
    if !reply.is_success() {
        return Err(PlannerError::HttpStatus {
            status: reply.status,
            body: reply.body.chars().take(200).collect(),
        });
    }
    reply.json()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::transport::Headers;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Scripted {
        primary_status: u16,
        calls: AtomicUsize,
        fallback_calls: AtomicUsize,
    }

    impl PlannerTransport for Scripted {
        fn post_form(&self, _: &str, _: &[(String, String)], _: &Headers) -> Result<HttpReply, PlannerError> {
            unreachable!()
        }
        fn post_json(&self, _: &str, _: &Value, _: &Headers) -> Result<HttpReply, PlannerError> {
            unreachable!()
        }
        fn get(&self, url: &str, _: &[(String, String)], _: &Headers) -> Result<HttpReply, PlannerError> {
            if url.contains("edsm") {
                self.fallback_calls.fetch_add(1, Ordering::SeqCst);
                return Ok(HttpReply::new(200, r#"[{"name": "Sol"}, {"name": "Solati"}]"#));
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HttpReply::new(self.primary_status, r#"{"values": ["Sol", "Sol", "Solitude"]}"#))
        }
    }

    fn client(status: u16, fallback: bool) -> (TempDir, Arc<Scripted>, SuggestClient) {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(Scripted {
            primary_status: status,
            calls: AtomicUsize::new(0),
            fallback_calls: AtomicUsize::new(0),
        });
        let settings = PlannerSettings {
            retries: 2,
            retry_backoff: Duration::ZERO,
            suggest_fallback: fallback,
            fallback_base_url: "https://www.edsm.net".into(),
            ..PlannerSettings::default()
        };
        let cache = CacheStore::new(temp.path().join("suggest"));
        let c = SuggestClient::new(transport.clone(), settings, cache);
        (temp, transport, c)
    }

    #[test]
    fn test_short_query_is_empty_without_http() {
        let (_t, transport, c) = client(200, true);
        assert!(c.systems_suggest(" S ").unwrap().is_empty());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_results_deduplicated_and_cached() {
        let (_t, transport, c) = client(200, true);
        assert_eq!(c.systems_suggest("Sol").unwrap(), vec!["Sol", "Solitude"]);
        assert_eq!(c.systems_suggest("Sol").unwrap(), vec!["Sol", "Solitude"]);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_server_error_retries_then_falls_back() {
        let (_t, transport, c) = client(503, true);
        assert_eq!(c.systems_suggest("Sol").unwrap(), vec!["Sol", "Solati"]);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(transport.fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_client_error_is_not_retried() {
        let (_t, transport, c) = client(404, false);
        let err = c.systems_suggest("Sol").unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_repeat_query_debounced_after_failure() {
        let (_t, transport, c) = client(404, false);
        assert!(c.systems_suggest("Sol").is_err());
        assert!(c.systems_suggest("Sol").unwrap().is_empty());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stations_filtered_by_query() {
        let (_t, _transport, c) = client(503, true);
        assert_eq!(c.stations_for_system("Sol", "ati").unwrap(), vec!["Solati"]);
    }

    #[test]
    fn test_generations_discard_stale() {
        let gens = SuggestGenerations::new();
        let first = gens.begin("systems");
        let second = gens.begin("systems");
        assert!(!gens.is_current("systems", first));
        assert!(gens.is_current("systems", second));
        assert_eq!(gens.begin("stations"), 1);
    }
}
