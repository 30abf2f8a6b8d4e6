//! Job-based HTTP planner client.
//!
//! ```text
//! route(payload)
//!   ├─ cache hit?            -> CACHE_HIT
//!   ├─ single-flight slot    (followers share the leader's outcome)
//!   │    ├─ cache hit?       -> CACHE_HIT (filled by an earlier leader)
//!   │    ├─ 1 s cross-mode cooldown
//!   │    ├─ POST /<mode>/route   -> {job}      (200 | 202)
//!   │    ├─ GET  /results/<job>  queued | running -> poll again, ok -> result
//!   │    └─ normalize, cache non-empty results before the slot is released
//!   └─ status CACHE_HIT | SUCCESS | EMPTY
//! ```

pub mod normalize;
pub mod payload;
pub mod suggest;
pub mod transport;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::cache::{make_cache_key, CacheStore, CacheTags, EXPLORATION_TTL, TRADE_TTL};
use crate::config::ConfigStore;
use crate::dedup::SingleFlight;
use crate::error::PlannerError;
use crate::notify::NotificationGate;

use normalize::{normalize, NormalizedRoute};
use payload::{PlannerMode, RoutePayload};
use suggest::SuggestClient;
use transport::{Headers, HttpReply, PlannerTransport};

pub const PROVIDER: &str = "spansh";
pub const USER_AGENT: &str = concat!("jumpdeck/", env!("CARGO_PKG_VERSION"));
pub const ROUTE_COOLDOWN_KEY: &str = "spansh_route";
const TELEMETRY_CAPACITY: usize = 50;

// ═══════════════════════════════════════════════════════════════════════════════
// Settings
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct PlannerSettings {
    /// Includes the `/api` prefix, no trailing slash.
    pub base_url: String,
    pub timeout: Duration,
    pub retries: u32,
    pub retry_backoff: Duration,
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub contact_email: String,
    pub form_urlencoded: bool,
    pub route_cooldown: Duration,
    pub suggest_debounce: Duration,
    pub suggest_fallback: bool,
    pub fallback_base_url: String,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            base_url: "https://spansh.co.uk/api".to_string(),
            timeout: Duration::from_secs(20),
            retries: 2,
            retry_backoff: Duration::from_millis(500),
            poll_interval: Duration::from_secs(2),
            max_polls: 60,
            contact_email: "jumpdeck@users.noreply.github.com".to_string(),
            form_urlencoded: true,
            route_cooldown: Duration::from_secs(1),
            suggest_debounce: Duration::from_millis(800),
            suggest_fallback: true,
            fallback_base_url: "https://www.edsm.net".to_string(),
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(if value.is_finite() { value.max(0.0) } else { 0.0 })
}

impl PlannerSettings {
    pub fn from_config(config: &ConfigStore) -> Self {
        let defaults = Self::default();
        Self {
            base_url: config
                .get_string("spansh_base_url", &defaults.base_url)
                .trim_end_matches('/')
                .to_string(),
            timeout: secs(config.get_f64("spansh_timeout", 20.0)).max(Duration::from_secs(1)),
            retries: config.get_u64("spansh_retries", 2).min(10) as u32,
            poll_interval: secs(config.get_f64("spansh_poll_interval", 2.0)),
            max_polls: config.get_u64("spansh_max_polls", 60).max(1) as u32,
            contact_email: config.get_string("spansh_contact_email", &defaults.contact_email),
            form_urlencoded: config.get_bool("features.spansh.form_urlencoded_enabled", true),
            suggest_debounce: secs(config.get_f64("suggest_debounce_seconds", 0.8))
                .max(Duration::from_millis(800)),
            suggest_fallback: config.get_bool("suggest_fallback_enabled", true),
            ..defaults
        }
    }

    pub fn headers(&self, referer: Option<&str>) -> Headers {
        let mut headers = vec![
            ("User-Agent".to_string(), USER_AGENT.to_string()),
            ("From".to_string(), self.contact_email.clone()),
            ("Accept".to_string(), "application/json".to_string()),
        ];
        if let Some(referer) = referer.filter(|r| !r.trim().is_empty()) {
            headers.push(("Referer".to_string(), referer.to_string()));
        }
        headers
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Request context & telemetry
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct RouteRequestContext {
    pub mode: PlannerMode,
    pub endpoint_path: &'static str,
    pub url: String,
    pub headers: Headers,
    pub payload: RoutePayload,
    pub cache_key: String,
    pub ttl: Duration,
    pub debug: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteStatus {
    CacheHit,
    Success,
    Empty,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryRecord {
    pub mode: PlannerMode,
    pub status: RouteStatus,
    pub elapsed_ms: u64,
    pub error_code: Option<&'static str>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RouteResponse {
    pub route: NormalizedRoute,
    pub status: RouteStatus,
    pub elapsed: Duration,
    pub cache_key: String,
}

/// What the single-flight leader hands to every waiter.
#[derive(Debug, Clone)]
struct Fetched {
    route: NormalizedRoute,
    from_cache: bool,
}

pub fn cache_ttl(mode: PlannerMode) -> Duration {
    match mode {
        PlannerMode::Trade => TRADE_TTL,
        _ => EXPLORATION_TTL,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Client
// ═══════════════════════════════════════════════════════════════════════════════

pub struct PlannerClient {
    transport: Arc<dyn PlannerTransport>,
    settings: PlannerSettings,
    cache: CacheStore,
    flight: SingleFlight<Fetched, PlannerError>,
    cooldown: NotificationGate,
    telemetry: Mutex<VecDeque<TelemetryRecord>>,
    suggest: SuggestClient,
}

impl PlannerClient {
    pub fn new(
        transport: Arc<dyn PlannerTransport>,
        settings: PlannerSettings,
        route_cache: CacheStore,
        suggest_cache: CacheStore,
    ) -> Self {
        let suggest = SuggestClient::new(Arc::clone(&transport), settings.clone(), suggest_cache);
        Self {
            transport,
            settings,
            cache: route_cache,
            flight: SingleFlight::new(),
            cooldown: NotificationGate::new(),
            telemetry: Mutex::new(VecDeque::with_capacity(TELEMETRY_CAPACITY)),
            suggest,
        }
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn request_context(&self, payload: &RoutePayload, referer: Option<&str>) -> RouteRequestContext {
        let url = format!("{}{}", self.settings.base_url, payload.endpoint_path);
        let params = payload.fields.to_json();
        let cache_key = make_cache_key(PROVIDER, payload.endpoint_path, &params);
        let referer = referer.unwrap_or_else(|| payload.mode.referer_page());
        RouteRequestContext {
            mode: payload.mode,
            endpoint_path: payload.endpoint_path,
            debug: json!({
                "url": url,
                "mode": payload.mode.as_str(),
                "form_urlencoded": self.settings.form_urlencoded,
                "fields": params,
                "cache_key": cache_key,
            }),
            url,
            headers: self.settings.headers(Some(referer)),
            payload: payload.clone(),
            cache_key,
            ttl: cache_ttl(payload.mode),
        }
    }

    /// Runs the full pipeline for one planner request.
    pub fn route(&self, payload: &RoutePayload, referer: Option<&str>) -> Result<RouteResponse, PlannerError> {
        let started = Instant::now();
        let ctx = self.request_context(payload, referer);

        if let Some(entry) = self.cache.get(&ctx.cache_key) {
            let route = normalize(ctx.mode, &entry.value, Utc::now());
            self.record(ctx.mode, RouteStatus::CacheHit, Duration::ZERO, None);
            info!(mode = ctx.mode.as_str(), "Planner cache hit");
            return Ok(RouteResponse {
                route,
                status: RouteStatus::CacheHit,
                elapsed: Duration::ZERO,
                cache_key: ctx.cache_key,
            });
        }

        let panicked = PlannerError::Protocol("planner request aborted".to_string());
        let (outcome, _role) = self.flight.run(&ctx.cache_key, panicked, || self.fetch_shared(&ctx));
        let elapsed = started.elapsed();

        match outcome {
            Ok(fetched) => {
                let status = if fetched.from_cache {
                    RouteStatus::CacheHit
                } else if fetched.route.is_empty() {
                    RouteStatus::Empty
                } else {
                    RouteStatus::Success
                };
                self.record(ctx.mode, status, elapsed, None);
                Ok(RouteResponse {
                    route: fetched.route,
                    status,
                    elapsed,
                    cache_key: ctx.cache_key,
                })
            }
            Err(err) => {
                warn!(mode = ctx.mode.as_str(), code = err.code(), error = %err, "Planner request failed");
                self.record(ctx.mode, RouteStatus::Error, elapsed, Some(err.code()));
                Err(err)
            }
        }
    }

    /// Leader side of the single-flight slot. The cache is written before the
    /// slot is released, and re-read first since an earlier leader may have
    /// filled it after this caller's lookup.
    fn fetch_shared(&self, ctx: &RouteRequestContext) -> Result<Fetched, PlannerError> {
        if let Some(entry) = self.cache.get(&ctx.cache_key) {
            debug!(mode = ctx.mode.as_str(), "Planner cache filled while waiting");
            return Ok(Fetched {
                route: normalize(ctx.mode, &entry.value, Utc::now()),
                from_cache: true,
            });
        }
        let result = self.fetch(ctx)?;
        let route = normalize(ctx.mode, &result, Utc::now());
        if !route.is_empty() {
            let tags = CacheTags {
                provider: PROVIDER.to_string(),
                endpoint: ctx.endpoint_path.to_string(),
                mode: ctx.mode.as_str().to_string(),
            };
            if let Err(err) = self.cache.set(&ctx.cache_key, &result, ctx.ttl, tags) {
                warn!(error = %err, "Failed to write planner cache entry");
            }
        }
        Ok(Fetched {
            route,
            from_cache: false,
        })
    }

    fn wait_for_cooldown(&self) {
        let cooldown = self.settings.route_cooldown;
        while !self.cooldown.can_send(ROUTE_COOLDOWN_KEY, cooldown, None) {
            let remaining = self.cooldown.remaining(ROUTE_COOLDOWN_KEY, cooldown, None);
            debug!(remaining_ms = remaining.as_millis() as u64, "Waiting for planner cooldown");
            thread::sleep(remaining.max(Duration::from_millis(10)));
        }
    }

    fn fetch(&self, ctx: &RouteRequestContext) -> Result<Value, PlannerError> {
        self.wait_for_cooldown();
        debug!(request = %ctx.debug, "Submitting planner job");
        match self.submit(ctx)? {
            Submitted::Job(job) => self.poll(&job, &ctx.headers),
            Submitted::Immediate(result) => Ok(result),
        }
    }

    fn submit(&self, ctx: &RouteRequestContext) -> Result<Submitted, PlannerError> {
        let mut last_err = PlannerError::Transport("no attempt made".to_string());
        for attempt in 0..=self.settings.retries {
            if attempt > 0 {
                thread::sleep(self.settings.retry_backoff);
            }
            let reply = if self.settings.form_urlencoded {
                self.transport
                    .post_form(&ctx.url, ctx.payload.fields.as_slice(), &ctx.headers)
            } else {
                self.transport
                    .post_json(&ctx.url, &ctx.payload.fields.to_json(), &ctx.headers)
            };
            match reply.and_then(|r| parse_submit(&r)) {
                Ok(submitted) => return Ok(submitted),
                Err(err) if err.is_client_error() => return Err(err),
                Err(err @ PlannerError::Protocol(_)) => return Err(err),
                Err(err) => {
                    debug!(attempt, error = %err, "Planner submit attempt failed");
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    fn poll(&self, job: &str, headers: &Headers) -> Result<Value, PlannerError> {
        let url = format!("{}/results/{}", self.settings.base_url, job);
        for polls in 1..=self.settings.max_polls {
            let reply = self.transport.get(&url, &[], headers)?;
            if !reply.is_success() {
                return Err(http_error(&reply));
            }
            let body = reply.json()?;
            let status = body
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or(if body.get("result").is_some() { "ok" } else { "" })
                .to_ascii_lowercase();
            match status.as_str() {
                "queued" | "running" => {
                    debug!(job = %job, polls, status = %status, "Planner job pending");
                    thread::sleep(self.settings.poll_interval);
                }
                "ok" => {
                    return body
                        .get("result")
                        .cloned()
                        .ok_or_else(|| PlannerError::Protocol("job finished without result".into()));
                }
                other => {
                    return Err(PlannerError::JobFailed {
                        status: if other.is_empty() { "missing".into() } else { other.to_string() },
                    })
                }
            }
        }
        Err(PlannerError::PollBudgetExhausted {
            polls: self.settings.max_polls,
        })
    }

    fn record(&self, mode: PlannerMode, status: RouteStatus, elapsed: Duration, error_code: Option<&'static str>) {
        let mut telemetry = match self.telemetry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if telemetry.len() == TELEMETRY_CAPACITY {
            telemetry.pop_front();
        }
        telemetry.push_back(TelemetryRecord {
            mode,
            status,
            elapsed_ms: elapsed.as_millis() as u64,
            error_code,
            at: Utc::now(),
        });
    }

    /// Most recent first.
    pub fn telemetry(&self) -> Vec<TelemetryRecord> {
        match self.telemetry.lock() {
            Ok(guard) => guard.iter().rev().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().rev().cloned().collect(),
        }
    }

    pub fn systems_suggest(&self, query: &str) -> Result<Vec<String>, PlannerError> {
        self.suggest.systems_suggest(query)
    }

    pub fn stations_for_system(&self, system: &str, query: &str) -> Result<Vec<String>, PlannerError> {
        self.suggest.stations_for_system(system, query)
    }
}

enum Submitted {
    Job(String),
    Immediate(Value),
}

fn http_error(reply: &HttpReply) -> PlannerError {
    PlannerError::HttpStatus {
        status: reply.status,
        body: reply.body.chars().take(200).collect(),
    }
}

fn parse_submit(reply: &HttpReply) -> Result<Submitted, PlannerError> {
    if reply.status != 200 && reply.status != 202 {
        return Err(http_error(reply));
    }
    let body = reply.json()?;
    if let Some(job) = body.get("job").and_then(Value::as_str).filter(|j| !j.is_empty()) {
        return Ok(Submitted::Job(job.to_string()));
    }
    let finished = body.get("status").and_then(Value::as_str) == Some("ok");
    match body.get("result") {
        Some(result) if finished => Ok(Submitted::Immediate(result.clone())),
        _ => Err(PlannerError::Protocol("response missing job id".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::payload::{build_neutron, PayloadContext, RouteRequest};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Scripted {
        submit: Mutex<Vec<HttpReply>>,
        polls: Mutex<Vec<HttpReply>>,
        posts: AtomicUsize,
        gets: AtomicUsize,
    }

    impl Scripted {
        fn new(submit: Vec<HttpReply>, polls: Vec<HttpReply>) -> Arc<Self> {
            Arc::new(Self {
                submit: Mutex::new(submit),
                polls: Mutex::new(polls),
                posts: AtomicUsize::new(0),
                gets: AtomicUsize::new(0),
            })
        }

        fn next(queue: &Mutex<Vec<HttpReply>>) -> HttpReply {
            let mut queue = queue.lock().unwrap();
            if queue.len() > 1 {
                queue.remove(0)
            } else {
                queue[0].clone()
            }
        }
    }

    impl PlannerTransport for Scripted {
        fn post_form(&self, _: &str, _: &[(String, String)], _: &Headers) -> Result<HttpReply, PlannerError> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            Ok(Self::next(&self.submit))
        }
        fn post_json(&self, url: &str, _: &Value, h: &Headers) -> Result<HttpReply, PlannerError> {
            self.post_form(url, &[], h)
        }
        fn get(&self, _: &str, _: &[(String, String)], _: &Headers) -> Result<HttpReply, PlannerError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            Ok(Self::next(&self.polls))
        }
    }

    fn client(transport: Arc<Scripted>) -> (TempDir, PlannerClient) {
        let temp = TempDir::new().unwrap();
        let settings = PlannerSettings {
            retry_backoff: Duration::ZERO,
            poll_interval: Duration::ZERO,
            route_cooldown: Duration::ZERO,
            max_polls: 3,
            ..PlannerSettings::default()
        };
        let c = PlannerClient::new(
            transport,
            settings,
            CacheStore::new(temp.path().join("route")),
            CacheStore::new(temp.path().join("suggest")),
        );
        (temp, c)
    }

    fn payload() -> RoutePayload {
        let req = RouteRequest {
            start: Some("Sol".into()),
            destination: Some("Colonia".into()),
            jump_range: Some(42.5),
            ..RouteRequest::default()
        };
        build_neutron(&req, &PayloadContext::default()).unwrap()
    }

    const OK_RESULT: &str =
        r#"{"status": "ok", "result": {"system_jumps": [{"system": "Sol"}, {"system": "Colonia"}]}}"#;

    #[test]
    fn test_job_polled_until_ok() {
        let transport = Scripted::new(
            vec![HttpReply::new(202, r#"{"job": "abc"}"#)],
            vec![HttpReply::new(200, r#"{"status": "queued"}"#), HttpReply::new(200, OK_RESULT)],
        );
        let (_t, c) = client(transport.clone());
        let response = c.route(&payload(), None).unwrap();
        assert_eq!(response.status, RouteStatus::Success);
        assert_eq!(response.route.systems, vec!["Sol", "Colonia"]);
        assert_eq!(transport.gets.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unknown_job_status_is_error() {
        let transport = Scripted::new(
            vec![HttpReply::new(200, r#"{"job": "abc"}"#)],
            vec![HttpReply::new(200, r#"{"status": "error", "error": "bad system"}"#)],
        );
        let (_t, c) = client(transport);
        let err = c.route(&payload(), None).unwrap_err();
        assert_eq!(err.code(), "SPANSH_JOB_FAILED");
        assert_eq!(c.telemetry()[0].status, RouteStatus::Error);
    }

    #[test]
    fn test_poll_budget_exhausted() {
        let transport = Scripted::new(
            vec![HttpReply::new(200, r#"{"job": "abc"}"#)],
            vec![HttpReply::new(200, r#"{"status": "running"}"#)],
        );
        let (_t, c) = client(transport.clone());
        let err = c.route(&payload(), None).unwrap_err();
        assert_eq!(err, PlannerError::PollBudgetExhausted { polls: 3 });
        assert_eq!(transport.gets.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_submit_retries_server_errors_but_not_client_errors() {
        let transport = Scripted::new(
            vec![HttpReply::new(503, "busy"), HttpReply::new(202, r#"{"job": "abc"}"#)],
            vec![HttpReply::new(200, OK_RESULT)],
        );
        let (_t, c) = client(transport.clone());
        assert!(c.route(&payload(), None).is_ok());
        assert_eq!(transport.posts.load(Ordering::SeqCst), 2);

        let transport = Scripted::new(vec![HttpReply::new(400, "bad")], vec![]);
        let (_t, c) = client(transport.clone());
        let err = c.route(&payload(), None).unwrap_err();
        assert_eq!(err.code(), "SPANSH_HTTP_ERROR");
        assert_eq!(transport.posts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_result_not_cached() {
        let transport = Scripted::new(
            vec![HttpReply::new(202, r#"{"job": "abc"}"#)],
            vec![HttpReply::new(200, r#"{"status": "ok", "result": {"system_jumps": []}}"#)],
        );
        let (_t, c) = client(transport.clone());
        assert_eq!(c.route(&payload(), None).unwrap().status, RouteStatus::Empty);
        assert_eq!(c.route(&payload(), None).unwrap().status, RouteStatus::Empty);
        assert_eq!(transport.posts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_leader_fills_cache_before_releasing_slot() {
        let transport = Scripted::new(
            vec![HttpReply::new(202, r#"{"job": "abc"}"#)],
            vec![HttpReply::new(200, OK_RESULT)],
        );
        let (_t, c) = client(transport.clone());
        let ctx = c.request_context(&payload(), None);

        let first = c.fetch_shared(&ctx).unwrap();
        assert!(!first.from_cache);
        assert!(c.cache().get(&ctx.cache_key).is_some());

        // A caller that missed the cache before the first leader stored it.
        let late = c.fetch_shared(&ctx).unwrap();
        assert!(late.from_cache);
        assert_eq!(late.route.systems, vec!["Sol", "Colonia"]);
        assert_eq!(transport.posts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_job_id_is_protocol_error() {
        let transport = Scripted::new(vec![HttpReply::new(200, r#"{"hello": 1}"#)], vec![]);
        let (_t, c) = client(transport);
        assert_eq!(c.route(&payload(), None).unwrap_err().code(), "SPANSH_BAD_RESPONSE");
    }

    #[test]
    fn test_headers_carry_agent_and_contact() {
        let headers = PlannerSettings::default().headers(Some("https://spansh.co.uk/plotter"));
        assert!(headers.iter().any(|(k, v)| k == "User-Agent" && v.starts_with("jumpdeck/")));
        assert!(headers.iter().any(|(k, _)| k == "From"));
        assert!(headers.iter().any(|(k, _)| k == "Referer"));
    }
}
