//! NavEngine - the process context for jumpdeck clients.
//!
//! Owns every shared aggregate (config, bus, notifier, session, route
//! manager, cursor, planner client, clipboard) and hands clones to the
//! background threads it starts. It is synchronous; the only threads are the
//! journal tailer, one route worker at a time and short autocomplete lookups.
//!
//! ```rust,ignore
//! use jumpdeck_core::{NavEngine, PlannerMode, RouteRequest};
//!
//! let engine = NavEngine::new()?;
//! let _tail = engine.start_journal_watch(stop.clone())?;
//! engine.plan_route(PlannerMode::Neutron, RouteRequest { destination: Some("Colonia".into()), ..Default::default() })?;
//! engine.bus().drain(|msg| ui.dispatch(msg));
//! ```

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::bus::{Message, MessageBus, StatusLevel};
use crate::cache::CacheStore;
use crate::config::ConfigStore;
use crate::error::{NavError, PlannerError, Result};
use crate::handler::EventHandler;
use crate::journal::JournalTailer;
use crate::jump_range::ModulesData;
use crate::notify::{Notifier, VoiceCategory, VoiceRequest};
use crate::planner::normalize::decorate_rows;
use crate::planner::payload::{
    build_payload, FeatureFlags, PayloadContext, PlannerMode, RangePolicy, RangeSource, RoutePayload,
    RouteRequest,
};
use crate::planner::suggest::SuggestGenerations;
use crate::planner::transport::{HttpTransport, PlannerTransport};
use crate::planner::{PlannerClient, PlannerSettings, RouteResponse, RouteStatus};
use crate::route::clipboard::{ClipboardSink, SystemClipboard};
use crate::route::cursor::{ActiveRoute, CursorState, RouteCursor, RouteInstall};
use crate::route::manager::RouteManager;
use crate::session::SessionHandle;
use crate::storage::StorageConfig;

const FALLBACK_NOTICE_WINDOW: Duration = Duration::from_secs(10);
const ROUTE_CACHE_NAMESPACE: &str = "spansh";
const SUGGEST_CACHE_NAMESPACE: &str = "spansh_suggest";

fn lock_cursor(cursor: &Mutex<RouteCursor>) -> MutexGuard<'_, RouteCursor> {
    match cursor.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct NavEngine {
    storage: Option<StorageConfig>,
    config: Arc<ConfigStore>,
    bus: MessageBus,
    notifier: Notifier,
    session: SessionHandle,
    manager: Arc<RouteManager>,
    cursor: Arc<Mutex<RouteCursor>>,
    planner: Arc<PlannerClient>,
    modules: Arc<ModulesData>,
    suggest_generations: Arc<SuggestGenerations>,
}

impl NavEngine {
    /// Engine over resolved per-user storage, the live HTTP transport and the system clipboard.
    pub fn new() -> Result<Self> {
        let storage = StorageConfig::resolve().ok_or(NavError::SettingsPathUnresolved)?;
        Self::with_storage(storage)
    }

    pub fn with_storage(storage: StorageConfig) -> Result<Self> {
        if let Err(err) = storage.ensure_dirs() {
            warn!(root = %storage.root().display(), error = %err, "Could not create storage directories");
        }
        let config = ConfigStore::load(&storage);
        let settings = PlannerSettings::from_config(&config);
        let transport = HttpTransport::new(settings.timeout)?;
        let mut engine = Self::with_parts(
            config,
            Arc::new(transport),
            Arc::new(SystemClipboard::new()),
            storage.cache_dir(ROUTE_CACHE_NAMESPACE),
            storage.cache_dir(SUGGEST_CACHE_NAMESPACE),
        );
        engine.storage = Some(storage);
        Ok(engine)
    }

    /// Engine over explicit collaborators; tests inject scripted transports and clipboards here.
    pub fn with_parts(
        config: ConfigStore,
        transport: Arc<dyn PlannerTransport>,
        clipboard: Arc<dyn ClipboardSink>,
        route_cache_dir: PathBuf,
        suggest_cache_dir: PathBuf,
    ) -> Self {
        let config = Arc::new(config);
        let bus = MessageBus::new();
        let notifier = Notifier::new(bus.clone(), Arc::clone(&config));
        let settings = PlannerSettings::from_config(&config);
        let planner = PlannerClient::new(
            transport,
            settings,
            CacheStore::new(route_cache_dir),
            CacheStore::new(suggest_cache_dir),
        );
        let removed = planner.cache().purge_expired();
        if removed > 0 {
            debug!(removed, "Purged expired planner cache entries");
        }
        Self {
            storage: None,
            modules: Arc::new(ModulesData::load_configured(&config)),
            config,
            bus,
            manager: Arc::new(RouteManager::new(notifier.clone())),
            cursor: Arc::new(Mutex::new(RouteCursor::new(notifier.clone(), clipboard))),
            notifier,
            session: SessionHandle::new(),
            planner: Arc::new(planner),
            suggest_generations: Arc::new(SuggestGenerations::new()),
        }
    }

    pub fn storage(&self) -> Option<&StorageConfig> {
        self.storage.as_ref()
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn manager(&self) -> &Arc<RouteManager> {
        &self.manager
    }

    pub fn planner(&self) -> &PlannerClient {
        &self.planner
    }

    pub fn save_settings(&self, partial: Map<String, Value>) -> Result<()> {
        self.config.save(partial)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Journal
    // ─────────────────────────────────────────────────────────────────────────────

    /// `log_dir` when configured, else the game's default location.
    pub fn journal_dir(&self) -> Option<PathBuf> {
        let configured = self.config.get_string("log_dir", "");
        if !configured.trim().is_empty() {
            return Some(PathBuf::from(configured.trim()));
        }
        StorageConfig::default_journal_dir()
    }

    /// A handler sharing this engine's session and cursor.
    pub fn event_handler(&self) -> EventHandler {
        EventHandler::new(
            self.session.clone(),
            self.notifier.clone(),
            Arc::clone(&self.cursor),
            Arc::clone(&self.modules),
        )
        .with_route_manager(Arc::clone(&self.manager))
    }

    /// Spawns the journal tailer; it runs until `stop` is set.
    pub fn start_journal_watch(&self, stop: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
        let dir = self
            .journal_dir()
            .ok_or_else(|| NavError::JournalDirNotFound(PathBuf::from("<unset>")))?;
        if !dir.is_dir() {
            self.notifier.status(
                StatusLevel::Error,
                "JOURNAL_DIR_MISSING",
                format!("Journal directory not found: {}", dir.display()),
                "journal",
            );
            return Err(NavError::JournalDirNotFound(dir));
        }
        let mut tailer = JournalTailer::new(dir, self.event_handler(), self.notifier.clone());
        thread::Builder::new()
            .name("journal-tailer".to_string())
            .spawn(move || tailer.run(&stop))
            .map_err(|e| NavError::io("spawn journal tailer", e))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Planning
    // ─────────────────────────────────────────────────────────────────────────────

    /// Session-derived payload inputs, read under a short lock.
    pub fn payload_context(&self) -> PayloadContext {
        let (current_system, ship_jump_range) = self
            .session
            .read(|s| (s.current_system.clone(), s.ship_state.jump_range_current_ly));
        PayloadContext {
            current_system,
            ship_jump_range,
            flags: FeatureFlags::from_config(&self.config),
            range_policy: RangePolicy::from_config(&self.config),
        }
    }

    /// Builds the payload for `mode`, reporting input errors and fallback ranges.
    pub fn prepare_payload(&self, mode: PlannerMode, request: &RouteRequest) -> std::result::Result<RoutePayload, PlannerError> {
        let ctx = self.payload_context();
        let payload = match build_payload(mode, request, &ctx) {
            Ok(payload) => payload,
            Err(err) => {
                report_planner_error(&self.notifier, mode, &err);
                return Err(err);
            }
        };
        if payload.range_source == Some(RangeSource::Fallback) {
            self.notifier.status_throttled(
                StatusLevel::Warn,
                "JR_NOT_READY_FALLBACK",
                format!(
                    "Ship jump range not ready; using fallback {:.1} ly",
                    ctx.range_policy.fallback_ly
                ),
                "planner",
                FALLBACK_NOTICE_WINDOW,
                Some(mode.as_str()),
            );
        }
        Ok(payload)
    }

    fn route_worker(&self) -> RouteWorker {
        RouteWorker {
            planner: Arc::clone(&self.planner),
            notifier: self.notifier.clone(),
            cursor: Arc::clone(&self.cursor),
            manager: Arc::clone(&self.manager),
            session: self.session.clone(),
        }
    }

    fn spawn_route(
        &self,
        mode: PlannerMode,
        payload: RoutePayload,
        reply: Option<crossbeam_channel::Sender<std::result::Result<RouteResponse, PlannerError>>>,
    ) -> Result<JoinHandle<()>> {
        let worker = self.route_worker();
        self.manager
            .start_route_thread(mode.as_str(), mode.as_str(), move || {
                let outcome = worker.execute(mode, &payload);
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            })
    }

    /// Starts a background route computation. Results arrive on the bus.
    pub fn plan_route(&self, mode: PlannerMode, request: RouteRequest) -> Result<JoinHandle<()>> {
        let payload = self.prepare_payload(mode, &request)?;
        self.spawn_route(mode, payload, None)
    }

    /// Runs a route computation on the worker thread and waits for it.
    pub fn plan_route_sync(&self, mode: PlannerMode, request: RouteRequest) -> Result<RouteResponse> {
        let payload = self.prepare_payload(mode, &request)?;
        let (tx, rx) = crossbeam_channel::bounded(1);
        let handle = self.spawn_route(mode, payload, Some(tx))?;
        if handle.join().is_err() {
            warn!(mode = mode.as_str(), "Route worker panicked");
        }
        match rx.recv() {
            Ok(outcome) => outcome.map_err(NavError::from),
            Err(_) => Err(NavError::Planner(PlannerError::Protocol(
                "route worker ended without a result".to_string(),
            ))),
        }
    }

    /// Route jobs run to completion; this is recorded only.
    pub fn cancel_route(&self) {
        self.manager.cancel_route();
    }

    pub fn clear_route(&self) {
        lock_cursor(&self.cursor).clear();
        self.manager.clear_route();
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Cursor
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn manual_advance(&self) -> Option<String> {
        let mut cursor = lock_cursor(&self.cursor);
        let skipped = cursor.next_system().map(str::to_string);
        let before = cursor.route().map(|r| r.index);
        let next = cursor.manual_advance();
        let moved = cursor.route().map(|r| r.index) != before;
        drop(cursor);
        if let (Some(skipped), true) = (&skipped, moved) {
            self.manager.advance_route(skipped);
        }
        next
    }

    pub fn cursor_state(&self) -> CursorState {
        lock_cursor(&self.cursor).state()
    }

    pub fn next_system(&self) -> Option<String> {
        lock_cursor(&self.cursor).next_system().map(str::to_string)
    }

    pub fn active_route(&self) -> Option<ActiveRoute> {
        lock_cursor(&self.cursor).route().cloned()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Autocomplete
    // ─────────────────────────────────────────────────────────────────────────────

    /// Looks up systems in the background; stale answers are dropped.
    pub fn suggest_systems(&self, query: &str) -> Result<JoinHandle<()>> {
        let planner = Arc::clone(&self.planner);
        let query = query.to_string();
        self.spawn_suggest("systems", move || planner.systems_suggest(&query))
    }

    pub fn suggest_stations(&self, system: &str, query: &str) -> Result<JoinHandle<()>> {
        let planner = Arc::clone(&self.planner);
        let system = system.to_string();
        let query = query.to_string();
        self.spawn_suggest("stations", move || planner.stations_for_system(&system, &query))
    }

    fn spawn_suggest<F>(&self, field: &'static str, lookup: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce() -> std::result::Result<Vec<String>, PlannerError> + Send + 'static,
    {
        let generation = self.suggest_generations.begin(field);
        let generations = Arc::clone(&self.suggest_generations);
        let bus = self.bus.clone();
        thread::Builder::new()
            .name(format!("suggest-{field}"))
            .spawn(move || {
                let items = match lookup() {
                    Ok(items) => items,
                    Err(err) => {
                        debug!(field, error = %err, "Autocomplete lookup failed");
                        Vec::new()
                    }
                };
                if !generations.is_current(field, generation) {
                    debug!(field, generation, "Discarding stale autocomplete answer");
                    return;
                }
                bus.send(Message::Suggestions {
                    field: field.to_string(),
                    generation,
                    items,
                });
            })
            .map_err(|e| NavError::io("spawn autocomplete", e))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Route worker
// ═══════════════════════════════════════════════════════════════════════════════

fn report_planner_error(notifier: &Notifier, mode: PlannerMode, err: &PlannerError) {
    let level = match err {
        PlannerError::Input { .. } => StatusLevel::Warn,
        _ => StatusLevel::Error,
    };
    notifier.status(level, err.code(), err.to_string(), "planner");
    notifier.bus().send(Message::Status {
        target: mode.as_str().to_string(),
        text: err.to_string(),
        color: "error".to_string(),
    });
    if matches!(err, PlannerError::Timeout(_) | PlannerError::PollBudgetExhausted { .. }) {
        notifier.speak(VoiceRequest::new(
            "MSG.ROUTE_FAILED",
            "Route computation timed out",
            VoiceCategory::Route,
        ));
    }
}

struct RouteWorker {
    planner: Arc<PlannerClient>,
    notifier: Notifier,
    cursor: Arc<Mutex<RouteCursor>>,
    manager: Arc<RouteManager>,
    session: SessionHandle,
}

impl RouteWorker {
    fn execute(&self, mode: PlannerMode, payload: &RoutePayload) -> std::result::Result<RouteResponse, PlannerError> {
        let target = mode.as_str().to_string();
        let bus = self.notifier.bus();
        let response = match self.planner.route(payload, None) {
            Ok(response) => response,
            Err(err) => {
                bus.send(Message::List {
                    target: target.clone(),
                    rows: Vec::new(),
                });
                report_planner_error(&self.notifier, mode, &err);
                return Err(err);
            }
        };

        let route = &response.route;
        if route.is_empty() {
            bus.send(Message::List {
                target: target.clone(),
                rows: Vec::new(),
            });
            bus.send(Message::Status {
                target,
                text: "No results".to_string(),
                color: "warn".to_string(),
            });
            self.notifier
                .status(StatusLevel::Warn, "ROUTE_EMPTY", "Planner returned no results", "planner");
            return Ok(response);
        }

        let current = self.session.current_system();
        let copied = {
            let mut cursor = lock_cursor(&self.cursor);
            cursor.install(
                RouteInstall {
                    systems: route.systems.clone(),
                    via: route.via.clone(),
                    source: target.clone(),
                    total_jumps: route.total_jumps,
                    total_distance_ly: route.total_distance_ly,
                    link: None,
                },
                current.as_deref(),
            );
            cursor.route().and_then(|r| r.last_copied_system.clone())
        };
        self.manager.set_route(route.systems.clone(), &target);

        bus.send(Message::List {
            target: target.clone(),
            rows: decorate_rows(&route.rows, copied.as_deref()),
        });
        let (code, text) = match response.status {
            RouteStatus::CacheHit => ("CACHE_HIT", format!("{} results (cached)", route.rows.len())),
            _ => (
                "ROUTE_READY",
                format!("{} results in {:.1}s", route.rows.len(), response.elapsed.as_secs_f64()),
            ),
        };
        bus.send(Message::Status {
            target,
            text: text.clone(),
            color: "ok".to_string(),
        });
        self.notifier.status(StatusLevel::Ok, code, text, "planner");
        info!(mode = mode.as_str(), rows = route.rows.len(), status = ?response.status, "Route ready");
        Ok(response)
    }
}
