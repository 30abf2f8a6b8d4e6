//! Journal event dispatch.
//!
//! Every journal line and sidecar document lands here. Lines are decoded into
//! [`JournalEvent`]; unknown events fall into [`JournalEvent::Other`] and are
//! ignored. Malformed lines are logged once and dropped. Nothing here returns
//! an error to the tailer.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::bus::{Message, StatusLevel};
use crate::config::NextHopTrigger;
use crate::journal::watchers::WatchedFile;
use crate::journal::JournalSink;
use crate::jump_range::{self, parse_booster_item, parse_fsd_item, JumpRangeOptions, ModulesData};
use crate::log_once::LogOnce;
use crate::notify::{Notifier, VoiceCategory, VoiceRequest};
use crate::route::cursor::{Arrival, RouteCursor};
use crate::route::manager::RouteManager;
use crate::session::{EngineeringModifier, FsdBooster, FsdInfo, NavRoute, SessionHandle, ShipState};

const SOURCE: &str = "journal";
/// Status.json `Flags` bit set while the hyperspace jump is in progress.
pub const FLAG_FSD_JUMP: u64 = 1 << 30;

// ═══════════════════════════════════════════════════════════════════════════════
// Events
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event")]
pub enum JournalEvent {
    Location(SystemArrival),
    #[serde(rename = "FSDJump")]
    FsdJump(SystemArrival),
    CarrierJump(SystemArrival),
    StartJump(StartJump),
    Loadout(Loadout),
    Docked(Docked),
    Undocked(Undocked),
    Scan(Scan),
    #[serde(rename = "FSSDiscoveryScan")]
    FssDiscoveryScan(FssDiscoveryScan),
    #[serde(rename = "FSSAllBodiesFound")]
    FssAllBodiesFound(FssAllBodiesFound),
    #[serde(rename = "SAASignalsFound")]
    SaaSignalsFound(SaaSignalsFound),
    Footfall(Footfall),
    Cargo(Cargo),
    Market(Market),
    ApproachSettlement(ApproachSettlement),
    DockingRequested(DockingRequested),
    NavRoute(NavRouteEvent),
    NavRouteClear,
    FuelScoop(FuelScoop),
    RefuelAll(Refuel),
    RefuelPartial(Refuel),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SystemArrival {
    pub star_system: String,
    #[serde(default)]
    pub docked: bool,
    pub station_name: Option<String>,
    pub fuel_level: Option<f64>,
    pub jump_dist: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartJump {
    pub jump_type: String,
    pub star_system: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FuelCapacity {
    pub main: Option<f64>,
    pub reserve: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModuleModifier {
    pub label: String,
    pub value: f64,
    pub original_value: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModuleEngineering {
    pub experimental_effect: Option<String>,
    #[serde(default)]
    pub modifiers: Vec<ModuleModifier>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoadoutModule {
    pub slot: String,
    pub item: String,
    pub engineering: Option<ModuleEngineering>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Loadout {
    pub ship: String,
    #[serde(rename = "ShipID")]
    pub ship_id: Option<u64>,
    pub unladen_mass: Option<f64>,
    pub cargo_capacity: Option<f64>,
    pub fuel_capacity: Option<FuelCapacity>,
    #[serde(default)]
    pub modules: Vec<LoadoutModule>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Docked {
    pub station_name: String,
    pub star_system: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Undocked {
    pub station_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Scan {
    pub body_name: String,
    pub planet_class: Option<String>,
    pub star_type: Option<String>,
    pub terraform_state: Option<String>,
    #[serde(rename = "DistanceFromArrivalLS")]
    pub distance_from_arrival_ls: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FssDiscoveryScan {
    #[serde(default)]
    pub body_count: u32,
    pub system_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FssAllBodiesFound {
    pub system_name: String,
    #[serde(default)]
    pub count: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SaaSignal {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(default)]
    pub count: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SaaSignalsFound {
    pub body_name: String,
    #[serde(default)]
    pub signals: Vec<SaaSignal>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Footfall {
    #[serde(alias = "BodyName")]
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CargoItem {
    pub name: String,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub stolen: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Cargo {
    pub vessel: Option<String>,
    pub inventory: Option<Vec<CargoItem>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MarketItem {
    pub name: String,
    #[serde(default)]
    pub buy_price: u64,
    #[serde(default)]
    pub sell_price: u64,
    #[serde(default)]
    pub stock: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Market {
    #[serde(rename = "MarketID")]
    pub market_id: Option<u64>,
    pub station_name: Option<String>,
    pub star_system: Option<String>,
    pub items: Option<Vec<MarketItem>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApproachSettlement {
    pub name: String,
    #[serde(rename = "MarketID")]
    pub market_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DockingRequested {
    pub station_name: String,
    #[serde(rename = "MarketID")]
    pub market_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NavRouteStop {
    pub star_system: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NavRouteEvent {
    pub route: Option<Vec<NavRouteStop>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FuelScoop {
    pub total: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Refuel {
    #[serde(default)]
    pub amount: f64,
}

/// `$tritium_name;` -> `tritium`.
pub fn normalize_commodity(name: &str) -> String {
    let name = name.trim().to_ascii_lowercase();
    let name = name.strip_prefix('$').unwrap_or(&name);
    name.strip_suffix("_name;").unwrap_or(name).to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct JackpotRule {
    commodity: String,
    max_buy: Option<u64>,
    min_sell: Option<u64>,
}

impl JackpotRule {
    fn matches(&self, item: &MarketItem) -> bool {
        let buy_hit = self
            .max_buy
            .is_some_and(|max| item.buy_price > 0 && item.stock > 0 && item.buy_price <= max);
        let sell_hit = self.min_sell.is_some_and(|min| item.sell_price >= min);
        buy_hit || sell_hit
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handler
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct ExplorationMemory {
    high_value_bodies: HashSet<String>,
    honked_systems: HashSet<String>,
    all_found_systems: HashSet<String>,
    bio_bodies: HashSet<String>,
    footfalls: HashSet<String>,
}

pub struct EventHandler {
    session: SessionHandle,
    notifier: Notifier,
    cursor: Arc<Mutex<RouteCursor>>,
    manager: Option<Arc<RouteManager>>,
    modules: Arc<ModulesData>,
    log_once: LogOnce,
    bootstrap: bool,
    explored: ExplorationMemory,
    warned_markets: HashSet<String>,
    smuggler_warned: HashSet<String>,
    fuel_alert_armed: bool,
}

impl EventHandler {
    pub fn new(
        session: SessionHandle,
        notifier: Notifier,
        cursor: Arc<Mutex<RouteCursor>>,
        modules: Arc<ModulesData>,
    ) -> Self {
        Self {
            session,
            notifier,
            cursor,
            manager: None,
            modules,
            log_once: LogOnce::new(),
            bootstrap: false,
            explored: ExplorationMemory::default(),
            warned_markets: HashSet::new(),
            smuggler_warned: HashSet::new(),
            fuel_alert_armed: true,
        }
    }

    /// On-route arrivals also move the manager's next hop.
    pub fn with_route_manager(mut self, manager: Arc<RouteManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    fn cursor(&self) -> MutexGuard<'_, RouteCursor> {
        match self.cursor.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Decodes and dispatches one journal line.
    pub fn handle_line(&mut self, line: &str) {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(err) => {
                self.log_once
                    .warn("handler:bad_line", &format!("Skipping unreadable journal line: {err}"));
                return;
            }
        };
        self.handle_value(value);
    }

    fn handle_value(&mut self, value: Value) {
        let name = value
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        match serde_json::from_value::<JournalEvent>(value) {
            Ok(event) => self.handle_event(event),
            Err(err) => {
                self.log_once.warn(
                    &format!("handler:decode:{name}"),
                    &format!("Could not decode {name} event: {err}"),
                );
            }
        }
    }

    pub fn handle_event(&mut self, event: JournalEvent) {
        match event {
            JournalEvent::Location(ev) => self.on_arrival(ev, false, NextHopTrigger::Location),
            JournalEvent::CarrierJump(ev) => self.on_arrival(ev, false, NextHopTrigger::Location),
            JournalEvent::FsdJump(ev) => self.on_arrival(ev, true, NextHopTrigger::FsdJump),
            JournalEvent::StartJump(ev) => self.on_start_jump(ev),
            JournalEvent::Loadout(ev) => self.on_loadout(ev),
            JournalEvent::Docked(ev) => self.on_docked(ev),
            JournalEvent::Undocked(ev) => self.on_undocked(ev),
            JournalEvent::Scan(ev) => self.on_scan(ev),
            JournalEvent::FssDiscoveryScan(ev) => self.on_discovery_scan(ev),
            JournalEvent::FssAllBodiesFound(ev) => self.on_all_bodies(ev),
            JournalEvent::SaaSignalsFound(ev) => self.on_signals(ev),
            JournalEvent::Footfall(ev) => self.on_footfall(ev),
            JournalEvent::Cargo(ev) => self.on_cargo(ev),
            JournalEvent::Market(ev) => self.on_market(ev),
            JournalEvent::ApproachSettlement(ev) => {
                let key = ev.market_id.map(|id| id.to_string()).unwrap_or(ev.name.clone());
                self.smuggler_check(&key, &ev.name);
            }
            JournalEvent::DockingRequested(ev) => {
                let key = ev
                    .market_id
                    .map(|id| id.to_string())
                    .unwrap_or(ev.station_name.clone());
                self.smuggler_check(&key, &ev.station_name);
            }
            JournalEvent::NavRoute(ev) => self.on_nav_route(ev),
            JournalEvent::NavRouteClear => {
                self.session.update(|s| s.nav_route = None);
            }
            JournalEvent::FuelScoop(ev) => {
                if let Some(total) = ev.total {
                    self.set_fuel(Some(total), None);
                }
            }
            JournalEvent::RefuelAll(ev) | JournalEvent::RefuelPartial(ev) => {
                let topped = self.session.read(|s| {
                    let ship = &s.ship_state;
                    let now = ship.fuel_main_t.unwrap_or(0.0) + ev.amount;
                    match ship.fuel_capacity_main_t {
                        Some(cap) => now.min(cap),
                        None => now,
                    }
                });
                self.set_fuel(Some(topped), None);
            }
            JournalEvent::Other => {}
        }
    }

    /// Dispatches a sidecar document from a watcher.
    pub fn handle_sidecar(&mut self, kind: WatchedFile, document: Value) {
        match kind {
            WatchedFile::Status => self.on_status(&document),
            WatchedFile::Market | WatchedFile::Cargo | WatchedFile::NavRoute => {
                self.handle_value(document)
            }
        }
    }

    pub fn set_bootstrap(&mut self, active: bool) {
        self.bootstrap = active;
        self.session.update(|s| s.bootstrap_replay = active);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Navigation
    // ─────────────────────────────────────────────────────────────────────────

    fn on_arrival(&mut self, ev: SystemArrival, hyperspace: bool, trigger: NextHopTrigger) {
        let live = !self.bootstrap;
        let system = ev.star_system.trim().to_string();
        let nav_route = self.session.update(|s| {
            s.current_system = Some(system.clone());
            if hyperspace {
                s.is_docked = false;
                s.current_station = None;
            } else {
                s.is_docked = ev.docked;
                s.current_station = if ev.docked { ev.station_name.clone() } else { None };
            }
            s.in_transit = false;
            if live {
                s.has_live_system_event = true;
            }
            s.nav_route.clone()
        });
        self.notifier.set_in_transit(false);
        self.notifier
            .bus()
            .send(Message::StartLabel { text: system.clone() });
        info!(system = %system, live, "System arrival");

        if ev.fuel_level.is_some() {
            self.set_fuel(ev.fuel_level, None);
        }

        if !live {
            return;
        }
        let mut cursor = self.cursor();
        let arrival = cursor.on_system(&system, trigger, nav_route.as_ref());
        if matches!(arrival, Arrival::OnRoute { .. } | Arrival::Completed) {
            if let Some(manager) = &self.manager {
                manager.advance_route(&system);
            }
        }
        if let Arrival::OnRoute { position } = arrival {
            if let Some(route) = cursor.route() {
                self.notifier.bus().send(Message::Select {
                    target: route.source.clone(),
                    index: position,
                });
            }
        }
        debug!(arrival = ?arrival, "Cursor updated");
    }

    fn on_start_jump(&mut self, ev: StartJump) {
        if ev.jump_type.eq_ignore_ascii_case("hyperspace") {
            self.session.update(|s| s.in_transit = true);
            self.notifier.set_in_transit(true);
            debug!(target = ?ev.star_system, "Hyperspace jump started");
        }
    }

    fn on_nav_route(&mut self, ev: NavRouteEvent) {
        let Some(stops) = ev.route else {
            return;
        };
        let systems: Vec<String> = stops
            .into_iter()
            .map(|s| s.star_system)
            .filter(|s| !s.trim().is_empty())
            .collect();
        debug!(stops = systems.len(), "In-game route updated");
        self.session.update(|s| {
            s.nav_route = if systems.is_empty() {
                None
            } else {
                Some(NavRoute { systems })
            };
        });
    }

    fn on_docked(&mut self, ev: Docked) {
        self.session.update(|s| {
            s.is_docked = true;
            s.current_station = Some(ev.station_name.clone());
            if let Some(system) = &ev.star_system {
                s.current_system = Some(system.clone());
            }
        });
        self.notifier.status(
            StatusLevel::Info,
            "DOCKED",
            format!("Docked at {}", ev.station_name),
            SOURCE,
        );
    }

    fn on_undocked(&mut self, ev: Undocked) {
        self.session.update(|s| {
            s.is_docked = false;
            s.current_station = None;
        });
        let text = match ev.station_name {
            Some(name) => format!("Undocked from {name}"),
            None => "Undocked".to_string(),
        };
        self.notifier.status(StatusLevel::Info, "UNDOCKED", text, SOURCE);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ship
    // ─────────────────────────────────────────────────────────────────────────

    fn on_loadout(&mut self, ev: Loadout) {
        let mut fsd = None;
        let mut booster = FsdBooster::default();
        for module in &ev.modules {
            if module.slot.eq_ignore_ascii_case("FrameShiftDrive") {
                if let Some((class, rating, overcharge)) = parse_fsd_item(&module.item) {
                    let engineering = module.engineering.clone().unwrap_or_default();
                    fsd = Some(FsdInfo {
                        item: module.item.to_ascii_lowercase(),
                        class,
                        rating,
                        overcharge,
                        modifiers: engineering
                            .modifiers
                            .into_iter()
                            .map(|m| EngineeringModifier {
                                label: m.label,
                                value: m.value,
                                original_value: m.original_value,
                            })
                            .collect(),
                        experimental_effect: engineering.experimental_effect,
                    });
                }
            } else if let Some(class) = parse_booster_item(&module.item) {
                booster = FsdBooster {
                    present: true,
                    class,
                    bonus_ly: self.modules.booster_bonus(class).unwrap_or(0.0).max(0.0),
                };
            }
        }
        if fsd.is_none() {
            self.log_once
                .warn("handler:loadout:fsd", "Loadout has no recognizable frame shift drive");
        }

        let capacity = ev.fuel_capacity.unwrap_or_default();
        self.session.update(|s| {
            let ship = &mut s.ship_state;
            if ship.ship_id != ev.ship_id {
                ship.fuel_main_t = None;
                ship.fuel_reservoir_t = None;
            }
            ship.ship_id = ev.ship_id;
            ship.ship_type = Some(ev.ship.to_ascii_lowercase());
            ship.unladen_mass_t = ev.unladen_mass;
            ship.cargo_capacity_t = ev.cargo_capacity;
            ship.fuel_capacity_main_t = capacity.main;
            ship.fuel_capacity_reserve_t = capacity.reserve;
            ship.fsd = fsd;
            ship.fsd_booster = booster;
        });
        info!(ship = %ev.ship, "Loadout received");

        if self.notifier.config().compute_on().on_loadout() {
            self.recompute_jump_range();
        } else {
            self.publish_ship();
        }
    }

    /// Recomputes jump range on the session ship and publishes it.
    pub fn recompute_jump_range(&mut self) {
        let opts = JumpRangeOptions::from_config(self.notifier.config());
        let modules = Arc::clone(&self.modules);
        let result = self.session.update(|s| {
            let result = jump_range::compute(&s.ship_state, &modules, &opts);
            jump_range::apply_result(&mut s.ship_state, &result);
            result
        });
        match (&result.error, result.jump_range_ly) {
            (Some(code), _) => debug!(error = %code, "Jump range unavailable"),
            (None, Some(ly)) => debug!(jump_range_ly = ly, limited_by = ?result.limited_by, "Jump range computed"),
            _ => {}
        }
        self.publish_ship();
    }

    fn publish_ship(&self) {
        let ship: ShipState = self.session.read(|s| s.ship_state.clone());
        self.notifier.bus().send(Message::ShipState(Box::new(ship)));
    }

    /// Applies fuel readings; the status-change compute policy decides on recompute.
    fn set_fuel(&mut self, main: Option<f64>, reservoir: Option<f64>) {
        let changed = self.session.update(|s| {
            let ship = &mut s.ship_state;
            let before = (ship.fuel_main_t, ship.fuel_reservoir_t);
            if main.is_some() {
                ship.fuel_main_t = main;
            }
            if reservoir.is_some() {
                ship.fuel_reservoir_t = reservoir;
            }
            before != (ship.fuel_main_t, ship.fuel_reservoir_t)
        });
        if changed && self.notifier.config().compute_on().on_status_change() {
            self.recompute_jump_range();
        }
        self.fuel_check();
    }

    fn fuel_check(&mut self) {
        let (fuel, capacity) =
            self.session
                .read(|s| (s.ship_state.fuel_main_t, s.ship_state.fuel_capacity_main_t));
        let (Some(fuel), Some(capacity)) = (fuel, capacity) else {
            return;
        };
        if capacity <= 0.0 {
            return;
        }
        let threshold = self.notifier.config().get_f64("fuel_critical_fraction", 0.25);
        if fuel / capacity >= threshold {
            self.fuel_alert_armed = true;
            return;
        }
        if !self.fuel_alert_armed || self.bootstrap {
            return;
        }
        self.fuel_alert_armed = false;
        self.notifier.status(
            StatusLevel::Warn,
            "FUEL_CRITICAL",
            format!("Fuel low: {fuel:.1} of {capacity:.0} t"),
            SOURCE,
        );
        self.notifier.speak(VoiceRequest::new(
            "MSG.FUEL_CRITICAL",
            "Fuel critical",
            VoiceCategory::Alert,
        ));
    }

    fn on_status(&mut self, doc: &Value) {
        if let Some(flags) = doc.get("Flags").and_then(Value::as_u64) {
            let jumping = flags & FLAG_FSD_JUMP != 0;
            self.session.update(|s| s.in_transit = jumping);
            self.notifier.set_in_transit(jumping);
        }
        if let Some(cargo) = doc.get("Cargo").and_then(Value::as_f64) {
            let changed = self.session.update(|s| {
                let changed = (s.ship_state.cargo_mass_t - cargo).abs() > f64::EPSILON;
                s.ship_state.cargo_mass_t = cargo.max(0.0);
                changed
            });
            if changed && self.notifier.config().compute_on().on_status_change() {
                self.recompute_jump_range();
            }
        }
        if let Some(fuel) = doc.get("Fuel") {
            let main = fuel.get("FuelMain").and_then(Value::as_f64);
            let reservoir = fuel.get("FuelReservoir").and_then(Value::as_f64);
            if main.is_some() || reservoir.is_some() {
                self.set_fuel(main, reservoir);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Cargo & market
    // ─────────────────────────────────────────────────────────────────────────

    fn on_cargo(&mut self, ev: Cargo) {
        if ev.vessel.as_deref().is_some_and(|v| !v.eq_ignore_ascii_case("ship")) {
            return;
        }
        let Some(inventory) = ev.inventory else {
            return;
        };
        let illegal: HashSet<String> = self
            .notifier
            .config()
            .get_str_list("smuggler_illegal_commodities")
            .iter()
            .map(|c| normalize_commodity(c))
            .collect();

        let mut cargo = BTreeMap::new();
        let mut has_illegal = false;
        for item in &inventory {
            let name = normalize_commodity(&item.name);
            if item.stolen > 0 || illegal.contains(&name) {
                has_illegal = true;
            }
            *cargo.entry(name).or_insert(0) += item.count;
        }
        let mass: u32 = cargo.values().sum();
        let changed = self.session.update(|s| {
            let changed = (s.ship_state.cargo_mass_t - f64::from(mass)).abs() > f64::EPSILON;
            s.cargo = cargo;
            s.has_illegal_cargo = has_illegal;
            s.ship_state.cargo_mass_t = f64::from(mass);
            changed
        });
        if changed && self.notifier.config().compute_on().on_status_change() {
            self.recompute_jump_range();
        }
    }

    fn on_market(&mut self, ev: Market) {
        let Some(items) = ev.items else {
            return;
        };
        let station = ev.station_name.clone().unwrap_or_else(|| "station".to_string());
        let key = ev.market_id.map(|id| id.to_string()).unwrap_or_else(|| {
            format!("{}/{}", ev.star_system.as_deref().unwrap_or(""), station)
        });
        if self.warned_markets.contains(&key) {
            return;
        }

        let rules: Vec<JackpotRule> = match self.notifier.config().get("market_jackpot_rules", Value::Null) {
            Value::Array(raw) => raw
                .into_iter()
                .filter_map(|r| serde_json::from_value(r).ok())
                .collect(),
            _ => Vec::new(),
        };
        let mut hits = Vec::new();
        for item in &items {
            let name = normalize_commodity(&item.name);
            if rules
                .iter()
                .any(|r| normalize_commodity(&r.commodity) == name && r.matches(item))
            {
                hits.push(name);
            }
        }
        if hits.is_empty() {
            return;
        }
        self.warned_markets.insert(key);
        info!(station = %station, hits = ?hits, "Market jackpot");
        self.notifier.status(
            StatusLevel::Info,
            "MARKET_JACKPOT",
            format!("Jackpot at {station}: {}", hits.join(", ")),
            SOURCE,
        );
        self.notifier.speak(VoiceRequest::new(
            "MSG.MARKET_JACKPOT",
            format!("Market jackpot at {station}"),
            VoiceCategory::Alert,
        ));
    }

    fn smuggler_check(&mut self, key: &str, target: &str) {
        if !self.session.read(|s| s.has_illegal_cargo) {
            return;
        }
        if !self.smuggler_warned.insert(key.to_string()) {
            return;
        }
        self.notifier.status(
            StatusLevel::Warn,
            "SMUGGLER_ALERT",
            format!("Illegal cargo aboard approaching {target}"),
            SOURCE,
        );
        self.notifier.speak(VoiceRequest::new(
            "MSG.SMUGGLER_WARNING",
            "Warning, illegal cargo aboard",
            VoiceCategory::Alert,
        ));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Exploration
    // ─────────────────────────────────────────────────────────────────────────

    fn explore_notify(&self, code: &str, text: String, voice_id: &str) {
        self.notifier.status(StatusLevel::Info, code, text.clone(), SOURCE);
        self.notifier
            .speak(VoiceRequest::new(voice_id, text, VoiceCategory::Explore));
    }

    fn on_scan(&mut self, ev: Scan) {
        if ev.star_type.is_some() {
            return;
        }
        let class = ev.planet_class.clone().unwrap_or_default();
        let terraformable = ev
            .terraform_state
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("terraformable"));
        let high_value_classes = self
            .notifier
            .config()
            .get_str_list("exploration_high_value_classes");
        let high_value = terraformable
            || high_value_classes
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&class));
        if !high_value || !self.explored.high_value_bodies.insert(ev.body_name.clone()) {
            return;
        }
        let mut text = format!("{class}: {}", ev.body_name);
        if terraformable {
            text.push_str(" (terraformable)");
        }
        if let Some(ls) = ev.distance_from_arrival_ls {
            text.push_str(&format!(", {ls:.0} ls"));
        }
        self.explore_notify("EXPLORE_HIGH_VALUE", text, "MSG.EXPLORE_HIGH_VALUE");
    }

    fn on_discovery_scan(&mut self, ev: FssDiscoveryScan) {
        let system = ev
            .system_name
            .or_else(|| self.session.current_system())
            .unwrap_or_default();
        if !self.explored.honked_systems.insert(system.to_lowercase()) {
            return;
        }
        self.explore_notify(
            "EXPLORE_HONK",
            format!("{} bodies detected in {system}", ev.body_count),
            "MSG.EXPLORE_HONK",
        );
    }

    fn on_all_bodies(&mut self, ev: FssAllBodiesFound) {
        if !self.explored.all_found_systems.insert(ev.system_name.to_lowercase()) {
            return;
        }
        self.explore_notify(
            "EXPLORE_ALL_BODIES",
            format!("All {} bodies found in {}", ev.count, ev.system_name),
            "MSG.EXPLORE_ALL_BODIES",
        );
    }

    fn on_signals(&mut self, ev: SaaSignalsFound) {
        let bio: u32 = ev
            .signals
            .iter()
            .filter(|s| s.kind.to_ascii_lowercase().contains("biological"))
            .map(|s| s.count)
            .sum();
        if bio == 0 || !self.explored.bio_bodies.insert(ev.body_name.clone()) {
            return;
        }
        self.explore_notify(
            "EXPLORE_BIO_SIGNALS",
            format!("{bio} biological signals on {}", ev.body_name),
            "MSG.EXPLORE_BIO_SIGNALS",
        );
    }

    fn on_footfall(&mut self, ev: Footfall) {
        if !self.explored.footfalls.insert(ev.body.clone()) {
            return;
        }
        self.explore_notify(
            "EXPLORE_FOOTFALL",
            format!("First footfall on {}", ev.body),
            "MSG.EXPLORE_FOOTFALL",
        );
    }
}

impl JournalSink for EventHandler {
    fn on_line(&mut self, line: &str) {
        self.handle_line(line);
    }

    fn on_sidecar(&mut self, kind: WatchedFile, document: Value) {
        self.handle_sidecar(kind, document);
    }

    fn set_bootstrap(&mut self, active: bool) {
        EventHandler::set_bootstrap(self, active);
    }
}
