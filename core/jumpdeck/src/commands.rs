//! Subcommand bodies. Each returns a core `Result`; `main` maps errors to exit codes.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Args, Subcommand};
use fs_err as fs;
use jumpdeck_core::journal::read_last_lines;
use jumpdeck_core::jump_range::{compute, JumpRangeOptions};
use jumpdeck_core::{
    find_latest_journal, JournalTailer, Message, ModulesData, NavEngine, NavError, PlannerMode,
    Result, RouteRequest,
};
use serde_json::{Map, Value};
use tracing::info;

const LOADOUT_SEARCH_LINES: usize = 5000;

// ═══════════════════════════════════════════════════════════════════════════════
// watch
// ═══════════════════════════════════════════════════════════════════════════════

fn print_json_line(message: &Message) -> std::result::Result<(), String> {
    let line = serde_json::to_string(message).map_err(|e| e.to_string())?;
    let mut out = io::stdout().lock();
    writeln!(out, "{line}").map_err(|e| e.to_string())
}

pub fn watch(engine: &NavEngine, journal_dir: Option<PathBuf>) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let _tailer = match journal_dir {
        Some(dir) => {
            if !dir.is_dir() {
                return Err(NavError::JournalDirNotFound(dir));
            }
            let mut tailer = JournalTailer::new(dir, engine.event_handler(), engine.notifier().clone());
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("journal-tailer".to_string())
                .spawn(move || tailer.run(&stop))
                .map_err(|e| NavError::io("spawn journal tailer", e))?
        }
        None => engine.start_journal_watch(Arc::clone(&stop))?,
    };
    info!("Watching journal; interrupt to stop");
    engine
        .bus()
        .run_drain_loop(Duration::from_millis(100), stop, |message| print_json_line(&message));
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// plan
// ═══════════════════════════════════════════════════════════════════════════════

fn parse_mode(value: &str) -> std::result::Result<PlannerMode, String> {
    PlannerMode::parse(value).ok_or_else(|| {
        let known: Vec<&str> = PlannerMode::ALL.iter().map(|m| m.as_str()).collect();
        format!("unknown mode '{value}' (expected one of: {})", known.join(", "))
    })
}

#[derive(Args)]
pub struct PlanArgs {
    /// Planner mode
    #[arg(value_parser = parse_mode)]
    mode: PlannerMode,

    /// Full request as JSON; the flags below override its fields
    #[arg(long, value_name = "JSON")]
    request: Option<String>,

    /// Start system (defaults to the current system)
    #[arg(long)]
    from: Option<String>,

    #[arg(long)]
    to: Option<String>,

    /// Jump range in light years
    #[arg(long)]
    range: Option<f64>,

    /// Neutron efficiency, 0-100
    #[arg(long)]
    efficiency: Option<u32>,

    /// Neutron waypoint; repeatable
    #[arg(long)]
    via: Vec<String>,

    #[arg(long)]
    overcharge: bool,

    /// Starting station (trade)
    #[arg(long)]
    station: Option<String>,

    #[arg(long)]
    capital: Option<u64>,

    #[arg(long)]
    cargo: Option<u32>,

    /// Search radius (body plans)
    #[arg(long)]
    radius: Option<f64>,

    #[arg(long)]
    max_results: Option<u32>,

    #[arg(long)]
    min_value: Option<u64>,

    #[arg(long = "loop")]
    loop_route: bool,
}

impl PlanArgs {
    fn into_request(self) -> Result<(PlannerMode, RouteRequest)> {
        let mut req: RouteRequest = match self.request.as_deref() {
            Some(json) => serde_json::from_str(json).map_err(|e| NavError::json("parse --request", e))?,
            None => RouteRequest::default(),
        };
        req.start = self.from.or(req.start);
        req.destination = self.to.or(req.destination);
        req.jump_range = self.range.or(req.jump_range);
        req.efficiency = self.efficiency.or(req.efficiency);
        if !self.via.is_empty() {
            req.via = self.via;
        }
        req.supercharge_overcharge |= self.overcharge;
        req.start_station = self.station.or(req.start_station);
        req.starting_capital = self.capital.or(req.starting_capital);
        req.cargo_capacity = self.cargo.or(req.cargo_capacity);
        req.radius = self.radius.or(req.radius);
        req.max_results = self.max_results.or(req.max_results);
        req.min_value = self.min_value.or(req.min_value);
        req.loop_route |= self.loop_route;
        Ok((self.mode, req))
    }
}

pub fn plan(engine: &NavEngine, args: PlanArgs) -> Result<()> {
    let (mode, request) = args.into_request()?;
    let response = engine.plan_route_sync(mode, request)?;
    info!(
        mode = mode.as_str(),
        status = ?response.status,
        systems = response.route.systems.len(),
        "Plan finished"
    );
    let json = serde_json::to_string_pretty(&response.route).map_err(|e| NavError::json("encode route", e))?;
    println!("{json}");
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// jump-range
// ═══════════════════════════════════════════════════════════════════════════════

fn is_loadout(line: &str) -> bool {
    serde_json::from_str::<Value>(line)
        .ok()
        .and_then(|v| v.get("event").and_then(Value::as_str).map(|e| e == "Loadout"))
        .unwrap_or(false)
}

fn last_loadout(lines: &[String]) -> Option<String> {
    lines.iter().rev().find(|l| is_loadout(l)).cloned()
}

fn loadout_from_file(path: &Path) -> Result<Option<String>> {
    let content = fs::read_to_string(path).map_err(|e| NavError::io("read loadout", e))?;
    let lines: Vec<String> = content.lines().map(str::to_string).collect();
    if let Some(line) = last_loadout(&lines) {
        return Ok(Some(line));
    }
    // Pretty-printed single event
    Ok(is_loadout(&content).then_some(content))
}

fn loadout_from_journal(engine: &NavEngine) -> Result<Option<String>> {
    let dir = engine
        .journal_dir()
        .ok_or_else(|| NavError::JournalDirNotFound(PathBuf::from("<unset>")))?;
    let Some(journal) = find_latest_journal(&dir) else {
        return Err(NavError::JournalDirNotFound(dir));
    };
    Ok(last_loadout(&read_last_lines(&journal, LOADOUT_SEARCH_LINES)?))
}

pub fn jump_range(engine: &NavEngine, loadout: Option<PathBuf>) -> Result<()> {
    let line = match loadout.as_deref() {
        Some(path) => loadout_from_file(path)?,
        None => loadout_from_journal(engine)?,
    };
    let Some(line) = line else {
        return Err(NavError::Io {
            context: "find Loadout event".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no Loadout event found"),
        });
    };

    let mut handler = engine.event_handler();
    handler.handle_line(&line);
    let ship = engine.session().snapshot().ship_state;
    let result = compute(
        &ship,
        &ModulesData::load_configured(engine.config()),
        &JumpRangeOptions::from_config(engine.config()),
    );
    let json = serde_json::to_string_pretty(&result).map_err(|e| NavError::json("encode jump range", e))?;
    println!("{json}");
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// config
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print one key (or every key when omitted)
    Get { key: Option<String> },

    /// Store a value; parsed as JSON when possible, else kept as a string
    Set { key: String, value: String },
}

fn parse_setting_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn config(engine: &NavEngine, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let value = match key {
                Some(key) => engine.config().get(&key, Value::Null),
                None => Value::Object(engine.config().snapshot()),
            };
            let json = serde_json::to_string_pretty(&value).map_err(|e| NavError::json("encode setting", e))?;
            println!("{json}");
        }
        ConfigAction::Set { key, value } => {
            let mut partial = Map::new();
            partial.insert(key.clone(), parse_setting_value(&value));
            engine.save_settings(partial)?;
            info!(key = %key, "Setting saved");
        }
    }
    Ok(())
}
