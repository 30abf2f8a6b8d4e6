//! Planner response -> table rows.
//!
//! Field lookups tolerate the alternative names the planners have used over
//! time; each accessor takes a list of dotted paths and returns the first hit.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use super::payload::PlannerMode;

pub const UNKNOWN_STATION: &str = "UNKNOWN_STATION";
pub const BADGE_COPIED: &str = "COPIED";

// ═══════════════════════════════════════════════════════════════════════════════
// Row types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NeutronHop {
    pub system: String,
    pub distance_jumped_ly: Option<f64>,
    pub distance_left_ly: Option<f64>,
    pub neutron_star: bool,
    pub jumps: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BodyRow {
    pub system_name: String,
    pub body_name: String,
    pub subtype: String,
    pub terraformable: bool,
    pub distance_ls: Option<f64>,
    pub value_scan: Option<u64>,
    pub value_map: Option<u64>,
    pub jumps: Option<u32>,
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRow {
    pub from_system: String,
    pub to_system: String,
    pub from_station: String,
    pub to_station: String,
    pub commodity: String,
    pub profit_per_ton: Option<i64>,
    pub total_profit: Option<i64>,
    pub cumulative_profit: Option<i64>,
    pub updated_ago: String,
    pub distance_ly: Option<f64>,
    pub jumps: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum TableRow {
    Neutron(NeutronHop),
    Body(BodyRow),
    Trade(TradeRow),
}

impl TableRow {
    /// The system a player travels to for this row.
    pub fn system_name(&self) -> &str {
        match self {
            TableRow::Neutron(hop) => &hop.system,
            TableRow::Body(body) => &body.system_name,
            TableRow::Trade(trade) => &trade.to_system,
        }
    }
}

/// UI hints attached to a row. Not part of row identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RowMeta {
    pub badges: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisplayRow {
    #[serde(flatten)]
    pub row: TableRow,
    #[serde(rename = "_meta")]
    pub meta: RowMeta,
}

impl PartialEq for DisplayRow {
    fn eq(&self, other: &Self) -> bool {
        self.row == other.row
    }
}

impl DisplayRow {
    pub fn new(row: TableRow) -> Self {
        Self {
            row,
            meta: RowMeta::default(),
        }
    }

    pub fn has_badge(&self, badge: &str) -> bool {
        self.meta.badges.iter().any(|b| b == badge)
    }
}

/// Rows with the `COPIED` badge on the first row whose system matches `copied`.
pub fn decorate_rows(rows: &[TableRow], copied: Option<&str>) -> Vec<DisplayRow> {
    let copied_norm = copied.map(crate::session::normalize_system);
    let mut marked = false;
    rows.iter()
        .map(|row| {
            let mut display = DisplayRow::new(row.clone());
            if !marked {
                if let Some(target) = copied_norm.as_deref() {
                    if crate::session::normalize_system(row.system_name()) == target {
                        display.meta.badges.push(BADGE_COPIED.to_string());
                        marked = true;
                    }
                }
            }
            display
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRoute {
    pub mode: PlannerMode,
    pub rows: Vec<TableRow>,
    /// Ordered, consecutive-deduplicated systems to travel through.
    pub systems: Vec<String>,
    /// Waypoints the plan must pass (neutron `via`).
    pub via: Vec<String>,
    pub total_jumps: Option<u32>,
    pub total_distance_ly: Option<f64>,
}

impl NormalizedRoute {
    pub fn empty(mode: PlannerMode) -> Self {
        Self {
            mode,
            rows: Vec::new(),
            systems: Vec::new(),
            via: Vec::new(),
            total_jumps: None,
            total_distance_ly: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Field access
// ═══════════════════════════════════════════════════════════════════════════════

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

fn pick<'a>(value: &'a Value, paths: &[&str]) -> Option<&'a Value> {
    paths.iter().find_map(|p| lookup(value, p))
}

fn pick_str(value: &Value, paths: &[&str]) -> Option<String> {
    paths.iter().find_map(|p| match lookup(value, p)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
    .filter(|f: &f64| f.is_finite())
}

fn pick_f64(value: &Value, paths: &[&str]) -> Option<f64> {
    paths.iter().find_map(|p| lookup(value, p).and_then(as_f64))
}

fn pick_i64(value: &Value, paths: &[&str]) -> Option<i64> {
    pick_f64(value, paths).map(|f| f.round() as i64)
}

fn pick_u64(value: &Value, paths: &[&str]) -> Option<u64> {
    pick_f64(value, paths)
        .filter(|f| *f >= 0.0)
        .map(|f| f.round() as u64)
}

fn pick_u32(value: &Value, paths: &[&str]) -> Option<u32> {
    pick_u64(value, paths).and_then(|v| u32::try_from(v).ok())
}

fn pick_bool(value: &Value, paths: &[&str]) -> Option<bool> {
    paths.iter().find_map(|p| match lookup(value, p)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => {
            let s = s.trim().to_ascii_lowercase();
            match s.as_str() {
                "" | "0" | "false" | "no" | "not terraformable" => Some(false),
                _ => Some(true),
            }
        }
        _ => None,
    })
}

fn array_at<'a>(value: &'a Value, paths: &[&str]) -> &'a [Value] {
    pick(value, paths)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

// ═══════════════════════════════════════════════════════════════════════════════
// Display-text fallback
// ═══════════════════════════════════════════════════════════════════════════════

static ARROW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(.+?)\s*(?:->|→|=>)\s*(.+?)\s*$").unwrap());
static STATION_IN_PARENS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(.+?)\s*\((.+?)\)\s*$").unwrap());

/// One side of a display string: `System / Station`, `System (Station)` or `System`.
fn parse_endpoint_text(text: &str) -> (Option<String>, Option<String>) {
    if let Some((system, station)) = text.split_once(" / ") {
        return (non_blank(system), non_blank(station));
    }
    if let Some(caps) = STATION_IN_PARENS_RE.captures(text) {
        return (non_blank(&caps[1]), non_blank(&caps[2]));
    }
    (non_blank(text), None)
}

fn non_blank(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// `"Sol / Abraham Lincoln -> Lave (Lave Station)"` -> ((Sol, Abraham Lincoln), (Lave, Lave Station)).
pub fn parse_display_text(
    text: &str,
) -> ((Option<String>, Option<String>), (Option<String>, Option<String>)) {
    match ARROW_RE.captures(text) {
        Some(caps) => (parse_endpoint_text(&caps[1]), parse_endpoint_text(&caps[2])),
        None => (parse_endpoint_text(text), (None, None)),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Updated-ago
// ═══════════════════════════════════════════════════════════════════════════════

/// Compact age: `now`, `Nm`, `Nh`, `Nd`, `Nw`, `Ny`.
pub fn format_updated_ago(updated: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = now.signed_duration_since(updated).num_seconds().max(0);
    const MIN: i64 = 60;
    const HOUR: i64 = 60 * MIN;
    const DAY: i64 = 24 * HOUR;
    const WEEK: i64 = 7 * DAY;
    const YEAR: i64 = 365 * DAY;
    match secs {
        s if s < MIN => "now".to_string(),
        s if s < HOUR => format!("{}m", s / MIN),
        s if s < DAY => format!("{}h", s / HOUR),
        s if s < WEEK => format!("{}d", s / DAY),
        s if s < YEAR => format!("{}w", s / WEEK),
        s => format!("{}y", s / YEAR),
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                        .ok()
                        .map(|naive| naive.and_utc())
                })
                .or_else(|| s.parse::<i64>().ok().and_then(|secs| DateTime::from_timestamp(secs, 0)))
        }
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Normalizers
// ═══════════════════════════════════════════════════════════════════════════════

pub fn normalize(mode: PlannerMode, result: &Value, now: DateTime<Utc>) -> NormalizedRoute {
    match mode {
        PlannerMode::Neutron => normalize_neutron(result),
        PlannerMode::Trade => normalize_trade(result, now),
        _ => normalize_bodies(mode, result),
    }
}

fn push_dedup(systems: &mut Vec<String>, name: &str) {
    let norm = crate::session::normalize_system(name);
    if norm.is_empty() {
        return;
    }
    let same_as_last = systems
        .last()
        .map(|last| crate::session::normalize_system(last) == norm)
        .unwrap_or(false);
    if !same_as_last {
        systems.push(name.trim().to_string());
    }
}

pub fn normalize_neutron(result: &Value) -> NormalizedRoute {
    let mut route = NormalizedRoute::empty(PlannerMode::Neutron);
    for hop in array_at(result, &["system_jumps", "jumps", "systems"]) {
        let Some(system) = pick_str(hop, &["system", "name", "system_name"]) else {
            continue;
        };
        push_dedup(&mut route.systems, &system);
        route.rows.push(TableRow::Neutron(NeutronHop {
            system,
            distance_jumped_ly: pick_f64(hop, &["distance_jumped", "distance"]),
            distance_left_ly: pick_f64(hop, &["distance_left", "remaining"]),
            neutron_star: pick_bool(hop, &["neutron_star", "neutron"]).unwrap_or(false),
            jumps: pick_u32(hop, &["jumps"]),
        }));
    }
    route.via = array_at(result, &["via"])
        .iter()
        .filter_map(|v| v.as_str().map(str::trim).filter(|s| !s.is_empty()))
        .map(str::to_string)
        .collect();
    route.total_jumps = pick_u32(result, &["total_jumps"]).or_else(|| {
        let sum: u32 = route
            .rows
            .iter()
            .filter_map(|r| match r {
                TableRow::Neutron(h) => h.jumps,
                _ => None,
            })
            .sum();
        if sum > 0 {
            Some(sum)
        } else {
            None
        }
    });
    route.total_distance_ly = pick_f64(result, &["distance", "total_distance"]).or_else(|| {
        route.rows.iter().find_map(|r| match r {
            TableRow::Neutron(h) => h.distance_left_ly,
            _ => None,
        })
    });
    route
}

fn body_list(result: &Value) -> &[Value] {
    match result {
        Value::Array(items) => items,
        other => array_at(other, &["systems", "results", "result"]),
    }
}

pub fn normalize_bodies(mode: PlannerMode, result: &Value) -> NormalizedRoute {
    let mut route = NormalizedRoute::empty(mode);
    let mut total_jumps = 0u32;
    for system in body_list(result) {
        let Some(system_name) = pick_str(system, &["name", "system", "system_name"]) else {
            continue;
        };
        let jumps = pick_u32(system, &["jumps"]);
        total_jumps += jumps.unwrap_or(0);
        push_dedup(&mut route.systems, &system_name);
        for body in array_at(system, &["bodies"]) {
            let value_scan = pick_u64(body, &["estimated_scan_value", "value_scan", "scan_value", "value"])
                .or_else(|| {
                    let landmarks = array_at(body, &["landmarks"]);
                    let sum: u64 = landmarks
                        .iter()
                        .filter_map(|l| pick_u64(l, &["value", "landmark_value"]))
                        .sum();
                    if sum > 0 {
                        Some(sum)
                    } else {
                        None
                    }
                });
            route.rows.push(TableRow::Body(BodyRow {
                system_name: system_name.clone(),
                body_name: pick_str(body, &["name", "body_name", "body"]).unwrap_or_default(),
                subtype: pick_str(body, &["subtype", "sub_type", "type"]).unwrap_or_default(),
                terraformable: pick_bool(body, &["is_terraformable", "terraformable", "terraforming_state"])
                    .unwrap_or(false),
                distance_ls: pick_f64(body, &["distance", "distance_ls", "distance_to_arrival"]),
                value_scan,
                value_map: pick_u64(body, &["estimated_mapping_value", "value_map", "mapping_value"]),
                jumps,
                done: pick_bool(body, &["done"]).unwrap_or(false),
            }));
        }
    }
    if total_jumps > 0 {
        route.total_jumps = Some(total_jumps);
    }
    route
}

fn trade_list(result: &Value) -> &[Value] {
    match result {
        Value::Array(items) => items,
        other => array_at(other, &["hops", "routes", "result"]),
    }
}

fn endpoint_system(hop: &Value, side: &str) -> Option<String> {
    let alias = if side == "from" { "source" } else { "destination" };
    let flat = format!("{side}_system");
    let nested_name = format!("{side}.system.name");
    let nested = format!("{side}.system");
    let alias_name = format!("{alias}.system.name");
    let alias_nested = format!("{alias}.system");
    pick_str(
        hop,
        &[&flat, &nested_name, &nested, &alias_name, &alias_nested],
    )
}

fn endpoint_station(hop: &Value, side: &str) -> Option<String> {
    let alias = if side == "from" { "source" } else { "destination" };
    let flat = format!("{side}_station");
    let nested_name = format!("{side}.station.name");
    let nested = format!("{side}.station");
    let alias_name = format!("{alias}.station.name");
    let alias_nested = format!("{alias}.station");
    pick_str(
        hop,
        &[&flat, &nested_name, &nested, &alias_name, &alias_nested],
    )
}

pub fn normalize_trade(result: &Value, now: DateTime<Utc>) -> NormalizedRoute {
    let mut route = NormalizedRoute::empty(PlannerMode::Trade);
    let mut total_distance = 0.0;
    let mut any_distance = false;

    for hop in trade_list(result) {
        let text = pick_str(hop, &["text", "display", "label"]).unwrap_or_default();
        let ((text_from_sys, text_from_st), (text_to_sys, text_to_st)) = parse_display_text(&text);

        let from_system = endpoint_system(hop, "from").or(text_from_sys).unwrap_or_default();
        let to_system = endpoint_system(hop, "to").or(text_to_sys).unwrap_or_default();
        if from_system.is_empty() && to_system.is_empty() {
            continue;
        }
        let from_station = endpoint_station(hop, "from")
            .or(text_from_st)
            .unwrap_or_else(|| UNKNOWN_STATION.to_string());
        let to_station = endpoint_station(hop, "to")
            .or(text_to_st)
            .unwrap_or_else(|| UNKNOWN_STATION.to_string());

        let commodities = array_at(hop, &["commodities"]);
        let first = commodities.first();
        let commodity = pick_str(hop, &["commodity", "commodity_name"])
            .or_else(|| first.and_then(|c| pick_str(c, &["name", "commodity"])))
            .unwrap_or_default();

        let total_profit = pick_i64(hop, &["total_profit", "profit"]).or_else(|| {
            let sum: i64 = commodities
                .iter()
                .filter_map(|c| pick_i64(c, &["total_profit"]))
                .sum();
            if commodities.is_empty() {
                None
            } else {
                Some(sum)
            }
        });
        let amount = pick_i64(hop, &["amount", "units"]).or_else(|| {
            let sum: i64 = commodities.iter().filter_map(|c| pick_i64(c, &["amount"])).sum();
            if sum > 0 {
                Some(sum)
            } else {
                None
            }
        });
        let profit_per_ton = pick_i64(hop, &["profit_per_ton", "profit_per_unit", "unit_profit"])
            .or_else(|| first.and_then(|c| pick_i64(c, &["profit", "profit_per_ton"])))
            .or_else(|| match (total_profit, amount) {
                (Some(total), Some(units)) if units > 0 => Some(total / units),
                _ => None,
            });

        let updated_ago = pick(
            hop,
            &[
                "updated_at",
                "market_updated_at",
                "source.market_updated_at",
                "from.market_updated_at",
                "destination.market_updated_at",
            ],
        )
        .and_then(parse_timestamp)
        .map(|ts| format_updated_ago(ts, now))
        .unwrap_or_default();

        let distance_ly = pick_f64(hop, &["distance", "distance_ly"]);
        if let Some(d) = distance_ly {
            total_distance += d;
            any_distance = true;
        }

        if route.systems.is_empty() {
            push_dedup(&mut route.systems, &from_system);
        }
        push_dedup(&mut route.systems, &to_system);

        route.rows.push(TableRow::Trade(TradeRow {
            from_system,
            to_system,
            from_station,
            to_station,
            commodity,
            profit_per_ton,
            total_profit,
            cumulative_profit: pick_i64(hop, &["cumulative_profit"]),
            updated_ago,
            distance_ly,
            jumps: pick_u32(hop, &["jumps"]),
        }));
    }

    if any_distance {
        route.total_distance_ly = Some(total_distance);
    }
    route
}
