//! Pure payload builders for the planner endpoints.
//!
//! Each builder returns ordered `(key, value)` form fields plus the endpoint
//! path. Repeated keys (`via`, `body_types`) appear once per value, never as a
//! serialised list. Encoding rules: booleans `"1"`/`"0"`, integers without a
//! decimal point, floats without trailing zeros.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ConfigStore;
use crate::error::PlannerError;

// ═══════════════════════════════════════════════════════════════════════════════
// Modes
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlannerMode {
    Neutron,
    Riches,
    Ammonia,
    Elw,
    Hmc,
    Exobiology,
    Trade,
}

impl PlannerMode {
    pub const ALL: [PlannerMode; 7] = [
        PlannerMode::Neutron,
        PlannerMode::Riches,
        PlannerMode::Ammonia,
        PlannerMode::Elw,
        PlannerMode::Hmc,
        PlannerMode::Exobiology,
        PlannerMode::Trade,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "neutron" | "route" => Some(PlannerMode::Neutron),
            "riches" => Some(PlannerMode::Riches),
            "ammonia" => Some(PlannerMode::Ammonia),
            "elw" => Some(PlannerMode::Elw),
            "hmc" => Some(PlannerMode::Hmc),
            "exobiology" | "exo" => Some(PlannerMode::Exobiology),
            "trade" => Some(PlannerMode::Trade),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlannerMode::Neutron => "neutron",
            PlannerMode::Riches => "riches",
            PlannerMode::Ammonia => "ammonia",
            PlannerMode::Elw => "elw",
            PlannerMode::Hmc => "hmc",
            PlannerMode::Exobiology => "exobiology",
            PlannerMode::Trade => "trade",
        }
    }

    pub fn endpoint_path(&self) -> &'static str {
        match self {
            PlannerMode::Neutron => "/route",
            PlannerMode::Riches | PlannerMode::Ammonia | PlannerMode::Elw | PlannerMode::Hmc => {
                "/riches/route"
            }
            PlannerMode::Exobiology => "/exobiology/route",
            PlannerMode::Trade => "/trade/route",
        }
    }

    /// Body type filter of the riches family modes.
    pub fn family_body_type(&self) -> Option<&'static str> {
        match self {
            PlannerMode::Ammonia => Some("Ammonia world"),
            PlannerMode::Elw => Some("Earth-like world"),
            PlannerMode::Hmc => Some("High metal content world"),
            _ => None,
        }
    }

    pub fn is_body_plan(&self) -> bool {
        !matches!(self, PlannerMode::Neutron | PlannerMode::Trade)
    }

    pub fn referer_page(&self) -> &'static str {
        match self {
            PlannerMode::Neutron => "https://spansh.co.uk/plotter",
            PlannerMode::Riches => "https://spansh.co.uk/riches",
            PlannerMode::Ammonia => "https://spansh.co.uk/ammonia",
            PlannerMode::Elw => "https://spansh.co.uk/earth-like-worlds",
            PlannerMode::Hmc => "https://spansh.co.uk/riches",
            PlannerMode::Exobiology => "https://spansh.co.uk/exobiology",
            PlannerMode::Trade => "https://spansh.co.uk/trade",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Encoding
// ═══════════════════════════════════════════════════════════════════════════════

pub fn encode_bool(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

/// `42.0` -> `"42"`, `42.50` -> `"42.5"`. Precision is capped at 6 decimals.
pub fn encode_f64(value: f64) -> String {
    let rounded = (value * 1e6).round() / 1e6;
    if rounded == 0.0 {
        return "0".to_string();
    }
    format!("{rounded}")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFields(Vec<(String, String)>);

impl FormFields {
    pub fn push(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.0.push((key.to_string(), value.into()));
        self
    }

    pub fn push_bool(&mut self, key: &str, value: bool) -> &mut Self {
        self.push(key, encode_bool(value))
    }

    pub fn push_f64(&mut self, key: &str, value: f64) -> &mut Self {
        self.push(key, encode_f64(value))
    }

    pub fn push_int(&mut self, key: &str, value: u64) -> &mut Self {
        self.push(key, value.to_string())
    }

    pub fn as_slice(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// JSON body form: repeated keys collect into arrays, first-seen key order.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (key, value) in &self.0 {
            match map.get_mut(key) {
                Some(Value::Array(items)) => items.push(Value::String(value.clone())),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, Value::String(value.clone())]);
                }
                None => {
                    map.insert(key.clone(), Value::String(value.clone()));
                }
            }
        }
        Value::Object(map)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Request inputs
// ═══════════════════════════════════════════════════════════════════════════════

/// What the caller asked for. Fields a mode does not use are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub start: Option<String>,
    pub destination: Option<String>,
    pub jump_range: Option<f64>,
    // neutron
    pub efficiency: Option<u32>,
    #[serde(default)]
    pub via: Vec<String>,
    #[serde(default)]
    pub supercharge_overcharge: bool,
    // body plans
    pub radius: Option<f64>,
    pub max_results: Option<u32>,
    pub max_distance: Option<u32>,
    pub min_value: Option<u64>,
    #[serde(default)]
    pub use_mapping_value: bool,
    #[serde(default)]
    pub avoid_thargoids: bool,
    #[serde(default)]
    pub loop_route: bool,
    // trade
    pub start_station: Option<String>,
    pub cargo_capacity: Option<u32>,
    pub starting_capital: Option<u64>,
    pub max_hops: Option<u32>,
    pub max_hop_distance: Option<f64>,
    /// Seconds.
    pub max_price_age: Option<u64>,
    #[serde(default)]
    pub requires_large_pad: bool,
    #[serde(default)]
    pub allow_prohibited: bool,
    #[serde(default)]
    pub allow_planetary: bool,
    #[serde(default)]
    pub allow_player_owned: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub permit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureFlags {
    pub form_urlencoded: bool,
    pub neutron_overcharge: bool,
    pub neutron_via: bool,
    pub trade_market_age: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            form_urlencoded: true,
            neutron_overcharge: true,
            neutron_via: true,
            trade_market_age: true,
        }
    }
}

impl FeatureFlags {
    pub fn from_config(config: &ConfigStore) -> Self {
        Self {
            form_urlencoded: config.get_bool("features.spansh.form_urlencoded_enabled", true),
            neutron_overcharge: config.get_bool("features.spansh.neutron_overcharge_enabled", true),
            neutron_via: config.get_bool("features.spansh.neutron_via_enabled", true),
            trade_market_age: config.get_bool("features.spansh.trade_market_age_enabled", true),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangePolicy {
    pub auto_use_ship_range: bool,
    pub allow_manual_override: bool,
    pub fallback_ly: f64,
}

impl Default for RangePolicy {
    fn default() -> Self {
        Self {
            auto_use_ship_range: true,
            allow_manual_override: false,
            fallback_ly: 30.0,
        }
    }
}

impl RangePolicy {
    pub fn from_config(config: &ConfigStore) -> Self {
        Self {
            auto_use_ship_range: config.get_bool("planner_auto_use_ship_jump_range", true),
            allow_manual_override: config.get_bool("planner_allow_manual_range_override", false),
            fallback_ly: config.get_f64("planner_fallback_range_ly", 30.0),
        }
    }
}

/// Session-derived inputs, captured under a short read lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadContext {
    pub current_system: Option<String>,
    pub ship_jump_range: Option<f64>,
    pub flags: FeatureFlags,
    pub range_policy: RangePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSource {
    Manual,
    Ship,
    Fallback,
}

/// Caller value when manual override is allowed, then the ship's computed
/// range, then the configured fallback. A caller value is ignored otherwise.
pub fn resolve_jump_range(
    caller: Option<f64>,
    ship: Option<f64>,
    policy: &RangePolicy,
) -> (f64, RangeSource) {
    let caller = caller.filter(|v| v.is_finite() && *v > 0.0);
    let ship = ship.filter(|v| v.is_finite() && *v > 0.0);
    if policy.allow_manual_override {
        if let Some(v) = caller {
            return (v, RangeSource::Manual);
        }
    }
    if policy.auto_use_ship_range {
        if let Some(v) = ship {
            return (v, RangeSource::Ship);
        }
    }
    (policy.fallback_ly, RangeSource::Fallback)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Builders
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct RoutePayload {
    pub mode: PlannerMode,
    pub endpoint_path: &'static str,
    pub fields: FormFields,
    /// Set when the configured fallback range was used; the caller reports it.
    pub range_source: Option<RangeSource>,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn start_system(req: &RouteRequest, ctx: &PayloadContext) -> Result<String, PlannerError> {
    non_empty(req.start.as_deref())
        .or_else(|| non_empty(ctx.current_system.as_deref()))
        .ok_or_else(|| PlannerError::input("START_SYSTEM_REQUIRED", "Start system is required"))
}

pub fn build_payload(
    mode: PlannerMode,
    req: &RouteRequest,
    ctx: &PayloadContext,
) -> Result<RoutePayload, PlannerError> {
    match mode {
        PlannerMode::Neutron => build_neutron(req, ctx),
        PlannerMode::Trade => build_trade(req, ctx),
        PlannerMode::Exobiology => build_exobiology(req, ctx),
        PlannerMode::Riches | PlannerMode::Ammonia | PlannerMode::Elw | PlannerMode::Hmc => {
            build_riches(mode, req, ctx)
        }
    }
}

pub fn build_neutron(req: &RouteRequest, ctx: &PayloadContext) -> Result<RoutePayload, PlannerError> {
    let from = start_system(req, ctx)?;
    let to = non_empty(req.destination.as_deref()).ok_or_else(|| {
        PlannerError::input("DESTINATION_REQUIRED", "Destination system is required")
    })?;
    let (range, source) = resolve_jump_range(req.jump_range, ctx.ship_jump_range, &ctx.range_policy);

    let mut fields = FormFields::default();
    fields
        .push("from", from)
        .push("to", to)
        .push_f64("range", range)
        .push_int("efficiency", u64::from(req.efficiency.unwrap_or(60).min(100)));
    if ctx.flags.neutron_via {
        for via in req.via.iter().map(|v| v.trim()).filter(|v| !v.is_empty()) {
            fields.push("via", via);
        }
    }
    let multiplier = if ctx.flags.neutron_overcharge && req.supercharge_overcharge {
        "6"
    } else {
        "4"
    };
    fields.push("supercharge_multiplier", multiplier);

    Ok(RoutePayload {
        mode: PlannerMode::Neutron,
        endpoint_path: PlannerMode::Neutron.endpoint_path(),
        fields,
        range_source: Some(source),
    })
}

fn push_body_plan_common(
    fields: &mut FormFields,
    req: &RouteRequest,
    ctx: &PayloadContext,
) -> Result<RangeSource, PlannerError> {
    let from = start_system(req, ctx)?;
    let (range, source) = resolve_jump_range(req.jump_range, ctx.ship_jump_range, &ctx.range_policy);
    fields.push("from", from);
    if let Some(to) = non_empty(req.destination.as_deref()) {
        fields.push("to", to);
    }
    fields
        .push_f64("range", range)
        .push_f64("radius", req.radius.unwrap_or(25.0))
        .push_int("max_results", u64::from(req.max_results.unwrap_or(100)))
        .push_int("max_distance", u64::from(req.max_distance.unwrap_or(1_000_000)));
    Ok(source)
}

pub fn build_riches(
    mode: PlannerMode,
    req: &RouteRequest,
    ctx: &PayloadContext,
) -> Result<RoutePayload, PlannerError> {
    let mut fields = FormFields::default();
    let source = push_body_plan_common(&mut fields, req, ctx)?;
    let default_min = if mode.family_body_type().is_some() {
        1
    } else {
        100_000
    };
    fields
        .push_int("min_value", req.min_value.unwrap_or(default_min))
        .push_bool("use_mapping_value", req.use_mapping_value)
        .push_bool("avoid_thargoids", req.avoid_thargoids)
        .push_bool("loop", req.loop_route);
    if let Some(body_type) = mode.family_body_type() {
        fields.push("body_types", body_type);
    }
    Ok(RoutePayload {
        mode,
        endpoint_path: mode.endpoint_path(),
        fields,
        range_source: Some(source),
    })
}

pub fn build_exobiology(
    req: &RouteRequest,
    ctx: &PayloadContext,
) -> Result<RoutePayload, PlannerError> {
    let mut fields = FormFields::default();
    let source = push_body_plan_common(&mut fields, req, ctx)?;
    fields
        .push_int("min_value", req.min_value.unwrap_or(10_000_000))
        .push_bool("avoid_thargoids", req.avoid_thargoids)
        .push_bool("loop", req.loop_route);
    Ok(RoutePayload {
        mode: PlannerMode::Exobiology,
        endpoint_path: PlannerMode::Exobiology.endpoint_path(),
        fields,
        range_source: Some(source),
    })
}

pub fn build_trade(req: &RouteRequest, ctx: &PayloadContext) -> Result<RoutePayload, PlannerError> {
    let system = start_system(req, ctx)?;
    let station = non_empty(req.start_station.as_deref()).ok_or_else(|| {
        PlannerError::input(
            "TRADE_STATION_REQUIRED",
            "A starting station is required for trade routes",
        )
    })?;

    let mut fields = FormFields::default();
    fields
        .push("system", system)
        .push("station", station)
        .push_int("starting_capital", req.starting_capital.unwrap_or(1_000_000))
        .push_int("max_cargo", u64::from(req.cargo_capacity.unwrap_or(0)))
        .push_f64("max_hop_distance", req.max_hop_distance.unwrap_or(30.0))
        .push_int("max_hops", u64::from(req.max_hops.unwrap_or(5)));
    if ctx.flags.trade_market_age {
        if let Some(age) = req.max_price_age {
            fields.push_int("max_price_age", age);
        }
    }
    fields
        .push_bool("requires_large_pad", req.requires_large_pad)
        .push_bool("allow_prohibited", req.allow_prohibited)
        .push_bool("allow_planetary", req.allow_planetary)
        .push_bool("allow_player_owned", req.allow_player_owned)
        .push_bool("unique", req.unique)
        .push_bool("permit", req.permit);

    Ok(RoutePayload {
        mode: PlannerMode::Trade,
        endpoint_path: PlannerMode::Trade.endpoint_path(),
        fields,
        range_source: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PayloadContext {
        PayloadContext {
            current_system: Some("Shinrarta Dezhra".into()),
            range_policy: RangePolicy {
                allow_manual_override: true,
                ..RangePolicy::default()
            },
            ..PayloadContext::default()
        }
    }

    fn neutron_request() -> RouteRequest {
        RouteRequest {
            start: Some("Sol".into()),
            destination: Some("Colonia".into()),
            jump_range: Some(42.5),
            efficiency: Some(60),
            ..RouteRequest::default()
        }
    }

    #[test]
    fn test_encoding_rules() {
        assert_eq!(encode_bool(true), "1");
        assert_eq!(encode_bool(false), "0");
        assert_eq!(encode_f64(42.0), "42");
        assert_eq!(encode_f64(42.50), "42.5");
        assert_eq!(encode_f64(0.123456789), "0.123457");
        assert_eq!(encode_f64(-0.0), "0");
    }

    #[test]
    fn test_neutron_fields_in_order() {
        let payload = build_neutron(&neutron_request(), &ctx()).unwrap();
        assert_eq!(payload.endpoint_path, "/route");
        let keys: Vec<&str> = payload.fields.as_slice().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["from", "to", "range", "efficiency", "supercharge_multiplier"]);
        assert_eq!(payload.fields.get("range"), Some("42.5"));
        assert_eq!(payload.fields.get("efficiency"), Some("60"));
        assert_eq!(payload.fields.get_all("supercharge_multiplier"), vec!["4"]);
    }

    #[test]
    fn test_neutron_overcharge_and_via() {
        let mut req = neutron_request();
        req.supercharge_overcharge = true;
        req.via = vec!["Sagittarius A*".into(), " ".into(), "Beagle Point".into()];
        let payload = build_neutron(&req, &ctx()).unwrap();
        assert_eq!(payload.fields.get("supercharge_multiplier"), Some("6"));
        assert_eq!(payload.fields.get_all("via"), vec!["Sagittarius A*", "Beagle Point"]);

        let flags = FeatureFlags {
            neutron_overcharge: false,
            neutron_via: false,
            ..FeatureFlags::default()
        };
        let off = PayloadContext { flags, ..ctx() };
        let payload = build_neutron(&req, &off).unwrap();
        assert_eq!(payload.fields.get("supercharge_multiplier"), Some("4"));
        assert!(payload.fields.get_all("via").is_empty());
    }

    #[test]
    fn test_builders_are_deterministic() {
        let req = RouteRequest {
            start: Some("Sol".into()),
            start_station: Some("Abraham Lincoln".into()),
            ..neutron_request()
        };
        for mode in PlannerMode::ALL {
            let a = build_payload(mode, &req, &ctx()).unwrap();
            let b = build_payload(mode, &req, &ctx()).unwrap();
            assert_eq!(a, b, "{}", mode.as_str());
            for (_, value) in a.fields.as_slice() {
                assert!(!value.ends_with(".0"), "{} {value}", mode.as_str());
            }
        }
    }

    #[test]
    fn test_start_falls_back_to_current_system() {
        let mut req = neutron_request();
        req.start = Some("   ".into());
        let payload = build_neutron(&req, &ctx()).unwrap();
        assert_eq!(payload.fields.get("from"), Some("Shinrarta Dezhra"));

        let no_session = PayloadContext::default();
        let err = build_neutron(&req, &no_session).unwrap_err();
        assert_eq!(err.code(), "START_SYSTEM_REQUIRED");
    }

    #[test]
    fn test_trade_requires_station() {
        let req = RouteRequest {
            start: Some("Sol".into()),
            start_station: Some(String::new()),
            ..RouteRequest::default()
        };
        let err = build_trade(&req, &ctx()).unwrap_err();
        assert_eq!(err.code(), "TRADE_STATION_REQUIRED");
    }

    #[test]
    fn test_trade_market_age_flag() {
        let req = RouteRequest {
            start: Some("Sol".into()),
            start_station: Some("Abraham Lincoln".into()),
            max_price_age: Some(86_400),
            requires_large_pad: true,
            ..RouteRequest::default()
        };
        let payload = build_trade(&req, &ctx()).unwrap();
        assert_eq!(payload.fields.get("max_price_age"), Some("86400"));
        assert_eq!(payload.fields.get("requires_large_pad"), Some("1"));
        assert_eq!(payload.fields.get("permit"), Some("0"));

        let flags = FeatureFlags {
            trade_market_age: false,
            ..FeatureFlags::default()
        };
        let payload = build_trade(&req, &PayloadContext { flags, ..ctx() }).unwrap();
        assert_eq!(payload.fields.get("max_price_age"), None);
    }

    #[test]
    fn test_family_modes_share_riches_endpoint() {
        let req = neutron_request();
        for (mode, body) in [
            (PlannerMode::Ammonia, "Ammonia world"),
            (PlannerMode::Elw, "Earth-like world"),
            (PlannerMode::Hmc, "High metal content world"),
        ] {
            let payload = build_payload(mode, &req, &ctx()).unwrap();
            assert_eq!(payload.endpoint_path, "/riches/route");
            assert_eq!(payload.fields.get_all("body_types"), vec![body]);
            assert_eq!(payload.fields.get("min_value"), Some("1"));
        }
        let riches = build_payload(PlannerMode::Riches, &req, &ctx()).unwrap();
        assert!(riches.fields.get_all("body_types").is_empty());
    }

    #[test]
    fn test_jump_range_precedence() {
        let policy = RangePolicy::default();
        assert_eq!(resolve_jump_range(Some(42.5), Some(55.0), &policy), (55.0, RangeSource::Ship));
        assert_eq!(resolve_jump_range(Some(42.5), None, &policy), (30.0, RangeSource::Fallback));
        assert_eq!(resolve_jump_range(None, None, &policy), (30.0, RangeSource::Fallback));

        let no_ship = RangePolicy {
            auto_use_ship_range: false,
            ..policy
        };
        assert_eq!(resolve_jump_range(Some(42.5), Some(55.0), &no_ship), (30.0, RangeSource::Fallback));

        let manual = RangePolicy {
            allow_manual_override: true,
            ..policy
        };
        assert_eq!(resolve_jump_range(Some(42.5), Some(55.0), &manual), (42.5, RangeSource::Manual));
        assert_eq!(resolve_jump_range(None, Some(55.0), &manual), (55.0, RangeSource::Ship));
    }

    #[test]
    fn test_json_body_groups_repeated_keys() {
        let mut fields = FormFields::default();
        fields.push("from", "Sol").push("via", "A").push("via", "B");
        assert_eq!(
            fields.to_json(),
            serde_json::json!({"from": "Sol", "via": ["A", "B"]})
        );
    }
}
