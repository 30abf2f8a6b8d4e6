//! Jump range computation from ship loadout, fuel and modifiers.
//!
//! Pure: no I/O besides [`ModulesData::from_json_file`], which callers invoke once.
//!
//! ```text
//! total_mass  = unladen + cargo + fuel_main (+ reservoir when enabled)
//! base_range  = (1000 * fuel / fuel_multiplier) ^ (1 / fuel_power) * opt_mass / total_mass
//! final_range = base_range + booster_bonus
//! ```
//!
//! `fuel` is the lesser of the drive's max fuel per jump and the fuel in the main tank.

use std::path::Path;

use fs_err as fs;
use serde::{Deserialize, Serialize};

use crate::config::ConfigStore;
use crate::error::{NavError, Result};
use crate::session::{FsdInfo, LimitedBy, ShipState};

// ═══════════════════════════════════════════════════════════════════════════════
// Modules dataset
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsdSpec {
    pub class: u8,
    pub rating: char,
    #[serde(default)]
    pub overcharge: bool,
    pub opt_mass: f64,
    pub max_fuel: f64,
    pub fuel_multiplier: f64,
    pub fuel_power: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoosterSpec {
    pub class: u8,
    pub bonus_ly: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModulesData {
    pub fsd: Vec<FsdSpec>,
    pub boosters: Vec<BoosterSpec>,
}

const FSD_OPT_MASS: [(u8, [f64; 5]); 6] = [
    // class, [E, D, C, B, A]
    (2, [48.0, 54.0, 60.0, 75.0, 90.0]),
    (3, [80.0, 90.0, 100.0, 125.0, 150.0]),
    (4, [280.0, 315.0, 350.0, 438.0, 525.0]),
    (5, [560.0, 630.0, 700.0, 875.0, 1050.0]),
    (6, [960.0, 1080.0, 1200.0, 1500.0, 1800.0]),
    (7, [1440.0, 1620.0, 1800.0, 2250.0, 2700.0]),
];

const FSD_MAX_FUEL: [(u8, [f64; 5]); 6] = [
    (2, [0.6, 0.6, 0.6, 0.8, 0.9]),
    (3, [1.2, 1.2, 1.2, 1.5, 1.8]),
    (4, [2.0, 2.0, 2.0, 2.5, 3.0]),
    (5, [3.3, 3.3, 3.3, 4.1, 5.0]),
    (6, [5.3, 5.3, 5.3, 6.6, 8.0]),
    (7, [8.5, 8.5, 8.5, 10.6, 12.8]),
];

const RATINGS: [char; 5] = ['E', 'D', 'C', 'B', 'A'];
const RATING_MULTIPLIER: [f64; 5] = [11.0, 10.0, 8.0, 10.0, 12.0];

fn fuel_power(class: u8) -> f64 {
    2.0 + 0.15 * f64::from(class.saturating_sub(2))
}

impl ModulesData {
    /// Standard frame shift drives (classes 2–7) and guardian boosters (classes 1–5).
    pub fn builtin() -> Self {
        let mut fsd = Vec::new();
        for ((class, masses), (_, fuels)) in FSD_OPT_MASS.iter().zip(FSD_MAX_FUEL.iter()) {
            for i in 0..RATINGS.len() {
                fsd.push(FsdSpec {
                    class: *class,
                    rating: RATINGS[i],
                    overcharge: false,
                    opt_mass: masses[i],
                    max_fuel: fuels[i],
                    fuel_multiplier: RATING_MULTIPLIER[i],
                    fuel_power: fuel_power(*class),
                });
            }
        }
        let boosters = [(1, 4.0), (2, 6.0), (3, 7.75), (4, 9.25), (5, 10.5)]
            .into_iter()
            .map(|(class, bonus_ly)| BoosterSpec { class, bonus_ly })
            .collect();
        Self { fsd, boosters }
    }

    /// Loads a dataset file and layers it over the built-in tables.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| NavError::io(format!("read modules data {}", path.display()), e))?;
        let extra: ModulesData = serde_json::from_str(&content)
            .map_err(|e| NavError::json(format!("parse modules data {}", path.display()), e))?;
        let mut data = Self::builtin();
        for spec in extra.fsd {
            data.fsd.retain(|s| {
                !(s.class == spec.class && s.rating == spec.rating && s.overcharge == spec.overcharge)
            });
            data.fsd.push(spec);
        }
        for booster in extra.boosters {
            data.boosters.retain(|b| b.class != booster.class);
            data.boosters.push(booster);
        }
        Ok(data)
    }

    pub fn load_configured(config: &ConfigStore) -> Self {
        let path = config.get_string("modules_data_path", "");
        if path.trim().is_empty() {
            return Self::builtin();
        }
        match Self::from_json_file(Path::new(path.trim())) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to load modules data; using built-in tables");
                Self::builtin()
            }
        }
    }

    /// Overcharge drives without a dedicated entry resolve to the standard one.
    pub fn fsd_spec(&self, class: u8, rating: char, overcharge: bool) -> Option<&FsdSpec> {
        let rating = rating.to_ascii_uppercase();
        let find = |oc: bool| {
            self.fsd
                .iter()
                .find(|s| s.class == class && s.rating == rating && s.overcharge == oc)
        };
        if overcharge {
            find(true).or_else(|| find(false))
        } else {
            find(false)
        }
    }

    pub fn booster_bonus(&self, class: u8) -> Option<f64> {
        self.boosters
            .iter()
            .find(|b| b.class == class)
            .map(|b| b.bonus_ly)
    }
}

/// Parses `int_hyperdrive_size5_class5` / `int_hyperdrive_overcharge_size5_class3`.
/// `classN` maps 1..=5 to ratings E..A.
pub fn parse_fsd_item(item: &str) -> Option<(u8, char, bool)> {
    let item = item.trim().to_ascii_lowercase();
    let rest = item.strip_prefix("int_hyperdrive_")?;
    let (overcharge, rest) = match rest.strip_prefix("overcharge_") {
        Some(r) => (true, r),
        None => (false, rest),
    };
    let mut parts = rest.split('_');
    let size: u8 = parts.next()?.strip_prefix("size")?.parse().ok()?;
    let grade: usize = parts.next()?.strip_prefix("class")?.parse().ok()?;
    let rating = *RATINGS.get(grade.checked_sub(1)?)?;
    Some((size, rating, overcharge))
}

/// Parses `int_guardianfsdbooster_size3`.
pub fn parse_booster_item(item: &str) -> Option<u8> {
    item.trim()
        .to_ascii_lowercase()
        .strip_prefix("int_guardianfsdbooster_size")?
        .parse()
        .ok()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Computation
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineeringSource {
    None,
    Modifiers,
    Experimental,
}

impl EngineeringSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineeringSource::None => "none",
            EngineeringSource::Modifiers => "modifiers",
            EngineeringSource::Experimental => "experimental",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct JumpRangeOptions {
    pub include_reservoir_mass: bool,
    pub engineering_enabled: bool,
    pub rounding: u32,
}

impl Default for JumpRangeOptions {
    fn default() -> Self {
        Self {
            include_reservoir_mass: false,
            engineering_enabled: true,
            rounding: 2,
        }
    }
}

impl JumpRangeOptions {
    pub fn from_config(config: &ConfigStore) -> Self {
        Self {
            include_reservoir_mass: config.get_bool("jump_range_include_reservoir_mass", false),
            engineering_enabled: config.get_bool("jump_range_engineering_enabled", true),
            rounding: config.get_u64("jump_range_rounding", 2).min(6) as u32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JumpRangeResult {
    pub ok: bool,
    pub error: Option<String>,
    /// Range with present fuel and cargo.
    pub jump_range_ly: Option<f64>,
    /// Range with no cargo and a full main tank.
    pub max_range_ly: Option<f64>,
    pub limited_by: LimitedBy,
    pub fuel_needed_t: Option<f64>,
    pub engineering_source: EngineeringSource,
    pub opt_mass: Option<f64>,
    pub max_fuel: Option<f64>,
}

impl JumpRangeResult {
    fn failed(code: &str) -> Self {
        Self {
            ok: false,
            error: Some(code.to_string()),
            jump_range_ly: None,
            max_range_ly: None,
            limited_by: LimitedBy::None,
            fuel_needed_t: None,
            engineering_source: EngineeringSource::None,
            opt_mass: None,
            max_fuel: None,
        }
    }
}

fn modifier_value(fsd: &FsdInfo, labels: &[&str]) -> Option<f64> {
    fsd.modifiers
        .iter()
        .find(|m| {
            let label = m.label.replace(' ', "").to_ascii_lowercase();
            labels.iter().any(|l| *l == label)
        })
        .map(|m| m.value)
        .filter(|v| v.is_finite() && *v > 0.0)
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

fn range_for(opt_mass: f64, fuel: f64, spec: &FsdSpec, total_mass: f64) -> f64 {
    (1000.0 * fuel / spec.fuel_multiplier).powf(1.0 / spec.fuel_power) * opt_mass / total_mass
}

pub fn compute(ship: &ShipState, data: &ModulesData, opts: &JumpRangeOptions) -> JumpRangeResult {
    let Some(fsd) = ship.fsd.as_ref() else {
        return JumpRangeResult::failed("missing_fsd");
    };
    let Some(spec) = data.fsd_spec(fsd.class, fsd.rating, fsd.overcharge) else {
        return JumpRangeResult::failed("unknown_fsd");
    };
    let Some(unladen) = ship.unladen_mass_t.filter(|m| *m > 0.0) else {
        return JumpRangeResult::failed("missing_unladen_mass");
    };
    let Some(fuel_main) = ship.fuel_main_t.or(ship.fuel_capacity_main_t) else {
        return JumpRangeResult::failed("missing_fuel");
    };
    let reservoir = if opts.include_reservoir_mass {
        match ship.fuel_reservoir_t {
            Some(r) => r.max(0.0),
            None => return JumpRangeResult::failed("missing_reservoir_mass"),
        }
    } else {
        0.0
    };

    let mut opt_mass = spec.opt_mass;
    let mut max_fuel = spec.max_fuel;
    let mut source = EngineeringSource::None;
    if opts.engineering_enabled {
        if let Some(v) = modifier_value(fsd, &["fsdoptimalmass"]) {
            opt_mass = v;
            source = EngineeringSource::Modifiers;
        }
        if let Some(v) = modifier_value(fsd, &["maxfuelperjump", "fsdmaxfuelperjump"]) {
            max_fuel = v;
            source = EngineeringSource::Modifiers;
        }
        if fsd
            .experimental_effect
            .as_deref()
            .map(|e| !e.trim().is_empty())
            .unwrap_or(false)
        {
            source = EngineeringSource::Experimental;
        }
    }

    let fuel_main = fuel_main.max(0.0);
    let fuel_used = max_fuel.min(fuel_main);
    if fuel_used <= 0.0 {
        let mut result = JumpRangeResult::failed("no_fuel");
        result.limited_by = LimitedBy::Fuel;
        return result;
    }

    let booster = if ship.fsd_booster.present {
        ship.fsd_booster.bonus_ly.max(0.0)
    } else {
        0.0
    };

    let total_mass = unladen + ship.cargo_mass_t.max(0.0) + fuel_main + reservoir;
    let current = range_for(opt_mass, fuel_used, spec, total_mass) + booster;

    let tank = ship.fuel_capacity_main_t.unwrap_or(fuel_main).max(0.0);
    let max_total = unladen + tank + reservoir;
    let max_range = if tank > 0.0 {
        Some(range_for(opt_mass, max_fuel.min(tank), spec, max_total) + booster)
    } else {
        None
    };

    let limited_by = if fuel_main < max_fuel {
        LimitedBy::Fuel
    } else {
        LimitedBy::Mass
    };

    JumpRangeResult {
        ok: true,
        error: None,
        jump_range_ly: Some(round_to(current, opts.rounding)),
        max_range_ly: max_range.map(|r| round_to(r, opts.rounding)),
        limited_by,
        fuel_needed_t: Some(round_to(fuel_used, 2)),
        engineering_source: source,
        opt_mass: Some(opt_mass),
        max_fuel: Some(max_fuel),
    }
}

/// Writes a result back onto the ship record.
pub fn apply_result(ship: &mut ShipState, result: &JumpRangeResult) {
    ship.jump_range_current_ly = result.jump_range_ly;
    ship.jump_range_max_ly = result.max_range_ly;
    ship.jump_range_limited_by = result.limited_by;
    ship.jump_range_fuel_needed_t = result.fuel_needed_t;
    ship.jump_range_error = result.error.clone();
    ship.engineering_source = Some(result.engineering_source.as_str().to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{EngineeringModifier, FsdBooster};

    fn ship() -> ShipState {
        ShipState {
            ship_type: Some("anaconda".into()),
            unladen_mass_t: Some(400.0),
            cargo_mass_t: 0.0,
            fuel_main_t: Some(32.0),
            fuel_capacity_main_t: Some(32.0),
            fsd: Some(FsdInfo {
                item: "int_hyperdrive_size5_class5".into(),
                class: 5,
                rating: 'A',
                ..FsdInfo::default()
            }),
            ..ShipState::default()
        }
    }

    #[test]
    fn test_parse_items() {
        assert_eq!(parse_fsd_item("Int_Hyperdrive_Size5_Class5"), Some((5, 'A', false)));
        assert_eq!(parse_fsd_item("int_hyperdrive_size3_class1"), Some((3, 'E', false)));
        assert_eq!(
            parse_fsd_item("int_hyperdrive_overcharge_size6_class3"),
            Some((6, 'C', true))
        );
        assert_eq!(parse_fsd_item("int_hyperdrive_size5_class9"), None);
        assert_eq!(parse_booster_item("int_guardianfsdbooster_size5"), Some(5));
        assert_eq!(parse_booster_item("int_shieldgenerator_size5_class3"), None);
    }

    #[test]
    fn test_standard_formula() {
        let result = compute(&ship(), &ModulesData::builtin(), &JumpRangeOptions::default());
        assert!(result.ok);
        // (1000 * 5 / 12) ^ (1 / 2.45) * 1050 / 432
        let expected = (1000.0f64 * 5.0 / 12.0).powf(1.0 / 2.45) * 1050.0 / 432.0;
        assert_eq!(result.jump_range_ly, Some(round_to(expected, 2)));
        assert_eq!(result.limited_by, LimitedBy::Mass);
        assert_eq!(result.engineering_source, EngineeringSource::None);
    }

    #[test]
    fn test_booster_and_engineering() {
        let mut s = ship();
        s.fsd_booster = FsdBooster {
            present: true,
            class: 5,
            bonus_ly: 10.5,
        };
        if let Some(fsd) = s.fsd.as_mut() {
            fsd.modifiers.push(EngineeringModifier {
                label: "FSDOptimalMass".into(),
                value: 1627.5,
                original_value: Some(1050.0),
            });
            fsd.experimental_effect = Some("special_fsd_heavy".into());
        }
        let with = compute(&s, &ModulesData::builtin(), &JumpRangeOptions::default());
        let base = compute(&ship(), &ModulesData::builtin(), &JumpRangeOptions::default());
        assert!(with.jump_range_ly.unwrap() > base.jump_range_ly.unwrap() + 10.5);
        assert_eq!(with.engineering_source, EngineeringSource::Experimental);

        let opts = JumpRangeOptions {
            engineering_enabled: false,
            ..JumpRangeOptions::default()
        };
        let plain = compute(&s, &ModulesData::builtin(), &opts);
        assert_eq!(plain.engineering_source, EngineeringSource::None);
        assert_eq!(plain.opt_mass, Some(1050.0));
    }

    #[test]
    fn test_less_cargo_never_shortens_range() {
        let data = ModulesData::builtin();
        let opts = JumpRangeOptions::default();
        let mut previous = 0.0;
        for cargo in (0..=256).rev().step_by(16) {
            let mut s = ship();
            s.cargo_mass_t = f64::from(cargo);
            let range = compute(&s, &data, &opts).jump_range_ly.unwrap();
            assert!(range >= previous, "cargo {cargo}: {range} < {previous}");
            previous = range;
        }
    }

    #[test]
    fn test_missing_reservoir_mass() {
        let opts = JumpRangeOptions {
            include_reservoir_mass: true,
            ..JumpRangeOptions::default()
        };
        let result = compute(&ship(), &ModulesData::builtin(), &opts);
        assert!(!result.ok);
        assert_eq!(result.error.as_deref(), Some("missing_reservoir_mass"));
        assert_eq!(result.jump_range_ly, None);
    }

    #[test]
    fn test_low_fuel_limits_range() {
        let mut s = ship();
        s.fuel_main_t = Some(2.0);
        let result = compute(&s, &ModulesData::builtin(), &JumpRangeOptions::default());
        assert!(result.ok);
        assert_eq!(result.limited_by, LimitedBy::Fuel);
        assert_eq!(result.fuel_needed_t, Some(2.0));
        assert!(result.jump_range_ly.unwrap() < result.max_range_ly.unwrap());
    }

    #[test]
    fn test_missing_fsd() {
        let mut s = ship();
        s.fsd = None;
        let result = compute(&s, &ModulesData::builtin(), &JumpRangeOptions::default());
        assert_eq!(result.error.as_deref(), Some("missing_fsd"));
    }

    #[test]
    fn test_modules_file_overrides_builtin() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("modules.json");
        std::fs::write(
            &path,
            r#"{"fsd": [{"class": 5, "rating": "A", "overcharge": true, "opt_mass": 1175,
                 "max_fuel": 5.2, "fuel_multiplier": 13, "fuel_power": 2.45}], "boosters": []}"#,
        )
        .unwrap();
        let data = ModulesData::from_json_file(&path).unwrap();
        assert_eq!(data.fsd_spec(5, 'A', true).unwrap().opt_mass, 1175.0);
        assert_eq!(data.fsd_spec(5, 'A', false).unwrap().opt_mass, 1050.0);
        assert_eq!(data.booster_bonus(3), Some(7.75));
    }
}
