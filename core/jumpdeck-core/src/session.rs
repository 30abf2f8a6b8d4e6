//! Session state reconstructed from the journal and status files.
//!
//! Only the event handler mutates it (journal lines and watcher polls run on
//! the same thread). Readers get published copies over the bus; the
//! synchronous payload-build path takes a short read lock via [`SessionHandle::snapshot`].

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// Ship
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineeringModifier {
    pub label: String,
    pub value: f64,
    #[serde(default)]
    pub original_value: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FsdInfo {
    /// Journal item id, e.g. `int_hyperdrive_size5_class5`.
    pub item: String,
    pub class: u8,
    /// Rating letter A–E.
    pub rating: char,
    #[serde(default)]
    pub overcharge: bool,
    #[serde(default)]
    pub modifiers: Vec<EngineeringModifier>,
    #[serde(default)]
    pub experimental_effect: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FsdBooster {
    pub present: bool,
    pub class: u8,
    /// Always >= 0.
    pub bonus_ly: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitedBy {
    Fuel,
    Mass,
    #[default]
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShipState {
    pub ship_id: Option<u64>,
    pub ship_type: Option<String>,
    pub unladen_mass_t: Option<f64>,
    pub cargo_mass_t: f64,
    pub cargo_capacity_t: Option<f64>,
    pub fuel_main_t: Option<f64>,
    pub fuel_reservoir_t: Option<f64>,
    pub fuel_capacity_main_t: Option<f64>,
    pub fuel_capacity_reserve_t: Option<f64>,
    pub fsd: Option<FsdInfo>,
    #[serde(default)]
    pub fsd_booster: FsdBooster,
    pub jump_range_current_ly: Option<f64>,
    pub jump_range_max_ly: Option<f64>,
    #[serde(default)]
    pub jump_range_limited_by: LimitedBy,
    pub jump_range_fuel_needed_t: Option<f64>,
    /// Error code of the last failed computation, if any.
    pub jump_range_error: Option<String>,
    #[serde(default)]
    pub engineering_source: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Session
// ═══════════════════════════════════════════════════════════════════════════════

/// In-game plotted route from `NavRoute.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavRoute {
    pub systems: Vec<String>,
}

impl NavRoute {
    pub fn endpoint(&self) -> Option<&str> {
        self.systems.last().map(String::as_str)
    }

    pub fn contains_norm(&self, system_norm: &str) -> bool {
        self.systems
            .iter()
            .any(|s| normalize_system(s) == system_norm)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub current_system: Option<String>,
    pub current_station: Option<String>,
    pub is_docked: bool,
    pub has_live_system_event: bool,
    pub bootstrap_replay: bool,
    pub in_transit: bool,
    pub nav_route: Option<NavRoute>,
    pub ship_state: ShipState,
    /// Commodity name (lowercase) -> count carried.
    pub cargo: BTreeMap<String, u32>,
    pub has_illegal_cargo: bool,
}

/// Shared handle; the event handler is the only writer.
#[derive(Clone, Default)]
pub struct SessionHandle {
    inner: Arc<RwLock<SessionState>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SessionState {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        match self.inner.read() {
            Ok(guard) => f(&*guard),
            Err(poisoned) => f(&*poisoned.into_inner()),
        }
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        match self.inner.write() {
            Ok(mut guard) => f(&mut *guard),
            Err(poisoned) => f(&mut *poisoned.into_inner()),
        }
    }

    pub fn current_system(&self) -> Option<String> {
        self.read(|s| s.current_system.clone())
    }

    pub fn jump_range_ly(&self) -> Option<f64> {
        self.read(|s| s.ship_state.jump_range_current_ly)
    }
}

/// Casefolds and collapses internal whitespace: `"  Col 285   Sector "` -> `"col 285 sector"`.
pub fn normalize_system(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_system() {
        assert_eq!(normalize_system("  Col 285   Sector\tAB-C "), "col 285 sector ab-c");
        assert_eq!(normalize_system("SOL"), "sol");
        assert_eq!(normalize_system(""), "");
    }

    #[test]
    fn test_nav_route_endpoint_and_membership() {
        let route = NavRoute {
            systems: vec!["Sol".into(), "Barnard's Star".into(), "Wolf 359".into()],
        };
        assert_eq!(route.endpoint(), Some("Wolf 359"));
        assert!(route.contains_norm("barnard's star"));
        assert!(!route.contains_norm("colonia"));
    }

    #[test]
    fn test_handle_update_and_snapshot() {
        let handle = SessionHandle::new();
        handle.update(|s| {
            s.current_system = Some("Sol".into());
            s.ship_state.jump_range_current_ly = Some(42.5);
        });
        assert_eq!(handle.current_system().as_deref(), Some("Sol"));
        assert_eq!(handle.jump_range_ly(), Some(42.5));
        assert!(!handle.snapshot().is_docked);
    }
}
