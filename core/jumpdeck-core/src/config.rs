//! Process-wide settings store with JSON-file persistence.
//!
//! The snapshot is merged on load from built-in defaults, a legacy file
//! (migrated only when no active file exists yet) and the active settings
//! file. Keys are flat dotted strings such as `features.spansh.neutron_via_enabled`;
//! nested objects are stored as values and never flattened.
//!
//! `save(partial)` merges into the in-memory snapshot and rewrites the file in
//! full via temp file + rename. The file on disk is the durable source of truth.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use fs_err as fs;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{NavError, Result};
use crate::storage::StorageConfig;

// ═══════════════════════════════════════════════════════════════════════════════
// Enumerated settings
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardMode {
    FullRoute,
    NextHop,
}

impl ClipboardMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "FULL_ROUTE" => Some(ClipboardMode::FullRoute),
            "NEXT_HOP" => Some(ClipboardMode::NextHop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextHopTrigger {
    FsdJump,
    Location,
    Both,
}

impl NextHopTrigger {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fsdjump" => Some(NextHopTrigger::FsdJump),
            "location" => Some(NextHopTrigger::Location),
            "both" => Some(NextHopTrigger::Both),
            _ => None,
        }
    }

    /// Whether an event tagged `event_trigger` should drive the cursor.
    pub fn accepts(self, event_trigger: NextHopTrigger) -> bool {
        self == NextHopTrigger::Both || self == event_trigger
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncPolicy {
    NearestForward,
    Strict,
}

impl ResyncPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "nearest_forward" => Some(ResyncPolicy::NearestForward),
            "strict" => Some(ResyncPolicy::Strict),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeOn {
    Loadout,
    StatusChange,
    Both,
}

impl ComputeOn {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "loadout" => Some(ComputeOn::Loadout),
            "status_change" => Some(ComputeOn::StatusChange),
            "both" => Some(ComputeOn::Both),
            _ => None,
        }
    }

    pub fn on_loadout(self) -> bool {
        matches!(self, ComputeOn::Loadout | ComputeOn::Both)
    }

    pub fn on_status_change(self) -> bool {
        matches!(self, ComputeOn::StatusChange | ComputeOn::Both)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Defaults
// ═══════════════════════════════════════════════════════════════════════════════

/// Built-in defaults for every key the core reads.
pub fn default_settings() -> Map<String, Value> {
    let defaults = json!({
        "log_dir": "",
        "auto_clipboard": true,
        "auto_clipboard_mode": "NEXT_HOP",
        "auto_clipboard_next_hop_trigger": "both",
        "auto_clipboard_next_hop_resync_policy": "nearest_forward",
        "auto_clipboard_next_hop_desync_confirm_jumps": 2,
        "auto_clipboard_next_hop_allow_manual_advance": true,
        "auto_clipboard_next_hop_copy_on_route_ready": false,
        "spansh_base_url": "https://spansh.co.uk/api",
        "spansh_timeout": 20,
        "spansh_retries": 2,
        "spansh_poll_interval": 2.0,
        "spansh_max_polls": 60,
        "spansh_contact_email": "jumpdeck@users.noreply.github.com",
        "planner_auto_use_ship_jump_range": true,
        "planner_allow_manual_range_override": false,
        "planner_fallback_range_ly": 30.0,
        "jump_range_include_reservoir_mass": false,
        "jump_range_engineering_enabled": true,
        "jump_range_compute_on": "both",
        "jump_range_rounding": 2,
        "features.spansh.form_urlencoded_enabled": true,
        "features.spansh.neutron_overcharge_enabled": true,
        "features.spansh.neutron_via_enabled": true,
        "features.spansh.trade_market_age_enabled": true,
        "voice_enabled": true,
        "voice_cooldown_seconds": 3.0,
        "voice_cooldown_nav": 4.0,
        "voice_cooldown_route": 4.0,
        "voice_cooldown_alert": 10.0,
        "voice_cooldown_explore": 6.0,
        "voice_cooldown_info": 8.0,
        "suggest_fallback_enabled": true,
        "suggest_debounce_seconds": 0.8,
        "market_jackpot_rules": [
            { "commodity": "tritium", "max_buy": 40000 },
            { "commodity": "lowtemperaturediamond", "min_sell": 1500000 },
            { "commodity": "painite", "min_sell": 800000 },
            { "commodity": "platinum", "min_sell": 280000 }
        ],
        "smuggler_illegal_commodities": [
            "slaves", "imperialslaves", "battleweapons", "narcotics", "onionheadc"
        ],
        "fuel_critical_fraction": 0.25,
        "exploration_high_value_classes": [
            "Earthlike body", "Water world", "Ammonia world"
        ],
        "modules_data_path": ""
    });
    match defaults {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Thread-safe settings snapshot backed by a JSON file.
///
/// Create with [`ConfigStore::load`] for production or
/// [`ConfigStore::in_memory`] for tests.
pub struct ConfigStore {
    path: Option<PathBuf>,
    snapshot: RwLock<Map<String, Value>>,
}

impl ConfigStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            snapshot: RwLock::new(default_settings()),
        }
    }

    /// In-memory store with defaults overlaid by `overrides`.
    pub fn in_memory_with(overrides: Value) -> Self {
        let mut snapshot = default_settings();
        if let Value::Object(map) = overrides {
            snapshot.extend(map);
        }
        Self {
            path: None,
            snapshot: RwLock::new(snapshot),
        }
    }

    pub fn load(storage: &StorageConfig) -> Self {
        let legacy = storage.legacy_settings_file();
        Self::load_from(storage.settings_file(), Some(&legacy))
    }

    pub fn load_from(path: &Path, legacy: Option<&Path>) -> Self {
        let mut snapshot = default_settings();
        let mut needs_rewrite = false;

        if path.exists() {
            match read_object(path) {
                Some(active) => snapshot.extend(active),
                None => {
                    warn!(
                        path = %path.display(),
                        "Settings file unreadable or not an object; replacing with defaults"
                    );
                    needs_rewrite = true;
                }
            }
        } else {
            needs_rewrite = true;
            if let Some(legacy_path) = legacy.filter(|p| p.exists()) {
                if let Some(old) = read_object(legacy_path) {
                    info!(
                        path = %legacy_path.display(),
                        keys = old.len(),
                        "Migrating legacy settings"
                    );
                    snapshot.extend(old);
                }
            }
        }

        let store = Self {
            path: Some(path.to_path_buf()),
            snapshot: RwLock::new(snapshot),
        };

        if needs_rewrite {
            if let Err(err) = store.persist() {
                warn!(error = %err, "Failed to write settings file");
            }
        }
        store
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the value at `key`, or `default` when absent or null.
    pub fn get(&self, key: &str, default: Value) -> Value {
        let snapshot = match self.snapshot.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match snapshot.get(key) {
            Some(Value::Null) | None => default,
            Some(value) => value.clone(),
        }
    }

    /// Merges `partial` into the snapshot and rewrites the file in full.
    pub fn save(&self, partial: Map<String, Value>) -> Result<()> {
        {
            let mut snapshot = match self.snapshot.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            snapshot.extend(partial);
        }
        self.persist()
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let content = to_pretty_json(&Value::Object(self.snapshot()))
            .map_err(|e| NavError::json("serialize settings", e))?;
        write_atomic(path, content.as_bytes())?;
        debug!(path = %path.display(), "Settings saved");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Typed accessors
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key, Value::Bool(default)) {
            Value::Bool(b) => b,
            Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(default),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => default,
            },
            _ => default,
        }
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        match self.get(key, json!(default)) {
            Value::Number(n) => n.as_f64().unwrap_or(default),
            Value::String(s) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        match self.get(key, json!(default)) {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64))
                .unwrap_or(default),
            Value::String(s) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        match self.get(key, Value::String(default.to_string())) {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => default.to_string(),
        }
    }

    pub fn get_str_list(&self, key: &str) -> Vec<String> {
        match self.get(key, Value::Array(Vec::new())) {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn clipboard_mode(&self) -> ClipboardMode {
        ClipboardMode::parse(&self.get_string("auto_clipboard_mode", "NEXT_HOP"))
            .unwrap_or(ClipboardMode::NextHop)
    }

    pub fn next_hop_trigger(&self) -> NextHopTrigger {
        NextHopTrigger::parse(&self.get_string("auto_clipboard_next_hop_trigger", "both"))
            .unwrap_or(NextHopTrigger::Both)
    }

    pub fn resync_policy(&self) -> ResyncPolicy {
        ResyncPolicy::parse(&self.get_string(
            "auto_clipboard_next_hop_resync_policy",
            "nearest_forward",
        ))
        .unwrap_or(ResyncPolicy::NearestForward)
    }

    pub fn compute_on(&self) -> ComputeOn {
        ComputeOn::parse(&self.get_string("jump_range_compute_on", "both"))
            .unwrap_or(ComputeOn::Both)
    }

    /// Confirm-jumps threshold; never below 1.
    pub fn desync_confirm_jumps(&self) -> u32 {
        self.get_u64("auto_clipboard_next_hop_desync_confirm_jumps", 2)
            .clamp(1, u32::MAX as u64) as u32
    }
}

fn read_object(path: &Path) -> Option<Map<String, Value>> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Pretty JSON with a 4-space indent.
pub fn to_pretty_json<T: Serialize>(value: &T) -> std::result::Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Writes `bytes` to `path` through a temp file in the same directory.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| NavError::ConfigWriteFailed {
        path: path.to_path_buf(),
        details: "path has no parent directory".to_string(),
    })?;
    fs::create_dir_all(parent).map_err(|e| NavError::io("create parent directory", e))?;

    let mut temp_file =
        NamedTempFile::new_in(parent).map_err(|e| NavError::io("create temp file", e))?;
    temp_file
        .write_all(bytes)
        .map_err(|e| NavError::io("write temp file", e))?;
    temp_file
        .flush()
        .map_err(|e| NavError::io("flush temp file", e))?;
    temp_file
        .persist(path)
        .map_err(|e| NavError::ConfigWriteFailed {
            path: path.to_path_buf(),
            details: e.error.to_string(),
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");

        let store = ConfigStore::load_from(&path, None);

        assert!(path.exists());
        assert!(store.get_bool("auto_clipboard", false));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\n    \"auto_clipboard\""));
    }

    #[test]
    fn test_save_then_reload_round_trips_and_keeps_unknown_keys() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"legacy_window_geometry": "800x600", "spansh_retries": 5}"#,
        )
        .unwrap();

        let store = ConfigStore::load_from(&path, None);
        let mut partial = Map::new();
        partial.insert("auto_clipboard_mode".into(), json!("FULL_ROUTE"));
        partial.insert("planner_fallback_range_ly".into(), json!(17.25));
        partial.insert("columns".into(), json!({"trade": ["profit", "from"]}));
        store.save(partial).unwrap();

        let reloaded = ConfigStore::load_from(&path, None);
        assert_eq!(reloaded.get("auto_clipboard_mode", Value::Null), json!("FULL_ROUTE"));
        assert_eq!(reloaded.get_f64("planner_fallback_range_ly", 0.0), 17.25);
        assert_eq!(
            reloaded.get("columns", Value::Null),
            json!({"trade": ["profit", "from"]})
        );
        assert_eq!(
            reloaded.get("legacy_window_geometry", Value::Null),
            json!("800x600")
        );
        assert_eq!(reloaded.get_u64("spansh_retries", 0), 5);
    }

    #[test]
    fn test_corrupt_file_is_replaced() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        let store = ConfigStore::load_from(&path, None);
        assert_eq!(store.get_string("auto_clipboard_mode", ""), "NEXT_HOP");

        let rewritten: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(rewritten.is_object());
    }

    #[test]
    fn test_legacy_file_migrates_when_active_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        let legacy = temp.path().join("user_settings.json");
        std::fs::write(&legacy, r#"{"log_dir": "/journals"}"#).unwrap();

        let store = ConfigStore::load_from(&path, Some(&legacy));
        assert_eq!(store.get_string("log_dir", ""), "/journals");

        let on_disk: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["log_dir"], json!("/journals"));
    }

    #[test]
    fn test_non_ascii_is_not_escaped() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        let store = ConfigStore::load_from(&path, None);

        let mut partial = Map::new();
        partial.insert("last_target".into(), json!("Col 285 Sector → Örn"));
        store.save(partial).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Col 285 Sector → Örn"));
    }

    #[test]
    fn test_typed_accessors_tolerate_strings() {
        let store = ConfigStore::in_memory_with(json!({
            "auto_clipboard": "off",
            "spansh_timeout": "45",
            "auto_clipboard_next_hop_desync_confirm_jumps": 0,
            "auto_clipboard_next_hop_trigger": "FSDJump",
        }));
        assert!(!store.get_bool("auto_clipboard", true));
        assert_eq!(store.get_u64("spansh_timeout", 20), 45);
        assert_eq!(store.desync_confirm_jumps(), 1);
        assert_eq!(store.next_hop_trigger(), NextHopTrigger::FsdJump);
    }

    #[test]
    fn test_trigger_acceptance() {
        assert!(NextHopTrigger::Both.accepts(NextHopTrigger::Location));
        assert!(NextHopTrigger::FsdJump.accepts(NextHopTrigger::FsdJump));
        assert!(!NextHopTrigger::FsdJump.accepts(NextHopTrigger::Location));
    }
}
