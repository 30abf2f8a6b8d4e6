//! Namespaced on-disk cache for planner responses.
//!
//! One JSON file per entry at `<root>/cache/<namespace>/<sha1(key)>.json`:
//!
//! ```json
//! {
//!   "meta": { "key": "...", "created_at": 1760000000, "expires_at": 1760021600,
//!             "version": 1, "provider": "spansh", "endpoint": "/trade/route", "mode": "trade" },
//!   "value": { ... planner payload ... }
//! }
//! ```
//!
//! Expired or corrupt entries are deleted on read and reported as a miss.
//! Writes go through temp file + rename, so readers never see partial files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use fs_err as fs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::{Digest, Sha1};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::write_atomic;
use crate::error::{NavError, Result};

pub const CACHE_VERSION: u32 = 1;

pub const TRADE_TTL: Duration = Duration::from_secs(6 * 60 * 60);
pub const EXPLORATION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const SUGGEST_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub key: String,
    pub created_at: i64,
    pub expires_at: i64,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub meta: CacheMeta,
    pub value: Value,
}

/// Descriptive fields recorded alongside an entry.
#[derive(Debug, Clone, Default)]
pub struct CacheTags {
    pub provider: String,
    pub endpoint: String,
    pub mode: String,
}

pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sha1_hex(key)))
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.get_at(key, Utc::now().timestamp())
    }

    pub fn get_at(&self, key: &str, now: i64) -> Option<CacheEntry> {
        let path = self.entry_path(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => return None,
        };

        let entry = match serde_json::from_str::<CacheEntry>(&content) {
            Ok(entry) if entry.meta.key == key => entry,
            Ok(_) | Err(_) => {
                warn!(path = %path.display(), "Corrupt cache entry; deleting");
                let _ = fs::remove_file(&path);
                return None;
            }
        };

        if now >= entry.meta.expires_at {
            debug!(path = %path.display(), "Cache entry expired; deleting");
            let _ = fs::remove_file(&path);
            return None;
        }

        Some(entry)
    }

    pub fn set(&self, key: &str, value: &Value, ttl: Duration, tags: CacheTags) -> Result<()> {
        let now = Utc::now().timestamp();
        let entry = CacheEntry {
            meta: CacheMeta {
                key: key.to_string(),
                created_at: now,
                expires_at: now + ttl.as_secs() as i64,
                version: CACHE_VERSION,
                provider: tags.provider,
                endpoint: tags.endpoint,
                mode: tags.mode,
            },
            value: value.clone(),
        };
        let bytes =
            serde_json::to_vec(&entry).map_err(|e| NavError::json("serialize cache entry", e))?;
        write_atomic(&self.entry_path(key), &bytes)
    }

    /// Deletes expired and unreadable entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now().timestamp();
        let mut removed = 0;
        for entry in WalkDir::new(&self.dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let keep = fs::read_to_string(path)
                .ok()
                .and_then(|c| serde_json::from_str::<CacheEntry>(&c).ok())
                .map(|e| now < e.meta.expires_at)
                .unwrap_or(false);
            if !keep && fs::remove_file(path).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    pub fn clear(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir).map_err(|e| NavError::io("clear cache", e))?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Keys
// ─────────────────────────────────────────────────────────────────────────────

pub fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Deterministic key over `provider | endpoint | canonicalized params`.
pub fn make_cache_key(provider: &str, endpoint: &str, params: &Value) -> String {
    sha1_hex(&format!(
        "{}|{}|{}",
        provider.trim(),
        endpoint.trim(),
        canonical_json(params)
    ))
}

/// Serialises with sorted object keys, trimmed strings and floats rounded to 4 decimals.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if n.is_f64() {
                let rounded = n.as_f64().map(|f| (f * 10_000.0).round() / 10_000.0);
                out.push_str(&rounded.map(|f| f.to_string()).unwrap_or_default());
            } else {
                out.push_str(&n.to_string());
            }
        }
        Value::String(s) => out.push_str(&Value::String(s.trim().to_string()).to_string()),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}
