//! Storage configuration and path management for jumpdeck.
//!
//! `StorageConfig` centralises every on-disk location the core touches:
//! the settings file (and its legacy predecessor), per-provider cache
//! namespaces, log directory, and the game's journal directory.
//!
//! Production code uses `StorageConfig::resolve()`. Tests use
//! `StorageConfig::with_root(temp_dir)` for isolation.

use std::env;
use std::path::{Path, PathBuf};

pub const APP_NAME: &str = "jumpdeck";
pub const SETTINGS_ENV: &str = "JUMPDECK_SETTINGS";
pub const SETTINGS_FILE: &str = "settings.json";
pub const LEGACY_SETTINGS_FILE: &str = "user_settings.json";

/// Central configuration for all jumpdeck storage paths.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Application data root (default: `<data_dir>/jumpdeck`)
    root: PathBuf,
    /// Active settings file
    settings_file: PathBuf,
}

impl StorageConfig {
    /// Resolves paths in precedence order: env override > per-user data dir > side-by-side file.
    pub fn resolve() -> Option<Self> {
        let root = dirs::data_dir()
            .map(|d| d.join(APP_NAME))
            .or_else(exe_dir)?;

        let settings_file = match env::var(SETTINGS_ENV) {
            Ok(value) if !value.trim().is_empty() => PathBuf::from(value.trim()),
            _ => {
                if dirs::data_dir().is_some() {
                    root.join(SETTINGS_FILE)
                } else {
                    exe_dir()?.join(SETTINGS_FILE)
                }
            }
        };

        Some(Self {
            root,
            settings_file,
        })
    }

    /// Creates a StorageConfig rooted in a custom directory.
    /// Used for testing with temp directories.
    pub fn with_root(root: PathBuf) -> Self {
        let settings_file = root.join(SETTINGS_FILE);
        Self {
            root,
            settings_file,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Settings
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn settings_file(&self) -> &Path {
        &self.settings_file
    }

    /// Path to the pre-migration settings file, next to the active one.
    pub fn legacy_settings_file(&self) -> PathBuf {
        self.settings_file
            .parent()
            .map(|p| p.join(LEGACY_SETTINGS_FILE))
            .unwrap_or_else(|| self.root.join(LEGACY_SETTINGS_FILE))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Directories
    // ─────────────────────────────────────────────────────────────────────────────

    /// Cache namespace directory: `<root>/cache/<namespace>/`.
    pub fn cache_dir(&self, namespace: &str) -> PathBuf {
        self.root.join("cache").join(sanitize_namespace(namespace))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Default journal location used when `log_dir` is not configured.
    /// Example (Windows): `C:\Users\cmdr\Saved Games\Frontier Developments\Elite Dangerous`
    pub fn default_journal_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| {
            h.join("Saved Games")
                .join("Frontier Developments")
                .join("Elite Dangerous")
        })
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.root.join("cache"))?;
        if let Some(parent) = self.settings_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

fn exe_dir() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
}

/// Keeps namespaces to a single safe path component.
fn sanitize_namespace(namespace: &str) -> String {
    let cleaned: String = namespace
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_with_root_paths() {
        let temp = TempDir::new().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());

        assert_eq!(storage.settings_file(), temp.path().join("settings.json"));
        assert_eq!(
            storage.legacy_settings_file(),
            temp.path().join("user_settings.json")
        );
        assert_eq!(
            storage.cache_dir("spansh"),
            temp.path().join("cache").join("spansh")
        );
    }

    #[test]
    fn test_cache_namespace_is_single_component() {
        let storage = StorageConfig::with_root(PathBuf::from("/data"));
        assert_eq!(
            storage.cache_dir("../Spansh Trade"),
            PathBuf::from("/data/cache/___spansh_trade")
        );
        assert_eq!(storage.cache_dir("  "), PathBuf::from("/data/cache/default"));
    }

    #[test]
    fn test_ensure_dirs_creates_cache_root() {
        let temp = TempDir::new().unwrap();
        let storage = StorageConfig::with_root(temp.path().join("app"));
        storage.ensure_dirs().unwrap();
        assert!(temp.path().join("app").join("cache").is_dir());
    }
}
