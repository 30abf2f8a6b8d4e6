//! Error types for jumpdeck-core operations.
//!
//! `NavError` is the crate-wide error. `PlannerError` is kept separate and `Clone`
//! so a single in-flight planner call can hand the same failure to every waiter.

use std::path::PathBuf;

// ═══════════════════════════════════════════════════════════════════════════════
// Planner Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Failures surfaced by the planner pipeline (payload build, HTTP, job polling).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlannerError {
    /// A required input is missing or invalid. No HTTP call was made.
    #[error("{message}")]
    Input { code: &'static str, message: String },

    #[error("planner returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("planner transport failed: {0}")]
    Transport(String),

    #[error("planner request timed out: {0}")]
    Timeout(String),

    #[error("planner response malformed: {0}")]
    Protocol(String),

    #[error("planner job ended with status {status}")]
    JobFailed { status: String },

    #[error("planner job still pending after {polls} polls")]
    PollBudgetExhausted { polls: u32 },
}

impl PlannerError {
    pub fn input(code: &'static str, message: impl Into<String>) -> Self {
        PlannerError::Input {
            code,
            message: message.into(),
        }
    }

    /// Stable identifier used in status events.
    pub fn code(&self) -> &'static str {
        match self {
            PlannerError::Input { code, .. } => code,
            PlannerError::HttpStatus { .. } => "SPANSH_HTTP_ERROR",
            PlannerError::Transport(_) => "SPANSH_TRANSPORT",
            PlannerError::Timeout(_) | PlannerError::PollBudgetExhausted { .. } => "SPANSH_TIMEOUT",
            PlannerError::Protocol(_) => "SPANSH_BAD_RESPONSE",
            PlannerError::JobFailed { .. } => "SPANSH_JOB_FAILED",
        }
    }

    /// 4xx responses are not worth retrying.
    pub fn is_client_error(&self) -> bool {
        matches!(self, PlannerError::HttpStatus { status, .. } if (400..500).contains(status))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Crate Error
// ═══════════════════════════════════════════════════════════════════════════════

/// All errors that can occur in jumpdeck-core operations.
#[derive(Debug, thiserror::Error)]
pub enum NavError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Settings path could not be resolved")]
    SettingsPathUnresolved,

    #[error("Configuration write failed: {path}: {details}")]
    ConfigWriteFailed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Journal Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Journal directory not found at {0}")]
    JournalDirNotFound(PathBuf),

    // ─────────────────────────────────────────────────────────────────────
    // Route Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Another route is being computed ({mode})")]
    RouteBusy { mode: String },

    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error("Clipboard unavailable: {0}")]
    Clipboard(String),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parsing error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl NavError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        NavError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        NavError::Json {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using NavError.
pub type Result<T> = std::result::Result<T, NavError>;

impl From<NavError> for String {
    fn from(err: NavError) -> String {
        err.to_string()
    }
}
