//! # jumpdeck-core
//!
//! Route dispatch and session core for the jumpdeck flight-sim companion.
//!
//! The core tails the game's journal and sidecar status files, reconstructs
//! the player's session (location, docking, loadout, fuel, cargo), brokers
//! job-based route requests to external planners with caching and
//! single-flight de-duplication, and keeps an active route whose next hop is
//! staged on the clipboard as the player jumps.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. Background work runs on plain threads.
//! - **One owner per aggregate**: Session state, the active route and the route
//!   manager each sit behind their own lock; the UI only sees published copies.
//! - **Single UI path**: Everything user-visible goes through the [`MessageBus`].
//! - **Graceful degradation**: Missing or corrupt files yield defaults, not errors.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use jumpdeck_core::NavEngine;
//!
//! let engine = NavEngine::new()?;
//! let tail = engine.start_journal_watch(stop)?;
//! engine.bus().drain(|message| println!("{}", message.tag()));
//! ```

pub mod bus;
pub mod cache;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod handler;
pub mod journal;
pub mod jump_range;
pub mod log_once;
pub mod notify;
pub mod planner;
pub mod route;
pub mod session;
pub mod storage;

pub use bus::{Message, MessageBus, StatusEvent, StatusLevel, VoiceMessage};
pub use cache::{CacheEntry, CacheStore};
pub use config::{ClipboardMode, ComputeOn, ConfigStore, NextHopTrigger, ResyncPolicy};
pub use engine::NavEngine;
pub use error::{NavError, PlannerError, Result};
pub use handler::{EventHandler, JournalEvent};
pub use journal::{find_latest_journal, JournalSink, JournalTailer};
pub use jump_range::{JumpRangeOptions, JumpRangeResult, ModulesData};
pub use notify::{NotificationGate, Notifier, VoiceCategory, VoiceRequest};
pub use planner::normalize::{DisplayRow, NormalizedRoute, TableRow};
pub use planner::payload::{PlannerMode, RouteRequest};
pub use planner::{PlannerClient, PlannerSettings, RouteResponse, RouteStatus};
pub use route::clipboard::{ClipboardSink, MemoryClipboard, SystemClipboard};
pub use route::cursor::{ActiveRoute, CursorState, RouteCursor};
pub use route::manager::RouteManager;
pub use session::{SessionHandle, SessionState, ShipState};
pub use storage::StorageConfig;
