//! Active route cursor: what is the next system to paste?
//!
//! ```text
//!  INACTIVE ──install──▶ ACTIVE ──off-route jump──▶ DESYNC_PENDING
//!                          ▲  ▲                         │ strikes ≥ confirm
//!                          │  └──────on-route jump──────┤
//!                          │                            ▼
//!                          └───────on-route jump─── DESYNC_ACTIVE
//!  ACTIVE ──final system reached──▶ COMPLETE
//! ```
//!
//! `index` always points at the next unreached system. Cursor index and
//! milestone progress are updated together under the owner's mutex.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::clipboard::ClipboardSink;
use crate::bus::StatusLevel;
use crate::cache::sha1_hex;
use crate::config::{ClipboardMode, ConfigStore, NextHopTrigger, ResyncPolicy};
use crate::notify::{Notifier, VoiceCategory, VoiceRequest};
use crate::session::{normalize_system, NavRoute};

pub const THRESHOLDS: [u8; 4] = [25, 50, 75, 100];
const SOURCE: &str = "route_cursor";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CursorState {
    Inactive,
    Active,
    DesyncPending,
    DesyncActive,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Milestone {
    pub start_index: usize,
    pub target_index: usize,
    pub announced: BTreeSet<u8>,
}

impl Milestone {
    fn new(start_index: usize, target_index: usize) -> Self {
        Self {
            start_index,
            target_index,
            announced: BTreeSet::new(),
        }
    }

    /// Highest threshold newly crossed at `percent`; lower ones are marked too.
    fn cross(&mut self, percent: f64) -> Option<u8> {
        let mut newest = None;
        for threshold in THRESHOLDS {
            if percent + 1e-9 >= f64::from(threshold) && self.announced.insert(threshold) {
                newest = Some(threshold);
            }
        }
        newest
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveRoute {
    pub systems_raw: Vec<String>,
    pub systems_norm: Vec<String>,
    pub index: usize,
    pub signature: String,
    pub source: String,
    pub last_copied_system: Option<String>,
    pub desync_strikes: u32,
    pub desync_active: bool,
    pub milestone: Option<Milestone>,
    /// Positions of every milestone, ascending; the final system is always last.
    pub milestone_positions: Vec<usize>,
    pub total_jumps: Option<u32>,
    pub total_distance_ly: Option<f64>,
    pub link: Option<String>,
}

impl ActiveRoute {
    pub fn len(&self) -> usize {
        self.systems_raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems_raw.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.index >= self.len()
    }

    pub fn next_system(&self) -> Option<&str> {
        self.systems_raw.get(self.index).map(String::as_str)
    }

    /// Milestone target system if one is pursued, else the next hop.
    pub fn active_milestone_system(&self) -> Option<&str> {
        match &self.milestone {
            Some(m) => self.systems_raw.get(m.target_index).map(String::as_str),
            None => self.next_system(),
        }
    }

    fn locate(&self, system_norm: &str, policy: ResyncPolicy) -> Option<usize> {
        match policy {
            ResyncPolicy::NearestForward => {
                let from = self.index.saturating_sub(1);
                self.systems_norm
                    .iter()
                    .enumerate()
                    .skip(from)
                    .find(|(_, s)| s.as_str() == system_norm)
                    .map(|(i, _)| i)
            }
            ResyncPolicy::Strict => [self.index.checked_sub(1), Some(self.index)]
                .into_iter()
                .flatten()
                .find(|&i| self.systems_norm.get(i).map(String::as_str) == Some(system_norm)),
        }
    }

    fn next_milestone_after(&self, position: usize) -> Option<usize> {
        self.milestone_positions.iter().copied().find(|&p| p > position)
    }
}

/// What a route installation carries.
#[derive(Debug, Clone, Default)]
pub struct RouteInstall {
    pub systems: Vec<String>,
    pub via: Vec<String>,
    pub source: String,
    pub total_jumps: Option<u32>,
    pub total_distance_ly: Option<f64>,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct CursorSettings {
    pub auto_clipboard: bool,
    pub mode: ClipboardMode,
    pub trigger: NextHopTrigger,
    pub resync_policy: ResyncPolicy,
    pub desync_confirm_jumps: u32,
    pub allow_manual_advance: bool,
    pub copy_on_route_ready: bool,
}

impl CursorSettings {
    pub fn from_config(config: &ConfigStore) -> Self {
        Self {
            auto_clipboard: config.get_bool("auto_clipboard", true),
            mode: config.clipboard_mode(),
            trigger: config.next_hop_trigger(),
            resync_policy: config.resync_policy(),
            desync_confirm_jumps: config.desync_confirm_jumps(),
            allow_manual_advance: config.get_bool("auto_clipboard_next_hop_allow_manual_advance", true),
            copy_on_route_ready: config.get_bool("auto_clipboard_next_hop_copy_on_route_ready", false),
        }
    }
}

/// Result of feeding one system arrival to the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arrival {
    Ignored,
    OnRoute { position: usize },
    Aligned,
    Strike { strikes: u32 },
    Desynced,
    Completed,
}

pub fn route_signature(systems_norm: &[String], source: &str) -> String {
    sha1_hex(&format!("{}|{}", systems_norm.join("\u{1f}"), source))
}

/// `Route: A → B (n jumps, d ly)` followed by one line per system.
pub fn format_full_route(route: &ActiveRoute) -> String {
    let first = route.systems_raw.first().map(String::as_str).unwrap_or("");
    let last = route.systems_raw.last().map(String::as_str).unwrap_or("");
    let jumps = route
        .total_jumps
        .unwrap_or_else(|| route.len().saturating_sub(1) as u32);
    let mut out = match route.total_distance_ly {
        Some(d) => format!("Route: {first} → {last} ({jumps} jumps, {d:.1} ly)"),
        None => format!("Route: {first} → {last} ({jumps} jumps)"),
    };
    for (i, system) in route.systems_raw.iter().enumerate() {
        out.push_str(&format!("\n{:>3}. {}", i + 1, system));
    }
    if let Some(link) = &route.link {
        out.push('\n');
        out.push_str(link);
    }
    out
}

pub struct RouteCursor {
    route: Option<ActiveRoute>,
    notifier: Notifier,
    clipboard: Arc<dyn ClipboardSink>,
    last_full_route_signature: Option<String>,
}

impl RouteCursor {
    pub fn new(notifier: Notifier, clipboard: Arc<dyn ClipboardSink>) -> Self {
        Self {
            route: None,
            notifier,
            clipboard,
            last_full_route_signature: None,
        }
    }

    fn settings(&self) -> CursorSettings {
        CursorSettings::from_config(self.notifier.config())
    }

    pub fn route(&self) -> Option<&ActiveRoute> {
        self.route.as_ref()
    }

    pub fn state(&self) -> CursorState {
        match &self.route {
            None => CursorState::Inactive,
            Some(r) if r.is_empty() => CursorState::Inactive,
            Some(r) if r.is_complete() => CursorState::Complete,
            Some(r) if r.desync_active => CursorState::DesyncActive,
            Some(r) if r.desync_strikes > 0 => CursorState::DesyncPending,
            Some(_) => CursorState::Active,
        }
    }

    pub fn next_system(&self) -> Option<&str> {
        self.route.as_ref().and_then(ActiveRoute::next_system)
    }

    pub fn clear(&mut self) {
        if self.route.take().is_some() {
            info!("Active route cleared");
        }
    }

    /// Installs a route. `current_system` positions the first-hop copy.
    pub fn install(&mut self, install: RouteInstall, current_system: Option<&str>) {
        let systems_raw: Vec<String> = install
            .systems
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if systems_raw.is_empty() {
            self.route = None;
            return;
        }
        let systems_norm: Vec<String> = systems_raw.iter().map(|s| normalize_system(s)).collect();
        let signature = route_signature(&systems_norm, &install.source);

        let mut milestone_positions = Vec::new();
        let mut search_from = 0;
        for via in &install.via {
            let via_norm = normalize_system(via);
            if let Some(offset) = systems_norm[search_from..].iter().position(|s| *s == via_norm) {
                let position = search_from + offset;
                if position > 0 && position + 1 < systems_norm.len() {
                    milestone_positions.push(position);
                }
                search_from = position + 1;
            }
        }
        milestone_positions.push(systems_norm.len() - 1);
        milestone_positions.dedup();

        let first_target = milestone_positions.first().copied().unwrap_or(0);
        let milestone = if first_target > 0 {
            Some(Milestone::new(0, first_target))
        } else {
            None
        };

        info!(
            systems = systems_raw.len(),
            source = %install.source,
            signature = %signature,
            "Active route installed"
        );
        self.route = Some(ActiveRoute {
            systems_raw,
            systems_norm,
            index: 0,
            signature,
            source: install.source,
            last_copied_system: None,
            desync_strikes: 0,
            desync_active: false,
            milestone,
            milestone_positions,
            total_jumps: install.total_jumps,
            total_distance_ly: install.total_distance_ly,
            link: install.link,
        });

        let settings = self.settings();
        if !settings.auto_clipboard {
            return;
        }
        match settings.mode {
            ClipboardMode::FullRoute => self.copy_full_route(),
            ClipboardMode::NextHop if settings.copy_on_route_ready => {
                let current = current_system.map(normalize_system);
                if let Some(route) = self.route.as_mut() {
                    if current.as_deref() == route.systems_norm.first().map(String::as_str) {
                        route.index = route.len().min(1);
                    }
                }
                self.copy_next_hop(false);
            }
            ClipboardMode::NextHop => {}
        }
    }

    fn copy_full_route(&mut self) {
        let Some(route) = self.route.as_ref() else {
            return;
        };
        if self.last_full_route_signature.as_deref() == Some(route.signature.as_str()) {
            debug!("Full route already copied for this signature");
            return;
        }
        let text = format_full_route(route);
        let signature = route.signature.clone();
        if self.write_clipboard(&text) {
            self.last_full_route_signature = Some(signature);
            self.notifier.status(StatusLevel::Ok, "FULL_ROUTE_COPIED", "Route copied to clipboard", SOURCE);
        }
    }

    /// Copies `systems_raw[index]`. Identical consecutive copies are skipped unless `force`.
    fn copy_next_hop(&mut self, force: bool) -> bool {
        let Some(route) = self.route.as_ref() else {
            return false;
        };
        let Some(next) = route.next_system().map(str::to_string) else {
            return false;
        };
        let next_norm = normalize_system(&next);
        if !force && route.last_copied_system.as_deref() == Some(next_norm.as_str()) {
            debug!(system = %next, "Next hop already on clipboard");
            return false;
        }
        if !self.write_clipboard(&next) {
            return false;
        }
        if let Some(route) = self.route.as_mut() {
            route.last_copied_system = Some(next_norm);
        }
        self.notifier.status(
            StatusLevel::Ok,
            "NEXT_HOP_COPIED",
            format!("Next hop copied: {next}"),
            SOURCE,
        );
        self.notifier.speak(VoiceRequest::new(
            "MSG.NEXT_HOP_COPIED",
            format!("Next hop {next} copied"),
            VoiceCategory::Nav,
        ));
        true
    }

    fn write_clipboard(&self, text: &str) -> bool {
        match self.clipboard.set_text(text) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "Clipboard write failed");
                self.notifier.log(format!("Clipboard write failed: {err}"));
                self.notifier
                    .status(StatusLevel::Error, "CLIPBOARD_FAIL", "Could not write to the clipboard", SOURCE);
                false
            }
        }
    }

    /// Feeds a "player is now in `system`" observation.
    pub fn on_system(
        &mut self,
        system: &str,
        trigger: NextHopTrigger,
        nav_route: Option<&NavRoute>,
    ) -> Arrival {
        let settings = self.settings();
        if !settings.trigger.accepts(trigger) {
            return Arrival::Ignored;
        }
        let system_norm = normalize_system(system);
        let Some(route) = self.route.as_mut() else {
            return Arrival::Ignored;
        };
        if route.is_empty() || route.is_complete() || system_norm.is_empty() {
            return Arrival::Ignored;
        }

        match route.locate(&system_norm, settings.resync_policy) {
            Some(position) => self.arrive_on_route(position, &settings),
            None => self.arrive_off_route(&system_norm, nav_route, &settings),
        }
    }

    fn arrive_on_route(&mut self, position: usize, settings: &CursorSettings) -> Arrival {
        let (complete, progress) = {
            let Some(route) = self.route.as_mut() else {
                return Arrival::Ignored;
            };
            route.desync_strikes = 0;
            route.desync_active = false;
            route.index = (position + 1).min(route.len());
            (route.is_complete(), self.milestone_progress(position))
        };

        if let Some(progress) = progress {
            self.announce(progress);
        }

        if complete {
            let destination = self
                .route
                .as_ref()
                .and_then(|r| r.systems_raw.last().cloned())
                .unwrap_or_default();
            info!(destination = %destination, "Route complete");
            self.notifier.status(
                StatusLevel::Ok,
                "ROUTE_COMPLETE",
                format!("Route complete: arrived at {destination}"),
                SOURCE,
            );
            self.notifier.speak(VoiceRequest::new(
                "MSG.ROUTE_COMPLETE",
                "Route complete",
                VoiceCategory::Route,
            ));
            return Arrival::Completed;
        }

        if settings.auto_clipboard && settings.mode == ClipboardMode::NextHop {
            self.copy_next_hop(false);
        }
        Arrival::OnRoute { position }
    }

    fn arrive_off_route(
        &mut self,
        system_norm: &str,
        nav_route: Option<&NavRoute>,
        settings: &CursorSettings,
    ) -> Arrival {
        let aligned_progress = {
            let Some(route) = self.route.as_ref() else {
                return Arrival::Ignored;
            };
            nav_route.and_then(|nav| {
                let endpoint = nav.endpoint().map(normalize_system)?;
                let milestone = route.active_milestone_system().map(normalize_system)?;
                if endpoint != milestone {
                    return None;
                }
                let position = nav
                    .systems
                    .iter()
                    .position(|s| normalize_system(s) == system_norm)?;
                let legs = nav.systems.len().saturating_sub(1).max(1);
                Some(position as f64 * 100.0 / legs as f64)
            })
        };

        if let Some(percent) = aligned_progress {
            let progress = self.route.as_mut().and_then(|route| {
                route.desync_strikes = 0;
                route.desync_active = false;
                let milestone = route.milestone.as_mut()?;
                // 100 is reserved for actually reaching the milestone system.
                let threshold = milestone.cross(percent.min(99.0))?;
                Some(Progress {
                    threshold,
                    milestone: route.systems_raw.get(milestone.target_index).cloned().unwrap_or_default(),
                    reached: false,
                    next_milestone: None,
                })
            });
            debug!(percent, "Off-route system lies on in-game route to milestone");
            if let Some(progress) = progress {
                self.announce(progress);
            }
            return Arrival::Aligned;
        }

        let Some(route) = self.route.as_mut() else {
            return Arrival::Ignored;
        };
        route.desync_strikes += 1;
        let strikes = route.desync_strikes;
        if route.desync_active {
            return Arrival::Strike { strikes };
        }
        if strikes < settings.desync_confirm_jumps {
            debug!(strikes, "Off-route jump observed");
            return Arrival::Strike { strikes };
        }
        route.desync_active = true;
        let expected = route.next_system().unwrap_or_default().to_string();
        warn!(strikes, expected = %expected, "Route desync confirmed");
        self.notifier.status(
            StatusLevel::Warn,
            "ROUTE_DESYNC",
            format!("Off route; next expected system is {expected}"),
            SOURCE,
        );
        self.notifier.speak(VoiceRequest::new(
            "MSG.ROUTE_DESYNC",
            "You have left the planned route",
            VoiceCategory::Route,
        ));
        Arrival::Desynced
    }

    /// Updates milestone bookkeeping for arrival at `position`.
    fn milestone_progress(&mut self, position: usize) -> Option<Progress> {
        let route = self.route.as_mut()?;
        let milestone = route.milestone.as_mut()?;
        if position < milestone.start_index {
            return None;
        }
        let span = milestone.target_index.saturating_sub(milestone.start_index).max(1);
        let done = position.min(milestone.target_index) - milestone.start_index;
        let percent = done as f64 * 100.0 / span as f64;
        let reached = position >= milestone.target_index;
        let threshold = milestone.cross(if reached { 100.0 } else { percent.min(99.0) });
        let name = route.systems_raw.get(milestone.target_index).cloned().unwrap_or_default();

        let mut next_milestone = None;
        if reached {
            let reached_at = milestone.target_index;
            route.milestone = route
                .next_milestone_after(position.max(reached_at))
                .map(|next| Milestone::new(reached_at, next));
            next_milestone = route
                .milestone
                .as_ref()
                .and_then(|m| route.systems_raw.get(m.target_index).cloned());
        }

        threshold.map(|threshold| Progress {
            threshold,
            milestone: name,
            reached,
            next_milestone,
        })
    }

    fn announce(&self, progress: Progress) {
        self.notifier.status(
            StatusLevel::Info,
            "MILESTONE_PROGRESS",
            format!("{}: {}%", progress.milestone, progress.threshold),
            SOURCE,
        );
        self.notifier.speak(VoiceRequest::new(
            "MSG.MILESTONE_PROGRESS",
            format!("{} percent to {}", progress.threshold, progress.milestone),
            VoiceCategory::Route,
        ));
        if progress.reached {
            if let Some(next) = progress.next_milestone {
                self.notifier.status(
                    StatusLevel::Info,
                    "MILESTONE_REACHED",
                    format!("Reached {}. Next milestone: {next}", progress.milestone),
                    SOURCE,
                );
                self.notifier.speak(VoiceRequest::new(
                    "MSG.MILESTONE_REACHED",
                    format!("Milestone reached. Next, {next}"),
                    VoiceCategory::Route,
                ));
            }
        }
    }

    /// Skips to the following hop and copies it even when it is already on the clipboard.
    pub fn manual_advance(&mut self) -> Option<String> {
        let settings = self.settings();
        if !settings.allow_manual_advance {
            debug!("Manual advance disabled");
            return None;
        }
        let route = self.route.as_mut()?;
        if route.is_complete() {
            return None;
        }
        route.index += 1;
        route.desync_strikes = 0;
        route.desync_active = false;
        if route.is_complete() {
            info!("Route complete after manual advance");
            self.notifier
                .status(StatusLevel::Ok, "ROUTE_COMPLETE", "Route complete", SOURCE);
            self.notifier.speak(VoiceRequest::new(
                "MSG.ROUTE_COMPLETE",
                "Route complete",
                VoiceCategory::Route,
            ));
            return None;
        }
        let next = route.next_system().map(str::to_string);
        self.copy_next_hop(true);
        next
    }
}

#[derive(Debug, Clone)]
struct Progress {
    threshold: u8,
    milestone: String,
    reached: bool,
    next_milestone: Option<String>,
}
