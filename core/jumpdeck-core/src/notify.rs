//! Cooldown discipline for everything user-visible.
//!
//! - [`NotificationGate`]: per-key debouncer keyed by `(message_kind, context)`.
//! - [`VoiceGate`]: global + per-category voice cooldowns, transit and confidence suppression.
//! - [`Notifier`]: the handle the rest of the core uses; routes through both gates onto the bus.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::bus::{Message, MessageBus, StatusEvent, StatusLevel, VoiceMessage};
use crate::config::ConfigStore;

// ═══════════════════════════════════════════════════════════════════════════════
// Notification Gate
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct NotificationGate {
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl NotificationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true (and records the send) when `key` is outside its cooldown.
    pub fn can_send(&self, key: &str, cooldown: Duration, context: Option<&str>) -> bool {
        self.can_send_at(key, cooldown, context, Instant::now())
    }

    pub fn can_send_at(
        &self,
        key: &str,
        cooldown: Duration,
        context: Option<&str>,
        now: Instant,
    ) -> bool {
        let composite = gate_key(key, context);
        let mut last_sent = match self.last_sent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = last_sent.get(&composite) {
            if now.saturating_duration_since(*previous) < cooldown {
                return false;
            }
        }
        last_sent.insert(composite, now);
        true
    }

    /// Time left before `key` may send again.
    pub fn remaining(&self, key: &str, cooldown: Duration, context: Option<&str>) -> Duration {
        let composite = gate_key(key, context);
        let last_sent = match self.last_sent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        last_sent
            .get(&composite)
            .map(|previous| cooldown.saturating_sub(previous.elapsed()))
            .unwrap_or(Duration::ZERO)
    }

    pub fn reset(&self, key: &str, context: Option<&str>) {
        if let Ok(mut last_sent) = self.last_sent.lock() {
            last_sent.remove(&gate_key(key, context));
        }
    }
}

fn gate_key(key: &str, context: Option<&str>) -> String {
    match context {
        Some(ctx) if !ctx.is_empty() => format!("{key}|{ctx}"),
        _ => key.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Voice Gate
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoiceCategory {
    Nav,
    Route,
    Alert,
    Explore,
    Info,
}

impl VoiceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceCategory::Nav => "nav",
            VoiceCategory::Route => "route",
            VoiceCategory::Alert => "alert",
            VoiceCategory::Explore => "explore",
            VoiceCategory::Info => "info",
        }
    }

    fn default_cooldown_secs(&self) -> f64 {
        match self {
            VoiceCategory::Nav | VoiceCategory::Route => 4.0,
            VoiceCategory::Alert => 10.0,
            VoiceCategory::Explore => 6.0,
            VoiceCategory::Info => 8.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VoiceRequest {
    pub id: String,
    pub text: String,
    pub category: VoiceCategory,
    pub confidence: Option<String>,
    pub force: bool,
}

impl VoiceRequest {
    pub fn new(id: &str, text: impl Into<String>, category: VoiceCategory) -> Self {
        Self {
            id: id.to_string(),
            text: text.into(),
            category,
            confidence: None,
            force: false,
        }
    }

    pub fn with_confidence(mut self, confidence: &str) -> Self {
        self.confidence = Some(confidence.to_string());
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct VoiceSettings {
    pub enabled: bool,
    pub global_cooldown: Duration,
    pub category_cooldowns: HashMap<VoiceCategory, Duration>,
}

impl VoiceSettings {
    pub fn from_config(config: &ConfigStore) -> Self {
        let categories = [
            VoiceCategory::Nav,
            VoiceCategory::Route,
            VoiceCategory::Alert,
            VoiceCategory::Explore,
            VoiceCategory::Info,
        ];
        let category_cooldowns = categories
            .iter()
            .map(|c| {
                let key = format!("voice_cooldown_{}", c.as_str());
                let secs = config.get_f64(&key, c.default_cooldown_secs()).max(0.0);
                (*c, Duration::from_secs_f64(secs))
            })
            .collect();
        Self {
            enabled: config.get_bool("voice_enabled", true),
            global_cooldown: Duration::from_secs_f64(
                config.get_f64("voice_cooldown_seconds", 3.0).max(0.0),
            ),
            category_cooldowns,
        }
    }
}

fn is_low_confidence(confidence: Option<&str>) -> bool {
    matches!(
        confidence.map(|c| c.trim().to_ascii_lowercase()).as_deref(),
        Some("low" | "mid" | "uncertain" | "maybe")
    )
}

#[derive(Default)]
pub struct VoiceGate {
    state: Mutex<VoiceGateState>,
}

#[derive(Default)]
struct VoiceGateState {
    last_any: Option<Instant>,
    last_by_category: HashMap<VoiceCategory, Instant>,
}

impl VoiceGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_at(
        &self,
        request: &VoiceRequest,
        in_transit: bool,
        settings: &VoiceSettings,
        now: Instant,
    ) -> bool {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if !request.force {
            if !settings.enabled {
                return false;
            }
            if in_transit && request.category == VoiceCategory::Nav {
                return false;
            }
            if is_low_confidence(request.confidence.as_deref()) {
                return false;
            }
            if let Some(last) = state.last_any {
                if now.saturating_duration_since(last) < settings.global_cooldown {
                    return false;
                }
            }
            if let Some(last) = state.last_by_category.get(&request.category) {
                let cooldown = settings
                    .category_cooldowns
                    .get(&request.category)
                    .copied()
                    .unwrap_or(Duration::ZERO);
                if now.saturating_duration_since(*last) < cooldown {
                    return false;
                }
            }
        }

        state.last_any = Some(now);
        state.last_by_category.insert(request.category, now);
        true
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Notifier
// ═══════════════════════════════════════════════════════════════════════════════

/// Shared front door for status events and voice messages.
#[derive(Clone)]
pub struct Notifier {
    bus: MessageBus,
    gate: Arc<NotificationGate>,
    voice: Arc<VoiceGate>,
    config: Arc<ConfigStore>,
    in_transit: Arc<AtomicBool>,
}

impl Notifier {
    pub fn new(bus: MessageBus, config: Arc<ConfigStore>) -> Self {
        Self {
            bus,
            gate: Arc::new(NotificationGate::new()),
            voice: Arc::new(VoiceGate::new()),
            config,
            in_transit: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn gate(&self) -> &NotificationGate {
        &self.gate
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn set_in_transit(&self, value: bool) {
        self.in_transit.store(value, Ordering::Relaxed);
    }

    pub fn in_transit(&self) -> bool {
        self.in_transit.load(Ordering::Relaxed)
    }

    pub fn log(&self, text: impl Into<String>) {
        self.bus.send(Message::log(text));
    }

    pub fn status(&self, level: StatusLevel, code: &str, text: impl Into<String>, source: &str) {
        self.bus.status(StatusEvent::new(level, code, text, source));
    }

    /// Emits a status event at most once per `cooldown` for `(code, context)`.
    pub fn status_throttled(
        &self,
        level: StatusLevel,
        code: &str,
        text: impl Into<String>,
        source: &str,
        cooldown: Duration,
        context: Option<&str>,
    ) -> bool {
        if !self.gate.can_send(code, cooldown, context) {
            debug!(code = %code, "Status event throttled");
            return false;
        }
        self.status(level, code, text, source);
        true
    }

    /// Emits a voice message when the voice gate allows it.
    pub fn speak(&self, request: VoiceRequest) -> bool {
        self.speak_at(request, Instant::now())
    }

    pub fn speak_at(&self, request: VoiceRequest, now: Instant) -> bool {
        let settings = VoiceSettings::from_config(&self.config);
        if !self.voice.allow_at(&request, self.in_transit(), &settings, now) {
            debug!(id = %request.id, "Voice suppressed");
            return false;
        }
        self.bus.send(Message::Speak(VoiceMessage {
            id: request.id,
            text: request.text,
            category: request.category.as_str().to_string(),
        }));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> VoiceSettings {
        VoiceSettings::from_config(&ConfigStore::in_memory())
    }

    #[test]
    fn test_gate_cooldown_per_key_and_context() {
        let gate = NotificationGate::new();
        let t0 = Instant::now();
        let cd = Duration::from_secs(10);

        assert!(gate.can_send_at("JR_NOT_READY", cd, None, t0));
        assert!(!gate.can_send_at("JR_NOT_READY", cd, None, t0 + Duration::from_secs(5)));
        assert!(gate.can_send_at("JR_NOT_READY", cd, Some("trade"), t0 + Duration::from_secs(5)));
        assert!(gate.can_send_at("JR_NOT_READY", cd, None, t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_voice_global_and_category_cooldowns() {
        let gate = VoiceGate::new();
        let s = settings();
        let t0 = Instant::now();
        let nav = VoiceRequest::new("MSG.NEXT_HOP_COPIED", "Next hop copied", VoiceCategory::Nav);
        let info = VoiceRequest::new("MSG.DOCKED", "Docked", VoiceCategory::Info);

        assert!(gate.allow_at(&nav, false, &s, t0));
        // global cooldown (3 s) blocks any category
        assert!(!gate.allow_at(&info, false, &s, t0 + Duration::from_secs(1)));
        // nav category (4 s) still blocks nav after global expires
        assert!(!gate.allow_at(&nav, false, &s, t0 + Duration::from_millis(3500)));
        assert!(gate.allow_at(&info, false, &s, t0 + Duration::from_millis(3500)));
        assert!(gate.allow_at(&nav, false, &s, t0 + Duration::from_secs(8)));
    }

    #[test]
    fn test_voice_suppression_rules() {
        let gate = VoiceGate::new();
        let s = settings();
        let t0 = Instant::now();

        let nav = VoiceRequest::new("MSG.NEXT_HOP_COPIED", "x", VoiceCategory::Nav);
        assert!(!gate.allow_at(&nav, true, &s, t0));

        let unsure =
            VoiceRequest::new("MSG.ROUTE_DESYNC", "x", VoiceCategory::Route).with_confidence("Maybe");
        assert!(!gate.allow_at(&unsure, false, &s, t0));

        let forced = VoiceRequest::new("MSG.NEXT_HOP_COPIED", "x", VoiceCategory::Nav)
            .with_confidence("low")
            .forced();
        assert!(gate.allow_at(&forced, true, &s, t0));
    }

    #[test]
    fn test_voice_disabled() {
        let config = ConfigStore::in_memory_with(serde_json::json!({"voice_enabled": false}));
        let s = VoiceSettings::from_config(&config);
        let gate = VoiceGate::new();
        let req = VoiceRequest::new("MSG.ROUTE_COMPLETE", "done", VoiceCategory::Route);
        assert!(!gate.allow_at(&req, false, &s, Instant::now()));
    }

    #[test]
    fn test_notifier_throttles_status() {
        let bus = MessageBus::new();
        let notifier = Notifier::new(bus.clone(), Arc::new(ConfigStore::in_memory()));
        let cd = Duration::from_secs(10);
        assert!(notifier.status_throttled(StatusLevel::Warn, "JR_NOT_READY_FALLBACK", "a", "planner", cd, None));
        assert!(!notifier.status_throttled(StatusLevel::Warn, "JR_NOT_READY_FALLBACK", "b", "planner", cd, None));
        assert_eq!(bus.take_all().len(), 1);
    }
}
