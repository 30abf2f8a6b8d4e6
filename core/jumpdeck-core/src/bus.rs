//! UI-directed message bus.
//!
//! An unbounded, order-preserving handoff from any number of producers
//! (journal tailer, route workers, autocomplete threads) to the single UI
//! consumer. There is no retention, filtering or routing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use tracing::{debug, warn};

use crate::planner::normalize::DisplayRow;
use crate::session::ShipState;

/// Maximum interval between two drains of the UI loop.
pub const DRAIN_CADENCE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusLevel {
    Ok,
    Info,
    Warn,
    Error,
    Busy,
}

impl StatusLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusLevel::Ok => "OK",
            StatusLevel::Info => "INFO",
            StatusLevel::Warn => "WARN",
            StatusLevel::Error => "ERROR",
            StatusLevel::Busy => "BUSY",
        }
    }
}

/// A user-visible status notification with a stable code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    pub level: StatusLevel,
    pub code: String,
    pub text: String,
    pub ts: String,
    pub source: String,
    pub sticky: bool,
}

impl StatusEvent {
    pub fn new(level: StatusLevel, code: &str, text: impl Into<String>, source: &str) -> Self {
        Self {
            level,
            code: code.to_string(),
            text: text.into(),
            ts: Utc::now().to_rfc3339(),
            source: source.to_string(),
            sticky: false,
        }
    }

    pub fn sticky(mut self) -> Self {
        self.sticky = true;
        self
    }
}

/// Voice hand-off to the external TTS collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceMessage {
    /// Stable message id, e.g. `MSG.NEXT_HOP_COPIED`.
    pub id: String,
    pub text: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    Log {
        text: String,
    },
    StatusEvent(StatusEvent),
    /// Per-panel status line (`status_<target>`).
    Status {
        target: String,
        text: String,
        color: String,
    },
    ShipState(Box<ShipState>),
    /// Result table for a planner panel (`list_<target>`).
    List {
        target: String,
        rows: Vec<DisplayRow>,
    },
    /// Highlight a row in a planner panel (`select_<target>`).
    Select {
        target: String,
        index: usize,
    },
    StartLabel {
        text: String,
    },
    Speak(VoiceMessage),
    Suggestions {
        field: String,
        generation: u64,
        items: Vec<String>,
    },
}

impl Message {
    pub fn log(text: impl Into<String>) -> Self {
        Message::Log { text: text.into() }
    }

    /// The tag a UI dispatcher switches on (`log`, `status_neutron`, ...).
    pub fn tag(&self) -> String {
        match self {
            Message::Log { .. } => "log".to_string(),
            Message::StatusEvent(_) => "status_event".to_string(),
            Message::Status { target, .. } => format!("status_{target}"),
            Message::ShipState(_) => "ship_state".to_string(),
            Message::List { target, .. } => format!("list_{target}"),
            Message::Select { target, .. } => format!("select_{target}"),
            Message::StartLabel { .. } => "start_label".to_string(),
            Message::Speak(_) => "speak".to_string(),
            Message::Suggestions { field, .. } => format!("suggest_{field}"),
        }
    }
}

/// Multi-producer, single-consumer queue of [`Message`]s.
#[derive(Clone)]
pub struct MessageBus {
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// Enqueues without blocking. A disconnected bus drops the message.
    pub fn send(&self, message: Message) {
        if self.tx.send(message).is_err() {
            debug!("Message bus disconnected; dropping message");
        }
    }

    pub fn status(&self, event: StatusEvent) {
        self.send(Message::StatusEvent(event));
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Hands every queued message to `handler` in order.
    ///
    /// A handler error is logged and processing continues with the next message.
    pub fn drain<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(Message) -> Result<(), String>,
    {
        let mut count = 0;
        for message in self.rx.try_iter() {
            count += 1;
            let tag = message.tag();
            if let Err(err) = handler(message) {
                warn!(tag = %tag, error = %err, "Message handler failed");
            }
        }
        count
    }

    /// Collects everything currently queued.
    pub fn take_all(&self) -> Vec<Message> {
        self.rx.try_iter().collect()
    }

    /// Drains at `cadence` until `stop` is set.
    pub fn run_drain_loop<F>(&self, cadence: Duration, stop: Arc<AtomicBool>, mut handler: F)
    where
        F: FnMut(Message) -> Result<(), String>,
    {
        let cadence = cadence.min(DRAIN_CADENCE);
        while !stop.load(Ordering::Relaxed) {
            match self.rx.recv_timeout(cadence) {
                Ok(first) => {
                    let tag = first.tag();
                    if let Err(err) = handler(first) {
                        warn!(tag = %tag, error = %err, "Message handler failed");
                    }
                    self.drain(&mut handler);
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_drain_preserves_order() {
        let bus = MessageBus::new();
        bus.send(Message::log("one"));
        bus.send(Message::StartLabel {
            text: "Sol".into(),
        });
        bus.send(Message::log("two"));

        let mut tags = Vec::new();
        let count = bus.drain(|m| {
            tags.push(m.tag());
            Ok(())
        });
        assert_eq!(count, 3);
        assert_eq!(tags, vec!["log", "start_label", "log"]);
        assert!(bus.is_empty());
    }

    #[test]
    fn test_handler_error_does_not_stop_drain() {
        let bus = MessageBus::new();
        bus.send(Message::log("bad"));
        bus.send(Message::log("good"));

        let mut seen = Vec::new();
        bus.drain(|m| {
            if let Message::Log { text } = &m {
                seen.push(text.clone());
                if text == "bad" {
                    return Err("boom".into());
                }
            }
            Ok(())
        });
        assert_eq!(seen, vec!["bad", "good"]);
    }

    #[test]
    fn test_per_producer_order_across_threads() {
        let bus = MessageBus::new();
        let producer = bus.clone();
        let handle = thread::spawn(move || {
            for i in 0..50 {
                producer.send(Message::log(format!("w{i}")));
            }
        });
        handle.join().unwrap();

        let texts: Vec<String> = bus
            .take_all()
            .into_iter()
            .filter_map(|m| match m {
                Message::Log { text } => Some(text),
                _ => None,
            })
            .collect();
        let expected: Vec<String> = (0..50).map(|i| format!("w{i}")).collect();
        assert_eq!(texts, expected);
    }

    #[test]
    fn test_tags_for_targeted_messages() {
        let status = Message::Status {
            target: "neutron".into(),
            text: "done".into(),
            color: "green".into(),
        };
        assert_eq!(status.tag(), "status_neutron");
        let select = Message::Select {
            target: "trade".into(),
            index: 2,
        };
        assert_eq!(select.tag(), "select_trade");
    }
}
