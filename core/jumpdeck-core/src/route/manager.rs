//! Route list holder and the one-job-at-a-time worker gate.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use crate::bus::{Message, StatusLevel};
use crate::error::{NavError, Result};
use crate::notify::Notifier;
use crate::session::normalize_system;

#[derive(Debug, Default)]
struct ManagerState {
    systems: Vec<String>,
    route_type: Option<String>,
    index: usize,
    busy: bool,
    current_mode: Option<String>,
}

pub struct RouteManager {
    state: Mutex<ManagerState>,
    notifier: Notifier,
}

impl RouteManager {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            state: Mutex::new(ManagerState::default()),
            notifier,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_route(&self, systems: Vec<String>, route_type: &str) {
        let mut state = self.lock();
        state.systems = systems;
        state.route_type = Some(route_type.to_string());
        state.index = 0;
    }

    pub fn clear_route(&self) {
        let mut state = self.lock();
        state.systems.clear();
        state.route_type = None;
        state.index = 0;
    }

    pub fn systems(&self) -> Vec<String> {
        self.lock().systems.clone()
    }

    pub fn route_type(&self) -> Option<String> {
        self.lock().route_type.clone()
    }

    /// The system after `current`, or the stored next hop when `current` is off-route.
    pub fn get_next_system(&self, current: Option<&str>) -> Option<String> {
        let state = self.lock();
        let position = current.and_then(|c| find(&state.systems, c));
        match position {
            Some(p) => state.systems.get(p + 1).cloned(),
            None => state.systems.get(state.index).cloned(),
        }
    }

    /// Moves the index past `current` and returns the new next hop.
    pub fn advance_route(&self, current: &str) -> Option<String> {
        let mut state = self.lock();
        if let Some(p) = find(&state.systems, current) {
            state.index = (p + 1).min(state.systems.len());
        }
        state.systems.get(state.index).cloned()
    }

    pub fn is_busy(&self) -> bool {
        self.lock().busy
    }

    pub fn current_mode(&self) -> Option<String> {
        self.lock().current_mode.clone()
    }

    /// Spawns `job` unless another route computation is running.
    ///
    /// `target` is the panel whose status line shows progress. The busy flag is
    /// cleared when the job returns or unwinds.
    pub fn start_route_thread<F>(self: &Arc<Self>, mode: &str, target: &str, job: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.lock();
            if state.busy {
                let running = state.current_mode.clone().unwrap_or_default();
                drop(state);
                warn!(requested = %mode, running = %running, "Route request rejected; worker busy");
                self.notifier.status(
                    StatusLevel::Warn,
                    "ROUTE_BUSY",
                    format!("Another route is being computed ({running})"),
                    "route_manager",
                );
                return Err(NavError::RouteBusy { mode: running });
            }
            state.busy = true;
            state.current_mode = Some(mode.to_string());
        }

        self.notifier.bus().send(Message::Status {
            target: target.to_string(),
            text: format!("Computing {mode} route..."),
            color: "busy".to_string(),
        });

        let manager = Arc::clone(self);
        let mode_label = mode.to_string();
        let spawned = thread::Builder::new()
            .name(format!("route-{mode}"))
            .spawn(move || {
                let _busy = BusyGuard { manager: &manager };
                info!(mode = %mode_label, "Route job started");
                job();
                info!(mode = %mode_label, "Route job finished");
            });
        match spawned {
            Ok(handle) => Ok(handle),
            Err(err) => {
                self.release();
                Err(NavError::io("spawn route worker", err))
            }
        }
    }

    /// Running jobs cannot be interrupted; this only records the request.
    pub fn cancel_route(&self) {
        let mode = self.current_mode();
        info!(mode = ?mode, "Route cancel requested; worker runs to completion");
    }

    fn release(&self) {
        let mut state = self.lock();
        state.busy = false;
        state.current_mode = None;
    }
}

struct BusyGuard<'a> {
    manager: &'a RouteManager,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.manager.release();
    }
}

fn find(systems: &[String], name: &str) -> Option<usize> {
    let norm = normalize_system(name);
    systems.iter().position(|s| normalize_system(s) == norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use crate::config::ConfigStore;
    use std::sync::mpsc;

    fn manager() -> (MessageBus, Arc<RouteManager>) {
        let bus = MessageBus::new();
        let notifier = Notifier::new(bus.clone(), Arc::new(ConfigStore::in_memory()));
        (bus, Arc::new(RouteManager::new(notifier)))
    }

    #[test]
    fn test_next_and_advance() {
        let (_bus, m) = manager();
        m.set_route(vec!["Sol".into(), "Lave".into(), "Leesti".into()], "neutron");
        assert_eq!(m.get_next_system(Some("sol")).as_deref(), Some("Lave"));
        assert_eq!(m.get_next_system(Some("Colonia")).as_deref(), Some("Sol"));
        assert_eq!(m.advance_route("LAVE").as_deref(), Some("Leesti"));
        assert_eq!(m.get_next_system(None).as_deref(), Some("Leesti"));
        assert_eq!(m.advance_route("Leesti"), None);
        m.clear_route();
        assert!(m.systems().is_empty());
    }

    #[test]
    fn test_second_job_rejected_while_busy() {
        let (bus, m) = manager();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let first = m
            .start_route_thread("neutron", "neutron", move || {
                let _ = release_rx.recv();
            })
            .unwrap();
        assert!(m.is_busy());

        let err = m.start_route_thread("trade", "trade", || {}).unwrap_err();
        assert!(matches!(err, NavError::RouteBusy { ref mode } if mode == "neutron"));
        let busy_events = bus
            .take_all()
            .into_iter()
            .filter(|msg| matches!(msg, Message::StatusEvent(e) if e.code == "ROUTE_BUSY"))
            .count();
        assert_eq!(busy_events, 1);

        release_tx.send(()).unwrap();
        first.join().unwrap();
        assert!(!m.is_busy());
        assert!(m.start_route_thread("trade", "trade", || {}).unwrap().join().is_ok());
    }

    #[test]
    fn test_panicking_job_releases_busy_flag() {
        let (_bus, m) = manager();
        let handle = m.start_route_thread("riches", "riches", || panic!("boom")).unwrap();
        assert!(handle.join().is_err());
        assert!(!m.is_busy());
    }
}
