//! In-process single-flight for identical in-progress requests.
//!
//! The first caller for a key runs the thunk; concurrent callers block on the
//! record's condvar and receive a clone of the same outcome. The record is
//! removed when the leader finishes, whatever the outcome (including a panic).

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use tracing::debug;

struct Inflight<T, E> {
    outcome: Mutex<Option<Result<T, E>>>,
    done: Condvar,
}

impl<T, E> Inflight<T, E> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }
}

pub struct SingleFlight<T, E> {
    inflight: Mutex<HashMap<String, Arc<Inflight<T, E>>>>,
}

impl<T, E> Default for SingleFlight<T, E> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

/// Whether the caller ran the thunk or waited on another caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    Leader,
    Follower,
}

impl<T: Clone, E: Clone> SingleFlight<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> usize {
        self.inflight.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Runs `thunk` once per concurrent `key`. `on_panic` produces the error
    /// handed to followers if the leader's thunk unwinds.
    pub fn run<F>(&self, key: &str, on_panic: E, thunk: F) -> (Result<T, E>, FlightRole)
    where
        F: FnOnce() -> Result<T, E>,
    {
        let (record, role) = {
            let mut table = match self.inflight.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match table.get(key) {
                Some(existing) => (Arc::clone(existing), FlightRole::Follower),
                None => {
                    let record = Arc::new(Inflight::new());
                    table.insert(key.to_string(), Arc::clone(&record));
                    (record, FlightRole::Leader)
                }
            }
        };

        if role == FlightRole::Follower {
            debug!(key = %key, "Waiting on in-flight request");
            let mut outcome = match record.outcome.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            while outcome.is_none() {
                outcome = match record.done.wait(outcome) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
            let result = outcome.clone().unwrap_or(Err(on_panic));
            return (result, role);
        }

        let guard = LeaderGuard {
            flight: self,
            key,
            record: &record,
            fallback: Some(on_panic),
        };
        let result = thunk();
        guard.finish(result.clone());
        (result, role)
    }
}

/// Publishes the outcome and removes the record, also on unwind.
struct LeaderGuard<'a, T, E> {
    flight: &'a SingleFlight<T, E>,
    key: &'a str,
    record: &'a Arc<Inflight<T, E>>,
    fallback: Option<E>,
}

impl<T, E> LeaderGuard<'_, T, E> {
    fn finish(mut self, result: Result<T, E>) {
        self.publish(result);
        self.fallback = None;
    }

    fn publish(&self, result: Result<T, E>) {
        {
            let mut outcome = match self.record.outcome.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *outcome = Some(result);
        }
        self.record.done.notify_all();
        let mut table = match self.flight.inflight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.remove(self.key);
    }
}

impl<T, E> Drop for LeaderGuard<'_, T, E> {
    fn drop(&mut self) {
        if let Some(err) = self.fallback.take() {
            self.publish(Err(err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_concurrent_callers_share_one_run() {
        let flight: Arc<SingleFlight<String, String>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let flight = Arc::clone(&flight);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    flight
                        .run("route|sol|colonia", "panicked".into(), || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(150));
                            Ok("route-ok".to_string())
                        })
                        .0
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.as_deref() == Ok("route-ok")));
        assert_eq!(flight.in_flight(), 0);
    }

    #[test]
    fn test_error_is_shared_and_record_removed() {
        let flight: SingleFlight<u32, String> = SingleFlight::new();
        let (result, role) = flight.run("k", "panicked".into(), || Err("HTTP 500".to_string()));
        assert_eq!(role, FlightRole::Leader);
        assert_eq!(result, Err("HTTP 500".to_string()));
        assert_eq!(flight.in_flight(), 0);

        let (result, _) = flight.run("k", "panicked".into(), || Ok(7));
        assert_eq!(result, Ok(7));
    }

    #[test]
    fn test_panicking_leader_releases_key() {
        let flight: Arc<SingleFlight<u32, String>> = Arc::new(SingleFlight::new());
        let f = Arc::clone(&flight);
        let joined = thread::spawn(move || {
            f.run("k", "leader panicked".into(), || panic!("boom"));
        })
        .join();
        assert!(joined.is_err());
        assert_eq!(flight.in_flight(), 0);
    }
}
