//! Single-flight helper: collapses concurrent cold-path work for the same key
//! into one in-flight attempt and broadcasts the leader's result to every
//! waiter. Grounded on the teacher's `refresh_in_progress: AtomicBool` +
//! `compare_exchange` + bounded exponential-backoff poll loop used to
//! de-duplicate JWKS refreshes.
//!
//! Unlike the teacher's version (one flag for one resource), this is generic
//! over a key so it can back both per-issuer JWKS fetch and first-time
//! expression compilation. Unlike a plain "wait then re-probe the cache"
//! design, waiters here receive the leader's actual value directly — the
//! leader publishes it into the flight itself before waking anyone up, so no
//! one can observe a woken-but-not-yet-cached window.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

struct Flight<T> {
    result: Mutex<Option<T>>,
    cond: Condvar,
}

impl<T> Flight<T> {
    fn new() -> Self {
        Self { result: Mutex::new(None), cond: Condvar::new() }
    }
}

pub struct SingleFlight<T> {
    inner: Mutex<HashMap<String, Arc<Flight<T>>>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SingleFlight<T> {
    pub fn new() -> Self {
        Self { inner: Mutex::new(HashMap::new()) }
    }
}

impl<T: Clone> SingleFlight<T> {
    /// Runs `work` for `key`, but only one caller at a time actually executes
    /// it. Concurrent callers for the same key wait on the leader's flight
    /// with a bounded exponential backoff (10ms -> 20ms -> 40ms -> 80ms ->
    /// 100ms cap, 1s overall timeout, mirroring the teacher's poll loop) and
    /// receive the same published value the leader computed — they never
    /// re-probe a cache the leader may not have written to yet. Returns
    /// `None` only if the wait exceeds the timeout without a result ever
    /// being published.
    pub fn run<F>(&self, key: &str, work: F) -> Option<T>
    where
        F: FnOnce() -> T,
    {
        let (flight, is_leader) = {
            let mut flights = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            match flights.get(key) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let flight = Arc::new(Flight::new());
                    flights.insert(key.to_string(), flight.clone());
                    (flight, true)
                }
            }
        };

        if is_leader {
            let value = work();
            {
                let mut slot = flight.result.lock().unwrap_or_else(|e| e.into_inner());
                *slot = Some(value.clone());
            }
            flight.cond.notify_all();
            self.inner.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
            Some(value)
        } else {
            Self::wait_for(&flight)
        }
    }

    fn wait_for(flight: &Flight<T>) -> Option<T> {
        let deadline = Instant::now() + Duration::from_secs(1);
        let mut backoff = Duration::from_millis(10);
        let mut guard = flight.result.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(value) = guard.as_ref() {
                return Some(value.clone());
            }
            if Instant::now() >= deadline {
                return None;
            }
            let (g, _timeout) =
                flight.cond.wait_timeout(guard, backoff).unwrap_or_else(|e| e.into_inner());
            guard = g;
            backoff = (backoff * 2).min(Duration::from_millis(100));
        }
    }
}
