//! Single-flight coordination for concurrent renders of the same key.
//!
//! When several callers miss the cache for the same derivative at once, only
//! the first (the leader) renders it. The others (followers) block until the
//! leader publishes its outcome and reuse the leader's bytes. If the leader
//! fails, or panics, followers are told so and render on their own, so one
//! bad attempt never turns into an error for a different caller.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

/// Outcome slot shared between a leader and its followers.
pub struct Flight<T> {
    result: Mutex<Option<Option<T>>>,
    cv: Condvar,
}

impl<T: Clone> Flight<T> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    fn set(&self, value: Option<T>) {
        let mut slot = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(value);
            self.cv.notify_all();
        }
    }

    /// Block until the leader finishes. `None` means the leader produced
    /// nothing usable.
    pub fn wait(&self) -> Option<T> {
        let mut guard = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(outcome) = guard.as_ref() {
                return outcome.clone();
            }
            guard = self.cv.wait(guard).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Map of keys currently being computed.
pub struct SingleFlight<T> {
    flights: Mutex<HashMap<String, Arc<Flight<T>>>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }
}

/// What a caller became on [`SingleFlight::join`].
pub enum Joined<'a, T: Clone> {
    Leader(Leader<'a, T>),
    Follower(Arc<Flight<T>>),
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `key`. The first caller becomes the leader and
    /// must finish the flight; everyone arriving before that follows it.
    pub fn join(&self, key: &str) -> Joined<'_, T> {
        let mut map = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = map.get(key) {
            return Joined::Follower(Arc::clone(existing));
        }

        let flight = Arc::new(Flight::new());
        map.insert(key.to_string(), Arc::clone(&flight));
        Joined::Leader(Leader {
            owner: self,
            key: key.to_string(),
            flight,
            finished: false,
        })
    }

    /// Number of keys with a leader at work.
    pub fn in_progress(&self) -> usize {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn remove(&self, key: &str) {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// Held by the caller doing the work. Dropping it without calling
/// [`finish`](Leader::finish) releases followers with `None`.
pub struct Leader<'a, T: Clone> {
    owner: &'a SingleFlight<T>,
    key: String,
    flight: Arc<Flight<T>>,
    finished: bool,
}

impl<T: Clone> Leader<'_, T> {
    /// Publish the outcome and retire the key, so later arrivals start a new
    /// flight (normally hitting the cache instead).
    pub fn finish(mut self, value: Option<T>) {
        self.complete(value);
    }

    fn complete(&mut self, value: Option<T>) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.owner.remove(&self.key);
        self.flight.set(value);
    }
}

impl<T: Clone> Drop for Leader<'_, T> {
    fn drop(&mut self) {
        self.complete(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn first_caller_leads_second_follows() {
        let sf = SingleFlight::<u32>::new();
        let leader = match sf.join("k") {
            Joined::Leader(l) => l,
            Joined::Follower(_) => panic!("first caller must lead"),
        };
        assert!(matches!(sf.join("k"), Joined::Follower(_)));
        assert_eq!(sf.in_progress(), 1);

        leader.finish(Some(7));
        assert_eq!(sf.in_progress(), 0);
        assert!(matches!(sf.join("k"), Joined::Leader(_)));
    }

    #[test]
    fn different_keys_do_not_share() {
        let sf = SingleFlight::<u32>::new();
        let _a = sf.join("a");
        assert!(matches!(sf.join("b"), Joined::Leader(_)));
    }

    #[test]
    fn follower_receives_leader_value() {
        let sf = SingleFlight::<Vec<u8>>::new();
        let Joined::Leader(leader) = sf.join("k") else {
            panic!("expected leader");
        };
        let Joined::Follower(flight) = sf.join("k") else {
            panic!("expected follower");
        };

        leader.finish(Some(b"bytes".to_vec()));
        assert_eq!(flight.wait(), Some(b"bytes".to_vec()));
    }

    #[test]
    fn dropped_leader_releases_followers_with_none() {
        let sf = SingleFlight::<u32>::new();
        let Joined::Leader(leader) = sf.join("k") else {
            panic!("expected leader");
        };
        let Joined::Follower(flight) = sf.join("k") else {
            panic!("expected follower");
        };

        drop(leader);
        assert_eq!(flight.wait(), None);
        assert_eq!(sf.in_progress(), 0);
    }

    #[test]
    fn concurrent_callers_compute_once() {
        let sf = Arc::new(SingleFlight::<u64>::new());
        let computed = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sf = Arc::clone(&sf);
                let computed = Arc::clone(&computed);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    match sf.join("same") {
                        Joined::Leader(leader) => {
                            computed.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            leader.finish(Some(42));
                            42
                        }
                        Joined::Follower(flight) => flight.wait().unwrap_or(0),
                    }
                })
            })
            .collect();

        let results: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.iter().all(|&v| v == 42));
        // Late arrivals after the leader retired may lead a second flight.
        assert!(computed.load(Ordering::SeqCst) >= 1);
    }
}
