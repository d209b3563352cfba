//! Claim-and-share coalescing of concurrent non-blocking loads
//!
//! The first request for a location claims it and becomes the owner; later
//! requests for the same location wait for the owner's outcome instead of
//! executing the unit again. Every nested wait is recorded as an edge from the
//! requesting unit to the requested one so that two chains waiting on each other
//! fail fast with [`LoadError::CircularLoad`] instead of hanging.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use crate::error::LoadError;

type Outcome = Option<Result<Value, LoadError>>;

#[derive(Default)]
struct FlightState {
    flights: HashMap<PathBuf, watch::Receiver<Outcome>>,
    /// unit -> units it is currently waiting on, with multiplicity
    waits: HashMap<PathBuf, HashMap<PathBuf, usize>>,
}

impl FlightState {
    /// Whether `from` (transitively) waits on `to`
    fn reaches(&self, from: &Path, to: &Path) -> bool {
        let mut pending = vec![from.to_path_buf()];
        let mut seen = HashSet::new();
        while let Some(current) = pending.pop() {
            if current == to {
                return true;
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(next) = self.waits.get(&current) {
                pending.extend(next.keys().cloned());
            }
        }
        false
    }

    fn add_wait(&mut self, parent: &Path, key: &Path) {
        *self
            .waits
            .entry(parent.to_path_buf())
            .or_default()
            .entry(key.to_path_buf())
            .or_insert(0) += 1;
    }

    fn remove_wait(&mut self, parent: &Path, key: &Path) {
        if let Some(targets) = self.waits.get_mut(parent) {
            if let Some(count) = targets.get_mut(key) {
                *count -= 1;
                if *count == 0 {
                    targets.remove(key);
                }
            }
            if targets.is_empty() {
                self.waits.remove(parent);
            }
        }
    }
}

/// Table of loads currently in flight
#[derive(Default)]
pub struct FlightTable {
    state: Mutex<FlightState>,
}

/// Result of a claim
pub enum Claim {
    /// This request executes the unit and must publish the outcome
    Owner(FlightGuard),
    /// Another request is executing the unit
    Waiter(Waiter),
}

impl FlightTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FlightState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically claim `key`, or join the load that already holds it
    ///
    /// `parent` is the unit issuing the request, absent for top-level loads.
    pub fn claim(self: &Arc<Self>, key: &Path, parent: Option<&Path>) -> Result<Claim, LoadError> {
        let mut state = self.lock();

        if let Some(receiver) = state.flights.get(key).cloned() {
            if let Some(parent) = parent {
                if state.reaches(key, parent) {
                    return Err(LoadError::CircularLoad {
                        location: key.to_path_buf(),
                        chain: format!(
                            "'{}' waits on '{}' which is already waiting on it",
                            parent.display(),
                            key.display()
                        ),
                    });
                }
                state.add_wait(parent, key);
            }
            return Ok(Claim::Waiter(Waiter {
                receiver,
                _edge: EdgeGuard::new(self, key, parent),
            }));
        }

        let (sender, receiver) = watch::channel(None);
        state.flights.insert(key.to_path_buf(), receiver);
        if let Some(parent) = parent {
            state.add_wait(parent, key);
        }

        Ok(Claim::Owner(FlightGuard {
            sender,
            key: key.to_path_buf(),
            table: Arc::clone(self),
            _edge: EdgeGuard::new(self, key, parent),
        }))
    }

    pub fn in_flight(&self) -> usize {
        self.lock().flights.len()
    }
}

struct EdgeGuard {
    table: Arc<FlightTable>,
    edge: Option<(PathBuf, PathBuf)>,
}

impl EdgeGuard {
    fn new(table: &Arc<FlightTable>, key: &Path, parent: Option<&Path>) -> Self {
        Self {
            table: Arc::clone(table),
            edge: parent.map(|parent| (parent.to_path_buf(), key.to_path_buf())),
        }
    }
}

impl Drop for EdgeGuard {
    fn drop(&mut self) {
        if let Some((parent, key)) = &self.edge {
            self.table.lock().remove_wait(parent, key);
        }
    }
}

/// Ownership of an in-flight load; dropping it releases the claim
pub struct FlightGuard {
    sender: watch::Sender<Outcome>,
    key: PathBuf,
    table: Arc<FlightTable>,
    _edge: EdgeGuard,
}

impl FlightGuard {
    /// Publish the outcome to every waiter and release the claim
    pub fn complete(self, outcome: &Result<Value, LoadError>) {
        self.sender.send_replace(Some(outcome.clone()));
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.table.lock().flights.remove(&self.key);
    }
}

pub struct Waiter {
    receiver: watch::Receiver<Outcome>,
    _edge: EdgeGuard,
}

impl Waiter {
    /// Outcome of the owner's load, or `None` when the owner went away without
    /// publishing one
    pub async fn wait(mut self) -> Option<Result<Value, LoadError>> {
        let outcome = match self.receiver.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome
    }
}
