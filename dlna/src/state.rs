use crate::model::Udn;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Proof that an operation started at a given point in a device's history.
///
/// Every operation takes a ticket before it talks to the device and commits
/// its result with it. A commit only lands when no newer ticket was issued
/// for that device in between, so a slow response never overwrites the
/// outcome of a later operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    udn: Udn,
    generation: u64,
}

#[derive(Debug, Clone, Default)]
struct Slot<T> {
    value: T,
    generation: u64,
}

/// Per-device cached state owned by a single controller
pub struct StateCache<T> {
    devices: Arc<RwLock<HashMap<Udn, Slot<T>>>>,
    /// Shared by all devices and never reset, so generations outlive `remove`
    generations: Arc<AtomicU64>,
}

impl<T: Clone + Default> StateCache<T> {
    pub fn new() -> Self {
        Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self, udn: &str) -> Option<T> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(udn)
            .map(|slot| slot.value.clone())
    }

    /// Cached value, or the initial state for a device never seen before
    pub fn get_or_default(&self, udn: &str) -> T {
        self.get(udn).unwrap_or_default()
    }

    /// Start an operation against `udn`
    pub fn begin(&self, udn: &str) -> Ticket {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        let slot = devices.entry(Udn::new(udn)).or_default();
        slot.generation = self.next_generation();

        Ticket {
            udn: Udn::new(udn),
            generation: slot.generation,
        }
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ticket.udn)
            .map(|slot| slot.generation == ticket.generation)
            .unwrap_or(false)
    }

    /// Apply an operation's result if its ticket is still the latest.
    /// Returns whether the update was applied.
    pub fn commit(&self, ticket: &Ticket, update: impl FnOnce(&mut T)) -> bool {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        match devices.get_mut(&ticket.udn) {
            Some(slot) if slot.generation == ticket.generation => {
                update(&mut slot.value);
                true
            }
            _ => {
                log::debug!("Discarding stale result for {}", ticket.udn);
                false
            }
        }
    }

    /// Apply an authoritative update from outside an operation (events).
    /// Supersedes any operation still in flight.
    pub fn update(&self, udn: &str, update: impl FnOnce(&mut T)) {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        let slot = devices.entry(Udn::new(udn)).or_default();
        slot.generation = self.next_generation();
        update(&mut slot.value);
    }

    pub fn remove(&self, udn: &str) {
        self.devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(udn);
    }

    pub fn len(&self) -> usize {
        self.devices.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Default> Default for StateCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for StateCache<T> {
    fn clone(&self) -> Self {
        Self {
            devices: self.devices.clone(),
            generations: self.generations.clone(),
        }
    }
}
