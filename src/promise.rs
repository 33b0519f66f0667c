//! Keyed rendezvous between buffer producers and buffer consumers
//!
//! A [`PromiseRegistry`] lets a producer thread publish owned byte buffers
//! under a `(key, context)` pair while a consumer thread waits for them. Each
//! slot is single-shot: it delivers exactly one buffer to exactly one
//! consumer, and a second fulfillment of the same key fails.
//!
//! The registry is an explicit object scoped to one load rather than
//! process-wide state: the caller creates it, hands a clone to the producer
//! thread, and passes it into the future-backed load input. Clones share the
//! same slot map.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// One single-shot delivery slot.
#[derive(Debug)]
struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

#[derive(Debug)]
enum SlotState {
    /// Waiting for a producer.
    Pending,
    /// Buffer delivered, not yet taken.
    Fulfilled(Vec<u8>),
    /// Taken by the consumer, or abandoned. Further fulfillments fail.
    Closed,
}

impl Slot {
    fn pending() -> Arc<Self> {
        Arc::new(Slot {
            state: Mutex::new(SlotState::Pending),
            ready: Condvar::new(),
        })
    }
}

fn composite_key(key: &str, context: &str) -> String {
    format!("{key}:{context}")
}

/// Registry of pending buffer promises, keyed by `(promise key, context)`.
///
/// Cheap to clone; all clones share the same slots. The `context` string
/// disambiguates two loads that use the same logical key (e.g. two
/// simultaneous loads of the same path) within one registry.
#[derive(Clone, Default)]
#[derive(Debug)]
pub struct PromiseRegistry {
    slots: Arc<Mutex<HashMap<String, Arc<Slot>>>>,
}

impl PromiseRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `(key, context)` and return the consumer handle.
    ///
    /// If a producer already fulfilled the key, the handle's
    /// [`take`](PromiseHandle::take) returns immediately. A slot left closed
    /// by an earlier consumer is replaced with a fresh pending one.
    pub fn enroll(&self, key: &str, context: &str) -> PromiseHandle {
        let composite = composite_key(key, context);
        let mut slots = self.slots.lock().unwrap();
        let slot = slots
            .entry(composite.clone())
            .or_insert_with(Slot::pending);
        if matches!(*slot.state.lock().unwrap(), SlotState::Closed) {
            *slot = Slot::pending();
        }
        debug!(key = %composite, "enrolled promise consumer");
        PromiseHandle {
            slot: Arc::clone(slot),
            key: composite,
            taken: false,
        }
    }

    /// Deliver `data` under `(key, context)`.
    ///
    /// Creates the slot if no consumer enrolled yet (the producer may race
    /// ahead). Fails with [`Error::DuplicateFulfillment`] if the slot was
    /// already fulfilled, already consumed, or abandoned by its consumer.
    pub fn try_fulfill(&self, key: &str, context: &str, data: Vec<u8>) -> Result<()> {
        let composite = composite_key(key, context);
        let slot = {
            let mut slots = self.slots.lock().unwrap();
            Arc::clone(slots.entry(composite.clone()).or_insert_with(Slot::pending))
        };
        let mut state = slot.state.lock().unwrap();
        match *state {
            SlotState::Pending => {
                *state = SlotState::Fulfilled(data);
                slot.ready.notify_one();
                debug!(key = %composite, "fulfilled promise");
                Ok(())
            }
            SlotState::Fulfilled(_) | SlotState::Closed => {
                Err(Error::DuplicateFulfillment { key: composite })
            }
        }
    }

    /// Boolean-returning variant of [`try_fulfill`](Self::try_fulfill) for
    /// producer threads that only need to know whether delivery happened.
    /// Failures are logged.
    pub fn fulfill(&self, key: &str, context: &str, data: Vec<u8>) -> bool {
        match self.try_fulfill(key, context, data) {
            Ok(()) => true,
            Err(err) => {
                warn!(key, context, "promise fulfillment rejected: {err}");
                false
            }
        }
    }

    /// Number of live slots, closed ones included. Test and diagnostic aid.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    /// True when no slot exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer side of one promise slot.
///
/// Dropping a handle without taking it closes the slot, so a producer that
/// fulfills afterwards gets `false` back instead of publishing into the void.
#[derive(Debug)]
pub struct PromiseHandle {
    slot: Arc<Slot>,
    key: String,
    taken: bool,
}

impl PromiseHandle {
    /// Block until the producer delivers, then return the buffer.
    ///
    /// Single-shot: the handle is consumed and the slot is closed.
    pub fn take(mut self) -> Vec<u8> {
        let mut state = self.slot.state.lock().unwrap();
        loop {
            match std::mem::replace(&mut *state, SlotState::Closed) {
                SlotState::Fulfilled(data) => {
                    self.taken = true;
                    debug!(key = %self.key, bytes = data.len(), "took promised buffer");
                    return data;
                }
                SlotState::Pending => {
                    *state = SlotState::Pending;
                    state = self.slot.ready.wait(state).unwrap();
                }
                SlotState::Closed => {
                    unreachable!("promise slot closed while its consumer handle was live")
                }
            }
        }
    }

    /// The composite key this handle waits on.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for PromiseHandle {
    fn drop(&mut self) {
        if !self.taken {
            *self.slot.state.lock().unwrap() = SlotState::Closed;
        }
    }
}
