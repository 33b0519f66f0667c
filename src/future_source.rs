//! A byte source whose backing buffer arrives later
//!
//! A [`FutureByteSource`] is created against a promise registry before the
//! producer has delivered anything. The first positional operation blocks on
//! the registry until the buffer shows up, then wraps it in a
//! [`BufferSource`] and keeps it; later operations reuse the cached buffer
//! without touching the registry again.

use tracing::debug;

use crate::byte_source::BufferSource;
use crate::promise::{PromiseHandle, PromiseRegistry};

#[derive(Debug)]
enum FutureState {
    /// Enrolled, buffer not yet taken from the registry.
    Pending(PromiseHandle),
    /// Buffer taken and wrapped; the registry is out of the picture.
    Ready(BufferSource),
}

/// A promised byte buffer, extracted on first use.
///
/// Dropping a source that was never extracted closes its registry slot, so
/// late producers observe the failure instead of publishing into the void.
#[derive(Debug)]
pub struct FutureByteSource {
    key: String,
    context: String,
    state: FutureState,
}

impl FutureByteSource {
    /// Enroll for `(key, context)` in `registry`.
    pub fn new(registry: &PromiseRegistry, key: &str, context: &str) -> Self {
        let handle = registry.enroll(key, context);
        Self {
            key: key.to_string(),
            context: context.to_string(),
            state: FutureState::Pending(handle),
        }
    }

    /// The promise key this source waits on.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The context string disambiguating this load.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// True once the buffer has been taken from the registry.
    pub fn is_extracted(&self) -> bool {
        matches!(self.state, FutureState::Ready(_))
    }

    /// Block until the promised buffer is available and return it.
    ///
    /// Idempotent: the first call takes ownership of the buffer from the
    /// registry, later calls return the cached buffer.
    pub fn extract(&mut self) -> &mut BufferSource {
        if matches!(self.state, FutureState::Pending(_)) {
            let pending = std::mem::replace(
                &mut self.state,
                FutureState::Ready(BufferSource::new(Vec::new())),
            );
            if let FutureState::Pending(handle) = pending {
                debug!(key = %self.key, context = %self.context, "waiting for promised buffer");
                self.state = FutureState::Ready(BufferSource::new(handle.take()));
            }
        }
        match &mut self.state {
            FutureState::Ready(buffer) => buffer,
            FutureState::Pending(_) => unreachable!("future source was just extracted"),
        }
    }
}
