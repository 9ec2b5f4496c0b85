// src/task/applied.rs

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::status::StatusLevel;

/// Single-flight guard for runtime actions.
///
/// Holds the highest status an action has been dispatched for. A claim only
/// succeeds when it strictly exceeds the current value, and a successful claim
/// is the only permission to dispatch an action for that status.
#[derive(Debug)]
pub struct AppliedStatus<S> {
    value: AtomicU8,
    _status: PhantomData<S>,
}

impl<S: StatusLevel> AppliedStatus<S> {
    pub fn new(initial: S) -> Self {
        Self {
            value: AtomicU8::new(initial.ordinal()),
            _status: PhantomData,
        }
    }

    pub fn get(&self) -> S {
        decode(self.value.load(Ordering::Acquire))
    }

    /// Claim `status` for a new action. Returns `false` if an equal or
    /// higher status has already been claimed.
    pub fn try_claim(&self, status: S) -> bool {
        let target = status.ordinal();
        self.value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (target > current).then_some(target)
            })
            .is_ok()
    }
}

impl<S: StatusLevel> Default for AppliedStatus<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

/// Highest status acknowledged by the downstream event consumer.
///
/// Shared between an entity and the events emitted for it, so an
/// acknowledgement can land from the consumer's side without touching the
/// owning task loop.
#[derive(Debug)]
pub struct SentStatus<S> {
    value: AtomicU8,
    _status: PhantomData<S>,
}

impl<S: StatusLevel> SentStatus<S> {
    pub fn new(initial: S) -> Self {
        Self {
            value: AtomicU8::new(initial.ordinal()),
            _status: PhantomData,
        }
    }

    pub fn get(&self) -> S {
        decode(self.value.load(Ordering::Acquire))
    }

    /// Record an acknowledged status. Never moves backwards.
    pub fn record(&self, status: S) {
        self.value.fetch_max(status.ordinal(), Ordering::AcqRel);
    }
}

impl<S: StatusLevel> Default for SentStatus<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

fn decode<S: StatusLevel>(raw: u8) -> S {
    // Only ordinals produced by `S::ordinal` are ever stored.
    S::from_ordinal(raw).unwrap_or_default()
}
