//! Bot ↔ engine frame forwarding and the shared connection cells.
//!
//! Forwarding never looks inside a frame. Whatever the bot sends reaches the
//! engine with the same kind and boundaries, and the other way round. A
//! missing or closed destination drops the frame with a warning; a failed
//! send is logged. Neither is ever reported back to the sending side.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sbox_state::StateStore;
use sbox_transport::{Connection, Frame};

/// A shared, replaceable reference to at most one value.
///
/// Each operation runs under a short blocking lock and never awaits, so
/// `replace`, `take` and `take_if` are the atomic handoff points between
/// the tasks that install a connection and the tasks that tear it down.
pub(crate) struct Slot<T> {
    inner: Mutex<Option<T>>,
}

impl<T> Slot<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Stores `value`, returning what was there before.
    pub(crate) fn replace(&self, value: T) -> Option<T> {
        self.lock().replace(value)
    }

    /// Empties the slot, returning what was there.
    pub(crate) fn take(&self) -> Option<T> {
        self.lock().take()
    }

    /// Empties the slot only if `pred` holds for the current value.
    pub(crate) fn take_if(&self, pred: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut guard = self.lock();
        if guard.as_ref().is_some_and(pred) {
            guard.take()
        } else {
            None
        }
    }

    pub(crate) fn is_some(&self) -> bool {
        self.lock().is_some()
    }

    /// Reads through the current value without taking it.
    pub(crate) fn map<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.lock().as_ref().map(f)
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Slot<T> {
    /// A clone of the current value.
    pub(crate) fn get(&self) -> Option<T> {
        self.lock().clone()
    }
}

impl<T> Slot<Arc<T>> {
    /// Empties the slot only if it still holds this exact allocation.
    pub(crate) fn take_if_same(&self, current: &Arc<T>) -> Option<Arc<T>> {
        self.take_if(|held| Arc::ptr_eq(held, current))
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Which way a frame is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    BotToEngine,
    EngineToBot,
}

impl Direction {
    fn source(self) -> &'static str {
        match self {
            Direction::BotToEngine => "Bot",
            Direction::EngineToBot => "Engine",
        }
    }

    fn dropped_message(self) -> &'static str {
        match self {
            Direction::BotToEngine => "Engine offline, dropping bot packet",
            Direction::EngineToBot => "Bot offline, dropping engine packet",
        }
    }

    fn target(self) -> &'static str {
        match self {
            Direction::BotToEngine => "engine",
            Direction::EngineToBot => "bot",
        }
    }
}

/// Copies one frame to `dest`.
///
/// Returns `true` if the frame was handed to the destination socket.
pub(crate) async fn forward<C: Connection>(
    state: &StateStore,
    direction: Direction,
    dest: Option<Arc<C>>,
    frame: Frame,
) -> bool {
    let Some(dest) = dest.filter(|conn| conn.is_open()) else {
        state.warn(direction.source(), direction.dropped_message());
        return false;
    };

    let kind = frame.kind();
    let len = frame.len();
    match dest.send(frame).await {
        Ok(()) => {
            tracing::trace!(conn_id = %dest.id(), kind, len, ?direction, "frame forwarded");
            true
        }
        Err(e) => {
            state.error(
                direction.source(),
                format!("Failed to forward {kind} frame to {}: {e}", direction.target()),
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_replace_returns_previous() {
        let slot = Slot::new();
        assert!(slot.replace(1).is_none());
        assert_eq!(slot.replace(2), Some(1));
        assert_eq!(slot.get(), Some(2));
    }

    #[test]
    fn test_slot_take_empties() {
        let slot = Slot::new();
        slot.replace("conn");
        assert_eq!(slot.take(), Some("conn"));
        assert!(!slot.is_some());
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_take_if_same_ignores_superseded_value() {
        let slot = Slot::new();
        let old = Arc::new(1);
        let new = Arc::new(1);

        slot.replace(Arc::clone(&old));
        slot.replace(Arc::clone(&new));

        assert!(slot.take_if_same(&old).is_none());
        assert!(slot.is_some());
        assert!(slot.take_if_same(&new).is_some());
        assert!(!slot.is_some());
    }

    #[test]
    fn test_take_if_predicate() {
        let slot = Slot::new();
        slot.replace(5);
        assert!(slot.take_if(|v| *v > 10).is_none());
        assert_eq!(slot.take_if(|v| *v == 5), Some(5));
    }

    #[test]
    fn test_direction_messages() {
        assert_eq!(
            Direction::BotToEngine.dropped_message(),
            "Engine offline, dropping bot packet"
        );
        assert_eq!(
            Direction::EngineToBot.dropped_message(),
            "Bot offline, dropping engine packet"
        );
    }
}
