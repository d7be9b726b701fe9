//! Pending-event buffer shared between the watcher callback and the flush loop.

use std::mem;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use super::event::ChangeEvent;

#[derive(Debug, Default)]
struct Pending {
    events: Vec<ChangeEvent>,
    last_arrival: Option<Instant>,
}

/// Records raw change notifications until the next flush takes them.
///
/// Appends always land in the current buffer; [`EventCollector::take`] swaps
/// it for an empty one under the same lock, so an event is either part of the
/// batch being flushed or of the next one, never both and never neither.
#[derive(Debug, Default)]
pub struct EventCollector {
    pending: Mutex<Pending>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an event, stamping the arrival time.
    pub fn on_event(&self, event: ChangeEvent) {
        let now = Instant::now();
        let mut pending = self.lock();
        pending.events.push(event);
        pending.last_arrival = Some(now);
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }

    /// Time since the most recent append, or `None` when nothing is pending.
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        let pending = self.lock();
        if pending.events.is_empty() {
            return None;
        }
        pending
            .last_arrival
            .map(|last| now.saturating_duration_since(last))
    }

    /// Atomically swap out every pending event.
    pub fn take(&self) -> Vec<ChangeEvent> {
        let mut pending = self.lock();
        pending.last_arrival = None;
        mem::take(&mut pending.events)
    }
}
