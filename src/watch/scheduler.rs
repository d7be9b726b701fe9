//! Periodic tick loop that flushes the collector once activity settles.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::collector::EventCollector;
use super::event::ChangeEvent;

/// Marks a flush as running; clears the flag when dropped.
pub struct FlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Detects quiescence in an [`EventCollector`] and hands the batch to a flush
/// callback. At most one flush runs at a time.
pub struct DebounceScheduler {
    collector: Arc<EventCollector>,
    tick: Duration,
    quiet_period: Duration,
    in_flight: AtomicBool,
}

impl DebounceScheduler {
    pub fn new(collector: Arc<EventCollector>, tick: Duration, quiet_period: Duration) -> Self {
        Self {
            collector,
            tick,
            quiet_period,
            in_flight: AtomicBool::new(false),
        }
    }

    /// True when events are pending and none arrived during the quiet period.
    pub fn is_quiescent(&self, now: Instant) -> bool {
        matches!(self.collector.idle_for(now), Some(idle) if idle > self.quiet_period)
    }

    pub fn is_flushing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Claim the single flush slot, or `None` if a flush is already running.
    ///
    /// The slot is shared by every [`run`](Self::run) loop on this scheduler and
    /// by outside callers that flush the collector themselves.
    pub fn try_begin_flush(&self) -> Option<FlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                flag: &self.in_flight,
            })
    }

    /// Tick until `cancel` fires, flushing each settled batch.
    ///
    /// Cancellation is checked once per tick; a flush in progress always runs
    /// to completion.
    pub async fn run<F, Fut>(&self, cancel: CancellationToken, mut flush: F)
    where
        F: FnMut(Vec<ChangeEvent>) -> Fut,
        Fut: Future<Output = ()>,
    {
        info!(
            "Debounce loop started (tick {:?}, quiet period {:?})",
            self.tick, self.quiet_period
        );
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if cancel.is_cancelled() {
                break;
            }
            if !self.is_quiescent(Instant::now()) {
                continue;
            }
            let Some(_guard) = self.try_begin_flush() else {
                continue;
            };
            let batch = self.collector.take();
            if batch.is_empty() {
                continue;
            }
            debug!("Quiet period elapsed, flushing {} events", batch.len());
            flush(batch).await;
        }

        info!("Debounce loop stopped");
    }
}
