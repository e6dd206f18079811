//! Bounded event buffer with flush scheduling.

use crate::event::BotTriggerEvent;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of [`EventTracker::track_batch_triggers`](super::EventTracker::track_batch_triggers)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOperationResult {
    pub successful: usize,
    pub failed: usize,
    pub processing_time_ms: u64,
}

pub(crate) struct EventBuffer {
    events: VecDeque<BotTriggerEvent>,
    /// When the oldest buffered event arrived (or was re-queued)
    oldest_at: Option<Instant>,
    /// No scheduled flush before this instant after a failure
    backoff_until: Option<Instant>,
    capacity: usize,
}

impl EventBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        EventBuffer {
            events: VecDeque::new(),
            oldest_at: None,
            backoff_until: None,
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Append one event; returns how many old events were dropped to fit it
    pub(crate) fn push(&mut self, event: BotTriggerEvent, now: Instant) -> usize {
        if self.events.is_empty() {
            self.oldest_at = Some(now);
        }
        self.events.push_back(event);
        self.enforce_capacity()
    }

    /// Remove up to `n` events from the front
    pub(crate) fn take(&mut self, n: usize) -> Vec<BotTriggerEvent> {
        let n = n.min(self.events.len());
        let chunk: Vec<_> = self.events.drain(..n).collect();
        if self.events.is_empty() {
            self.oldest_at = None;
        }
        chunk
    }

    /// Put a failed chunk back at the front. The retry waits `backoff`, and
    /// overflow drops the oldest events. Returns the number dropped.
    pub(crate) fn requeue_front(&mut self, chunk: Vec<BotTriggerEvent>, now: Instant, backoff: Duration) -> usize {
        for event in chunk.into_iter().rev() {
            self.events.push_front(event);
        }
        if !self.events.is_empty() {
            self.oldest_at = Some(self.oldest_at.map_or(now, |at| at.min(now)));
            self.backoff_until = Some(now + backoff);
        }
        self.enforce_capacity()
    }

    pub(crate) fn clear_backoff(&mut self) {
        self.backoff_until = None;
    }

    /// Whether a scheduled flush should run now
    pub(crate) fn is_due(&self, now: Instant, batch_size: usize, interval: Duration) -> bool {
        let Some(oldest) = self.oldest_at else {
            return false;
        };
        if self.backoff_until.map_or(false, |until| now < until) {
            return false;
        }
        self.events.len() >= batch_size || now >= oldest + interval
    }

    /// Next instant the worker has to look at the buffer, if any
    pub(crate) fn next_deadline(&self, batch_size: usize, interval: Duration) -> Option<Instant> {
        let oldest = self.oldest_at?;
        let scheduled = if self.events.len() >= batch_size {
            oldest
        } else {
            oldest + interval
        };
        Some(match self.backoff_until {
            Some(until) => scheduled.max(until),
            None => scheduled,
        })
    }

    fn enforce_capacity(&mut self) -> usize {
        let overflow = self.events.len().saturating_sub(self.capacity);
        self.events.drain(..overflow);
        overflow
    }
}
