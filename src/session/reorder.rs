//! Bounded reorder window
//!
//! Events are released strictly in sequence order. A gap is held open until
//! either too many events are waiting behind it or the oldest waiting event
//! has been held for the configured time; then the buffer is released in
//! order and the missing numbers are skipped for good.

use crate::events::Event;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// An event that can no longer be applied in order
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderingViolation {
    #[error("sequence {sequence} arrived after the window closed (next expected {next_expected})")]
    Late { sequence: u64, next_expected: u64 },

    #[error("sequence {0} is already buffered")]
    Duplicate(u64),
}

/// Per-session reorder buffer
#[derive(Debug)]
pub struct ReorderBuffer {
    next_expected: u64,
    pending: BTreeMap<u64, (Event, Instant)>,
    max_events: usize,
    max_wait: Duration,
}

impl ReorderBuffer {
    /// Create a buffer that expects `next_expected` as the next sequence
    pub fn new(next_expected: u64, max_events: usize, max_wait: Duration) -> Self {
        Self {
            next_expected: next_expected.max(1),
            pending: BTreeMap::new(),
            max_events,
            max_wait,
        }
    }

    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Sequence to assign to an event the producer did not number
    pub fn next_assignable(&self) -> u64 {
        self.pending
            .keys()
            .next_back()
            .map(|last| last.saturating_add(1))
            .unwrap_or(self.next_expected)
            .max(self.next_expected)
    }

    /// Offer a sequenced event; returns the events now ready to apply, in order
    pub fn offer(&mut self, event: Event, now: Instant) -> Result<Vec<Event>, OrderingViolation> {
        let sequence = event.sequence.unwrap_or_else(|| self.next_assignable());

        if sequence < self.next_expected {
            return Err(OrderingViolation::Late {
                sequence,
                next_expected: self.next_expected,
            });
        }
        if self.pending.contains_key(&sequence) {
            return Err(OrderingViolation::Duplicate(sequence));
        }

        let event = event.with_sequence(sequence);
        if sequence == self.next_expected {
            self.next_expected = sequence.saturating_add(1);
            let mut ready = vec![event];
            ready.extend(self.drain_contiguous());
            return Ok(ready);
        }

        self.pending.insert(sequence, (event, now));
        if self.pending.len() > self.max_events {
            return Ok(self.close_gap());
        }
        Ok(Vec::new())
    }

    /// Release the buffer if its oldest event has waited past the window
    pub fn flush_expired(&mut self, now: Instant) -> Vec<Event> {
        match self.deadline() {
            Some(deadline) if deadline <= now => self.close_gap(),
            _ => Vec::new(),
        }
    }

    /// When the current gap must be closed, if one is open
    pub fn deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|(_, arrived)| *arrived)
            .min()
            .map(|oldest| oldest + self.max_wait)
    }

    /// Skip the missing sequence numbers and release everything buffered
    fn close_gap(&mut self) -> Vec<Event> {
        let pending = std::mem::take(&mut self.pending);
        let ready: Vec<Event> = pending.into_values().map(|(event, _)| event).collect();
        if let Some(last) = ready.last().and_then(|e| e.sequence) {
            self.next_expected = last.saturating_add(1);
        }
        ready
    }

    fn drain_contiguous(&mut self) -> Vec<Event> {
        let mut ready = Vec::new();
        while let Some((event, _)) = self.pending.remove(&self.next_expected) {
            ready.push(event);
            self.next_expected = self.next_expected.saturating_add(1);
        }
        ready
    }
}
