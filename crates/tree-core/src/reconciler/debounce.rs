//! Single-slot debounce timer.
//!
//! Holds at most one pending payload. Scheduling again replaces the payload
//! and pushes the deadline out; nothing is queued.

use std::time::Duration;

#[derive(Debug, Clone)]
struct Pending<P> {
    payload: P,
    deadline: u64,
}

#[derive(Debug, Clone)]
pub struct Debouncer<P> {
    delay_ms: u64,
    pending: Option<Pending<P>>,
}

impl<P> Debouncer<P> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay_ms: delay.as_millis() as u64,
            pending: None,
        }
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    /// Schedule `payload` to fire `delay` after `now_ms`.
    ///
    /// Returns `true` if an earlier payload was replaced.
    pub fn schedule(&mut self, payload: P, now_ms: u64) -> bool {
        let replaced = self.pending.is_some();
        self.pending = Some(Pending {
            payload,
            deadline: now_ms.saturating_add(self.delay_ms),
        });
        replaced
    }

    /// Take the payload if its deadline has passed.
    pub fn take_due(&mut self, now_ms: u64) -> Option<P> {
        match &self.pending {
            Some(p) if p.deadline <= now_ms => self.pending.take().map(|p| p.payload),
            _ => None,
        }
    }

    /// Take the payload regardless of its deadline.
    pub fn take_now(&mut self) -> Option<P> {
        self.pending.take().map(|p| p.payload)
    }

    /// Drop the pending payload without firing it.
    pub fn cancel(&mut self) -> Option<P> {
        self.take_now()
    }

    pub fn deadline(&self) -> Option<u64> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}
