//! Timer service used by the stack.
use embassy_time::{Duration, Instant};
use heapless::Vec;

use crate::config::TIMER_LIST_SIZE;

/// Identifies a timer owned by the stack. Expired timers are handed back through
/// [`Hci::handle_timeout`](crate::Hci::handle_timeout).
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerId {
    /// Initialization watchdog and vendor delays.
    Init,
    /// Settle time before the transport is closed.
    Halting,
    /// Idle check of the connection with this handle.
    Connection(u16),
    /// Implicit SCO flow control slot of the connection with this handle.
    ScoTx { handle: u16, slot: u8 },
}

pub trait RunLoop {
    fn now(&self) -> Instant;

    /// Arms `id` to expire `after` from now, replacing an already armed timer with the same id.
    fn set_timer(&mut self, id: TimerId, after: Duration);

    fn remove_timer(&mut self, id: TimerId);
}

/// Fixed capacity timer list on top of the `embassy-time` clock.
pub struct TimerList {
    timers: Vec<(TimerId, Instant), TIMER_LIST_SIZE>,
}

impl TimerList {
    pub const fn new() -> Self {
        Self { timers: Vec::new() }
    }

    /// Removes and returns the earliest timer expired at `now`.
    pub fn expired(&mut self, now: Instant) -> Option<TimerId> {
        let (idx, _) = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, (_, at))| *at <= now)
            .min_by_key(|(_, (_, at))| *at)?;
        Some(self.timers.swap_remove(idx).0)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.iter().map(|(_, at)| *at).min()
    }

    pub fn is_armed(&self, id: TimerId) -> bool {
        self.timers.iter().any(|(t, _)| *t == id)
    }

    fn insert(&mut self, id: TimerId, at: Instant) {
        self.timers.retain(|(t, _)| *t != id);
        if self.timers.push((id, at)).is_err() {
            error!("[run_loop] timer list full, dropping {:?}", id);
        }
    }
}

impl Default for TimerList {
    fn default() -> Self {
        Self::new()
    }
}

impl RunLoop for TimerList {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn set_timer(&mut self, id: TimerId, after: Duration) {
        self.insert(id, Instant::now() + after);
    }

    fn remove_timer(&mut self, id: TimerId) {
        self.timers.retain(|(t, _)| *t != id);
    }
}
