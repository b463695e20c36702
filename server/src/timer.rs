//! Tick-driven timed tasks.
//!
//! Every wait in the simulation (phase countdown, morning grace delay, door
//! cooldown, rendezvous arming) is a [`Countdown`] owned by the component that
//! needs it. The tick loop advances it by the fixed tick duration; it never
//! blocks. Restarting a countdown cancels the previous wait.

/// A cancellable countdown measured in simulation seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Countdown {
    remaining: Option<f32>,
}

impl Countdown {
    pub fn idle() -> Self {
        Self { remaining: None }
    }

    pub fn running(seconds: f32) -> Self {
        Self {
            remaining: Some(seconds.max(0.0)),
        }
    }

    /// (Re)starts the countdown, discarding any wait in progress.
    pub fn start(&mut self, seconds: f32) {
        self.remaining = Some(seconds.max(0.0));
    }

    pub fn stop(&mut self) {
        self.remaining = None;
    }

    pub fn is_running(&self) -> bool {
        self.remaining.is_some()
    }

    pub fn remaining(&self) -> Option<f32> {
        self.remaining
    }

    /// Whole seconds left, rounded up the way a countdown display reads.
    pub fn whole_seconds_left(&self) -> Option<u32> {
        self.remaining.map(|r| r.ceil().max(0.0) as u32)
    }

    /// Advances by `dt`. Returns true exactly once, on the tick the wait ends.
    pub fn advance(&mut self, dt: f32) -> bool {
        match self.remaining {
            Some(remaining) => {
                let next = remaining - dt;
                if next <= 1e-4 {
                    self.remaining = None;
                    true
                } else {
                    self.remaining = Some(next);
                    false
                }
            }
            None => false,
        }
    }
}
