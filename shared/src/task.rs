//! Resumable multi-tick waits driven by the fixed-tick scheduler
//!
//! Long-running sequences are plain state structs advanced once per tick.
//! A [`TaskSlot`] holds at most one instance of a named sequence; starting a
//! new one drops the one in flight.

use log::debug;

/// Timed wait
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Countdown {
    remaining: f32,
}

impl Countdown {
    pub fn new(duration: f32) -> Self {
        Self {
            remaining: duration.max(0.0),
        }
    }

    /// Advances the countdown, returning true once it has run out
    pub fn tick(&mut self, dt: f32) -> bool {
        if self.remaining > 0.0 {
            self.remaining -= dt;
        }
        self.is_done()
    }

    pub fn is_done(&self) -> bool {
        self.remaining <= 0.0
    }

    pub fn remaining(&self) -> f32 {
        self.remaining.max(0.0)
    }
}

/// Polling wait: due on the first tick, then every `interval` seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollTimer {
    interval: f32,
    until_next: f32,
}

impl PollTimer {
    pub fn new(interval: f32) -> Self {
        Self {
            interval: interval.max(0.0),
            until_next: 0.0,
        }
    }

    pub fn due(&mut self, dt: f32) -> bool {
        self.until_next -= dt;
        if self.until_next <= 0.0 {
            self.until_next = self.interval;
            true
        } else {
            false
        }
    }
}

/// Holder of one named in-flight sequence
#[derive(Debug)]
pub struct TaskSlot<T> {
    name: &'static str,
    current: Option<T>,
}

impl<T> TaskSlot<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            current: None,
        }
    }

    /// Starts a new instance, cancelling the one in flight
    pub fn start(&mut self, task: T) -> Option<T> {
        let previous = self.current.replace(task);
        if previous.is_some() {
            debug!("Cancelled in-flight {} sequence", self.name);
        }
        previous
    }

    pub fn cancel(&mut self) -> Option<T> {
        self.current.take()
    }

    pub fn is_running(&self) -> bool {
        self.current.is_some()
    }

    pub fn get(&self) -> Option<&T> {
        self.current.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.current.as_mut()
    }
}
