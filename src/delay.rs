//! Blocking delays and a minimal polled interval check.
//!
//! Neither touches a [`Registry`](crate::Registry); they only read a clock.

use std::fmt;

use crate::clock::{Clock, Tick, Ticks};

/// Task run on every spin of a blocking wait, e.g. to feed a watchdog.
pub type IdleTask = Box<dyn FnMut()>;

/// Busy-waits on `clock` for `ticks`.
pub fn wait(clock: &impl Clock, ticks: Ticks) {
    spin_until(clock, clock.now().offset(ticks), || {});
}

fn spin_until(clock: &impl Clock, deadline: Tick, mut idle: impl FnMut()) {
    while !clock.now().has_reached(deadline) {
        idle();
        std::hint::spin_loop();
    }
}

/// A blocking delay with an optional idle task.
pub struct Delay<C: Clock> {
    clock: C,
    idle: Option<IdleTask>,
}

impl<C: Clock> fmt::Debug for Delay<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delay")
            .field("idle", &self.idle.is_some())
            .finish_non_exhaustive()
    }
}

impl<C: Clock> Delay<C> {
    pub fn new(clock: C) -> Self {
        Self { clock, idle: None }
    }

    /// Run `task` on every iteration of the wait loop.
    pub fn with_idle_task(mut self, task: impl FnMut() + 'static) -> Self {
        self.idle = Some(Box::new(task));
        self
    }

    /// Blocks until `ticks` have elapsed on the clock.
    pub fn wait(&mut self, ticks: Ticks) {
        let deadline = self.clock.now().offset(ticks);
        match self.idle.as_mut() {
            Some(idle) => spin_until(&self.clock, deadline, idle),
            None => spin_until(&self.clock, deadline, || {}),
        }
    }

    /// Blocks for `millis` milliseconds, converted at the clock's resolution.
    pub fn wait_millis(&mut self, millis: u32) {
        let ticks = self.clock.ticks_from_millis(millis);
        self.wait(ticks);
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

/// Lightweight periodic check without a timer descriptor.
///
/// Poll [`Ticker::ready`] from a loop; it returns true once per elapsed
/// period and re-anchors to the tick it fired at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticker {
    last: Tick,
    period: Ticks,
}

impl Ticker {
    /// A ticker whose first period starts now.
    pub fn new(clock: &impl Clock, period: Ticks) -> Self {
        Self::starting_at(clock.now(), period)
    }

    pub fn starting_at(last: Tick, period: Ticks) -> Self {
        Self { last, period }
    }

    pub fn ready(&mut self, clock: &impl Clock) -> bool {
        let now = clock.now();
        if now.has_reached(self.last.offset(self.period)) {
            self.last = now;
            true
        } else {
            false
        }
    }

    pub fn period(&self) -> Ticks {
        self.period
    }

    pub fn set_period(&mut self, period: Ticks) {
        self.period = period;
    }

    /// Tick of the last firing, or of creation if it has not fired yet.
    pub fn last(&self) -> Tick {
        self.last
    }
}
