//! Tick sources for the scheduler.
//!
//! The scheduler never reads a hardware or OS timer directly. Everything goes
//! through the [`Clock`] trait, which only has to hand out a monotonically
//! non-decreasing tick counter and state how many ticks make up one time unit.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

/// Default resolution: 1000 ticks per second, i.e. one tick per millisecond.
pub const DEFAULT_RESOLUTION: u32 = 1000;

/// A length of time, measured in clock ticks.
pub type Ticks = u32;

/// An absolute reading of a [`Clock`].
///
/// The counter is 32 bits wide and wraps. Ordering between two ticks is only
/// meaningful when they are less than half the counter range (`2^31` ticks)
/// apart; beyond that [`Tick::has_reached`] gives the wrong answer. At the
/// default resolution that window is a little under 25 days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tick(pub u32);

impl Tick {
    pub const ZERO: Tick = Tick(0);

    /// The tick `ticks` after this one, wrapping around the counter.
    pub const fn offset(self, ticks: Ticks) -> Tick {
        Tick(self.0.wrapping_add(ticks))
    }

    /// Signed distance from `earlier` to `self`.
    ///
    /// Positive when `self` lies after `earlier`, negative when before.
    pub const fn wrapping_since(self, earlier: Tick) -> i32 {
        self.0.wrapping_sub(earlier.0) as i32
    }

    /// Whether this tick is at or past `deadline`.
    pub const fn has_reached(self, deadline: Tick) -> bool {
        self.wrapping_since(deadline) >= 0
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tick {}", self.0)
    }
}

/// A monotonic tick source.
pub trait Clock {
    /// Current tick count. Must never go backwards, apart from the counter
    /// wrapping.
    fn now(&self) -> Tick;

    /// Ticks per time unit.
    fn resolution(&self) -> u32 {
        DEFAULT_RESOLUTION
    }

    /// Converts milliseconds into ticks at this clock's resolution.
    ///
    /// Saturates at `Ticks::MAX` when the result does not fit.
    fn ticks_from_millis(&self, millis: u32) -> Ticks {
        let ticks = u64::from(millis) * u64::from(self.resolution()) / 1000;
        Ticks::try_from(ticks).unwrap_or(Ticks::MAX)
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Tick {
        (**self).now()
    }

    fn resolution(&self) -> u32 {
        (**self).resolution()
    }
}

impl<C: Clock + ?Sized> Clock for Rc<C> {
    fn now(&self) -> Tick {
        (**self).now()
    }

    fn resolution(&self) -> u32 {
        (**self).resolution()
    }
}

/// Clock backed by [`std::time::Instant`].
///
/// The native counter runs in nanoseconds and is scaled down to `resolution`
/// ticks per second by integer division, so a resolution of 1000 yields
/// milliseconds since the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
    resolution: u32,
}

impl MonotonicClock {
    /// Native ticks per second of the underlying counter.
    pub const NATIVE_TICKS_PER_SEC: u64 = 1_000_000_000;

    pub fn new() -> Self {
        Self::with_resolution(DEFAULT_RESOLUTION)
    }

    /// Creates a clock that counts `resolution` ticks per second.
    ///
    /// A resolution of zero, or one finer than the native counter, is clamped
    /// into `1..=NATIVE_TICKS_PER_SEC`.
    pub fn with_resolution(resolution: u32) -> Self {
        let resolution = resolution.clamp(1, Self::NATIVE_TICKS_PER_SEC as u32);
        Self {
            epoch: Instant::now(),
            resolution,
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Tick {
        let native = self.epoch.elapsed().as_nanos();
        let divisor = u128::from(Self::NATIVE_TICKS_PER_SEC / u64::from(self.resolution));
        // Truncation to 32 bits is the counter wrapping.
        Tick((native / divisor) as u32)
    }

    fn resolution(&self) -> u32 {
        self.resolution
    }
}

/// A clock that only moves when told to.
///
/// Useful for tests, and for targets where an interrupt handler bumps a
/// counter and the main loop reads it.
#[derive(Debug, Default)]
pub struct ManualClock {
    ticks: Cell<u32>,
    resolution: u32,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Tick::ZERO)
    }

    pub fn starting_at(tick: Tick) -> Self {
        Self {
            ticks: Cell::new(tick.0),
            resolution: DEFAULT_RESOLUTION,
        }
    }

    pub fn with_resolution(mut self, resolution: u32) -> Self {
        self.resolution = resolution.max(1);
        self
    }

    /// Moves the clock to `tick`. Callers are expected to keep it monotonic.
    pub fn set(&self, tick: Tick) {
        self.ticks.set(tick.0);
    }

    /// Moves the clock forward by `ticks`, wrapping at the counter limit.
    pub fn advance(&self, ticks: Ticks) {
        self.ticks.set(self.ticks.get().wrapping_add(ticks));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Tick {
        Tick(self.ticks.get())
    }

    fn resolution(&self) -> u32 {
        if self.resolution == 0 {
            DEFAULT_RESOLUTION
        } else {
            self.resolution
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_ordering_across_wrap() {
        let before = Tick(u32::MAX - 10);
        let after = before.offset(20);

        assert_eq!(after, Tick(9));
        assert_eq!(after.wrapping_since(before), 20);
        assert_eq!(before.wrapping_since(after), -20);
        assert!(after.has_reached(before));
        assert!(!before.has_reached(after));
        assert!(after.has_reached(after));
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Tick::ZERO);

        clock.advance(250);
        clock.advance(250);
        assert_eq!(clock.now(), Tick(500));

        clock.set(Tick(1500));
        assert_eq!(clock.now(), Tick(1500));
        assert_eq!(clock.resolution(), DEFAULT_RESOLUTION);
    }

    #[test]
    fn test_manual_clock_default_resolution() {
        // `Default` leaves the resolution field at zero.
        let clock = ManualClock::default();
        assert_eq!(clock.resolution(), DEFAULT_RESOLUTION);
    }

    #[test]
    fn test_ticks_from_millis_scales_with_resolution() {
        let clock = ManualClock::new().with_resolution(10_000);
        assert_eq!(clock.ticks_from_millis(250), 2_500);

        let clock = ManualClock::new();
        assert_eq!(clock.ticks_from_millis(250), 250);
    }

    #[test]
    fn test_ticks_from_millis_saturates() {
        let clock = ManualClock::new().with_resolution(1_000_000);
        assert_eq!(clock.ticks_from_millis(u32::MAX), Ticks::MAX);
        assert_eq!(clock.ticks_from_millis(4_294), 4_294_000);
    }

    #[test]
    fn test_monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let first = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = clock.now();

        assert!(second.has_reached(first));
        assert!(second.wrapping_since(first) >= 4);
    }

    #[test]
    fn test_monotonic_clock_clamps_resolution() {
        assert_eq!(MonotonicClock::with_resolution(0).resolution(), 1);
        assert_eq!(MonotonicClock::with_resolution(1000).resolution(), 1000);
    }
}
