//! Timer descriptors and their state machine.
//!
//! A [`Timer`] is owned by the code that uses it. The scheduler only ever sees
//! it through a non-owning [`TimerRef`], so dropping the owning
//! [`SharedTimer`] is how a timer goes away.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::clock::{Clock, Tick, Ticks};
use crate::error::TimerError;
use crate::registry::Registry;

/// Caller-side ownership of a timer descriptor.
pub type SharedTimer = Rc<RefCell<Timer>>;

/// Callback invoked when a timer fires.
pub type TimerCallback = Box<dyn FnMut(&mut Expiry<'_>)>;

/// Boxes a closure as a [`TimerCallback`] for [`Timer::arm`].
pub fn on_expiry<F>(callback: F) -> Option<TimerCallback>
where
    F: FnMut(&mut Expiry<'_>) + 'static,
{
    Some(Box::new(callback))
}

/// How a timer behaves once its timeout elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerKind {
    /// Fires once, then stops itself.
    #[default]
    SingleShot,
    /// Fires every `timeout` ticks until stopped.
    Periodic,
    /// Alternates between `timeout` and `timeout2`, reporting which phase it
    /// has just entered.
    DualState,
}

/// Phase of a timer. Only dual-state timers ever leave [`TimerState::First`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerState {
    /// Timing `timeout` (state 0).
    #[default]
    First,
    /// Timing `timeout2` (state 1).
    Second,
}

impl TimerState {
    pub fn flip(self) -> Self {
        match self {
            TimerState::First => TimerState::Second,
            TimerState::Second => TimerState::First,
        }
    }
}

impl From<TimerState> for u8 {
    fn from(state: TimerState) -> u8 {
        match state {
            TimerState::First => 0,
            TimerState::Second => 1,
        }
    }
}

/// A software timer descriptor.
///
/// A freshly constructed timer is disabled, so it never fires until
/// [`start`](Timer::start) computes a real due tick for it.
#[derive(Default)]
pub struct Timer {
    kind: TimerKind,
    enabled: bool,
    state: TimerState,
    timeout: Ticks,
    timeout2: Ticks,
    due_at: Tick,
    callback: Option<TimerCallback>,
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("kind", &self.kind)
            .field("enabled", &self.enabled)
            .field("state", &self.state)
            .field("timeout", &self.timeout)
            .field("timeout2", &self.timeout2)
            .field("due_at", &self.due_at)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps the timer for sharing with a [`Registry`](crate::Registry).
    pub fn into_shared(self) -> SharedTimer {
        Rc::new(RefCell::new(self))
    }

    /// Initialises kind, timeouts and callback, leaving the timer stopped.
    ///
    /// `timeout2` is only kept for [`TimerKind::DualState`]; other kinds
    /// store zero.
    pub fn arm(
        &mut self,
        clock: &impl Clock,
        kind: TimerKind,
        timeout: Ticks,
        timeout2: Ticks,
        callback: Option<TimerCallback>,
    ) {
        self.kind = kind;
        self.enabled = false;
        self.state = TimerState::First;
        self.timeout = timeout;
        self.timeout2 = match kind {
            TimerKind::DualState => timeout2,
            TimerKind::SingleShot | TimerKind::Periodic => 0,
        };
        self.callback = callback;
        self.update_due(clock);
    }

    /// Enables the timer and restarts it from the first phase.
    pub fn start(&mut self, clock: &impl Clock) {
        self.enabled = true;
        self.state = TimerState::First;
        self.update_due(clock);
    }

    /// Disables the timer. State and due tick are left as they are.
    pub fn stop(&mut self) {
        self.enabled = false;
    }

    pub fn is_running(&self) -> bool {
        self.enabled
    }

    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn timeout(&self) -> Ticks {
        self.timeout
    }

    pub fn timeout2(&self) -> Ticks {
        self.timeout2
    }

    pub fn due_at(&self) -> Tick {
        self.due_at
    }

    /// Replaces the primary timeout and re-arms from now.
    pub fn set_timeout(&mut self, clock: &impl Clock, timeout: Ticks) {
        self.timeout = timeout;
        self.update_due(clock);
    }

    /// Replaces both timeouts, returns to the first phase and re-arms from now.
    pub fn set_timeout_dual(&mut self, clock: &impl Clock, timeout: Ticks, timeout2: Ticks) {
        self.state = TimerState::First;
        self.timeout = timeout;
        self.timeout2 = timeout2;
        self.update_due(clock);
    }

    /// Ticks left until the timer is due. Negative once the due tick has
    /// passed without the timer being polled.
    pub fn time_until_due(&self, clock: &impl Clock) -> i32 {
        self.due_at.wrapping_since(clock.now())
    }

    /// Recomputes the due tick from now and the current phase's timeout.
    pub fn update_due(&mut self, clock: &impl Clock) {
        self.rearm_at(clock.now());
    }

    fn rearm_at(&mut self, now: Tick) {
        self.due_at = now.offset(self.current_timeout());
    }

    fn current_timeout(&self) -> Ticks {
        match self.state {
            TimerState::First => self.timeout,
            TimerState::Second => self.timeout2,
        }
    }

    /// Checks the timer against the clock and fires it if due.
    ///
    /// The kind transition and the new due tick are applied before the
    /// callback runs, so the callback sees the post-transition state.
    /// Returns whether the timer fired.
    ///
    /// The callback has no registry to register timers into; see
    /// [`Expiry::register`].
    pub fn poll(&mut self, clock: &impl Clock) -> bool {
        self.fire_if_due(clock, None)
    }

    /// Like [`poll`](Timer::poll), with `registry` reachable from the
    /// callback through [`Expiry::register`].
    pub(crate) fn poll_in(&mut self, clock: &impl Clock, registry: &mut Registry) -> bool {
        self.fire_if_due(clock, Some(registry))
    }

    fn fire_if_due(&mut self, clock: &impl Clock, registry: Option<&mut Registry>) -> bool {
        if !self.enabled {
            return false;
        }

        let now = clock.now();
        if !now.has_reached(self.due_at) {
            return false;
        }

        match self.kind {
            TimerKind::SingleShot => self.enabled = false,
            TimerKind::Periodic => {}
            TimerKind::DualState => self.state = self.state.flip(),
        }
        self.rearm_at(now);

        log::trace!(
            "{:?} timer fired at {} (state {}, next due at {})",
            self.kind,
            now,
            u8::from(self.state),
            self.due_at
        );

        // Taken out for the duration of the call so the callback can borrow
        // the descriptor mutably through `Expiry`. The guard puts it back,
        // also when the callback unwinds.
        let callback = self.callback.take();
        let mut guard = RestoreCallback {
            timer: self,
            callback,
        };
        if let Some(callback) = guard.callback.as_mut() {
            let mut expiry = Expiry {
                timer: &mut *guard.timer,
                now,
                registry,
            };
            callback(&mut expiry);
        }

        true
    }
}

struct RestoreCallback<'a> {
    timer: &'a mut Timer,
    callback: Option<TimerCallback>,
}

impl Drop for RestoreCallback<'_> {
    fn drop(&mut self) {
        if self.timer.callback.is_none() {
            self.timer.callback = self.callback.take();
        }
    }
}

/// View of a timer handed to its callback while it fires.
///
/// Operations that need "now" use the tick at which the timer fired.
pub struct Expiry<'a> {
    timer: &'a mut Timer,
    now: Tick,
    registry: Option<&'a mut Registry>,
}

impl Expiry<'_> {
    /// The state the timer has just transitioned into.
    pub fn state(&self) -> TimerState {
        self.timer.state
    }

    pub fn kind(&self) -> TimerKind {
        self.timer.kind
    }

    /// Tick at which the timer was found due.
    pub fn tick(&self) -> Tick {
        self.now
    }

    /// Due tick already computed for the next firing.
    pub fn next_due(&self) -> Tick {
        self.timer.due_at
    }

    pub fn timeout(&self) -> Ticks {
        self.timer.timeout
    }

    pub fn timeout2(&self) -> Ticks {
        self.timer.timeout2
    }

    pub fn is_running(&self) -> bool {
        self.timer.enabled
    }

    /// Stores new timeouts without touching the due tick computed for this
    /// firing. They apply from the next re-arm onwards.
    pub fn store_timeouts(&mut self, timeout: Ticks, timeout2: Ticks) {
        self.timer.timeout = timeout;
        self.timer.timeout2 = timeout2;
    }

    /// Same as [`Timer::set_timeout`], measured from the firing tick.
    pub fn set_timeout(&mut self, timeout: Ticks) {
        self.timer.timeout = timeout;
        self.timer.rearm_at(self.now);
    }

    /// Same as [`Timer::set_timeout_dual`], measured from the firing tick.
    pub fn set_timeout_dual(&mut self, timeout: Ticks, timeout2: Ticks) {
        self.timer.state = TimerState::First;
        self.timer.timeout = timeout;
        self.timer.timeout2 = timeout2;
        self.timer.rearm_at(self.now);
    }

    /// Restarts the timer from its first phase, e.g. to reuse a single-shot.
    pub fn start(&mut self) {
        self.timer.enabled = true;
        self.timer.state = TimerState::First;
        self.timer.rearm_at(self.now);
    }

    pub fn stop(&mut self) {
        self.timer.enabled = false;
    }

    /// Ticks the current phase lasts.
    pub fn current_timeout(&self) -> Ticks {
        self.timer.current_timeout()
    }

    /// Registers another timer with the registry being advanced.
    ///
    /// The new timer is appended to the poll order, so it is polled later in
    /// this same pass. Fails with [`TimerError::NoRegistry`] when the timer
    /// was polled on its own rather than through [`Registry::advance`].
    pub fn register(&mut self, timer: impl Into<TimerRef>) -> Result<usize, TimerError> {
        match self.registry.as_deref_mut() {
            Some(registry) => registry.register(timer),
            None => Err(TimerError::NoRegistry),
        }
    }
}

/// Non-owning reference to a [`Timer`].
///
/// This is what the registry stores. It may be null, or outlive the
/// descriptor it points at; every operation then falls back to a no-op or a
/// zero/false value. Operations are also no-ops while the descriptor is
/// borrowed elsewhere, e.g. from inside its own callback, where [`Expiry`]
/// should be used instead; [`TimerRef::arm`] reports that case as
/// [`TimerError::Busy`].
#[derive(Debug, Clone, Default)]
pub struct TimerRef(Weak<RefCell<Timer>>);

impl From<&SharedTimer> for TimerRef {
    fn from(timer: &SharedTimer) -> Self {
        TimerRef(Rc::downgrade(timer))
    }
}

impl From<&TimerRef> for TimerRef {
    fn from(timer: &TimerRef) -> Self {
        timer.clone()
    }
}

impl TimerRef {
    /// A reference that points at nothing.
    pub fn null() -> Self {
        TimerRef(Weak::new())
    }

    /// Whether the descriptor is gone (or never existed).
    pub fn is_null(&self) -> bool {
        self.0.strong_count() == 0
    }

    /// Whether both references point at the same descriptor.
    pub fn ptr_eq(&self, other: &TimerRef) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }

    fn try_with_mut<R>(&self, f: impl FnOnce(&mut Timer) -> R) -> Result<R, TimerError> {
        let timer = self.0.upgrade().ok_or(TimerError::InvalidReference)?;
        let result = match timer.try_borrow_mut() {
            Ok(mut timer) => Ok(f(&mut timer)),
            Err(_) => {
                log::warn!("Timer is already borrowed, skipping operation");
                Err(TimerError::Busy)
            }
        };
        result
    }

    fn with_mut<R>(&self, f: impl FnOnce(&mut Timer) -> R) -> Option<R> {
        self.try_with_mut(f).ok()
    }

    fn with<R>(&self, f: impl FnOnce(&Timer) -> R) -> Option<R> {
        let timer = self.0.upgrade()?;
        let result = match timer.try_borrow() {
            Ok(timer) => Some(f(&timer)),
            Err(_) => {
                log::warn!("Timer is mutably borrowed, skipping read");
                None
            }
        };
        result
    }

    /// See [`Timer::arm`].
    ///
    /// Fails with [`TimerError::InvalidReference`] when the reference is null
    /// and with [`TimerError::Busy`] when the descriptor is borrowed, e.g.
    /// while its own callback runs.
    pub fn arm(
        &self,
        clock: &impl Clock,
        kind: TimerKind,
        timeout: Ticks,
        timeout2: Ticks,
        callback: Option<TimerCallback>,
    ) -> Result<(), TimerError> {
        self.try_with_mut(|timer| timer.arm(clock, kind, timeout, timeout2, callback))
    }

    pub fn start(&self, clock: &impl Clock) {
        self.with_mut(|timer| timer.start(clock));
    }

    pub fn stop(&self) {
        self.with_mut(Timer::stop);
    }

    pub fn is_running(&self) -> bool {
        self.with(Timer::is_running).unwrap_or(false)
    }

    pub fn timeout(&self) -> Ticks {
        self.with(Timer::timeout).unwrap_or(0)
    }

    pub fn timeout2(&self) -> Ticks {
        self.with(Timer::timeout2).unwrap_or(0)
    }

    pub fn set_timeout(&self, clock: &impl Clock, timeout: Ticks) {
        self.with_mut(|timer| timer.set_timeout(clock, timeout));
    }

    pub fn set_timeout_dual(&self, clock: &impl Clock, timeout: Ticks, timeout2: Ticks) {
        self.with_mut(|timer| timer.set_timeout_dual(clock, timeout, timeout2));
    }

    pub fn time_until_due(&self, clock: &impl Clock) -> i32 {
        self.with(|timer| timer.time_until_due(clock)).unwrap_or(0)
    }

    pub fn update_due(&self, clock: &impl Clock) {
        self.with_mut(|timer| timer.update_due(clock));
    }

    /// See [`Timer::poll`]. Returns false for a null reference.
    pub fn poll(&self, clock: &impl Clock) -> bool {
        self.with_mut(|timer| timer.poll(clock)).unwrap_or(false)
    }

    pub(crate) fn poll_in(&self, clock: &impl Clock, registry: &mut Registry) -> bool {
        self.with_mut(|timer| timer.poll_in(clock, registry))
            .unwrap_or(false)
    }
}
