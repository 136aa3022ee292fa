//! The timer registry: an ordered list of timers polled together.

use crate::clock::Clock;
use crate::error::TimerError;
use crate::timer::TimerRef;

/// Default number of timers a fixed-capacity registry accepts.
pub const MAX_TIMERS: usize = 30;

/// How the registry stores its references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// At most this many timers; registrations beyond it are refused.
    /// Storage for up to [`MAX_TIMERS`] of them is reserved up front.
    Fixed(usize),
    /// Storage grows on demand.
    Growable,
}

impl Default for Capacity {
    fn default() -> Self {
        Capacity::Fixed(MAX_TIMERS)
    }
}

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Instance name for logging
    pub name: String,

    /// Storage mode and limit
    pub capacity: Capacity,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            name: "timers".to_string(),
            capacity: Capacity::default(),
        }
    }
}

impl RegistryConfig {
    pub fn new(name: impl Into<String>, capacity: Capacity) -> Self {
        Self {
            name: name.into(),
            capacity,
        }
    }
}

/// Ordered set of timers advanced together from a main loop.
///
/// The registry holds [`TimerRef`]s only. Timers are polled in the order
/// they were registered, and a timer whose owner has dropped it is skipped.
/// There is no way to remove a single registration; [`Registry::init`]
/// forgets all of them at once.
#[derive(Debug)]
pub struct Registry {
    /// Instance name for logging
    name: String,

    /// Storage mode and limit
    capacity: Capacity,

    /// Registered timers, in poll order
    timers: Vec<TimerRef>,
}

impl Registry {
    /// Create an empty registry
    pub fn new(config: RegistryConfig) -> Self {
        let mut registry = Registry {
            name: config.name,
            capacity: config.capacity,
            timers: Vec::new(),
        };
        registry.init();

        log::info!(
            "Timer registry '{}' created ({:?})",
            registry.name,
            registry.capacity
        );
        registry
    }

    /// Forget every registration.
    ///
    /// The timers themselves are left untouched; they simply stop being
    /// polled by this registry.
    pub fn init(&mut self) {
        let forgotten = self.timers.len();
        match self.capacity {
            Capacity::Fixed(limit) => {
                self.timers.clear();
                self.timers.reserve_exact(limit.min(MAX_TIMERS));
            }
            Capacity::Growable => self.timers = Vec::new(),
        }

        if forgotten > 0 {
            log::info!(
                "Timer registry '{}' reinitialised, forgot {} timer(s)",
                self.name,
                forgotten
            );
        }
    }

    /// Append a timer to the poll list.
    ///
    /// Fails with [`TimerError::InvalidReference`] for a null reference and
    /// with [`TimerError::CapacityExceeded`] when a fixed registry is full.
    /// On success, returns the timer's position in the poll order.
    ///
    /// The timer is not required to be armed. A timer that was never armed
    /// or started is disabled and is simply never due.
    pub fn register(&mut self, timer: impl Into<TimerRef>) -> Result<usize, TimerError> {
        let timer = timer.into();
        if timer.is_null() {
            log::warn!(
                "Refusing null timer reference in registry '{}'",
                self.name
            );
            return Err(TimerError::InvalidReference);
        }

        if let Capacity::Fixed(limit) = self.capacity {
            if self.timers.len() >= limit {
                log::warn!(
                    "Timer registry '{}' is full ({} timers), registration refused",
                    self.name,
                    limit
                );
                return Err(TimerError::CapacityExceeded { capacity: limit });
            }
        }

        self.timers.push(timer);
        let index = self.timers.len() - 1;
        log::debug!("Timer #{} registered in '{}'", index, self.name);
        Ok(index)
    }

    /// Poll every registered timer once, in registration order.
    ///
    /// Each callback runs to completion before the next timer is polled.
    /// Timers a callback registers through [`Expiry::register`] join the end
    /// of the list and are polled later in the same pass.
    /// Call this at least once per the shortest configured timeout; a late
    /// call simply fires timers late. Returns how many timers fired.
    ///
    /// [`Expiry::register`]: crate::Expiry::register
    pub fn advance(&mut self, clock: &impl Clock) -> usize {
        let mut fired = 0;
        let mut index = 0;
        while index < self.timers.len() {
            let timer = self.timers[index].clone();
            if timer.is_null() {
                log::trace!("Skipping dropped timer #{} in '{}'", index, self.name);
            } else if timer.poll_in(clock, self) {
                fired += 1;
            }
            index += 1;
        }
        fired
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of timers, or `None` for a growable registry.
    pub fn capacity(&self) -> Option<usize> {
        match self.capacity {
            Capacity::Fixed(limit) => Some(limit),
            Capacity::Growable => None,
        }
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.capacity()
            .is_some_and(|limit| self.timers.len() >= limit)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
