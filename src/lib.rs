//! # Soft Timer
//!
//! A cooperative software-timer scheduler for polled main loops.
//!
//! Callers own their timer descriptors and register non-owning references
//! with a [`Registry`]. Calling [`Registry::advance`] from the main loop
//! polls every registered timer against a [`Clock`] and runs the callbacks
//! of those that are due, in registration order.
//!
//! ## Features
//!
//! - **Three timer kinds**: single-shot, periodic and dual-state timers
//! - **Caller-owned timers**: the registry never keeps a timer alive
//! - **Bounded or growable storage**: a fixed timer budget or unbounded growth
//! - **Pluggable clocks**: any monotonic tick counter, wrap-around safe
//! - **Blocking delays**: spin waits with an idle task for watchdog feeding
//! - **Async driver**: advance a registry on a Tokio heartbeat
//!
//! ## Quick Start
//!
//! ```rust
//! use soft_timer::{on_expiry, ManualClock, Registry, Tick, Timer, TimerKind};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let clock = ManualClock::new();
//! let mut registry = Registry::default();
//!
//! // Toggle an LED: 700 ticks on, 300 ticks off
//! let led_on = Rc::new(Cell::new(false));
//! let led = led_on.clone();
//! let blink = Timer::new().into_shared();
//! blink.borrow_mut().arm(
//!     &clock,
//!     TimerKind::DualState,
//!     700,
//!     300,
//!     on_expiry(move |expiry| led.set(u8::from(expiry.state()) == 1)),
//! );
//! blink.borrow_mut().start(&clock);
//! registry.register(&blink)?;
//!
//! clock.set(Tick(700));
//! registry.advance(&clock);
//! assert!(led_on.get());
//!
//! clock.set(Tick(1000));
//! registry.advance(&clock);
//! assert!(!led_on.get());
//! # Ok::<(), soft_timer::TimerError>(())
//! ```

mod clock;
mod delay;
mod driver;
mod error;
mod registry;
mod timer;

pub use clock::{Clock, ManualClock, MonotonicClock, Tick, Ticks, DEFAULT_RESOLUTION};
pub use delay::{wait, Delay, IdleTask, Ticker};
pub use driver::{DriverCommand, DriverHandle, TimerDriver, TokioClock};
pub use error::TimerError;
pub use registry::{Capacity, Registry, RegistryConfig, MAX_TIMERS};
pub use timer::{
    on_expiry, Expiry, SharedTimer, Timer, TimerCallback, TimerKind, TimerRef, TimerState,
};

// Re-export commonly used types for convenience
pub use std::time::Duration;
pub use tokio_util::sync::CancellationToken;
