//! Error types for timer operations

use thiserror::Error;

/// Errors reported by fallible timer and registry operations.
///
/// Null-tolerant descriptor operations (`start`, `stop`, `is_running`, ...)
/// never return these; they fall back to a no-op or a zero/false sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    /// The descriptor behind a [`TimerRef`](crate::TimerRef) is gone, or the
    /// reference was null to begin with.
    #[error("timer reference is null or the descriptor has been dropped")]
    InvalidReference,

    /// The descriptor is alive but already borrowed, e.g. by its own
    /// running callback.
    #[error("timer descriptor is busy")]
    Busy,

    /// A callback tried to register a timer while its timer was polled
    /// outside of a registry.
    #[error("timer was not polled by a registry")]
    NoRegistry,

    /// The registry already holds its maximum number of timers.
    #[error("timer registry is full ({capacity} timers)")]
    CapacityExceeded { capacity: usize },

    /// The driver's command queue has no free slot.
    #[error("timer driver command queue is full")]
    CommandQueueFull,

    /// The driver task is no longer receiving commands.
    #[error("timer driver is not running")]
    DriverClosed,
}
