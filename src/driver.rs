use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, Tick, DEFAULT_RESOLUTION};
use crate::error::TimerError;
use crate::registry::Registry;
use crate::timer::TimerRef;

/// Clock driven by tokio's time source
///
/// Follows paused and auto-advanced time in tests.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    epoch: Instant,
    resolution: u32,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::with_resolution(DEFAULT_RESOLUTION)
    }

    pub fn with_resolution(resolution: u32) -> Self {
        Self {
            epoch: Instant::now(),
            resolution: resolution.max(1),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Tick {
        let elapsed = self.epoch.elapsed().as_nanos();
        Tick((elapsed * u128::from(self.resolution) / 1_000_000_000) as u32)
    }

    fn resolution(&self) -> u32 {
        self.resolution
    }
}

/// Async driver that advances a registry on a heartbeat
///
/// Timers are single-context objects, so the driver is not `Send`: await
/// [`TimerDriver::run`] on the current task or inside a `LocalSet`.
pub struct TimerDriver<C: Clock> {
    /// Instance name for logging
    name: String,

    /// Timers advanced on every heartbeat
    registry: Registry,

    /// Tick source handed to the registry
    clock: C,

    /// Channel for receiving driver commands
    command_rx: mpsc::Receiver<DriverCommand>,

    /// Heartbeat interval for timer checks
    heartbeat_interval: Duration,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,
}

/// Handle for controlling the timer driver
#[derive(Debug, Clone)]
pub struct DriverHandle {
    /// Channel for sending commands to the timer driver
    command_tx: mpsc::Sender<DriverCommand>,
}

/// Driver command enum
#[derive(Debug)]
pub enum DriverCommand {
    Register {
        timer: TimerRef,
        reply: oneshot::Sender<Result<usize, TimerError>>,
    },
    Reset,
    Shutdown,
}

impl<C: Clock> TimerDriver<C> {
    /// Create a new TimerDriver with a bounded command channel
    ///
    /// # Arguments
    /// * `name` - Driver instance name
    /// * `registry` - Registry to advance, possibly with timers already in it
    /// * `clock` - Tick source for polling
    /// * `heartbeat_interval` - How often to advance the registry
    /// * `command_buffer_size` - Size of command channel buffer
    ///
    /// Returns (TimerDriver, DriverHandle)
    pub fn new(
        name: String,
        registry: Registry,
        clock: C,
        heartbeat_interval: Duration,
        command_buffer_size: usize,
        cancel_token: CancellationToken,
    ) -> (Self, DriverHandle) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer_size);

        let driver = TimerDriver {
            name,
            registry,
            clock,
            command_rx,
            heartbeat_interval,
            cancel_token,
        };

        (driver, DriverHandle { command_tx })
    }

    /// Run the driver until shutdown, cancellation, or until every handle is
    /// dropped. Returns the registry.
    pub async fn run(mut self) -> Registry {
        let mut heartbeat = interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        log::info!("Timer driver '{}' started", self.name);

        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        _ if self.cancel_token.is_cancelled() => {
                            log::info!("Timer driver '{}' cancelled", self.name);
                            break;
                        }
                        Some(command) => {
                            if self.handle_command(command) {
                                break;
                            }
                        }
                        None => {
                            log::info!(
                                "Timer driver '{}' shutting down - all handles dropped",
                                self.name
                            );
                            break;
                        }
                    }
                },

                _ = heartbeat.tick() => {
                    self.registry.advance(&self.clock);
                },

                _ = self.cancel_token.cancelled() => {
                    log::info!("Timer driver '{}' cancelled via token", self.name);
                    break;
                },
            }
        }

        log::info!("Timer driver '{}' stopped", self.name);
        self.registry
    }

    /// Handle driver commands, returning true on shutdown
    fn handle_command(&mut self, command: DriverCommand) -> bool {
        match command {
            DriverCommand::Register { timer, reply } => {
                let result = self.registry.register(timer);
                if reply.send(result).is_err() {
                    log::debug!(
                        "Register reply dropped by caller in driver '{}'",
                        self.name
                    );
                }
                false
            }
            DriverCommand::Reset => {
                self.registry.init();
                false
            }
            DriverCommand::Shutdown => {
                log::info!("Timer driver '{}' shutting down", self.name);
                true
            }
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

fn closed<T>(_: mpsc::error::SendError<T>) -> TimerError {
    TimerError::DriverClosed
}

fn rejected<T>(e: mpsc::error::TrySendError<T>) -> TimerError {
    match e {
        mpsc::error::TrySendError::Full(_) => TimerError::CommandQueueFull,
        mpsc::error::TrySendError::Closed(_) => TimerError::DriverClosed,
    }
}

impl DriverHandle {
    /// Register a timer with the driver's registry
    pub async fn register(&self, timer: impl Into<TimerRef>) -> Result<usize, TimerError> {
        let (reply, outcome) = oneshot::channel();
        self.command_tx
            .send(DriverCommand::Register {
                timer: timer.into(),
                reply,
            })
            .await
            .map_err(closed)?;
        outcome.await.map_err(|_| TimerError::DriverClosed)?
    }

    /// Forget every registration
    pub async fn reset(&self) -> Result<(), TimerError> {
        self.command_tx
            .send(DriverCommand::Reset)
            .await
            .map_err(closed)
    }

    /// Forget every registration (non-blocking)
    pub fn try_reset(&self) -> Result<(), TimerError> {
        self.command_tx
            .try_send(DriverCommand::Reset)
            .map_err(rejected)
    }

    /// Shutdown the timer driver
    pub async fn shutdown(&self) -> Result<(), TimerError> {
        self.command_tx
            .send(DriverCommand::Shutdown)
            .await
            .map_err(closed)
    }

    /// Shutdown the timer driver (non-blocking)
    pub fn try_shutdown(&self) -> Result<(), TimerError> {
        self.command_tx
            .try_send(DriverCommand::Shutdown)
            .map_err(rejected)
    }

    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Capacity, RegistryConfig};
    use crate::timer::{on_expiry, Timer, TimerKind};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use tokio::time::sleep;
    use tokio_test::{assert_err, assert_ok};

    fn driver(
        capacity: Capacity,
        cancel_token: CancellationToken,
    ) -> (TimerDriver<TokioClock>, DriverHandle) {
        TimerDriver::new(
            "test".to_string(),
            Registry::new(RegistryConfig::new("test", capacity)),
            TokioClock::new(),
            Duration::from_millis(10),
            10,
            cancel_token,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_shot_fires_once() {
        let (driver, handle) = driver(Capacity::default(), CancellationToken::new());
        let clock = *driver.clock();

        let count = Rc::new(Cell::new(0));
        let seen = count.clone();
        let timer = Timer::new().into_shared();
        timer.borrow_mut().arm(
            &clock,
            TimerKind::SingleShot,
            1000,
            0,
            on_expiry(move |_| seen.set(seen.get() + 1)),
        );

        let control = async {
            assert_ok!(handle.register(&timer).await);
            timer.borrow_mut().start(&clock);

            sleep(Duration::from_millis(500)).await;
            assert_eq!(count.get(), 0);

            sleep(Duration::from_millis(1000)).await;
            assert_eq!(count.get(), 1);
            assert!(!timer.borrow().is_running());

            handle.shutdown().await.unwrap();
        };

        let (registry, ()) = tokio::join!(driver.run(), control);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dual_state_alternates() {
        let (driver, handle) = driver(Capacity::default(), CancellationToken::new());
        let clock = *driver.clock();

        let states = Rc::new(RefCell::new(Vec::new()));
        let log = states.clone();
        let timer = Timer::new().into_shared();
        timer.borrow_mut().arm(
            &clock,
            TimerKind::DualState,
            700,
            300,
            on_expiry(move |expiry| log.borrow_mut().push(u8::from(expiry.state()))),
        );

        let control = async {
            handle.register(&timer).await.unwrap();
            timer.borrow_mut().start(&clock);
            sleep(Duration::from_millis(2100)).await;
            handle.shutdown().await.unwrap();
        };

        tokio::join!(driver.run(), control);
        assert_eq!(*states.borrow(), vec![1, 0, 1, 0]);
    }

    #[tokio::test]
    async fn test_register_reports_capacity() {
        let (driver, handle) = driver(Capacity::Fixed(1), CancellationToken::new());
        let first = Timer::new().into_shared();
        let second = Timer::new().into_shared();

        let control = async {
            assert_eq!(handle.register(&first).await, Ok(0));
            assert_eq!(
                handle.register(&second).await,
                Err(TimerError::CapacityExceeded { capacity: 1 })
            );
            assert_eq!(
                handle.register(TimerRef::null()).await,
                Err(TimerError::InvalidReference)
            );
            handle.shutdown().await.unwrap();
        };

        let (registry, ()) = tokio::join!(driver.run(), control);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_forgets_timers() {
        let (driver, handle) = driver(Capacity::default(), CancellationToken::new());
        let clock = *driver.clock();

        let count = Rc::new(Cell::new(0));
        let seen = count.clone();
        let timer = Timer::new().into_shared();
        timer.borrow_mut().arm(
            &clock,
            TimerKind::Periodic,
            100,
            0,
            on_expiry(move |_| seen.set(seen.get() + 1)),
        );

        let control = async {
            handle.register(&timer).await.unwrap();
            handle.reset().await.unwrap();
            timer.borrow_mut().start(&clock);

            sleep(Duration::from_millis(500)).await;
            assert!(timer.borrow().is_running());
            handle.shutdown().await.unwrap();
        };

        let (registry, ()) = tokio::join!(driver.run(), control);
        assert!(registry.is_empty());
        assert_eq!(count.get(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_token() {
        let cancel_token = CancellationToken::new();
        let (driver, handle) = driver(Capacity::default(), cancel_token.clone());

        let control = async {
            cancel_token.cancel();
        };
        tokio::join!(driver.run(), control);

        // The driver is gone, so commands can no longer be delivered
        assert!(handle.is_closed());
        assert_err!(handle.try_shutdown());
        let timer = Timer::new().into_shared();
        assert_eq!(handle.register(&timer).await, Err(TimerError::DriverClosed));
    }

    #[tokio::test]
    async fn test_dropping_handles_stops_driver() {
        let (driver, handle) = driver(Capacity::default(), CancellationToken::new());
        drop(handle);

        let registry = driver.run().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_try_commands_report_full_queue() {
        let (_driver, handle) = TimerDriver::new(
            "full".to_string(),
            Registry::default(),
            TokioClock::new(),
            Duration::from_millis(10),
            1,
            CancellationToken::new(),
        );

        assert_ok!(handle.try_reset());
        assert_eq!(handle.try_shutdown(), Err(TimerError::CommandQueueFull));
    }
}
