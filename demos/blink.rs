//! Blink an imaginary LED and print a heartbeat, driven by the async driver

use soft_timer::{
    on_expiry, CancellationToken, Delay, Duration, MonotonicClock, Registry, Timer, TimerDriver,
    TimerKind, TokioClock,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::init();

    // A blocking delay first, feeding a pretend watchdog while it spins
    let mut spins = 0u64;
    let mut delay = Delay::new(MonotonicClock::new()).with_idle_task(move || {
        spins += 1;
        if spins % 1_000_000 == 0 {
            log::debug!("watchdog fed ({} spins)", spins);
        }
    });
    delay.wait_millis(100);
    println!("Busy-wait finished, starting timers...");

    let cancel_token = CancellationToken::new();
    let (driver, handle) = TimerDriver::new(
        "example_timer_driver".to_string(),
        Registry::default(),
        TokioClock::new(),
        Duration::from_millis(5), // heartbeat interval
        16,                       // command buffer size
        cancel_token.clone(),
    );
    let clock = *driver.clock();

    let led = Timer::new().into_shared();
    led.borrow_mut().arm(
        &clock,
        TimerKind::DualState,
        700,
        300,
        on_expiry(|expiry| {
            let lit = u8::from(expiry.state()) == 1;
            println!("[{}] LED {}", expiry.tick(), if lit { "on" } else { "off" });
        }),
    );

    let heartbeat = Timer::new().into_shared();
    heartbeat.borrow_mut().arm(
        &clock,
        TimerKind::Periodic,
        1000,
        0,
        on_expiry(|expiry| println!("[{}] heartbeat", expiry.tick())),
    );

    let stopper = Timer::new().into_shared();
    stopper.borrow_mut().arm(
        &clock,
        TimerKind::SingleShot,
        5000,
        0,
        on_expiry(move |expiry| {
            println!("[{}] time is up", expiry.tick());
            cancel_token.cancel();
        }),
    );

    let control = async {
        for timer in [&led, &heartbeat, &stopper] {
            handle.register(timer).await?;
            timer.borrow_mut().start(&clock);
        }
        println!("Timers set! Running for five seconds...");
        Ok::<(), soft_timer::TimerError>(())
    };

    let (registry, registered) = tokio::join!(driver.run(), control);
    registered?;

    println!(
        "Timer driver stopped with {} timer(s) registered",
        registry.len()
    );
    Ok(())
}
