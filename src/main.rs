//! # TickOS Example Firmware
//!
//! Demonstrates the kernel with four tasks on an STM32F4 (or QEMU's
//! `netduinoplus2`), logging over semihosting:
//!
//! | Task | Priority | Behavior |
//! |------|----------|----------|
//! | `producer` | 3 | Produces an item every 10 ticks, five times, then returns |
//! | `consumer` | 5 | Waits for items; preempts the producer on every signal |
//! | `watchdog` | 4 | Timed waits on an alarm nobody raises; counts timeouts |
//! | `blinker`  | 2 | Sleeps and reports its remaining stack |
//!
//! Every task returns eventually. Once only the idle task is left the
//! kernel stops the tick and resets the board.

#![no_std]
#![no_main]

use cortex_m_rt::entry;
use cortex_m_semihosting::hprintln;
use log::{LevelFilter, Log, Metadata, Record};
use panic_halt as _;

use tickos::arch::cortex_m4::CortexM4;
use tickos::config::DEFAULT_STACK;
use tickos::sync::Shared;
use tickos::{Kernel, SemaphoreId, WaitResult};

static KERNEL: Kernel<CortexM4> = Kernel::new(CortexM4::new());

static ITEMS: Shared<Option<SemaphoreId>> = Shared::new(None);
static ALARM: Shared<Option<SemaphoreId>> = Shared::new(None);

const ITEM_COUNT: u32 = 5;

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

struct SemihostingLogger;

impl Log for SemihostingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            hprintln!("[{:<5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: SemihostingLogger = SemihostingLogger;

// ---------------------------------------------------------------------------
// Task entry points
// ---------------------------------------------------------------------------

fn semaphore(slot: &Shared<Option<SemaphoreId>>) -> Option<SemaphoreId> {
    slot.lock(|s| *s)
}

/// **Producer** (Priority 3)
extern "C" fn producer() {
    let Some(items) = semaphore(&ITEMS) else {
        return;
    };
    for n in 1..=ITEM_COUNT {
        KERNEL.sleep(10);
        KERNEL.exclusive(|| log::info!("produced item {}", n));
        // The consumer outranks us and runs before this returns
        if let Err(err) = KERNEL.signal(items) {
            log::error!("producer: {}", err);
        }
    }
}

/// **Consumer** (Priority 5)
extern "C" fn consumer() {
    let Some(items) = semaphore(&ITEMS) else {
        return;
    };
    for n in 1..=ITEM_COUNT {
        if let Err(err) = KERNEL.wait(items) {
            log::error!("consumer: {}", err);
            return;
        }
        KERNEL.exclusive(|| log::info!("consumed item {} at tick {}", n, KERNEL.ticks()));
    }
}

/// **Watchdog** (Priority 4)
///
/// Waits for an alarm with a 25-tick timeout. Nobody signals it, so each
/// wait ends in a timeout.
extern "C" fn watchdog() {
    let Some(alarm) = semaphore(&ALARM) else {
        return;
    };
    let mut timeouts = 0;
    for _ in 0..3 {
        match KERNEL.wait_timeout(alarm, 25) {
            Ok(WaitResult::Acquired) => log::warn!("watchdog: alarm raised"),
            Ok(WaitResult::TimedOut) => timeouts += 1,
            Err(err) => log::error!("watchdog: {}", err),
        }
    }
    KERNEL.exclusive(|| log::info!("watchdog: {} quiet periods", timeouts));
}

/// **Blinker** (Priority 2)
extern "C" fn blinker() {
    for _ in 0..4 {
        KERNEL.sleep(20);
        let left = KERNEL.stack_left().unwrap_or(0);
        KERNEL.exclusive(|| log::debug!("blink, {} bytes of stack left", left));
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn setup(kernel: &'static Kernel<CortexM4>) {
    let created = (|| -> Result<(), tickos::KernelError> {
        kernel.set_options(None, Some(10_000))?;

        let items = kernel.create_semaphore(0)?;
        let alarm = kernel.create_semaphore(0)?;
        ITEMS.lock(|s| *s = Some(items));
        ALARM.lock(|s| *s = Some(alarm));

        kernel.create_task(producer, 3, DEFAULT_STACK)?;
        kernel.create_task(consumer, 5, DEFAULT_STACK)?;
        kernel.create_task(watchdog, 4, DEFAULT_STACK)?;
        kernel.create_task(blinker, 2, DEFAULT_STACK)?;
        Ok(())
    })();

    if let Err(err) = created {
        log::error!("setup failed: {}", err);
    }
}

#[entry]
fn main() -> ! {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
    KERNEL.start(setup)
}
