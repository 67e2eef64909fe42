//! # TickOS Configuration
//!
//! Compile-time limits governing the kernel, plus the small set of runtime
//! options that may be changed before the first task is created.
//! All limits are fixed at compile time — no dynamic allocation.

use crate::arch::AddressWidth;
use crate::error::KernelError;

/// Number of priority levels. Level 0 belongs to the idle task; user tasks
/// run at `1..PRIORITY_LEVELS`.
pub const PRIORITY_LEVELS: usize = 17;

/// Highest priority a user task can hold.
pub const HIGHEST_PRIORITY: u8 = (PRIORITY_LEVELS - 1) as u8;

/// Lowest priority a user task can hold.
pub const LOWEST_USER_PRIORITY: u8 = 1;

/// Priority reserved for the idle task.
pub const IDLE_PRIORITY: u8 = 0;

/// Maximum number of tasks the kernel can hold simultaneously, idle task
/// included. This bounds the descriptor table and the sleep-node pool.
pub const MAX_TASKS: usize = 8;

/// Maximum number of live semaphores, including the kernel mutex.
pub const MAX_SEMAPHORES: usize = 8;

/// Smallest stack a task may own. Requests below this are raised silently:
/// the interrupt path needs this much room on whatever task it lands on.
pub const MIN_STACK: usize = 256;

/// Stack size used when the caller has no particular requirement.
pub const DEFAULT_STACK: usize = 256;

/// Stack size of the idle task.
pub const IDLE_STACK: usize = MIN_STACK;

/// Bytes of RAM reserved for task stacks.
pub const STACK_ARENA_SIZE: usize = 4096;

/// Stack regions are carved at this alignment (AAPCS requires 8).
pub const STACK_ALIGN: usize = 8;

/// Default tick period in microseconds (10 ms).
pub const DEFAULT_TICK_USEC: u32 = 10_000;

/// Tick periods below this draw a warning. They are still accepted.
pub const TICK_WARN_FLOOR_USEC: u32 = 1_000;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Kernel release reported in the start banner.
pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// Runtime options
// ---------------------------------------------------------------------------

/// Options fixed once before any task exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Width of code addresses written into bootstrap frames.
    pub address_width: AddressWidth,
    /// Tick period in microseconds.
    pub tick_usec: u32,
}

impl Config {
    pub const DEFAULT: Config = Config {
        address_width: AddressWidth::Narrow16,
        tick_usec: DEFAULT_TICK_USEC,
    };

    /// Apply caller overrides. `None` selects the default for that option.
    ///
    /// `locked` is true once any task exists; the options can no longer
    /// change at that point because every bootstrap frame already built
    /// used the old address width.
    pub fn apply(
        &mut self,
        address_width: Option<AddressWidth>,
        tick_usec: Option<u32>,
        locked: bool,
    ) -> Result<(), KernelError> {
        if locked {
            log::error!("options must be set before the first task is created");
            return Err(KernelError::ConfigLocked);
        }

        self.address_width = address_width.unwrap_or(Config::DEFAULT.address_width);
        self.tick_usec = match tick_usec {
            None => DEFAULT_TICK_USEC,
            Some(usec) => {
                if usec < TICK_WARN_FLOOR_USEC {
                    log::warn!("tick period of {} us: do you really need sleep resolution below 1 ms?", usec);
                }
                usec.max(1)
            }
        };

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::DEFAULT
    }
}
