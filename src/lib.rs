//! # TickOS
//!
//! A preemptive, priority-based multitasking kernel for small
//! microcontrollers. A handful of cooperating tasks share one CPU; the
//! kernel guarantees that the highest-priority ready task is always the
//! one running, and provides counting semaphores (with optional timeout)
//! and tick-based sleep.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                    │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │   launch · create_task · sleep · wait · signal · tick   │
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Scheduler   │   Semaphores       │  Sync Primitives  │
//! │  scheduler.rs│   semaphore.rs     │  sync.rs          │
//! │  ─ resched() │   ─ wait()         │  ─ Shared<T>      │
//! │  ─ tick()    │   ─ wait_timeout() │                   │
//! │  ─ preempt() │   ─ signal()       │                   │
//! ├──────────────┴───────┬────────────┴───────────────────┤
//! │  Task Model (task.rs)│  Queues (list.rs, sleepq.rs)    │
//! │  TCB · TaskState     │  ready/wait links · delta queue │
//! ├──────────────────────┴─────────────────────────────────┤
//! │          Arch Ports (arch/cortex_m4.rs, arch/sim.rs)    │
//! │    PendSV · SysTick · Context Switch · Stack Bootstrap  │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduling Model
//!
//! - 17 priority levels; 0 is reserved for the idle task
//! - FIFO within a level, no time slicing: equal-priority tasks must block,
//!   sleep, yield or exit to let each other run
//! - Preemption happens at the tick (a sleeper or timed waiter woke) and
//!   inside `signal` (a waiter woke), whenever the woken task outranks the
//!   running one
//! - Returning from a task's entry function ends the task; the kernel
//!   shuts down when only the idle task is left
//!
//! ## Memory Model
//!
//! - **No heap**: tasks, semaphores and sleep nodes live in fixed tables
//! - **Stack arena**: task stacks are carved from one static arena and
//!   reclaimed when a task exits
//! - **Critical sections**: every kernel call runs with interrupts disabled
//!   through the `critical-section` crate

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod config;
pub mod error;
pub mod kernel;
pub mod list;
pub mod memory;
pub mod scheduler;
pub mod semaphore;
pub mod sleepq;
pub mod sync;
pub mod task;

#[cfg(test)]
mod testing;

pub use error::KernelError;
pub use kernel::Kernel;
pub use semaphore::{SemaphoreId, WaitResult};
pub use task::{TaskId, TaskState};
