//! # Architecture Abstraction Layer
//!
//! The kernel never touches registers itself. Everything processor-specific
//! goes through [`Port`]: laying out a never-run task's stack, saving and
//! restoring contexts, and driving the periodic tick.
//!
//! Ports:
//! - [`cortex_m4`] — PendSV context switch and SysTick tick source
//!   (built for `target_arch = "arm"` only).
//! - [`sim`] — host port that records every request; used for simulation
//!   and by the test suite.

pub mod frame;
pub mod sim;

#[cfg(target_arch = "arm")]
pub mod cortex_m4;

pub use frame::AddressWidth;

use crate::kernel::Kernel;

/// Entry point of a task. Returning from it ends the task.
pub type TaskEntry = extern "C" fn();

/// Saved execution state of a task that is not running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Context {
    /// Stack pointer at the moment the task was switched out (or the top
    /// of its bootstrap frame if it never ran).
    pub sp: usize,
}

/// Processor-specific services the scheduler depends on.
pub trait Port {
    /// Prepare a never-run task's stack so that the first resume enters
    /// `entry`, and a normal return from `entry` enters the port's exit
    /// routine, which hands the task back to the kernel.
    ///
    /// Returns `None` if `stack` cannot hold the bootstrap frame.
    fn prepare_stack(&mut self, stack: &mut [u8], entry: TaskEntry, width: AddressWidth) -> Option<Context>;

    /// Switch from the running task to the task whose context is `to`.
    ///
    /// `from` is `None` when the outgoing context is to be abandoned: the
    /// boot context on the very first switch, or a task that has exited.
    /// `first_run` tells the port that `to` still holds its bootstrap frame.
    ///
    /// Called with interrupts disabled. Interrupts come back on as part of
    /// completing the switch into the new task. A port that defers the
    /// actual switch must keep the earliest outgoing context if it is asked
    /// to switch again before the deferred switch has run.
    fn switch(&mut self, from: Option<&mut Context>, to: &Context, first_run: bool);

    /// Start the periodic tick interrupt.
    fn start_ticks(&mut self, tick_usec: u32);

    /// Stop the periodic tick interrupt.
    fn stop_ticks(&mut self);

    /// Terminate: reset the device or end the process.
    fn shutdown(&mut self);

    /// Body of the idle task. Must never block.
    fn idle_entry(&self) -> TaskEntry;

    /// Current stack pointer of the running task.
    fn stack_pointer(&self, active: &Context) -> usize;

    /// Called once at launch with the kernel that owns this port, for ports
    /// whose interrupt handlers need to find it.
    fn attach(_kernel: &'static Kernel<Self>)
    where
        Self: Sized,
    {
    }

    /// Sleep until the next interrupt.
    fn wait_for_interrupt()
    where
        Self: Sized;
}
