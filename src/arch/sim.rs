//! # Host Simulation Port
//!
//! Runs the kernel's bookkeeping on a development host. Nothing is actually
//! switched: every request the scheduler makes is recorded so that a driver
//! (usually a test) can act as "the running task" and inspect what the
//! hardware would have been asked to do.
//!
//! Bootstrap frames use the byte-addressed return-address layout from
//! [`frame`](super::frame); on a first-run switch the port decodes the frame
//! again, so the recorded entry and exit addresses are the ones the task
//! would really have resumed into.

use super::frame::{self, AddressWidth};
use super::{Context, Port, TaskEntry};

/// One context switch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    /// Saved stack pointer of the outgoing task, `None` if abandoned.
    pub from: Option<usize>,
    /// Stack pointer being restored.
    pub to: usize,
    pub first_run: bool,
    /// For a first run: where the task resumes, as encoded in its frame.
    pub entry: Option<usize>,
    /// For a first run: where a return from the entry point lands.
    pub exit: Option<usize>,
}

#[derive(Debug)]
pub struct SimPort {
    width: AddressWidth,
    /// Number of switches requested so far.
    pub switches: usize,
    pub last_switch: Option<Switch>,
    /// Tick period while the tick source runs.
    pub ticking: Option<u32>,
    pub shut_down: bool,
}

impl SimPort {
    pub const fn new() -> Self {
        Self {
            width: AddressWidth::Narrow16,
            switches: 0,
            last_switch: None,
            ticking: None,
            shut_down: false,
        }
    }

    /// Address every simulated task returns into.
    pub fn exit_routine() -> usize {
        task_return as usize
    }
}

impl Default for SimPort {
    fn default() -> Self {
        Self::new()
    }
}

extern "C" fn task_return() {}

extern "C" fn idle() {
    loop {
        core::hint::spin_loop();
    }
}

impl Port for SimPort {
    fn prepare_stack(&mut self, stack: &mut [u8], entry: TaskEntry, width: AddressWidth) -> Option<Context> {
        self.width = width;
        let base = stack.as_ptr() as usize;
        let sp = frame::prepare_return_frame(stack, entry as usize, Self::exit_routine(), width)?;
        Some(Context { sp: base + sp })
    }

    fn switch(&mut self, from: Option<&mut Context>, to: &Context, first_run: bool) {
        let (entry, exit) = if first_run {
            let n = self.width.bytes();
            // SAFETY: a first-run context points at the bootstrap frame
            // written by `prepare_stack`, two addresses long, inside a live
            // stack region.
            let bytes = unsafe { core::slice::from_raw_parts(to.sp as *const u8, 2 * n) };
            (
                frame::read_address(bytes, 0, self.width),
                frame::read_address(bytes, n, self.width),
            )
        } else {
            (None, None)
        };

        self.switches += 1;
        self.last_switch = Some(Switch {
            from: from.map(|ctx| ctx.sp),
            to: to.sp,
            first_run,
            entry,
            exit,
        });
    }

    fn start_ticks(&mut self, tick_usec: u32) {
        self.ticking = Some(tick_usec);
    }

    fn stop_ticks(&mut self) {
        self.ticking = None;
    }

    fn shutdown(&mut self) {
        self.shut_down = true;
    }

    fn idle_entry(&self) -> TaskEntry {
        idle
    }

    fn stack_pointer(&self, active: &Context) -> usize {
        active.sp
    }

    fn wait_for_interrupt() {
        core::hint::spin_loop();
    }
}
