//! # Kernel
//!
//! Public API of TickOS. A [`Kernel`] owns the scheduler state and the
//! stack arena; every call takes the kernel critical section, operates on
//! the scheduler, and leaves the section again. Context switches requested
//! inside the section are carried out by the port as soon as it ends.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset handler (cortex-m-rt)
//!   └─► main()
//!         └─► KERNEL.start(setup)        ← does not return
//!               ├─► Port::attach         ← handlers can find the kernel
//!               ├─► kernel mutex
//!               ├─► setup(&KERNEL)       ← options, tasks, semaphores
//!               ├─► idle task
//!               ├─► tick source
//!               └─► first switch         ← boot context abandoned
//! ```
//!
//! The kernel ends once every task but idle has returned, or on an
//! explicit [`Kernel::terminate`].

use crate::arch::{AddressWidth, Port, TaskEntry};
use crate::config::{Config, IDLE_STACK, RELEASE};
use crate::error::KernelError;
use crate::memory::StackArena;
use crate::scheduler::Scheduler;
use crate::semaphore::{SemaphoreId, WaitResult, WaitStart};
use crate::sync::Shared;
use crate::task::TaskId;

pub struct Kernel<P: Port> {
    scheduler: Shared<Scheduler<P>>,
    /// Semaphore behind [`Kernel::exclusive`]. Created at launch.
    mutex: Shared<Option<SemaphoreId>>,
    arena: StackArena,
}

impl<P: Port> Kernel<P> {
    pub const fn new(port: P) -> Self {
        Self {
            scheduler: Shared::new(Scheduler::new(port, Config::DEFAULT)),
            mutex: Shared::new(None),
            arena: StackArena::new(),
        }
    }

    // ----- ----- Startup and shutdown ----- ----- //

    /// Bring the kernel up and make the first scheduling decision.
    ///
    /// `setup` runs before the idle task exists, so it may still change
    /// options, and creates the application's tasks and semaphores.
    pub fn launch<F>(&'static self, setup: F) -> Result<(), KernelError>
    where
        F: FnOnce(&'static Kernel<P>),
    {
        P::attach(self);
        log::info!("TickOS {} starting", RELEASE);

        let mutex = self.create_semaphore(1)?;
        self.mutex.lock(|m| *m = Some(mutex));

        setup(self);

        self.scheduler.lock(|s| -> Result<(), KernelError> {
            s.create_idle(&self.arena, IDLE_STACK)?;
            log::info!("start tasking: {} tasks, tick {} us", s.task_count(), s.config().tick_usec);
            s.start_ticks();
            s.start();
            Ok(())
        })
    }

    /// [`launch`](Self::launch) and hand the CPU to the tasks for good.
    pub fn start<F>(&'static self, setup: F) -> !
    where
        F: FnOnce(&'static Kernel<P>),
    {
        if let Err(err) = self.launch(setup) {
            log::error!("kernel launch failed: {}", err);
            self.terminate();
        }
        // The first switch abandons this context
        loop {
            P::wait_for_interrupt();
        }
    }

    /// Stop the tick source and shut down, whatever tasks remain.
    pub fn terminate(&self) {
        log::info!("terminating");
        self.scheduler.lock(|s| s.terminate());
    }

    // ----- ----- Options ----- ----- //

    /// Change the address width and tick period. `None` restores the
    /// default. Fails once any task exists.
    pub fn set_options(&self, address_width: Option<AddressWidth>, tick_usec: Option<u32>) -> Result<(), KernelError> {
        self.scheduler.lock(|s| s.set_options(address_width, tick_usec))
    }

    pub fn config(&self) -> Config {
        self.scheduler.lock(|s| s.config())
    }

    // ----- ----- Tasks ----- ----- //

    /// Create a task. The priority is clamped to the user range and the
    /// stack size raised to the minimum. The caller keeps running.
    pub fn create_task(&self, entry: TaskEntry, priority: u8, stack_size: usize) -> Result<TaskId, KernelError> {
        self.scheduler.lock(|s| s.create_task(&self.arena, entry, priority, stack_size))
    }

    pub fn sleep(&self, ticks: u32) {
        self.scheduler.lock(|s| s.sleep(ticks));
    }

    pub fn yield_now(&self) {
        self.scheduler.lock(|s| s.yield_now());
    }

    /// The calling task.
    pub fn current_task(&self) -> Option<TaskId> {
        self.scheduler.lock(|s| s.current_task())
    }

    /// Bytes of stack left to the calling task.
    pub fn stack_left(&self) -> Option<usize> {
        self.scheduler.lock(|s| s.stack_left(&self.arena))
    }

    // ----- ----- Semaphores ----- ----- //

    pub fn create_semaphore(&self, initial: u32) -> Result<SemaphoreId, KernelError> {
        self.scheduler.lock(|s| s.create_semaphore(initial))
    }

    /// Destroy a semaphore. The kernel mutex behind
    /// [`exclusive`](Self::exclusive) is refused.
    pub fn destroy_semaphore(&self, sem: SemaphoreId) -> Result<(), KernelError> {
        if self.mutex.lock(|m| *m) == Some(sem) {
            log::error!("semaphore {} is the kernel mutex", sem.index());
            return Err(KernelError::ReservedSemaphore);
        }
        self.scheduler.lock(|s| s.destroy_semaphore(sem))
    }

    /// Take a permit, blocking until one is available.
    pub fn wait(&self, sem: SemaphoreId) -> Result<(), KernelError> {
        self.scheduler.lock(|s| s.wait(sem))
    }

    /// Take a permit, giving up after `ticks` ticks. `ticks == 0` polls.
    ///
    /// The result is only meaningful on a port that really switches away
    /// from the caller. On [`SimPort`](crate::arch::sim::SimPort) a wait
    /// that blocks returns `Acquired` at once while the task is still
    /// blocked; read [`Scheduler::wait_outcome`] through
    /// [`inspect`](Self::inspect) after it is woken instead.
    pub fn wait_timeout(&self, sem: SemaphoreId, ticks: u32) -> Result<WaitResult, KernelError> {
        match self.scheduler.lock(|s| s.wait_timeout(sem, ticks))? {
            WaitStart::Done(result) => Ok(result),
            // Back here once signalled or expired
            WaitStart::Pending(id) => Ok(self.scheduler.lock(|s| s.wait_outcome(id))),
        }
    }

    /// Release a permit. Safe to call from interrupt handlers.
    pub fn signal(&self, sem: SemaphoreId) -> Result<(), KernelError> {
        self.scheduler.lock(|s| s.signal(sem))
    }

    /// Run `f` while holding the kernel mutex, a single-permit semaphore
    /// shared by every task. Before launch `f` simply runs.
    pub fn exclusive<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let Some(mutex) = self.mutex.lock(|m| *m) else {
            return f();
        };
        if let Err(err) = self.wait(mutex) {
            log::error!("kernel mutex: {}", err);
        }
        let result = f();
        if let Err(err) = self.signal(mutex) {
            log::error!("kernel mutex: {}", err);
        }
        result
    }

    // ----- ----- Port entry points ----- ----- //

    /// Periodic tick. Called by the port's timer interrupt.
    pub fn tick(&self) {
        self.scheduler.lock(|s| s.tick());
    }

    /// Exit routine of the running task. Called by the port when a task's
    /// entry function returns.
    pub fn exit_current(&self) {
        self.scheduler.lock(|s| s.exit_current());
    }

    // ----- ----- Introspection ----- ----- //

    /// Ticks since the tick source started.
    pub fn ticks(&self) -> u64 {
        self.scheduler.lock(|s| s.ticks())
    }

    /// Read-only view of the scheduler, inside the critical section.
    pub fn inspect<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Scheduler<P>) -> R,
    {
        self.scheduler.lock(|s| f(s))
    }
}
