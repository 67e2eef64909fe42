//! # Scheduler
//!
//! Core scheduling logic for TickOS: one FIFO ready queue per priority
//! level, the currently active task, and the tick path that wakes sleepers
//! and expires timed semaphore waits.
//!
//! ## Scheduling Algorithm
//!
//! `resched()` scans the ready queues from the highest level down and takes
//! the front task of the first non-empty one. If that task is already the
//! active one nothing happens; otherwise the port is asked to switch to it.
//!
//! There is no time slicing. A running task is only displaced by a
//! *higher*-priority task becoming ready (at a tick or a semaphore signal),
//! or when it blocks, sleeps, yields, or exits. Tasks of equal priority
//! must cooperate.
//!
//! ## Shared state
//!
//! Everything here is mutated both by task code and by the tick interrupt.
//! Callers hold the kernel critical section around every method; the
//! [`Kernel`](crate::kernel::Kernel) wrapper takes care of that.

use crate::arch::{AddressWidth, Port};
use crate::config::{Config, MAX_SEMAPHORES, MAX_TASKS, PRIORITY_LEVELS};
use crate::error::KernelError;
use crate::list::{LinkTable, NodeId};
use crate::memory::StackPool;
use crate::semaphore::{Semaphore, SemaphoreId};
use crate::sleepq::SleepQueue;
use crate::task::{Task, TaskId, TaskState};

/// Link table layout: one link per task, then one head per ready queue,
/// then one head per semaphore wait list.
pub(crate) const LINK_NODES: usize = MAX_TASKS + PRIORITY_LEVELS + MAX_SEMAPHORES;

#[inline]
pub(crate) const fn task_node(id: TaskId) -> NodeId {
    id.index()
}

#[inline]
pub(crate) const fn ready_head(priority: u8) -> NodeId {
    MAX_TASKS + priority as usize
}

#[inline]
pub(crate) const fn wait_head(sem: SemaphoreId) -> NodeId {
    MAX_TASKS + PRIORITY_LEVELS + sem.index()
}

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The kernel's scheduling state. Constructed once and owned by a
/// [`Kernel`](crate::kernel::Kernel); there is no global instance.
///
/// ## Design Notes
///
/// - All tasks are stored in a fixed-size table (no heap)
/// - `active` is the one task in state [`TaskState::Active`]; it is `None`
///   only before the first switch and while an exiting task hands over
/// - The idle task at level 0 is always ready when nothing else is
pub struct Scheduler<P: Port> {
    pub(crate) port: P,
    pub(crate) config: Config,

    /// Descriptor table. A `None` slot is free.
    pub(crate) tasks: [Option<Task>; MAX_TASKS],

    /// Queue links: ready queues, semaphore wait lists and task links.
    pub(crate) links: LinkTable<LINK_NODES>,

    /// Pending wake-ups for sleeping and timed-waiting tasks.
    pub(crate) sleepers: SleepQueue<MAX_TASKS>,

    /// Semaphore table. A `None` slot is free.
    pub(crate) semaphores: [Option<Semaphore>; MAX_SEMAPHORES],

    /// Bumped each time a semaphore slot is freed; handles carry the value
    /// current at creation.
    pub(crate) semaphore_generations: [u16; MAX_SEMAPHORES],

    pub(crate) stacks: StackPool,

    /// The task that owns the CPU.
    pub(crate) active: Option<TaskId>,

    /// Live tasks, idle included.
    pub(crate) task_count: usize,

    /// Monotonic tick counter.
    pub(crate) tick_count: u64,

    /// Set once the first task has been switched in.
    pub(crate) running: bool,
}

impl<P: Port> Scheduler<P> {
    pub const fn new(port: P, config: Config) -> Self {
        Self {
            port,
            config,
            tasks: [None; MAX_TASKS],
            links: LinkTable::new(),
            sleepers: SleepQueue::new(),
            semaphores: [None; MAX_SEMAPHORES],
            semaphore_generations: [0; MAX_SEMAPHORES],
            stacks: StackPool::new(),
            active: None,
            task_count: 0,
            tick_count: 0,
            running: false,
        }
    }

    /// Change the address width and tick period. Only allowed while no
    /// task exists. `None` selects the default.
    pub fn set_options(
        &mut self,
        address_width: Option<AddressWidth>,
        tick_usec: Option<u32>,
    ) -> Result<(), KernelError> {
        self.config.apply(address_width, tick_usec, self.task_count > 0)
    }

    // ----- ----- Ready queues ----- ----- //

    /// Append `id` to the tail of its priority's ready queue.
    pub fn add_ready(&mut self, id: TaskId) {
        let priority = self.task(id).map_or(0, |t| t.priority);
        self.links.push_back(ready_head(priority), task_node(id));
    }

    /// Take `id` off whatever ready queue holds it. No-op if not queued.
    pub fn remove_ready(&mut self, id: TaskId) {
        self.links.unlink(task_node(id));
    }

    fn pop_highest_ready(&mut self) -> Option<TaskId> {
        (0..PRIORITY_LEVELS as u8)
            .rev()
            .find_map(|level| self.links.pop_front(ready_head(level)).ok())
            .map(TaskId::from_index)
    }

    // ----- ----- Switching ----- ----- //

    /// Select the highest-priority ready task and switch to it.
    ///
    /// The caller must already have put the active task wherever it
    /// belongs (a ready queue, a wait list, the sleep queue) or cleared
    /// `active` if the task is gone.
    pub fn resched(&mut self) {
        let Some(next) = self.pop_highest_ready() else {
            log::error!("resched with no ready task");
            return;
        };

        // Still the highest priority: keep running
        if self.active == Some(next) {
            self.task_mut(next).state = TaskState::Active;
            return;
        }

        let prev = self.active.replace(next);

        let task = self.task_mut(next);
        task.state = TaskState::Active;
        let first_run = core::mem::replace(&mut task.first_run, false);
        let to = task.context;

        log::trace!(
            "switch {:?} -> {} (first run: {})",
            prev.map(TaskId::index),
            next.index(),
            first_run
        );

        // Interrupts are disabled by the caller's critical section and come
        // back on once the switch into `next` completes.
        let from = match prev {
            Some(prev) => self.tasks[prev.index()].as_mut().map(|t| &mut t.context),
            None => None,
        };
        self.port.switch(from, &to, first_run);
    }

    /// Scheduling point: demote the active task to Ready and pick again.
    /// The active task keeps the CPU unless something outranks it; an equal
    /// priority task queued ahead of it does not.
    pub fn preempt(&mut self) {
        if let Some(id) = self.active {
            // Push to the front of its level so equal-priority peers do not
            // get a time slice out of this
            self.task_mut(id).state = TaskState::Ready;
            self.push_front_ready(id);
        }
        self.resched();
    }

    fn push_front_ready(&mut self, id: TaskId) {
        let priority = self.task(id).map_or(0, |t| t.priority);
        let head = ready_head(priority);
        match self.links.front(head) {
            // Inserting before the current front is an append to a queue
            // headed by that front node
            Some(front) => self.links.push_back(front, task_node(id)),
            None => self.links.push_back(head, task_node(id)),
        }
    }

    /// Preempt if a task at `priority` outranks the active one.
    pub(crate) fn preempt_for(&mut self, priority: u8) {
        match self.active.and_then(|id| self.task_priority(id)) {
            Some(active) if priority > active => self.preempt(),
            _ => {}
        }
    }

    // ----- ----- Tick path ----- ----- //

    /// Periodic tick: wake every task whose sleep or timed wait expired.
    ///
    /// An expired timed wait leaves its semaphore's wait list with
    /// `timed_out` set; the semaphore count is not touched because no
    /// permit was ever granted. If any woken task outranks the active one,
    /// the active task is demoted and the scheduler runs.
    pub fn tick(&mut self) {
        self.tick_count = self.tick_count.wrapping_add(1);
        self.sleepers.tick();

        let mut highest: Option<u8> = None;
        while let Some(id) = self.sleepers.pop_expired() {
            let Some(task) = self.tasks[id.index()].as_mut() else {
                continue;
            };
            if task.state == TaskState::SemaphoreTimedBlocked {
                task.timed_out = true;
                let sem = task.waiting_on.take();
                debug_assert!(
                    sem.is_some_and(|sem| self.links.iter(wait_head(sem)).any(|n| n == task_node(id))),
                    "timed waiter {} is not on its semaphore's wait list",
                    id.index()
                );
                self.links.unlink(task_node(id));
            }
            let priority = self.wake(id);
            highest = highest.max(Some(priority));
        }

        if let Some(priority) = highest {
            self.preempt_for(priority);
        }
    }

    /// Make a blocked task Ready. Returns its priority.
    pub(crate) fn wake(&mut self, id: TaskId) -> u8 {
        let task = self.task_mut(id);
        task.state = TaskState::Ready;
        let priority = task.priority;
        self.add_ready(id);
        priority
    }

    // ----- ----- Start and stop ----- ----- //

    pub fn start_ticks(&mut self) {
        self.port.start_ticks(self.config.tick_usec);
    }

    /// Make the first scheduling decision. The boot context is abandoned.
    pub fn start(&mut self) {
        self.running = true;
        self.resched();
    }

    /// Orderly shutdown: stop the tick source and terminate.
    pub fn terminate(&mut self) {
        self.port.stop_ticks();
        self.running = false;
        self.port.shutdown();
    }

    // ----- ----- Introspection ----- ----- //

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn config(&self) -> Config {
        self.config
    }

    pub fn current_task(&self) -> Option<TaskId> {
        self.active
    }

    pub fn task_count(&self) -> usize {
        self.task_count
    }

    pub fn ticks(&self) -> u64 {
        self.tick_count
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id.index())?.as_ref()
    }

    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.task(id).map(|t| t.state)
    }

    pub fn task_priority(&self, id: TaskId) -> Option<u8> {
        self.task(id).map(|t| t.priority)
    }

    /// Ticks until `id` wakes, if it is on the sleep queue.
    pub fn sleep_remaining(&self, id: TaskId) -> Option<u32> {
        self.sleepers.remaining(id)
    }

    /// Tasks queued at `priority`, front to back.
    pub fn ready_tasks(&self, priority: u8) -> impl Iterator<Item = TaskId> + '_ {
        let head = ready_head(priority.min((PRIORITY_LEVELS - 1) as u8));
        self.links.iter(head).map(TaskId::from_index)
    }

    /// Descriptor of a live task. Kernel paths only name live tasks.
    pub(crate) fn task_mut(&mut self, id: TaskId) -> &mut Task {
        match self.tasks[id.index()].as_mut() {
            Some(task) => task,
            None => panic!("task {} is not live", id.index()),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
