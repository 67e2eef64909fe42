//! # Task Control Block
//!
//! Defines the task model for TickOS and the task lifecycle operations:
//! creation with stack bootstrap, sleep, yield, and the exit routine that
//! runs when a task's entry function returns.
//!
//! ## Task state machine
//!
//! ```text
//!                      resched()
//!   ┌──────────┐ ─────────────────────► ┌──────────┐
//!   │  Ready   │                        │  Active  │
//!   └──────────┘ ◄───────────────────── └──────────┘
//!      ▲  ▲  ▲     yield / preempted     │   │   │
//!      │  │  │                           │   │   │ sleep(n)
//!      │  │  │ tick expiry     ┌─────────────────┴──┐
//!      │  │  └──────────────── │   SleepBlocked     │
//!      │  │                    └────────────────────┘
//!      │  │ signal / timeout  ┌──────────────────────────┐
//!      │  └────────────────── │ SemaphoreTimedBlocked    │ ◄─ wait(sem, n)
//!      │                      └──────────────────────────┘
//!      │ signal               ┌──────────────────────────┐
//!      └───────────────────── │ Blocked                  │ ◄─ wait(sem)
//!                             └──────────────────────────┘
//! ```
//!
//! Each task has exactly one queue link (the entry at its own index in the
//! scheduler's link table). It places the task on a ready queue or on a
//! semaphore wait list, never both. A pending wake-up is tracked by a
//! separate node in the sleep queue.

use crate::arch::{Context, Port, TaskEntry};
use crate::config::{HIGHEST_PRIORITY, IDLE_PRIORITY, LOWEST_USER_PRIORITY, MAX_TASKS, MIN_STACK};
use crate::error::{KernelError, Resource};
use crate::memory::{StackArena, StackRegion};
use crate::scheduler::Scheduler;
use crate::semaphore::SemaphoreId;

// ---------------------------------------------------------------------------
// Identity and state
// ---------------------------------------------------------------------------

/// Handle to a task: its slot in the descriptor table.
///
/// A handle outlives its task; once the task exits the slot may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u8);

impl TaskId {
    pub(crate) const fn from_index(index: usize) -> Self {
        TaskId(index as u8)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Execution state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Queued on its priority's ready queue.
    Ready,
    /// Currently owns the CPU. Exactly one task is Active.
    Active,
    /// Waiting on a semaphore with no time limit.
    Blocked,
    /// Sleeping until its sleep-queue node expires.
    SleepBlocked,
    /// Waiting on a semaphore and on the sleep queue; whichever fires
    /// first wins.
    SemaphoreTimedBlocked,
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB) — the process descriptor.
///
/// TCBs are stored in a fixed table in the scheduler — no heap allocation.
#[derive(Debug, Clone, Copy)]
pub struct Task {
    pub(crate) priority: u8,
    pub(crate) state: TaskState,
    /// True until the task has been switched in for the first time.
    pub(crate) first_run: bool,
    /// Set by the tick path when a timed semaphore wait expires.
    pub(crate) timed_out: bool,
    pub(crate) context: Context,
    pub(crate) stack: StackRegion,
    /// Semaphore whose wait list currently holds this task.
    pub(crate) waiting_on: Option<SemaphoreId>,
}

impl Task {
    #[inline]
    pub fn priority(&self) -> u8 {
        self.priority
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        self.state
    }

    #[inline]
    pub fn stack(&self) -> StackRegion {
        self.stack
    }
}

/// Clamp a requested priority into the user range. Level 0 belongs to idle.
pub fn clamp_priority(priority: u8) -> u8 {
    priority.clamp(LOWEST_USER_PRIORITY, HIGHEST_PRIORITY)
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

impl<P: Port> Scheduler<P> {
    /// Create a task and make it Ready.
    ///
    /// The priority is clamped into the user range and the stack size is
    /// raised to [`MIN_STACK`]; neither is ever rejected. The new task does
    /// not run before the next scheduling point, even if it outranks the
    /// caller.
    ///
    /// On failure nothing is queued or counted, and any slot or stack
    /// already taken is given back.
    pub fn create_task(
        &mut self,
        arena: &StackArena,
        entry: TaskEntry,
        priority: u8,
        stack_size: usize,
    ) -> Result<TaskId, KernelError> {
        self.spawn(arena, entry, clamp_priority(priority), stack_size.max(MIN_STACK))
    }

    /// Create the idle task at the reserved level.
    pub(crate) fn create_idle(&mut self, arena: &StackArena, stack_size: usize) -> Result<TaskId, KernelError> {
        let entry = self.port.idle_entry();
        self.spawn(arena, entry, IDLE_PRIORITY, stack_size.max(MIN_STACK))
    }

    fn spawn(
        &mut self,
        arena: &StackArena,
        entry: TaskEntry,
        priority: u8,
        stack_size: usize,
    ) -> Result<TaskId, KernelError> {
        let Some(slot) = self.tasks.iter().position(Option::is_none) else {
            log::error!("insufficient memory to create task: all {} slots in use", MAX_TASKS);
            return Err(KernelError::AllocationFailure(Resource::TaskSlot));
        };

        let Some(region) = self.stacks.alloc(stack_size) else {
            log::error!("insufficient memory to create task: no {} byte stack", stack_size);
            return Err(KernelError::AllocationFailure(Resource::Stack));
        };

        // SAFETY: the region was just allocated, so no task runs on it.
        let stack = unsafe { arena.region_mut(region) };
        let Some(context) = self.port.prepare_stack(stack, entry, self.config.address_width) else {
            self.stacks.release(region);
            log::error!("insufficient memory to create task: frame does not fit {} bytes", region.len);
            return Err(KernelError::AllocationFailure(Resource::Stack));
        };

        let id = TaskId::from_index(slot);
        self.tasks[slot] = Some(Task {
            priority,
            state: TaskState::Ready,
            first_run: true,
            timed_out: false,
            context,
            stack: region,
            waiting_on: None,
        });
        self.add_ready(id);
        self.task_count += 1;

        log::debug!("task {} created: priority {}, {} byte stack", slot, priority, region.len);
        Ok(id)
    }

    /// Put the calling task to sleep for `ticks` ticks.
    ///
    /// `sleep(0)` returns at once without suspending.
    pub fn sleep(&mut self, ticks: u32) {
        if ticks == 0 {
            return;
        }
        let Some(id) = self.active else {
            log::error!("sleep called outside task context");
            return;
        };

        if self.sleepers.insert(id, ticks).is_err() {
            log::error!("sleep queue full; task {} not suspended", id.index());
            return;
        }
        self.task_mut(id).state = TaskState::SleepBlocked;
        self.resched();
    }

    /// Give up the CPU to any other ready task at the same or higher
    /// priority. The caller goes to the tail of its ready queue.
    pub fn yield_now(&mut self) {
        let Some(id) = self.active else {
            return;
        };
        self.task_mut(id).state = TaskState::Ready;
        self.add_ready(id);
        self.resched();
    }

    /// Exit routine: runs when the active task's entry function returns.
    ///
    /// The descriptor slot and stack are reclaimed here. The task's context
    /// is abandoned rather than saved, so the next switch never writes to
    /// the freed stack. Once only the idle task remains the kernel shuts
    /// down.
    pub fn exit_current(&mut self) {
        let Some(id) = self.active.take() else {
            log::error!("exit called outside task context");
            return;
        };

        self.remove_ready(id);
        self.sleepers.cancel(id);
        if let Some(task) = self.tasks[id.index()].take() {
            self.stacks.release(task.stack);
        }
        self.task_count -= 1;
        log::debug!("task {} exited, {} remaining", id.index(), self.task_count);

        if self.task_count <= 1 {
            log::info!("all tasks done, exiting");
            self.terminate();
        } else {
            self.resched();
        }
    }

    /// Bytes of stack left below the active task's stack pointer.
    pub fn stack_left(&self, arena: &StackArena) -> Option<usize> {
        let task = self.task(self.active?)?;
        let sp = self.port.stack_pointer(&task.context);
        Some(sp.saturating_sub(arena.base_of(task.stack)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::sim::SimPort;
    use crate::arch::AddressWidth;
    use crate::config::{IDLE_STACK, STACK_ARENA_SIZE};
    use crate::testing::{self, task_a, task_b};

    #[test]
    fn test_priority_clamped() {
        assert_eq!(clamp_priority(0), LOWEST_USER_PRIORITY);
        assert_eq!(clamp_priority(5), 5);
        assert_eq!(clamp_priority(200), HIGHEST_PRIORITY);
    }

    #[test]
    fn test_create_clamps_and_floors() {
        let (mut s, arena) = testing::scheduler();

        let id = s.create_task(&arena, task_a, 0, 16).unwrap();
        let task = s.task(id).unwrap();
        assert_eq!(task.priority(), LOWEST_USER_PRIORITY);
        assert_eq!(task.state(), TaskState::Ready);
        assert_eq!(task.stack().len, MIN_STACK);
        assert_eq!(s.task_count(), 1);
        assert_eq!(s.ready_tasks(LOWEST_USER_PRIORITY).collect::<Vec<_>>(), [id]);

        let high = s.create_task(&arena, task_b, 99, 512).unwrap();
        assert_eq!(s.task_priority(high), Some(HIGHEST_PRIORITY));
        assert_eq!(s.task(high).unwrap().stack().len, 512);
    }

    #[test]
    fn test_failed_creation_leaves_no_trace() {
        let (mut s, arena) = testing::booted();
        let count = s.task_count();

        let err = s.create_task(&arena, task_a, 3, STACK_ARENA_SIZE * 2);
        assert_eq!(err, Err(KernelError::AllocationFailure(Resource::Stack)));
        assert_eq!(s.task_count(), count);
        assert_eq!(s.ready_tasks(3).count(), 0);

        // Fill the descriptor table
        while s.task_count() < MAX_TASKS {
            s.create_task(&arena, task_a, 1, MIN_STACK).unwrap();
        }
        let err = s.create_task(&arena, task_a, 1, MIN_STACK);
        assert_eq!(err, Err(KernelError::AllocationFailure(Resource::TaskSlot)));
        assert_eq!(s.task_count(), MAX_TASKS);
    }

    #[test]
    fn test_bootstrap_frame_enters_entry_then_exit() {
        let (mut s, arena) = testing::scheduler();
        s.set_options(Some(AddressWidth::Extended24), None).unwrap();
        let id = s.create_task(&arena, task_a, 2, MIN_STACK).unwrap();

        s.start();
        assert_eq!(s.current_task(), Some(id));

        let width = AddressWidth::Extended24;
        let switch = s.port().last_switch.unwrap();
        assert!(switch.first_run);
        assert_eq!(switch.from, None);
        assert_eq!(switch.entry, Some(task_a as usize & width.mask()));
        assert_eq!(switch.exit, Some(SimPort::exit_routine() & width.mask()));

        // Frame sits at the very end of the region
        let region = s.task(id).unwrap().stack();
        assert_eq!(switch.to, arena.base_of(region) + region.len - 2 * width.bytes());
    }

    #[test]
    fn test_sleep_zero_is_noop() {
        let (mut s, arena) = testing::booted();
        let a = s.create_task(&arena, task_a, 2, MIN_STACK).unwrap();
        s.preempt();
        let switches = s.port().switches;

        s.sleep(0);
        assert_eq!(s.current_task(), Some(a));
        assert_eq!(s.task_state(a), Some(TaskState::Active));
        assert_eq!(s.sleep_remaining(a), None);
        assert_eq!(s.port().switches, switches);
    }

    #[test]
    fn test_sleep_blocks_until_expiry() {
        let (mut s, arena) = testing::booted();
        let idle = s.current_task().unwrap();
        let a = s.create_task(&arena, task_a, 2, MIN_STACK).unwrap();
        s.preempt();

        s.sleep(3);
        assert_eq!(s.task_state(a), Some(TaskState::SleepBlocked));
        assert_eq!(s.current_task(), Some(idle));
        assert_eq!(s.sleep_remaining(a), Some(3));

        s.tick();
        s.tick();
        assert_eq!(s.current_task(), Some(idle));
        s.tick();
        assert_eq!(s.current_task(), Some(a));
        assert_eq!(s.task_state(idle), Some(TaskState::Ready));
        assert_eq!(s.sleep_remaining(a), None);
    }

    #[test]
    fn test_yield_rotates_equal_priority() {
        let (mut s, arena) = testing::booted();
        let a = s.create_task(&arena, task_a, 4, MIN_STACK).unwrap();
        let b = s.create_task(&arena, task_b, 4, MIN_STACK).unwrap();

        s.preempt();
        assert_eq!(s.current_task(), Some(a));
        s.yield_now();
        assert_eq!(s.current_task(), Some(b));
        assert_eq!(s.ready_tasks(4).collect::<Vec<_>>(), [a]);
        s.yield_now();
        assert_eq!(s.current_task(), Some(a));
    }

    #[test]
    fn test_yield_alone_keeps_running() {
        let (mut s, arena) = testing::booted();
        let a = s.create_task(&arena, task_a, 4, MIN_STACK).unwrap();
        s.preempt();
        let switches = s.port().switches;

        s.yield_now();
        assert_eq!(s.current_task(), Some(a));
        assert_eq!(s.task_state(a), Some(TaskState::Active));
        assert_eq!(s.port().switches, switches);
    }

    #[test]
    fn test_exit_reclaims_and_abandons_context() {
        let (mut s, arena) = testing::booted();
        let a = s.create_task(&arena, task_a, 3, 512).unwrap();
        let b = s.create_task(&arena, task_b, 2, MIN_STACK).unwrap();
        s.preempt();
        assert_eq!(s.current_task(), Some(a));
        let count = s.task_count();

        s.exit_current();
        assert_eq!(s.task_count(), count - 1);
        assert!(s.task(a).is_none());
        assert_eq!(s.current_task(), Some(b));
        assert_eq!(s.port().last_switch.unwrap().from, None);
        assert!(!s.port().shut_down);

        // The slot and the 512-byte region come back
        let c = s.create_task(&arena, task_a, 1, 400).unwrap();
        assert_eq!(c, a);
        assert_eq!(s.task(c).unwrap().stack().len, 512);
    }

    #[test]
    fn test_last_exit_shuts_down() {
        let (mut s, arena) = testing::booted();
        let a = s.create_task(&arena, task_a, 3, MIN_STACK).unwrap();
        s.preempt();
        assert_eq!(s.current_task(), Some(a));
        assert!(s.port().ticking.is_some());

        s.exit_current();
        assert_eq!(s.task_count(), 1);
        assert!(s.port().shut_down);
        assert_eq!(s.port().ticking, None);
    }

    #[test]
    fn test_stack_left_for_fresh_task() {
        let (mut s, arena) = testing::scheduler();
        let a = s.create_task(&arena, task_a, 3, IDLE_STACK).unwrap();
        s.start();
        assert_eq!(s.current_task(), Some(a));
        assert_eq!(s.stack_left(&arena), Some(IDLE_STACK - 2 * AddressWidth::Narrow16.bytes()));
    }
}
