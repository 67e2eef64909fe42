//! # Counting Semaphores
//!
//! A semaphore is a permit count plus a FIFO wait list. Waiters are served
//! strictly in the order they blocked; priority only decides whether the
//! woken task preempts the one that signalled.
//!
//! A bounded wait puts the task on the wait list *and* on the sleep queue.
//! Whichever completes first (signal or expiry) takes the task off the
//! other structure, and the loser finds nothing to do:
//!
//! - `signal` pops the waiter, clears `timed_out` and cancels its sleeper.
//! - the tick path pops the sleeper, sets `timed_out` and unlinks the task
//!   from the wait list. The count is left alone: no permit was granted.
//!
//! Because the switch away from a waiting task completes only after the
//! kernel critical section is released, the bounded wait is split in two:
//! [`Scheduler::wait_timeout`] blocks, and [`Scheduler::wait_outcome`] is
//! read once the task runs again.

use crate::arch::Port;
use crate::config::MAX_SEMAPHORES;
use crate::error::{KernelError, Resource};
use crate::scheduler::{task_node, wait_head, Scheduler};
use crate::task::{TaskId, TaskState};

/// Handle to a semaphore: its slot in the semaphore table plus the slot's
/// generation when the semaphore was created.
///
/// Destroying a semaphore bumps the slot's generation, so a handle kept
/// past `destroy_semaphore` is rejected even after the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreId {
    slot: u8,
    generation: u16,
}

impl SemaphoreId {
    pub(crate) const fn new(index: usize, generation: u16) -> Self {
        SemaphoreId {
            slot: index as u8,
            generation,
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.slot as usize
    }

    #[inline]
    pub const fn generation(self) -> u16 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Semaphore {
    /// Available permits. Never negative; waiters live on the wait list.
    pub(crate) count: u32,
}

impl Semaphore {
    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }
}

/// How a bounded wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Acquired,
    TimedOut,
}

/// First half of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStart {
    /// Decided without blocking.
    Done(WaitResult),
    /// The task blocked. Ask [`Scheduler::wait_outcome`] once it runs again.
    Pending(TaskId),
}

impl<P: Port> Scheduler<P> {
    /// Create a semaphore holding `initial` permits.
    pub fn create_semaphore(&mut self, initial: u32) -> Result<SemaphoreId, KernelError> {
        let Some(slot) = self.semaphores.iter().position(Option::is_none) else {
            log::error!("insufficient memory to create semaphore: all {} slots in use", MAX_SEMAPHORES);
            return Err(KernelError::AllocationFailure(Resource::Semaphore));
        };
        self.semaphores[slot] = Some(Semaphore { count: initial });
        log::debug!("semaphore {} created with count {}", slot, initial);
        Ok(SemaphoreId::new(slot, self.semaphore_generations[slot]))
    }

    /// Free a semaphore nobody is waiting on. The handle, and every copy
    /// of it, is dead afterwards.
    pub fn destroy_semaphore(&mut self, sem: SemaphoreId) -> Result<(), KernelError> {
        self.semaphore(sem).ok_or(KernelError::UnknownSemaphore)?;
        if !self.links.is_empty(wait_head(sem)) {
            return Err(KernelError::SemaphoreBusy);
        }
        let slot = sem.index();
        self.semaphores[slot] = None;
        self.semaphore_generations[slot] = self.semaphore_generations[slot].wrapping_add(1);
        Ok(())
    }

    /// The live semaphore `sem` names, if any.
    pub fn semaphore(&self, sem: SemaphoreId) -> Option<&Semaphore> {
        if !self.is_live(sem) {
            return None;
        }
        self.semaphores[sem.index()].as_ref()
    }

    /// Tasks blocked on `sem`, in the order they will be served. Empty for
    /// a dead handle.
    pub fn waiters(&self, sem: SemaphoreId) -> impl Iterator<Item = TaskId> + '_ {
        let live = self.is_live(sem);
        self.links
            .iter(wait_head(sem))
            .take_while(move |_| live)
            .map(TaskId::from_index)
    }

    /// Take a permit, blocking for as long as it takes.
    pub fn wait(&mut self, sem: SemaphoreId) -> Result<(), KernelError> {
        let semaphore = self.semaphores_mut(sem)?;
        if semaphore.count > 0 {
            semaphore.count -= 1;
            return Ok(());
        }

        let Some(id) = self.active else {
            log::error!("wait called outside task context");
            return Ok(());
        };
        self.block_on(id, sem, TaskState::Blocked);
        self.resched();
        Ok(())
    }

    /// Take a permit, giving up after `ticks` ticks.
    ///
    /// With `ticks == 0` this only polls. Otherwise the caller blocks on
    /// both the wait list and the sleep queue.
    pub fn wait_timeout(&mut self, sem: SemaphoreId, ticks: u32) -> Result<WaitStart, KernelError> {
        self.semaphores_mut(sem)?;
        if let Some(id) = self.active {
            self.task_mut(id).timed_out = false;
        }

        let semaphore = self.semaphores_mut(sem)?;
        if semaphore.count > 0 {
            semaphore.count -= 1;
            return Ok(WaitStart::Done(WaitResult::Acquired));
        }
        if ticks == 0 {
            return Ok(WaitStart::Done(WaitResult::TimedOut));
        }

        let Some(id) = self.active else {
            log::error!("wait called outside task context");
            return Ok(WaitStart::Done(WaitResult::TimedOut));
        };
        if self.sleepers.insert(id, ticks).is_err() {
            log::error!("sleep queue full; task {} not suspended", id.index());
            return Ok(WaitStart::Done(WaitResult::TimedOut));
        }
        self.block_on(id, sem, TaskState::SemaphoreTimedBlocked);
        self.resched();
        Ok(WaitStart::Pending(id))
    }

    /// Result of a bounded wait once the waiting task runs again.
    pub fn wait_outcome(&self, id: TaskId) -> WaitResult {
        match self.task(id) {
            Some(task) if task.timed_out => WaitResult::TimedOut,
            _ => WaitResult::Acquired,
        }
    }

    /// Release a permit. The longest waiter, if any, gets it directly and
    /// preempts the caller when it has the higher priority.
    ///
    /// A count already at `u32::MAX` stays there; the extra permit is
    /// dropped and logged.
    pub fn signal(&mut self, sem: SemaphoreId) -> Result<(), KernelError> {
        self.semaphores_mut(sem)?;

        // With waiters queued the count is 0: the permit goes straight to
        // the front waiter and the count does not move
        let Ok(node) = self.links.pop_front(wait_head(sem)) else {
            let semaphore = self.semaphores_mut(sem)?;
            match semaphore.count.checked_add(1) {
                Some(count) => semaphore.count = count,
                None => log::error!("semaphore {} count saturated; permit dropped", sem.index()),
            }
            return Ok(());
        };

        let id = TaskId::from_index(node);
        let task = self.task_mut(id);
        debug_assert_eq!(task.waiting_on, Some(sem));
        // The tick path may have flagged it before the waiter ever ran again
        task.timed_out = false;
        task.waiting_on = None;
        if task.state == TaskState::SemaphoreTimedBlocked {
            self.sleepers.cancel(id);
        }

        let priority = self.wake(id);
        log::trace!("semaphore {} handed to task {}", sem.index(), id.index());
        self.preempt_for(priority);
        Ok(())
    }

    fn block_on(&mut self, id: TaskId, sem: SemaphoreId, state: TaskState) {
        let task = self.task_mut(id);
        task.state = state;
        task.waiting_on = Some(sem);
        self.links.push_back(wait_head(sem), task_node(id));
    }

    fn is_live(&self, sem: SemaphoreId) -> bool {
        self.semaphore_generations.get(sem.index()) == Some(&sem.generation())
    }

    fn semaphores_mut(&mut self, sem: SemaphoreId) -> Result<&mut Semaphore, KernelError> {
        if !self.is_live(sem) {
            return Err(KernelError::UnknownSemaphore);
        }
        self.semaphores[sem.index()].as_mut().ok_or(KernelError::UnknownSemaphore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_STACK;
    use crate::testing::{self, task_a, task_b, task_c};

    #[test]
    fn test_wait_takes_available_permit() {
        let (mut s, arena) = testing::booted();
        let a = s.create_task(&arena, task_a, 3, MIN_STACK).unwrap();
        s.preempt();
        let sem = s.create_semaphore(2).unwrap();

        s.wait(sem).unwrap();
        assert_eq!(s.semaphore(sem).unwrap().count(), 1);
        assert_eq!(s.current_task(), Some(a));
    }

    #[test]
    fn test_wait_blocks_and_signal_wakes() {
        let (mut s, arena) = testing::booted();
        let idle = s.current_task().unwrap();
        let a = s.create_task(&arena, task_a, 3, MIN_STACK).unwrap();
        s.preempt();
        let sem = s.create_semaphore(0).unwrap();

        s.wait(sem).unwrap();
        assert_eq!(s.task_state(a), Some(TaskState::Blocked));
        assert_eq!(s.current_task(), Some(idle));
        assert_eq!(s.waiters(sem).collect::<Vec<_>>(), [a]);

        // Signalled from interrupt context while idle runs
        s.signal(sem).unwrap();
        assert_eq!(s.current_task(), Some(a));
        assert_eq!(s.semaphore(sem).unwrap().count(), 0);
        assert_eq!(s.waiters(sem).count(), 0);
        assert!(s.task(a).unwrap().waiting_on.is_none());
    }

    #[test]
    fn test_timed_wait_signalled_before_expiry() {
        let (mut s, arena) = testing::booted();
        let a = s.create_task(&arena, task_a, 3, MIN_STACK).unwrap();
        s.preempt();
        let sem = s.create_semaphore(0).unwrap();

        assert_eq!(s.wait_timeout(sem, 100), Ok(WaitStart::Pending(a)));
        assert_eq!(s.task_state(a), Some(TaskState::SemaphoreTimedBlocked));
        assert_eq!(s.sleep_remaining(a), Some(100));

        for _ in 0..50 {
            s.tick();
        }
        s.signal(sem).unwrap();

        assert_eq!(s.current_task(), Some(a));
        assert_eq!(s.wait_outcome(a), WaitResult::Acquired);
        assert_eq!(s.semaphore(sem).unwrap().count(), 0);
        assert_eq!(s.sleep_remaining(a), None);
        assert!(s.sleepers.is_empty());
    }

    #[test]
    fn test_timed_wait_expires() {
        let (mut s, arena) = testing::booted();
        let a = s.create_task(&arena, task_a, 3, MIN_STACK).unwrap();
        s.preempt();
        let sem = s.create_semaphore(0).unwrap();

        assert_eq!(s.wait_timeout(sem, 10), Ok(WaitStart::Pending(a)));
        for _ in 0..9 {
            s.tick();
        }
        assert_eq!(s.task_state(a), Some(TaskState::SemaphoreTimedBlocked));
        s.tick();

        assert_eq!(s.current_task(), Some(a));
        assert_eq!(s.wait_outcome(a), WaitResult::TimedOut);
        assert_eq!(s.semaphore(sem).unwrap().count(), 0);
        assert_eq!(s.waiters(sem).count(), 0);
        assert!(s.task(a).unwrap().waiting_on.is_none());

        // A late signal finds nobody waiting and banks the permit
        s.signal(sem).unwrap();
        assert_eq!(s.semaphore(sem).unwrap().count(), 1);
        assert_eq!(s.current_task(), Some(a));
    }

    #[test]
    fn test_zero_timeout_polls() {
        let (mut s, arena) = testing::booted();
        let a = s.create_task(&arena, task_a, 3, MIN_STACK).unwrap();
        s.preempt();
        let sem = s.create_semaphore(0).unwrap();
        let switches = s.port().switches;

        assert_eq!(s.wait_timeout(sem, 0), Ok(WaitStart::Done(WaitResult::TimedOut)));
        assert_eq!(s.current_task(), Some(a));
        assert_eq!(s.task_state(a), Some(TaskState::Active));
        assert_eq!(s.waiters(sem).count(), 0);
        assert!(s.sleepers.is_empty());
        assert_eq!(s.port().switches, switches);

        s.signal(sem).unwrap();
        assert_eq!(s.wait_timeout(sem, 0), Ok(WaitStart::Done(WaitResult::Acquired)));
        assert_eq!(s.semaphore(sem).unwrap().count(), 0);
    }

    #[test]
    fn test_waiters_served_fifo_regardless_of_priority() {
        let (mut s, arena) = testing::booted();
        let idle = s.current_task().unwrap();
        let low = s.create_task(&arena, task_a, 2, MIN_STACK).unwrap();
        let high = s.create_task(&arena, task_b, 6, MIN_STACK).unwrap();
        let sem = s.create_semaphore(0).unwrap();

        // `high` runs first and blocks, then `low`
        s.preempt();
        assert_eq!(s.current_task(), Some(high));
        s.wait(sem).unwrap();
        assert_eq!(s.current_task(), Some(low));
        s.wait_timeout(sem, 50).unwrap();
        assert_eq!(s.current_task(), Some(idle));
        assert_eq!(s.waiters(sem).collect::<Vec<_>>(), [high, low]);

        s.signal(sem).unwrap();
        assert_eq!(s.current_task(), Some(high));
        assert_eq!(s.waiters(sem).collect::<Vec<_>>(), [low]);

        // `high` signals: `low` wakes but does not preempt it
        s.signal(sem).unwrap();
        assert_eq!(s.current_task(), Some(high));
        assert_eq!(s.task_state(low), Some(TaskState::Ready));
        assert_eq!(s.wait_outcome(low), WaitResult::Acquired);
        assert_eq!(s.sleep_remaining(low), None);
    }

    #[test]
    fn test_signal_clears_timeout_flag_from_race() {
        let (mut s, arena) = testing::booted();
        let a = s.create_task(&arena, task_a, 3, MIN_STACK).unwrap();
        s.preempt();
        let sem = s.create_semaphore(0).unwrap();
        s.wait_timeout(sem, 5).unwrap();

        // The flag is left over from a previous expiry the task never read
        s.task_mut(a).timed_out = true;
        s.signal(sem).unwrap();
        assert_eq!(s.wait_outcome(a), WaitResult::Acquired);
    }

    #[test]
    fn test_permits_are_conserved() {
        let (mut s, arena) = testing::booted();
        let a = s.create_task(&arena, task_a, 5, MIN_STACK).unwrap();
        let b = s.create_task(&arena, task_b, 4, MIN_STACK).unwrap();
        let c = s.create_task(&arena, task_c, 3, MIN_STACK).unwrap();
        let sem = s.create_semaphore(1).unwrap();

        s.preempt();
        assert_eq!(s.current_task(), Some(a));
        s.wait(sem).unwrap(); // takes the permit
        s.sleep(1);
        assert_eq!(s.current_task(), Some(b));
        s.wait(sem).unwrap();
        assert_eq!(s.current_task(), Some(c));
        s.wait_timeout(sem, 3).unwrap();

        // 1 initial, 2 signals: 3 acquisitions, 0 left
        s.tick(); // `a` wakes
        assert_eq!(s.current_task(), Some(a));
        s.signal(sem).unwrap();
        s.signal(sem).unwrap();
        assert_eq!(s.semaphore(sem).unwrap().count(), 0);
        assert_eq!(s.waiters(sem).count(), 0);
        assert_eq!(s.wait_outcome(c), WaitResult::Acquired);
        assert_eq!(s.sleep_remaining(c), None);
    }

    #[test]
    fn test_signal_saturates_at_max() {
        let (mut s, _arena) = testing::booted();
        let sem = s.create_semaphore(u32::MAX).unwrap();

        assert_eq!(s.signal(sem), Ok(()));
        assert_eq!(s.semaphore(sem).unwrap().count(), u32::MAX);

        // Permits taken afterwards come off the saturated count
        assert_eq!(s.wait_timeout(sem, 0), Ok(WaitStart::Done(WaitResult::Acquired)));
        assert_eq!(s.semaphore(sem).unwrap().count(), u32::MAX - 1);
        s.signal(sem).unwrap();
        assert_eq!(s.semaphore(sem).unwrap().count(), u32::MAX);
    }

    #[test]
    fn test_create_and_destroy() {
        let (mut s, arena) = testing::booted();
        let mut ids = Vec::new();
        for _ in 0..MAX_SEMAPHORES {
            ids.push(s.create_semaphore(0).unwrap());
        }
        assert_eq!(
            s.create_semaphore(0),
            Err(KernelError::AllocationFailure(Resource::Semaphore))
        );

        // Busy while a task waits on it
        let a = s.create_task(&arena, task_a, 3, MIN_STACK).unwrap();
        s.preempt();
        s.wait(ids[0]).unwrap();
        assert_eq!(s.destroy_semaphore(ids[0]), Err(KernelError::SemaphoreBusy));

        s.signal(ids[0]).unwrap();
        assert_eq!(s.current_task(), Some(a));
        s.destroy_semaphore(ids[0]).unwrap();
        assert_eq!(s.destroy_semaphore(ids[0]), Err(KernelError::UnknownSemaphore));
        assert_eq!(s.signal(ids[0]), Err(KernelError::UnknownSemaphore));

        // The slot is reused under a new generation
        let again = s.create_semaphore(1).unwrap();
        assert_eq!(again.index(), ids[0].index());
        assert_ne!(again, ids[0]);

        // The old handle stays dead and cannot touch the new semaphore
        assert_eq!(s.signal(ids[0]), Err(KernelError::UnknownSemaphore));
        assert_eq!(s.wait(ids[0]), Err(KernelError::UnknownSemaphore));
        assert_eq!(s.wait_timeout(ids[0], 0), Err(KernelError::UnknownSemaphore));
        assert_eq!(s.destroy_semaphore(ids[0]), Err(KernelError::UnknownSemaphore));
        assert!(s.semaphore(ids[0]).is_none());
        assert_eq!(s.semaphore(again).unwrap().count(), 1);
        assert_eq!(s.current_task(), Some(a));
    }

    #[test]
    fn test_stale_handle_sees_no_waiters() {
        let (mut s, arena) = testing::booted();
        let a = s.create_task(&arena, task_a, 3, MIN_STACK).unwrap();
        s.preempt();

        let old = s.create_semaphore(0).unwrap();
        s.destroy_semaphore(old).unwrap();
        let fresh = s.create_semaphore(0).unwrap();
        s.wait(fresh).unwrap();

        assert_eq!(s.waiters(fresh).collect::<Vec<_>>(), [a]);
        assert_eq!(s.waiters(old).count(), 0);
        assert_eq!(s.signal(old), Err(KernelError::UnknownSemaphore));
        assert_eq!(s.task_state(a), Some(TaskState::Blocked));
    }
}
