//! # Kernel Errors
//!
//! Only creation calls and configuration can fail. Everything that can
//! suspend a task (`sleep`, `wait`, `yield_now`) is defined never to fail,
//! and a bounded semaphore wait that expires is an ordinary
//! [`WaitResult::TimedOut`](crate::semaphore::WaitResult), not an error.

use core::fmt;

/// The fixed-capacity resource that ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Every task descriptor slot is in use.
    TaskSlot,
    /// The stack arena cannot supply a region of the requested size.
    Stack,
    /// Every semaphore slot is in use.
    Semaphore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// A creation request was abandoned. Scheduler state is untouched.
    AllocationFailure(Resource),
    /// Options were changed after the first task was created.
    ConfigLocked,
    /// The semaphore handle does not name a live semaphore.
    UnknownSemaphore,
    /// The semaphore still has tasks waiting on it.
    SemaphoreBusy,
    /// The semaphore belongs to the kernel and cannot be destroyed.
    ReservedSemaphore,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::TaskSlot => f.write_str("task descriptor"),
            Resource::Stack => f.write_str("task stack"),
            Resource::Semaphore => f.write_str("semaphore"),
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::AllocationFailure(what) => write!(f, "insufficient memory for {}", what),
            KernelError::ConfigLocked => f.write_str("options are fixed once a task exists"),
            KernelError::UnknownSemaphore => f.write_str("no such semaphore"),
            KernelError::SemaphoreBusy => f.write_str("semaphore has waiting tasks"),
            KernelError::ReservedSemaphore => f.write_str("semaphore is reserved by the kernel"),
        }
    }
}
