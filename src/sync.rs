//! # Synchronization Primitives
//!
//! Interrupt-safe access to kernel state. All shared scheduler state must
//! be accessed within a critical section to prevent data races between
//! task code and the tick interrupt.
//!
//! On Cortex-M the critical section is the `cortex-m` single-core
//! implementation (interrupts disabled, previous state restored). Host
//! builds get the `critical-section` crate's `std` implementation.

use core::cell::RefCell;

use critical_section::{CriticalSection, Mutex};

/// Execute a closure within a critical section (interrupts disabled).
///
/// # Usage
/// ```ignore
/// sync::critical_section(|_cs| {
///     // Access shared state safely
/// });
/// ```
///
/// Keep critical sections as short as possible to minimize interrupt
/// latency. A context switch requested inside one is carried out as soon
/// as it ends.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}

/// State shared between task code and interrupt handlers.
pub struct Shared<T> {
    inner: Mutex<RefCell<T>>,
}

impl<T> Shared<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(value)),
        }
    }

    /// Run `f` on the state inside a critical section.
    ///
    /// Must not be re-entered from within `f`.
    pub fn lock<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        critical_section(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_mutates_in_place() {
        let shared = Shared::new(0u32);
        shared.lock(|n| *n += 2);
        assert_eq!(shared.lock(|n| *n), 2);
    }

    #[test]
    fn test_nested_critical_sections() {
        let shared = Shared::new(1u32);
        let seen = critical_section(|_| shared.lock(|n| *n));
        assert_eq!(seen, 1);
    }
}
