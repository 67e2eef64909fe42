//! # Task Stack Memory
//!
//! Task stacks are carved out of one statically reserved [`StackArena`].
//! The [`StackPool`] hands out regions by offset: it first reuses a region
//! released by an exited task if one is large enough, and otherwise bumps
//! into untouched arena space. Regions are never split or merged, which
//! keeps both operations O(MAX_TASKS) with no fragmentation bookkeeping.

use core::cell::UnsafeCell;

use crate::config::{MAX_TASKS, STACK_ALIGN, STACK_ARENA_SIZE};

fn align_up(x: usize, align: usize) -> usize {
    (x + align - 1) / align * align
}

/// A task's stack, as an offset range into the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    pub offset: usize,
    pub len: usize,
}

/// Backing memory for every task stack.
///
/// Tasks execute on this memory, so it is only ever reached through raw
/// pointers, never through a long-lived reference.
#[repr(C, align(8))]
pub struct StackArena {
    bytes: UnsafeCell<[u8; STACK_ARENA_SIZE]>,
}

// SAFETY: each region is used by exactly one task; the kernel hands out
// disjoint regions and touches a region only while creating its task.
unsafe impl Sync for StackArena {}

impl StackArena {
    pub const fn new() -> Self {
        Self {
            bytes: UnsafeCell::new([0; STACK_ARENA_SIZE]),
        }
    }

    /// Address of the first byte of `region`.
    pub fn base_of(&self, region: StackRegion) -> usize {
        self.bytes.get() as usize + region.offset
    }

    /// Mutable view of `region`.
    ///
    /// # Safety
    /// No task may be executing on `region`, and no other view of it may
    /// be alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn region_mut(&self, region: StackRegion) -> &mut [u8] {
        debug_assert!(region.offset + region.len <= STACK_ARENA_SIZE);
        let start = (self.bytes.get() as *mut u8).add(region.offset);
        core::slice::from_raw_parts_mut(start, region.len)
    }
}

impl Default for StackArena {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocation state of the arena.
pub struct StackPool {
    next: usize,
    released: [Option<StackRegion>; MAX_TASKS],
}

impl StackPool {
    pub const fn new() -> Self {
        Self {
            next: 0,
            released: [None; MAX_TASKS],
        }
    }

    /// Reserve at least `size` bytes. Returns `None` when neither a
    /// released region nor the remaining arena can hold it.
    pub fn alloc(&mut self, size: usize) -> Option<StackRegion> {
        let size = align_up(size.max(1), STACK_ALIGN);

        let reuse = self
            .released
            .iter()
            .position(|r| matches!(r, Some(region) if region.len >= size));
        if let Some(i) = reuse {
            return self.released[i].take();
        }

        let end = self.next.checked_add(size)?;
        if end > STACK_ARENA_SIZE {
            return None;
        }
        let region = StackRegion { offset: self.next, len: size };
        self.next = end;
        Some(region)
    }

    /// Return `region` for reuse by a later allocation.
    pub fn release(&mut self, region: StackRegion) {
        // The newest region borders the bump pointer: give it straight back
        if region.offset + region.len == self.next {
            self.next = region.offset;
            return;
        }
        match self.released.iter_mut().find(|r| r.is_none()) {
            Some(slot) => *slot = Some(region),
            None => log::warn!("stack region at {} could not be recorded for reuse", region.offset),
        }
    }

    /// Bytes never handed out yet.
    pub fn untouched(&self) -> usize {
        STACK_ARENA_SIZE - self.next
    }
}

impl Default for StackPool {
    fn default() -> Self {
        Self::new()
    }
}
