//! # Sleep Delta Queue
//!
//! Pending wake-ups, kept as a singly linked list sorted by wake time.
//! Each node stores only the ticks remaining *after* the node in front of
//! it expires, so the absolute remaining time of node *k* is the sum of the
//! deltas of nodes `0..=k`:
//!
//! ```text
//!   wake at:   3        3        7        12
//!   stored:  [ 3 ] ──► [ 0 ] ──► [ 4 ] ──► [ 5 ]
//! ```
//!
//! The tick interrupt only ever touches the head node, which makes the
//! per-tick cost O(1) regardless of how many tasks sleep.
//!
//! This queue is independent of the task's queue link: a task in a timed
//! semaphore wait sits here *and* on the semaphore's wait list at once.
//! Nodes come from a fixed pool of `N` entries, one per task slot.

use crate::task::TaskId;

/// Returned by [`SleepQueue::insert`] when the node pool is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Full;

#[derive(Debug, Clone, Copy)]
struct SleepNode {
    task: TaskId,
    delta: u32,
    next: Option<u8>,
    in_use: bool,
}

impl SleepNode {
    const FREE: SleepNode = SleepNode {
        task: TaskId::from_index(0),
        delta: 0,
        next: None,
        in_use: false,
    };
}

pub struct SleepQueue<const N: usize> {
    nodes: [SleepNode; N],
    head: Option<u8>,
}

impl<const N: usize> SleepQueue<N> {
    pub const fn new() -> Self {
        Self {
            nodes: [SleepNode::FREE; N],
            head: None,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.in_use).count()
    }

    /// Register `task` to wake after `ticks` ticks.
    ///
    /// Walks the list subtracting each earlier node's delta; the new node
    /// keeps the remainder and its successor gives up that much of its own
    /// delta. A task already waking at the same tick stays in front.
    pub fn insert(&mut self, task: TaskId, ticks: u32) -> Result<(), Full> {
        let slot = self.nodes.iter().position(|n| !n.in_use).ok_or(Full)?;

        let mut remaining = ticks;
        let mut prev: Option<u8> = None;
        let mut cursor = self.head;

        while let Some(i) = cursor {
            let node = &self.nodes[i as usize];
            if node.delta > remaining {
                break;
            }
            remaining -= node.delta;
            prev = cursor;
            cursor = node.next;
        }

        if let Some(i) = cursor {
            self.nodes[i as usize].delta -= remaining;
        }

        self.nodes[slot] = SleepNode {
            task,
            delta: remaining,
            next: cursor,
            in_use: true,
        };

        match prev {
            None => self.head = Some(slot as u8),
            Some(p) => self.nodes[p as usize].next = Some(slot as u8),
        }

        Ok(())
    }

    /// Count one tick off the head node.
    #[inline]
    pub fn tick(&mut self) {
        if let Some(h) = self.head {
            let node = &mut self.nodes[h as usize];
            node.delta = node.delta.saturating_sub(1);
        }
    }

    /// Detach the head node if its delta has reached zero.
    ///
    /// Call repeatedly after [`tick`](Self::tick) until it returns `None`:
    /// several tasks can expire on the same tick.
    pub fn pop_expired(&mut self) -> Option<TaskId> {
        let h = self.head?;
        let node = self.nodes[h as usize];
        if node.delta != 0 {
            return None;
        }
        self.head = node.next;
        self.nodes[h as usize] = SleepNode::FREE;
        Some(node.task)
    }

    /// Remove `task`'s node wherever it is. Its delta moves to the
    /// successor so the wake times behind it do not change.
    ///
    /// Returns false when the task was not queued, e.g. because its
    /// timeout already fired.
    pub fn cancel(&mut self, task: TaskId) -> bool {
        let mut prev: Option<u8> = None;
        let mut cursor = self.head;

        while let Some(i) = cursor {
            let node = self.nodes[i as usize];
            if node.task == task {
                match prev {
                    None => self.head = node.next,
                    Some(p) => self.nodes[p as usize].next = node.next,
                }
                if let Some(n) = node.next {
                    self.nodes[n as usize].delta += node.delta;
                }
                self.nodes[i as usize] = SleepNode::FREE;
                return true;
            }
            prev = cursor;
            cursor = node.next;
        }

        false
    }

    /// Absolute ticks left before `task` wakes, if it is queued.
    pub fn remaining(&self, task: TaskId) -> Option<u32> {
        self.iter().find(|&(t, _)| t == task).map(|(_, at)| at)
    }

    /// `(task, absolute ticks remaining)` pairs in wake order.
    pub fn iter(&self) -> impl Iterator<Item = (TaskId, u32)> + '_ {
        let mut cursor = self.head;
        let mut total = 0u32;
        core::iter::from_fn(move || {
            let node = &self.nodes[cursor? as usize];
            total += node.delta;
            cursor = node.next;
            Some((node.task, total))
        })
    }
}

impl<const N: usize> Default for SleepQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
