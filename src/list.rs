//! # Intrusive Queue Links
//!
//! Circular doubly-linked queues built over a fixed table of links. Every
//! entry of the table is a node that can act either as a queue head (a ready
//! queue, a semaphore wait list) or as a member (a task). Nodes are named by
//! their index in the table, so a task's single link is simply the entry at
//! the task's own index.
//!
//! A detached node points at itself in both directions. Because of that,
//! [`LinkTable::unlink`] works without knowing which queue holds the node,
//! and calling it twice is harmless.
//!
//! ```text
//!   head ──► a ──► b ──► c ──┐
//!    ▲                       │
//!    └───────────────────────┘     (prev links run the other way)
//! ```
//!
//! All operations are O(1) except iteration. Callers must hold the kernel
//! critical section: the tick interrupt mutates the same queues.

/// Index of a node in a [`LinkTable`].
pub type NodeId = usize;

/// Returned by [`LinkTable::pop_front`] when the queue has no members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Empty;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Link {
    next: u16,
    prev: u16,
}

/// Fixed table of `N` circular links.
pub struct LinkTable<const N: usize> {
    links: [Link; N],
}

impl<const N: usize> LinkTable<N> {
    /// Create a table with every node detached.
    pub const fn new() -> Self {
        let mut links = [Link { next: 0, prev: 0 }; N];
        let mut i = 0;
        while i < N {
            links[i] = Link { next: i as u16, prev: i as u16 };
            i += 1;
        }
        Self { links }
    }

    /// True when `head` has no members (or `node` is not on any queue).
    #[inline]
    pub fn is_empty(&self, head: NodeId) -> bool {
        self.links[head].next as usize == head
    }

    /// True when `node` currently sits on some queue.
    #[inline]
    pub fn is_linked(&self, node: NodeId) -> bool {
        !self.is_empty(node)
    }

    /// Append `node` at the tail of the queue headed by `head`.
    ///
    /// A node may be on one queue at a time; it must be detached first.
    pub fn push_back(&mut self, head: NodeId, node: NodeId) {
        debug_assert_ne!(head, node);
        debug_assert!(!self.is_linked(node), "node {} is already queued", node);

        let tail = self.links[head].prev;
        self.links[node] = Link { next: head as u16, prev: tail };
        self.links[tail as usize].next = node as u16;
        self.links[head].prev = node as u16;
    }

    /// Detach and return the member at the front of `head`'s queue.
    pub fn pop_front(&mut self, head: NodeId) -> Result<NodeId, Empty> {
        if self.is_empty(head) {
            return Err(Empty);
        }
        let front = self.links[head].next as usize;
        self.unlink(front);
        Ok(front)
    }

    /// Remove `node` from whatever queue holds it. The node is left
    /// self-referential, so a second call is a no-op.
    pub fn unlink(&mut self, node: NodeId) {
        let Link { next, prev } = self.links[node];
        self.links[prev as usize].next = next;
        self.links[next as usize].prev = prev;
        self.links[node] = Link { next: node as u16, prev: node as u16 };
    }

    /// Member at the front of `head`'s queue, without removing it.
    pub fn front(&self, head: NodeId) -> Option<NodeId> {
        if self.is_empty(head) {
            None
        } else {
            Some(self.links[head].next as usize)
        }
    }

    /// Members of `head`'s queue, front to back.
    pub fn iter(&self, head: NodeId) -> Iter<'_, N> {
        Iter {
            table: self,
            head,
            cursor: self.links[head].next as usize,
        }
    }
}

impl<const N: usize> Default for LinkTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, const N: usize> {
    table: &'a LinkTable<N>,
    head: NodeId,
    cursor: NodeId,
}

impl<const N: usize> Iterator for Iter<'_, N> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.cursor == self.head {
            return None;
        }
        let node = self.cursor;
        self.cursor = self.table.links[node].next as usize;
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEAD: NodeId = 0;
    const OTHER_HEAD: NodeId = 1;

    fn members(table: &LinkTable<8>, head: NodeId) -> std::vec::Vec<NodeId> {
        table.iter(head).collect()
    }

    #[test]
    fn test_new_table_is_detached() {
        let table = LinkTable::<8>::new();
        for node in 0..8 {
            assert!(table.is_empty(node));
            assert!(!table.is_linked(node));
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut table = LinkTable::<8>::new();
        table.push_back(HEAD, 4);
        table.push_back(HEAD, 2);
        table.push_back(HEAD, 6);

        assert_eq!(members(&table, HEAD), [4, 2, 6]);
        assert_eq!(table.front(HEAD), Some(4));
        assert_eq!(table.pop_front(HEAD), Ok(4));
        assert_eq!(table.pop_front(HEAD), Ok(2));
        assert_eq!(table.pop_front(HEAD), Ok(6));
        assert_eq!(table.pop_front(HEAD), Err(Empty));
        assert!(table.is_empty(HEAD));
    }

    #[test]
    fn test_popped_node_is_self_referential() {
        let mut table = LinkTable::<8>::new();
        table.push_back(HEAD, 3);
        table.pop_front(HEAD).unwrap();
        assert!(!table.is_linked(3));

        // Safe to remove again, and safe to requeue elsewhere
        table.unlink(3);
        table.push_back(OTHER_HEAD, 3);
        assert_eq!(members(&table, OTHER_HEAD), [3]);
        assert!(table.is_empty(HEAD));
    }

    #[test]
    fn test_unlink_from_middle() {
        let mut table = LinkTable::<8>::new();
        for node in [2, 3, 4, 5] {
            table.push_back(HEAD, node);
        }

        table.unlink(4);
        assert_eq!(members(&table, HEAD), [2, 3, 5]);

        table.unlink(2);
        table.unlink(5);
        assert_eq!(members(&table, HEAD), [3]);

        // Removing an already-detached node changes nothing
        table.unlink(5);
        assert_eq!(members(&table, HEAD), [3]);
    }

    #[test]
    fn test_independent_queues() {
        let mut table = LinkTable::<8>::new();
        table.push_back(HEAD, 2);
        table.push_back(OTHER_HEAD, 3);
        table.push_back(HEAD, 4);

        assert_eq!(members(&table, HEAD), [2, 4]);
        assert_eq!(members(&table, OTHER_HEAD), [3]);
    }
}
