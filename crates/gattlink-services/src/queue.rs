//! Pending-transfer queue — strict FIFO backlog in front of the driver.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct PendingQueue<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> PendingQueue<T> {
    /// A backlog with no size limit.
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    /// A backlog that reports full once `capacity` entries are parked.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Choose what to drive for a fresh request.
    ///
    /// With an empty backlog the incoming entry goes straight through.
    /// Otherwise it joins the tail and the head is returned, so nothing
    /// overtakes a payload that was queued earlier.
    pub fn admit(&mut self, incoming: T) -> T {
        match self.entries.pop_front() {
            Some(head) => {
                self.entries.push_back(incoming);
                head
            }
            None => incoming,
        }
    }

    /// Park an entry that arrived while a transfer was in flight.
    ///
    /// Callers check [`is_full`](Self::is_full) first; the limit is not
    /// enforced here.
    pub fn push(&mut self, entry: T) {
        self.entries.push_back(entry);
    }

    pub fn pop(&mut self) -> Option<T> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove everything, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.entries.drain(..)
    }
}

impl<T> Default for PendingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
