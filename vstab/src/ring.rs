//! # Sequence-indexed ring buffer

use crate::prelude::v1::*;

/// Fixed capacity FIFO addressed by sequence number.
///
/// Elements live in a preallocated slot arena at `seq % capacity`, so pushing and popping never
/// allocate. Sequence numbers must be contiguous: every push has to carry the number right after
/// the current back element.
pub struct SeqRing<T> {
    slots: Vec<Option<T>>,
    start: u64,
    len: usize,
}

impl<T> SeqRing<T> {
    /// Create a ring holding at most `capacity` elements.
    ///
    /// # Panics
    ///
    /// If `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
            start: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    fn slot(&self, seq: u64) -> usize {
        (seq % self.capacity() as u64) as usize
    }

    /// Sequence number of the oldest element.
    pub fn front_seq(&self) -> Option<u64> {
        if self.is_empty() {
            None
        } else {
            Some(self.start)
        }
    }

    /// Sequence number of the newest element.
    pub fn back_seq(&self) -> Option<u64> {
        if self.is_empty() {
            None
        } else {
            Some(self.start + self.len as u64 - 1)
        }
    }

    /// Get the element with the given sequence number.
    pub fn get(&self, seq: u64) -> Option<&T> {
        if seq < self.start || seq >= self.start + self.len as u64 {
            return None;
        }
        self.slots[self.slot(seq)].as_ref()
    }

    /// Get the newest element.
    pub fn back(&self) -> Option<&T> {
        self.back_seq().and_then(|seq| self.get(seq))
    }

    /// Append an element.
    ///
    /// Fails if the ring is full or `seq` does not follow the current back element.
    pub fn push_back(&mut self, seq: u64, item: T) -> Result<()> {
        if self.is_full() {
            return Err(Error::invariant(format!(
                "buffer window already holds {} frames",
                self.len
            )));
        }

        if self.is_empty() {
            self.start = seq;
        } else if seq != self.start + self.len as u64 {
            return Err(Error::invariant(format!(
                "expected sequence {}, got {}",
                self.start + self.len as u64,
                seq
            )));
        }

        let slot = self.slot(seq);
        self.slots[slot] = Some(item);
        self.len += 1;

        Ok(())
    }

    /// Remove the oldest element.
    pub fn pop_front(&mut self) -> Option<(u64, T)> {
        if self.is_empty() {
            return None;
        }

        let seq = self.start;
        let slot = self.slot(seq);
        let item = self.slots[slot].take()?;
        self.start += 1;
        self.len -= 1;

        Some((seq, item))
    }

    /// Iterate elements from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &T)> + '_ {
        (self.start..self.start + self.len as u64)
            .filter_map(move |seq| self.get(seq).map(|item| (seq, item)))
    }

    /// Drop all elements.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.start = 0;
        self.len = 0;
    }
}
