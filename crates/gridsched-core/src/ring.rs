//! Fixed-capacity history ring buffer.
//!
//! Resource, user and job histories keep exactly `capacity` slots at all
//! times. Pushing a value overwrites the oldest slot and advances the head,
//! so the buffer never grows or shrinks after construction.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Circular buffer with a fixed number of slots.
///
/// `head` is the index of the oldest slot; the newest slot sits just
/// before it (modulo capacity).
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    head: usize,
}

impl<T: Clone + Default> RingBuffer<T> {
    /// Create a buffer with `capacity` default-valued slots.
    ///
    /// A zero capacity is bumped to one so the newest slot always exists.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![T::default(); capacity.max(1)],
            head: 0,
        }
    }

    /// Drop the oldest entry and append a fresh default entry.
    pub fn rotate(&mut self) {
        self.push(T::default());
    }

    /// Change the number of slots, keeping the newest entries. Growing pads
    /// the oldest end with defaults.
    pub fn resize(&mut self, capacity: usize) {
        let capacity = capacity.max(1);
        if capacity == self.slots.len() {
            return;
        }
        let kept: Vec<T> = self.recent(capacity).cloned().collect();
        let mut slots = vec![T::default(); capacity - kept.len()];
        slots.extend(kept);
        self.slots = slots;
        self.head = 0;
    }
}

impl<T> RingBuffer<T> {
    /// Number of slots. Constant for the lifetime of the buffer.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Drop the oldest entry and append `value` as the newest.
    pub fn push(&mut self, value: T) {
        self.slots[self.head] = value;
        self.head = (self.head + 1) % self.slots.len();
    }

    fn newest_index(&self) -> usize {
        (self.head + self.slots.len() - 1) % self.slots.len()
    }

    /// The most recently pushed entry.
    pub fn newest(&self) -> &T {
        &self.slots[self.newest_index()]
    }

    /// Overwrite the most recently pushed entry in place.
    pub fn set_newest(&mut self, value: T) {
        let idx = self.newest_index();
        self.slots[idx] = value;
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        let (tail, front) = self.slots.split_at(self.head);
        front.iter().chain(tail.iter())
    }

    /// Iterate over the newest `n` entries (oldest of them first).
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &T> {
        let skip = self.len().saturating_sub(n);
        self.iter().skip(skip)
    }

    /// Count entries matching a predicate.
    pub fn count_where(&self, pred: impl Fn(&T) -> bool) -> usize {
        self.slots.iter().filter(|v| pred(v)).count()
    }
}

// Equality is by logical order, not by physical slot layout.
impl<T: PartialEq> PartialEq for RingBuffer<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl<T: Serialize> Serialize for RingBuffer<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for RingBuffer<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let slots = Vec::<T>::deserialize(deserializer)?;
        if slots.is_empty() {
            return Err(serde::de::Error::custom("history buffer must not be empty"));
        }
        Ok(Self { slots, head: 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_full_of_defaults() {
        let ring: RingBuffer<u8> = RingBuffer::new(5);
        assert_eq!(ring.len(), 5);
        assert!(ring.iter().all(|v| *v == 0));
    }

    #[test]
    fn push_keeps_length_and_drops_oldest() {
        let mut ring = RingBuffer::new(3);
        for v in 1..=5u32 {
            ring.push(v);
            assert_eq!(ring.len(), 3);
        }
        let items: Vec<u32> = ring.iter().copied().collect();
        assert_eq!(items, vec![3, 4, 5]);
        assert_eq!(*ring.newest(), 5);
    }

    #[test]
    fn set_newest_overwrites_tail() {
        let mut ring: RingBuffer<f64> = RingBuffer::new(4);
        ring.rotate();
        ring.set_newest(2.5);
        assert_eq!(*ring.newest(), 2.5);
        assert_eq!(ring.count_where(|v| *v > 0.0), 1);
    }

    #[test]
    fn recent_yields_tail_window() {
        let mut ring = RingBuffer::new(10);
        for v in 0..10u8 {
            ring.push(v);
        }
        let last: Vec<u8> = ring.recent(3).copied().collect();
        assert_eq!(last, vec![7, 8, 9]);
    }

    #[test]
    fn serializes_oldest_first() {
        let mut ring = RingBuffer::new(3);
        ring.push(1u8);
        ring.push(2u8);
        ring.push(3u8);
        ring.push(4u8);
        let json = serde_json::to_string(&ring).unwrap();
        assert_eq!(json, "[2,3,4]");

        let back: RingBuffer<u8> = serde_json::from_str(&json).unwrap();
        assert_eq!(*back.newest(), 4);
        assert_eq!(back.len(), 3);
    }

    #[test]
    fn resize_keeps_newest_entries() {
        let mut short: RingBuffer<u8> = serde_json::from_str("[7,8]").unwrap();
        short.resize(4);
        let items: Vec<u8> = short.iter().copied().collect();
        assert_eq!(items, vec![0, 0, 7, 8]);
        assert_eq!(*short.newest(), 8);

        let mut long = RingBuffer::new(5);
        for v in 1..=7u8 {
            long.push(v);
        }
        long.resize(3);
        let items: Vec<u8> = long.iter().copied().collect();
        assert_eq!(items, vec![5, 6, 7]);
        long.push(9);
        assert_eq!(long.len(), 3);
        assert_eq!(*long.newest(), 9);
    }

    #[test]
    fn zero_capacity_is_bumped() {
        let ring: RingBuffer<u8> = RingBuffer::new(0);
        assert_eq!(ring.len(), 1);
    }
}
