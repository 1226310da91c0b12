//! Fixed-capacity FIFO buffer with oldest-first eviction.

#![forbid(unsafe_code)]

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("bounded buffer capacity must be greater than zero")]
    ZeroCapacity,
}

/// Append-only history capped at `cap` entries; newest last.
#[derive(Debug, Clone)]
pub struct BoundedBuffer<T> {
    items: VecDeque<T>,
    cap: usize,
    evicted: u64,
}

impl<T> BoundedBuffer<T> {
    pub fn new(cap: usize) -> Result<Self, BufferError> {
        if cap == 0 {
            return Err(BufferError::ZeroCapacity);
        }
        Ok(Self { items: VecDeque::with_capacity(cap.min(1024)), cap, evicted: 0 })
    }

    /// Append `item`, then drop from the front until `len() <= capacity()`.
    /// Returns how many entries were evicted by this push.
    pub fn push(&mut self, item: T) -> usize {
        self.items.push_back(item);
        let mut dropped = 0usize;
        while self.items.len() > self.cap {
            self.items.pop_front();
            dropped += 1;
        }
        self.evicted += dropped as u64;
        dropped
    }

    pub fn capacity(&self) -> usize { self.cap }
    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    /// Total entries evicted since construction.
    pub fn evicted(&self) -> u64 { self.evicted }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ { self.items.iter() }
}

impl<T: Clone> BoundedBuffer<T> {
    pub fn to_vec(&self) -> Vec<T> { self.items.iter().cloned().collect() }
}
