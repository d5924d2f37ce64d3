use std::collections::VecDeque;

use serde::Serialize;

/// Fixed-capacity buffer that overwrites its oldest entry once full.
///
/// Long runs at high throughput would otherwise hold every response in memory;
/// a `SliceBuffer` keeps only the most recent `capacity` items, in insertion
/// order.
#[derive(Debug, Clone, Serialize)]
pub struct SliceBuffer<T> {
    capacity: usize,
    data: VecDeque<T>,
}

impl<T> SliceBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            // don't preallocate huge buffers that may never fill up
            data: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Appends `item`, evicting the oldest entry when the buffer is full.
    pub fn append(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        if self.data.len() == self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(item);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        self.data.get(idx)
    }
}

impl<T: Clone> SliceBuffer<T> {
    /// Copies the retained items out, oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.data.iter().cloned().collect()
    }
}
