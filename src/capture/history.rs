//! Bounded FIFO history of recent samples with structurally shared snapshots.
//!
//! Samples are kept in sealed, immutable chunks of [`CHUNK_LEN`] plus a short
//! mutable tail. A [`HistorySnapshot`] clones the chunk handles and the tail,
//! so taking one never copies the whole window.
//!
//! [`SharedHistory`] publishes a fresh snapshot after every append. Readers
//! only clone the published `Arc`; the writer only swaps it. Neither side
//! holds a lock for longer than a pointer update.

#![allow(missing_docs)]

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::capture::record::Sample;

/// Samples per sealed chunk.
pub const CHUNK_LEN: usize = 64;

/// Fixed-capacity ring of the most recent samples, oldest first.
#[derive(Debug, Clone)]
pub struct BoundedHistory {
    sealed: VecDeque<Arc<[Sample]>>,
    tail: Vec<Sample>,
    /// Evicted samples still sitting at the front of `sealed[0]`.
    head_skip: usize,
    len: usize,
    capacity: usize,
}

impl BoundedHistory {
    /// Create an empty history. A zero capacity is raised to 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            sealed: VecDeque::new(),
            tail: Vec::with_capacity(CHUNK_LEN),
            head_skip: 0,
            len: 0,
            capacity: capacity.max(1),
        }
    }

    /// Append a sample, evicting the oldest when full.
    pub fn append(&mut self, sample: Sample) {
        if self.len == self.capacity {
            self.evict_oldest();
        }
        self.tail.push(sample);
        self.len += 1;
        if self.tail.len() == CHUNK_LEN {
            let full = std::mem::replace(&mut self.tail, Vec::with_capacity(CHUNK_LEN));
            self.sealed.push_back(Arc::from(full));
        }
    }

    fn evict_oldest(&mut self) {
        if let Some(front_len) = self.sealed.front().map(|chunk| chunk.len()) {
            self.head_skip += 1;
            if self.head_skip == front_len {
                self.sealed.pop_front();
                self.head_skip = 0;
            }
        } else if !self.tail.is_empty() {
            self.tail.remove(0);
        }
        self.len -= 1;
    }

    /// Point-in-time view sharing the sealed chunks.
    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            sealed: self.sealed.iter().cloned().collect(),
            tail: self.tail.clone(),
            head_skip: self.head_skip,
            len: self.len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&Sample> {
        if self.len == 0 {
            return None;
        }
        self.tail
            .last()
            .or_else(|| self.sealed.back().and_then(|chunk| chunk.last()))
    }
}

/// Immutable point-in-time copy of a [`BoundedHistory`].
#[derive(Debug, Clone, Default)]
pub struct HistorySnapshot {
    sealed: Vec<Arc<[Sample]>>,
    tail: Vec<Sample>,
    head_skip: usize,
    len: usize,
}

impl HistorySnapshot {
    /// Samples oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.sealed
            .iter()
            .flat_map(|chunk| chunk.iter())
            .skip(self.head_skip)
            .chain(self.tail.iter())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn timestamps(&self) -> Vec<u64> {
        self.iter().map(|s| s.timestamp).collect()
    }

    /// Series for one channel index, oldest first. Empty if out of range.
    pub fn channel(&self, index: usize) -> Vec<f64> {
        self.iter()
            .filter_map(|s| s.values.get(index).copied())
            .collect()
    }
}

impl PartialEq for HistorySnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}

/// Cheaply cloneable handle shared by the ingest and render threads.
///
/// Only the ingest thread appends. The `history` lock is never taken by a
/// reader, so appends cannot wait on rendering.
#[derive(Debug, Clone)]
pub struct SharedHistory {
    history: Arc<Mutex<BoundedHistory>>,
    published: Arc<Mutex<Arc<HistorySnapshot>>>,
    capacity: usize,
}

impl SharedHistory {
    pub fn new(capacity: usize) -> Self {
        Self::from(BoundedHistory::new(capacity))
    }

    pub fn append(&self, sample: Sample) {
        let fresh = {
            let mut history = self.history.lock();
            history.append(sample);
            Arc::new(history.snapshot())
        };
        let previous = std::mem::replace(&mut *self.published.lock(), fresh);
        drop(previous);
    }

    /// Latest published snapshot. Holding it never delays the writer.
    pub fn snapshot(&self) -> Arc<HistorySnapshot> {
        Arc::clone(&self.published.lock())
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl From<BoundedHistory> for SharedHistory {
    fn from(history: BoundedHistory) -> Self {
        let capacity = history.capacity();
        let published = Arc::new(history.snapshot());
        Self {
            history: Arc::new(Mutex::new(history)),
            published: Arc::new(Mutex::new(published)),
            capacity,
        }
    }
}
