//! Bounded FIFO history feeding the charts, plus the raw message log.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use crate::models::DeviceState;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Immutable chart snapshot taken on every accepted state update.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub fill_level: f64,
    pub weight_grams: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl From<&DeviceState> for HistoryEntry {
    fn from(state: &DeviceState) -> Self {
        Self {
            fill_level: state.fill_level,
            weight_grams: state.weight_grams,
            timestamp: state.timestamp,
        }
    }
}

/// Append-only, capacity-bounded ring. On overflow the oldest entry is
/// evicted; insertion order is chronological order, nothing is re-sorted.
#[derive(Debug)]
pub struct HistoryRing<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> HistoryRing<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, entry: T) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn oldest(&self) -> Option<&T> {
        self.entries.front()
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}

impl<T: Clone> HistoryRing<T> {
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}
