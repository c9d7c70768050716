//! Bounded trend history for charts: a FIFO window of condensed snapshots.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::types::HistoryEntry;

/// Matches a ~24 s trend window at the default 2 s cadence.
pub const DEFAULT_CAPACITY: usize = 12;

pub fn push_capped<T>(dq: &mut VecDeque<T>, v: T, cap: usize) {
    if dq.len() == cap {
        dq.pop_front();
    }
    dq.push_back(v);
}

#[derive(Debug)]
pub struct HistoryBuffer {
    entries: Mutex<VecDeque<HistoryEntry>>,
    cap: usize,
}

impl HistoryBuffer {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(cap)),
            cap,
        }
    }

    /// Append, evicting the oldest entry when full.
    pub fn append(&self, entry: HistoryEntry) {
        let mut dq = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        push_capped(&mut dq, entry, self.cap);
    }

    /// Copy of the window, oldest first.
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        let dq = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        dq.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
