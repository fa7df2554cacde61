//! Recently seen packet history
//!
//! A fixed-capacity ring of `(time, checksum, tag)` records. Inserting always
//! overwrites the oldest slot, so a burst of traffic can push entries out
//! before their time window expires. Lookups are linear scans.
//!
//! Separate instances back the digipeater duplicate check, the RF to
//! Internet duplicate check and the Internet to RF duplicate and rate
//! checks. They are never shared.

use std::time::{Duration, Instant};

/// One remembered transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryEntry<T> {
    /// When it was remembered
    pub time: Instant,
    /// Duplicate checksum of the packet
    pub crc: u16,
    /// Caller defined label, e.g. the channel
    pub tag: T,
}

impl<T> HistoryEntry<T> {
    /// Entry is no older than `window` at `now`
    pub fn within(&self, window: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.time) <= window
    }
}

/// Fixed-capacity ring of recent packets
#[derive(Debug, Clone)]
pub struct History<T> {
    slots: Vec<Option<HistoryEntry<T>>>,
    next: usize,
}

impl<T> History<T> {
    /// Create an empty history. Capacity is at least one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, next: 0 }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// No entries yet
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Record a checksum, overwriting the oldest slot
    pub fn remember_at(&mut self, crc: u16, tag: T, now: Instant) {
        self.slots[self.next] = Some(HistoryEntry {
            time: now,
            crc,
            tag,
        });
        self.next = (self.next + 1) % self.slots.len();
    }

    /// Record a checksum now
    pub fn remember(&mut self, crc: u16, tag: T) {
        self.remember_at(crc, tag, Instant::now());
    }

    /// Whether `crc` was remembered within `window` with a tag accepted by
    /// `pred`
    pub fn seen_within_at(
        &self,
        crc: u16,
        window: Duration,
        now: Instant,
        pred: impl Fn(&T) -> bool,
    ) -> bool {
        self.iter()
            .any(|e| e.crc == crc && e.within(window, now) && pred(&e.tag))
    }

    /// Count entries within `window` accepted by `pred`
    pub fn count_within_at(
        &self,
        window: Duration,
        now: Instant,
        pred: impl Fn(&HistoryEntry<T>) -> bool,
    ) -> usize {
        self.iter()
            .filter(|e| e.within(window, now) && pred(e))
            .count()
    }

    /// Occupied entries in slot order
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry<T>> {
        self.slots.iter().flatten()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.next = 0;
    }
}
