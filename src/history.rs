//! In-memory record of past detections.
//!
//! Only image uploads and camera stills are recorded; `HistoryKind` has no
//! video variant. The store is a bounded ring buffer: at capacity the oldest
//! entry is evicted to make room.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::frame::{DetectionRecord, Frame, FrameResult};

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum HistoryKind {
    Image,
    Camera,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::Image => "Image",
            HistoryKind::Camera => "Camera",
        }
    }
}

/// One recorded detection: frames and records are deep copies owned by the store.
#[derive(Clone, Debug)]
pub struct HistoryEntry {
    sequence: u64,
    kind: HistoryKind,
    captured_at_s: u64,
    raw_frame: Frame,
    annotated_frame: Frame,
    detections: Vec<DetectionRecord>,
}

impl HistoryEntry {
    /// Snapshot a frame result. The sequence number is assigned on append.
    pub fn capture(kind: HistoryKind, result: &FrameResult) -> Self {
        let captured_at_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            sequence: 0,
            kind,
            captured_at_s,
            raw_frame: result.raw_frame().clone(),
            annotated_frame: result.annotated_frame().clone(),
            detections: result.detections().to_vec(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn kind(&self) -> HistoryKind {
        self.kind
    }

    /// Unix seconds at capture.
    pub fn captured_at_s(&self) -> u64 {
        self.captured_at_s
    }

    pub fn raw_frame(&self) -> &Frame {
        &self.raw_frame
    }

    pub fn annotated_frame(&self) -> &Frame {
        &self.annotated_frame
    }

    pub fn detections(&self) -> &[DetectionRecord] {
        &self.detections
    }
}

#[derive(Debug)]
pub struct HistoryStore {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
    next_sequence: u64,
    evicted: u64,
    eviction_warned: bool,
}

impl HistoryStore {
    /// A store holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
            capacity,
            next_sequence: 1,
            evicted: 0,
            eviction_warned: false,
        }
    }

    /// Append an entry and return its sequence number.
    pub fn append(&mut self, mut entry: HistoryEntry) -> u64 {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
            if !self.eviction_warned {
                log::warn!(
                    "history full ({} entries); evicting oldest entries",
                    self.capacity
                );
                self.eviction_warned = true;
            }
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        entry.sequence = sequence;
        self.entries.push_back(entry);
        sequence
    }

    /// Entries newest first. Does not modify the store.
    pub fn list_recent(&self) -> Vec<&HistoryEntry> {
        self.entries.iter().rev().collect()
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    /// Drop every entry. Sequence numbers keep increasing.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.eviction_warned = false;
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

    /// Entries dropped to respect the capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{BoundingBox, SourceKind};

    fn result(label: &str) -> FrameResult {
        let frame = Frame::from_rgb(2, 2, vec![0u8; 12]).unwrap();
        let record = DetectionRecord::new(
            SourceKind::Image,
            0,
            label,
            0.9,
            BoundingBox::new(0.0, 0.0, 1.0, 1.0),
        );
        FrameResult::new(SourceKind::Image, frame.clone(), frame, vec![record])
    }

    #[test]
    fn list_recent_is_newest_first_and_idempotent() {
        let mut store = HistoryStore::default();
        store.append(HistoryEntry::capture(HistoryKind::Image, &result("a")));
        store.append(HistoryEntry::capture(HistoryKind::Camera, &result("b")));

        let first: Vec<u64> = store.list_recent().iter().map(|e| e.sequence()).collect();
        let second: Vec<u64> = store.list_recent().iter().map(|e| e.sequence()).collect();
        assert_eq!(first, vec![2, 1]);
        assert_eq!(first, second);
        assert_eq!(store.list_recent()[0].kind(), HistoryKind::Camera);
        assert_eq!(store.latest().map(|e| e.detections()[0].label()), Some("b"));
    }

    #[test]
    fn full_store_evicts_oldest() {
        let mut store = HistoryStore::new(2);
        for label in ["a", "b", "c"] {
            store.append(HistoryEntry::capture(HistoryKind::Image, &result(label)));
        }
        assert_eq!(store.len(), 2);
        assert_eq!(store.evicted(), 1);
        let labels: Vec<&str> = store
            .list_recent()
            .iter()
            .map(|e| e.detections()[0].label())
            .collect();
        assert_eq!(labels, vec!["c", "b"]);
    }

    #[test]
    fn clear_empties_store() {
        let mut store = HistoryStore::new(4);
        store.append(HistoryEntry::capture(HistoryKind::Image, &result("a")));
        store.clear();
        assert!(store.is_empty());
        assert!(store.list_recent().is_empty());
        assert_eq!(store.append(HistoryEntry::capture(HistoryKind::Image, &result("b"))), 2);
    }
}
