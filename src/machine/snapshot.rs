//! Bounded FIFO of reverse-playback snapshots

use crate::audio::AudioBuffer;
use crate::hardware::NativeSample;
use crate::timeline::NodeId;
use std::collections::VecDeque;

/// One core snapshot and the audio produced since it was taken
#[derive(Debug)]
pub(crate) struct Snapshot {
    pub(crate) id: u64,
    /// History node to make current when reverting
    pub(crate) node: NodeId,
    pub(crate) audio: AudioBuffer,
}

#[derive(Debug)]
pub(crate) struct SnapshotList {
    items: VecDeque<Snapshot>,
    next_id: u64,
    limit: usize,
}

impl SnapshotList {
    pub(crate) fn new(limit: usize) -> Self {
        SnapshotList {
            items: VecDeque::new(),
            next_id: 0,
            limit,
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.limit > 0
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Reserve the id for the next snapshot
    pub(crate) fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Append a snapshot and return the ids pruned to respect the limit,
    /// oldest first
    pub(crate) fn push(&mut self, id: u64, node: NodeId) -> Vec<u64> {
        self.items.push_back(Snapshot {
            id,
            node,
            audio: AudioBuffer::unbounded(),
        });
        let mut pruned = Vec::new();
        while self.items.len() > self.limit {
            match self.items.pop_front() {
                Some(old) => pruned.push(old.id),
                None => break,
            }
        }
        pruned
    }

    /// Capture samples into the most recent snapshot
    pub(crate) fn record(&mut self, samples: &[NativeSample]) {
        if let Some(latest) = self.items.back_mut() {
            latest.audio.write_all(samples);
        }
    }

    pub(crate) fn latest(&self) -> Option<&Snapshot> {
        self.items.back()
    }

    pub(crate) fn latest_mut(&mut self) -> Option<&mut Snapshot> {
        self.items.back_mut()
    }

    pub(crate) fn pop_latest(&mut self) -> Option<Snapshot> {
        self.items.pop_back()
    }

    /// Drop every snapshot, returning their ids
    pub(crate) fn clear(&mut self) -> Vec<u64> {
        self.items.drain(..).map(|s| s.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_prunes_oldest_first() {
        let mut list = SnapshotList::new(2);
        for n in 0..3 {
            let id = list.allocate_id();
            let pruned = list.push(id, NodeId(n));
            if n < 2 {
                assert!(pruned.is_empty());
            } else {
                assert_eq!(pruned, vec![0]);
            }
        }
        assert_eq!(list.len(), 2);
        assert_eq!(list.latest().map(|s| s.id), Some(2));
    }

    #[test]
    fn test_record_goes_to_latest() {
        let mut list = SnapshotList::new(4);
        list.record(&[1, 2]);
        let a = list.allocate_id();
        list.push(a, NodeId::ROOT);
        list.record(&[1, 2, 3]);
        let b = list.allocate_id();
        list.push(b, NodeId::ROOT);
        list.record(&[4]);
        assert_eq!(list.latest().map(|s| s.audio.len()), Some(1));
        let older = list.pop_latest();
        assert!(older.is_some());
        assert_eq!(list.latest().map(|s| s.audio.len()), Some(3));
        assert_eq!(list.clear(), vec![a]);
        assert!(list.is_empty());
    }
}
