use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::types::EntityInfo;

/// Head entry of one partition, ordered so `BinaryHeap` pops the smallest
/// sort key first and, on ties, the lowest (preferred) partition.
#[derive(Debug)]
struct HeapEntry {
    sort_key: String,
    partition: usize,
    entry: EntityInfo,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .sort_key
            .cmp(&self.sort_key)
            .then_with(|| other.partition.cmp(&self.partition))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

/// Min-heap over the current head of every partition for one key.
#[derive(Debug, Default)]
pub(crate) struct MergeHeap {
    heap: BinaryHeap<HeapEntry>,
}

impl MergeHeap {
    pub(crate) fn push(&mut self, partition: usize, entry: EntityInfo) {
        self.heap.push(HeapEntry {
            sort_key: entry.sort_key(),
            partition,
            entry,
        });
    }

    pub(crate) fn pop(&mut self) -> Option<(usize, EntityInfo)> {
        self.heap.pop().map(|head| (head.partition, head.entry))
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}
