use std::collections::BTreeMap;

use crate::error::{MixerError, Result};
use crate::types::{Direction, GraphKey};

/// Resumption point inside one partition's pages for one key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PageCursor {
    /// Partition (import group) index in preference order.
    pub partition: u32,
    /// Page currently loaded.
    pub page: u32,
    /// Next item to read within `page`.
    pub item: u32,
}

impl PageCursor {
    /// Cursor at the first item of the first page.
    pub fn start(partition: usize) -> Self {
        Self {
            partition: partition as u32,
            page: 0,
            item: 0,
        }
    }

    /// Partition index as a slice index.
    pub fn partition_index(&self) -> usize {
        self.partition as usize
    }

    /// Moves to the next item; returns true when `page_len` was reached and the
    /// cursor moved to the start of the next page.
    pub fn advance(&mut self, page_len: usize) -> bool {
        self.item += 1;
        if self.item as usize >= page_len {
            self.page += 1;
            self.item = 0;
            true
        } else {
            false
        }
    }
}

/// Per-partition cursors for one [`GraphKey`].
///
/// A `None` slot means the partition has no (more) data for the key. A group
/// without any live slot is exhausted: everything for the key has been
/// returned, possibly by an earlier page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CursorGroup {
    /// Key the cursors belong to.
    pub key: GraphKey,
    /// One slot per partition, indexed by partition.
    pub cursors: Vec<Option<PageCursor>>,
}

impl CursorGroup {
    /// Group starting at page 0 of every partition.
    pub fn fresh(key: GraphKey, partitions: usize) -> Self {
        Self {
            key,
            cursors: (0..partitions).map(|p| Some(PageCursor::start(p))).collect(),
        }
    }

    /// Group for a key that has nothing left to read.
    pub fn exhausted(key: GraphKey) -> Self {
        Self {
            key,
            cursors: Vec::new(),
        }
    }

    /// True when no partition has data left for the key.
    pub fn is_exhausted(&self) -> bool {
        self.cursors.iter().all(Option::is_none)
    }

    /// Drops every cursor.
    pub fn mark_exhausted(&mut self) {
        self.cursors.clear();
    }

    /// Cursor of `partition`, if still live.
    pub fn cursor(&self, partition: usize) -> Option<&PageCursor> {
        self.cursors.get(partition).and_then(Option::as_ref)
    }

    /// Mutable cursor of `partition`, if still live.
    pub fn cursor_mut(&mut self, partition: usize) -> Option<&mut PageCursor> {
        self.cursors.get_mut(partition).and_then(Option::as_mut)
    }

    /// Marks `partition` as having no more data for the key.
    pub fn clear(&mut self, partition: usize) {
        if let Some(slot) = self.cursors.get_mut(partition) {
            *slot = None;
        }
    }

    /// Live cursors in partition order.
    pub fn live(&self) -> impl Iterator<Item = PageCursor> + '_ {
        self.cursors.iter().filter_map(|c| *c)
    }
}

/// Full continuation state carried by a pagination token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaginationInfo {
    /// Direction the cursors were produced for.
    pub direction: Direction,
    /// Groups sorted by key.
    pub cursor_groups: Vec<CursorGroup>,
}

impl PaginationInfo {
    /// Builds the info, sorting groups by key so encoding is reproducible.
    pub fn new(direction: Direction, mut cursor_groups: Vec<CursorGroup>) -> Self {
        cursor_groups.sort_by(|a, b| a.key.cmp(&b.key));
        Self {
            direction,
            cursor_groups,
        }
    }

    /// Builds the info from groups already indexed by key.
    pub fn from_map(direction: Direction, groups: &BTreeMap<GraphKey, CursorGroup>) -> Self {
        Self {
            direction,
            cursor_groups: groups.values().cloned().collect(),
        }
    }

    /// Indexes the groups by key, rejecting duplicate keys.
    pub fn into_map(self) -> Result<BTreeMap<GraphKey, CursorGroup>> {
        let mut groups = BTreeMap::new();
        for group in self.cursor_groups {
            let key = group.key.clone();
            if groups.insert(key.clone(), group).is_some() {
                return Err(MixerError::InvalidToken(format!(
                    "duplicate cursor group for {key}"
                )));
            }
        }
        Ok(groups)
    }
}
