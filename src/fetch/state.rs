//! Per-request fetch state shared by both merge strategies.

use std::collections::BTreeMap;

use tracing::debug;

use super::context::RequestContext;
use crate::error::{MixerError, Result};
use crate::pagination::{CursorGroup, PaginationInfo};
use crate::partition::{Page, PageRequest, PartitionReader};
use crate::types::{Direction, EntityInfo, GraphKey};

/// Everything tracked for one key during a fetch.
#[derive(Debug)]
pub(crate) struct KeyState {
    pub(crate) group: CursorGroup,
    /// Loaded page per partition; `None` once nothing is buffered.
    pub(crate) pages: Vec<Option<Page>>,
    pub(crate) merged: Vec<EntityInfo>,
    pub(crate) active: bool,
}

/// Outcome of moving a partition cursor past the current item.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Advance {
    /// Next item is on the loaded page.
    SamePage,
    /// Cursor moved to a page that still has to be read.
    NextPage,
    /// The partition has no more pages for the key.
    Exhausted,
}

pub(crate) struct FetchState<'a> {
    reader: &'a dyn PartitionReader,
    ctx: &'a RequestContext,
    direction: Direction,
    pub(crate) limit: usize,
    pub(crate) keys: BTreeMap<GraphKey, KeyState>,
}

impl<'a> FetchState<'a> {
    /// Loads the page under every live cursor in one batch. Partitions with no
    /// data for their key lose their cursor.
    ///
    /// A cursor resumed past page 0 must land on a stored page; anything else
    /// was not issued by this server.
    pub(crate) async fn init(
        reader: &'a dyn PartitionReader,
        ctx: &'a RequestContext,
        direction: Direction,
        limit: usize,
        groups: BTreeMap<GraphKey, CursorGroup>,
    ) -> Result<FetchState<'a>> {
        let partitions = reader.partition_count();
        let mut reads = Vec::new();
        let mut resumed = Vec::new();
        let mut keys = BTreeMap::new();
        for (key, group) in groups {
            for cursor in group.live() {
                reads.push((key.clone(), cursor.partition_index()));
                if cursor.page > 0 {
                    resumed.push((key.clone(), cursor));
                }
            }
            keys.insert(
                key,
                KeyState {
                    group,
                    pages: vec![None; partitions],
                    merged: Vec::new(),
                    active: false,
                },
            );
        }
        let mut state = Self {
            reader,
            ctx,
            direction,
            limit,
            keys,
        };
        state.read(reads).await?;
        for (key, cursor) in resumed {
            let loaded = state
                .key(&key)?
                .pages
                .get(cursor.partition_index())
                .is_some_and(Option::is_some);
            if !loaded {
                return Err(MixerError::InvalidToken(format!(
                    "cursor page {} of partition {} holds no data for {key}",
                    cursor.page, cursor.partition
                )));
            }
        }
        for key_state in state.keys.values_mut() {
            key_state.active = !key_state.group.is_exhausted();
        }
        Ok(state)
    }

    /// Reads the page each `(key, partition)` cursor points at.
    pub(crate) async fn read(&mut self, reads: Vec<(GraphKey, usize)>) -> Result<()> {
        if reads.is_empty() {
            return Ok(());
        }
        let mut requests = Vec::with_capacity(reads.len());
        for (key, partition) in &reads {
            let cursor = self
                .key(key)?
                .group
                .cursor(*partition)
                .ok_or_else(|| {
                    MixerError::internal(format!("read scheduled for cleared cursor of {key}"))
                })?;
            requests.push(PageRequest {
                direction: self.direction,
                key: key.clone(),
                partition: *partition,
                page: cursor.page,
            });
        }
        debug!(direction = %self.direction, reads = requests.len(), "reading pages");
        let pages = self.ctx.run(self.reader.read_pages(&requests)).await?;
        if pages.len() != requests.len() {
            return Err(MixerError::internal(format!(
                "{} pages returned for {} requests",
                pages.len(),
                requests.len()
            )));
        }
        for ((key, partition), page) in reads.into_iter().zip(pages) {
            let key_state = self.key_mut(&key)?;
            let slot = key_state.pages.get_mut(partition).ok_or_else(|| {
                MixerError::internal(format!("partition {partition} out of range for {key}"))
            })?;
            if page.is_none() {
                key_state.group.clear(partition);
            }
            *slot = page;
        }
        Ok(())
    }

    pub(crate) fn key(&self, key: &GraphKey) -> Result<&KeyState> {
        self.keys
            .get(key)
            .ok_or_else(|| MixerError::internal(format!("no fetch state for {key}")))
    }

    pub(crate) fn key_mut(&mut self, key: &GraphKey) -> Result<&mut KeyState> {
        self.keys
            .get_mut(key)
            .ok_or_else(|| MixerError::internal(format!("no fetch state for {key}")))
    }

    /// Keys still producing output, in key order.
    pub(crate) fn active_keys(&self) -> Vec<GraphKey> {
        self.keys
            .iter()
            .filter(|(_, state)| state.active)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub(crate) fn has_active(&self) -> bool {
        self.keys.values().any(|state| state.active)
    }

    pub(crate) fn check(&self) -> Result<()> {
        self.ctx.check()
    }

    /// Entry under the cursor of `partition` for `key`.
    ///
    /// A cursor past the end of its page can only come from a forged token.
    pub(crate) fn head(&self, key: &GraphKey, partition: usize) -> Result<EntityInfo> {
        let state = self.key(key)?;
        let cursor = state.group.cursor(partition).ok_or_else(|| {
            MixerError::internal(format!("partition {partition} has no cursor for {key}"))
        })?;
        let page = state
            .pages
            .get(partition)
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                MixerError::internal(format!("partition {partition} has no page for {key}"))
            })?;
        page.entries
            .get(cursor.item as usize)
            .cloned()
            .ok_or_else(|| {
                MixerError::InvalidToken(format!(
                    "cursor item {} beyond page {} of partition {partition} for {key}",
                    cursor.item, cursor.page
                ))
            })
    }

    /// Whether `entry` was already emitted, here or on an earlier page, under
    /// another neighbor type it carries.
    pub(crate) fn already_processed(&self, key: &GraphKey, entry: &EntityInfo) -> bool {
        entry.types.iter().any(|ty| {
            let other_key = key.with_type(ty);
            let Some(other) = self.keys.get(&other_key) else {
                return false;
            };
            if other.group.is_exhausted()
                || other
                    .merged
                    .last()
                    .is_some_and(|last| last.dcid >= entry.dcid)
            {
                return true;
            }
            // An outgoing key reads one partition in order, so a head past the
            // entry means an earlier page already returned it.
            self.direction == Direction::Out
                && other_key != *key
                && out_head(other).is_some_and(|head| head.dcid > entry.dcid)
        })
    }

    /// Moves the cursor of `partition` past its current item.
    pub(crate) fn advance(&mut self, key: &GraphKey, partition: usize) -> Result<Advance> {
        let state = self.key_mut(key)?;
        let page_len = state
            .pages
            .get(partition)
            .and_then(Option::as_ref)
            .map(|page| (page.entries.len(), page.total_pages))
            .ok_or_else(|| {
                MixerError::internal(format!("advance without page for {key}"))
            })?;
        let cursor = state.group.cursor_mut(partition).ok_or_else(|| {
            MixerError::internal(format!("advance without cursor for {key}"))
        })?;
        let (len, total_pages) = page_len;
        if !cursor.advance(len) {
            return Ok(Advance::SamePage);
        }
        if cursor.page >= total_pages {
            state.pages[partition] = None;
            state.group.clear(partition);
            return Ok(Advance::Exhausted);
        }
        Ok(Advance::NextPage)
    }

    /// Whether any partition still buffers unread data.
    pub(crate) fn has_buffered(&self) -> bool {
        self.keys
            .values()
            .any(|state| state.pages.iter().any(Option::is_some))
    }

    /// Splits the state into non-empty merged lists and, when data remains,
    /// the continuation state.
    pub(crate) fn finish(self) -> (BTreeMap<GraphKey, Vec<EntityInfo>>, Option<PaginationInfo>) {
        let more = self.has_buffered();
        let direction = self.direction;
        let mut merged = BTreeMap::new();
        let mut groups = Vec::with_capacity(self.keys.len());
        for (key, state) in self.keys {
            if !state.merged.is_empty() {
                merged.insert(key, state.merged);
            }
            groups.push(state.group);
        }
        let info = more.then(|| PaginationInfo::new(direction, groups));
        (merged, info)
    }
}

/// Entry under the cursor of the single partition an outgoing key reads.
fn out_head(state: &KeyState) -> Option<&EntityInfo> {
    state
        .pages
        .iter()
        .enumerate()
        .find_map(|(partition, page)| {
            let page = page.as_ref()?;
            let cursor = state.group.cursor(partition)?;
            page.entries.get(cursor.item as usize)
        })
}
