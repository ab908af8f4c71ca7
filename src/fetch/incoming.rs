//! Incoming values: every partition contributes, merged like a merge sort.

use std::collections::BTreeMap;

use tracing::trace;

use super::heap::MergeHeap;
use super::state::{Advance, FetchState};
use crate::error::{MixerError, Result};
use crate::types::GraphKey;

pub(crate) struct InState<'a> {
    state: FetchState<'a>,
    heaps: BTreeMap<GraphKey, MergeHeap>,
}

impl<'a> InState<'a> {
    /// Seeds one heap per key with the head of every partition holding data.
    pub(crate) fn new(state: FetchState<'a>) -> Result<Self> {
        let mut heaps = BTreeMap::new();
        for (key, key_state) in &state.keys {
            let mut heap = MergeHeap::default();
            for (partition, page) in key_state.pages.iter().enumerate() {
                if page.is_some() {
                    heap.push(partition, state.head(key, partition)?);
                }
            }
            heaps.insert(key.clone(), heap);
        }
        Ok(Self { state, heaps })
    }

    fn heap_mut(&mut self, key: &GraphKey) -> Result<&mut MergeHeap> {
        self.heaps
            .get_mut(key)
            .ok_or_else(|| MixerError::internal(format!("no merge heap for {key}")))
    }

    /// Pops the smallest entry of every active key. The entry that would
    /// exceed the limit is left unconsumed so the next page starts on it.
    pub(crate) async fn next(&mut self) -> Result<bool> {
        self.state.check()?;
        let mut reads = Vec::new();
        let mut refill = Vec::new();
        for key in self.state.active_keys() {
            let popped = self.heap_mut(&key)?.pop();
            let Some((partition, entry)) = popped else {
                let key_state = self.state.key_mut(&key)?;
                key_state.group.mark_exhausted();
                key_state.active = false;
                continue;
            };

            let processed = self.state.already_processed(&key, &entry);
            let limit = self.state.limit;
            let key_state = self.state.key_mut(&key)?;
            if processed {
                trace!(%key, dcid = %entry.dcid, "skipping entry emitted under another type");
            } else if !key_state
                .merged
                .last()
                .is_some_and(|last| last.same_value(&entry))
            {
                key_state.merged.push(entry);
            }
            if key_state.merged.len() > limit {
                key_state.merged.truncate(limit);
                key_state.active = false;
                continue;
            }

            match self.state.advance(&key, partition)? {
                Advance::SamePage => refill.push((key, partition)),
                Advance::NextPage => {
                    reads.push((key.clone(), partition));
                    refill.push((key, partition));
                }
                Advance::Exhausted => {}
            }
        }
        self.state.read(reads).await?;
        for (key, partition) in refill {
            let has_page = self
                .state
                .key(&key)?
                .pages
                .get(partition)
                .is_some_and(Option::is_some);
            if has_page {
                let head = self.state.head(&key, partition)?;
                self.heap_mut(&key)?.push(partition, head);
            }
        }
        Ok(self.state.has_active())
    }

    pub(crate) fn into_state(self) -> FetchState<'a> {
        self.state
    }
}
