//! Outgoing values: the preferred partition holding data is authoritative.

use tracing::trace;

use super::state::{Advance, FetchState};
use crate::error::Result;
use crate::types::GraphKey;

pub(crate) struct OutState<'a> {
    state: FetchState<'a>,
}

impl<'a> OutState<'a> {
    /// Picks the first ranked partition with data for every key and drops the
    /// cursors of all others, so later pages never consult them.
    pub(crate) fn new(mut state: FetchState<'a>) -> Self {
        for key_state in state.keys.values_mut() {
            let used = key_state.pages.iter().position(Option::is_some);
            for partition in 0..key_state.pages.len() {
                if Some(partition) != used {
                    key_state.pages[partition] = None;
                    key_state.group.clear(partition);
                }
            }
            if used.is_none() {
                key_state.active = false;
            }
        }
        Self { state }
    }

    fn used_partition(&self, key: &GraphKey) -> Result<Option<usize>> {
        Ok(self.state.key(key)?.pages.iter().position(Option::is_some))
    }

    /// Emits at most one entry per active key, then loads any pages the
    /// cursors moved onto. Returns whether any key is still active.
    pub(crate) async fn next(&mut self) -> Result<bool> {
        self.state.check()?;
        let mut reads = Vec::new();
        for key in self.state.active_keys() {
            let limit = self.state.limit;
            if self.state.key(&key)?.merged.len() >= limit {
                self.state.key_mut(&key)?.active = false;
                continue;
            }
            let Some(partition) = self.used_partition(&key)? else {
                self.state.key_mut(&key)?.active = false;
                continue;
            };
            let entry = self.state.head(&key, partition)?;
            if self.state.already_processed(&key, &entry) {
                trace!(%key, dcid = %entry.dcid, "skipping entry emitted under another type");
            } else {
                self.state.key_mut(&key)?.merged.push(entry);
            }
            match self.state.advance(&key, partition)? {
                Advance::SamePage => {}
                Advance::NextPage => reads.push((key, partition)),
                Advance::Exhausted => {
                    let key_state = self.state.key_mut(&key)?;
                    key_state.group.mark_exhausted();
                    key_state.active = false;
                }
            }
        }
        self.state.read(reads).await?;
        Ok(self.state.has_active())
    }

    pub(crate) fn into_state(self) -> FetchState<'a> {
        self.state
    }
}
