//! Import groups and the read contract the fetch engine relies on.
//!
//! A [`Partition`] is one import group. [`PartitionSet`] ranks groups,
//! validates what they return, and exposes them to the engine through
//! [`PartitionReader`], which is also the seam tests use to inject fakes.

mod builder;
mod cache;
mod ranking;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, error};

use crate::error::{MixerError, Result};
use crate::types::{Direction, EntityInfo, GraphKey};

pub use builder::{load_triples, CacheBuilder, Triple, DEFAULT_PAGE_SIZE};
pub use cache::{arcs_row_key, paged_row_key, types_row_key, CachePartition, RowPayload};
pub use ranking::{compare_groups, group_rank, sort_by_rank, DEFAULT_RANK};

/// Default number of page reads sent to one partition per batch.
pub const DEFAULT_READ_BATCH_SIZE: usize = 1000;

/// One page read addressed to a ranked partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageRequest {
    /// Edge direction.
    pub direction: Direction,
    /// Key whose pages are read.
    pub key: GraphKey,
    /// Partition index in preference order.
    pub partition: usize,
    /// Zero-based page number.
    pub page: u32,
}

/// One stored page of entries for a key.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Page {
    /// Entries sorted by [`EntityInfo::sort_key`].
    pub entries: Vec<EntityInfo>,
    /// Number of pages the partition holds for the key.
    pub total_pages: u32,
}

/// A single import group.
#[async_trait]
pub trait Partition: Send + Sync {
    /// Import group name, used for ranking and error reports.
    fn name(&self) -> &str;

    /// Reads one page; `None` when the group holds nothing for the key.
    async fn read_page(&self, direction: Direction, key: &GraphKey, page: u32)
        -> Result<Option<Page>>;

    /// Reads several pages in one batch, results in input order.
    async fn read_batch(
        &self,
        direction: Direction,
        reads: &[(GraphKey, u32)],
    ) -> Result<Vec<Option<Page>>> {
        try_join_all(
            reads
                .iter()
                .map(|(key, page)| self.read_page(direction, key, *page)),
        )
        .await
    }

    /// Neighbor types the group knows for `(node, property)`.
    async fn neighbor_types(
        &self,
        direction: Direction,
        node: &str,
        property: &str,
    ) -> Result<Vec<String>>;

    /// Properties the group holds for `node` in `direction`.
    async fn properties(&self, direction: Direction, node: &str) -> Result<Vec<String>>;
}

/// Ranked, read-only view over every import group.
#[async_trait]
pub trait PartitionReader: Send + Sync {
    /// Partition names in preference order.
    fn partition_names(&self) -> Vec<String>;

    /// Number of partitions.
    fn partition_count(&self) -> usize;

    /// Reads one page; `None` means the partition has no data for the key.
    async fn read_page(&self, request: &PageRequest) -> Result<Option<Page>>;

    /// Reads many pages concurrently; results line up with `requests`.
    async fn read_pages(&self, requests: &[PageRequest]) -> Result<Vec<Option<Page>>> {
        try_join_all(requests.iter().map(|request| self.read_page(request))).await
    }

    /// Union of neighbor types across partitions, sorted.
    async fn neighbor_types(
        &self,
        direction: Direction,
        node: &str,
        property: &str,
    ) -> Result<Vec<String>>;

    /// Union of properties across partitions, sorted.
    async fn properties(&self, direction: Direction, node: &str) -> Result<Vec<String>>;
}

/// Import groups sorted by [`compare_groups`].
#[derive(Clone)]
pub struct PartitionSet {
    partitions: Vec<Arc<dyn Partition>>,
    read_batch_size: usize,
}

impl std::fmt::Debug for PartitionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionSet")
            .field("partitions", &self.partition_names())
            .field("read_batch_size", &self.read_batch_size)
            .finish()
    }
}

impl PartitionSet {
    /// Ranks the given groups.
    pub fn new(mut partitions: Vec<Arc<dyn Partition>>) -> Self {
        sort_by_rank(&mut partitions, |p| p.name());
        Self {
            partitions,
            read_batch_size: DEFAULT_READ_BATCH_SIZE,
        }
    }

    /// Caps how many reads go to one partition in a single batch.
    pub fn with_read_batch_size(mut self, read_batch_size: usize) -> Self {
        self.read_batch_size = read_batch_size.max(1);
        self
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    /// True when no group is loaded.
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    fn partition(&self, index: usize) -> Result<&Arc<dyn Partition>> {
        self.partitions.get(index).ok_or_else(|| {
            MixerError::internal(format!(
                "partition index {index} out of range ({} partitions)",
                self.partitions.len()
            ))
        })
    }

    async fn read_partition_batch(
        &self,
        index: usize,
        direction: Direction,
        reads: Vec<(GraphKey, u32)>,
    ) -> Result<Vec<Option<Page>>> {
        let partition = self.partition(index)?;
        let mut pages = Vec::with_capacity(reads.len());
        for chunk in reads.chunks(self.read_batch_size) {
            let chunk_pages = partition
                .read_batch(direction, chunk)
                .await
                .map_err(|err| annotate(partition.name(), err))?;
            if chunk_pages.len() != chunk.len() {
                return Err(MixerError::partition(
                    partition.name(),
                    format!("{} pages returned for {} reads", chunk_pages.len(), chunk.len()),
                ));
            }
            for ((key, page), found) in chunk.iter().zip(chunk_pages) {
                pages.push(check_page(partition.name(), key, *page, found)?);
            }
        }
        debug!(
            partition = partition.name(),
            %direction,
            reads = reads.len(),
            "read page batch"
        );
        Ok(pages)
    }
}

fn annotate(name: &str, err: MixerError) -> MixerError {
    match err {
        MixerError::Partition { .. } => err,
        other => {
            error!(partition = name, error = %other, "partition read failed");
            MixerError::partition(name, other.to_string())
        }
    }
}

/// Normalizes empty pages to `None` and rejects pages past the end.
fn check_page(name: &str, key: &GraphKey, page: u32, found: Option<Page>) -> Result<Option<Page>> {
    match found {
        Some(found) if found.entries.is_empty() => Ok(None),
        Some(found) if page >= found.total_pages => Err(MixerError::internal(format!(
            "partition '{name}' returned page {page} of {} for {key}",
            found.total_pages
        ))),
        other => Ok(other),
    }
}

#[async_trait]
impl PartitionReader for PartitionSet {
    fn partition_names(&self) -> Vec<String> {
        self.partitions.iter().map(|p| p.name().to_owned()).collect()
    }

    fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    async fn read_page(&self, request: &PageRequest) -> Result<Option<Page>> {
        let partition = self.partition(request.partition)?;
        let found = partition
            .read_page(request.direction, &request.key, request.page)
            .await
            .map_err(|err| annotate(partition.name(), err))?;
        check_page(partition.name(), &request.key, request.page, found)
    }

    async fn read_pages(&self, requests: &[PageRequest]) -> Result<Vec<Option<Page>>> {
        // Group by (partition, direction), remembering each request's slot.
        let mut groups: Vec<((usize, Direction), Vec<usize>)> = Vec::new();
        for (slot, request) in requests.iter().enumerate() {
            let group = (request.partition, request.direction);
            match groups.iter_mut().find(|(g, _)| *g == group) {
                Some((_, slots)) => slots.push(slot),
                None => groups.push((group, vec![slot])),
            }
        }
        let batches = groups.iter().map(|((partition, direction), slots)| {
            let reads = slots
                .iter()
                .map(|&slot| (requests[slot].key.clone(), requests[slot].page))
                .collect();
            self.read_partition_batch(*partition, *direction, reads)
        });
        let results = try_join_all(batches).await?;

        let mut pages: Vec<Option<Page>> = vec![None; requests.len()];
        for ((_, slots), batch) in groups.iter().zip(results) {
            for (&slot, page) in slots.iter().zip(batch) {
                pages[slot] = page;
            }
        }
        Ok(pages)
    }

    async fn neighbor_types(
        &self,
        direction: Direction,
        node: &str,
        property: &str,
    ) -> Result<Vec<String>> {
        let lists = try_join_all(self.partitions.iter().map(|p| async move {
            p.neighbor_types(direction, node, property)
                .await
                .map_err(|err| annotate(p.name(), err))
        }))
        .await?;
        Ok(union_sorted(lists))
    }

    async fn properties(&self, direction: Direction, node: &str) -> Result<Vec<String>> {
        let lists = try_join_all(self.partitions.iter().map(|p| async move {
            p.properties(direction, node)
                .await
                .map_err(|err| annotate(p.name(), err))
        }))
        .await?;
        Ok(union_sorted(lists))
    }
}

fn union_sorted(lists: Vec<Vec<String>>) -> Vec<String> {
    lists
        .into_iter()
        .flatten()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
