//! Property-value fetching across import groups.
//!
//! [`Fetcher::fetch`] resolves the cursor groups for a request (fresh, or
//! decoded from a continuation token), runs the outgoing or incoming merge
//! until every key is finished or full, and re-encodes whatever is left.

mod context;
mod heap;
mod incoming;
mod outgoing;
mod shape;
mod state;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tracing::{info, warn};

use crate::config::MixerConfig;
use crate::error::{MixerError, Result};
use crate::local::LocalStore;
use crate::pagination::{self, CursorGroup};
use crate::partition::{CachePartition, Partition, PartitionReader, PartitionSet};
use crate::types::{Direction, EntityInfo, GraphKey, UNTYPED};

pub use context::{CancelToken, RequestContext};
pub use shape::{merge_typed, NodeTriples, Triples};

use incoming::InState;
use outgoing::OutState;
use state::FetchState;

/// Default and maximum page size.
pub const DEFAULT_LIMIT: usize = 1000;

/// Limits and timeouts applied to every fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchOptions {
    /// Limit used when the caller passes 0 or more than `max_limit`.
    pub default_limit: usize,
    /// Largest limit honored as given.
    pub max_limit: usize,
    /// Per-request deadline; `None` disables it.
    pub timeout: Option<Duration>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: DEFAULT_LIMIT,
            timeout: None,
        }
    }
}

/// One property-value request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchRequest {
    /// Queried node ids.
    pub nodes: Vec<String>,
    /// Properties to read for every node.
    pub properties: Vec<String>,
    /// Edge direction.
    pub direction: Direction,
    /// Entries per key; 0 selects the default.
    pub limit: usize,
    /// Continuation token of the previous page.
    pub token: Option<String>,
}

impl FetchRequest {
    /// First page of `properties` for `nodes`.
    pub fn new<N, P>(nodes: N, properties: P, direction: Direction) -> Self
    where
        N: IntoIterator,
        N::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            nodes: nodes.into_iter().map(Into::into).collect(),
            properties: properties.into_iter().map(Into::into).collect(),
            direction,
            limit: 0,
            token: None,
        }
    }

    /// Sets the limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Continues from `token`; an empty token means the first page.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.is_empty()).then_some(token);
        self
    }

    fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Merged values of one page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchResult {
    /// Non-empty value lists per key.
    pub merged: BTreeMap<GraphKey, Vec<EntityInfo>>,
    /// Token for the next page, absent once everything was returned.
    pub next_token: Option<String>,
}

impl FetchResult {
    /// Values of `(node, property)` grouped by neighbor type.
    pub fn typed_values(&self, node: &str, property: &str) -> BTreeMap<&str, &[EntityInfo]> {
        self.merged
            .iter()
            .filter(|(key, _)| key.node == node && key.property == property)
            .map(|(key, values)| (key.neighbor_type.as_str(), values.as_slice()))
            .collect()
    }

    /// Values of `(node, property)` across all types.
    pub fn values(&self, node: &str, property: &str) -> Vec<EntityInfo> {
        merge_typed(&self.typed_values(node, property))
    }

    /// Total number of returned entries.
    pub fn len(&self) -> usize {
        self.merged.values().map(Vec::len).sum()
    }

    /// True when no entry was returned.
    pub fn is_empty(&self) -> bool {
        self.merged.values().all(Vec::is_empty)
    }
}

/// Entry point of the engine, shared by the HTTP handlers and the CLI.
#[derive(Clone)]
pub struct Fetcher {
    reader: Arc<dyn PartitionReader>,
    local: Option<Arc<LocalStore>>,
    options: FetchOptions,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("partitions", &self.reader.partition_names())
            .field("local", &self.local.is_some())
            .field("options", &self.options)
            .finish()
    }
}

impl Fetcher {
    /// Fetcher over `reader` with default options.
    pub fn new(reader: Arc<dyn PartitionReader>) -> Self {
        Self {
            reader,
            local: None,
            options: FetchOptions::default(),
        }
    }

    /// Loads every configured import group and the optional local store.
    pub fn from_config(config: &MixerConfig) -> Result<Self> {
        let mut partitions: Vec<Arc<dyn Partition>> = Vec::with_capacity(config.import_groups.len());
        for group in &config.import_groups {
            let cache = CachePartition::load(&group.path)?.with_name(group.name.clone());
            partitions.push(Arc::new(cache));
        }
        let set = PartitionSet::new(partitions).with_read_batch_size(config.fetch.read_batch_size);
        info!(partitions = ?set.partition_names(), "import groups ranked");
        let mut fetcher = Self::new(Arc::new(set)).with_options(config.fetch.options());
        if let Some(path) = &config.local.sqlite_path {
            fetcher = fetcher.with_local(Arc::new(LocalStore::open(path)?));
        }
        Ok(fetcher)
    }

    /// Replaces the options.
    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    /// Adds the local triples store, merged into first pages.
    pub fn with_local(mut self, local: Arc<LocalStore>) -> Self {
        self.local = Some(local);
        self
    }

    /// The partition reader.
    pub fn reader(&self) -> &Arc<dyn PartitionReader> {
        &self.reader
    }

    /// Options in effect.
    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Limit actually applied for a requested `limit`.
    pub fn effective_limit(&self, limit: usize) -> usize {
        if limit == 0 || limit > self.options.max_limit {
            self.options.default_limit
        } else {
            limit
        }
    }

    /// Context carrying the configured deadline.
    pub fn context(&self) -> RequestContext {
        match self.options.timeout {
            Some(timeout) => RequestContext::with_timeout(timeout),
            None => RequestContext::unbounded(),
        }
    }

    /// Fetches one page under the configured deadline.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult> {
        self.fetch_with(request, &self.context()).await
    }

    /// Fetches one page under `ctx`.
    pub async fn fetch_with(
        &self,
        request: &FetchRequest,
        ctx: &RequestContext,
    ) -> Result<FetchResult> {
        let nodes: BTreeSet<&str> = request.nodes.iter().map(String::as_str).collect();
        let properties: BTreeSet<&str> = request.properties.iter().map(String::as_str).collect();
        if nodes.is_empty() || properties.is_empty() {
            return Ok(FetchResult::default());
        }
        let limit = self.effective_limit(request.limit);
        let direction = request.direction;

        let groups = match request.token() {
            None => self.fresh_groups(ctx, direction, &nodes, &properties).await?,
            Some(token) => match self.resume_groups(token, direction, &nodes, &properties) {
                Ok(groups) => groups,
                Err(err) => {
                    warn!(error = %err, "rejected continuation token");
                    return Err(err);
                }
            },
        };

        let state = FetchState::init(self.reader.as_ref(), ctx, direction, limit, groups).await?;
        let state = match direction {
            Direction::Out => {
                let mut out = OutState::new(state);
                while out.next().await? {}
                out.into_state()
            }
            Direction::In => {
                let mut inc = InState::new(state)?;
                while inc.next().await? {}
                inc.into_state()
            }
        };
        let (mut merged, info) = state.finish();
        let next_token = info.as_ref().map(pagination::encode).transpose()?;

        if request.token().is_none() {
            if let Some(local) = &self.local {
                let rows = ctx.run(local.fetch(&nodes, &properties, direction)).await?;
                merge_local(&mut merged, rows, limit);
            }
        }

        let result = FetchResult { merged, next_token };
        info!(
            %direction,
            nodes = nodes.len(),
            properties = properties.len(),
            limit,
            values = result.len(),
            more = result.next_token.is_some(),
            "fetched property values"
        );
        Ok(result)
    }

    async fn fresh_groups(
        &self,
        ctx: &RequestContext,
        direction: Direction,
        nodes: &BTreeSet<&str>,
        properties: &BTreeSet<&str>,
    ) -> Result<BTreeMap<GraphKey, CursorGroup>> {
        let pairs: Vec<(&str, &str)> = nodes
            .iter()
            .flat_map(|node| properties.iter().map(move |prop| (*node, *prop)))
            .collect();
        let lookups = pairs
            .iter()
            .map(|(node, prop)| self.reader.neighbor_types(direction, node, prop));
        let type_lists = ctx.run(try_join_all(lookups)).await?;

        let partitions = self.reader.partition_count();
        let mut groups = BTreeMap::new();
        for ((node, prop), types) in pairs.into_iter().zip(type_lists) {
            let types = if types.is_empty() {
                vec![UNTYPED.to_owned()]
            } else {
                types
            };
            for ty in types {
                let key = GraphKey::new(node, prop, ty);
                groups.insert(key.clone(), CursorGroup::fresh(key, partitions));
            }
        }
        Ok(groups)
    }

    fn resume_groups(
        &self,
        token: &str,
        direction: Direction,
        nodes: &BTreeSet<&str>,
        properties: &BTreeSet<&str>,
    ) -> Result<BTreeMap<GraphKey, CursorGroup>> {
        let info = pagination::decode(token)?;
        if info.direction != direction {
            return Err(MixerError::InvalidToken(format!(
                "token was issued for direction '{}', request is '{direction}'",
                info.direction
            )));
        }
        let partitions = self.reader.partition_count();
        let groups = info.into_map()?;
        for (key, group) in &groups {
            if !nodes.contains(key.node.as_str()) || !properties.contains(key.property.as_str()) {
                return Err(MixerError::InvalidToken(format!(
                    "token key {key} is not part of the request"
                )));
            }
            if !group.cursors.is_empty() && group.cursors.len() != partitions {
                return Err(MixerError::InvalidToken(format!(
                    "token has {} partitions for {key}, server has {partitions}",
                    group.cursors.len()
                )));
            }
        }
        Ok(groups)
    }

    /// Outgoing or incoming values of every property of each node.
    ///
    /// Properties are listed per node; a property is only reported for the
    /// nodes that actually have it.
    pub async fn fetch_triples(
        &self,
        nodes: &[String],
        direction: Direction,
        token: Option<&str>,
    ) -> Result<Triples> {
        let ctx = self.context();
        let listed = ctx
            .run(try_join_all(
                nodes
                    .iter()
                    .map(|node| self.reader.properties(direction, node)),
            ))
            .await?;
        let mut properties_by_node: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
        let mut all_properties = BTreeSet::new();
        for (node, props) in nodes.iter().zip(listed) {
            all_properties.extend(props.iter().cloned());
            properties_by_node
                .entry(node.as_str())
                .or_default()
                .extend(props);
        }
        let mut request = FetchRequest::new(nodes.iter().cloned(), all_properties, direction);
        if let Some(token) = token {
            request = request.with_token(token);
        }
        let result = self.fetch_with(&request, &ctx).await?;
        Ok(Triples::from_result(nodes, &properties_by_node, &result))
    }
}

/// Adds local rows into the room each key has left under `limit`, skipping
/// values the key already holds. Touched lists are re-sorted by sort key.
fn merge_local(
    merged: &mut BTreeMap<GraphKey, Vec<EntityInfo>>,
    rows: Vec<(GraphKey, EntityInfo)>,
    limit: usize,
) {
    let mut touched = BTreeSet::new();
    for (key, entry) in rows {
        let values = merged.entry(key.clone()).or_default();
        if values.len() >= limit || values.iter().any(|v| v.same_value(&entry)) {
            continue;
        }
        values.push(entry);
        touched.insert(key);
    }
    for key in touched {
        if let Some(values) = merged.get_mut(&key) {
            values.sort_by_cached_key(EntityInfo::sort_key);
        }
    }
    merged.retain(|_, values| !values.is_empty());
}
