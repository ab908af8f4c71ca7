//! Builds paged cache rows from raw triples.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::cache::{arcs_row_key, paged_row_key, types_row_key, CachePartition, RowPayload};
use super::Page;
use crate::error::{MixerError, Result};
use crate::types::{Direction, EntityInfo, GraphKey, UNTYPED};

/// Entries per stored page.
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// One `subject -predicate-> object` statement with node metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Triple {
    /// Subject node id.
    pub subject_id: String,
    /// Subject display name.
    pub subject_name: String,
    /// Subject node types.
    pub subject_types: Vec<String>,
    /// Property name.
    pub predicate: String,
    /// Object node id; empty for scalar objects.
    pub object_id: String,
    /// Scalar object value.
    pub object_value: String,
    /// Object display name.
    pub object_name: String,
    /// Object node types.
    pub object_types: Vec<String>,
    /// Provenance of the statement.
    pub provenance_id: String,
}

impl Triple {
    /// Edge between two nodes, the object having one type.
    pub fn node_edge(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
        object_type: impl Into<String>,
    ) -> Self {
        let object_type = object_type.into();
        Self {
            subject_id: subject.into(),
            predicate: predicate.into(),
            object_id: object.into(),
            object_types: if object_type.is_empty() {
                Vec::new()
            } else {
                vec![object_type]
            },
            ..Self::default()
        }
    }

    /// Scalar property value.
    pub fn value(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject.into(),
            predicate: predicate.into(),
            object_value: value.into(),
            ..Self::default()
        }
    }

    /// Replaces the object types.
    pub fn with_object_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.object_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the subject types.
    pub fn with_subject_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subject_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the provenance id.
    pub fn with_provenance(mut self, provenance_id: impl Into<String>) -> Self {
        self.provenance_id = provenance_id.into();
        self
    }

    fn validate(&self) -> Result<()> {
        if self.subject_id.is_empty() || self.predicate.is_empty() {
            return Err(MixerError::InvalidArgument(format!(
                "triple needs a subject and predicate: {self:?}"
            )));
        }
        if self.object_id.is_empty() && self.object_value.is_empty() {
            return Err(MixerError::InvalidArgument(format!(
                "triple {} {} has no object",
                self.subject_id, self.predicate
            )));
        }
        Ok(())
    }

    fn object_entry(&self) -> EntityInfo {
        EntityInfo {
            dcid: self.object_id.clone(),
            value: self.object_value.clone(),
            types: self.object_types.clone(),
            name: self.object_name.clone(),
            provenance_id: self.provenance_id.clone(),
        }
    }

    fn subject_entry(&self) -> EntityInfo {
        EntityInfo {
            dcid: self.subject_id.clone(),
            value: String::new(),
            types: self.subject_types.clone(),
            name: self.subject_name.clone(),
            provenance_id: self.provenance_id.clone(),
        }
    }
}

/// Reads a JSON array of triples.
pub fn load_triples(path: &Path) -> Result<Vec<Triple>> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn keyed_types(types: &[String]) -> Vec<&str> {
    if types.is_empty() {
        vec![UNTYPED]
    } else {
        types.iter().map(String::as_str).collect()
    }
}

/// Collects triples for one import group and pages them.
#[derive(Clone, Debug)]
pub struct CacheBuilder {
    name: String,
    page_size: usize,
    triples: Vec<Triple>,
}

impl CacheBuilder {
    /// Builder for the named import group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            page_size: DEFAULT_PAGE_SIZE,
            triples: Vec::new(),
        }
    }

    /// Overrides the page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Adds one triple.
    pub fn add(&mut self, triple: Triple) {
        self.triples.push(triple);
    }

    /// Adds many triples.
    pub fn extend(&mut self, triples: impl IntoIterator<Item = Triple>) {
        self.triples.extend(triples);
    }

    /// Sorts, deduplicates and pages every key, producing the group's rows.
    ///
    /// Out edges are keyed by object type and in edges by subject type; a
    /// neighbor with several types is stored under each of them, and scalars
    /// or untyped neighbors go under the empty type.
    pub fn build(&self) -> Result<CachePartition> {
        if self.page_size == 0 {
            return Err(MixerError::InvalidArgument(
                "page size must be positive".into(),
            ));
        }
        let mut entries: BTreeMap<(Direction, GraphKey), Vec<EntityInfo>> = BTreeMap::new();
        let mut types: BTreeMap<(Direction, &str, &str), BTreeSet<&str>> = BTreeMap::new();
        let mut arcs: BTreeMap<(Direction, &str), BTreeSet<&str>> = BTreeMap::new();

        for triple in &self.triples {
            triple.validate()?;
            let subject = triple.subject_id.as_str();
            let predicate = triple.predicate.as_str();

            let out_entry = triple.object_entry();
            for ty in keyed_types(&triple.object_types) {
                entries
                    .entry((Direction::Out, GraphKey::new(subject, predicate, ty)))
                    .or_default()
                    .push(out_entry.clone());
                types
                    .entry((Direction::Out, subject, predicate))
                    .or_default()
                    .insert(ty);
            }
            arcs.entry((Direction::Out, subject))
                .or_default()
                .insert(predicate);

            if triple.object_id.is_empty() {
                continue;
            }
            let object = triple.object_id.as_str();
            let in_entry = triple.subject_entry();
            for ty in keyed_types(&triple.subject_types) {
                entries
                    .entry((Direction::In, GraphKey::new(object, predicate, ty)))
                    .or_default()
                    .push(in_entry.clone());
                types
                    .entry((Direction::In, object, predicate))
                    .or_default()
                    .insert(ty);
            }
            arcs.entry((Direction::In, object))
                .or_default()
                .insert(predicate);
        }

        let mut cache = CachePartition::new(self.name.clone());
        let mut pages_written = 0usize;
        for ((direction, key), mut list) in entries {
            list.sort_by_cached_key(EntityInfo::sort_key);
            list.dedup_by(|a, b| a.sort_key() == b.sort_key());
            let total_pages = u32::try_from(list.len().div_ceil(self.page_size))
                .map_err(|_| MixerError::InvalidArgument(format!("too many pages for {key}")))?;
            for (page, chunk) in (0u32..).zip(list.chunks(self.page_size)) {
                let payload = RowPayload::Paged(Page {
                    entries: chunk.to_vec(),
                    total_pages,
                });
                cache.insert_row(paged_row_key(direction, &key, page), &payload)?;
                pages_written += 1;
            }
        }
        for ((direction, node, property), set) in types {
            let payload = RowPayload::Types {
                types: set.into_iter().map(str::to_owned).collect(),
            };
            cache.insert_row(types_row_key(direction, node, property), &payload)?;
        }
        for ((direction, node), set) in arcs {
            let payload = RowPayload::Arcs {
                properties: set.into_iter().map(str::to_owned).collect(),
            };
            cache.insert_row(arcs_row_key(direction, node), &payload)?;
        }
        info!(
            partition = %self.name,
            triples = self.triples.len(),
            pages = pages_written,
            rows = cache.row_count(),
            "built cache partition"
        );
        Ok(cache)
    }
}
