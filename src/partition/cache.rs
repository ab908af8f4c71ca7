//! In-memory import group backed by encoded cache rows.
//!
//! Rows mirror the columnar cache layout:
//!
//! | prefix  | key                              | payload            |
//! |---------|----------------------------------|--------------------|
//! | `d/m/`  | `node^property^type^page`        | out-edge page      |
//! | `d/l/`  | `node^property^type^page`        | in-edge page       |
//! | `d/7/`  | `node^property^direction`        | neighbor types     |
//! | `d/9/`  | `node^direction`                 | property names     |
//!
//! Values are snappy-compressed JSON and are only decoded when read.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Page, Partition};
use crate::error::{MixerError, Result};
use crate::types::{Direction, GraphKey, SORT_KEY_SEPARATOR};

const OUT_PAGE_PREFIX: &str = "d/m/";
const IN_PAGE_PREFIX: &str = "d/l/";
const TYPES_PREFIX: &str = "d/7/";
const ARCS_PREFIX: &str = "d/9/";

/// Row key of one page of `key` in `direction`.
pub fn paged_row_key(direction: Direction, key: &GraphKey, page: u32) -> String {
    let prefix = match direction {
        Direction::Out => OUT_PAGE_PREFIX,
        Direction::In => IN_PAGE_PREFIX,
    };
    format!("{prefix}{key}{SORT_KEY_SEPARATOR}{page}")
}

/// Row key of the neighbor-type index for `(node, property)`.
pub fn types_row_key(direction: Direction, node: &str, property: &str) -> String {
    format!("{TYPES_PREFIX}{node}{SORT_KEY_SEPARATOR}{property}{SORT_KEY_SEPARATOR}{direction}")
}

/// Row key of the property index for `node`.
pub fn arcs_row_key(direction: Direction, node: &str) -> String {
    format!("{ARCS_PREFIX}{node}{SORT_KEY_SEPARATOR}{direction}")
}

/// Decoded content of one cache row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowPayload {
    /// One page of entries.
    Paged(Page),
    /// Neighbor types of a `(node, property)`.
    Types {
        /// Sorted type names.
        types: Vec<String>,
    },
    /// Properties of a node.
    Arcs {
        /// Sorted property names.
        properties: Vec<String>,
    },
}

impl RowPayload {
    /// Compresses the payload into its stored form.
    pub fn encode(&self) -> Result<Bytes> {
        let json = serde_json::to_vec(self)?;
        snap::raw::Encoder::new()
            .compress_vec(&json)
            .map(Bytes::from)
            .map_err(|err| MixerError::internal(format!("row compression failed: {err}")))
    }

    /// Decodes a stored row.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let json = snap::raw::Decoder::new()
            .decompress_vec(raw)
            .map_err(|err| MixerError::internal(format!("corrupt cache row: {err}")))?;
        Ok(serde_json::from_slice(&json)?)
    }

    fn kind(&self) -> &'static str {
        match self {
            RowPayload::Paged(_) => "paged",
            RowPayload::Types { .. } => "types",
            RowPayload::Arcs { .. } => "arcs",
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    name: String,
    rows: BTreeMap<String, String>,
}

/// Import group served from an in-memory row map.
#[derive(Clone, Debug, Default)]
pub struct CachePartition {
    name: String,
    rows: BTreeMap<String, Bytes>,
}

impl CachePartition {
    /// Empty group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: BTreeMap::new(),
        }
    }

    /// Renames the group, e.g. to the name given in the config file.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Stores `payload` under `key`, replacing any previous row.
    pub fn insert_row(&mut self, key: String, payload: &RowPayload) -> Result<()> {
        self.rows.insert(key, payload.encode()?);
        Ok(())
    }

    /// Decodes the row at `key`.
    pub fn row(&self, key: &str) -> Result<Option<RowPayload>> {
        self.rows
            .get(key)
            .map(|raw| {
                RowPayload::decode(raw)
                    .map_err(|err| MixerError::partition(&self.name, format!("row {key}: {err}")))
            })
            .transpose()
    }

    /// Number of stored rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Loads a cache file written by [`CachePartition::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let file: CacheFile = serde_json::from_str(&text)?;
        let mut rows = BTreeMap::new();
        for (key, value) in file.rows {
            let raw = STANDARD.decode(value.as_bytes()).map_err(|err| {
                MixerError::partition(&file.name, format!("row {key} is not base64: {err}"))
            })?;
            rows.insert(key, Bytes::from(raw));
        }
        info!(partition = %file.name, rows = rows.len(), path = %path.display(), "loaded cache");
        Ok(Self {
            name: file.name,
            rows,
        })
    }

    /// Writes every row to a JSON cache file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = CacheFile {
            name: self.name.clone(),
            rows: self
                .rows
                .iter()
                .map(|(key, raw)| (key.clone(), STANDARD.encode(raw)))
                .collect(),
        };
        fs::write(path, serde_json::to_vec_pretty(&file)?)?;
        Ok(())
    }

    fn unexpected(&self, key: &str, want: &str, got: &RowPayload) -> MixerError {
        MixerError::internal(format!(
            "partition '{}' row {key}: expected {want} payload, found {}",
            self.name,
            got.kind()
        ))
    }
}

#[async_trait]
impl Partition for CachePartition {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_page(
        &self,
        direction: Direction,
        key: &GraphKey,
        page: u32,
    ) -> Result<Option<Page>> {
        let row_key = paged_row_key(direction, key, page);
        match self.row(&row_key)? {
            None => Ok(None),
            Some(RowPayload::Paged(page)) => Ok(Some(page)),
            Some(other) => Err(self.unexpected(&row_key, "paged", &other)),
        }
    }

    async fn read_batch(
        &self,
        direction: Direction,
        reads: &[(GraphKey, u32)],
    ) -> Result<Vec<Option<Page>>> {
        let mut pages = Vec::with_capacity(reads.len());
        for (key, page) in reads {
            pages.push(self.read_page(direction, key, *page).await?);
        }
        Ok(pages)
    }

    async fn neighbor_types(
        &self,
        direction: Direction,
        node: &str,
        property: &str,
    ) -> Result<Vec<String>> {
        let row_key = types_row_key(direction, node, property);
        match self.row(&row_key)? {
            None => Ok(Vec::new()),
            Some(RowPayload::Types { types }) => Ok(types),
            Some(other) => Err(self.unexpected(&row_key, "types", &other)),
        }
    }

    async fn properties(&self, direction: Direction, node: &str) -> Result<Vec<String>> {
        let row_key = arcs_row_key(direction, node);
        match self.row(&row_key)? {
            None => Ok(Vec::new()),
            Some(RowPayload::Arcs { properties }) => Ok(properties),
            Some(other) => Err(self.unexpected(&row_key, "arcs", &other)),
        }
    }
}
