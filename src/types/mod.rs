#![forbid(unsafe_code)]
//! Graph keys, edge entries, and traversal direction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MixerError, Result};

/// Separator joining the components of [`EntityInfo::sort_key`].
pub const SORT_KEY_SEPARATOR: char = '^';

/// Neighbor type used for scalar values and untyped neighbors.
pub const UNTYPED: &str = "";

/// Edge traversal direction relative to the queried node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Edges whose subject is the queried node.
    Out,
    /// Edges whose object is the queried node.
    In,
}

impl Direction {
    /// Wire name of the direction.
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Out => "out",
            Direction::In => "in",
        }
    }

    pub(crate) const fn tag(self) -> u8 {
        match self {
            Direction::Out => 0,
            Direction::In => 1,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Direction::Out),
            1 => Some(Direction::In),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = MixerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "out" => Ok(Direction::Out),
            "in" => Ok(Direction::In),
            other => Err(MixerError::InvalidArgument(format!(
                "direction '{other}' must be 'out' or 'in'"
            ))),
        }
    }
}

/// Index of all per-request pagination and merge state.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphKey {
    /// Queried node id.
    pub node: String,
    /// Property (predicate) name.
    pub property: String,
    /// Type of the neighboring node, or [`UNTYPED`].
    pub neighbor_type: String,
}

impl GraphKey {
    /// Creates a key from its three components.
    pub fn new(
        node: impl Into<String>,
        property: impl Into<String>,
        neighbor_type: impl Into<String>,
    ) -> Self {
        Self {
            node: node.into(),
            property: property.into(),
            neighbor_type: neighbor_type.into(),
        }
    }

    /// Key for the same node and property under another neighbor type.
    pub fn with_type(&self, neighbor_type: &str) -> Self {
        Self {
            node: self.node.clone(),
            property: self.property.clone(),
            neighbor_type: neighbor_type.to_owned(),
        }
    }

    /// Whether this key groups scalar values or untyped neighbors.
    pub fn is_untyped(&self) -> bool {
        self.neighbor_type.is_empty()
    }
}

impl fmt::Display for GraphKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.node,
            self.property,
            self.neighbor_type,
            sep = SORT_KEY_SEPARATOR
        )
    }
}

/// One edge or scalar value attached to a node through a property.
///
/// Empty strings stand for absent fields; an entry carries either a `dcid`
/// (edge to another node) or a `value` (scalar), occasionally both.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityInfo {
    /// Neighbor node id.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dcid: String,
    /// Scalar value.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    /// Types of the neighbor node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    /// Display name of the neighbor node.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Provenance of the triple.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provenance_id: String,
}

impl EntityInfo {
    /// Entry pointing at another node.
    pub fn node(dcid: impl Into<String>) -> Self {
        Self {
            dcid: dcid.into(),
            ..Self::default()
        }
    }

    /// Entry holding a scalar value.
    pub fn scalar(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    /// Sets the neighbor types.
    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the provenance id.
    pub fn with_provenance(mut self, provenance_id: impl Into<String>) -> Self {
        self.provenance_id = provenance_id.into();
        self
    }

    /// Composite ordering key: `dcid^value^provenance_id`.
    ///
    /// Cache pages are sorted by this exact string, so merges must compare it
    /// byte-for-byte rather than component-wise.
    pub fn sort_key(&self) -> String {
        let mut key =
            String::with_capacity(self.dcid.len() + self.value.len() + self.provenance_id.len() + 2);
        key.push_str(&self.dcid);
        key.push(SORT_KEY_SEPARATOR);
        key.push_str(&self.value);
        key.push(SORT_KEY_SEPARATOR);
        key.push_str(&self.provenance_id);
        key
    }

    /// Whether two entries describe the same neighbor or value.
    pub fn same_value(&self, other: &EntityInfo) -> bool {
        self.dcid == other.dcid && self.value == other.value
    }
}

/// Rejects node ids that are empty or contain spaces or commas.
pub fn check_valid_dcids<S: AsRef<str>>(dcids: &[S]) -> Result<()> {
    for dcid in dcids {
        let dcid = dcid.as_ref();
        if dcid.is_empty() || dcid.contains(' ') || dcid.contains(',') {
            return Err(MixerError::InvalidArgument(format!("invalid node id '{dcid}'")));
        }
    }
    Ok(())
}
