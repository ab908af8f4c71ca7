//! Response shaping on top of per-type results.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::FetchResult;
use crate::types::EntityInfo;

/// Flattens the per-type lists of one `(node, property)` in type order.
///
/// Entries without types inherit the type they were stored under; the empty
/// type stamps nothing.
pub fn merge_typed(typed: &BTreeMap<&str, &[EntityInfo]>) -> Vec<EntityInfo> {
    let mut values = Vec::with_capacity(typed.values().map(|v| v.len()).sum());
    for (ty, entries) in typed {
        for entry in entries.iter() {
            let mut entry = entry.clone();
            if entry.types.is_empty() && !ty.is_empty() {
                entry.types = vec![(*ty).to_owned()];
            }
            values.push(entry);
        }
    }
    values
}

/// Every property's values for one node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NodeTriples {
    /// Node id.
    pub node: String,
    /// Values per property.
    pub triples: BTreeMap<String, Vec<EntityInfo>>,
}

/// Triples page for a list of nodes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Triples {
    /// One entry per requested node, in request order.
    pub nodes: Vec<NodeTriples>,
    /// Token for the next page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

impl Triples {
    pub(crate) fn from_result(
        nodes: &[String],
        properties: &BTreeMap<&str, BTreeSet<String>>,
        result: &FetchResult,
    ) -> Self {
        let nodes = nodes
            .iter()
            .map(|node| {
                let triples = properties
                    .get(node.as_str())
                    .into_iter()
                    .flatten()
                    .filter_map(|prop| {
                        let values = result.values(node, prop);
                        (!values.is_empty()).then(|| (prop.clone(), values))
                    })
                    .collect();
                NodeTriples {
                    node: node.clone(),
                    triples,
                }
            })
            .collect();
        Self {
            nodes,
            next_token: result.next_token.clone(),
        }
    }
}
