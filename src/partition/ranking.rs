//! Preference order of import groups.
//!
//! Group names look like `frequent_2024_02_01_14_20_47`: the text before the
//! first `_` selects a rank, the rest is an import timestamp.

use std::cmp::Ordering;

/// Rank of groups whose prefix is not listed.
pub const DEFAULT_RANK: u32 = 9999;

/// Rank of an import group name; lower ranks are preferred.
pub fn group_rank(name: &str) -> u32 {
    match group_prefix(name) {
        "dcbranch" | "branch" => 0,
        "frequent" => 1,
        "ipcc" => 2,
        "biomedical" => 3,
        "borgcron" | "infrequent" => 10_000,
        _ => DEFAULT_RANK,
    }
}

fn group_prefix(name: &str) -> &str {
    name.split('_').next().unwrap_or(name)
}

/// Orders two group names: by rank, then newest suffix first.
pub fn compare_groups(a: &str, b: &str) -> Ordering {
    let (pa, pb) = (group_prefix(a), group_prefix(b));
    group_rank(a)
        .cmp(&group_rank(b))
        .then_with(|| b[pb.len()..].cmp(&a[pa.len()..]))
}

/// Stable sort of items by their group name.
pub fn sort_by_rank<T>(items: &mut [T], name: impl Fn(&T) -> &str) {
    items.sort_by(|a, b| compare_groups(name(a), name(b)));
}
