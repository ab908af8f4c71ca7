#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mixer::fetch::{FetchOptions, FetchRequest, Fetcher};
use mixer::local::LocalStore;
use mixer::pagination::{encode, CursorGroup, PaginationInfo};
use mixer::partition::{
    CacheBuilder, Page, PageRequest, Partition, PartitionReader, PartitionSet, Triple,
};
use mixer::{Direction, EntityInfo, GraphKey, MixerError, Result};
use proptest::prelude::*;

/// Reader serving hand-laid pages, so tests control duplicates and page
/// boundaries exactly.
#[derive(Default)]
struct FakeReader {
    partitions: Vec<BTreeMap<(Direction, GraphKey), Vec<Vec<EntityInfo>>>>,
    delay: Option<Duration>,
    failing: Option<usize>,
    reads: AtomicUsize,
}

impl FakeReader {
    fn new(partitions: usize) -> Self {
        Self {
            partitions: vec![BTreeMap::new(); partitions],
            ..Self::default()
        }
    }

    fn with_values(
        mut self,
        partition: usize,
        direction: Direction,
        key: &GraphKey,
        values: &[&str],
        page_size: usize,
    ) -> Self {
        let pages = values
            .chunks(page_size)
            .map(|chunk| chunk.iter().map(|v| EntityInfo::node(*v)).collect())
            .collect();
        self.partitions[partition].insert((direction, key.clone()), pages);
        self
    }
}

#[async_trait]
impl PartitionReader for FakeReader {
    fn partition_names(&self) -> Vec<String> {
        (0..self.partitions.len())
            .map(|i| format!("group_{i}"))
            .collect()
    }

    fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    async fn read_page(&self, request: &PageRequest) -> Result<Option<Page>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing == Some(request.partition) {
            return Err(MixerError::partition(
                format!("group_{}", request.partition),
                "unavailable",
            ));
        }
        let Some(pages) = self.partitions[request.partition]
            .get(&(request.direction, request.key.clone()))
        else {
            return Ok(None);
        };
        let index = request.page as usize;
        if index >= pages.len() {
            return Err(MixerError::internal(format!(
                "page {index} requested, only {} exist",
                pages.len()
            )));
        }
        Ok(Some(Page {
            entries: pages[index].clone(),
            total_pages: pages.len() as u32,
        }))
    }

    async fn neighbor_types(
        &self,
        direction: Direction,
        node: &str,
        property: &str,
    ) -> Result<Vec<String>> {
        let types: BTreeSet<String> = self
            .partitions
            .iter()
            .flat_map(|p| p.keys())
            .filter(|(d, k)| *d == direction && k.node == node && k.property == property)
            .map(|(_, k)| k.neighbor_type.clone())
            .collect();
        Ok(types.into_iter().collect())
    }

    async fn properties(&self, direction: Direction, node: &str) -> Result<Vec<String>> {
        let props: BTreeSet<String> = self
            .partitions
            .iter()
            .flat_map(|p| p.keys())
            .filter(|(d, k)| *d == direction && k.node == node)
            .map(|(_, k)| k.property.clone())
            .collect();
        Ok(props.into_iter().collect())
    }
}

fn key() -> GraphKey {
    GraphKey::new("n", "p", "")
}

fn dcids(values: &[EntityInfo]) -> Vec<String> {
    values.iter().map(|e| e.dcid.clone()).collect()
}

/// Follows tokens until exhaustion, returning every page of `key()`.
async fn traverse(fetcher: &Fetcher, direction: Direction, limit: usize) -> Vec<Vec<String>> {
    let mut pages = Vec::new();
    let mut token: Option<String> = None;
    for _ in 0..10_000 {
        let mut request = FetchRequest::new(["n"], ["p"], direction).with_limit(limit);
        if let Some(t) = token.take() {
            request = request.with_token(t);
        }
        let result = fetcher.fetch(&request).await.unwrap();
        let page = result
            .merged
            .get(&key())
            .map(|v| dcids(v))
            .unwrap_or_default();
        assert!(page.len() <= limit, "page {page:?} exceeds limit {limit}");
        pages.push(page);
        match result.next_token {
            Some(next) => token = Some(next),
            None => return pages,
        }
    }
    panic!("traversal did not terminate");
}

#[tokio::test]
async fn duplicates_across_partitions_are_consumed_before_the_page_ends() {
    let reader = FakeReader::new(2)
        .with_values(0, Direction::In, &key(), &["a", "a", "b"], 10)
        .with_values(1, Direction::In, &key(), &["a", "c"], 10);
    let fetcher = Fetcher::new(Arc::new(reader));
    let pages = traverse(&fetcher, Direction::In, 1).await;
    assert_eq!(pages, vec![vec!["a"], vec!["b"], vec!["c"]]);
}

#[tokio::test]
async fn outgoing_values_come_from_the_first_partition_with_data() {
    let reader = FakeReader::new(3)
        .with_values(1, Direction::Out, &key(), &["x", "y"], 1)
        .with_values(2, Direction::Out, &key(), &["a", "z"], 1);
    let fetcher = Fetcher::new(Arc::new(reader));
    let result = fetcher
        .fetch(&FetchRequest::new(["n"], ["p"], Direction::Out))
        .await
        .unwrap();
    assert_eq!(dcids(&result.merged[&key()]), vec!["x", "y"]);
    assert!(result.next_token.is_none());

    let pages = traverse(&fetcher, Direction::Out, 1).await;
    assert_eq!(pages, vec![vec!["x"], vec!["y"]]);
}

#[tokio::test]
async fn outgoing_pages_cross_stored_page_boundaries() {
    let reader = FakeReader::new(1).with_values(0, Direction::Out, &key(), &["a", "b", "c"], 2);
    let fetcher = Fetcher::new(Arc::new(reader));
    let pages = traverse(&fetcher, Direction::Out, 1).await;
    assert_eq!(pages, vec![vec!["a"], vec!["b"], vec!["c"]]);
    let pages = traverse(&fetcher, Direction::Out, 2).await;
    assert_eq!(pages, vec![vec!["a", "b"], vec!["c"]]);
}

#[tokio::test]
async fn first_page_is_idempotent() {
    let reader = FakeReader::new(2)
        .with_values(0, Direction::In, &key(), &["a", "c", "e"], 2)
        .with_values(1, Direction::In, &key(), &["b", "d"], 2);
    let fetcher = Fetcher::new(Arc::new(reader));
    let request = FetchRequest::new(["n"], ["p"], Direction::In).with_limit(2);
    let first = fetcher.fetch(&request).await.unwrap();
    let again = fetcher
        .fetch(&request.clone().with_token(""))
        .await
        .unwrap();
    assert_eq!(first, again);
    assert_eq!(dcids(&first.merged[&key()]), vec!["a", "b"]);
    assert!(first.next_token.is_some());
}

#[tokio::test]
async fn neighbors_with_several_types_are_emitted_once() -> Result<()> {
    let mut group = CacheBuilder::new("frequent_2024");
    group.add(
        Triple::node_edge("geoId/x", "containedInPlace", "geoId/06", "State")
            .with_subject_types(["City", "Place"]),
    );
    group.add(
        Triple::node_edge("geoId/y", "containedInPlace", "geoId/06", "State")
            .with_subject_types(["City"]),
    );
    let set = PartitionSet::new(vec![Arc::new(group.build()?) as Arc<dyn Partition>]);
    let fetcher = Fetcher::new(Arc::new(set));
    let result = fetcher
        .fetch(&FetchRequest::new(
            ["geoId/06"],
            ["containedInPlace"],
            Direction::In,
        ))
        .await?;
    let all = result.values("geoId/06", "containedInPlace");
    assert_eq!(dcids(&all), vec!["geoId/x", "geoId/y"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn slow_partitions_fail_with_deadline() {
    let mut reader =
        FakeReader::new(1).with_values(0, Direction::In, &key(), &["a"], 1);
    reader.delay = Some(Duration::from_secs(10));
    let fetcher = Fetcher::new(Arc::new(reader)).with_options(FetchOptions {
        timeout: Some(Duration::from_millis(100)),
        ..FetchOptions::default()
    });
    let err = fetcher
        .fetch(&FetchRequest::new(["n"], ["p"], Direction::In))
        .await
        .unwrap_err();
    assert!(matches!(err, MixerError::DeadlineExceeded(_)), "{err}");
}

#[tokio::test]
async fn partition_failures_fail_the_whole_fetch() {
    let mut reader = FakeReader::new(2)
        .with_values(0, Direction::In, &key(), &["a"], 1)
        .with_values(1, Direction::In, &key(), &["b"], 1);
    reader.failing = Some(1);
    let fetcher = Fetcher::new(Arc::new(reader));
    let err = fetcher
        .fetch(&FetchRequest::new(["n"], ["p"], Direction::In))
        .await
        .unwrap_err();
    assert!(matches!(err, MixerError::Partition { .. }));
}

#[tokio::test]
async fn exhausted_partitions_are_not_read_again() {
    let reader = Arc::new(
        FakeReader::new(2)
            .with_values(0, Direction::In, &key(), &["a"], 1)
            .with_values(1, Direction::In, &key(), &["b", "c", "d"], 1),
    );
    let fetcher = Fetcher::new(reader.clone());
    let first = fetcher
        .fetch(&FetchRequest::new(["n"], ["p"], Direction::In).with_limit(2))
        .await
        .unwrap();
    assert_eq!(dcids(&first.merged[&key()]), vec!["a", "b"]);
    let before = reader.reads.load(Ordering::SeqCst);
    let second = fetcher
        .fetch(
            &FetchRequest::new(["n"], ["p"], Direction::In)
                .with_limit(2)
                .with_token(first.next_token.unwrap()),
        )
        .await
        .unwrap();
    assert_eq!(dcids(&second.merged[&key()]), vec!["c", "d"]);
    // Only partition 1 is read: its resumed page, then page 3.
    assert_eq!(reader.reads.load(Ordering::SeqCst) - before, 2);
    assert!(second.next_token.is_none());
}

#[tokio::test]
async fn local_rows_only_join_the_first_page() {
    let reader = FakeReader::new(1).with_values(0, Direction::In, &key(), &["a", "b", "c"], 1);
    let local = LocalStore::open_in_memory().unwrap();
    local.insert("local/z", "p", "n", "").unwrap();
    let fetcher = Fetcher::new(Arc::new(reader)).with_local(Arc::new(local));

    let first = fetcher
        .fetch(&FetchRequest::new(["n"], ["p"], Direction::In).with_limit(2))
        .await
        .unwrap();
    assert_eq!(dcids(&first.merged[&key()]), vec!["a", "b"]);
    let second = fetcher
        .fetch(
            &FetchRequest::new(["n"], ["p"], Direction::In)
                .with_limit(2)
                .with_token(first.next_token.unwrap()),
        )
        .await
        .unwrap();
    assert_eq!(dcids(&second.merged[&key()]), vec!["c"]);
    assert!(second.next_token.is_none());
}

#[tokio::test]
async fn local_rows_fill_the_room_left_under_the_limit() {
    let reader = FakeReader::new(1).with_values(0, Direction::In, &key(), &["b"], 1);
    let local = LocalStore::open_in_memory().unwrap();
    for subject in ["d", "c", "b", "a"] {
        local.insert(subject, "p", "n", "").unwrap();
    }
    let fetcher = Fetcher::new(Arc::new(reader)).with_local(Arc::new(local));

    let result = fetcher
        .fetch(&FetchRequest::new(["n"], ["p"], Direction::In).with_limit(3))
        .await
        .unwrap();
    let values = &result.merged[&key()];
    assert!(values.len() <= 3);
    assert_eq!(dcids(values), vec!["a", "b", "c"]);
}

/// Follows tokens, returning the type-merged values of `(n, p)` per page.
async fn traverse_values(fetcher: &Fetcher, direction: Direction, limit: usize) -> Vec<String> {
    let mut values = Vec::new();
    let mut token: Option<String> = None;
    for _ in 0..1_000 {
        let mut request = FetchRequest::new(["n"], ["p"], direction).with_limit(limit);
        if let Some(t) = token.take() {
            request = request.with_token(t);
        }
        let result = fetcher.fetch(&request).await.unwrap();
        values.extend(dcids(&result.values("n", "p")));
        match result.next_token {
            Some(next) => token = Some(next),
            None => return values,
        }
    }
    panic!("traversal did not terminate");
}

fn fetcher_over(builder: &CacheBuilder) -> Fetcher {
    let partition: Arc<dyn Partition> = Arc::new(builder.build().unwrap());
    Fetcher::new(Arc::new(PartitionSet::new(vec![partition])))
}

#[tokio::test]
async fn shared_neighbors_are_not_repeated_on_later_pages() {
    let mut group = CacheBuilder::new("frequent_2024").with_page_size(1);
    for (neighbor, types) in [
        ("a", vec!["City"]),
        ("x", vec!["City", "Place"]),
        ("z", vec!["Place"]),
    ] {
        group.add(
            Triple::node_edge("n", "p", neighbor, "").with_object_types(types.iter().copied()),
        );
        group.add(Triple::node_edge(neighbor, "p", "n", "").with_subject_types(types));
    }
    let fetcher = fetcher_over(&group);

    for direction in [Direction::Out, Direction::In] {
        assert_eq!(
            traverse_values(&fetcher, direction, 1).await,
            vec!["a", "x", "z"],
            "{direction}"
        );
    }
}

#[tokio::test]
async fn type_finished_on_an_earlier_page_keeps_suppressing() {
    let mut group = CacheBuilder::new("frequent_2024");
    group.add(Triple::node_edge("x", "p", "n", "").with_subject_types(["City", "Place"]));
    group.add(Triple::node_edge("a", "p", "n", "").with_subject_types(["Place"]));
    group.add(Triple::node_edge("b", "p", "n", "").with_subject_types(["Place"]));
    let fetcher = fetcher_over(&group);

    let first = fetcher
        .fetch(&FetchRequest::new(["n"], ["p"], Direction::In).with_limit(1))
        .await
        .unwrap();
    assert_eq!(dcids(&first.values("n", "p")), vec!["x", "a"]);
    let second = fetcher
        .fetch(
            &FetchRequest::new(["n"], ["p"], Direction::In)
                .with_limit(1)
                .with_token(first.next_token.unwrap()),
        )
        .await
        .unwrap();
    assert_eq!(dcids(&second.values("n", "p")), vec!["b"]);
    assert!(second.next_token.is_none());
}

#[tokio::test]
async fn token_pointing_past_stored_pages_is_rejected() {
    let mut group = CacheBuilder::new("frequent_2024").with_page_size(1);
    group.add(Triple::node_edge("a", "p", "n", ""));
    group.add(Triple::node_edge("b", "p", "n", ""));
    let fetcher = fetcher_over(&group);

    let mut cursors = CursorGroup::fresh(key(), 1);
    if let Some(cursor) = cursors.cursor_mut(0) {
        cursor.page = 9;
    }
    let token = encode(&PaginationInfo::new(Direction::In, vec![cursors])).unwrap();
    let err = fetcher
        .fetch(&FetchRequest::new(["n"], ["p"], Direction::In).with_token(token))
        .await
        .unwrap_err();
    assert!(matches!(err, MixerError::InvalidToken(_)), "{err}");
}

fn sorted_lists() -> impl Strategy<Value = Vec<Vec<String>>> {
    prop::collection::vec(
        prop::collection::vec("[a-f]{1,2}", 0..12).prop_map(|mut v| {
            v.sort();
            v
        }),
        1..4,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn incoming_traversal_returns_each_value_once_in_order(
        lists in sorted_lists(),
        page_size in 1usize..4,
        limit in 1usize..5,
    ) {
        let mut reader = FakeReader::new(lists.len());
        for (partition, list) in lists.iter().enumerate() {
            if list.is_empty() {
                continue;
            }
            let values: Vec<&str> = list.iter().map(String::as_str).collect();
            reader = reader.with_values(partition, Direction::In, &key(), &values, page_size);
        }
        let fetcher = Fetcher::new(Arc::new(reader));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let pages = runtime.block_on(traverse(&fetcher, Direction::In, limit));

        let flat: Vec<String> = pages.into_iter().flatten().collect();
        let expected: Vec<String> = lists
            .iter()
            .flatten()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        prop_assert_eq!(flat, expected);
    }

    #[test]
    fn outgoing_traversal_replays_the_preferred_partition(
        lists in sorted_lists(),
        page_size in 1usize..4,
        limit in 1usize..5,
    ) {
        let mut reader = FakeReader::new(lists.len());
        for (partition, list) in lists.iter().enumerate() {
            if list.is_empty() {
                continue;
            }
            let values: Vec<&str> = list.iter().map(String::as_str).collect();
            reader = reader.with_values(partition, Direction::Out, &key(), &values, page_size);
        }
        let fetcher = Fetcher::new(Arc::new(reader));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let pages = runtime.block_on(traverse(&fetcher, Direction::Out, limit));

        let flat: Vec<String> = pages.into_iter().flatten().collect();
        let expected = lists.iter().find(|l| !l.is_empty()).cloned().unwrap_or_default();
        prop_assert_eq!(flat, expected);
    }
}
