#![allow(missing_docs)]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header::CONTENT_TYPE, Request, StatusCode};
use axum::Router;
use mixer::partition::{CacheBuilder, Partition, PartitionSet, Triple};
use mixer::server::router;
use mixer::Fetcher;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> Router {
    let mut frequent = CacheBuilder::new("frequent_2024").with_page_size(2);
    frequent.add(Triple::value("geoId/06", "name", "California"));
    frequent.add(Triple::node_edge("geoId/06", "containedInPlace", "country/USA", "Country"));
    for city in ["geoId/0644000", "geoId/0667000", "geoId/0668000"] {
        frequent.add(
            Triple::node_edge(city, "containedInPlace", "geoId/06", "State")
                .with_subject_types(["City"]),
        );
    }
    let mut ipcc = CacheBuilder::new("ipcc_50");
    ipcc.add(
        Triple::node_edge("geoId/0699999", "containedInPlace", "geoId/06", "State")
            .with_subject_types(["City"]),
    );
    let partitions: Vec<Arc<dyn Partition>> = vec![
        Arc::new(ipcc.build().unwrap()),
        Arc::new(frequent.build().unwrap()),
    ];
    router(Fetcher::new(Arc::new(PartitionSet::new(partitions))), &[])
}

async fn post(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::post(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn health_lists_partitions_in_preference_order() {
    let response = app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["partitions"], json!(["frequent_2024", "ipcc_50"]));
}

#[tokio::test]
async fn property_values_are_typed_and_complete() {
    let (status, body) = post(
        app(),
        "/v1/property/values",
        json!({"node": "geoId/06", "property": "containedInPlace", "direction": "out"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"values": [{"dcid": "country/USA", "types": ["Country"]}]})
    );
}

#[tokio::test]
async fn incoming_values_page_through_tokens() {
    let app = app();
    let (status, first) = post(
        app.clone(),
        "/v1/property/values",
        json!({
            "node": "geoId/06",
            "property": "containedInPlace",
            "direction": "in",
            "limit": 3,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let dcids: Vec<&str> = first["values"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["dcid"].as_str().unwrap())
        .collect();
    assert_eq!(dcids, vec!["geoId/0644000", "geoId/0667000", "geoId/0668000"]);
    let token = first["next_token"].as_str().unwrap().to_owned();

    let (status, second) = post(
        app,
        "/v1/property/values",
        json!({
            "node": "geoId/06",
            "property": "containedInPlace",
            "direction": "in",
            "limit": 3,
            "next_token": token,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["values"][0]["dcid"], "geoId/0699999");
    assert!(second.get("next_token").is_none());
}

#[tokio::test]
async fn bulk_values_report_every_node() {
    let (status, body) = post(
        app(),
        "/v1/bulk/property/values",
        json!({"nodes": ["geoId/06", "geoId/07"], "property": "name", "direction": "out"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["values"], json!([{"value": "California"}]));
    assert_eq!(body["data"][1], json!({"node": "geoId/07", "values": []}));
}

#[tokio::test]
async fn triples_group_values_by_property() {
    let (status, body) = post(
        app(),
        "/v1/triples",
        json!({"node": "geoId/06", "direction": "out"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["triples"]["name"], json!([{"value": "California"}]));
    assert_eq!(body["triples"]["containedInPlace"][0]["dcid"], "country/USA");
}

#[tokio::test]
async fn bad_direction_is_a_client_error() {
    let (status, body) = post(
        app(),
        "/v1/property/values",
        json!({"node": "geoId/06", "property": "name", "direction": "sideways"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn garbage_token_is_rejected() {
    let (status, body) = post(
        app(),
        "/v1/property/values",
        json!({
            "node": "geoId/06",
            "property": "name",
            "direction": "out",
            "next_token": "not-a-token",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn malformed_node_ids_are_rejected() {
    let (status, body) = post(
        app(),
        "/v1/bulk/property/values",
        json!({"nodes": ["geoId/06", "bad id"], "property": "name", "direction": "out"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_ARGUMENT");
}
