//! HTTP API scenarios, run against the router with a stubbed vector source.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use super::*;
use crate::config::{SearchConfig, ServerConfig};
use crate::engine::SearchEngine;
use crate::web::{router, ServerState};

const QUERY: &str = "https://img.test/query.jpg";
const IMG_A: &str = "https://img.test/a.jpg";
const IMG_B: &str = "https://img.test/b.jpg";
const IMG_C: &str = "https://img.test/c.jpg";

fn stub_vectors() -> HashMap<String, Vec<f32>> {
    let mut vectors = HashMap::new();
    vectors.insert(QUERY.to_string(), query_vector());
    vectors.insert(IMG_A.to_string(), query_vector());
    vectors.insert(IMG_B.to_string(), near_vector());
    vectors.insert(IMG_C.to_string(), mid_vector());
    vectors
}

fn test_router(stub: StubSource) -> axum::Router {
    let mut catalog = vec![item("a", IMG_A), item("b", IMG_B), item("c", IMG_C)];
    catalog[0]
        .display
        .insert("title".to_string(), serde_json::json!("Linen shirt"));

    let state = ServerState {
        engine: SearchEngine::new(stub, SearchConfig::default(), "clip-v1"),
        catalog: tokio::sync::RwLock::new(catalog),
        dimensions: 20,
        shutdown: CancellationToken::new(),
    };
    router(Arc::new(state), &ServerConfig::default())
}

fn json_post(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn multipart_post(uri: &str, fields: &[(&str, &[u8])]) -> Request<Body> {
    let boundary = "field-boundary";
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n")
                .as_bytes(),
        );
        body.extend_from_slice(value);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn png_bytes() -> Vec<u8> {
    use image::{ImageBuffer, Rgb, RgbImage};
    let img: RgbImage = ImageBuffer::from_fn(48, 48, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut buffer = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buffer, image::ImageFormat::Png).unwrap();
    buffer.into_inner()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_reports_model_and_catalog() {
    let app = test_router(StubSource::new(stub_vectors()));

    let response = app
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["model_version"], "clip-v1");
    assert_eq!(body["catalog_items"], 3);
}

#[tokio::test]
async fn test_search_returns_ranked_rows_with_display_fields() {
    let app = test_router(StubSource::new(stub_vectors()));

    let response = app
        .oneshot(json_post("/api/search", serde_json::json!({ "image_url": QUERY })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let rows = body.as_array().unwrap();
    assert_eq!(rows[0]["id"], "a");
    assert!(rows[0]["score"].as_f64().unwrap() > 0.99);
    // Catalog display fields ride along untouched.
    assert_eq!(rows[0]["title"], "Linen shirt");
    assert_eq!(rows[0]["image"], IMG_A);
}

#[tokio::test]
async fn test_search_respects_limit() {
    let app = test_router(StubSource::new(stub_vectors()));

    let response = app
        .oneshot(json_post(
            "/api/search",
            serde_json::json!({ "image_url": QUERY, "limit": 1 }),
        ))
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_search_without_an_image_is_rejected() {
    let app = test_router(StubSource::new(stub_vectors()));

    let response = app
        .oneshot(json_post("/api/search", serde_json::json!({ "limit": 3 })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("image_url"));
}

#[tokio::test]
async fn test_upload_search_ranks_like_the_json_route() {
    let png = png_bytes();
    // An uploaded body reaches the source as raw bytes.
    let mut vectors = stub_vectors();
    vectors.insert(format!("bytes({})", png.len()), query_vector());
    let app = test_router(StubSource::new(vectors));

    let response = app
        .oneshot(multipart_post("/api/search/upload", &[("image", &png)]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap()[0]["id"], "a");
}

#[tokio::test]
async fn test_upload_without_image_field_is_rejected() {
    let app = test_router(StubSource::new(stub_vectors()));

    let response = app
        .oneshot(multipart_post("/api/search/upload", &[("limit", b"3")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_with_unparsable_limit_is_rejected() {
    let png = png_bytes();
    let app = test_router(StubSource::new(stub_vectors()));

    let response = app
        .oneshot(multipart_post(
            "/api/search/upload",
            &[("image", &png), ("limit", b"three")],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("invalid limit"));
}

#[tokio::test]
async fn test_invalid_base64_is_rejected() {
    let app = test_router(StubSource::new(stub_vectors()));

    let response = app
        .oneshot(json_post(
            "/api/search",
            serde_json::json!({ "image_base64": "not base64!!!" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unusable_query_image_maps_to_unprocessable() {
    let app = test_router(StubSource::new(stub_vectors()).failing_on(QUERY));

    let response = app
        .oneshot(json_post("/api/search", serde_json::json!({ "image_url": QUERY })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("could not process"));
}

#[tokio::test]
async fn test_shutdown_in_progress_returns_service_unavailable() {
    let stub = StubSource::new(stub_vectors());
    let state = ServerState {
        engine: SearchEngine::new(stub, SearchConfig::default(), "clip-v1"),
        catalog: tokio::sync::RwLock::new(vec![item("a", IMG_A)]),
        dimensions: 20,
        shutdown: CancellationToken::new(),
    };
    state.shutdown.cancel();
    let app = router(Arc::new(state), &ServerConfig::default());

    let response = app
        .oneshot(json_post("/api/search", serde_json::json!({ "image_url": QUERY })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
