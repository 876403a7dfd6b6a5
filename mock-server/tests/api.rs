use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, pattern, Upload};
use tower::ServiceExt;

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn get(uri: &str) -> Request<String> {
    Request::builder().uri(uri).body(String::new()).unwrap()
}

fn get_range(uri: &str, range: &str) -> Request<String> {
    Request::builder()
        .uri(uri)
        .header(http::header::RANGE, range)
        .body(String::new())
        .unwrap()
}

// --- bytes ---

#[tokio::test]
async fn bytes_without_range_returns_full_body() {
    let resp = app().oneshot(get("/bytes/10")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_bytes(resp).await, pattern(10));
}

#[tokio::test]
async fn bytes_with_range_returns_partial_content() {
    let resp = app().oneshot(get_range("/bytes/150", "bytes=100-")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.headers()[http::header::CONTENT_RANGE], "bytes 100-149/150");
    assert_eq!(body_bytes(resp).await, pattern(150)[100..].to_vec());
}

#[tokio::test]
async fn bytes_with_range_past_end_returns_416() {
    let resp = app().oneshot(get_range("/bytes/100", "bytes=100-")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(resp.headers()[http::header::CONTENT_RANGE], "bytes */100");
}

#[tokio::test]
async fn norange_ignores_range_header() {
    let resp = app().oneshot(get_range("/norange/20", "bytes=5-")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_bytes(resp).await, pattern(20));
}

// --- status ---

#[tokio::test]
async fn status_route_returns_requested_code() {
    let resp = app().oneshot(get("/status/404")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_bytes(resp).await, "status 404");
}

#[tokio::test]
async fn status_route_rejects_invalid_code() {
    let resp = app().oneshot(get("/status/42")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// --- echo and headers ---

#[tokio::test]
async fn echo_returns_body_and_content_type() {
    let resp = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/echo")
                .header(http::header::CONTENT_TYPE, "text/plain")
                .body("hello".to_string())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[http::header::CONTENT_TYPE], "text/plain");
    assert_eq!(body_bytes(resp).await, "hello");
}

#[tokio::test]
async fn headers_route_reports_request_headers() {
    let resp = app()
        .oneshot(
            Request::builder()
                .uri("/headers")
                .header("x-token", "abc")
                .header("x-multi", "1")
                .header("x-multi", "2")
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let seen: std::collections::BTreeMap<String, String> = body_json(resp).await;
    assert_eq!(seen["x-token"], "abc");
    assert_eq!(seen["x-multi"], "1, 2");
}

#[tokio::test]
async fn dup_headers_sends_repeated_values() {
    let resp = app().oneshot(get("/dup-headers")).await.unwrap();
    let values: Vec<_> = resp.headers().get_all("x-dup").iter().collect();
    assert_eq!(values, ["one", "two"]);
}

#[tokio::test]
async fn redirect_chain_ends_at_bytes() {
    let resp = app().oneshot(get("/redirect/2")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(resp.headers()[http::header::LOCATION], "/redirect/1");

    let resp = app().oneshot(get("/redirect/0")).await.unwrap();
    assert_eq!(resp.headers()[http::header::LOCATION], "/bytes/10");
}

// --- uploads ---

#[tokio::test]
async fn get_unknown_upload_returns_404() {
    let resp = app()
        .oneshot(get("/uploads/00000000-0000-0000-0000-000000000000"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_lifecycle() {
    use tower::Service;

    let mut app = app().into_service();

    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(
            Request::builder()
                .method("POST")
                .uri("/uploads")
                .body("payload".to_string())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let upload: Upload = body_json(resp).await;
    assert_eq!(upload.length, 7);

    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(get(&format!("/uploads/{}", upload.id)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_bytes(resp).await, "payload");
}
