use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upload {
    pub id: Uuid,
    pub length: usize,
}

pub type Db = Arc<RwLock<HashMap<Uuid, Vec<u8>>>>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(HashMap::new()));
    Router::new()
        .route("/bytes/{len}", get(ranged_bytes))
        .route("/norange/{len}", get(plain_bytes))
        .route("/status/{code}", get(status))
        .route("/echo", post(echo).put(echo).patch(echo))
        .route("/headers", get(request_headers))
        .route("/dup-headers", get(dup_headers))
        .route("/redirect/{hops}", get(redirect))
        .route("/uploads", post(create_upload))
        .route("/uploads/{id}", get(get_upload))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

/// Deterministic body of `len` bytes: `abc...zabc...`.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| b'a' + (i % 26) as u8).collect()
}

/// Start offset of an open-ended `Range: bytes=N-` header.
fn range_start(headers: &HeaderMap) -> Option<usize> {
    let value = headers.get(header::RANGE)?.to_str().ok()?;
    value
        .trim()
        .strip_prefix("bytes=")?
        .strip_suffix('-')?
        .parse()
        .ok()
}

async fn ranged_bytes(Path(len): Path<usize>, headers: HeaderMap) -> Response {
    let body = pattern(len);
    match range_start(&headers) {
        None => body.into_response(),
        Some(start) if start >= len => (
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(header::CONTENT_RANGE, format!("bytes */{len}"))],
        )
            .into_response(),
        Some(start) => (
            StatusCode::PARTIAL_CONTENT,
            [(header::CONTENT_RANGE, format!("bytes {start}-{}/{len}", len - 1))],
            body[start..].to_vec(),
        )
            .into_response(),
    }
}

async fn plain_bytes(Path(len): Path<usize>) -> Vec<u8> {
    pattern(len)
}

async fn status(Path(code): Path<u16>) -> Response {
    match StatusCode::from_u16(code) {
        Ok(status) => (status, format!("status {code}")).into_response(),
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn echo(headers: HeaderMap, body: Bytes) -> Response {
    let mut response = body.into_response();
    if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, content_type.clone());
    }
    response
}

async fn request_headers(headers: HeaderMap) -> Json<BTreeMap<String, String>> {
    let mut seen: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in &headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        seen.entry(name.as_str().to_string())
            .and_modify(|joined| {
                joined.push_str(", ");
                joined.push_str(&value);
            })
            .or_insert(value);
    }
    Json(seen)
}

async fn dup_headers() -> Response {
    let mut response = "dup".into_response();
    let headers = response.headers_mut();
    headers.append("x-dup", HeaderValue::from_static("one"));
    headers.append("x-dup", HeaderValue::from_static("two"));
    response
}

async fn redirect(Path(hops): Path<u32>) -> Redirect {
    if hops == 0 {
        Redirect::temporary("/bytes/10")
    } else {
        Redirect::temporary(&format!("/redirect/{}", hops - 1))
    }
}

async fn create_upload(State(db): State<Db>, body: Bytes) -> (StatusCode, Json<Upload>) {
    let upload = Upload {
        id: Uuid::new_v4(),
        length: body.len(),
    };
    db.write().await.insert(upload.id, body.to_vec());
    (StatusCode::CREATED, Json(upload))
}

async fn get_upload(State(db): State<Db>, Path(id): Path<Uuid>) -> Result<Vec<u8>, StatusCode> {
    let uploads = db.read().await;
    uploads.get(&id).cloned().ok_or(StatusCode::NOT_FOUND)
}
