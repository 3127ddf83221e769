use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use reel_vault::{
    metadata::SqliteMetadataStore,
    routes::routes::{RouterOptions, app},
    services::registry::{MediaRegistry, RegistrySettings},
    state::AppState,
    storage::{LocalObjectStore, UrlSigner},
};

const BASE: &str = "http://localhost:8000";
const BOUNDARY: &str = "reel-vault-test-boundary";

struct Harness {
    router: Router,
    _dir: TempDir,
}

async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let local = LocalObjectStore::new(dir.path(), UrlSigner::new("integration-secret", BASE).unwrap());

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let metadata = SqliteMetadataStore::new(Arc::new(pool));
    metadata.migrate().await.unwrap();

    let registry = MediaRegistry::new(
        Arc::new(local.clone()),
        Arc::new(metadata),
        RegistrySettings::default(),
    );
    registry.ensure_buckets(false).await.unwrap();

    let router = app(AppState::new(registry, Some(local)), &RouterOptions::default()).unwrap();
    Harness { router, _dir: dir }
}

impl Harness {
    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str) -> Response {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn delete(&self, uri: &str) -> Response {
        self.send(Request::delete(uri).body(Body::empty()).unwrap()).await
    }

    async fn upload(&self, title: &str, movie: &[u8], poster: &[u8]) -> Response {
        let body = multipart_body(title, movie, poster);
        let request = Request::post("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }
}

fn multipart_body(title: &str, movie: &[u8], poster: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\n{title}\r\n",
            b = BOUNDARY
        )
        .as_bytes(),
    );
    for (name, filename, content_type, data) in [
        ("movie", "alpha.mp4", "video/mp4", movie),
        ("poster", "alpha.png", "image/png", poster),
    ] {
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n",
                b = BOUNDARY
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

async fn json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn route_of(url: &str) -> &str {
    url.strip_prefix(BASE).unwrap()
}

fn location(response: &Response) -> String {
    response.headers()[header::LOCATION].to_str().unwrap().to_string()
}

#[tokio::test]
async fn upload_stream_delete_scenario() {
    let h = harness().await;

    let response = h.upload("Alpha", b"AAAA", b"PPPP").await;
    assert_eq!(response.status(), StatusCode::OK);
    let created = json(response).await;
    assert_eq!(created["message"], "Movie uploaded successfully");
    assert_eq!(created["title"], "Alpha");
    let id = created["id"].as_i64().unwrap();
    let stream_url = created["streamURL"].as_str().unwrap().to_string();
    let poster_url = created["posterURL"].as_str().unwrap().to_string();
    assert!(created["createdAt"].is_string());

    let listed = json(h.get("/movies").await).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["title"], "Alpha");
    assert_eq!(json(h.get(&format!("/movies/{}", id)).await).await["id"], id);

    let redirect = h.get(route_of(&stream_url)).await;
    assert_eq!(redirect.status(), StatusCode::FOUND);
    let signed = location(&redirect);
    assert!(signed.contains("signature="));

    let object = h.get(route_of(&signed)).await;
    assert_eq!(object.status(), StatusCode::OK);
    assert_eq!(object.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(text(object).await, "AAAA");

    let poster = h.get(route_of(&location(&h.get(route_of(&poster_url)).await))).await;
    assert_eq!(poster.status(), StatusCode::OK);
    assert_eq!(text(poster).await, "PPPP");

    let deleted = h.delete(&format!("/movies/{}", id)).await;
    assert_eq!(deleted.status(), StatusCode::OK);
    assert_eq!(json(deleted).await["message"], "Movie deleted successfully");

    assert!(json(h.get("/movies").await).await.as_array().unwrap().is_empty());

    let gone = h.get(route_of(&stream_url)).await;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    assert_eq!(json(gone).await["kind"], "not_found");

    assert_eq!(
        h.delete(&format!("/movies/{}", id)).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn signed_urls_support_ranges_and_reject_tampering() {
    let h = harness().await;
    let created = json(h.upload("Range", b"ABCDEFGH", b"P").await).await;
    let stream_url = created["streamURL"].as_str().unwrap().to_string();
    let signed = location(&h.get(route_of(&stream_url)).await);

    let partial = h
        .send(
            Request::get(route_of(&signed))
                .header(header::RANGE, "bytes=2-4")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(partial.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(text(partial).await, "CDE");

    let tampered = signed.replace("signature=", "signature=x");
    let rejected = h.get(route_of(&tampered)).await;
    assert_eq!(rejected.status(), StatusCode::FORBIDDEN);

    let (unsigned, _) = signed.split_once('?').unwrap();
    assert_eq!(h.get(route_of(unsigned)).await.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn upload_validation_is_reported_per_field() {
    let h = harness().await;

    let response = h.upload("   ", b"AAAA", b"PPPP").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json(response).await;
    assert_eq!(body["kind"], "validation");
    assert_eq!(body["field"], "title");
    assert_eq!(body["error"], "Movie title is required");

    assert!(json(h.get("/movies").await).await.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_items_are_not_found() {
    let h = harness().await;
    assert_eq!(h.get("/movies/99").await.status(), StatusCode::NOT_FOUND);
    assert_eq!(h.delete("/movies/99").await.status(), StatusCode::NOT_FOUND);
    assert_eq!(h.get("/posters/nothing.png").await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_checks_report_ready() {
    let h = harness().await;
    assert_eq!(h.get("/healthz").await.status(), StatusCode::OK);
    let ready = h.get("/readyz").await;
    assert_eq!(ready.status(), StatusCode::OK);
    let body = json(ready).await;
    assert_eq!(body["checks"]["bucket:movies"]["ok"], true);
    assert_eq!(body["checks"]["metadata"]["ok"], true);
}

#[tokio::test]
async fn cors_exposes_length_and_allows_head() {
    let h = harness().await;

    let response = h
        .send(
            Request::get("/healthz")
                .header(header::ORIGIN, "http://localhost:3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    let exposed = response.headers()[header::ACCESS_CONTROL_EXPOSE_HEADERS]
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(exposed.contains("content-length"));
    assert!(exposed.contains("content-type"));

    let preflight = h
        .send(
            Request::options("/movies")
                .header(header::ORIGIN, "http://localhost:3000")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "HEAD")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(preflight.status(), StatusCode::OK);
    let allowed = preflight.headers()[header::ACCESS_CONTROL_ALLOW_METHODS]
        .to_str()
        .unwrap();
    assert!(allowed.contains("HEAD"));
}
