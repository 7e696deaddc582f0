use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use respimg::config::RespImgConfig;
use respimg::{router, AppState};
use serde_json::Value;
use std::path::Path;
use tower::util::ServiceExt; // for `oneshot`

/// Helper to create a service over a temp source and cache dir
fn test_app(tmp: &Path) -> Router {
    let source_dir = tmp.join("src");
    std::fs::create_dir_all(source_dir.join("gallery")).unwrap();
    image::DynamicImage::new_rgb8(1200, 800)
        .save(source_dir.join("photo.png"))
        .unwrap();
    image::DynamicImage::new_rgb8(300, 600)
        .save(source_dir.join("gallery/tall.png"))
        .unwrap();
    std::fs::write(source_dir.join("broken.png"), b"definitely not an image").unwrap();

    let cfg = RespImgConfig {
        source_dir,
        cache_dir: tmp.join("cache"),
        debug_headers: true,
        ..RespImgConfig::default()
    };
    router(AppState::new(cfg))
}

fn mtime_version(path: &Path) -> u64 {
    std::fs::metadata(path)
        .unwrap()
        .modified()
        .unwrap()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

async fn get(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn post(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn test_serves_generated_variant_then_hit() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(tmp.path());
    let version = mtime_version(&tmp.path().join("src/photo.png"));
    let uri = format!("/img/photo-w400-v{}.webp", version);

    let response = get(&app, &uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/webp");
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "public, max-age=31536000, immutable"
    );
    assert_eq!(
        response.headers()[header::ETAG].to_str().unwrap(),
        format!("\"photo-w400-v{}.webp\"", version)
    );
    assert!(response.headers().contains_key(header::LAST_MODIFIED));
    assert_eq!(response.headers()["x-respimg-cache"], "write");

    let body = body_bytes(response).await;
    let decoded = image::load_from_memory(&body).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (400, 267));
    assert!(tmp.path().join(format!("cache/photo-w400-v{}.webp", version)).exists());

    let response = get(&app, &uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-respimg-cache"], "hit");
    assert_eq!(body_bytes(response).await, body);
}

#[tokio::test]
async fn test_width_beyond_source_is_capped() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(tmp.path());
    let version = mtime_version(&tmp.path().join("src/gallery/tall.png"));

    let response = get(&app, &format!("/img/gallery/tall-w900-v{}.png", version)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

    let decoded = image::load_from_memory(&body_bytes(response).await).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (300, 600));
}

#[tokio::test]
async fn test_stale_version_redirects() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(tmp.path());
    let version = mtime_version(&tmp.path().join("src/photo.png"));

    let response = get(&app, "/img/photo-w400-v1.webp").await;
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        response.headers()[header::LOCATION].to_str().unwrap(),
        format!("/img/photo-w400-v{}.webp", version)
    );
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "no-store, no-cache, must-revalidate"
    );
    // Nothing is generated for a stale request.
    assert!(!tmp.path().join("cache/photo-w400-v1.webp").exists());
}

#[tokio::test]
async fn test_malformed_request_is_bad_request() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(tmp.path());

    for uri in ["/img/photo.webp", "/img/photo-w400-v1.gif", "/img/photo-wabc-v1.webp"] {
        let response = get(&app, uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
    }
}

#[tokio::test]
async fn test_missing_source_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(tmp.path());

    for uri in ["/img/nothing-w400-v0.webp", "/img/nothing-w400-v123.webp"] {
        let response = get(&app, uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
    }
}

#[tokio::test]
async fn test_undecodable_source_is_unprocessable() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(tmp.path());
    let version = mtime_version(&tmp.path().join("src/broken.png"));

    let response = get(&app, &format!("/img/broken-w400-v{}.webp", version)).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(std::fs::read_dir(tmp.path().join("cache")).unwrap().count(), 0);
}

#[tokio::test]
async fn test_health_check() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(tmp.path());

    let response = get(&app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "respimg");
}

#[tokio::test]
async fn test_stats_and_purge() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(tmp.path());
    let version = mtime_version(&tmp.path().join("src/photo.png"));
    for width in [200, 400] {
        let response = get(&app, &format!("/img/photo-w{}-v{}.jpg", width, version)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let stats = body_json(get(&app, "/stats/cache").await).await;
    assert_eq!(stats["cache"]["entry_count"], 2);
    assert_eq!(stats["requests"]["generated"], 2);

    let response = post(&app, "/admin/purge/image?path=photo").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["deleted"], 2);

    let response = post(&app, "/admin/purge/image?path=../etc").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post(&app, "/admin/purge/all").await;
    assert_eq!(body_json(response).await["deleted"], 0);

    // TTL of zero keeps everything.
    let response = post(&app, "/admin/purge/expired").await;
    assert_eq!(body_json(response).await["deleted"], 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(tmp.path());
    get(&app, "/img/photo-w400-v1.webp").await;

    let response = get(&app, "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(text.contains("respimg_redirects_total 1"));
    assert!(text.contains("# TYPE respimg_cache_hits_total counter"));
}

#[tokio::test]
async fn test_render_endpoint() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(tmp.path());
    let version = mtime_version(&tmp.path().join("src/photo.png"));

    let response = get(&app, "/render?file=photo&widths=half&alt=A%20photo").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;

    let html = json["html"].as_str().unwrap();
    assert!(html.starts_with("<picture>"));
    assert!(html.contains("media=\"(min-width: 1400px)\""));
    assert!(html.contains("alt=\"A photo\""));
    assert!(html.contains(&format!("/img/photo-w660-v{}.webp, /img/photo-w990-v{}.webp 1.5x", version, version)));

    let urls = json["urls"].as_array().unwrap();
    assert!(!urls.is_empty());
    for url in urls {
        let url = url.as_str().unwrap();
        assert!(url.starts_with("/img/photo-w"));
        assert!(url.ends_with(&format!("-v{}.webp", version)));
    }

    // Every rendered URL resolves to a 200.
    let first = urls[0].as_str().unwrap().to_string();
    assert_eq!(get(&app, &first).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_render_missing_source_gives_placeholder() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(tmp.path());

    let response = get(&app, "/render?file=nope").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["html"].as_str().unwrap().starts_with("<svg"));
    assert!(json["urls"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_render_rejects_unknown_options() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(tmp.path());

    let response = get(&app, "/render?file=photo&colour=red").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = get(&app, "/render?file=photo&max_resolution=0.5").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_app_version_redirect_in_subdirectory() {
    let tmp = tempfile::tempdir().unwrap();
    let source_dir = tmp.path().join("src/products");
    std::fs::create_dir_all(&source_dir).unwrap();
    image::DynamicImage::new_rgb8(800, 800)
        .save(source_dir.join("photo.png"))
        .unwrap();
    let cfg = RespImgConfig {
        source_dir: tmp.path().join("src"),
        cache_dir: tmp.path().join("cache"),
        versioning: respimg::config::VersioningMethod::App,
        app_version: "200".into(),
        ..RespImgConfig::default()
    };
    let app = router(AppState::new(cfg));

    let response = get(&app, "/img/products/photo-w600-v100.webp").await;
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.headers()[header::LOCATION], "/img/products/photo-w600-v200.webp");

    let response = get(&app, "/img/products/photo-w600-v200.webp").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.headers().contains_key("x-respimg-cache"));
    assert!(tmp.path().join("cache/products/photo-w600-v200.webp").exists());
}

#[tokio::test]
async fn test_render_undecodable_source_gives_placeholder() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(tmp.path());

    let response = get(&app, "/render?file=broken").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let html = json["html"].as_str().unwrap();
    assert!(html.starts_with("<svg"));
    assert!(html.contains("Failed to load image broken"));
    assert!(json["urls"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_render_rejects_runaway_density_ranges() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(tmp.path());

    let response = get(&app, "/render?file=photo&max_resolution=1.0002&resolution_step=0.00001").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
