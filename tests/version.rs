use respimg::config::VersioningMethod;
use respimg::source::{FsSourceStore, SourceStore};
use respimg::version::{Versioner, MISSING_SOURCE_VERSION};
use respimg::RespImgError;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

fn store(root: &Path) -> Arc<dyn SourceStore> {
    Arc::new(FsSourceStore::new(
        root.to_path_buf(),
        vec!["jpg".into(), "png".into()],
    ))
}

fn set_mtime(path: &Path, secs: u64) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(UNIX_EPOCH + Duration::from_secs(secs)).unwrap();
}

#[tokio::test]
async fn test_locate_tries_extensions() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(tmp.path().join("a")).unwrap();
    std::fs::write(tmp.path().join("a/photo.png"), b"x").unwrap();
    let sources = store(tmp.path());

    let found = sources.locate("a/photo").await.unwrap().unwrap();
    assert_eq!(found.path, tmp.path().join("a/photo.png"));
    assert_eq!(found.original_ext.as_deref(), Some("png"));

    let direct = sources.locate("a/photo.png").await.unwrap().unwrap();
    assert_eq!(direct.path, found.path);

    assert!(sources.locate("a/other").await.unwrap().is_none());
    // Directories are not sources.
    assert!(sources.locate("a").await.unwrap().is_none());
}

#[tokio::test]
async fn test_mtime_versions_follow_the_source() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("photo.jpg");
    std::fs::write(&source, b"x").unwrap();
    set_mtime(&source, 1_700_000_000);
    let versioner = Versioner::new(VersioningMethod::Mtime, "1", "/img/", store(tmp.path()));

    assert_eq!(versioner.version("photo").await.unwrap(), "1700000000");
    assert_eq!(
        versioner.image_url("photo", 400, "webp", None).await.unwrap(),
        "/img/photo-w400-v1700000000.webp"
    );

    set_mtime(&source, 1_700_000_100);
    assert_eq!(versioner.version("photo").await.unwrap(), "1700000100");
    assert_eq!(versioner.version("gone").await.unwrap(), MISSING_SOURCE_VERSION);
}

#[tokio::test]
async fn test_content_versions_change_with_bytes_only() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("photo.jpg");
    std::fs::write(&source, b"first").unwrap();
    let versioner = Versioner::new(VersioningMethod::Content, "1", "/img/", store(tmp.path()));

    let first = versioner.version("photo").await.unwrap();
    assert_eq!(first.len(), 16);
    assert!(first.chars().all(|c| c.is_ascii_hexdigit()));

    set_mtime(&source, 1);
    assert_eq!(versioner.version("photo").await.unwrap(), first);

    std::fs::write(&source, b"second").unwrap();
    assert_ne!(versioner.version("photo").await.unwrap(), first);
}

#[tokio::test]
async fn test_app_version_is_shared() {
    let tmp = tempfile::tempdir().unwrap();
    let versioner = Versioner::new(VersioningMethod::App, "3.2", "/static/img/", store(tmp.path()));

    assert_eq!(versioner.version("anything").await.unwrap(), "3.2");
    // The source must exist unless the version is pinned.
    let err = versioner.image_url("anything", 100, "png", None).await.unwrap_err();
    assert!(matches!(err, RespImgError::SourceNotFound(_)));
    assert_eq!(
        versioner.image_url("anything", 100, "png", Some("pinned")).await.unwrap(),
        "/static/img/anything-w100-vpinned.png"
    );
}

#[tokio::test]
async fn test_time_versions_are_current_seconds() {
    let tmp = tempfile::tempdir().unwrap();
    let versioner = Versioner::new(VersioningMethod::Time, "1", "/img/", store(tmp.path()));
    let now = std::time::SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();

    let version: u64 = versioner.version("x").await.unwrap().parse().unwrap();
    assert!(version >= now && version <= now + 5);
}
