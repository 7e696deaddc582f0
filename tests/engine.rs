use respimg::cache::engine::target_dimensions;
use respimg::cache::{CacheStatus, DiskCache, ResizeEngine};
use respimg::config::{OutputFormat, RespImgConfig};
use respimg::filename::ImageRequest;
use respimg::transform::{ImageTransformer, TransformError};
use respimg::RespImgError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Counts resizes and writes a fixed payload, optionally failing.
#[derive(Default)]
struct CountingTransformer {
    calls: AtomicUsize,
    fail: AtomicBool,
    delay: Option<Duration>,
}

impl ImageTransformer for CountingTransformer {
    fn dimensions(&self, _source: &Path) -> Result<(u32, u32), TransformError> {
        Ok((1200, 800))
    }

    fn resize(
        &self,
        _source: &Path,
        width: u32,
        height: u32,
        format: OutputFormat,
        _quality: u8,
    ) -> Result<Vec<u8>, TransformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransformError::Decode("corrupt source".into()));
        }
        Ok(format!("{}x{} {}", width, height, format).into_bytes())
    }
}

struct Fixture {
    _tmp: tempfile::TempDir,
    source: PathBuf,
    cache_dir: PathBuf,
    transformer: Arc<CountingTransformer>,
    engine: ResizeEngine,
}

fn fixture(transformer: CountingTransformer) -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("photo.png");
    std::fs::write(&source, b"not really a png").unwrap();
    let cache_dir = tmp.path().join("cache");
    let transformer = Arc::new(transformer);
    let engine = ResizeEngine::new(
        transformer.clone(),
        DiskCache::new(cache_dir.clone()),
        &RespImgConfig::default(),
    );
    Fixture { _tmp: tmp, source, cache_dir, transformer, engine }
}

fn cached_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[tokio::test]
async fn test_second_call_is_a_hit() {
    let fx = fixture(CountingTransformer::default());
    let req = ImageRequest::new("photo", 400, "1", "webp").unwrap();
    let path = fx.engine.cache().path_for(&req);

    let first = fx.engine.ensure_cached(&req, &fx.source, &path).await.unwrap();
    let second = fx.engine.ensure_cached(&req, &fx.source, &path).await.unwrap();

    assert_eq!(first, CacheStatus::Generated);
    assert_eq!(second, CacheStatus::Hit);
    assert_eq!(fx.transformer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read(&path).unwrap(), b"400x267 webp");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_transform_once() {
    let fx = fixture(CountingTransformer {
        delay: Some(Duration::from_millis(50)),
        ..Default::default()
    });
    let req = ImageRequest::new("photo", 600, "1", "webp").unwrap();
    let path = fx.engine.cache().path_for(&req);

    let calls = (0..16).map(|_| {
        let engine = fx.engine.clone();
        let (req, source, path) = (req.clone(), fx.source.clone(), path.clone());
        tokio::spawn(async move { engine.ensure_cached(&req, &source, &path).await })
    });
    let results = futures::future::join_all(calls).await;

    let generated = results
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .filter(|s| *s == CacheStatus::Generated)
        .count();
    assert_eq!(generated, 1);
    assert_eq!(fx.transformer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(cached_files(&fx.cache_dir), vec!["photo-w600-v1.webp"]);
    assert_eq!(fx.engine.locks().active(), 0);
}

#[tokio::test]
async fn test_new_version_prunes_the_old_one() {
    let fx = fixture(CountingTransformer::default());
    let v1 = ImageRequest::new("photo", 400, "1", "webp").unwrap();
    let v2 = ImageRequest::new("photo", 400, "2", "webp").unwrap();
    let other_width = ImageRequest::new("photo", 800, "1", "webp").unwrap();
    let other_image = ImageRequest::new("photograph", 400, "1", "webp").unwrap();

    for req in [&v1, &other_width, &other_image] {
        let path = fx.engine.cache().path_for(req);
        fx.engine.ensure_cached(req, &fx.source, &path).await.unwrap();
    }
    let path = fx.engine.cache().path_for(&v2);
    fx.engine.ensure_cached(&v2, &fx.source, &path).await.unwrap();

    assert_eq!(
        cached_files(&fx.cache_dir),
        vec!["photo-w400-v2.webp", "photo-w800-v1.webp", "photograph-w400-v1.webp"]
    );
}

#[tokio::test]
async fn test_failed_transform_leaves_nothing_and_retries() {
    let fx = fixture(CountingTransformer::default());
    let old = ImageRequest::new("photo", 400, "1", "webp").unwrap();
    let old_path = fx.engine.cache().path_for(&old);
    fx.engine.ensure_cached(&old, &fx.source, &old_path).await.unwrap();

    fx.transformer.fail.store(true, Ordering::SeqCst);
    let req = ImageRequest::new("photo", 400, "2", "webp").unwrap();
    let path = fx.engine.cache().path_for(&req);

    let err = fx.engine.ensure_cached(&req, &fx.source, &path).await.unwrap_err();
    assert!(matches!(err, RespImgError::Resize(ref e) if e.is_decode()));
    assert!(!path.exists());
    // The previous version survives a failed publish; no temp files remain.
    assert_eq!(cached_files(&fx.cache_dir), vec!["photo-w400-v1.webp"]);
    assert_eq!(fx.engine.locks().active(), 0);

    fx.transformer.fail.store(false, Ordering::SeqCst);
    let status = fx.engine.ensure_cached(&req, &fx.source, &path).await.unwrap();
    assert_eq!(status, CacheStatus::Generated);
    assert_eq!(fx.transformer.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_save_hook_sees_published_file() {
    let fx = fixture(CountingTransformer::default());
    let saved: Arc<Mutex<Vec<(PathBuf, String)>>> = Arc::default();
    let engine = {
        let saved = saved.clone();
        fx.engine.clone().with_save_hook(move |path, req| {
            assert!(path.exists());
            saved.lock().unwrap().push((path.to_path_buf(), req.file_name()));
        })
    };

    let req = ImageRequest::new("nested/dir/photo", 300, "9", "png").unwrap();
    let path = engine.cache().path_for(&req);
    engine.ensure_cached(&req, &fx.source, &path).await.unwrap();
    engine.ensure_cached(&req, &fx.source, &path).await.unwrap();

    let saved = saved.lock().unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0], (path, "nested/dir/photo-w300-v9.png".to_string()));
}

#[test]
fn test_target_dimensions_respect_source_and_cap() {
    // Never upscale by default.
    assert_eq!(target_dimensions(2000, (1200, 800), false, 3000), (1200, 800));
    assert_eq!(target_dimensions(600, (1200, 800), false, 3000), (600, 400));
    assert_eq!(target_dimensions(2000, (1200, 800), true, 3000), (2000, 1333));
    // The cap applies even with upscaling on.
    assert_eq!(target_dimensions(5000, (1200, 800), true, 3000), (3000, 2000));
    assert_eq!(target_dimensions(5000, (1200, 800), true, 0), (5000, 3333));
    assert_eq!(target_dimensions(10, (4000, 10), false, 0), (10, 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_caller_does_not_release_the_key() {
    let fx = fixture(CountingTransformer {
        delay: Some(Duration::from_millis(300)),
        ..Default::default()
    });
    let req = ImageRequest::new("photo", 600, "1", "webp").unwrap();
    let path = fx.engine.cache().path_for(&req);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        fx.engine.ensure_cached(&req, &fx.source, &path),
    )
    .await;
    assert!(abandoned.is_err());

    // Waits for the in-flight generation instead of starting another one.
    let status = fx.engine.ensure_cached(&req, &fx.source, &path).await.unwrap();
    assert_eq!(status, CacheStatus::Hit);
    assert_eq!(fx.transformer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(cached_files(&fx.cache_dir), vec!["photo-w600-v1.webp"]);
    assert_eq!(fx.engine.locks().active(), 0);
}

#[tokio::test]
async fn test_prune_in_nested_directory() {
    let fx = fixture(CountingTransformer::default());
    for (base, version) in [("shop/photo", "1"), ("other/photo", "1"), ("shop/photo", "2")] {
        let req = ImageRequest::new(base, 400, version, "webp").unwrap();
        let path = fx.engine.cache().path_for(&req);
        fx.engine.ensure_cached(&req, &fx.source, &path).await.unwrap();
    }

    assert_eq!(cached_files(&fx.cache_dir.join("shop")), vec!["photo-w400-v2.webp"]);
    assert_eq!(cached_files(&fx.cache_dir.join("other")), vec!["photo-w400-v1.webp"]);
}
