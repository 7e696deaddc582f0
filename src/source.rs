use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;
use tokio::fs;

/// A source image found on the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Extension of the file actually found, lowercased.
    pub original_ext: Option<String>,
}

/// Read-only access to original images.
#[async_trait::async_trait]
pub trait SourceStore: Send + Sync {
    /// Resolves a base path to an existing file.
    async fn locate(&self, base_path: &str) -> std::io::Result<Option<SourceFile>>;

    async fn modified(&self, path: &Path) -> std::io::Result<SystemTime>;

    async fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;
}

/// Sources laid out under a single directory.
///
/// `base_path` is tried as-is first, then with each configured extension
/// appended, so `products/photo` finds `products/photo.jpg`.
pub struct FsSourceStore {
    root: PathBuf,
    extensions: Vec<String>,
}

impl FsSourceStore {
    pub fn new(root: PathBuf, extensions: Vec<String>) -> Self {
        Self { root, extensions }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn is_file(path: &Path) -> std::io::Result<bool> {
        match fs::metadata(path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait::async_trait]
impl SourceStore for FsSourceStore {
    async fn locate(&self, base_path: &str) -> std::io::Result<Option<SourceFile>> {
        let direct = self.root.join(base_path.trim_start_matches('/'));
        if Self::is_file(&direct).await? {
            let original_ext = direct
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase());
            return Ok(Some(SourceFile { path: direct, original_ext }));
        }
        for ext in &self.extensions {
            let candidate = self.root.join(format!("{}.{}", base_path.trim_start_matches('/'), ext));
            if Self::is_file(&candidate).await? {
                return Ok(Some(SourceFile {
                    path: candidate,
                    original_ext: Some(ext.to_ascii_lowercase()),
                }));
            }
        }
        Ok(None)
    }

    async fn modified(&self, path: &Path) -> std::io::Result<SystemTime> {
        fs::metadata(path).await?.modified()
    }

    async fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        fs::read(path).await
    }
}

/// Intrinsic dimensions of a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMeta {
    pub width: u32,
    pub height: u32,
}

/// Lookup of source dimensions, so repeated renders of one image decode its
/// header only once.
pub trait MetaCache: Send + Sync {
    fn get(&self, key: &str) -> Option<ImageMeta>;
    fn put(&self, key: &str, meta: ImageMeta);
}

#[derive(Debug, Default)]
pub struct InMemoryMetaCache {
    entries: Mutex<HashMap<String, ImageMeta>>,
}

impl InMemoryMetaCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetaCache for InMemoryMetaCache {
    fn get(&self, key: &str) -> Option<ImageMeta> {
        self.entries.lock().ok()?.get(key).copied()
    }

    fn put(&self, key: &str, meta: ImageMeta) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), meta);
        }
    }
}

/// Normalized metadata cache key for a source path.
pub fn meta_key(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}
