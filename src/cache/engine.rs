//! Resize-on-miss: generate each variant once, serve it many times.
//!
//! A miss takes the per-key lock, re-checks, generates into a temp file and
//! renames it into place. Readers therefore see either no file or the
//! complete one.

use super::disk::DiskCache;
use super::lock::KeyedLocks;
use crate::config::{OutputFormat, RespImgConfig};
use crate::filename::ImageRequest;
use crate::transform::{ImageTransformer, TransformError};
use crate::{RespImgError, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;

/// Whether `ensure_cached` found the variant or produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Generated,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Generated => "write",
        }
    }
}

pub type SaveHook = Arc<dyn Fn(&Path, &ImageRequest) + Send + Sync>;

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Clone)]
pub struct ResizeEngine {
    transformer: Arc<dyn ImageTransformer>,
    cache: DiskCache,
    locks: KeyedLocks,
    allow_upscale: bool,
    max_size: u32,
    quality: u8,
    on_save: Option<SaveHook>,
}

impl ResizeEngine {
    pub fn new(transformer: Arc<dyn ImageTransformer>, cache: DiskCache, config: &RespImgConfig) -> Self {
        Self {
            transformer,
            cache,
            locks: KeyedLocks::new(),
            allow_upscale: config.allow_upscale,
            max_size: config.max_size,
            quality: config.quality,
            on_save: None,
        }
    }

    /// Runs `hook` with the final path after every successful publish.
    pub fn with_save_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Path, &ImageRequest) + Send + Sync + 'static,
    {
        self.on_save = Some(Arc::new(hook));
        self
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    pub fn locks(&self) -> &KeyedLocks {
        &self.locks
    }

    /// Makes sure `cache_path` holds the variant described by `request`.
    ///
    /// Safe to call concurrently for the same key: exactly one caller runs
    /// the transform while the rest wait and then observe the finished file.
    ///
    /// The locked section runs as its own task, so dropping the returned
    /// future does not release the lock or abandon a half-finished publish.
    ///
    /// # Errors
    /// `RespImgError::Resize` when the transform fails. The lock is released,
    /// no file is left at `cache_path` and older versions are kept.
    pub async fn ensure_cached(
        &self,
        request: &ImageRequest,
        source_path: &Path,
        cache_path: &Path,
    ) -> Result<CacheStatus> {
        if exists(cache_path).await? {
            tracing::debug!("Cache hit for {}", request);
            return Ok(CacheStatus::Hit);
        }

        let engine = self.clone();
        let (request, source, target) = (request.clone(), source_path.to_path_buf(), cache_path.to_path_buf());
        tokio::spawn(async move { engine.fill(&request, &source, &target).await })
            .await
            .map_err(|e| RespImgError::Io(std::io::Error::other(e)))?
    }

    /// Lock, re-check, generate, prune and notify for one missing variant.
    async fn fill(&self, request: &ImageRequest, source_path: &Path, cache_path: &Path) -> Result<CacheStatus> {
        let _guard = self.locks.acquire(cache_path).await;
        if exists(cache_path).await? {
            tracing::debug!("Cache filled while waiting for {}", request);
            return Ok(CacheStatus::Hit);
        }

        tracing::info!("Cache miss for {}, generating from {}", request, source_path.display());
        self.generate(request, source_path, cache_path).await?;

        match self.cache.prune_superseded(request).await {
            Ok(0) => {}
            Ok(pruned) => tracing::debug!("Removed {} superseded versions of {}", pruned, request),
            Err(e) => tracing::warn!("Failed to prune old versions of {}: {}", request, e),
        }
        if let Some(hook) = &self.on_save {
            hook(cache_path, request);
        }
        Ok(CacheStatus::Generated)
    }

    async fn generate(&self, request: &ImageRequest, source_path: &Path, cache_path: &Path) -> Result<()> {
        let format = request
            .output_format()
            .ok_or_else(|| RespImgError::MalformedRequest(format!("unsupported output `{}`", request.output_ext)))?;

        if let Some(dir) = cache_path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let temp = temp_path(cache_path);

        let transformer = self.transformer.clone();
        let (source, target) = (source_path.to_path_buf(), temp.clone());
        let (requested, allow_upscale, max_size, quality) =
            (request.width, self.allow_upscale, self.max_size, self.quality);

        let outcome = tokio::task::spawn_blocking(move || {
            render_variant(transformer.as_ref(), &source, &target, requested, allow_upscale, max_size, format, quality)
        })
        .await
        .map_err(|e| RespImgError::Resize(TransformError::Io(std::io::Error::other(e))))
        .and_then(|r| r.map_err(RespImgError::Resize));

        match outcome {
            Ok((width, height)) => {
                if let Err(e) = fs::rename(&temp, cache_path).await {
                    let _ = fs::remove_file(&temp).await;
                    return Err(e.into());
                }
                tracing::info!("Generated {} at {}x{}", cache_path.display(), width, height);
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&temp).await;
                tracing::error!("Resize failed for {}: {}", request, e);
                Err(e)
            }
        }
    }
}

/// Output dimensions for a requested width: no upscaling past the source
/// unless allowed, `max_size` as a hard cap, height from the source aspect.
pub fn target_dimensions(
    requested: u32,
    source: (u32, u32),
    allow_upscale: bool,
    max_size: u32,
) -> (u32, u32) {
    let (src_w, src_h) = source;
    let mut width = requested;
    if !allow_upscale && width > src_w {
        width = src_w;
    }
    if max_size > 0 && width > max_size {
        width = max_size;
    }
    let width = width.max(1);
    let height = if src_w == 0 {
        1
    } else {
        ((width as f64 * src_h as f64 / src_w as f64).round() as u32).max(1)
    };
    (width, height)
}

#[allow(clippy::too_many_arguments)]
fn render_variant(
    transformer: &dyn ImageTransformer,
    source: &Path,
    target: &Path,
    requested: u32,
    allow_upscale: bool,
    max_size: u32,
    format: OutputFormat,
    quality: u8,
) -> std::result::Result<(u32, u32), TransformError> {
    let dims = transformer.dimensions(source)?;
    let (width, height) = target_dimensions(requested, dims, allow_upscale, max_size);
    let bytes = transformer.resize(source, width, height, format, quality)?;
    std::fs::write(target, bytes)?;
    Ok((width, height))
}

fn temp_path(cache_path: &Path) -> PathBuf {
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut name = cache_path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}-{}.tmp", std::process::id(), seq));
    cache_path.with_file_name(name)
}

async fn exists(path: &Path) -> Result<bool> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
