use crate::cache::{CacheStatus, DiskCache, ResizeEngine};
use crate::config::VersioningMethod;
use crate::filename::ImageRequest;
use crate::version::Versioner;
use crate::{RespImgError, Result};
use std::path::PathBuf;
use std::time::SystemTime;

/// A cached variant ready to stream.
#[derive(Debug, Clone)]
pub struct ServedFile {
    pub path: PathBuf,
    pub source_path: PathBuf,
    pub content_type: mime::Mime,
    pub len: u64,
    pub modified: Option<SystemTime>,
    pub etag: String,
    pub status: CacheStatus,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    /// The requested version is stale; the client should go here instead.
    Redirect(String),
    Serve(ServedFile),
}

/// Maps request paths to cached variants, generating them on a miss.
#[derive(Clone)]
pub struct Responder {
    versioner: Versioner,
    engine: ResizeEngine,
}

impl Responder {
    pub fn new(versioner: Versioner, engine: ResizeEngine) -> Self {
        Self { versioner, engine }
    }

    pub fn versioner(&self) -> &Versioner {
        &self.versioner
    }

    pub fn cache(&self) -> &DiskCache {
        self.engine.cache()
    }

    /// Resolves `request_path` (relative to the public prefix).
    ///
    /// # Errors
    /// - `MalformedRequest` if the path does not follow the filename grammar
    /// - `SourceNotFound` if the source image is gone
    /// - `Resize` if generation failed
    pub async fn handle(&self, request_path: &str) -> Result<Outcome> {
        let request = ImageRequest::parse(request_path.trim_start_matches('/'))?;
        tracing::debug!(
            "Parsed request base={} w={} v={} ext={}",
            request.base_path, request.width, request.version, request.output_ext
        );

        // Wall-clock versions never match twice; every token counts as current.
        let current = match self.versioner.method() {
            VersioningMethod::Time => request.version.clone(),
            _ => self.versioner.version(&request.base_path).await?,
        };
        if request.version != current {
            let url = self
                .versioner
                .image_url(&request.base_path, request.width, &request.output_ext, None)
                .await?;
            tracing::debug!("Stale version {} for {}, redirecting to {}", request.version, request.base_path, url);
            return Ok(Outcome::Redirect(url));
        }

        let source = self
            .versioner
            .sources()
            .locate(&request.base_path)
            .await?
            .ok_or_else(|| RespImgError::SourceNotFound(request.base_path.clone()))?;
        let request = request.with_original_ext(source.original_ext.clone());

        let cache = self.engine.cache();
        let cache_path = cache.path_for(&request);
        let status = self.engine.ensure_cached(&request, &source.path, &cache_path).await?;

        let meta = tokio::fs::metadata(&cache_path).await?;
        Ok(Outcome::Serve(ServedFile {
            content_type: crate::cache::content_type_for_path(&cache_path),
            len: meta.len(),
            modified: meta.modified().ok(),
            etag: cache.etag_for(&request),
            path: cache_path,
            source_path: source.path,
            status,
        }))
    }
}
