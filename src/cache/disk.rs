use crate::filename::ImageRequest;
use crate::Result;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;

/// Statistics about the on-disk cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub entry_count: u64,
    pub total_size_bytes: u64,
}

/// Versioned variant files under a single cache directory.
///
/// Filenames follow the public URL grammar, so a variant's path is derived
/// from its [`ImageRequest`] alone. Bulk purges take no per-key locks and are
/// meant for maintenance windows.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, request: &ImageRequest) -> PathBuf {
        request.cache_path(&self.dir)
    }

    pub fn etag_for(&self, request: &ImageRequest) -> String {
        format!("\"{}\"", request.file_name())
    }

    /// Deletes sibling files of `current` that differ only in version.
    /// Returns how many were removed.
    pub async fn prune_superseded(&self, current: &ImageRequest) -> Result<u64> {
        let current_path = self.path_for(current);
        let Some(parent) = current_path.parent() else { return Ok(0) };
        let mut entries = match fs::read_dir(parent).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path == current_path {
                continue;
            }
            let Some(sibling) = sibling_request(current, &path) else { continue };
            if sibling.same_variant(current) && sibling.version != current.version {
                match fs::remove_file(&path).await {
                    Ok(()) => {
                        tracing::info!("Pruned superseded variant {}", path.display());
                        removed += 1;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => tracing::warn!("Failed to prune {}: {}", path.display(), e),
                }
            }
        }
        Ok(removed)
    }

    /// Deletes every file last modified more than `ttl` ago.
    /// A zero `ttl` disables expiry.
    pub async fn purge_expired(&self, ttl: Duration) -> Result<u64> {
        if ttl.is_zero() {
            return Ok(0);
        }
        let cutoff = SystemTime::now().checked_sub(ttl).unwrap_or(SystemTime::UNIX_EPOCH);
        let removed = self
            .sweep(move |_, meta| meta.modified().map(|m| m < cutoff).unwrap_or(false))
            .await?;
        tracing::info!("Expired {} cached variants older than {:?}", removed, ttl);
        Ok(removed)
    }

    /// Deletes every cached variant of one source image.
    pub async fn purge_image(&self, base_path: &str) -> Result<u64> {
        let anchor = ImageRequest::new(base_path, 1, "0", "webp")?;
        let parent = self.path_for(&anchor).parent().map(Path::to_path_buf).unwrap_or_else(|| self.dir.clone());

        let mut entries = match fs::read_dir(&parent).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let matches = sibling_request(&anchor, &path).is_some_and(|r| r.base_path == anchor.base_path);
            if !matches {
                continue;
            }
            match entry.file_type().await {
                Ok(file_type) if file_type.is_file() => {}
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::info!("Purged {} cached variants of {}", removed, base_path);
        Ok(removed)
    }

    /// Deletes every file in the cache tree. Directories are kept.
    pub async fn purge_all(&self) -> Result<u64> {
        let removed = self.sweep(|_, _| true).await?;
        tracing::info!("Purged {} cached files", removed);
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let dir = self.dir.clone();
        let stats = tokio::task::spawn_blocking(move || {
            let mut stats = CacheStats::default();
            walk(&dir, &mut |_, meta| {
                stats.entry_count += 1;
                stats.total_size_bytes += meta.len();
                Ok(())
            })?;
            Ok::<_, std::io::Error>(stats)
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(stats)
    }

    /// Removes every file under the cache dir for which `doomed` holds.
    async fn sweep<F>(&self, doomed: F) -> Result<u64>
    where
        F: Fn(&Path, &std::fs::Metadata) -> bool + Send + 'static,
    {
        let dir = self.dir.clone();
        let removed = tokio::task::spawn_blocking(move || {
            let mut removed = 0u64;
            walk(&dir, &mut |path, meta| {
                if doomed(path, meta) {
                    match std::fs::remove_file(path) {
                        Ok(()) => removed += 1,
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(())
            })?;
            Ok::<_, std::io::Error>(removed)
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(removed)
    }
}

/// Parses a file next to `anchor`'s variant as a request in the same directory.
fn sibling_request(anchor: &ImageRequest, path: &Path) -> Option<ImageRequest> {
    let name = path.file_name()?.to_str()?;
    let relative = match anchor.base_path.rsplit_once('/') {
        Some((dir, _)) => format!("{}/{}", dir, name),
        None => name.to_string(),
    };
    ImageRequest::parse(&relative).ok()
}

/// Depth-first visit of every regular file under `dir`. A missing root is empty.
fn walk(
    dir: &Path,
    visit: &mut dyn FnMut(&Path, &std::fs::Metadata) -> std::io::Result<()>,
) -> std::io::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(&path, visit)?;
        } else if file_type.is_file() {
            let meta = entry.metadata()?;
            visit(&path, &meta)?;
        }
    }
    Ok(())
}
