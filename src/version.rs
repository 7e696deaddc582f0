use crate::config::VersioningMethod;
use crate::filename::ImageRequest;
use crate::source::SourceStore;
use crate::{RespImgError, Result};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Version reported for a missing source under `mtime` and `content`.
pub const MISSING_SOURCE_VERSION: &str = "0";

/// Hex digits of the source digest kept by the `content` method.
const CONTENT_VERSION_LEN: usize = 16;

/// Derives freshness tokens and builds versioned public URLs.
#[derive(Clone)]
pub struct Versioner {
    method: VersioningMethod,
    app_version: String,
    public_url_prefix: String,
    sources: Arc<dyn SourceStore>,
}

impl Versioner {
    pub fn new(
        method: VersioningMethod,
        app_version: impl Into<String>,
        public_url_prefix: impl Into<String>,
        sources: Arc<dyn SourceStore>,
    ) -> Self {
        Self {
            method,
            app_version: app_version.into(),
            public_url_prefix: public_url_prefix.into(),
            sources,
        }
    }

    pub fn method(&self) -> VersioningMethod {
        self.method
    }

    pub fn sources(&self) -> &Arc<dyn SourceStore> {
        &self.sources
    }

    /// The current version token for `base_path`.
    pub async fn version(&self, base_path: &str) -> Result<String> {
        match self.method {
            VersioningMethod::App => Ok(self.app_version.clone()),
            VersioningMethod::Time => Ok(unix_secs(SystemTime::now()).to_string()),
            VersioningMethod::Mtime => match self.sources.locate(base_path).await? {
                Some(src) => Ok(unix_secs(self.sources.modified(&src.path).await?).to_string()),
                None => Ok(MISSING_SOURCE_VERSION.to_string()),
            },
            VersioningMethod::Content => match self.sources.locate(base_path).await? {
                Some(src) => {
                    let bytes = self.sources.read(&src.path).await?;
                    let digest = hex::encode(Sha256::digest(&bytes));
                    Ok(digest[..CONTENT_VERSION_LEN].to_string())
                }
                None => Ok(MISSING_SOURCE_VERSION.to_string()),
            },
        }
    }

    /// Builds the request for `base_path` at `width`, with the current version
    /// unless `override_version` pins one.
    ///
    /// # Errors
    /// `SourceNotFound` when no override is given and the source is missing.
    pub async fn request_for(
        &self,
        base_path: &str,
        width: u32,
        output_ext: &str,
        override_version: Option<&str>,
    ) -> Result<ImageRequest> {
        let version = match override_version {
            Some(v) => v.to_string(),
            None => {
                let source = self
                    .sources
                    .locate(base_path)
                    .await?
                    .ok_or_else(|| RespImgError::SourceNotFound(base_path.to_string()))?;
                tracing::trace!("Resolved source {} for {}", source.path.display(), base_path);
                self.version(base_path).await?
            }
        };
        ImageRequest::new(base_path, width, version, output_ext)
    }

    /// Public URL of one variant: `{prefix}{base_path}-w{width}-v{version}.{ext}`.
    pub async fn image_url(
        &self,
        base_path: &str,
        width: u32,
        output_ext: &str,
        override_version: Option<&str>,
    ) -> Result<String> {
        let request = self.request_for(base_path, width, output_ext, override_version).await?;
        Ok(self.url_for(&request))
    }

    pub fn url_for(&self, request: &ImageRequest) -> String {
        format!("{}{}", self.public_url_prefix, request.file_name())
    }
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
