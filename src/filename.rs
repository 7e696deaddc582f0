//! Cache filename grammar: `{base_path}-w{width}-v{version}.{ext}`.
//!
//! The same string is the public URL suffix and the on-disk path under the
//! cache directory, so parsing and generation must agree exactly.

use crate::config::{is_version_token, OutputFormat};
use crate::{RespImgError, Result};
use std::path::{Path, PathBuf};

/// Identity of one cached variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRequest {
    /// Source-relative path, with or without the source extension.
    pub base_path: String,
    pub width: u32,
    pub version: String,
    pub output_ext: String,
    /// Extension of the located source file, once known.
    pub original_ext: Option<String>,
}

impl ImageRequest {
    pub fn new(
        base_path: impl Into<String>,
        width: u32,
        version: impl Into<String>,
        output_ext: impl Into<String>,
    ) -> Result<Self> {
        let req = Self {
            base_path: base_path.into(),
            width,
            version: version.into(),
            output_ext: output_ext.into(),
            original_ext: None,
        };
        validate_base_path(&req.base_path)?;
        if width == 0 {
            return Err(RespImgError::MalformedRequest("width must be positive".into()));
        }
        if !is_version_token(&req.version) {
            return Err(RespImgError::MalformedRequest(format!("bad version token `{}`", req.version)));
        }
        if !is_extension(&req.output_ext) {
            return Err(RespImgError::MalformedRequest(format!("bad extension `{}`", req.output_ext)));
        }
        Ok(req)
    }

    /// Parses a request path (relative to the public prefix).
    ///
    /// # Errors
    /// `MalformedRequest` when the path does not follow the grammar, names an
    /// unsupported output format, or escapes the cache root.
    pub fn parse(path: &str) -> Result<Self> {
        let malformed = || RespImgError::MalformedRequest(path.to_string());

        let (rest, ext) = path.rsplit_once('.').ok_or_else(malformed)?;
        let (head, version) = rest.rsplit_once("-v").ok_or_else(malformed)?;
        let (base_path, width) = head.rsplit_once("-w").ok_or_else(malformed)?;

        if base_path.is_empty() || width.is_empty() || !width.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let width: u32 = width.parse().map_err(|_| malformed())?;
        if OutputFormat::from_extension(ext).is_none() {
            return Err(malformed());
        }
        Self::new(base_path, width, version, ext)
    }

    /// The canonical filename for this variant.
    pub fn file_name(&self) -> String {
        format!("{}-w{}-v{}.{}", self.base_path, self.width, self.version, self.output_ext)
    }

    /// Where this variant lives under `cache_dir`.
    pub fn cache_path(&self, cache_dir: &Path) -> PathBuf {
        cache_dir.join(self.file_name())
    }

    pub fn output_format(&self) -> Option<OutputFormat> {
        OutputFormat::from_extension(&self.output_ext)
    }

    pub fn with_original_ext(mut self, ext: Option<String>) -> Self {
        self.original_ext = ext;
        self
    }

    /// Same image, width and output extension; the version may differ.
    pub fn same_variant(&self, other: &ImageRequest) -> bool {
        self.base_path == other.base_path
            && self.width == other.width
            && self.output_ext.eq_ignore_ascii_case(&other.output_ext)
    }
}

impl std::fmt::Display for ImageRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.file_name())
    }
}

fn is_extension(ext: &str) -> bool {
    !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric())
}

fn validate_base_path(base_path: &str) -> Result<()> {
    let bad = base_path.is_empty()
        || base_path.starts_with('/')
        || base_path.contains('\\')
        || base_path.contains('\0')
        || base_path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(RespImgError::MalformedRequest(format!("bad base path `{}`", base_path)));
    }
    Ok(())
}
