//! Responsive render planning: which variant URLs a page should reference.

use crate::breakpoints::{self, WidthsSpec};
use crate::config::{is_version_token, ConfigError, FetchPriority, Loading, OutputFormat, RespImgConfig};
use crate::filename::ImageRequest;
use crate::markup;
use crate::resolution::{self, ExpandOptions, MaxDimension, ResolutionDictionary};
use crate::source::{meta_key, ImageMeta, MetaCache, SourceFile};
use crate::transform::{ImageTransformer, TransformError};
use crate::version::Versioner;
use crate::{RespImgError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-render options. Unknown keys are rejected when deserializing.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderOptions {
    /// Source path relative to the source directory.
    #[serde(alias = "src")]
    pub file: String,
    pub output_ext: Option<String>,
    pub widths: WidthsSpec,
    pub gutter: u32,
    /// Render a single `<img srcset sizes>` instead of a `<picture>`.
    #[serde(rename = "static")]
    pub static_: bool,
    pub max_resolution: Option<f64>,
    pub resolution_step: Option<f64>,
    pub max_width: MaxDimension,
    pub max_height: MaxDimension,
    pub loading: Option<Loading>,
    pub fetch_priority: Option<FetchPriority>,
    pub alt: String,
    /// Pins the version in every URL instead of deriving it from the source.
    pub cache_version: Option<String>,
    /// Known source dimensions; skips reading the image header.
    pub orig_width: Option<u32>,
    pub orig_height: Option<u32>,
    pub picture_attr: BTreeMap<String, String>,
    pub img_attr: BTreeMap<String, String>,
    pub pretty_print: Option<bool>,
}

impl RenderOptions {
    pub fn new(file: impl Into<String>) -> Self {
        Self { file: file.into(), ..Self::default() }
    }

    pub fn widths(mut self, widths: WidthsSpec) -> Self {
        self.widths = widths;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::InvalidOptions(msg));
        if self.file.trim().is_empty() {
            return invalid("no source file specified".into());
        }
        if let Some(ext) = &self.output_ext {
            if OutputFormat::from_extension(ext).is_none() {
                return invalid(format!("unsupported output extension `{}`", ext));
            }
        }
        if let Some(r) = self.max_resolution {
            if !(r >= 1.0) {
                return Err(ConfigError::InvalidMaxResolution(r));
            }
        }
        if let Some(s) = self.resolution_step {
            if !(s > 0.0) {
                return Err(ConfigError::InvalidResolutionStep(s));
            }
        }
        if let Some(v) = &self.cache_version {
            if !is_version_token(v) {
                return invalid(format!("bad cache version `{}`", v));
            }
        }
        if self.orig_width.is_some() != self.orig_height.is_some() {
            return invalid("orig_width and orig_height must be given together".into());
        }
        Ok(())
    }
}

/// Everything the markup layer needs for one image.
#[derive(Debug, Clone)]
pub struct RenderPlan {
    pub file: String,
    pub output: OutputFormat,
    pub meta: ImageMeta,
    pub dictionary: ResolutionDictionary,
    /// Public URL for every width in the dictionary.
    pub urls: BTreeMap<u32, String>,
}

impl RenderPlan {
    pub fn url(&self, width: u32) -> &str {
        self.urls.get(&width).map(String::as_str).unwrap_or("")
    }

    /// URL of the smallest emitted width, used for `<img src>`.
    pub fn fallback_url(&self) -> &str {
        self.url(self.dictionary.smallest_width())
    }
}

/// Builds render plans and markup for one batch of images.
///
/// Source dimensions go through the injected [`MetaCache`], so a batch that
/// references the same image many times reads its header once.
pub struct Renderer {
    config: Arc<RespImgConfig>,
    versioner: Versioner,
    transformer: Arc<dyn ImageTransformer>,
    meta: Arc<dyn MetaCache>,
}

impl Renderer {
    pub fn new(
        config: Arc<RespImgConfig>,
        versioner: Versioner,
        transformer: Arc<dyn ImageTransformer>,
        meta: Arc<dyn MetaCache>,
    ) -> Self {
        Self { config, versioner, transformer, meta }
    }

    pub async fn plan(&self, opts: &RenderOptions) -> Result<RenderPlan> {
        opts.validate()?;
        let output = match &opts.output_ext {
            Some(ext) => OutputFormat::from_extension(ext)
                .ok_or_else(|| RespImgError::MalformedRequest(ext.clone()))?,
            None => self.config.default_output,
        };
        let max_resolution = opts.max_resolution.unwrap_or(self.config.default_max_resolution);
        let resolution_step = opts.resolution_step.unwrap_or(self.config.default_resolution_step);
        resolution::check_density_range(max_resolution, resolution_step)?;

        // Without a pinned version the URLs are only valid for an existing source.
        let source = match (&opts.cache_version, opts.orig_width) {
            (Some(_), Some(_)) => None,
            _ => Some(
                self.versioner
                    .sources()
                    .locate(&opts.file)
                    .await?
                    .ok_or_else(|| RespImgError::SourceNotFound(opts.file.clone()))?,
            ),
        };

        let meta = self.load_meta(opts, source.as_ref()).await?;
        let targets = breakpoints::resolve(
            &opts.widths,
            &self.config.containers,
            &self.config.breakpoints,
            opts.gutter,
        )?;
        let expand = ExpandOptions {
            max_resolution,
            resolution_step,
            max_width: opts.max_width,
            max_height: opts.max_height,
            allow_upscale: self.config.allow_upscale,
        };
        let dictionary = resolution::expand(&targets, meta.width, meta.height, &expand);

        let version = match &opts.cache_version {
            Some(v) => v.clone(),
            None => self.versioner.version(&opts.file).await?,
        };
        let mut urls = BTreeMap::new();
        for width in dictionary.unique_widths() {
            let request = ImageRequest::new(&opts.file, self.clamp(width), &version, output.extension())?;
            urls.insert(width, self.versioner.url_for(&request));
        }

        Ok(RenderPlan { file: opts.file.clone(), output, meta, dictionary, urls })
    }

    /// HTML for one image; a placeholder SVG when the source is unusable.
    pub async fn render(&self, opts: &RenderOptions) -> Result<String> {
        match self.plan(opts).await {
            Ok(plan) => Ok(self.markup(&plan, opts)),
            Err(e) => placeholder_for(&opts.file, &e).ok_or(e),
        }
    }

    /// Markup for an already planned image.
    pub fn markup(&self, plan: &RenderPlan, opts: &RenderOptions) -> String {
        let settings = markup::ImgSettings {
            alt: &opts.alt,
            loading: opts.loading.unwrap_or(self.config.default_loading),
            fetch_priority: opts.fetch_priority.unwrap_or(self.config.default_fetch_priority),
            img_attr: &opts.img_attr,
            picture_attr: &opts.picture_attr,
            pretty: opts.pretty_print.unwrap_or(self.config.pretty_print),
        };
        if opts.static_ {
            markup::render_static(plan, &settings)
        } else {
            markup::render_picture(plan, &settings)
        }
    }

    /// URL of one variant. Without a width, the smallest planned width is used.
    pub async fn img_url(&self, width: Option<u32>, opts: &RenderOptions) -> Result<String> {
        match width {
            Some(width) => {
                opts.validate()?;
                let ext = opts
                    .output_ext
                    .clone()
                    .unwrap_or_else(|| self.config.default_output.extension().to_string());
                self.versioner
                    .image_url(&opts.file, self.clamp(width), &ext, opts.cache_version.as_deref())
                    .await
            }
            None => Ok(self.plan(opts).await?.fallback_url().to_string()),
        }
    }

    fn clamp(&self, width: u32) -> u32 {
        if self.config.max_size > 0 { width.min(self.config.max_size) } else { width }
    }

    async fn load_meta(&self, opts: &RenderOptions, source: Option<&SourceFile>) -> Result<ImageMeta> {
        if let (Some(width), Some(height)) = (opts.orig_width, opts.orig_height) {
            return Ok(ImageMeta { width, height });
        }
        let source = source.ok_or_else(|| RespImgError::SourceNotFound(opts.file.clone()))?;

        let key = meta_key(&source.path);
        if let Some(meta) = self.meta.get(&key) {
            return Ok(meta);
        }
        let transformer = self.transformer.clone();
        let path = source.path.clone();
        let (width, height) = tokio::task::spawn_blocking(move || transformer.dimensions(&path))
            .await
            .map_err(|e| RespImgError::Resize(TransformError::Io(std::io::Error::other(e))))??;
        let meta = ImageMeta { width, height };
        self.meta.put(&key, meta);
        Ok(meta)
    }
}

/// Placeholder markup for errors that mean the source cannot be shown.
/// Other errors are left to the caller.
pub fn placeholder_for(file: &str, err: &RespImgError) -> Option<String> {
    match err {
        RespImgError::SourceNotFound(path) => Some(markup::placeholder_svg(&format!("Image not found: {}", path))),
        RespImgError::Resize(e) if e.is_decode() => {
            Some(markup::placeholder_svg(&format!("Failed to load image {}: {}", file, e)))
        }
        _ => None,
    }
}
