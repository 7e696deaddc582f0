use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default encoder quality for lossy output formats.
pub const DEFAULT_QUALITY: u8 = 80;

/// Width used when no density survives the resolution constraints.
pub const FALLBACK_WIDTH: u32 = 540;

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    jpeg,
    png,
    webp,
    avif,
}

impl OutputFormat {
    /// Maps a URL extension onto an output format. `jpg` is an alias of `jpeg`.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(OutputFormat::jpeg),
            "png" => Some(OutputFormat::png),
            "webp" => Some(OutputFormat::webp),
            "avif" => Some(OutputFormat::avif),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::jpeg => "jpg",
            OutputFormat::png => "png",
            OutputFormat::webp => "webp",
            OutputFormat::avif => "avif",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::jpeg => "image/jpeg",
            OutputFormat::png => "image/png",
            OutputFormat::webp => "image/webp",
            OutputFormat::avif => "image/avif",
        }
    }

    pub fn mime(&self) -> mime::Mime {
        match self {
            OutputFormat::jpeg => mime::IMAGE_JPEG,
            OutputFormat::png => mime::IMAGE_PNG,
            // Neither has a constant in `mime`; both literals are valid media types.
            OutputFormat::webp | OutputFormat::avif => self
                .content_type()
                .parse()
                .unwrap_or(mime::APPLICATION_OCTET_STREAM),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::jpeg => write!(f, "jpeg"),
            OutputFormat::png => write!(f, "png"),
            OutputFormat::webp => write!(f, "webp"),
            OutputFormat::avif => write!(f, "avif"),
        }
    }
}

/// How the freshness token embedded in each cache filename is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VersioningMethod {
    /// Source file modification time, in unix seconds.
    Mtime,
    /// Wall-clock time at URL generation. Busts the cache on every render.
    Time,
    /// The operator supplied `app_version`, shared by every image.
    App,
    /// Truncated SHA-256 of the source bytes.
    Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Loading {
    #[default]
    Auto,
    Lazy,
    Eager,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchPriority {
    #[default]
    Auto,
    High,
    Low,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RespImgConfig {
    pub source_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub public_url_prefix: String,
    pub default_output: OutputFormat,
    /// Container widths (px) by breakpoint name.
    pub containers: BTreeMap<String, u32>,
    /// Viewport min-widths (px) by breakpoint name.
    pub breakpoints: BTreeMap<String, u32>,
    pub default_max_resolution: f64,
    pub default_resolution_step: f64,
    pub versioning: VersioningMethod,
    pub app_version: String,
    pub allow_upscale: bool,
    /// Hard cap on generated widths; 0 disables it.
    pub max_size: u32,
    /// Age after which `purge_expired` removes a variant; 0 disables expiry.
    pub cache_ttl_secs: u64,
    pub quality: u8,
    pub debug_headers: bool,
    /// Tried in order when a base path has no extension of its own.
    pub source_extensions: Vec<String>,
    pub default_loading: Loading,
    pub default_fetch_priority: FetchPriority,
    pub pretty_print: bool,
}

impl Default for RespImgConfig {
    fn default() -> Self {
        let containers = [("xxl", 1320), ("xl", 1140), ("lg", 960), ("md", 720), ("sm", 540)];
        let breakpoints = [("xxl", 1400), ("xl", 1200), ("lg", 992), ("md", 768), ("sm", 576)];
        Self {
            source_dir: PathBuf::from("./images"),
            cache_dir: PathBuf::from("./cache"),
            public_url_prefix: "/img/".into(),
            default_output: OutputFormat::webp,
            containers: containers.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            breakpoints: breakpoints.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            default_max_resolution: 2.0,
            default_resolution_step: 0.5,
            versioning: VersioningMethod::Mtime,
            app_version: "1".into(),
            allow_upscale: false,
            max_size: 3000,
            cache_ttl_secs: 0,
            quality: DEFAULT_QUALITY,
            debug_headers: false,
            source_extensions: ["jpg", "jpeg", "png", "webp", "avif"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            default_loading: Loading::Auto,
            default_fetch_priority: FetchPriority::Auto,
            pretty_print: false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No containers configured")] NoContainers,
    #[error("No breakpoints configured")] NoBreakpoints,
    #[error("Breakpoint `{0}` has no matching container")] MissingContainer(String),
    #[error("Max resolution must be >= 1, got {0}")] InvalidMaxResolution(f64),
    #[error("Resolution step must be > 0, got {0}")] InvalidResolutionStep(f64),
    #[error("Resolution range up to {max_resolution} in steps of {step} has too many densities")]
    TooManyDensities { max_resolution: f64, step: f64 },
    #[error("Quality must be within 1..=100, got {0}")] InvalidQuality(u8),
    #[error("Public URL prefix must start and end with `/`: {0}")] InvalidPrefix(String),
    #[error("App version `{0}` may only contain [A-Za-z0-9_.]")] InvalidAppVersion(String),
    #[error("Invalid widths: {0}")] InvalidWidths(String),
    #[error("Invalid render options: {0}")] InvalidOptions(String),
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")] Parse(#[from] toml::de::Error),
}

/// Characters allowed in a version token; shared by the filename grammar.
pub fn is_version_token(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

impl RespImgConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.containers.is_empty() { return Err(ConfigError::NoContainers); }
        if self.breakpoints.is_empty() { return Err(ConfigError::NoBreakpoints); }
        if let Some(name) = self.breakpoints.keys().find(|k| !self.containers.contains_key(*k)) {
            return Err(ConfigError::MissingContainer(name.clone()));
        }
        crate::resolution::check_density_range(self.default_max_resolution, self.default_resolution_step)?;
        if self.quality == 0 || self.quality > 100 { return Err(ConfigError::InvalidQuality(self.quality)); }
        if !self.public_url_prefix.starts_with('/') || !self.public_url_prefix.ends_with('/') {
            return Err(ConfigError::InvalidPrefix(self.public_url_prefix.clone()));
        }
        if !is_version_token(&self.app_version) {
            return Err(ConfigError::InvalidAppVersion(self.app_version.clone()));
        }
        Ok(())
    }
}
