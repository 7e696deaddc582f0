pub mod disk;
pub mod engine;
pub mod headers;
pub mod lock;

pub use disk::{CacheStats, DiskCache};
pub use engine::{CacheStatus, ResizeEngine};
pub use headers::CachePolicy;
pub use lock::KeyedLocks;

/// Content type for a cached file, from its extension.
pub fn content_type_for_path(path: &std::path::Path) -> mime::Mime {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(crate::config::OutputFormat::from_extension)
        .map(|f| f.mime())
        .unwrap_or(mime::APPLICATION_OCTET_STREAM)
}
