use axum::http::{header, HeaderMap, HeaderValue};
use std::time::SystemTime;

/// One year, the conventional ceiling for `max-age`.
pub const ONE_YEAR_SECS: u32 = 31_536_000;

/// HTTP caching directives for responses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachePolicy {
    /// Browser cache time-to-live in seconds (via max-age directive).
    pub max_age: u32,
    /// Allow shared caches (proxies) to store the response.
    pub public: bool,
    /// Content behind this URL never changes for its lifetime.
    pub immutable: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::versioned()
    }
}

impl CachePolicy {
    /// Versioned variants: a content change always produces a new URL.
    pub fn versioned() -> Self {
        Self { max_age: ONE_YEAR_SECS, public: true, immutable: true }
    }

    /// Redirects and error responses; these follow the source and must not stick.
    pub fn no_cache() -> Self {
        Self { max_age: 0, public: false, immutable: false }
    }

    pub fn cache_control_value(&self) -> String {
        if self.max_age == 0 {
            return "no-store, no-cache, must-revalidate".to_string();
        }
        let mut parts = vec![
            if self.public { "public" } else { "private" }.to_string(),
            format!("max-age={}", self.max_age),
        ];
        if self.immutable {
            parts.push("immutable".to_string());
        }
        parts.join(", ")
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        if let Ok(value) = HeaderValue::from_str(&self.cache_control_value()) {
            headers.insert(header::CACHE_CONTROL, value);
        }
    }
}

/// IMF-fixdate as used by `Last-Modified`, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn http_date(t: SystemTime) -> String {
    let format = time::macros::format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    time::OffsetDateTime::from(t)
        .format(format)
        .unwrap_or_default()
}
