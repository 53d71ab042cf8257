use chrono::{DateTime, Utc};
use ring::digest;

/// Default max-age when the responder config carries no override, in seconds.
pub const DFLT_CACHE_MAX_AGE_SECS: u64 = 60;

/// HTTP cache metadata for a definitive GET answer, per RFC 5019 section 6.2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHeaders {
    pub date: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub expires: Option<DateTime<Utc>>,
    /// Quoted lowercase hex SHA-1 of the encoded response.
    pub etag: String,
    pub cache_control: String,
}

impl CacheHeaders {
    /// Derives the header set from the encoded response and the current
    /// snapshot's validity window. `max_age_override` is the configured
    /// per-responder cap; the effective max-age is additionally bounded by
    /// the window length when nextUpdate is present.
    pub fn derive(
        encoded_response: &[u8],
        this_update: DateTime<Utc>,
        next_update: Option<DateTime<Utc>>,
        max_age_override: Option<u64>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut max_age = max_age_override.unwrap_or(DFLT_CACHE_MAX_AGE_SECS);
        if let Some(next_update) = next_update {
            let window = (next_update - this_update).num_seconds().max(0) as u64;
            max_age = max_age.min(window);
        }

        let sha1 = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, encoded_response);

        Self {
            date: now,
            last_modified: this_update,
            expires: next_update,
            etag: format!("\"{}\"", hex::encode(sha1.as_ref())),
            cache_control: format!(
                "max-age={},public,no-transform,must-revalidate",
                max_age
            ),
        }
    }

    /// Renders the headers as name/value pairs with HTTP-date formatting.
    pub fn to_header_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("Date", http_date(self.date)),
            ("Last-Modified", http_date(self.last_modified)),
        ];
        if let Some(expires) = self.expires {
            pairs.push(("Expires", http_date(expires)));
        }
        pairs.push(("ETag", self.etag.clone()));
        pairs.push(("Cache-Control", self.cache_control.clone()));
        pairs
    }
}

/// IMF-fixdate as required for HTTP header values.
fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
