//! Request/response types and rate-limit header parsing.

use reqwest::header::HeaderMap;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;

/// Cooldown used when an exhausted response carries no usable delay.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(1);

/// HTTP 429 Too Many Requests.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// One outbound API call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base, with ids substituted.
    pub path: String,
    /// Query parameters. Not part of the route key.
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path: String = path.into();
        Self {
            method,
            path: path.trim_start_matches('/').to_string(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// `"<METHOD> <path>"`; ids stay literal, the query is excluded.
    pub fn route_key(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Rate-limit headers of one response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitInfo {
    /// `x-ratelimit-remaining`
    pub remaining: Option<u64>,
    /// `x-ratelimit-reset-after`, sent in (fractional) seconds
    pub reset_after: Option<Duration>,
    /// `x-ratelimit-bucket`
    pub bucket: Option<String>,
}

impl RateLimitInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
        };
        Self {
            remaining: text("x-ratelimit-remaining").and_then(|v| v.parse().ok()),
            reset_after: text("x-ratelimit-reset-after").and_then(parse_seconds),
            bucket: text("x-ratelimit-bucket").map(str::to_string),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

/// Response as seen by the route queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// JSON body, `Null` when empty.
    pub body: Value,
    pub rate_limit: RateLimitInfo,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            rate_limit: RateLimitInfo::default(),
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitInfo) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_too_many_requests(&self) -> bool {
        self.status == TOO_MANY_REQUESTS
    }

    /// Bucket drained or server refused with 429.
    pub fn is_exhausted(&self) -> bool {
        self.rate_limit.is_exhausted() || self.is_too_many_requests()
    }

    /// How long the route must stay idle after this response.
    ///
    /// A 429 prefers the body's `retry_after`; otherwise the reset-after
    /// header applies.
    pub fn cooldown(&self) -> Duration {
        let retry_after = self
            .is_too_many_requests()
            .then(|| self.body.get("retry_after").and_then(Value::as_f64))
            .flatten()
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
        retry_after
            .or(self.rate_limit.reset_after)
            .unwrap_or(DEFAULT_COOLDOWN)
    }
}

fn parse_seconds(raw: &str) -> Option<Duration> {
    raw.parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn route_key_keeps_ids_and_drops_query() {
        let a = ApiRequest::get("/channels/1/messages").with_query("limit", 50);
        let b = ApiRequest::get("channels/2/messages");
        assert_eq!(a.route_key(), "GET channels/1/messages");
        assert_ne!(a.route_key(), b.route_key());
        assert_ne!(
            ApiRequest::post("channels/1/messages").route_key(),
            a.route_key()
        );
    }

    #[test]
    fn headers_parse() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        headers.insert("x-ratelimit-reset-after", HeaderValue::from_static("0.05"));
        headers.insert("x-ratelimit-bucket", HeaderValue::from_static("abcd"));

        let info = RateLimitInfo::from_headers(&headers);
        assert_eq!(info.remaining, Some(0));
        assert_eq!(info.reset_after, Some(Duration::from_millis(50)));
        assert_eq!(info.bucket.as_deref(), Some("abcd"));
        assert!(info.is_exhausted());
    }

    #[test]
    fn garbage_headers_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("many"));
        headers.insert("x-ratelimit-reset-after", HeaderValue::from_static("-3"));

        let info = RateLimitInfo::from_headers(&headers);
        assert_eq!(info, RateLimitInfo::default());
        assert!(!info.is_exhausted());
    }

    #[test]
    fn too_many_requests_prefers_body_retry_after() {
        let response = ApiResponse::new(429, serde_json::json!({ "retry_after": 0.25 }))
            .with_rate_limit(RateLimitInfo {
                remaining: Some(0),
                reset_after: Some(Duration::from_secs(3)),
                bucket: None,
            });
        assert!(response.is_exhausted());
        assert_eq!(response.cooldown(), Duration::from_millis(250));
    }

    #[test]
    fn cooldown_falls_back() {
        let drained = ApiResponse::new(200, Value::Null).with_rate_limit(RateLimitInfo {
            remaining: Some(0),
            reset_after: Some(Duration::from_millis(50)),
            bucket: None,
        });
        assert_eq!(drained.cooldown(), Duration::from_millis(50));

        let bare = ApiResponse::new(429, Value::Null);
        assert_eq!(bare.cooldown(), DEFAULT_COOLDOWN);
    }
}
