//! Request transport: the seam between route queues and HTTP.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use tracing::trace;

use super::route::{ApiRequest, ApiResponse, RateLimitInfo};
use crate::error::GatewayError;
use crate::gateway::protocol::bot_token;

/// User-Agent sent with every API call.
pub const USER_AGENT: &str = concat!(
    "DiscordBot (https://github.com/0xHoneyJar/arrakis, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Executes one request. Non-2xx statuses are responses, not errors.
#[async_trait]
pub trait RequestTransport: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, GatewayError>;
}

/// `reqwest` backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, token: &str) -> Result<Self, GatewayError> {
        let mut auth = HeaderValue::try_from(bot_token(token))
            .map_err(|e| GatewayError::Config(format!("Invalid token characters: {e}")))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        let base_url = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl RequestTransport for HttpTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, GatewayError> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let rate_limit = RateLimitInfo::from_headers(response.headers());
        let text = response.text().await?;
        trace!(route = %request.route_key(), status, "API response");

        Ok(ApiResponse {
            status,
            body: parse_body(&text),
            rate_limit,
        })
    }
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        let transport = HttpTransport::new("https://discord.com/api/v10", "tok").unwrap();
        assert_eq!(
            transport.url("/gateway/bot"),
            "https://discord.com/api/v10/gateway/bot"
        );
    }

    #[test]
    fn token_with_newline_is_rejected() {
        assert!(matches!(
            HttpTransport::new("https://discord.com/api/v10/", "bad\ntoken"),
            Err(GatewayError::Config(_))
        ));
    }

    #[test]
    fn body_parsing() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body(r#"{"id":"1"}"#)["id"], "1");
        assert_eq!(parse_body("Bad Gateway"), Value::String("Bad Gateway".into()));
    }
}
