//! Rate-limited REST dispatcher
//!
//! Requests are serialized per route key and back off on the server's
//! rate-limit headers. There is no global ceiling across routes.

pub mod queue;
pub mod registry;
pub mod route;
pub mod transport;

pub use queue::{ExhaustedPolicy, QueueConfig, RouteQueue};
pub use registry::RouteRegistry;
pub use route::{ApiRequest, ApiResponse, RateLimitInfo};
pub use transport::{HttpTransport, RequestTransport};

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::gateway::protocol::GatewayBotResponse;

/// API commands over a [`RouteRegistry`].
#[derive(Clone)]
pub struct RestClient {
    registry: RouteRegistry,
}

impl RestClient {
    pub fn from_registry(registry: RouteRegistry) -> Self {
        Self { registry }
    }

    pub fn with_transport(transport: Arc<dyn RequestTransport>, config: QueueConfig) -> Self {
        Self::from_registry(RouteRegistry::new(transport, config))
    }

    pub fn registry(&self) -> &RouteRegistry {
        &self.registry
    }

    /// Submit an arbitrary request through its route queue.
    pub async fn request(&self, request: ApiRequest) -> Result<ApiResponse, GatewayError> {
        self.registry.submit(request).await
    }

    pub async fn create_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> Result<Value, GatewayError> {
        self.create_message_with(channel_id, json!({ "content": content }))
            .await
    }

    /// Post a message with a full JSON body (embeds, components, ...).
    pub async fn create_message_with(
        &self,
        channel_id: &str,
        body: Value,
    ) -> Result<Value, GatewayError> {
        let request = ApiRequest::post(format!("channels/{channel_id}/messages")).with_body(body);
        Ok(self.request(request).await?.body)
    }

    pub async fn get_messages(
        &self,
        channel_id: &str,
        limit: Option<u8>,
    ) -> Result<Vec<Value>, GatewayError> {
        let mut request = ApiRequest::get(format!("channels/{channel_id}/messages"));
        if let Some(limit) = limit {
            request = request.with_query("limit", limit);
        }
        let response = self.request(request).await?;
        match response.body {
            Value::Array(messages) => Ok(messages),
            Value::Null => Ok(Vec::new()),
            other => Err(GatewayError::Api {
                route: format!("GET channels/{channel_id}/messages"),
                status: response.status,
                body: other.to_string(),
            }),
        }
    }

    pub async fn leave_guild(&self, guild_id: &str) -> Result<(), GatewayError> {
        self.request(ApiRequest::delete(format!("users/@me/guilds/{guild_id}")))
            .await
            .map(|_| ())
    }

    pub async fn get_gateway_bot(&self) -> Result<GatewayBotResponse, GatewayError> {
        let request = ApiRequest::get("gateway/bot");
        let route = request.route_key();
        let response = self.request(request).await?;
        serde_json::from_value(response.body)
            .map_err(|source| GatewayError::ResponseDecode { route, source })
    }

    pub async fn add_guild_member_role(
        &self,
        guild_id: &str,
        member_id: &str,
        role_id: &str,
    ) -> Result<(), GatewayError> {
        let path = format!("guilds/{guild_id}/members/{member_id}/roles/{role_id}");
        self.request(ApiRequest::put(path)).await.map(|_| ())
    }

    pub async fn remove_guild_member_role(
        &self,
        guild_id: &str,
        member_id: &str,
        role_id: &str,
    ) -> Result<(), GatewayError> {
        let path = format!("guilds/{guild_id}/members/{member_id}/roles/{role_id}");
        self.request(ApiRequest::delete(path)).await.map(|_| ())
    }
}
