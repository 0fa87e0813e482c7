//! API commands map onto the expected method, path, query and body.

mod common;

use arrakis_client::error::GatewayError;
use arrakis_client::rest::{ApiResponse, QueueConfig, RestClient};
use common::{ok, MockApi, Reply};
use reqwest::Method;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

#[tokio::test(start_paused = true)]
async fn create_message_posts_content() {
    let api = MockApi::new();
    api.script(
        "POST channels/7/messages",
        Reply::Respond(ok(json!({ "id": "900", "content": "the spice must flow" }))),
    );
    let rest = RestClient::with_transport(api.clone(), QueueConfig::default());

    let message = assert_ok!(rest.create_message("7", "the spice must flow").await);
    assert_eq!(message["id"], "900");

    let call = &api.calls()[0];
    assert_eq!(call.request.method, Method::POST);
    assert_eq!(call.request.path, "channels/7/messages");
    assert_eq!(call.request.body, Some(json!({ "content": "the spice must flow" })));
}

#[tokio::test(start_paused = true)]
async fn get_messages_passes_limit_and_shares_the_route() {
    let api = MockApi::new();
    api.script(
        "GET channels/7/messages",
        Reply::Respond(ok(json!([{ "id": "1" }, { "id": "2" }]))),
    );
    let rest = RestClient::with_transport(api.clone(), QueueConfig::default());

    let messages = assert_ok!(rest.get_messages("7", Some(2)).await);
    assert_eq!(messages.len(), 2);
    assert_ok!(rest.get_messages("7", None).await);

    let calls = api.calls();
    assert_eq!(calls[0].request.query, vec![("limit".to_string(), "2".to_string())]);
    assert!(calls[1].request.query.is_empty());
    // Query does not split the route.
    assert_eq!(rest.registry().routes(), vec!["GET channels/7/messages"]);
}

#[tokio::test(start_paused = true)]
async fn get_messages_rejects_non_array_body() {
    let api = MockApi::new();
    api.script("GET channels/7/messages", Reply::Respond(ok(json!({ "id": "1" }))));
    let rest = RestClient::with_transport(api, QueueConfig::default());

    let err = assert_err!(rest.get_messages("7", None).await);
    assert!(matches!(err, GatewayError::Api { status: 200, .. }));
}

#[tokio::test(start_paused = true)]
async fn guild_and_role_commands() {
    let api = MockApi::new();
    api.script(
        "DELETE users/@me/guilds/55",
        Reply::Respond(ApiResponse::new(204, serde_json::Value::Null)),
    );
    let rest = RestClient::with_transport(api.clone(), QueueConfig::default());

    assert_ok!(rest.leave_guild("55").await);
    assert_ok!(rest.add_guild_member_role("55", "66", "77").await);
    assert_ok!(rest.remove_guild_member_role("55", "66", "77").await);

    let routes: Vec<String> = api.calls().into_iter().map(|c| c.route).collect();
    assert_eq!(
        routes,
        vec![
            "DELETE users/@me/guilds/55",
            "PUT guilds/55/members/66/roles/77",
            "DELETE guilds/55/members/66/roles/77",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn gateway_bot_is_parsed() {
    let api = MockApi::new();
    api.script(
        "GET gateway/bot",
        Reply::Respond(ok(json!({
            "url": "wss://gateway.discord.gg",
            "shards": 3,
            "session_start_limit": { "total": 1000, "remaining": 999 }
        }))),
    );
    api.script("GET gateway/bot", Reply::Respond(ok(json!({ "shards": 3 }))));
    let rest = RestClient::with_transport(api, QueueConfig::default());

    let bot = assert_ok!(rest.get_gateway_bot().await);
    assert_eq!(bot.url, "wss://gateway.discord.gg");
    assert_eq!(bot.shards, Some(3));

    let err = assert_err!(rest.get_gateway_bot().await);
    match err {
        GatewayError::ResponseDecode { route, .. } => assert_eq!(route, "GET gateway/bot"),
        other => panic!("expected a response decode error, got {other:?}"),
    }
}
