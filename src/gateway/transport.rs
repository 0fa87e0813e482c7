//! Duplex stream transport to the gateway.
//!
//! The shard only sees [`GatewayTransport`] / [`GatewayStream`]; the
//! production implementation wraps a `tokio-tungstenite` WebSocket.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::protocol::close_code;
use crate::error::GatewayError;

/// Something observed on an open stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// One complete frame, still encoded.
    Message(Vec<u8>),
    /// Peer closed the stream.
    Close { code: u16, reason: String },
    /// Transport-level error. The stream may still deliver a close afterwards.
    Error(String),
}

/// Opens duplex streams.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn GatewayStream>, GatewayError>;
}

/// One open duplex stream. Owned exclusively by a shard task.
#[async_trait]
pub trait GatewayStream: Send {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), GatewayError>;

    /// Next inbound event. `None` once the stream is finished.
    async fn next_event(&mut self) -> Option<StreamEvent>;

    async fn close(&mut self, code: u16) -> Result<(), GatewayError>;
}

/// Type alias for the WebSocket stream used by the client.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `tokio-tungstenite` backed transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

#[async_trait]
impl GatewayTransport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn GatewayStream>, GatewayError> {
        let (ws, _response) = connect_async(url).await?;
        Ok(Box::new(WebSocketGatewayStream { ws }))
    }
}

/// A live WebSocket connection to the gateway.
pub struct WebSocketGatewayStream {
    ws: WsStream,
}

#[async_trait]
impl GatewayStream for WebSocketGatewayStream {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), GatewayError> {
        let message = match String::from_utf8(frame) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        };
        self.ws.send(message).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => return Some(StreamEvent::Message(text.into_bytes())),
                Ok(Message::Binary(bytes)) => return Some(StreamEvent::Message(bytes)),
                Ok(Message::Close(frame)) => {
                    let (code, reason) = frame.map_or_else(
                        || (close_code::NO_STATUS, String::new()),
                        |f| (u16::from(f.code), f.reason.into_owned()),
                    );
                    return Some(StreamEvent::Close { code, reason });
                }
                // Ping/pong handled by tungstenite.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => return Some(StreamEvent::Error(e.to_string())),
            }
        }
    }

    async fn close(&mut self, code: u16) -> Result<(), GatewayError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "closing".into(),
        };
        self.ws.close(Some(frame)).await?;
        Ok(())
    }
}
