//! Hub WebSocket connection and frame handling

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct HubSocket {
    stream: WsStream,
}

impl HubSocket {
    /// Connect to the hub endpoint.
    ///
    /// Auth is the bearer token passed as the `access_token` query parameter,
    /// the convention for websocket transports where headers are unavailable.
    pub async fn connect(endpoint: &str, access_token: &str) -> Result<Self> {
        let ws_url = ws_endpoint(endpoint, access_token);

        tracing::info!("Connecting WebSocket to {}", endpoint);

        let (stream, response) = connect_async(&ws_url)
            .await
            .context("WebSocket connection failed")?;

        tracing::info!("WebSocket connected (status={})", response.status());

        Ok(Self { stream })
    }

    /// Send a text frame.
    pub async fn send_text(&mut self, msg: &str) -> Result<()> {
        tracing::debug!("WS send: {}", msg);
        self.stream
            .send(Message::Text(msg.to_string()))
            .await
            .context("Failed to send WebSocket message")
    }

    /// Receive the next text frame, ignoring pings/pongs.
    ///
    /// Returns `Ok(None)` when the server closes the connection.
    pub async fn recv_frame(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    tracing::debug!("WS recv: {}", text);
                    return Ok(Some(text));
                }
                Some(Ok(Message::Ping(data))) => {
                    self.stream
                        .send(Message::Pong(data))
                        .await
                        .context("Failed to send pong")?;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("WebSocket closed: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(other)) => {
                    tracing::debug!("WS frame (ignored): {:?}", other);
                }
                Some(Err(e)) => {
                    return Err(e).context("WebSocket receive error");
                }
                None => {
                    return Ok(None);
                }
            }
        }
    }

    /// Close the connection (best-effort on the wire).
    pub async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!("WebSocket close failed: {:#}", e);
        }
    }
}

/// Build the websocket URL for the hub endpoint.
fn ws_endpoint(endpoint: &str, access_token: &str) -> String {
    let base = endpoint
        .replace("https://", "wss://")
        .replace("http://", "ws://");
    let token = url::form_urlencoded::byte_serialize(access_token.as_bytes()).collect::<String>();
    format!("{}?access_token={}", base, token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_endpoint_scheme_and_encoding() {
        let url = ws_endpoint("https://desk.example.com/hubs/support", "a+b/c");
        assert_eq!(
            url,
            "wss://desk.example.com/hubs/support?access_token=a%2Bb%2Fc"
        );
    }
}
