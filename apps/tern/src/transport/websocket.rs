use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{Connector, Socket, SocketFrame, TransportError};

const AUTH_KEY_HEADER: &str = "X-AuthKey";

/// Dials real websocket connections to the backend's `/ws` endpoint.
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn dial(
        &self,
        endpoint: &str,
        stable_id: &str,
        auth_key: Option<&str>,
    ) -> Result<Box<dyn Socket>, TransportError> {
        let mut url = Url::parse(endpoint).map_err(|e| TransportError::Dial(e.to_string()))?;
        url.set_path("/ws");
        url.query_pairs_mut().append_pair("stableid", stable_id);

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Dial(e.to_string()))?;
        if let Some(key) = auth_key {
            let value =
                HeaderValue::from_str(key).map_err(|e| TransportError::Dial(e.to_string()))?;
            request.headers_mut().insert(AUTH_KEY_HEADER, value);
        }

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| TransportError::Dial(e.to_string()))?;
        Ok(Box::new(WebSocketClient { stream: ws_stream }))
    }
}

struct WebSocketClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Socket for WebSocketClient {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<SocketFrame> {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(Message::Text(text)) => return Some(SocketFrame::Text(text)),
                Ok(Message::Binary(data)) => return Some(SocketFrame::Binary(data)),
                Ok(Message::Close(_)) | Err(_) => return None,
                // websocket-level ping/pong is handled by tungstenite;
                // application liveness uses JSON control messages
                _ => continue,
            }
        }
        None
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
