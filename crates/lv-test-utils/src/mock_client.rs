// mock_client: A browser stand-in for integration tests.
//
// Connects to a live view URL with a session cookie, speaks the JSON frame
// protocol, and exposes typed send/recv plus a raw-text escape hatch for
// protocol-error tests.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lv_protocol::{InboundFrame, OutboundFrame};
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::protocol::Message;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MockLiveClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl MockLiveClient {
    /// Connect to `url` (ws://...) presenting `cookie_pair` as the session
    /// cookie, the way a browser upgrades after the initial render.
    pub async fn connect_with_cookie(
        url: &str,
        cookie_pair: &str,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        use tokio_tungstenite::tungstenite::handshake::client::generate_key;
        let uri: tokio_tungstenite::tungstenite::http::Uri = url.parse()?;
        let host = uri.host().unwrap_or("localhost").to_owned();
        let host_header = match uri.port_u16() {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        };
        let request = Request::builder()
            .uri(url)
            .header("Host", host_header)
            .header("Cookie", cookie_pair)
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", generate_key())
            .body(())?;
        let (ws_stream, _response) = tokio_tungstenite::connect_async(request).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    /// Connect without a cookie; the server should refuse the handshake.
    pub async fn connect_anonymous(url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    pub async fn send_frame(
        &mut self,
        frame: &InboundFrame,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string(frame)?;
        self.send_text(&json).await
    }

    /// Send raw text, bypassing frame encoding (for malformed-input tests).
    pub async fn send_text(&mut self, text: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(Message::Text(text.to_owned().into())).await?;
        Ok(())
    }

    /// Receive the next protocol frame, skipping transport chatter.
    pub async fn recv_frame(&mut self) -> Result<OutboundFrame, Box<dyn std::error::Error>> {
        loop {
            let next = tokio::time::timeout(RECV_TIMEOUT, self.read.next()).await?;
            match next {
                Some(Ok(Message::Text(text))) => {
                    let frame: OutboundFrame = serde_json::from_str(&text)?;
                    return Ok(frame);
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => return Err("connection closed by server".into()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err("connection stream ended".into()),
            }
        }
    }

    /// True once the server has closed (or dropped) the connection.
    pub async fn server_closed(&mut self) -> bool {
        loop {
            match tokio::time::timeout(RECV_TIMEOUT, self.read.next()).await {
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => return true,
                Ok(Some(Ok(_))) => continue,
                Err(_) => return false,
            }
        }
    }

    /// Receive a frame, expecting none to arrive within `wait`.
    ///
    /// Returns `None` on the (expected) timeout, or the frame that showed up.
    pub async fn expect_silence(&mut self, wait: Duration) -> Option<OutboundFrame> {
        match tokio::time::timeout(wait, self.read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str(&text).ok(),
            _ => None,
        }
    }

    pub async fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(Message::Close(None)).await?;
        Ok(())
    }
}
