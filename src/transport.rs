use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use url::Url;

use crate::model::{ChatMessage, RequestId, WireChatMessage};
use crate::stomp::{Command, Frame, FrameError};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("link is closed")]
    Closed,
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub request_id: RequestId,
    pub token: String,
    pub topic: String,
    pub send_destination: String,
    /// Upper bound for socket setup, CONNECT/CONNECTED and SUBSCRIBE together.
    pub handshake_timeout: Duration,
}

/// Events delivered by a live link, in transport order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(ChatMessage),
    /// Broker sent an ERROR frame.
    ProtocolError(String),
    /// Socket went away without an explicit close.
    Dropped,
}

/// Outbound half of a link. Publishing is synchronous: the frame is queued for the
/// writer task, and a closed writer is reported immediately.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<String>,
}

impl Outbound {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    pub fn publish(&self, body: String) -> Result<(), TransportError> {
        self.tx.send(body).map_err(|_| TransportError::Closed)
    }
}

/// A subscribed connection: events in, publisher out. Dropping the `Outbound`
/// ends the connection.
pub struct TransportLink {
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    pub outbound: Outbound,
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Resolves once the handshake completed and the topic subscription is in place.
    async fn connect(&self, request: &ConnectRequest) -> Result<TransportLink, TransportError>;
}

/// STOMP 1.2 over WebSocket.
pub struct StompTransport {
    ws_url: Url,
}

impl StompTransport {
    pub fn new(ws_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            ws_url: Url::parse(ws_url)?,
        })
    }

    fn endpoint(&self, token: &str) -> Url {
        let mut url = self.ws_url.clone();
        url.query_pairs_mut().append_pair("access_token", token);
        url
    }
}

#[async_trait]
impl ChatTransport for StompTransport {
    async fn connect(&self, request: &ConnectRequest) -> Result<TransportLink, TransportError> {
        let url = self.endpoint(&request.token);
        let host = url.host_str().unwrap_or("localhost").to_string();

        let handshake = async {
            let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|err| TransportError::Handshake(err.to_string()))?;
            let (mut sink, mut stream) = socket.split();

            sink.send(WsMessage::Text(Frame::connect(&host, &request.token).encode()))
                .await?;

            loop {
                let Some(message) = stream.next().await else {
                    return Err(TransportError::Handshake(
                        "socket closed before CONNECTED".into(),
                    ));
                };
                let WsMessage::Text(text) = message? else {
                    continue;
                };
                match Frame::decode(&text)? {
                    Some(frame) if frame.command == Command::Connected => break,
                    Some(frame) if frame.command == Command::Error => {
                        let reason = frame.get("message").unwrap_or("rejected").to_string();
                        return Err(TransportError::Handshake(reason));
                    }
                    _ => continue,
                }
            }

            sink.send(WsMessage::Text(
                Frame::subscribe("sub-0", &request.topic).encode(),
            ))
            .await?;
            Ok::<_, TransportError>((sink, stream))
        };

        let (mut sink, mut stream) = tokio::time::timeout(request.handshake_timeout, handshake)
            .await
            .map_err(|_| {
                TransportError::Handshake(format!(
                    "timed out after {:?} waiting for broker",
                    request.handshake_timeout
                ))
            })??;
        info!(request_id = request.request_id, topic = %request.topic, "chat topic subscribed");

        let (event_tx, events) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let request_id = request.request_id;
        let destination = request.send_destination.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => {
                        let Some(body) = outgoing else {
                            // Session dropped its publisher.
                            let _ = sink.send(WsMessage::Text(Frame::new(Command::Disconnect).encode())).await;
                            let _ = sink.close().await;
                            debug!(request_id, "chat link closed by session");
                            return;
                        };
                        let frame = Frame::send(&destination, body)
                            .header("requestId", request_id.to_string());
                        if let Err(err) = sink.send(WsMessage::Text(frame.encode())).await {
                            warn!(?err, request_id, "failed to write chat frame");
                            let _ = event_tx.send(TransportEvent::Dropped);
                            return;
                        }
                    }
                    incoming = stream.next() => {
                        let event = match incoming {
                            Some(Ok(WsMessage::Text(text))) => inbound_event(&text, request_id),
                            Some(Ok(WsMessage::Close(_))) | None => Some(TransportEvent::Dropped),
                            Some(Ok(_)) => None,
                            Some(Err(err)) => {
                                warn!(?err, request_id, "chat socket error");
                                Some(TransportEvent::Dropped)
                            }
                        };
                        let Some(event) = event else { continue };
                        let dropped = event == TransportEvent::Dropped;
                        if event_tx.send(event).is_err() || dropped {
                            return;
                        }
                    }
                }
            }
        });

        Ok(TransportLink {
            events,
            outbound: Outbound::new(out_tx),
        })
    }
}

fn inbound_event(text: &str, request_id: RequestId) -> Option<TransportEvent> {
    let frame = match Frame::decode(text) {
        Ok(Some(frame)) => frame,
        Ok(None) => return None,
        Err(err) => return Some(TransportEvent::ProtocolError(err.to_string())),
    };

    match frame.command {
        Command::Message => match serde_json::from_str::<WireChatMessage>(&frame.body) {
            Ok(wire) => Some(TransportEvent::Message(wire.into_message(request_id))),
            Err(err) => {
                warn!(?err, request_id, "ignoring unreadable chat payload");
                None
            }
        },
        Command::Error => {
            let reason = frame
                .get("message")
                .map(str::to_string)
                .unwrap_or_else(|| frame.body.clone());
            Some(TransportEvent::ProtocolError(reason))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageSender;

    #[test]
    fn token_travels_as_query_parameter() {
        let transport = StompTransport::new("wss://chat.example.com/ws").unwrap();
        assert_eq!(
            transport.endpoint("abc").as_str(),
            "wss://chat.example.com/ws?access_token=abc"
        );
    }

    #[test]
    fn message_frame_maps_to_chat_message() {
        let raw = "MESSAGE\ndestination:/topic/chat/5\n\n{\"id\":3,\"messageSender\":\"PROVIDER\",\"content\":\"Ready\"}\0";
        let Some(TransportEvent::Message(message)) = inbound_event(raw, 5) else {
            panic!("expected a chat message");
        };
        assert_eq!(message.message_id, Some(3));
        assert_eq!(message.sender, MessageSender::Provider);
        assert_eq!(message.text, "Ready");
        assert_eq!(message.conversation_id, 5);
    }

    #[test]
    fn error_frame_is_protocol_error() {
        let raw = "ERROR\nmessage:session expired\n\n\0";
        assert_eq!(
            inbound_event(raw, 5),
            Some(TransportEvent::ProtocolError("session expired".into()))
        );
    }

    #[test]
    fn heartbeats_and_receipts_are_ignored() {
        assert_eq!(inbound_event("\n", 5), None);
        assert_eq!(inbound_event("RECEIPT\nreceipt-id:1\n\n\0", 5), None);
    }

    #[tokio::test]
    async fn silent_broker_fails_the_handshake() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let broker = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(tcp).await.unwrap();
            // Swallows CONNECT and never answers.
            while socket.next().await.is_some() {}
        });

        let transport = StompTransport::new(&format!("ws://{addr}/ws")).unwrap();
        let request = ConnectRequest {
            request_id: 5,
            token: "t".into(),
            topic: "/topic/chat/5".into(),
            send_destination: "/app/chat.sendMessage".into(),
            handshake_timeout: Duration::from_millis(200),
        };

        let result = transport.connect(&request).await;
        assert!(matches!(
            result,
            Err(TransportError::Handshake(ref reason)) if reason.contains("timed out")
        ));
        broker.abort();
    }

    #[test]
    fn publish_fails_once_writer_is_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        let outbound = Outbound::new(tx);
        assert!(outbound.publish("{}".into()).is_ok());
        drop(rx);
        assert!(matches!(
            outbound.publish("{}".into()),
            Err(TransportError::Closed)
        ));
    }
}
