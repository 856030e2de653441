use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiError, BookingApi};
use crate::identity::AuthTokenProvider;
use crate::message_log::MessageLog;
use crate::model::{ChatMessage, ConnectionState, RequestId};
use crate::settings::Settings;
use crate::transport::{ChatTransport, ConnectRequest, Outbound, TransportEvent, TransportLink};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("no conversation selected")]
    MissingConversation,
    #[error("chat session is closed")]
    Closed,
    #[error("not connected to chat")]
    NotConnected,
    #[error("message is empty")]
    EmptyMessage,
    #[error("message could not be sent: {0}")]
    SendFailed(String),
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub reconnect_delay: Duration,
    pub topic_prefix: String,
    pub send_destination: String,
    pub handshake_timeout: Duration,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            topic_prefix: "/topic/chat/".to_string(),
            send_destination: "/app/chat.sendMessage".to_string(),
            handshake_timeout: Duration::from_secs(15),
        }
    }
}

impl From<&Settings> for ChatOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            reconnect_delay: settings.reconnect_delay(),
            topic_prefix: settings.topic_prefix.clone(),
            send_destination: settings.send_destination.clone(),
            handshake_timeout: settings.request_timeout(),
        }
    }
}

/// What a chat view renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatView {
    pub status: ConnectionState,
    pub log: MessageLog,
    /// Latest connection or send error.
    pub error: Option<String>,
    pub history_error: Option<String>,
}

impl ChatView {
    pub fn messages(&self) -> Vec<&ChatMessage> {
        self.log.messages().collect()
    }
}

#[derive(Default)]
struct Control {
    generation: u64,
    request_id: Option<RequestId>,
    outbound: Option<Outbound>,
    driver: Option<JoinHandle<()>>,
    history: Option<JoinHandle<()>>,
    closed: bool,
}

struct Inner {
    api: Arc<dyn BookingApi>,
    transport: Arc<dyn ChatTransport>,
    auth: Arc<dyn AuthTokenProvider>,
    options: ChatOptions,
    view: watch::Sender<ChatView>,
    control: Mutex<Control>,
}

impl Inner {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `f` unless the session was closed or reopened since `generation`.
    fn update(&self, generation: u64, f: impl FnOnce(&mut Control, &mut ChatView)) -> bool {
        let mut control = self.control();
        if control.closed || control.generation != generation {
            return false;
        }
        self.view.send_modify(|view| f(&mut control, view));
        true
    }

    fn surface(&self, error: &ChatError) {
        self.view
            .send_modify(|view| view.error = Some(error.to_string()));
    }
}

/// Chat for one booking request. After `close()` no further state change is
/// published.
pub struct ChatSession {
    inner: Arc<Inner>,
}

impl ChatSession {
    pub fn new(
        api: Arc<dyn BookingApi>,
        transport: Arc<dyn ChatTransport>,
        auth: Arc<dyn AuthTokenProvider>,
        options: ChatOptions,
    ) -> Self {
        let (view, _) = watch::channel(ChatView::default());
        Self {
            inner: Arc::new(Inner {
                api,
                transport,
                auth,
                options,
                view,
                control: Mutex::new(Control::default()),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatView> {
        self.inner.view.subscribe()
    }

    pub fn snapshot(&self) -> ChatView {
        self.inner.view.borrow().clone()
    }

    pub fn status(&self) -> ConnectionState {
        self.inner.view.borrow().status
    }

    /// Starts the history fetch and the connection driver. Must be called from
    /// within a Tokio runtime. Re-opening an open session does nothing.
    pub fn open(&self, request_id: Option<RequestId>) -> Result<(), ChatError> {
        let inner = &self.inner;
        let mut control = inner.control();
        if control.closed {
            return Err(ChatError::Closed);
        }
        if control.request_id.is_some() {
            debug!("chat session already open");
            return Ok(());
        }

        let Some(request_id) = request_id else {
            inner.surface(&ChatError::MissingConversation);
            return Err(ChatError::MissingConversation);
        };
        let Some(token) = inner.auth.token() else {
            inner.surface(&ChatError::NotAuthenticated);
            return Err(ChatError::NotAuthenticated);
        };

        control.generation += 1;
        control.request_id = Some(request_id);
        let generation = control.generation;
        inner.view.send_modify(|view| {
            view.status = ConnectionState::Connecting;
            view.error = None;
        });

        let request = ConnectRequest {
            request_id,
            token,
            topic: format!("{}{}", inner.options.topic_prefix, request_id),
            send_destination: inner.options.send_destination.clone(),
            handshake_timeout: inner.options.handshake_timeout,
        };

        info!(request_id, "opening chat session");
        control.history = Some(tokio::spawn(load_history(
            Arc::clone(inner),
            generation,
            request_id,
        )));
        control.driver = Some(tokio::spawn(drive(Arc::clone(inner), generation, request)));
        Ok(())
    }

    /// Appends the message optimistically and publishes it. Nothing is appended
    /// unless the session is connected.
    pub fn send(&self, text: &str) -> Result<(), ChatError> {
        let inner = &self.inner;
        let text = text.trim();
        if text.is_empty() {
            inner.surface(&ChatError::EmptyMessage);
            return Err(ChatError::EmptyMessage);
        }

        let control = inner.control();
        let connected = inner.view.borrow().status == ConnectionState::Connected;
        let (Some(outbound), Some(request_id), true, false) = (
            control.outbound.as_ref(),
            control.request_id,
            connected,
            control.closed,
        ) else {
            inner.surface(&ChatError::NotConnected);
            return Err(ChatError::NotConnected);
        };

        let mut key = None;
        inner.view.send_modify(|view| {
            key = Some(view.log.append_pending(ChatMessage::optimistic(request_id, text)));
            view.error = None;
        });

        let body = json!({ "content": text }).to_string();
        if let Err(err) = outbound.publish(body) {
            warn!(?err, request_id, "chat publish failed, rolling back");
            let error = ChatError::SendFailed(err.to_string());
            inner.view.send_modify(|view| {
                if let Some(key) = key {
                    view.log.rollback(key);
                }
                view.error = Some(error.to_string());
            });
            return Err(error);
        }

        debug!(request_id, "chat message published");
        Ok(())
    }

    /// Tears the session down for good. Idempotent.
    pub fn close(&self) {
        let mut control = self.inner.control();
        if control.closed {
            return;
        }
        control.closed = true;
        control.outbound = None;
        if let Some(driver) = control.driver.take() {
            driver.abort();
        }
        if let Some(history) = control.history.take() {
            history.abort();
        }
        self.inner.view.send_modify(|view| {
            view.status = ConnectionState::Disconnected;
        });
        info!(request_id = ?control.request_id, "chat session closed");
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.close();
    }
}

async fn load_history(inner: Arc<Inner>, generation: u64, request_id: RequestId) {
    match inner.api.chat_history(request_id).await {
        Ok(history) => {
            let count = history.messages.len();
            inner.update(generation, |_, view| {
                for wire in history.messages {
                    view.log.ingest_history(wire.into_message(request_id));
                }
            });
            debug!(request_id, count, "chat history loaded");
        }
        Err(err) => {
            warn!(?err, request_id, "chat history fetch failed");
            let message = match err {
                ApiError::Unauthenticated => ChatError::NotAuthenticated.to_string(),
                other => format!("could not load chat history: {other}"),
            };
            inner.update(generation, |_, view| view.history_error = Some(message));
        }
    }
}

async fn drive(inner: Arc<Inner>, generation: u64, request: ConnectRequest) {
    let request_id = request.request_id;
    loop {
        let entered = inner.update(generation, |_, view| {
            view.status = ConnectionState::Connecting;
        });
        if !entered {
            return;
        }

        match inner.transport.connect(&request).await {
            Ok(TransportLink { mut events, outbound }) => {
                let attached = inner.update(generation, |control, view| {
                    control.outbound = Some(outbound);
                    view.status = ConnectionState::Connected;
                    view.error = None;
                });
                if !attached {
                    return;
                }
                info!(request_id, "chat connected");

                let protocol_error = loop {
                    match events.recv().await {
                        Some(TransportEvent::Message(message)) => {
                            let applied = inner.update(generation, |_, view| {
                                view.log.ingest(message);
                            });
                            if !applied {
                                return;
                            }
                        }
                        Some(TransportEvent::ProtocolError(reason)) => break Some(reason),
                        Some(TransportEvent::Dropped) | None => break None,
                    }
                };

                let detached = inner.update(generation, |control, view| {
                    control.outbound = None;
                    match &protocol_error {
                        Some(reason) => {
                            view.status = ConnectionState::Error;
                            view.error = Some(format!("chat connection error: {reason}"));
                        }
                        None => view.status = ConnectionState::Disconnected,
                    }
                });
                if !detached {
                    return;
                }
                warn!(request_id, ?protocol_error, "chat link lost");
            }
            Err(err) => {
                warn!(?err, request_id, "chat connect failed");
                let failed = inner.update(generation, |_, view| {
                    view.status = ConnectionState::Error;
                    view.error = Some(format!("could not connect to chat: {err}"));
                });
                if !failed {
                    return;
                }
            }
        }

        tokio::time::sleep(inner.options.reconnect_delay).await;
        debug!(request_id, "reconnecting chat");
    }
}
