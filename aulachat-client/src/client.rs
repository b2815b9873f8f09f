//! The facade itself.
//!
//! One [`ChatClient`] per signed-in user. Realtime emits are
//! fire-and-forget: while disconnected they are silently dropped, never
//! an error, because realtime actions are best-effort by contract. The
//! awaitable variants live on [`RestClient`] and do fail loudly.

use std::sync::{Arc, Mutex};

use shared::models::Message;
use shared::protocol::{ClientEvent, ConversationRef, MarkReadPayload};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::bus::{BusEvent, EventBus, EventKind, Subscription};
use crate::error::ClientError;
use crate::rest::{AttachmentUpload, RestClient};
use crate::socket::{ReconnectPolicy, RecentMessages, SocketSupervisor};

struct ActiveConnection {
    outbound: mpsc::UnboundedSender<ClientEvent>,
    shutdown: CancellationToken,
    rest: RestClient,
}

/// Client-side mediator for all realtime and REST messaging calls.
pub struct ChatClient {
    base_url: Url,
    policy: ReconnectPolicy,
    bus: Arc<EventBus>,
    dedupe: Arc<Mutex<RecentMessages>>,
    active: Mutex<Option<ActiveConnection>>,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    /// # Errors
    /// Returns an error when `base_url` cannot be parsed.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
            policy: ReconnectPolicy::default(),
            bus: EventBus::new(),
            dedupe: Arc::new(Mutex::new(RecentMessages::new(256))),
            active: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Subscribes to a named event; returns the unsubscribe handle.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(kind, callback)
    }

    /// Opens the realtime connection with the given credential. An
    /// existing connection is torn down first; the facade owns at most
    /// one at a time.
    ///
    /// # Errors
    /// Returns an error when the URLs cannot be derived from the base.
    pub fn connect(&self, token: &str) -> Result<(), ClientError> {
        self.disconnect();

        let ws_url = websocket_url(&self.base_url, token)?;
        let rest = RestClient::new(self.base_url.as_str(), token)?;

        let (outbound, receiver) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let supervisor = SocketSupervisor {
            url: ws_url,
            bus: self.bus.clone(),
            policy: self.policy,
            dedupe: self.dedupe.clone(),
            shutdown: shutdown.clone(),
        };
        tokio::spawn(supervisor.run(receiver));

        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        *active = Some(ActiveConnection {
            outbound,
            shutdown,
            rest,
        });
        Ok(())
    }

    /// Closes the realtime connection and stops any reconnection.
    pub fn disconnect(&self) {
        let taken = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.take()
        };
        if let Some(connection) = taken {
            connection.shutdown.cancel();
        }
    }

    /// The REST client for the current credential.
    ///
    /// # Errors
    /// [`ClientError::NotConnected`] before the first `connect`.
    pub fn rest(&self) -> Result<RestClient, ClientError> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active
            .as_ref()
            .map(|connection| connection.rest.clone())
            .ok_or(ClientError::NotConnected)
    }

    pub fn join_conversation(&self, conversation_id: Uuid) {
        self.emit(ClientEvent::JoinConversation(conversation_id));
    }

    pub fn leave_conversation(&self, conversation_id: Uuid) {
        self.emit(ClientEvent::LeaveConversation(conversation_id));
    }

    pub fn typing_start(&self, conversation_id: Uuid) {
        self.emit(ClientEvent::TypingStart(ConversationRef { conversation_id }));
    }

    pub fn typing_stop(&self, conversation_id: Uuid) {
        self.emit(ClientEvent::TypingStop(ConversationRef { conversation_id }));
    }

    /// Fire-and-forget read receipt. The awaitable variant is
    /// [`RestClient::mark_read`].
    pub fn mark_read(&self, message_id: Uuid, conversation_id: Uuid) {
        self.emit(ClientEvent::MarkRead(MarkReadPayload {
            message_id,
            conversation_id,
        }));
    }

    pub fn mark_conversation_read(&self, conversation_id: Uuid) {
        self.emit(ClientEvent::MarkConversationRead(ConversationRef {
            conversation_id,
        }));
    }

    pub fn request_user_status(&self, user_id: Uuid) {
        self.emit(ClientEvent::RequestUserStatus(user_id));
    }

    /// Sends a message over REST and pre-seeds the de-dup window with
    /// the returned id, so the server's realtime echo of the same
    /// message is suppressed on this client.
    ///
    /// # Errors
    /// Returns transport or API errors.
    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        body: &str,
        attachments: Vec<AttachmentUpload>,
    ) -> Result<Message, ClientError> {
        let rest = self.rest()?;
        let message = rest.send_message(conversation_id, body, attachments).await?;

        let mut dedupe = self.dedupe.lock().unwrap_or_else(|e| e.into_inner());
        dedupe.observe(message.id);
        Ok(message)
    }

    fn emit(&self, event: ClientEvent) {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match active.as_ref() {
            Some(connection) => {
                // A send error means the supervisor has stopped; the
                // action is dropped like any other offline emit.
                if connection.outbound.send(event).is_err() {
                    debug!("dropped realtime emit, transport stopped");
                }
            }
            None => debug!("dropped realtime emit while disconnected"),
        }
    }
}

fn websocket_url(base: &Url, token: &str) -> Result<Url, ClientError> {
    let mut url = base.join("ws")?;
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ClientError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|()| ClientError::UnsupportedScheme(base.scheme().to_string()))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn websocket_url_maps_the_scheme_and_carries_the_token() {
        let base = Url::parse("https://chat.example.org/").unwrap();
        let url = websocket_url(&base, "abc").unwrap();
        assert_eq!(url.as_str(), "wss://chat.example.org/ws?token=abc");

        let base = Url::parse("http://localhost:3000/").unwrap();
        let url = websocket_url(&base, "abc").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:3000/ws?token=abc");
    }

    #[test]
    fn unsupported_schemes_are_rejected() {
        let base = Url::parse("ftp://example.org/").unwrap();
        assert!(matches!(
            websocket_url(&base, "abc"),
            Err(ClientError::UnsupportedScheme(_))
        ));
    }

    #[tokio::test]
    async fn emits_while_disconnected_are_silently_dropped() {
        let client = ChatClient::new("http://localhost:3000/").unwrap();

        // None of these may panic or error without a connection.
        client.join_conversation(Uuid::new_v4());
        client.typing_start(Uuid::new_v4());
        client.mark_read(Uuid::new_v4(), Uuid::new_v4());
        client.mark_conversation_read(Uuid::new_v4());
        client.request_user_status(Uuid::new_v4());
        client.disconnect();
    }

    #[tokio::test]
    async fn rest_access_requires_a_credential() {
        let client = ChatClient::new("http://localhost:3000/").unwrap();
        assert!(matches!(client.rest(), Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn bus_subscriptions_survive_reconnect_cycles() {
        let client = ChatClient::new("http://localhost:3000/").unwrap();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        let _sub = client.on(EventKind::Disconnected, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        client.bus.publish(&BusEvent::Disconnected);
        client.bus.publish(&BusEvent::Disconnected);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
