//! The realtime connection: one WebSocket at a time, bounded
//! reconnection, and de-duplication of message pushes against their
//! REST echoes.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use shared::protocol::{ClientEvent, ServerEvent};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::bus::{BusEvent, EventBus};

/// Bounded backoff for reconnection attempts.
///
/// The delay grows linearly with the attempt number up to a cap, and
/// after `max_attempts` failures the facade stops trying and stays
/// disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt (1-based), or `None` when the
    /// retry budget is spent.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt > self.max_attempts {
            return None;
        }
        Some(std::cmp::min(
            self.initial_delay.saturating_mul(attempt),
            self.max_delay,
        ))
    }
}

/// Sliding window of recently seen message ids.
///
/// A message can arrive twice: once as the awaited REST response and
/// once as the server's realtime push. Whichever lands first wins; the
/// second sighting is suppressed.
#[derive(Debug)]
pub struct RecentMessages {
    order: VecDeque<Uuid>,
    seen: HashSet<Uuid>,
    capacity: usize,
}

impl RecentMessages {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Records a sighting. Returns `true` the first time an id is seen.
    pub fn observe(&mut self, id: Uuid) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }
}

pub(crate) struct SocketSupervisor {
    pub url: Url,
    pub bus: Arc<EventBus>,
    pub policy: ReconnectPolicy,
    pub dedupe: Arc<Mutex<RecentMessages>>,
    pub shutdown: CancellationToken,
}

impl SocketSupervisor {
    /// Runs the connect/read/reconnect loop until the retry budget is
    /// spent or shutdown is requested. `outbound` carries emits from
    /// the facade; it is drained only while a connection is up.
    pub async fn run(self, mut outbound: mpsc::UnboundedReceiver<ClientEvent>) {
        let mut attempt = 0u32;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            match connect_async(self.url.as_str()).await {
                Ok((stream, _)) => {
                    attempt = 0;
                    self.bus.publish(&BusEvent::Connected);
                    self.serve_connection(stream, &mut outbound).await;
                    self.bus.publish(&BusEvent::Disconnected);
                }
                Err(err) => {
                    debug!(error = %err, "websocket connect failed");
                }
            }

            if self.shutdown.is_cancelled() {
                break;
            }

            attempt += 1;
            let Some(delay) = self.policy.delay_for(attempt) else {
                warn!(attempts = attempt - 1, "reconnect budget exhausted");
                break;
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn serve_connection(
        &self,
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        outbound: &mut mpsc::UnboundedReceiver<ClientEvent>,
    ) {
        let (mut sink, mut reader) = stream.split();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
                emit = outbound.recv() => {
                    let Some(event) = emit else { break };
                    match serde_json::to_string(&event) {
                        Ok(frame) => {
                            if sink.send(WsMessage::Text(frame.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(error = %err, "failed to serialize outbound event"),
                    }
                }
                inbound = reader.next() => {
                    match inbound {
                        Some(Ok(WsMessage::Text(text))) => self.handle_frame(text.as_str()),
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            debug!(error = %err, "websocket read error");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn handle_frame(&self, frame: &str) {
        let event = match serde_json::from_str::<ServerEvent>(frame) {
            Ok(event) => event,
            Err(err) => {
                debug!(error = %err, "ignoring unrecognized server frame");
                return;
            }
        };

        if let ServerEvent::NewMessage(message) = &event {
            let mut dedupe = self.dedupe.lock().unwrap_or_else(|e| e.into_inner());
            if !dedupe.observe(message.id) {
                debug!(message_id = %message.id, "suppressed duplicate message push");
                return;
            }
        }

        self.bus.publish(&BusEvent::Server(event));
    }
}
