//! Local publish/subscribe bus.
//!
//! UI components subscribe to named event kinds and receive events
//! without any coupling to the transport. Subscribing returns a
//! [`Subscription`] handle; dropping the handle does nothing, only an
//! explicit [`Subscription::unsubscribe`] removes the callback.

use std::collections::HashMap;
use std::fmt;
use std::sync::{
    Arc, Mutex, Weak,
    atomic::{AtomicU64, Ordering},
};

use shared::protocol::ServerEvent;

/// The event names a subscriber can listen for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    NewMessage,
    UserTyping,
    MessageRead,
    ConversationRead,
    UserStatusChange,
    UserStatusResponse,
    UserJoinedConversation,
    UserLeftConversation,
    Error,
}

/// An event delivered to subscribers: a transport transition or a
/// server push.
#[derive(Debug, Clone)]
pub enum BusEvent {
    Connected,
    Disconnected,
    Server(ServerEvent),
}

impl BusEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected => EventKind::Disconnected,
            Self::Server(event) => match event {
                ServerEvent::NewMessage(_) => EventKind::NewMessage,
                ServerEvent::UserTyping(_) => EventKind::UserTyping,
                ServerEvent::MessageRead(_) => EventKind::MessageRead,
                ServerEvent::ConversationRead(_) => EventKind::ConversationRead,
                ServerEvent::UserStatusChange(_) => EventKind::UserStatusChange,
                ServerEvent::UserStatusResponse(_) => EventKind::UserStatusResponse,
                ServerEvent::UserJoinedConversation(_) => EventKind::UserJoinedConversation,
                ServerEvent::UserLeftConversation(_) => EventKind::UserLeftConversation,
                ServerEvent::Error(_) => EventKind::Error,
            },
        }
    }
}

type Callback = Arc<dyn Fn(&BusEvent) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    subscribers: HashMap<EventKind, HashMap<u64, Callback>>,
}

/// The bus itself. Cheap to share; publish never blocks on a
/// subscriber being slow to register or remove.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<BusInner>,
    next_id: AtomicU64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a callback for one event kind and returns its handle.
    pub fn subscribe<F>(self: &Arc<Self>, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .subscribers
            .entry(kind)
            .or_default()
            .insert(id, Arc::new(callback));

        Subscription {
            bus: Arc::downgrade(self),
            kind,
            id,
        }
    }

    /// Delivers an event to every subscriber of its kind.
    pub fn publish(&self, event: &BusEvent) {
        let callbacks: Vec<Callback> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner
                .subscribers
                .get(&event.kind())
                .map(|subs| subs.values().cloned().collect())
                .unwrap_or_default()
        };

        for callback in callbacks {
            callback(event);
        }
    }

    fn remove(&self, kind: EventKind, id: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(subs) = inner.subscribers.get_mut(&kind) {
            subs.remove(&id);
            if subs.is_empty() {
                inner.subscribers.remove(&kind);
            }
        }
    }
}

/// Handle for one subscription.
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<EventBus>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    /// Removes the callback. Safe to call after the bus is gone.
    pub fn unsubscribe(self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.kind, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::ErrorPayload;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn subscribers_only_see_their_kind() {
        let bus = EventBus::new();
        let connected = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        let connected_count = connected.clone();
        let _sub = bus.subscribe(EventKind::Connected, move |_| {
            connected_count.fetch_add(1, Ordering::SeqCst);
        });
        let error_count = errors.clone();
        let _sub2 = bus.subscribe(EventKind::Error, move |_| {
            error_count.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&BusEvent::Connected);
        bus.publish(&BusEvent::Server(ServerEvent::Error(ErrorPayload {
            message: "boom".into(),
        })));
        bus.publish(&BusEvent::Connected);

        assert_eq!(connected.load(Ordering::SeqCst), 2);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        let sub = bus.subscribe(EventKind::Disconnected, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&BusEvent::Disconnected);
        sub.unsubscribe();
        bus.publish(&BusEvent::Disconnected);

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_the_handle_keeps_the_subscription() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        let sub = bus.subscribe(EventKind::Connected, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(sub);

        bus.publish(&BusEvent::Connected);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn publishing_with_no_subscribers_is_a_no_op() {
        let bus = EventBus::new();
        bus.publish(&BusEvent::Connected);
    }
}
