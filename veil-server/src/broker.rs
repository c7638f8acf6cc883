//! Broadcast routing and session lifecycle
//!
//! The broker serializes admission, routing, and departure on one ordering
//! lock, which is what makes the event ordering guarantees hold: the
//! welcome snapshot and the event stream that follows it partition history
//! exactly - a message lands in one or the other, never both, and the
//! welcome is always a session's first event.
//!
//! Everything here is fail-silent toward clients. A message dropped by the
//! rate limiter or validation disappears without an error event; the only
//! trace is a debug log line.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc};

use veil_common::names::generate_message_id;
use veil_common::protocol::{ChatMessage, ServerMessage};
use veil_common::time::unix_millis;
use veil_common::validators::{
    MAX_ENVELOPE_KEY_CHARS, MAX_FINGERPRINT_CHARS, MAX_PAYLOAD_CHARS, truncate_chars,
    validate_payload,
};

use crate::config::BrokerConfig;
use crate::message_store::MessageStore;
use crate::presence::{PresenceRegistry, Session};
use crate::rate_limiter::RateLimiter;

/// Orchestrates presence, history, and event fan-out
#[derive(Debug, Clone)]
pub struct Broker {
    presence: PresenceRegistry,
    store: MessageStore,
    rate_limiter: Arc<RateLimiter>,
    /// Timestamp of the last finalized message, for the monotone clamp
    last_timestamp: Arc<AtomicU64>,
    /// Serializes connect/route/disconnect so a welcome snapshot can never
    /// interleave with message routing
    order: Arc<Mutex<()>>,
    debug: bool,
}

impl Broker {
    /// Create a broker with the given limits
    #[must_use]
    pub fn new(config: &BrokerConfig, debug: bool) -> Self {
        Self {
            presence: PresenceRegistry::new(debug),
            store: MessageStore::new(config.max_bucket_size, config.max_buckets),
            rate_limiter: Arc::new(RateLimiter::new(
                config.rate_limit_window,
                config.rate_limit_max_messages,
            )),
            last_timestamp: Arc::new(AtomicU64::new(0)),
            order: Arc::new(Mutex::new(())),
            debug,
        }
    }

    /// Admit a connection: assign an identity, welcome it, announce it
    ///
    /// The welcome carries the presence list including the new user and the
    /// merged history snapshot. The join announcement goes to everyone else;
    /// the new session never sees its own join. Registration and snapshot
    /// are atomic relative to routing: a message is either in the welcome
    /// history or delivered as a later event, never both.
    pub async fn connect(&self, tx: mpsc::UnboundedSender<ServerMessage>) -> Session {
        let _order = self.order.lock().await;

        let session = self.presence.register(tx).await;

        let users = self.presence.snapshot().await;
        let messages = self.store.snapshot().await;
        let welcome = ServerMessage::Welcome {
            user: session.user.clone(),
            users,
            messages,
        };
        if session.tx.send(welcome).is_err() && self.debug {
            eprintln!(
                "Session {} closed before welcome delivery",
                session.user.id
            );
        }

        self.presence
            .broadcast_except(
                session.session_id(),
                ServerMessage::UserJoined {
                    user: session.user.clone(),
                },
            )
            .await;

        if self.debug {
            eprintln!(
                "Session {} connected as {}",
                session.user.id, session.user.username
            );
        }
        session
    }

    /// Route an inbound chat message
    ///
    /// Applies rate limiting, payload validation, and field caps, then
    /// finalizes the message (server-assigned ID, sender name, monotone
    /// timestamp) and fans it out to every session including the sender.
    /// Dropped messages produce no reply.
    pub async fn handle_chat(
        &self,
        session_id: u32,
        key_fingerprint: String,
        envelope_key: String,
        payload: String,
    ) {
        let _order = self.order.lock().await;

        // Sender identity comes from the registry, never from the wire.
        // Checked before the rate limiter so an unknown session leaves no
        // counter entry behind that disconnect will never clear.
        let Some(session) = self.presence.get(session_id).await else {
            return;
        };

        if !self.rate_limiter.check_and_record(session_id) {
            if self.debug {
                eprintln!("Session {} rate limited, message dropped", session_id);
            }
            return;
        }

        if !validate_payload(&payload) {
            if self.debug {
                eprintln!("Session {} sent empty payload, message dropped", session_id);
            }
            return;
        }

        let message = ChatMessage {
            id: generate_message_id(),
            username: session.user.username,
            key_fingerprint: truncate_chars(key_fingerprint, MAX_FINGERPRINT_CHARS),
            envelope_key: truncate_chars(envelope_key, MAX_ENVELOPE_KEY_CHARS),
            payload: truncate_chars(payload, MAX_PAYLOAD_CHARS),
            timestamp: self.next_timestamp(),
        };

        self.store.append(message.clone()).await;
        self.presence
            .broadcast(ServerMessage::ChatMessage { message })
            .await;
    }

    /// Retire a connection: announce the departure and drop its state
    ///
    /// Safe to call for sessions that never registered or already left.
    pub async fn disconnect(&self, session_id: u32) {
        let _order = self.order.lock().await;

        self.rate_limiter.forget(session_id);

        let Some(user) = self.presence.unregister(session_id).await else {
            return;
        };

        self.presence
            .broadcast(ServerMessage::UserLeft { user: user.clone() })
            .await;

        if self.debug {
            eprintln!("Session {} ({}) disconnected", user.id, user.username);
        }
    }

    /// Next message timestamp: wall clock, clamped to never run backwards
    ///
    /// Snapshot ordering sorts by timestamp, so a clock step backwards must
    /// not reorder history. Ties are allowed; the store's stable sort keeps
    /// them deterministic.
    fn next_timestamp(&self) -> u64 {
        let now = unix_millis();
        let prev = self
            .last_timestamp
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| {
                Some(last.max(now))
            })
            .unwrap_or(now);
        prev.max(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_broker() -> Broker {
        Broker::new(&BrokerConfig::default(), false)
    }

    fn strict_broker(rate_limit_max_messages: u32) -> Broker {
        Broker::new(
            &BrokerConfig {
                rate_limit_window: Duration::from_secs(60),
                rate_limit_max_messages,
                ..BrokerConfig::default()
            },
            false,
        )
    }

    async fn join(broker: &Broker) -> (Session, UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = broker.connect(tx).await;
        (session, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    // =========================================================================
    // Connect / welcome tests
    // =========================================================================

    #[tokio::test]
    async fn test_welcome_is_first_event() {
        let broker = test_broker();
        let (session, mut rx) = join(&broker).await;

        match rx.try_recv() {
            Ok(ServerMessage::Welcome {
                user,
                users,
                messages,
            }) => {
                assert_eq!(user, session.user);
                assert_eq!(users, vec![session.user.clone()]);
                assert!(messages.is_empty());
            }
            other => panic!("Expected welcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_welcome_presence_includes_new_user_last() {
        let broker = test_broker();
        let (a, _rx_a) = join(&broker).await;
        let (b, mut rx_b) = join(&broker).await;

        match rx_b.try_recv() {
            Ok(ServerMessage::Welcome { users, .. }) => {
                assert_eq!(users, vec![a.user, b.user.clone()]);
            }
            other => panic!("Expected welcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_join_announced_to_others_not_self() {
        let broker = test_broker();
        let (_a, mut rx_a) = join(&broker).await;
        drain(&mut rx_a);

        let (b, mut rx_b) = join(&broker).await;

        let a_events = drain(&mut rx_a);
        assert_eq!(a_events.len(), 1);
        assert!(
            matches!(&a_events[0], ServerMessage::UserJoined { user } if *user == b.user)
        );

        // B's own stream has the welcome only
        let b_events = drain(&mut rx_b);
        assert_eq!(b_events.len(), 1);
        assert!(matches!(b_events[0], ServerMessage::Welcome { .. }));
    }

    #[tokio::test]
    async fn test_welcome_carries_history() {
        let broker = test_broker();
        let (a, mut rx_a) = join(&broker).await;
        drain(&mut rx_a);

        broker
            .handle_chat(a.session_id(), String::new(), String::new(), "one".into())
            .await;
        broker
            .handle_chat(a.session_id(), String::new(), String::new(), "two".into())
            .await;

        let (_b, mut rx_b) = join(&broker).await;
        match rx_b.try_recv() {
            Ok(ServerMessage::Welcome { messages, .. }) => {
                let payloads: Vec<&str> =
                    messages.iter().map(|m| m.payload.as_str()).collect();
                assert_eq!(payloads, vec!["one", "two"]);
            }
            other => panic!("Expected welcome, got {:?}", other),
        }
    }

    // =========================================================================
    // Message routing tests
    // =========================================================================

    #[tokio::test]
    async fn test_message_fans_out_to_everyone_including_sender() {
        let broker = test_broker();
        let (a, mut rx_a) = join(&broker).await;
        let (_b, mut rx_b) = join(&broker).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        broker
            .handle_chat(a.session_id(), String::new(), String::new(), "hi".into())
            .await;

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.try_recv() {
                Ok(ServerMessage::ChatMessage { message }) => {
                    assert_eq!(message.payload, "hi");
                    assert_eq!(message.username, a.user.username);
                    assert!(message.key_fingerprint.is_empty());
                }
                other => panic!("Expected chat message, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_message_finalized_server_side() {
        let broker = test_broker();
        let (a, mut rx_a) = join(&broker).await;
        drain(&mut rx_a);

        let before = unix_millis();
        broker
            .handle_chat(a.session_id(), "fp".into(), "ek".into(), "hello".into())
            .await;

        match rx_a.try_recv() {
            Ok(ServerMessage::ChatMessage { message }) => {
                // Server-assigned UUID, hyphenated form
                assert_eq!(message.id.len(), 36);
                assert!(message.timestamp >= before);
                assert_eq!(message.key_fingerprint, "fp");
                assert_eq!(message.envelope_key, "ek");
            }
            other => panic!("Expected chat message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_payload_dropped_silently() {
        let broker = test_broker();
        let (a, mut rx_a) = join(&broker).await;
        drain(&mut rx_a);

        broker
            .handle_chat(a.session_id(), String::new(), String::new(), "   ".into())
            .await;

        assert!(rx_a.try_recv().is_err());
        // And nothing landed in history
        let (_b, mut rx_b) = join(&broker).await;
        match rx_b.try_recv() {
            Ok(ServerMessage::Welcome { messages, .. }) => assert!(messages.is_empty()),
            other => panic!("Expected welcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_fields_truncated() {
        let broker = test_broker();
        let (a, mut rx_a) = join(&broker).await;
        drain(&mut rx_a);

        broker
            .handle_chat(
                a.session_id(),
                "f".repeat(MAX_FINGERPRINT_CHARS + 7),
                "k".repeat(MAX_ENVELOPE_KEY_CHARS + 7),
                "p".repeat(MAX_PAYLOAD_CHARS + 7),
            )
            .await;

        match rx_a.try_recv() {
            Ok(ServerMessage::ChatMessage { message }) => {
                assert_eq!(message.key_fingerprint.len(), MAX_FINGERPRINT_CHARS);
                assert_eq!(message.envelope_key.len(), MAX_ENVELOPE_KEY_CHARS);
                assert_eq!(message.payload.len(), MAX_PAYLOAD_CHARS);
            }
            other => panic!("Expected chat message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_welcome_history_and_event_stream_never_overlap() {
        use std::collections::HashSet;

        // A connect racing a busy sender must hand the new session each
        // message exactly once: in the welcome history or as a live event,
        // with the welcome always first.
        for _ in 0..10 {
            let broker = Broker::new(
                &BrokerConfig {
                    rate_limit_max_messages: 0,
                    ..BrokerConfig::default()
                },
                false,
            );
            let (sender, _rx_sender) = join(&broker).await;

            let hammer = {
                let broker = broker.clone();
                let id = sender.session_id();
                tokio::spawn(async move {
                    for i in 0..100 {
                        broker
                            .handle_chat(id, String::new(), String::new(), format!("m{}", i))
                            .await;
                    }
                })
            };

            let (_observer, mut rx_observer) = join(&broker).await;
            hammer.await.expect("Sender task panicked");

            let mut events = drain(&mut rx_observer);
            assert!(!events.is_empty());
            let welcome_ids: HashSet<String> = match events.remove(0) {
                ServerMessage::Welcome { messages, .. } => {
                    messages.into_iter().map(|m| m.id).collect()
                }
                other => panic!("First event was not the welcome: {:?}", other),
            };
            let live_ids: Vec<String> = events
                .into_iter()
                .filter_map(|e| match e {
                    ServerMessage::ChatMessage { message } => Some(message.id),
                    _ => None,
                })
                .collect();

            // Every message arrived exactly once
            assert_eq!(welcome_ids.len() + live_ids.len(), 100);
            for id in &live_ids {
                assert!(
                    !welcome_ids.contains(id),
                    "Message delivered both in welcome history and as an event"
                );
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_session_leaves_no_rate_limit_state() {
        let broker = test_broker();

        broker
            .handle_chat(42, String::new(), String::new(), "ghost".into())
            .await;

        assert!(!broker.rate_limiter.has_entry(42));
    }

    #[tokio::test]
    async fn test_message_from_unknown_session_dropped() {
        let broker = test_broker();
        let (_a, mut rx_a) = join(&broker).await;
        drain(&mut rx_a);

        broker
            .handle_chat(9999, String::new(), String::new(), "ghost".into())
            .await;

        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_timestamps_never_decrease() {
        let broker = test_broker();
        let (a, mut rx_a) = join(&broker).await;
        drain(&mut rx_a);

        for i in 0..20 {
            broker
                .handle_chat(
                    a.session_id(),
                    String::new(),
                    String::new(),
                    format!("m{}", i),
                )
                .await;
        }

        let timestamps: Vec<u64> = drain(&mut rx_a)
            .into_iter()
            .filter_map(|e| match e {
                ServerMessage::ChatMessage { message } => Some(message.timestamp),
                _ => None,
            })
            .collect();
        assert_eq!(timestamps.len(), 20);
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    }

    // =========================================================================
    // Rate limiting tests
    // =========================================================================

    #[tokio::test]
    async fn test_rate_limit_drops_excess() {
        let broker = strict_broker(3);
        let (a, mut rx_a) = join(&broker).await;
        drain(&mut rx_a);

        for i in 0..5 {
            broker
                .handle_chat(
                    a.session_id(),
                    String::new(),
                    String::new(),
                    format!("m{}", i),
                )
                .await;
        }

        let delivered = drain(&mut rx_a)
            .into_iter()
            .filter(|e| matches!(e, ServerMessage::ChatMessage { .. }))
            .count();
        assert_eq!(delivered, 3);
    }

    #[tokio::test]
    async fn test_rate_limit_is_per_session() {
        let broker = strict_broker(1);
        let (a, mut rx_a) = join(&broker).await;
        let (b, _rx_b) = join(&broker).await;
        drain(&mut rx_a);

        broker
            .handle_chat(a.session_id(), String::new(), String::new(), "a1".into())
            .await;
        broker
            .handle_chat(a.session_id(), String::new(), String::new(), "a2".into())
            .await;
        broker
            .handle_chat(b.session_id(), String::new(), String::new(), "b1".into())
            .await;

        let payloads: Vec<String> = drain(&mut rx_a)
            .into_iter()
            .filter_map(|e| match e {
                ServerMessage::ChatMessage { message } => Some(message.payload),
                _ => None,
            })
            .collect();
        // A's second message was dropped; B's first went through
        assert_eq!(payloads, vec!["a1", "b1"]);
    }

    // =========================================================================
    // Disconnect tests
    // =========================================================================

    #[tokio::test]
    async fn test_disconnect_announces_departure() {
        let broker = test_broker();
        let (a, _rx_a) = join(&broker).await;
        let (b, mut rx_b) = join(&broker).await;
        drain(&mut rx_b);

        broker.disconnect(a.session_id()).await;

        let events = drain(&mut rx_b);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ServerMessage::UserLeft { user } if *user == a.user));

        // A is gone from the next welcome's presence list
        let (c, mut rx_c) = join(&broker).await;
        match rx_c.try_recv() {
            Ok(ServerMessage::Welcome { users, .. }) => {
                assert_eq!(users, vec![b.user, c.user.clone()]);
            }
            other => panic!("Expected welcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_unknown_session_is_noop() {
        let broker = test_broker();
        let (_a, mut rx_a) = join(&broker).await;
        drain(&mut rx_a);

        broker.disconnect(9999).await;

        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_messages_after_disconnect_dropped() {
        let broker = test_broker();
        let (a, _rx_a) = join(&broker).await;
        let (_b, mut rx_b) = join(&broker).await;
        drain(&mut rx_b);

        broker.disconnect(a.session_id()).await;
        drain(&mut rx_b);

        broker
            .handle_chat(a.session_id(), String::new(), String::new(), "late".into())
            .await;

        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_resets_rate_limit_state() {
        let broker = strict_broker(1);
        let (a, mut rx_a) = join(&broker).await;
        drain(&mut rx_a);

        broker
            .handle_chat(a.session_id(), String::new(), String::new(), "m1".into())
            .await;
        broker.disconnect(a.session_id()).await;

        // A new session may reuse nothing, but the old counter must be gone
        let (b, mut rx_b) = join(&broker).await;
        drain(&mut rx_b);
        broker
            .handle_chat(b.session_id(), String::new(), String::new(), "m2".into())
            .await;
        assert!(matches!(
            rx_b.try_recv(),
            Ok(ServerMessage::ChatMessage { .. })
        ));
    }
}
