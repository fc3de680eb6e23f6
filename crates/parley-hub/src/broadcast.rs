use std::sync::Arc;

use tracing::{debug, warn};

use parley_core::ids::{ConnectionId, SessionId};
use parley_core::protocol::ServerEvent;

use crate::connections::ConnectionRegistry;

/// Fans events out to every connection bound to a session. Serializes each
/// event once; a connection that cannot accept the frame is skipped and
/// logged, never retried, and never blocks the others.
#[derive(Clone)]
pub struct Broadcaster {
    connections: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(connections: Arc<ConnectionRegistry>) -> Self {
        Self { connections }
    }

    /// Deliver to all connections in the session, minus `exclude`. Returns
    /// the number of connections the frame was queued for.
    pub fn broadcast(
        &self,
        session_id: &SessionId,
        event: &ServerEvent,
        exclude: Option<&ConnectionId>,
    ) -> usize {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(event = event.event_type(), error = %e, "failed to serialize event");
                return 0;
            }
        };

        let mut delivered = 0;
        for conn in self.connections.connections_in(session_id) {
            if Some(&conn.id) == exclude {
                continue;
            }
            if conn.try_send(frame.clone()) {
                delivered += 1;
            } else {
                debug!(
                    connection_id = %conn.id,
                    session_id = %session_id,
                    event = event.event_type(),
                    "delivery skipped"
                );
            }
        }
        delivered
    }

    /// Deliver to a single connection.
    pub fn send(&self, connection_id: &ConnectionId, event: &ServerEvent) -> bool {
        let Some(conn) = self.connections.get(connection_id) else {
            return false;
        };
        match serde_json::to_string(event) {
            Ok(frame) => conn.try_send(frame),
            Err(e) => {
                warn!(event = event.event_type(), error = %e, "failed to serialize event");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::ids::UserId;

    fn setup() -> (Arc<ConnectionRegistry>, Broadcaster) {
        let registry = Arc::new(ConnectionRegistry::new(32));
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        (registry, broadcaster)
    }

    #[tokio::test]
    async fn broadcast_reaches_all_bound_connections() {
        let (registry, broadcaster) = setup();
        let sid = SessionId::from_raw("s1");
        let (a, mut rx_a) = registry.register("127.0.0.1".parse().unwrap());
        let (b, mut rx_b) = registry.register("127.0.0.1".parse().unwrap());
        let (_outside, mut rx_c) = registry.register("127.0.0.1".parse().unwrap());
        registry.bind_session(&a, &sid).unwrap();
        registry.bind_session(&b, &sid).unwrap();

        let delivered = broadcaster.broadcast(&sid, &ServerEvent::HeartbeatAck, None);
        assert_eq!(delivered, 2);
        assert!(rx_a.recv().await.unwrap().contains("heartbeat_ack"));
        assert!(rx_b.recv().await.unwrap().contains("heartbeat_ack"));
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_excludes_sender() {
        let (registry, broadcaster) = setup();
        let sid = SessionId::from_raw("s1");
        let (a, mut rx_a) = registry.register("127.0.0.1".parse().unwrap());
        let (b, mut rx_b) = registry.register("127.0.0.1".parse().unwrap());
        registry.bind_session(&a, &sid).unwrap();
        registry.bind_session(&b, &sid).unwrap();

        let event = ServerEvent::Typing {
            session_id: sid.clone(),
            user_id: UserId::from_raw("u1"),
            is_typing: true,
        };
        let delivered = broadcaster.broadcast(&sid, &event, Some(&a));
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.recv().await.unwrap().contains("typing"));
    }

    #[test]
    fn full_queue_skipped_without_blocking_others() {
        let registry = Arc::new(ConnectionRegistry::new(1));
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let sid = SessionId::from_raw("s1");
        let (stuck, _rx_stuck) = registry.register("127.0.0.1".parse().unwrap());
        let (healthy, _rx_healthy) = registry.register("127.0.0.1".parse().unwrap());
        registry.bind_session(&stuck, &sid).unwrap();
        registry.bind_session(&healthy, &sid).unwrap();

        // Fill the stuck connection's queue
        registry.get(&stuck).unwrap().try_send("filler".into());

        let delivered = broadcaster.broadcast(&sid, &ServerEvent::HeartbeatAck, None);
        assert_eq!(delivered, 1);
    }

    #[tokio::test]
    async fn send_targets_one_connection() {
        let (registry, broadcaster) = setup();
        let (id, mut rx) = registry.register("127.0.0.1".parse().unwrap());

        assert!(broadcaster.send(&id, &ServerEvent::error("nope")));
        assert!(rx.recv().await.unwrap().contains("nope"));
        assert!(!broadcaster.send(&ConnectionId::from_raw("conn_ghost"), &ServerEvent::HeartbeatAck));
    }
}
