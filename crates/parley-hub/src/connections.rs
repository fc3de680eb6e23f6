use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use parley_core::errors::HubError;
use parley_core::ids::{ConnectionId, SessionId, UserId};

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Auth and session-binding state. Guarded together so a connection can
/// never observe a user id without its binding rules.
#[derive(Debug, Default)]
struct ConnState {
    user_id: Option<UserId>,
    session_id: Option<SessionId>,
}

/// One live transport link. Owned exclusively by the `ConnectionRegistry`;
/// holds only the session *id* of its bound session, never the session.
pub struct Connection {
    pub id: ConnectionId,
    pub remote_addr: IpAddr,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_activity: AtomicU64,
    state: RwLock<ConnState>,
}

impl Connection {
    fn new(id: ConnectionId, remote_addr: IpAddr, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            remote_addr,
            tx,
            connected: AtomicBool::new(true),
            last_activity: AtomicU64::new(now_secs()),
            state: RwLock::new(ConnState::default()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().user_id.is_some()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.state.read().user_id.clone()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.state.read().session_id.clone()
    }

    /// Stamp activity. Lock-free; called on every inbound frame.
    pub fn touch(&self) {
        self.last_activity.store(now_secs(), Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let last = self.last_activity.load(Ordering::Relaxed);
        Duration::from_secs(now_secs().saturating_sub(last))
    }

    /// Queue an outbound frame. Returns false when the peer is gone or the
    /// send queue is full; callers treat both as a skipped delivery.
    pub fn try_send(&self, frame: String) -> bool {
        if !self.is_connected() {
            return false;
        }
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                tracing::warn!(
                    connection_id = %self.id,
                    frame_len = frame.len(),
                    "send queue full, dropping frame"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate_activity(&self, by: Duration) {
        let stamped = now_secs().saturating_sub(by.as_secs());
        self.last_activity.store(stamped, Ordering::Relaxed);
    }
}

/// Registry of all live connections. The single owner of `Connection`
/// objects; everything else refers to connections by id.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue,
        }
    }

    /// Allocate a new unauthenticated, unbound connection. The returned
    /// receiver is the outbound frame stream for the transport writer.
    pub fn register(&self, remote_addr: IpAddr) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let conn = Arc::new(Connection::new(id.clone(), remote_addr, tx));
        self.connections.insert(id.clone(), conn);
        (id, rx)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Mark a connection authenticated. At most one user id per connection;
    /// re-authenticating as the same user is a no-op.
    pub fn authenticate(&self, id: &ConnectionId, user_id: UserId) -> Result<(), HubError> {
        let conn = self
            .get(id)
            .ok_or_else(|| HubError::Auth("unknown connection".into()))?;
        let mut state = conn.state.write();
        match &state.user_id {
            Some(existing) if *existing != user_id => Err(HubError::Auth(
                "connection is already authenticated as another user".into(),
            )),
            _ => {
                state.user_id = Some(user_id);
                Ok(())
            }
        }
    }

    pub fn touch(&self, id: &ConnectionId) {
        if let Some(conn) = self.connections.get(id) {
            conn.touch();
        }
    }

    /// Bind a connection to a session. A connection is bound to at most one
    /// session at a time; rebinding to the same session is idempotent.
    pub fn bind_session(&self, id: &ConnectionId, session_id: &SessionId) -> Result<(), HubError> {
        let conn = self
            .get(id)
            .ok_or_else(|| HubError::SessionState("unknown connection".into()))?;
        let mut state = conn.state.write();
        match &state.session_id {
            Some(bound) if bound != session_id => Err(HubError::SessionState(format!(
                "connection is already in session {bound}"
            ))),
            _ => {
                state.session_id = Some(session_id.clone());
                Ok(())
            }
        }
    }

    pub fn unbind_session(&self, id: &ConnectionId) {
        if let Some(conn) = self.connections.get(id) {
            conn.state.write().session_id = None;
        }
    }

    /// Remove a connection. Idempotent; returns the removed entry so the
    /// caller can drive session departure and gate release.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.remove(id).map(|(_, conn)| {
            conn.connected.store(false, Ordering::Relaxed);
            conn
        })
    }

    /// All connections currently bound to a session.
    pub fn connections_in(&self, session_id: &SessionId) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|e| e.value().session_id().as_ref() == Some(session_id))
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    /// The connection a given user has bound to a session, if any.
    pub fn find_by_user(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
    ) -> Option<Arc<Connection>> {
        self.connections
            .iter()
            .find(|e| {
                let state = e.value().state.read();
                state.session_id.as_ref() == Some(session_id)
                    && state.user_id.as_ref() == Some(user_id)
            })
            .map(|e| Arc::clone(e.value()))
    }

    /// Connections whose last activity is older than the threshold.
    pub fn idle_connections(&self, threshold: Duration) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|e| e.value().idle_for() >= threshold)
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[test]
    fn register_starts_unauthenticated_and_unbound() {
        let registry = ConnectionRegistry::new(32);
        let (id, _rx) = registry.register(addr());

        let conn = registry.get(&id).unwrap();
        assert!(!conn.is_authenticated());
        assert!(conn.session_id().is_none());
        assert!(conn.is_connected());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn authenticate_stamps_user() {
        let registry = ConnectionRegistry::new(32);
        let (id, _rx) = registry.register(addr());

        registry.authenticate(&id, UserId::from_raw("u1")).unwrap();
        let conn = registry.get(&id).unwrap();
        assert!(conn.is_authenticated());
        assert_eq!(conn.user_id().unwrap().as_str(), "u1");
    }

    #[test]
    fn at_most_one_user_per_connection() {
        let registry = ConnectionRegistry::new(32);
        let (id, _rx) = registry.register(addr());

        registry.authenticate(&id, UserId::from_raw("u1")).unwrap();
        // Same user again is fine
        registry.authenticate(&id, UserId::from_raw("u1")).unwrap();
        // A different user is not
        let err = registry.authenticate(&id, UserId::from_raw("u2"));
        assert!(matches!(err, Err(HubError::Auth(_))));
    }

    #[test]
    fn at_most_one_session_per_connection() {
        let registry = ConnectionRegistry::new(32);
        let (id, _rx) = registry.register(addr());
        let s1 = SessionId::from_raw("s1");
        let s2 = SessionId::from_raw("s2");

        registry.bind_session(&id, &s1).unwrap();
        registry.bind_session(&id, &s1).unwrap(); // idempotent
        assert!(matches!(
            registry.bind_session(&id, &s2),
            Err(HubError::SessionState(_))
        ));

        registry.unbind_session(&id);
        registry.bind_session(&id, &s2).unwrap();
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new(32);
        let (id, _rx) = registry.register(addr());

        let removed = registry.unregister(&id);
        assert!(removed.is_some());
        assert!(!removed.unwrap().is_connected());
        assert!(registry.unregister(&id).is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn connections_in_session() {
        let registry = ConnectionRegistry::new(32);
        let (a, _rx_a) = registry.register(addr());
        let (b, _rx_b) = registry.register(addr());
        let (_c, _rx_c) = registry.register(addr());
        let sid = SessionId::from_raw("s1");

        registry.bind_session(&a, &sid).unwrap();
        registry.bind_session(&b, &sid).unwrap();

        let bound = registry.connections_in(&sid);
        assert_eq!(bound.len(), 2);
    }

    #[test]
    fn find_by_user_in_session() {
        let registry = ConnectionRegistry::new(32);
        let (a, _rx_a) = registry.register(addr());
        let (b, _rx_b) = registry.register(addr());
        let sid = SessionId::from_raw("s1");

        registry.authenticate(&a, UserId::from_raw("u1")).unwrap();
        registry.authenticate(&b, UserId::from_raw("u2")).unwrap();
        registry.bind_session(&a, &sid).unwrap();
        registry.bind_session(&b, &sid).unwrap();

        let found = registry.find_by_user(&sid, &UserId::from_raw("u2")).unwrap();
        assert_eq!(found.id, b);
        assert!(registry.find_by_user(&sid, &UserId::from_raw("u3")).is_none());
    }

    #[test]
    fn idle_connections_detected() {
        let registry = ConnectionRegistry::new(32);
        let (fresh, _rx_a) = registry.register(addr());
        let (stale, _rx_b) = registry.register(addr());

        registry
            .get(&stale)
            .unwrap()
            .backdate_activity(Duration::from_secs(600));

        let idle = registry.idle_connections(Duration::from_secs(300));
        assert_eq!(idle, vec![stale.clone()]);
        assert_ne!(idle[0], fresh);
    }

    #[test]
    fn touch_resets_idle_clock() {
        let registry = ConnectionRegistry::new(32);
        let (id, _rx) = registry.register(addr());
        registry
            .get(&id)
            .unwrap()
            .backdate_activity(Duration::from_secs(600));

        registry.touch(&id);
        assert!(registry.idle_connections(Duration::from_secs(300)).is_empty());
    }

    #[tokio::test]
    async fn try_send_delivers_frames() {
        let registry = ConnectionRegistry::new(32);
        let (id, mut rx) = registry.register(addr());
        let conn = registry.get(&id).unwrap();

        assert!(conn.try_send("hello".into()));
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }

    #[test]
    fn try_send_full_queue_drops() {
        let registry = ConnectionRegistry::new(1);
        let (id, _rx) = registry.register(addr());
        let conn = registry.get(&id).unwrap();

        assert!(conn.try_send("first".into()));
        assert!(!conn.try_send("second".into()));
    }

    #[test]
    fn try_send_after_unregister_fails() {
        let registry = ConnectionRegistry::new(32);
        let (id, _rx) = registry.register(addr());
        let conn = registry.unregister(&id).unwrap();
        assert!(!conn.try_send("too late".into()));
    }
}
