use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use parley_ai::Responder;
use parley_core::auth::TokenVerifier;
use parley_core::errors::HubError;
use parley_core::ids::{ConnectionId, SessionId, UserId};
use parley_core::protocol::{parse_client_event, ClientEvent, ServerEvent};
use parley_store::MessageArchive;

use crate::admission::AdmissionGate;
use crate::broadcast::Broadcaster;
use crate::connections::ConnectionRegistry;
use crate::orchestrator::{TurnJob, TurnOrchestrator};
use crate::sessions::{Disposition, JoinOptions, SessionRegistry};

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub max_connections_per_addr: usize,
    pub max_context_messages: usize,
    pub max_send_queue: usize,
    pub idle_timeout: Duration,
    pub session_grace: Duration,
    pub default_session_minutes: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections_per_addr: 50,
            max_context_messages: 15,
            max_send_queue: 256,
            idle_timeout: Duration::from_secs(300),
            session_grace: Duration::from_secs(120),
            default_session_minutes: 30,
        }
    }
}

/// Central coordinator: owns the registries, the admission gate, the
/// broadcaster and the turn orchestrator, and dispatches every inbound
/// client event.
pub struct Hub {
    config: HubConfig,
    connections: Arc<ConnectionRegistry>,
    sessions: Arc<SessionRegistry>,
    gate: AdmissionGate,
    broadcaster: Broadcaster,
    orchestrator: TurnOrchestrator,
    verifier: Arc<dyn TokenVerifier>,
    /// Deferred deletion tasks keyed by session, aborted when a grace-window
    /// rejoin or an explicit end supersedes them.
    pending_deletions: Arc<DashMap<SessionId, JoinHandle<()>>>,
}

impl Hub {
    pub fn new(
        config: HubConfig,
        responder: Arc<dyn Responder>,
        verifier: Arc<dyn TokenVerifier>,
        archive: Option<Arc<MessageArchive>>,
    ) -> Self {
        let connections = Arc::new(ConnectionRegistry::new(config.max_send_queue));
        let sessions = Arc::new(SessionRegistry::new(config.default_session_minutes));
        let broadcaster = Broadcaster::new(Arc::clone(&connections));
        let orchestrator = TurnOrchestrator::new(
            Arc::clone(&sessions),
            broadcaster.clone(),
            responder,
            archive,
            config.max_context_messages,
        );
        let gate = AdmissionGate::new(config.max_connections_per_addr);

        Self {
            config,
            connections,
            sessions,
            gate,
            broadcaster,
            orchestrator,
            verifier,
            pending_deletions: Arc::new(DashMap::new()),
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Admit and register a new connection. The admission check happens
    /// strictly before registration; a rejected peer leaves no trace.
    pub fn connect(
        &self,
        remote_addr: IpAddr,
    ) -> Result<(ConnectionId, mpsc::Receiver<String>), HubError> {
        self.gate.admit(remote_addr)?;
        let (id, rx) = self.connections.register(remote_addr);
        self.broadcaster.send(
            &id,
            &ServerEvent::ConnectionEstablished {
                connection_id: id.clone(),
            },
        );
        info!(connection_id = %id, %remote_addr, "connection established");
        Ok((id, rx))
    }

    /// Tear a connection down. Safe to call more than once per connection;
    /// exactly one call does the work, so the gate release and session
    /// departure happen exactly once.
    pub fn disconnect(&self, connection_id: &ConnectionId) {
        let Some(conn) = self.connections.unregister(connection_id) else {
            return;
        };
        if let (Some(session_id), Some(user_id)) = (conn.session_id(), conn.user_id()) {
            self.depart_session(connection_id, &session_id, &user_id, false);
        }
        self.gate.release(conn.remote_addr);
        info!(connection_id = %connection_id, "connection closed");
    }

    /// Dispatch one inbound frame. Client-visible failures come back as
    /// `error` events on the same connection; the connection stays up.
    pub fn handle(&self, connection_id: &ConnectionId, raw: &str) {
        self.connections.touch(connection_id);

        let event = match parse_client_event(raw) {
            Ok(event) => event,
            Err(msg) => {
                self.broadcaster.send(connection_id, &ServerEvent::error(msg));
                return;
            }
        };

        let result = match event {
            ClientEvent::Auth { token } => self.on_auth(connection_id, &token),
            ClientEvent::Heartbeat => self.on_heartbeat(connection_id),
            ClientEvent::JoinSession {
                session_id,
                name,
                is_host,
                duration_minutes,
                is_multi_user,
            } => self.on_join(
                connection_id,
                session_id,
                JoinOptions {
                    name,
                    is_host,
                    duration_minutes,
                    is_multi_user,
                },
            ),
            ClientEvent::LeaveSession { session_id } => self.on_leave(connection_id, &session_id),
            ClientEvent::ChatMessage {
                session_id,
                content,
                request_ai_reply,
            } => self.on_chat_message(connection_id, &session_id, content, request_ai_reply),
            ClientEvent::Typing {
                session_id,
                is_typing,
            } => self.on_typing(connection_id, &session_id, is_typing),
            ClientEvent::InviteUser {
                session_id,
                invitee,
            } => self.on_invite(connection_id, &session_id, invitee),
            ClientEvent::RemoveUser {
                session_id,
                user_id,
            } => self.on_remove_user(connection_id, &session_id, &user_id),
        };

        if let Err(e) = result {
            debug!(connection_id = %connection_id, kind = e.kind(), error = %e, "request failed");
            self.broadcaster
                .send(connection_id, &ServerEvent::error(e.to_string()));
        }
    }

    fn on_auth(&self, connection_id: &ConnectionId, token: &str) -> Result<(), HubError> {
        let user_id = self.verifier.verify(token)?;
        self.connections.authenticate(connection_id, user_id.clone())?;
        info!(connection_id = %connection_id, user_id = %user_id, "authenticated");
        self.broadcaster
            .send(connection_id, &ServerEvent::AuthSuccess { user_id });
        Ok(())
    }

    fn on_heartbeat(&self, connection_id: &ConnectionId) -> Result<(), HubError> {
        self.broadcaster.send(connection_id, &ServerEvent::HeartbeatAck);
        Ok(())
    }

    fn on_join(
        &self,
        connection_id: &ConnectionId,
        session_id: Option<SessionId>,
        opts: JoinOptions,
    ) -> Result<(), HubError> {
        let user_id = self.require_auth(connection_id)?;
        let session_id = session_id.unwrap_or_else(SessionId::new);

        // A rejoin during the grace window supersedes the scheduled deletion.
        if let Some((_, task)) = self.pending_deletions.remove(&session_id) {
            task.abort();
            debug!(session_id = %session_id, "scheduled deletion superseded by rejoin");
        }

        self.connections.bind_session(connection_id, &session_id)?;
        let effects = self
            .sessions
            .join_or_create(session_id.clone(), user_id.clone(), opts);

        info!(
            connection_id = %connection_id,
            user_id = %user_id,
            session_id = %session_id,
            "joined session"
        );

        self.broadcaster.send(
            connection_id,
            &ServerEvent::SessionJoined {
                snapshot: effects.snapshot.clone(),
            },
        );
        self.broadcaster.broadcast(
            &session_id,
            &ServerEvent::ParticipantUpdate {
                session_id: session_id.clone(),
                participants: effects.snapshot.participants,
            },
            None,
        );

        if effects.greeting_needed {
            self.orchestrator.submit(&session_id, TurnJob::Greeting);
        }
        Ok(())
    }

    fn on_leave(
        &self,
        connection_id: &ConnectionId,
        session_id: &SessionId,
    ) -> Result<(), HubError> {
        let user_id = self.require_auth(connection_id)?;
        self.require_bound(connection_id, session_id)?;
        self.depart_session(connection_id, session_id, &user_id, true);
        Ok(())
    }

    /// Shared departure path for voluntary leave, disconnect and eviction.
    /// `notify_leaver` controls whether the departing connection still gets
    /// its `session_left` acknowledgement.
    fn depart_session(
        &self,
        connection_id: &ConnectionId,
        session_id: &SessionId,
        user_id: &UserId,
        notify_leaver: bool,
    ) {
        self.connections.unbind_session(connection_id);

        let Some(outcome) = self.sessions.leave(session_id, user_id) else {
            return;
        };

        if notify_leaver {
            self.broadcaster.send(
                connection_id,
                &ServerEvent::SessionLeft {
                    session_id: session_id.clone(),
                },
            );
        }
        self.broadcaster.broadcast(
            session_id,
            &ServerEvent::ParticipantUpdate {
                session_id: session_id.clone(),
                participants: outcome.participants,
            },
            None,
        );

        match outcome.disposition {
            Disposition::Remaining => {}
            Disposition::HostDepartedNoHumans => {
                info!(session_id = %session_id, "host departed, session entering grace window");
                self.broadcaster.broadcast(
                    session_id,
                    &ServerEvent::SessionEnded {
                        session_id: session_id.clone(),
                    },
                    None,
                );
                self.schedule_deletion(session_id.clone());
            }
            Disposition::EmptiedNoHumans => {
                self.teardown_session(session_id);
            }
        }
    }

    fn on_chat_message(
        &self,
        connection_id: &ConnectionId,
        session_id: &SessionId,
        content: String,
        request_ai_reply: bool,
    ) -> Result<(), HubError> {
        let user_id = self.require_auth(connection_id)?;
        self.require_bound(connection_id, session_id)?;
        match self.sessions.is_active(session_id) {
            Some(true) => {}
            Some(false) => {
                return Err(HubError::SessionState("session is not active".into()));
            }
            None => return Err(HubError::SessionState("session not found".into())),
        }

        // The assistant replies in solo sessions by default; in multi-user
        // sessions only when explicitly asked.
        let is_multi_user = self.sessions.is_multi_user(session_id).unwrap_or(false);
        let want_reply = !is_multi_user || request_ai_reply;

        self.orchestrator.submit(
            session_id,
            TurnJob::UserTurn {
                author: user_id,
                content,
                want_reply,
                origin: connection_id.clone(),
            },
        );
        Ok(())
    }

    fn on_typing(
        &self,
        connection_id: &ConnectionId,
        session_id: &SessionId,
        is_typing: bool,
    ) -> Result<(), HubError> {
        let user_id = self.require_auth(connection_id)?;
        self.require_bound(connection_id, session_id)?;
        self.broadcaster.broadcast(
            session_id,
            &ServerEvent::Typing {
                session_id: session_id.clone(),
                user_id,
                is_typing,
            },
            Some(connection_id),
        );
        Ok(())
    }

    fn on_invite(
        &self,
        connection_id: &ConnectionId,
        session_id: &SessionId,
        invitee: UserId,
    ) -> Result<(), HubError> {
        self.require_auth(connection_id)?;
        self.require_bound(connection_id, session_id)?;
        // Invite delivery happens out of band; the hub only acknowledges
        // issuance to the requester.
        self.broadcaster.send(
            connection_id,
            &ServerEvent::InviteSent {
                session_id: session_id.clone(),
                invitee,
            },
        );
        Ok(())
    }

    fn on_remove_user(
        &self,
        connection_id: &ConnectionId,
        session_id: &SessionId,
        target: &UserId,
    ) -> Result<(), HubError> {
        let requester = self.require_auth(connection_id)?;
        self.require_bound(connection_id, session_id)?;

        let participants = self
            .sessions
            .remove_participant(session_id, &requester, target)?;

        // Tell the target first, while its binding still exists.
        if let Some(target_conn) = self.connections.find_by_user(session_id, target) {
            self.broadcaster.send(
                &target_conn.id,
                &ServerEvent::RemovedFromSession {
                    session_id: session_id.clone(),
                },
            );
            self.connections.unbind_session(&target_conn.id);
        }

        self.broadcaster.broadcast(
            session_id,
            &ServerEvent::UserRemoved {
                session_id: session_id.clone(),
                user_id: target.clone(),
            },
            None,
        );
        self.broadcaster.broadcast(
            session_id,
            &ServerEvent::ParticipantUpdate {
                session_id: session_id.clone(),
                participants,
            },
            None,
        );
        info!(session_id = %session_id, user_id = %target, "participant removed by host");
        Ok(())
    }

    /// End a session on the host's behalf. Used by the REST surface; the
    /// socket path ends sessions through departure.
    pub fn end_session(
        &self,
        session_id: &SessionId,
        requester: &UserId,
    ) -> Result<(), HubError> {
        self.sessions.end(session_id, requester)?;
        self.broadcaster.broadcast(
            session_id,
            &ServerEvent::SessionEnded {
                session_id: session_id.clone(),
            },
            None,
        );
        for conn in self.connections.connections_in(session_id) {
            self.connections.unbind_session(&conn.id);
        }
        self.teardown_session(session_id);
        Ok(())
    }

    /// One reaper sweep: evict idle connections through the normal
    /// disconnect path, then delete sessions with no human members. Returns
    /// (evicted connections, reaped sessions).
    pub fn reap(&self) -> (usize, usize) {
        let idle = self.connections.idle_connections(self.config.idle_timeout);
        let evicted = idle.len();
        for connection_id in idle {
            info!(connection_id = %connection_id, "evicting idle connection");
            self.disconnect(&connection_id);
        }

        let mut reaped = 0;
        for session_id in self.sessions.sessions_with_no_humans() {
            // Sessions inside their grace window are left to their scheduled
            // deletion task.
            if self.pending_deletions.contains_key(&session_id) {
                continue;
            }
            if self.sessions.remove(&session_id) {
                self.orchestrator.shutdown_session(&session_id);
                info!(session_id = %session_id, "reaped session with no human members");
                reaped += 1;
            }
        }
        (evicted, reaped)
    }

    pub fn idle_timeout(&self) -> Duration {
        self.config.idle_timeout
    }

    #[cfg(test)]
    pub(crate) fn has_pending_deletion(&self, session_id: &SessionId) -> bool {
        self.pending_deletions.contains_key(session_id)
    }

    fn schedule_deletion(&self, session_id: SessionId) {
        let sessions = Arc::clone(&self.sessions);
        let pending = Arc::clone(&self.pending_deletions);
        let orchestrator = self.orchestrator.clone();
        let grace = self.config.session_grace;

        let task_session = session_id.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if sessions.remove_if_torn_down(&task_session) {
                orchestrator.shutdown_session(&task_session);
                info!(session_id = %task_session, "session deleted after grace window");
            }
            pending.remove(&task_session);
        });

        if let Some(previous) = self.pending_deletions.insert(session_id, task) {
            previous.abort();
        }
    }

    fn teardown_session(&self, session_id: &SessionId) {
        if let Some((_, task)) = self.pending_deletions.remove(session_id) {
            task.abort();
        }
        self.orchestrator.shutdown_session(session_id);
        if self.sessions.remove(session_id) {
            info!(session_id = %session_id, "session deleted");
        }
    }

    fn require_auth(&self, connection_id: &ConnectionId) -> Result<UserId, HubError> {
        self.connections
            .get(connection_id)
            .and_then(|conn| conn.user_id())
            .ok_or_else(|| HubError::Auth("authentication required".into()))
    }

    fn require_bound(
        &self,
        connection_id: &ConnectionId,
        session_id: &SessionId,
    ) -> Result<(), HubError> {
        let bound = self
            .connections
            .get(connection_id)
            .and_then(|conn| conn.session_id());
        if bound.as_ref() == Some(session_id) {
            Ok(())
        } else {
            Err(HubError::SessionState(
                "connection is not in that session".into(),
            ))
        }
    }
}
