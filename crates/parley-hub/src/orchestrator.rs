use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use parley_ai::Responder;
use parley_core::ids::{ConnectionId, SessionId, UserId};
use parley_core::protocol::ServerEvent;
use parley_store::MessageArchive;

use crate::broadcast::Broadcaster;
use crate::sessions::SessionRegistry;

/// Sent when the responder fails; the conversation must never stall silently.
pub const FALLBACK_REPLY: &str =
    "I'm sorry, I'm having trouble responding right now. Please give me a moment and try again.";
pub const FALLBACK_GREETING: &str =
    "Hello, and welcome. I'm here whenever you're ready to talk.";

/// A unit of work on a session's turn queue.
pub enum TurnJob {
    /// A participant's message: append, broadcast, then optionally run an
    /// AI turn.
    UserTurn {
        author: UserId,
        content: String,
        want_reply: bool,
        origin: ConnectionId,
    },
    /// The assistant's opening message for a fresh session.
    Greeting,
}

struct Inner {
    sessions: Arc<SessionRegistry>,
    broadcaster: Broadcaster,
    responder: Arc<dyn Responder>,
    archive: Option<Arc<MessageArchive>>,
    max_context: usize,
}

/// Serializes AI work per session. Each session gets one worker task fed by
/// an ordered queue; jobs for a session run strictly in submission order, so
/// a message that arrives while a reply is being generated waits its turn.
/// Sessions never wait on each other.
#[derive(Clone)]
pub struct TurnOrchestrator {
    inner: Arc<Inner>,
    workers: Arc<DashMap<SessionId, mpsc::UnboundedSender<TurnJob>>>,
}

impl TurnOrchestrator {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        broadcaster: Broadcaster,
        responder: Arc<dyn Responder>,
        archive: Option<Arc<MessageArchive>>,
        max_context: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions,
                broadcaster,
                responder,
                archive,
                max_context,
            }),
            workers: Arc::new(DashMap::new()),
        }
    }

    /// Enqueue a job for a session, spawning its worker on first use.
    /// Submission order from a single caller is preserved.
    pub fn submit(&self, session_id: &SessionId, job: TurnJob) {
        let tx = self
            .workers
            .entry(session_id.clone())
            .or_insert_with(|| self.spawn_worker(session_id.clone()))
            .clone();
        if let Err(mpsc::error::SendError(job)) = tx.send(job) {
            // Worker already shut down; re-spawn once for a live session.
            if self.inner.sessions.contains(session_id) {
                let tx = self.spawn_worker(session_id.clone());
                let _ = tx.send(job);
                self.workers.insert(session_id.clone(), tx);
            }
        }
    }

    /// Drop a session's queue. The worker drains what it already accepted and
    /// exits; nothing new can be enqueued under this session id until a fresh
    /// worker is spawned.
    pub fn shutdown_session(&self, session_id: &SessionId) {
        self.workers.remove(session_id);
    }

    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }

    fn spawn_worker(&self, session_id: SessionId) -> mpsc::UnboundedSender<TurnJob> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                inner.process(&session_id, job).await;
            }
            debug!(session_id = %session_id, "turn worker stopped");
        });
        tx
    }
}

impl Inner {
    async fn process(&self, session_id: &SessionId, job: TurnJob) {
        match job {
            TurnJob::UserTurn {
                author,
                content,
                want_reply,
                origin,
            } => {
                match self.sessions.append_message(session_id, author, content) {
                    Ok(message) => {
                        self.archive(&message);
                        self.broadcaster.broadcast(
                            session_id,
                            &ServerEvent::ChatMessage {
                                session_id: session_id.clone(),
                                message,
                            },
                            None,
                        );
                        if want_reply {
                            self.ai_turn(session_id, false).await;
                        }
                    }
                    Err(e) => {
                        // The session went away between submit and append;
                        // tell the sender, touch nothing else.
                        self.broadcaster.send(&origin, &ServerEvent::error(e.to_string()));
                    }
                }
            }
            TurnJob::Greeting => self.ai_turn(session_id, true).await,
        }
    }

    /// One full assistant turn: typing indicator, bounded context, responder
    /// call, append and broadcast. Failures degrade to a fallback message so
    /// the append/broadcast contract holds either way.
    async fn ai_turn(&self, session_id: &SessionId, greeting: bool) {
        self.set_typing(session_id, true);

        let result = if greeting {
            self.responder.generate_greeting().await
        } else {
            let window = self.sessions.context_window(session_id, self.max_context);
            if window.is_empty() {
                // Session deleted mid-queue; nothing to respond to.
                self.set_typing(session_id, false);
                return;
            }
            self.responder.generate_reply(&window).await
        };

        let content = match result {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    responder = self.responder.name(),
                    error = %e,
                    "reply generation failed, sending fallback"
                );
                if greeting {
                    FALLBACK_GREETING.to_owned()
                } else {
                    FALLBACK_REPLY.to_owned()
                }
            }
        };

        self.set_typing(session_id, false);

        match self
            .sessions
            .append_message(session_id, UserId::assistant(), content)
        {
            Ok(message) => {
                self.archive(&message);
                self.broadcaster.broadcast(
                    session_id,
                    &ServerEvent::ChatMessage {
                        session_id: session_id.clone(),
                        message,
                    },
                    None,
                );
            }
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "session ended before reply landed");
            }
        }
    }

    fn set_typing(&self, session_id: &SessionId, is_typing: bool) {
        self.broadcaster.broadcast(
            session_id,
            &ServerEvent::Typing {
                session_id: session_id.clone(),
                user_id: UserId::assistant(),
                is_typing,
            },
            None,
        );
    }

    fn archive(&self, message: &parley_core::session::Message) {
        if let Some(archive) = &self.archive {
            if let Err(e) = archive.record(message) {
                warn!(message_id = %message.id, error = %e, "archive write failed");
            }
        }
    }
}
