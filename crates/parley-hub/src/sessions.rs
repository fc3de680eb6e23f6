use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;

use parley_core::errors::HubError;
use parley_core::ids::{SessionId, UserId};
use parley_core::session::{ChatTurn, Message, Participant, SessionSnapshot};

/// Parameters for joining (or creating) a session.
#[derive(Clone, Debug, Default)]
pub struct JoinOptions {
    pub name: Option<String>,
    pub is_host: bool,
    pub duration_minutes: Option<u32>,
    pub is_multi_user: bool,
}

/// What the caller must do after a successful join.
#[derive(Debug)]
pub struct JoinEffects {
    pub snapshot: SessionSnapshot,
    /// True exactly once per session: the host's first join of an empty log.
    pub greeting_needed: bool,
}

/// What the caller must do after a departure.
#[derive(Debug)]
pub struct LeaveOutcome {
    pub participants: Vec<Participant>,
    pub disposition: Disposition,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Human participants remain; the session continues unchanged.
    Remaining,
    /// The host left and no humans remain. The session has been marked
    /// inactive; the caller announces the end and schedules deferred
    /// deletion.
    HostDepartedNoHumans,
    /// A non-host left and no humans remain. The caller tears the session
    /// down immediately.
    EmptiedNoHumans,
}

struct Session {
    id: SessionId,
    host_user_id: Option<UserId>,
    participants: Vec<Participant>,
    log: Vec<Message>,
    duration_minutes: u32,
    is_multi_user: bool,
    active: bool,
    greeted: bool,
    created_at: String,
}

impl Session {
    fn new(id: SessionId, duration_minutes: u32, is_multi_user: bool) -> Self {
        Self {
            id,
            host_user_id: None,
            // Every session has exactly one assistant member from birth.
            participants: vec![Participant::Assistant],
            log: Vec::new(),
            duration_minutes,
            is_multi_user,
            active: true,
            greeted: false,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    fn human_count(&self) -> usize {
        self.participants.iter().filter(|p| p.is_human()).count()
    }

    fn find_human(&self, user_id: &UserId) -> Option<usize> {
        self.participants
            .iter()
            .position(|p| p.is_human() && p.user_id() == *user_id)
    }

    /// Insert or refresh a human participant. Idempotent per user id.
    fn upsert_human(&mut self, user_id: UserId, name: String, is_host: bool) {
        let entry = Participant::Human {
            user_id: user_id.clone(),
            name,
            is_host,
        };
        match self.find_human(&user_id) {
            Some(idx) => self.participants[idx] = entry,
            None => self.participants.push(entry),
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            host_user_id: self.host_user_id.clone(),
            participants: self.participants.clone(),
            messages: self.log.clone(),
            duration_minutes: self.duration_minutes,
            is_multi_user: self.is_multi_user,
            active: self.active,
            created_at: self.created_at.clone(),
        }
    }
}

/// In-memory registry of live sessions. Each session sits behind its own
/// mutex; all critical sections are short and never await.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Mutex<Session>>>,
    default_duration_minutes: u32,
}

impl SessionRegistry {
    pub fn new(default_duration_minutes: u32) -> Self {
        Self {
            sessions: DashMap::new(),
            default_duration_minutes,
        }
    }

    /// Join a session, creating it on first contact. Rejoining a session that
    /// is inactive but not yet deleted reactivates it.
    pub fn join_or_create(
        &self,
        session_id: SessionId,
        user_id: UserId,
        opts: JoinOptions,
    ) -> JoinEffects {
        let entry = self
            .sessions
            .entry(session_id.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Session::new(
                    session_id.clone(),
                    opts.duration_minutes.unwrap_or(self.default_duration_minutes),
                    opts.is_multi_user,
                )))
            })
            .clone();

        let mut session = entry.lock();
        session.active = true;

        let is_host = opts.is_host || session.host_user_id.as_ref() == Some(&user_id);
        if is_host && session.host_user_id.is_none() {
            session.host_user_id = Some(user_id.clone());
        }
        let name = opts.name.unwrap_or_else(|| user_id.as_str().to_owned());
        session.upsert_human(user_id, name, is_host);

        let greeting_needed = is_host && !session.greeted && session.log.is_empty();
        if greeting_needed {
            session.greeted = true;
        }

        JoinEffects {
            snapshot: session.snapshot(),
            greeting_needed,
        }
    }

    /// Remove a participant on voluntary departure. Missing sessions and
    /// non-member departures are not errors; departure must always converge.
    pub fn leave(&self, session_id: &SessionId, user_id: &UserId) -> Option<LeaveOutcome> {
        let entry = self.sessions.get(session_id)?.clone();
        let mut session = entry.lock();

        let was_member = match session.find_human(user_id) {
            Some(idx) => {
                session.participants.remove(idx);
                true
            }
            None => false,
        };

        let was_host = session.host_user_id.as_ref() == Some(user_id);
        let disposition = if session.human_count() > 0 {
            Disposition::Remaining
        } else if was_host && was_member {
            session.active = false;
            Disposition::HostDepartedNoHumans
        } else {
            Disposition::EmptiedNoHumans
        };

        Some(LeaveOutcome {
            participants: session.participants.clone(),
            disposition,
        })
    }

    /// Append a message to the session log. Rejected when the session is
    /// missing or inactive; the log itself is append-only.
    pub fn append_message(
        &self,
        session_id: &SessionId,
        author: UserId,
        content: impl Into<String>,
    ) -> Result<Message, HubError> {
        let entry = self
            .sessions
            .get(session_id)
            .ok_or_else(|| HubError::SessionState("session not found".into()))?
            .clone();
        let mut session = entry.lock();
        if !session.active {
            return Err(HubError::SessionState("session is not active".into()));
        }
        let message = Message::new(session_id.clone(), author, content);
        session.log.push(message.clone());
        Ok(message)
    }

    /// End a session on the host's explicit request.
    pub fn end(&self, session_id: &SessionId, requester: &UserId) -> Result<(), HubError> {
        let entry = self
            .sessions
            .get(session_id)
            .ok_or_else(|| HubError::SessionState("session not found".into()))?
            .clone();
        let mut session = entry.lock();
        if session.host_user_id.as_ref() != Some(requester) {
            return Err(HubError::Authorization(
                "only the host may end the session".into(),
            ));
        }
        session.active = false;
        Ok(())
    }

    /// Remove a participant at the host's request. Returns the updated
    /// participant list.
    pub fn remove_participant(
        &self,
        session_id: &SessionId,
        requester: &UserId,
        target: &UserId,
    ) -> Result<Vec<Participant>, HubError> {
        let entry = self
            .sessions
            .get(session_id)
            .ok_or_else(|| HubError::SessionState("session not found".into()))?
            .clone();
        let mut session = entry.lock();
        if session.host_user_id.as_ref() != Some(requester) {
            return Err(HubError::Authorization(
                "only the host may remove participants".into(),
            ));
        }
        if target.is_assistant() {
            return Err(HubError::SessionState(
                "the assistant cannot be removed".into(),
            ));
        }
        match session.find_human(target) {
            Some(idx) => {
                session.participants.remove(idx);
                Ok(session.participants.clone())
            }
            None => Err(HubError::SessionState(format!(
                "user {target} is not in the session"
            ))),
        }
    }

    /// The most recent `limit` log entries as responder context, oldest first.
    pub fn context_window(&self, session_id: &SessionId, limit: usize) -> Vec<ChatTurn> {
        match self.sessions.get(session_id) {
            Some(entry) => {
                let session = entry.lock();
                let skip = session.log.len().saturating_sub(limit);
                session.log[skip..].iter().map(ChatTurn::from_message).collect()
            }
            None => Vec::new(),
        }
    }

    pub fn snapshot(&self, session_id: &SessionId) -> Option<SessionSnapshot> {
        self.sessions.get(session_id).map(|e| e.lock().snapshot())
    }

    pub fn participants(&self, session_id: &SessionId) -> Option<Vec<Participant>> {
        self.sessions
            .get(session_id)
            .map(|e| e.lock().participants.clone())
    }

    pub fn is_active(&self, session_id: &SessionId) -> Option<bool> {
        self.sessions.get(session_id).map(|e| e.lock().active)
    }

    pub fn is_multi_user(&self, session_id: &SessionId) -> Option<bool> {
        self.sessions.get(session_id).map(|e| e.lock().is_multi_user)
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Delete a session unconditionally. Returns false when already gone.
    pub fn remove(&self, session_id: &SessionId) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Delete a session only if it is still torn down (inactive with no human
    /// members). Used by the deferred-deletion task so a grace-window rejoin
    /// that reactivated the session wins.
    pub fn remove_if_torn_down(&self, session_id: &SessionId) -> bool {
        self.sessions
            .remove_if(session_id, |_, entry| {
                let session = entry.lock();
                !session.active && session.human_count() == 0
            })
            .is_some()
    }

    /// Sessions with no human members, regardless of active flag. The reaper
    /// uses this to converge on states missed by the event-driven paths.
    pub fn sessions_with_no_humans(&self) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|e| e.value().lock().human_count() == 0)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Snapshots of every session a user is currently a member of.
    pub fn sessions_for_user(&self, user_id: &UserId) -> Vec<SessionSnapshot> {
        self.sessions
            .iter()
            .filter_map(|e| {
                let session = e.value().lock();
                session.find_human(user_id).map(|_| session.snapshot())
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
