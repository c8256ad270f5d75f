use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use log::debug;

use super::flow::Flow;

/// # Per-Sender Session
///
/// Tracks where a sender is in the menu tree and any half-finished
/// multi-step command. One record per sender id; every inbound message from
/// that sender reads and replaces it.
///
/// ## State Map
///
/// ```text
/// (none) ─▶ Menu ─┬─▶ Mail ─▶ CheckMail ─▶ MailAction ─▶ MailDeleteConfirm
///                 │          └─▶ Compose(SendMail)
///                 ├─▶ BulletinMenu ─▶ BulletinAction ─┬─▶ CheckBulletin ─▶ BulletinRead ─▶ BulletinDeleteConfirm
///                 │                                   └─▶ Compose(PostBulletin)
///                 ├─▶ ChannelDirectory ─┬─▶ CheckChannel
///                 │                     └─▶ Compose(PostChannel)
///                 └─▶ Stats
/// ```
///
/// Sending `x` from anywhere returns to `Menu`.
#[derive(Debug, Clone)]
pub struct Session {
    pub node_id: String,
    pub state: SessionState,
    pub created: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Menu,
    Mail,
    /// Listing shown; numbers map to these local ids.
    CheckMail { ids: Vec<u64> },
    /// A mail was just displayed: keep, delete or reply.
    MailAction { local_id: u64 },
    MailDeleteConfirm { local_id: u64 },
    BulletinMenu,
    /// Board chosen: read or post.
    BulletinAction { board: String },
    CheckBulletin { board: String, ids: Vec<u64> },
    BulletinRead { board: String, local_id: u64 },
    BulletinDeleteConfirm { board: String, local_id: u64 },
    Compose(Flow),
    ChannelDirectory,
    CheckChannel,
    Stats,
}

impl SessionState {
    /// Short label for logs.
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Menu => "MENU",
            SessionState::Mail => "MAIL",
            SessionState::CheckMail { .. } => "CHECK_MAIL",
            SessionState::MailAction { .. } => "MAIL_ACTION",
            SessionState::MailDeleteConfirm { .. } => "MAIL_DELETE_CONFIRM",
            SessionState::BulletinMenu => "BULLETIN_MENU",
            SessionState::BulletinAction { .. } => "BULLETIN_ACTION",
            SessionState::CheckBulletin { .. } => "CHECK_BULLETIN",
            SessionState::BulletinRead { .. } => "BULLETIN_READ",
            SessionState::BulletinDeleteConfirm { .. } => "BULLETIN_DELETE_CONFIRM",
            SessionState::Compose(_) => "COMPOSE",
            SessionState::ChannelDirectory => "CHANNEL_DIRECTORY",
            SessionState::CheckChannel => "CHECK_CHANNEL",
            SessionState::Stats => "STATS",
        }
    }
}

impl Session {
    pub fn new(node_id: &str, state: SessionState) -> Self {
        let now = Utc::now();
        Session {
            node_id: node_id.to_string(),
            state,
            created: now,
            last_activity: now,
        }
    }

    pub fn update_activity(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Check if session is inactive (for cleanup)
    pub fn is_inactive(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_activity > timeout
    }
}

/// Sender id → session, with optional inactivity expiry.
///
/// Shared by reference between the router and the server's prune timer.
/// A poisoned lock is recovered rather than propagated; the map holds no
/// invariants a panicking holder could break halfway.
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    timeout: Option<Duration>,
}

impl SessionStore {
    /// `timeout_minutes == 0` keeps sessions until they are cleared.
    pub fn new(timeout_minutes: u32) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            timeout: (timeout_minutes > 0).then(|| Duration::minutes(timeout_minutes as i64)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state for `node_id`; an expired session is dropped and reported absent.
    pub fn get(&self, node_id: &str) -> Option<SessionState> {
        let mut guard = self.lock();
        let expired = match (guard.get(node_id), self.timeout) {
            (Some(s), Some(t)) => s.is_inactive(t, Utc::now()),
            (Some(_), None) => false,
            (None, _) => return None,
        };
        if expired {
            debug!("session for {} expired", node_id);
            guard.remove(node_id);
            return None;
        }
        guard.get(node_id).map(|s| s.state.clone())
    }

    /// Overwrite the state for `node_id`.
    pub fn set(&self, node_id: &str, state: SessionState) {
        let mut guard = self.lock();
        match guard.get_mut(node_id) {
            Some(s) => {
                s.state = state;
                s.update_activity();
            }
            None => {
                guard.insert(node_id.to_string(), Session::new(node_id, state));
            }
        }
    }

    pub fn clear(&self, node_id: &str) {
        self.lock().remove(node_id);
    }

    /// Drop sessions idle past the timeout. Returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        self.prune_at(Utc::now())
    }

    fn prune_at(&self, now: DateTime<Utc>) -> usize {
        let Some(timeout) = self.timeout else {
            return 0;
        };
        let mut guard = self.lock();
        let before = guard.len();
        guard.retain(|_, s| !s.is_inactive(timeout, now));
        before - guard.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
