//! In-memory conversation history keyed by session

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Turn role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    /// Role name as used by the generation provider
    #[must_use]
    pub const fn provider_role(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "model",
        }
    }
}

/// A single conversation turn. Immutable once appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    /// Position within the session, starting at 0
    pub seq: u64,
    pub created_at: DateTime<Utc>,
}

/// Storage for per-session conversation turns
///
/// Implementations must keep appends to distinct sessions independent and
/// preserve append order within a session.
pub trait SessionStore: Send + Sync {
    /// Append a turn to a session, creating the session on first contact.
    /// Returns the stored turn with its sequence number assigned
    fn append(&self, session_id: &str, role: TurnRole, text: String) -> Turn;

    /// Ordered turns of a session; empty if the session is unknown
    fn get(&self, session_id: &str) -> Vec<Turn>;
}

type Turns = Arc<Mutex<Vec<Turn>>>;

/// Process-lifetime session store
///
/// The outer map lock is held only to look up or insert a session entry;
/// appends lock that session's own list.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Turns>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, session_id: &str) -> Turns {
        if let Some(turns) = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
        {
            return Arc::clone(turns);
        }

        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(sessions.entry(session_id.to_string()).or_insert_with(|| {
            tracing::debug!(session_id, "created session");
            Arc::default()
        }))
    }
}

impl SessionStore for InMemorySessionStore {
    fn append(&self, session_id: &str, role: TurnRole, text: String) -> Turn {
        let turns = self.entry(session_id);
        let mut turns = turns.lock().unwrap_or_else(PoisonError::into_inner);

        let turn = Turn {
            role,
            text,
            seq: turns.len() as u64,
            created_at: Utc::now(),
        };
        turns.push(turn.clone());
        turn
    }

    fn get(&self, session_id: &str) -> Vec<Turn> {
        let turns = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .map(Arc::clone);

        turns.map_or_else(Vec::new, |t| {
            t.lock().unwrap_or_else(PoisonError::into_inner).clone()
        })
    }
}

/// A role/text pair sent to the generation provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextTurn {
    pub role: TurnRole,
    pub text: String,
}

/// Build the bounded two-turn generation context from a session history
///
/// The last turn must be the new user message. The turn before it is included
/// only when it is an assistant reply.
#[must_use]
pub fn generation_context(history: &[Turn]) -> Vec<ContextTurn> {
    let Some((latest, earlier)) = history.split_last() else {
        return Vec::new();
    };

    let mut context = Vec::with_capacity(2);
    if let Some(prev) = earlier.last().filter(|t| t.role == TurnRole::Assistant) {
        context.push(ContextTurn {
            role: TurnRole::Assistant,
            text: prev.text.clone(),
        });
    }
    context.push(ContextTurn {
        role: latest.role,
        text: latest.text.clone(),
    });
    context
}
