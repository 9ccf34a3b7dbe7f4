//! Conversation sessions for multi-turn routing.
//!
//! Sessions live in process memory. Expiry is left to the surrounding
//! service; the store only looks sessions up by id.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use opnflow_core::SessionId;

use crate::decision::Params;

/// Where a conversation stands between turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteState {
    AwaitingQuery,
    Classifying,
    AwaitingClarification,
    AwaitingConfirmation,
    Routed,
    Rejected,
}

/// State kept across the turns of one exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSession {
    pub id: SessionId,
    pub state: RouteState,
    pub clarification_count: u32,
    /// Parameters gathered so far.
    pub params: Params,
}

impl ConversationSession {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            state: RouteState::AwaitingQuery,
            clarification_count: 0,
            params: Params::new(),
        }
    }
}

/// A session plus whether `finish` has already taken it out of the store.
#[derive(Debug)]
struct Slot {
    session: ConversationSession,
    retired: bool,
}

type SlotRef = Arc<Mutex<Slot>>;

/// Concurrent session store.
///
/// Each session sits behind its own lock, so updates to one session are
/// atomic without serialising turns of unrelated sessions. A turn that
/// raced with `finish` retries on a fresh session instead of writing into
/// one that has left the store.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, SlotRef>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, id: &SessionId) -> SlotRef {
        if let Some(slot) = self.sessions.read().await.get(id) {
            return slot.clone();
        }
        self.sessions
            .write()
            .await
            .entry(id.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Slot {
                    session: ConversationSession::new(id.clone()),
                    retired: false,
                }))
            })
            .clone()
    }

    /// Apply `f` under the slot's lock unless the slot was retired.
    async fn apply<F>(slot: &SlotRef, f: &mut Option<F>) -> Option<ConversationSession>
    where
        F: FnOnce(&mut ConversationSession),
    {
        let mut guard = slot.lock().await;
        if guard.retired {
            return None;
        }
        if let Some(f) = f.take() {
            f(&mut guard.session);
        }
        Some(guard.session.clone())
    }

    /// Apply `f` to the session under its lock, creating it if needed.
    /// Returns a snapshot taken after the update.
    pub async fn update<F>(&self, id: &SessionId, f: F) -> ConversationSession
    where
        F: FnOnce(&mut ConversationSession),
    {
        let mut f = Some(f);
        loop {
            let slot = self.entry(id).await;
            if let Some(snapshot) = Self::apply(&slot, &mut f).await {
                return snapshot;
            }
        }
    }

    /// Record a turn that paused for user input.
    pub async fn record_pause(
        &self,
        id: &SessionId,
        state: RouteState,
        partial: &Params,
    ) -> ConversationSession {
        self.update(id, |session| {
            session.state = state;
            session.clarification_count += 1;
            for (key, value) in partial {
                session.params.insert(key.clone(), value.clone());
            }
        })
        .await
    }

    /// Mark the session as classifying and return what it remembers.
    pub async fn begin_turn(&self, id: &SessionId) -> ConversationSession {
        self.update(id, |session| session.state = RouteState::Classifying)
            .await
    }

    /// End the exchange: drop the session and hand back its parameters.
    ///
    /// The slot is retired under its own lock before it leaves the map, so
    /// every update either lands in the returned snapshot or in a new session.
    pub async fn finish(&self, id: &SessionId) -> Option<ConversationSession> {
        let slot = self.sessions.read().await.get(id).cloned()?;
        let mut guard = slot.lock().await;
        if guard.retired {
            return None;
        }
        guard.retired = true;

        let mut sessions = self.sessions.write().await;
        if sessions.get(id).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
            sessions.remove(id);
        }
        Some(guard.session.clone())
    }

    pub async fn get(&self, id: &SessionId) -> Option<ConversationSession> {
        let slot = self.sessions.read().await.get(id).cloned()?;
        let guard = slot.lock().await;
        (!guard.retired).then(|| guard.session.clone())
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

/// Overlay `fresh` on `remembered`: new values win.
pub fn merge_params(remembered: Params, fresh: Params) -> Params {
    let mut merged = remembered;
    for (key, value) in fresh {
        let keep_old = value.as_str().is_some_and(|s| s.trim().is_empty())
            && merged.get(&key).is_some();
        if !keep_old {
            merged.insert(key, value);
        }
    }
    merged
}
