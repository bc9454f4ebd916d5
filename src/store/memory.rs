//! In-memory store. One mutex guards everything, so every closure runs
//! with exclusive access.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::Store;
use crate::error::{Error, Result};
use crate::model::{Assignment, AssignmentId, GroupKey, Session, SessionCode, SessionInfo};

#[derive(Debug, Default)]
struct State {
    sessions: BTreeMap<SessionCode, Session>,
    /// Which session owns each assignment.
    index: HashMap<AssignmentId, SessionCode>,
}

impl State {
    fn session_mut(&mut self, code: &SessionCode) -> Result<&mut Session> {
        self.sessions
            .get_mut(code)
            .ok_or_else(|| Error::NotFound(format!("session {code}")))
    }
}

/// Store backed by process memory. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(mut infos: Vec<SessionInfo>) -> Vec<SessionInfo> {
    infos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    infos
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_session(&self, session: &Session) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.sessions.contains_key(session.code()) {
            return Err(Error::Conflict(format!(
                "session code {} already exists",
                session.code()
            )));
        }
        for a in &session.assignments {
            state.index.insert(a.id, session.code().clone());
        }
        let mut session = session.clone();
        session.assignments.sort_by_key(|a| a.seq);
        state.sessions.insert(session.code().clone(), session);
        Ok(())
    }

    async fn get_session(&self, code: &SessionCode) -> Result<Session> {
        let state = self.state.lock().await;
        state
            .sessions
            .get(code)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("session {code}")))
    }

    async fn append_assignments<F>(&self, code: &SessionCode, build: F) -> Result<Vec<Assignment>>
    where
        F: FnOnce(&Session) -> Result<Vec<Assignment>> + Send,
    {
        let mut state = self.state.lock().await;
        let session = state.session_mut(code)?;
        let new = build(session)?;
        session.assignments.extend(new.iter().cloned());
        session.assignments.sort_by_key(|a| a.seq);
        for a in &new {
            state.index.insert(a.id, code.clone());
        }
        Ok(new)
    }

    async fn get_assignment(&self, id: AssignmentId) -> Result<Assignment> {
        let state = self.state.lock().await;
        state
            .index
            .get(&id)
            .and_then(|code| state.sessions.get(code))
            .and_then(|s| s.assignments.iter().find(|a| a.id == id))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("assignment {id}")))
    }

    async fn update_group<F, T>(&self, key: &GroupKey, f: F) -> Result<(Vec<Assignment>, T)>
    where
        F: FnOnce(&mut [Assignment]) -> Result<T> + Send,
        T: Send,
    {
        let mut state = self.state.lock().await;
        let session = state.session_mut(&key.session)?;

        let positions: Vec<usize> = session
            .assignments
            .iter()
            .enumerate()
            .filter(|(_, a)| a.resource_id == key.resource && a.participant_index == key.participant)
            .map(|(i, _)| i)
            .collect();
        if positions.is_empty() {
            return Err(Error::NotFound(format!("assignment group {key}")));
        }

        // Work on copies so a failed transition leaves nothing behind.
        let mut group: Vec<Assignment> = positions
            .iter()
            .map(|&i| session.assignments[i].clone())
            .collect();
        let out = f(&mut group)?;
        for (&i, a) in positions.iter().zip(&group) {
            session.assignments[i] = a.clone();
        }
        Ok((group, out))
    }

    async fn update_session<F, T>(&self, code: &SessionCode, f: F) -> Result<T>
    where
        F: FnOnce(&SessionInfo, &mut [Assignment]) -> Result<T> + Send,
        T: Send,
    {
        let mut state = self.state.lock().await;
        let session = state.session_mut(code)?;
        let mut rows = session.assignments.clone();
        let out = f(&session.info, &mut rows)?;
        session.assignments = rows;
        Ok(out)
    }

    async fn delete_session<F>(&self, code: &SessionCode, authorize: F) -> Result<()>
    where
        F: FnOnce(&SessionInfo) -> Result<()> + Send,
    {
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .get(code)
            .ok_or_else(|| Error::NotFound(format!("session {code}")))?;
        authorize(&session.info)?;
        if let Some(session) = state.sessions.remove(code) {
            for a in &session.assignments {
                state.index.remove(&a.id);
            }
        }
        Ok(())
    }

    async fn list_created_by(&self, creator: &str) -> Result<Vec<SessionInfo>> {
        let state = self.state.lock().await;
        Ok(newest_first(
            state
                .sessions
                .values()
                .filter(|s| s.info.creator_id == creator)
                .map(|s| s.info.clone())
                .collect(),
        ))
    }

    async fn list_joined_by(&self, participant: &str) -> Result<Vec<SessionInfo>> {
        let state = self.state.lock().await;
        Ok(newest_first(
            state
                .sessions
                .values()
                .filter(|s| s.assignments.iter().any(|a| a.is_held_by(participant)))
                .map(|s| s.info.clone())
                .collect(),
        ))
    }
}
