//! Persistence seam for sessions and assignments.
//!
//! Every mutating method runs its closure inside one atomic unit that holds
//! all affected rows exclusively (a transaction with row locks in Postgres,
//! a mutex in memory). The closure sees the current rows, may edit them,
//! and decides the outcome. On `Err` nothing is written.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Assignment, AssignmentId, GroupKey, Session, SessionCode, SessionInfo};

pub use memory::MemoryStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// Persist a new session together with its assignments.
    ///
    /// Fails with `Conflict` if the code is already taken.
    async fn insert_session(&self, session: &Session) -> Result<()>;

    /// Fetch a session and all of its assignments, ordered by `seq`.
    async fn get_session(&self, code: &SessionCode) -> Result<Session>;

    /// Append assignments to an existing session.
    ///
    /// `build` sees the locked session (so presence checks cannot race) and
    /// returns the rows to insert.
    async fn append_assignments<F>(&self, code: &SessionCode, build: F) -> Result<Vec<Assignment>>
    where
        F: FnOnce(&Session) -> Result<Vec<Assignment>> + Send;

    /// Fetch one assignment.
    async fn get_assignment(&self, id: AssignmentId) -> Result<Assignment>;

    /// Apply `f` to every chunk of one group, atomically.
    ///
    /// Returns the rows as written plus whatever `f` returned.
    async fn update_group<F, T>(&self, key: &GroupKey, f: F) -> Result<(Vec<Assignment>, T)>
    where
        F: FnOnce(&mut [Assignment]) -> Result<T> + Send,
        T: Send;

    /// Apply `f` to every assignment of a session, atomically.
    async fn update_session<F, T>(&self, code: &SessionCode, f: F) -> Result<T>
    where
        F: FnOnce(&SessionInfo, &mut [Assignment]) -> Result<T> + Send,
        T: Send;

    /// Delete a session and its assignments once `authorize` accepts it.
    async fn delete_session<F>(&self, code: &SessionCode, authorize: F) -> Result<()>
    where
        F: FnOnce(&SessionInfo) -> Result<()> + Send;

    /// Sessions created by `creator`, newest first.
    async fn list_created_by(&self, creator: &str) -> Result<Vec<SessionInfo>>;

    /// Sessions where `participant` holds at least one claim, newest first.
    async fn list_joined_by(&self, participant: &str) -> Result<Vec<SessionInfo>>;
}
