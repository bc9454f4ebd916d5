//! Session coordinator: the operations a front end invokes.
//!
//! Resolves resources through the catalog, runs the allocation engine,
//! and drives the claim lifecycle through a [`Store`]. Every group or
//! session mutation runs as one store closure, so the check and the write
//! happen under the same lock.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, info, warn};

use crate::allocation::{self, Allocation, Mode};
use crate::catalog::{Catalog, ResourceRef};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::identity::{CallerId, IdentityPolicy};
use crate::lifecycle::{self, Transition};
use crate::model::{Assignment, AssignmentId, GroupKey, Session, SessionCode, SessionInfo};
use crate::store::Store;
use crate::telemetry::claim::{record_state_transition, start_group_span};
use crate::telemetry::metrics;

/// Attempts at finding an unused session code before giving up.
const CODE_ATTEMPTS: usize = 5;

/// One resource requested for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSelection {
    pub resource: ResourceRef,
    /// Copies for whole-copy resources, absolute count for counter resources.
    pub override_units: Option<i64>,
}

impl ResourceSelection {
    pub fn new(resource: impl Into<ResourceRef>) -> Self {
        Self {
            resource: resource.into(),
            override_units: None,
        }
    }

    pub fn override_units(mut self, units: i64) -> Self {
        self.override_units = Some(units);
        self
    }
}

/// Request to create a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSession {
    pub selections: Vec<ResourceSelection>,
    pub participant_count: u32,
    pub description: Option<String>,
}

impl NewSession {
    pub fn new(participant_count: u32) -> Self {
        Self {
            selections: Vec::new(),
            participant_count,
            description: None,
        }
    }

    pub fn select(mut self, selection: ResourceSelection) -> Self {
        self.selections.push(selection);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Tunables for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub identity_policy: IdentityPolicy,
    /// Used when a session is created without a description.
    pub default_description: String,
    /// Largest participant count a session may have.
    pub max_participants: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            identity_policy: IdentityPolicy::default(),
            default_description: "Reading circle".to_string(),
            max_participants: allocation::MAX_PARTICIPANTS,
        }
    }
}

impl From<&Config> for CoordinatorConfig {
    fn from(config: &Config) -> Self {
        Self {
            identity_policy: config.identity_policy,
            default_description: config.default_description.clone(),
            max_participants: config.max_participants,
        }
    }
}

pub struct Coordinator<S> {
    store: Arc<S>,
    catalog: Arc<Catalog>,
    config: CoordinatorConfig,
}

impl<S> Clone for Coordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            catalog: Arc::clone(&self.catalog),
            config: self.config.clone(),
        }
    }
}

impl<S: Store> Coordinator<S> {
    pub fn new(store: Arc<S>, catalog: Arc<Catalog>, config: CoordinatorConfig) -> Self {
        Self {
            store,
            catalog,
            config,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Resolve the caller of one operation under the configured policy.
    pub fn identify(
        &self,
        authenticated: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<CallerId> {
        self.config
            .identity_policy
            .resolve(authenticated, display_name)
    }

    /// Allocate without persisting anything.
    pub fn preview(
        &self,
        selection: &ResourceSelection,
        participant_count: u32,
    ) -> Result<Allocation> {
        self.check_participants(participant_count)?;
        let resource = self.catalog.resolve(&selection.resource)?;
        allocation::allocate(resource, participant_count, selection.override_units)
    }

    fn check_participants(&self, participant_count: u32) -> Result<()> {
        if participant_count < 1 {
            return Err(Error::InvalidInput(
                "participant count must be at least 1".to_string(),
            ));
        }
        if participant_count > self.config.max_participants {
            return Err(Error::InvalidInput(format!(
                "participant count {participant_count} exceeds the limit of {}",
                self.config.max_participants
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Create a session and persist the chunks of every selected resource.
    ///
    /// All selections are resolved and allocated before anything is written.
    pub async fn create_session(&self, request: NewSession, caller: &CallerId) -> Result<Session> {
        let start = Instant::now();

        if request.selections.is_empty() {
            return Err(Error::InvalidInput(
                "select at least one resource".to_string(),
            ));
        }
        self.check_participants(request.participant_count)?;

        let mut seen = HashSet::new();
        let mut allocations = Vec::with_capacity(request.selections.len());
        for selection in &request.selections {
            let resource = self.catalog.resolve(&selection.resource)?;
            if !seen.insert(resource.id) {
                return Err(Error::InvalidInput(format!(
                    "resource {} selected more than once",
                    resource.code
                )));
            }
            allocations.push(allocation::allocate(
                resource,
                request.participant_count,
                selection.override_units,
            )?);
        }

        let description = request
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| self.config.default_description.clone());

        for attempt in 1..=CODE_ATTEMPTS {
            let info = SessionInfo {
                code: SessionCode::generate(),
                creator_id: caller.as_str().to_string(),
                participant_count: request.participant_count,
                description: description.clone(),
                created_at: chrono::Utc::now(),
            };
            let mut assignments = Vec::new();
            for allocation in &allocations {
                let next_seq = assignments.len() as u32 + 1;
                assignments.extend(rows_for(&info.code, allocation, next_seq));
            }
            let session = Session { info, assignments };

            match self.store.insert_session(&session).await {
                Ok(()) => {
                    metrics::sessions_created().add(1, &[]);
                    for allocation in &allocations {
                        record_chunks(allocation.mode, allocation.chunks.len());
                    }
                    record_duration("session.create", start);
                    info!(
                        session = %session.code(),
                        creator = %caller,
                        resources = allocations.len(),
                        chunks = session.assignments.len(),
                        "session created"
                    );
                    return Ok(session);
                }
                Err(Error::Conflict(msg)) => {
                    warn!(attempt, "session code collision: {msg}");
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Conflict(format!(
            "no unused session code after {CODE_ATTEMPTS} attempts"
        )))
    }

    /// Add one more resource to an existing session. Creator only.
    ///
    /// The resource is split across the session's participant count.
    pub async fn add_resource(
        &self,
        code: &SessionCode,
        selection: &ResourceSelection,
        caller: &CallerId,
    ) -> Result<Vec<Assignment>> {
        let start = Instant::now();
        let resource = self.catalog.resolve(&selection.resource)?;
        let override_units = selection.override_units;
        let mut mode = None;

        let added = self
            .store
            .append_assignments(code, |session| {
                if !session.is_creator(caller.as_str()) {
                    return Err(Error::Unauthorized(format!(
                        "only the creator of session {code} can add resources"
                    )));
                }
                if session.has_resource(resource.id) {
                    return Err(Error::InvalidInput(format!(
                        "resource {} is already part of session {code}",
                        resource.code
                    )));
                }
                let allocation = allocation::allocate(
                    resource,
                    session.info.participant_count,
                    override_units,
                )?;
                mode = Some(allocation.mode);
                let next_seq = session.assignments.iter().map(|a| a.seq).max().unwrap_or(0) + 1;
                Ok(rows_for(code, &allocation, next_seq))
            })
            .await?;

        if let Some(mode) = mode {
            record_chunks(mode, added.len());
        }
        record_duration("session.add_resource", start);
        info!(
            session = %code,
            resource = %resource.code,
            chunks = added.len(),
            "resource added"
        );
        Ok(added)
    }

    pub async fn get_session(&self, code: &SessionCode) -> Result<Session> {
        self.store.get_session(code).await
    }

    /// Release every group `caller` holds in the session.
    ///
    /// Returns how many groups were released.
    pub async fn leave_session(&self, code: &SessionCode, caller: &CallerId) -> Result<usize> {
        let start = Instant::now();
        let transitions = self
            .store
            .update_session(code, |_, rows| {
                let mut transitions = Vec::new();
                for_each_group(rows, |group| {
                    if group.iter().any(|a| a.is_held_by(caller.as_str())) {
                        transitions.push(lifecycle::cancel(group, caller.as_str())?);
                    }
                    Ok(())
                })?;
                Ok(transitions)
            })
            .await?;

        transitions.iter().for_each(record_transition);
        record_duration("session.leave", start);
        info!(session = %code, caller = %caller, released = transitions.len(), "left session");
        Ok(transitions.len())
    }

    /// Release every group in the session regardless of claimer. Creator only.
    ///
    /// Returns how many groups were claimed or completed before the reset.
    pub async fn reset_session(&self, code: &SessionCode, caller: &CallerId) -> Result<usize> {
        let start = Instant::now();
        let transitions = self
            .store
            .update_session(code, |info, rows| {
                require_creator(info, caller, "reset")?;
                let mut transitions = Vec::new();
                for_each_group(rows, |group| {
                    let t = lifecycle::reset(group);
                    if !t.is_noop() {
                        transitions.push(t);
                    }
                    Ok(())
                })?;
                Ok(transitions)
            })
            .await?;

        transitions.iter().for_each(record_transition);
        record_duration("session.reset", start);
        info!(session = %code, released = transitions.len(), "session reset");
        Ok(transitions.len())
    }

    /// Delete the session and all of its assignments. Creator only.
    pub async fn delete_session(&self, code: &SessionCode, caller: &CallerId) -> Result<()> {
        self.store
            .delete_session(code, |info| require_creator(info, caller, "delete"))
            .await?;
        info!(session = %code, "session deleted");
        Ok(())
    }

    pub async fn list_created_by(&self, creator: &str) -> Result<Vec<SessionInfo>> {
        self.store.list_created_by(creator).await
    }

    /// Sessions in which `participant` currently holds a claim.
    pub async fn list_joined_by(&self, participant: &str) -> Result<Vec<SessionInfo>> {
        self.store.list_joined_by(participant).await
    }

    // -----------------------------------------------------------------------
    // Claim lifecycle
    // -----------------------------------------------------------------------

    /// Claim the group `id` belongs to. Returns every chunk of the group.
    pub async fn claim(&self, id: AssignmentId, caller: &CallerId) -> Result<Vec<Assignment>> {
        let result = self
            .transition_group("claim", id, |group| {
                lifecycle::claim(group, caller.as_str())
            })
            .await;

        let outcome = match &result {
            Ok((_, t)) if t.is_noop() => Some("reentrant"),
            Ok(_) => Some("claimed"),
            Err(Error::AlreadyClaimed { group, claimed_by }) => {
                debug!(group = %group, claimed_by = %claimed_by, caller = %caller, "claim lost");
                Some("already_claimed")
            }
            Err(Error::Unauthorized(_)) => Some("unauthorized"),
            Err(_) => None,
        };
        if let Some(outcome) = outcome {
            metrics::claims().add(1, &[KeyValue::new("result", outcome)]);
        }
        result.map(|(group, _)| group)
    }

    /// Release a group the caller holds, completed or not.
    pub async fn cancel(&self, id: AssignmentId, caller: &CallerId) -> Result<Vec<Assignment>> {
        self.transition_group("cancel", id, |group| {
            lifecycle::cancel(group, caller.as_str())
        })
        .await
        .map(|(group, _)| group)
    }

    pub async fn complete(&self, id: AssignmentId, caller: &CallerId) -> Result<Vec<Assignment>> {
        self.transition_group("complete", id, |group| {
            lifecycle::complete(group, caller.as_str())
        })
        .await
        .map(|(group, _)| group)
    }

    /// Set the remaining count of one chunk. The rest of its group is untouched.
    pub async fn update_progress(
        &self,
        id: AssignmentId,
        caller: &CallerId,
        remaining: u32,
    ) -> Result<Assignment> {
        let start = Instant::now();
        let key = self.store.get_assignment(id).await?.group_key();
        let span = start_group_span("progress", &key);

        let (_, chunk) = self
            .store
            .update_group(&key, |group| {
                let chunk = group
                    .iter_mut()
                    .find(|a| a.id == id)
                    .ok_or_else(|| Error::NotFound(format!("assignment {id}")))?;
                lifecycle::update_progress(chunk, caller.as_str(), remaining)?;
                Ok(chunk.clone())
            })
            .instrument(span.clone())
            .await?;

        record_duration("group.progress", start);
        span.in_scope(|| debug!(chunk = %id, remaining, "progress updated"));
        Ok(chunk)
    }

    /// Look up the group of `id` and apply `apply` to it atomically.
    async fn transition_group<F>(
        &self,
        operation: &'static str,
        id: AssignmentId,
        apply: F,
    ) -> Result<(Vec<Assignment>, Transition)>
    where
        F: FnOnce(&mut [Assignment]) -> Result<Transition> + Send,
    {
        let start = Instant::now();
        let key = self.store.get_assignment(id).await?.group_key();
        let span = start_group_span(operation, &key);

        let result = self
            .store
            .update_group(&key, apply)
            .instrument(span.clone())
            .await;
        record_duration(&format!("group.{operation}"), start);

        let (group, transition) = result?;
        if !transition.is_noop() {
            record_state_transition(
                &span,
                &transition.from.to_string(),
                &transition.to.to_string(),
            );
            record_transition(&transition);
        }
        Ok((group, transition))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Turn an allocation into persisted rows, numbering them from `first_seq`.
fn rows_for(code: &SessionCode, allocation: &Allocation, first_seq: u32) -> Vec<Assignment> {
    allocation
        .chunks
        .iter()
        .zip(first_seq..)
        .map(|(chunk, seq)| Assignment {
            id: AssignmentId::new(),
            session_code: code.clone(),
            resource_id: allocation.resource_id,
            participant_index: chunk.participant_index,
            seq,
            start_unit: chunk.start_unit,
            end_unit: chunk.end_unit,
            progress: chunk.progress,
            claimed_by: None,
            claimed: false,
            completed: false,
        })
        .collect()
}

/// Run `f` once per group found in `rows`, chunks in `seq` order.
///
/// Each group is edited on a copy and written back only if `f` succeeds.
fn for_each_group<F>(rows: &mut [Assignment], mut f: F) -> Result<()>
where
    F: FnMut(&mut [Assignment]) -> Result<()>,
{
    let mut groups: BTreeMap<GroupKey, Vec<usize>> = BTreeMap::new();
    for (i, a) in rows.iter().enumerate() {
        groups.entry(a.group_key()).or_default().push(i);
    }

    for positions in groups.values_mut() {
        positions.sort_by_key(|&i| rows[i].seq);
        let mut group: Vec<Assignment> = positions.iter().map(|&i| rows[i].clone()).collect();
        f(&mut group)?;
        for (&i, a) in positions.iter().zip(group) {
            rows[i] = a;
        }
    }
    Ok(())
}

fn require_creator(info: &SessionInfo, caller: &CallerId, action: &str) -> Result<()> {
    if info.creator_id == caller.as_str() {
        Ok(())
    } else {
        Err(Error::Unauthorized(format!(
            "only the creator of session {} can {action} it",
            info.code
        )))
    }
}

fn record_transition(transition: &Transition) {
    metrics::group_transitions().add(
        1,
        &[
            KeyValue::new("from", transition.from.to_string()),
            KeyValue::new("to", transition.to.to_string()),
        ],
    );
}

fn record_chunks(mode: Mode, count: usize) {
    metrics::chunks_allocated().add(count as u64, &[KeyValue::new("mode", mode.to_string())]);
}

fn record_duration(operation: &str, start: Instant) {
    metrics::operation_duration_ms().record(
        start.elapsed().as_secs_f64() * 1000.0,
        &[KeyValue::new("operation", operation.to_string())],
    );
}
