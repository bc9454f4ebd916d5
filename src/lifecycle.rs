//! Claim lifecycle of an assignment group. Pure functions over the group's rows.
//!
//! The store decides *where* these run (inside one transaction that holds
//! every row of the group); this module decides *what* each transition does.
//! Every function either applies the whole transition to every chunk or
//! returns an error and leaves the rows untouched.

use crate::error::{Error, Result};
use crate::model::{Assignment, GroupKey, GroupState};

/// The state change a lifecycle operation produced.
///
/// `from == to` means the call was an idempotent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: GroupState,
    pub to: GroupState,
}

impl Transition {
    fn stay(state: GroupState) -> Self {
        Self {
            from: state,
            to: state,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

/// Validate a state transition, returning an error if disallowed.
fn validate_transition(from: GroupState, to: GroupState) -> Result<Transition> {
    if from.can_transition_to(to) {
        Ok(Transition { from, to })
    } else {
        Err(Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

fn key_of(group: &[Assignment]) -> Result<GroupKey> {
    group
        .first()
        .map(Assignment::group_key)
        .ok_or_else(|| Error::NotFound("assignment group is empty".to_string()))
}

fn holder(group: &[Assignment]) -> Option<&str> {
    group.iter().find_map(|a| a.claimed_by.as_deref())
}

/// Fail with `Unauthorized` unless `caller` holds the group.
fn require_holder(group: &[Assignment], caller: &str, action: &str) -> Result<GroupKey> {
    let key = key_of(group)?;
    match holder(group) {
        Some(h) if h == caller => Ok(key),
        Some(h) => Err(Error::Unauthorized(format!(
            "cannot {action} {key}: claimed by {h}"
        ))),
        None => Err(Error::Unauthorized(format!(
            "cannot {action} {key}: not claimed"
        ))),
    }
}

/// Put every chunk back to its freshly-allocated state.
fn release(group: &mut [Assignment]) {
    for a in group.iter_mut() {
        a.claimed = false;
        a.claimed_by = None;
        a.completed = false;
        a.progress = a.initial_progress();
    }
}

/// Claim the group for `caller`.
///
/// Re-claiming a group the caller already holds succeeds without changes.
pub fn claim(group: &mut [Assignment], caller: &str) -> Result<Transition> {
    let key = key_of(group)?;
    let state = GroupState::of(group);

    if state != GroupState::Unclaimed {
        return match holder(group) {
            Some(h) if h == caller => Ok(Transition::stay(state)),
            h => Err(Error::AlreadyClaimed {
                group: key,
                claimed_by: h.unwrap_or_default().to_string(),
            }),
        };
    }

    let transition = validate_transition(state, GroupState::Claimed)?;
    for a in group.iter_mut() {
        a.claimed = true;
        a.claimed_by = Some(caller.to_string());
    }
    Ok(transition)
}

/// Release the group. Only the current claimer may cancel, including after
/// completion. Progress goes back to each chunk's length.
pub fn cancel(group: &mut [Assignment], caller: &str) -> Result<Transition> {
    require_holder(group, caller, "cancel")?;
    let transition = validate_transition(GroupState::of(group), GroupState::Unclaimed)?;
    release(group);
    Ok(transition)
}

/// Mark the group completed. Counted chunks drop to zero remaining.
pub fn complete(group: &mut [Assignment], caller: &str) -> Result<Transition> {
    require_holder(group, caller, "complete")?;
    let state = GroupState::of(group);
    if state == GroupState::Completed {
        return Ok(Transition::stay(state));
    }

    let transition = validate_transition(state, GroupState::Completed)?;
    for a in group.iter_mut() {
        a.completed = true;
        if a.progress.is_some() {
            a.progress = Some(0);
        }
    }
    Ok(transition)
}

/// Unconditionally release the group (session-wide reset).
pub fn reset(group: &mut [Assignment]) -> Transition {
    let state = GroupState::of(group);
    if state == GroupState::Unclaimed {
        return Transition::stay(state);
    }
    release(group);
    Transition {
        from: state,
        to: GroupState::Unclaimed,
    }
}

/// Record remaining count on a single chunk. Flags are left alone.
pub fn update_progress(chunk: &mut Assignment, caller: &str, remaining: u32) -> Result<()> {
    if !chunk.is_held_by(caller) {
        return Err(Error::Unauthorized(match chunk.claimed_by.as_deref() {
            Some(h) => format!("cannot update chunk {}: claimed by {h}", chunk.id),
            None => format!("cannot update chunk {}: not claimed", chunk.id),
        }));
    }
    let Some(current) = chunk.progress else {
        return Err(Error::InvalidInput(format!(
            "chunk {} has no progress counter",
            chunk.id
        )));
    };
    if remaining > current {
        return Err(Error::InvalidInput(format!(
            "progress of chunk {} only decreases: {current} -> {remaining}",
            chunk.id
        )));
    }
    chunk.progress = Some(remaining);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssignmentId, ResourceId, SessionCode};

    fn chunk(start: u32, end: u32, counted: bool, seq: u32) -> Assignment {
        Assignment {
            id: AssignmentId::new(),
            session_code: SessionCode::from("abcd1234"),
            resource_id: ResourceId(2),
            participant_index: 2,
            seq,
            start_unit: start,
            end_unit: end,
            progress: counted.then_some(end - start + 1),
            claimed_by: None,
            claimed: false,
            completed: false,
        }
    }

    fn split_group(counted: bool) -> Vec<Assignment> {
        vec![chunk(68, 100, counted, 1), chunk(1, 34, counted, 2)]
    }

    #[test]
    fn claim_marks_every_chunk() {
        let mut group = split_group(false);
        let t = claim(&mut group, "ayse").unwrap();
        assert_eq!(t.from, GroupState::Unclaimed);
        assert_eq!(t.to, GroupState::Claimed);
        assert!(group.iter().all(|a| a.is_held_by("ayse")));
    }

    #[test]
    fn reclaim_by_holder_is_noop() {
        let mut group = split_group(false);
        claim(&mut group, "ayse").unwrap();
        let before = group.clone();
        let t = claim(&mut group, "ayse").unwrap();
        assert!(t.is_noop());
        assert_eq!(group, before);
    }

    #[test]
    fn claim_by_someone_else_fails_and_names_holder() {
        let mut group = split_group(false);
        claim(&mut group, "ayse").unwrap();
        let before = group.clone();
        match claim(&mut group, "omer") {
            Err(Error::AlreadyClaimed { group: key, claimed_by }) => {
                assert_eq!(claimed_by, "ayse");
                assert_eq!(key.participant, 2);
            }
            other => panic!("expected AlreadyClaimed, got {other:?}"),
        }
        assert_eq!(group, before);
    }

    #[test]
    fn cancel_requires_holder() {
        let mut group = split_group(false);
        assert!(matches!(cancel(&mut group, "ayse"), Err(Error::Unauthorized(_))));
        claim(&mut group, "ayse").unwrap();
        assert!(matches!(cancel(&mut group, "omer"), Err(Error::Unauthorized(_))));
        assert!(group.iter().all(|a| a.claimed));
    }

    #[test]
    fn complete_then_cancel_restores_progress() {
        let mut group = split_group(true);
        claim(&mut group, "ayse").unwrap();
        let t = complete(&mut group, "ayse").unwrap();
        assert_eq!(t.to, GroupState::Completed);
        assert!(group.iter().all(|a| a.completed && a.progress == Some(0)));

        let t = cancel(&mut group, "ayse").unwrap();
        assert_eq!(t.from, GroupState::Completed);
        assert_eq!(t.to, GroupState::Unclaimed);
        assert_eq!(group[0].progress, Some(33));
        assert_eq!(group[1].progress, Some(34));
        assert!(group.iter().all(|a| !a.claimed && !a.completed && a.claimed_by.is_none()));
    }

    #[test]
    fn complete_without_counter_keeps_progress_empty() {
        let mut group = split_group(false);
        claim(&mut group, "ayse").unwrap();
        complete(&mut group, "ayse").unwrap();
        assert!(group.iter().all(|a| a.completed && a.progress.is_none()));
        assert!(complete(&mut group, "ayse").unwrap().is_noop());
    }

    #[test]
    fn complete_requires_holder() {
        let mut group = split_group(true);
        assert!(matches!(complete(&mut group, "ayse"), Err(Error::Unauthorized(_))));
        claim(&mut group, "ayse").unwrap();
        assert!(matches!(complete(&mut group, "omer"), Err(Error::Unauthorized(_))));
    }

    #[test]
    fn reset_releases_any_state() {
        let mut group = split_group(true);
        assert!(reset(&mut group).is_noop());
        claim(&mut group, "ayse").unwrap();
        complete(&mut group, "ayse").unwrap();
        let t = reset(&mut group);
        assert_eq!(t.from, GroupState::Completed);
        assert_eq!(GroupState::of(&group), GroupState::Unclaimed);
        assert_eq!(group[0].progress, Some(33));
    }

    #[test]
    fn update_progress_touches_one_chunk() {
        let mut group = split_group(true);
        claim(&mut group, "ayse").unwrap();
        update_progress(&mut group[0], "ayse", 10).unwrap();
        assert_eq!(group[0].progress, Some(10));
        assert_eq!(group[1].progress, Some(34));
        assert!(!group[0].completed);
    }

    #[test]
    fn update_progress_rejects_bad_calls() {
        let mut group = split_group(true);
        assert!(matches!(
            update_progress(&mut group[0], "ayse", 1),
            Err(Error::Unauthorized(_))
        ));
        claim(&mut group, "ayse").unwrap();
        assert!(matches!(
            update_progress(&mut group[0], "omer", 1),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            update_progress(&mut group[0], "ayse", 40),
            Err(Error::InvalidInput(_))
        ));

        let mut binary = split_group(false);
        claim(&mut binary, "ayse").unwrap();
        assert!(matches!(
            update_progress(&mut binary[0], "ayse", 0),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn empty_group_is_not_found() {
        let mut group: Vec<Assignment> = Vec::new();
        assert!(matches!(claim(&mut group, "ayse"), Err(Error::NotFound(_))));
    }
}
