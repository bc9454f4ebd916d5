//! Core data model.
//!
//! A session splits one or more resources across a fixed number of
//! participants. Each split produces assignments (chunks); the chunks a
//! single participant holds for a single resource form an assignment group,
//! which is the unit that gets claimed, completed, and released.

pub mod assignment;
pub mod resource;
pub mod session;

pub use assignment::{Assignment, AssignmentId, GroupKey, GroupState};
pub use resource::{ResourceDescriptor, ResourceId, Scaling, Variant, VirtualSizing};
pub use session::{Session, SessionCode, SessionInfo};
