//! # recite-circle
//!
//! Shared recitation sessions: a body of reading work (a paged text, a
//! list of sections, a repeated invocation) is split into chunks that
//! participants claim, progress through, and complete.
//!
//! The allocation engine and the claim lifecycle are pure; the coordinator
//! runs them against a [`store::Store`], either in memory or on Postgres,
//! with OpenTelemetry observability.

pub mod allocation;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod model;
pub mod store;
pub mod telemetry;
