#![forbid(unsafe_code)]
//! flowplan-core: ids, operator kinds, the operator graph arena, and the
//! plan/sub-plan model shared by the planner.
//!
//! No rewriting happens here; this crate only models the graph and checks its
//! invariants. Keep deps minimal; no logging or runtime in core.

pub mod config;
pub mod error;
pub mod graph;
pub mod hash;
pub mod id;
pub mod kind;
pub mod plan;
pub mod prelude;

pub use error::{Error, Result};
