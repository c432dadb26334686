//! AMC Core - Mixed-criticality task model
//!
//! Shared by the analyzer and the simulator:
//! - Task / TaskSet (immutable, priority-indexed)
//! - Job (mutable per-release state)
//! - Task-set loading from the JSON schema
//! - Error types

pub mod types;
pub mod taskset;
pub mod error;

pub use types::*;
pub use taskset::*;
pub use error::*;
