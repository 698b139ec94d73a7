//! Per-node snapshot state machine.
//!
//! A [`NodeState`] is:
//!
//! - **Synchronous**: no async, no `.await`
//! - **Deterministic**: same state + event = same actions
//! - **Pure-ish**: mutates self, but performs no I/O
//!
//! All I/O is handled by the simulation runner, which delivers
//! [`NodeEvent`]s to the state machine and executes the returned
//! [`NodeAction`]s (sending messages on links, routing completion
//! notifications to the orchestrator). Nodes never reach across to
//! another node directly.

mod event;
mod state;

pub use event::{NodeAction, NodeEvent};
pub use state::{NodeState, SnapshotPhase};
