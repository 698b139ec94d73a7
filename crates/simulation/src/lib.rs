//! Deterministic token-network simulation with global snapshots.
//!
//! This crate provides a discrete-time simulation of nodes exchanging
//! tokens over unidirectional, delay-bearing FIFO channels, plus a
//! Chandy-Lamport style snapshot protocol layered on top. Given the same
//! seed, a run produces identical results every time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    SimulationRunner                      │
//! │                                                          │
//! │  ┌─────────────────────────────────────────────────────┐ │
//! │  │   Links (BTreeMap<src, BTreeMap<dest, Link>>)       │ │
//! │  │   FIFO queues of delayed SendMessageEvents          │ │
//! │  └────────────────────────┬────────────────────────────┘ │
//! │                           │ tick(): ≤1 delivery per node │
//! │                           ▼                              │
//! │  ┌─────────────────────────────────────────────────────┐ │
//! │  │   nodes: BTreeMap<NodeId, NodeState>                │ │
//! │  │   handle(event) → actions                           │ │
//! │  └────────────────────────┬────────────────────────────┘ │
//! │                           │ Send / NotifyComplete        │
//! │                           ▼                              │
//! │  ┌─────────────────────────────────────────────────────┐ │
//! │  │   SnapshotOrchestrator → SnapshotCollector latch    │ │
//! │  └─────────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The runner is single-threaded; the one cross-thread boundary is
//! [`SnapshotCollector::collect`], which blocks a *separate* caller
//! thread until the orchestrator publishes the reconciled
//! [`SnapshotState`](tokennet_types::SnapshotState).

mod collector;
mod link;
mod orchestrator;
mod runner;

pub use collector::SnapshotCollector;
pub use link::{Link, SendMessageEvent};
pub use orchestrator::SnapshotOrchestrator;
pub use runner::{InjectedEvent, SimulationConfig, SimulationRunner, SimulationStats};
