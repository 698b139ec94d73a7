//! Core types for the tokennet simulator.
//!
//! This crate provides the foundational types used throughout the
//! simulation:
//!
//! - **Identifiers**: [`NodeId`], [`SnapshotId`], [`ChannelId`]
//! - **Messages**: the [`Message`] sum type carried on channels
//! - **Snapshot values**: [`SnapshotState`], [`SnapshotMessage`]
//! - **Errors**: the [`TopologyError`] taxonomy
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not
//! depend on any other workspace crates, making it the foundation layer.

mod error;
mod identifiers;
mod message;
mod snapshot;

pub use error::TopologyError;
pub use identifiers::{ChannelId, NodeId, SnapshotId};
pub use message::Message;
pub use snapshot::{SnapshotMessage, SnapshotState};
