//! harlowe-core — concurrent edit-coordination engine.
//!
//! Five components, each owning one piece of the engine's state machine:
//! [`version_store`] (durable git-backed history), [`workspace`]
//! (ephemeral per-invocation sandboxes), [`merge_coordinator`] (the
//! single serialization point for merging workspace diffs back into the
//! document), [`thread_manager`] (per-thread task scheduling and
//! subprocess lifecycle), and [`undo_engine`] (revert/redo, escalating
//! to a resolution thread when a clean revert isn't possible).
//!
//! [`config`] and [`telemetry`] are the ambient stack a host embeds this
//! crate with; [`model`] holds the shared domain types; [`error`] holds
//! the error taxonomy.

pub mod config;
pub mod error;
pub mod merge_coordinator;
pub mod model;
pub mod telemetry;
pub mod thread_manager;
pub mod undo_engine;
pub mod version_store;
pub mod workspace;
