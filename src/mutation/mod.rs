//! Optimistic mutations
//!
//! An [`MutationIntent`] is planned into cache effects plus their inverse,
//! the effects are applied at once, and the remote write either confirms
//! them (temporary id replaced by the canonical one) or rolls them back.

mod intent;
mod pipeline;
mod plan;

pub use intent::{JobChanges, MutationIntent, NewJob};
pub use pipeline::{MutationPipeline, MutationReceipt};
pub use plan::{prepare, CacheEffect, Confirmation, JobFields, MutationPlan, RemoteCall};
