//! Keeping the caches in step with the backend
//!
//! - [`sequencer`]: latest-request-wins tokens and fetch debounce
//! - [`normalize`]: both push transports folded into [`ChangeEvent`]
//! - [`reconciler`]: idempotent application of change events
//! - [`listener`]: the push consumer loop

pub mod event;
pub mod listener;
pub mod normalize;
pub mod reconciler;
pub mod sequencer;

pub use event::{ChangeEvent, ChangeOp, EntityKind};
pub use listener::{ListenerStats, PushListener};
pub use normalize::{normalize, PushMessage};
pub use reconciler::{Reconciled, Reconciler};
pub use sequencer::{RequestSequencer, RequestToken};
