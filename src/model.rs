//! Action-driven models for the active casefile and for sharing
//!
//! Each concern owns one [`Model`]. Consumers subscribe to its snapshots and
//! change it only by dispatching actions.

mod casefile;
mod dispatcher;
mod lock;
mod sharing;

pub use casefile::{reduce, CasefileAction, CasefileModel};
pub use dispatcher::{Action, Dispatcher};
pub use lock::{Conditions, LockState, Model, PendingAction, Snapshot};
pub use sharing::{SharingAction, SharingModel, SharingState};
