//! Mediates reads and writes of an archive's brick map and anchors new
//! versions of it.
//!
//! A [`BrickMapController`] keeps the last anchored map, a working map with
//! every pending write applied, and the diffs between the two. Anchoring
//! folds the pending diffs into a new version, stores it, and appends it to
//! the anchoring backend; when the backend refuses because another writer
//! got there first, [`LatestVersionStrategy`] merges local changes onto the
//! remote version and tries again.

pub mod cache;
pub mod conflict;
pub mod controller;
pub mod error;
pub mod events;
pub mod state;
pub mod strategy;
pub mod validator;


pub use cache::BrickMapCache;
pub use conflict::{
    detect_conflicts, Conflict, ConflictError, ConflictKind, ConflictResolver, Conflicts,
    Resolution,
};
pub use controller::{BrickMapController, ControllerBuilder};
pub use error::{Error, Result};
pub use events::{AnchorNotice, AnchorOutcome, AnchoringEvent};
pub use state::{ControllerState, PreparedDiff};
pub use strategy::{LatestVersionStrategy, Reconciled};
pub use validator::{AllowAll, ValidationStage, Validator, WriteOp, WriteRequest};
