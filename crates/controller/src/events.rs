use bricks_primitives::{AnchorId, HashLink};

use crate::error::Result;

/// How an anchoring run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnchorOutcome {
    /// The last version this run appended to the chain.
    Anchored(HashLink),
    NothingToAnchor,
    /// Another run was already going; it picks up these changes too.
    InProgress,
}

impl AnchorOutcome {
    #[must_use]
    pub const fn anchored(&self) -> Option<&HashLink> {
        match self {
            Self::Anchored(link) => Some(link),
            Self::NothingToAnchor | Self::InProgress => None,
        }
    }
}

/// Result of a detached anchoring run, sent to the configured listener.
#[derive(Debug)]
pub struct AnchoringEvent {
    pub anchor_id: AnchorId,
    pub result: Result<AnchorOutcome>,
}

/// Broadcast to subscribers whenever a new version is anchored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnchorNotice {
    pub anchor_id: AnchorId,
    pub hash_link: HashLink,
    pub previous: Option<HashLink>,
}
