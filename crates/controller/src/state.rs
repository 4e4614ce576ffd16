use bricks_map::{BrickMap, BrickMapDiff, Timestamp};
use bricks_primitives::{Hash, HashLink};

use crate::error::Result;
use crate::strategy::Reconciled;

/// A diff that left the pending queue, identified by its content hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedDiff {
    pub hash: Hash,
    pub diff: BrickMapDiff,
}

/// Everything a controller knows about its archive.
///
/// `dirty` always equals `anchored` with every diff in `diffs_in_anchoring`
/// and then `diffs_new` replayed on top, except while an anchoring round
/// holds the diffs it is folding. Once local changes were reconciled onto a
/// remote version that has not been anchored over yet, `reconciled.merged`
/// takes the place of `anchored` and the diffs it folded are skipped.
#[derive(Debug)]
pub struct ControllerState {
    pub(crate) anchored: BrickMap,
    pub(crate) dirty: BrickMap,
    pub(crate) diffs_new: Vec<BrickMapDiff>,
    pub(crate) diffs_in_anchoring: Vec<PreparedDiff>,
    pub(crate) latest_diff_hash: Option<Hash>,
    pub(crate) current_anchored_hash: Option<HashLink>,
    /// A reconciliation whose retried anchor did not land.
    pub(crate) reconciled: Option<Reconciled>,
    pub(crate) anchoring_in_progress: bool,
    pub(crate) anchoring_suspended: bool,
    /// Bumped whenever the state is reset from the backend, so an anchoring
    /// round can tell its view went stale underneath it.
    pub(crate) epoch: u64,
}

impl ControllerState {
    pub(crate) fn new(anchored: BrickMap, hash: Option<HashLink>) -> Self {
        Self {
            dirty: anchored.clone(),
            latest_diff_hash: anchored.metadata().prev_diff_hash_link,
            anchored,
            diffs_new: Vec::new(),
            diffs_in_anchoring: Vec::new(),
            current_anchored_hash: hash,
            reconciled: None,
            anchoring_in_progress: false,
            anchoring_suspended: false,
            epoch: 0,
        }
    }

    #[must_use]
    pub const fn anchored(&self) -> &BrickMap {
        &self.anchored
    }

    #[must_use]
    pub const fn dirty(&self) -> &BrickMap {
        &self.dirty
    }

    #[must_use]
    pub const fn current_anchored_hash(&self) -> Option<&HashLink> {
        self.current_anchored_hash.as_ref()
    }

    #[must_use]
    pub fn diffs_new(&self) -> &[BrickMapDiff] {
        &self.diffs_new
    }

    #[must_use]
    pub fn diffs_in_anchoring(&self) -> &[PreparedDiff] {
        &self.diffs_in_anchoring
    }

    /// Every diff not yet anchored, oldest first.
    pub fn pending_diffs(&self) -> impl Iterator<Item = &BrickMapDiff> {
        self.diffs_in_anchoring
            .iter()
            .map(|prepared| &prepared.diff)
            .chain(&self.diffs_new)
    }

    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.pending_diffs().map(BrickMapDiff::operation_count).sum()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending_operations() > 0
    }

    /// The diff collecting writes right now, created on first use and
    /// chained to the last diff that left the queue.
    pub(crate) fn current_diff(&mut self, at: Timestamp) -> &mut BrickMapDiff {
        if self.diffs_new.is_empty() {
            self.diffs_new
                .push(BrickMapDiff::new(self.latest_diff_hash, at));
        }

        let last = self.diffs_new.len() - 1;
        &mut self.diffs_new[last]
    }

    /// Moves every new diff to the anchoring queue, hashing each one and
    /// chaining `latest_diff_hash` through them.
    pub(crate) fn prepare_diffs(&mut self) -> Result<()> {
        self.diffs_new.retain(|diff| !diff.is_empty());

        let hashes = self
            .diffs_new
            .iter()
            .map(BrickMapDiff::content_hash)
            .collect::<Result<Vec<_>, _>>()?;

        for (hash, diff) in hashes.into_iter().zip(self.diffs_new.drain(..)) {
            self.latest_diff_hash = Some(hash);
            self.diffs_in_anchoring.push(PreparedDiff { hash, diff });
        }

        Ok(())
    }

    pub(crate) fn take_in_anchoring(&mut self) -> Vec<PreparedDiff> {
        std::mem::take(&mut self.diffs_in_anchoring)
    }

    /// Puts `consumed` back in front of the anchoring queue, in order, and
    /// keeps `reconciled` for the next round to resume from. Diffs taken
    /// before the last reset are dropped instead.
    pub(crate) fn rollback(
        &mut self,
        epoch: u64,
        mut consumed: Vec<PreparedDiff>,
        reconciled: Option<Reconciled>,
    ) {
        if epoch != self.epoch {
            return;
        }

        consumed.append(&mut self.diffs_in_anchoring);
        self.diffs_in_anchoring = consumed;
        self.reconciled = reconciled;
    }

    /// Records a version the backend accepted.
    pub(crate) fn commit_anchor(
        &mut self,
        epoch: u64,
        anchored: BrickMap,
        hash: HashLink,
    ) -> Result<(), String> {
        if epoch != self.epoch {
            return Err(format!(
                "state was reloaded while `{hash}` was being anchored"
            ));
        }

        self.anchored = anchored;
        self.current_anchored_hash = Some(hash);
        self.reconciled = None;

        Ok(())
    }

    /// Replaces everything with a freshly loaded version, dropping every
    /// pending diff.
    pub(crate) fn reset(&mut self, anchored: BrickMap, hash: HashLink) {
        self.dirty = anchored.clone();
        self.latest_diff_hash = anchored.metadata().prev_diff_hash_link;
        self.anchored = anchored;
        self.current_anchored_hash = Some(hash);
        self.diffs_new.clear();
        self.diffs_in_anchoring.clear();
        self.reconciled = None;
        self.epoch += 1;
    }
}
