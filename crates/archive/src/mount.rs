use std::collections::BTreeMap;
use std::fmt;

use bricks_map::TreePath;
use parking_lot::RwLock;
use tracing::debug;

use crate::archive::Archive;
use crate::error::Result;

/// Where a path crossing into another archive ends up.
#[derive(Clone, Debug)]
pub struct Mount {
    pub archive: Archive,
    /// The mount point, in the mounting archive.
    pub point: TreePath,
    /// The path inside the mounted archive.
    pub relative: TreePath,
}

/// Resolves paths that lie below a mount point.
pub trait Manifest: Send + Sync + fmt::Debug {
    fn resolve(&self, path: &TreePath) -> Option<Mount>;
}

/// Mount points kept in memory. A path belongs to the deepest mount point
/// it lies below.
#[derive(Debug, Default)]
pub struct MountTable {
    mounts: RwLock<BTreeMap<TreePath, Archive>>,
}

impl MountTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounts `archive` at `point`, returning whatever was mounted there.
    pub fn mount(&self, point: &str, archive: Archive) -> Result<Option<Archive>> {
        let point = TreePath::parse_entry(point)?;

        debug!(%point, anchor_id=%archive.anchor_id(), "Mounting archive");

        Ok(self.mounts.write().insert(point, archive))
    }

    pub fn unmount(&self, point: &str) -> Result<Option<Archive>> {
        let point = TreePath::parse_entry(point)?;

        Ok(self.mounts.write().remove(&point))
    }

    #[must_use]
    pub fn mount_points(&self) -> Vec<TreePath> {
        self.mounts.read().keys().cloned().collect()
    }
}

impl Manifest for MountTable {
    fn resolve(&self, path: &TreePath) -> Option<Mount> {
        let mounts = self.mounts.read();

        let (point, archive) = mounts
            .iter()
            .filter(|(point, _)| path.starts_with(point))
            .max_by_key(|(point, _)| point.depth())?;

        Some(Mount {
            archive: archive.clone(),
            point: point.clone(),
            relative: path.strip_prefix(point)?,
        })
    }
}
