use bricks_primitives::BrickRef;

use crate::error::Result;
use crate::node::Timestamp;
use crate::path::TreePath;

/// The mutation surface shared by [`BrickMap`](crate::BrickMap) and
/// [`BrickMapDiff`](crate::BrickMapDiff).
///
/// A map applies each call to its tree; a diff appends it to its operation
/// log. Writers call the same method on both so reads observe the change
/// immediately while only the diff is anchored later. Every call carries the
/// timestamp to stamp on the touched entries, which keeps a replayed log
/// byte-for-byte equal to the tree it was recorded from.
pub trait TreeMutator {
    /// Replaces the content of the file at `path`, creating it if needed.
    fn add_file_entry(&mut self, path: &TreePath, bricks: Vec<BrickRef>, at: Timestamp)
        -> Result<()>;

    fn append_bricks(&mut self, path: &TreePath, bricks: Vec<BrickRef>, at: Timestamp)
        -> Result<()>;

    /// Empties a file, or drops every child of a directory.
    fn truncate(&mut self, path: &TreePath, at: Timestamp) -> Result<()>;

    fn replace_first_brick(&mut self, path: &TreePath, brick: BrickRef, at: Timestamp)
        -> Result<()>;

    fn replace_last_brick(&mut self, path: &TreePath, brick: BrickRef, at: Timestamp)
        -> Result<()>;

    /// Soft-deletes `path` and every embedded file below it.
    fn delete(&mut self, path: &TreePath, at: Timestamp) -> Result<()>;

    fn copy(&mut self, src: &TreePath, dst: &TreePath, at: Timestamp) -> Result<()>;

    fn create_folder(&mut self, path: &TreePath, at: Timestamp) -> Result<()>;

    fn create_file(&mut self, path: &TreePath, at: Timestamp) -> Result<()>;

    fn put_embedded(&mut self, path: &TreePath, content: Vec<u8>, at: Timestamp) -> Result<()>;

    fn append_embedded(&mut self, path: &TreePath, content: Vec<u8>, at: Timestamp)
        -> Result<()>;
}
