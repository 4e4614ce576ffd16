use std::collections::BTreeMap;

use chrono::Utc;

use crate::map::BrickMap;
use crate::node::{Directory, Node};
use crate::METADATA_LOG_PATH;

impl BrickMap {
    /// The minimal map that, merged onto `self`, reproduces `other`.
    ///
    /// Directories whose set of entry names changed are carried whole.
    /// Otherwise only the children that differ are carried, inside a partial
    /// directory with `other`'s metadata. Files are compared by their brick
    /// lists, embedded files by content. A changed deletion state always
    /// counts as a change. The metadata log entry is never part of a diff.
    #[must_use]
    pub fn diff(&self, other: &Self) -> Self {
        let mut changes = Self::from_parts(
            other.version,
            Directory {
                metadata: other.root.metadata.clone(),
                items: BTreeMap::new(),
            },
            other.metadata.clone(),
            BTreeMap::new(),
        );

        for (name, theirs) in &other.root.items {
            if name == METADATA_LOG_PATH {
                continue;
            }

            let changed = match self.root.items.get(name) {
                Some(ours) => diff_node(ours, theirs),
                None => Some(theirs.clone()),
            };

            if let Some(node) = changed {
                changes.root.items.insert(name.clone(), node);
            }
        }

        for (path, theirs) in &other.embedded {
            let unchanged = self.embedded.get(path).is_some_and(|ours| {
                ours.content == theirs.content
                    && ours.metadata.is_deleted() == theirs.metadata.is_deleted()
            });

            if !unchanged {
                changes.embedded.insert(path.clone(), theirs.clone());
            }
        }

        changes
    }

    /// Folds the changes between `self` and `other` into `self`.
    ///
    /// Only what [`BrickMap::diff`] reports is applied, so entries that match
    /// in content but differ in timestamps leave `self` untouched. Within the
    /// diff, directories present on both sides are merged entry by entry and
    /// take the incoming metadata. Files, embedded files and entries whose
    /// kind or deletion state differ are replaced. Returns whether anything
    /// changed.
    pub fn merge(&mut self, other: &Self) -> bool {
        let changes = self.diff(other);
        if changes.is_empty() {
            return false;
        }

        let mut changed = false;

        for (name, node) in &changes.root.items {
            changed |= merge_entry(&mut self.root.items, name, node);
        }

        for (path, entry) in &changes.embedded {
            if self.embedded.get(path) != Some(entry) {
                self.embedded.insert(path.clone(), entry.clone());
                changed = true;
            }
        }

        if changed {
            self.touch(Utc::now());
        }

        changed
    }
}

fn diff_node(ours: &Node, theirs: &Node) -> Option<Node> {
    if ours.is_deleted() != theirs.is_deleted() {
        return Some(theirs.clone());
    }

    match (ours, theirs) {
        (Node::Directory(ours), Node::Directory(theirs)) => {
            diff_directory(ours, theirs).map(Node::Directory)
        }
        (Node::File(ours), Node::File(theirs)) => {
            (ours.hash_links != theirs.hash_links).then(|| Node::File(theirs.clone()))
        }
        _ => Some(theirs.clone()),
    }
}

fn diff_directory(ours: &Directory, theirs: &Directory) -> Option<Directory> {
    if !ours.items.keys().eq(theirs.items.keys()) {
        return Some(theirs.clone());
    }

    let items: BTreeMap<_, _> = theirs
        .items
        .iter()
        .filter_map(|(name, theirs)| {
            let ours = ours.items.get(name)?;

            diff_node(ours, theirs).map(|node| (name.clone(), node))
        })
        .collect();

    (!items.is_empty()).then(|| Directory {
        metadata: theirs.metadata.clone(),
        items,
    })
}

fn merge_entry(items: &mut BTreeMap<String, Node>, name: &str, incoming: &Node) -> bool {
    let Some(existing) = items.get_mut(name) else {
        items.insert(name.to_owned(), incoming.clone());
        return true;
    };

    if let (Node::Directory(existing), Node::Directory(incoming)) = (&mut *existing, incoming) {
        if existing.metadata.is_deleted() == incoming.metadata.is_deleted() {
            return merge_directory(existing, incoming);
        }
    }

    if existing == incoming {
        return false;
    }

    *existing = incoming.clone();
    true
}

fn merge_directory(existing: &mut Directory, incoming: &Directory) -> bool {
    let mut changed = existing.metadata != incoming.metadata;
    existing.metadata = incoming.metadata.clone();

    for (name, child) in &incoming.items {
        changed |= merge_entry(&mut existing.items, name, child);
    }

    changed
}
