use std::collections::BTreeMap;

use bricks_primitives::{BrickRef, Hash};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mutator::TreeMutator;
use crate::node::{Directory, EmbeddedFile, File, Metadata, Node, NodeKind, Timestamp};
use crate::path::TreePath;
use crate::walk::{Walk, WalkMode};
use crate::BRICK_MAP_VERSION;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapMetadata {
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_diff_hash_link: Option<Hash>,
}

impl MapMetadata {
    #[must_use]
    pub const fn new(at: Timestamp) -> Self {
        Self {
            created_at: at,
            updated_at: None,
            prev_diff_hash_link: None,
        }
    }
}

/// One snapshot of an archive tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrickMap {
    pub(crate) version: u32,
    pub(crate) root: Directory,
    pub(crate) metadata: MapMetadata,
    pub(crate) embedded: BTreeMap<String, EmbeddedFile>,
}

/// What [`BrickMap::stat`] reports about a live path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stat {
    pub kind: NodeKind,
    pub metadata: Metadata,
    pub size: Option<u64>,
}

impl Default for BrickMap {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl BrickMap {
    #[must_use]
    pub const fn new(at: Timestamp) -> Self {
        Self {
            version: BRICK_MAP_VERSION,
            root: Directory::new(at),
            metadata: MapMetadata::new(at),
            embedded: BTreeMap::new(),
        }
    }

    pub(crate) const fn from_parts(
        version: u32,
        root: Directory,
        metadata: MapMetadata,
        embedded: BTreeMap<String, EmbeddedFile>,
    ) -> Self {
        Self {
            version,
            root,
            metadata,
            embedded,
        }
    }

    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub const fn root(&self) -> &Directory {
        &self.root
    }

    #[must_use]
    pub const fn metadata(&self) -> &MapMetadata {
        &self.metadata
    }

    #[must_use]
    pub const fn embedded_files(&self) -> &BTreeMap<String, EmbeddedFile> {
        &self.embedded
    }

    /// True when the map holds no entries at all, live or deleted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.items.is_empty() && self.embedded.is_empty()
    }

    /// Compares the tree and embedded files, ignoring the map's own header
    /// and the root's timestamps.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.root.items == other.root.items && self.embedded == other.embedded
    }

    /// The deepest live directory on the way to `path`, and where it is.
    #[must_use]
    pub fn navigate(&self, path: &TreePath) -> (TreePath, &Directory) {
        let mut dir = &self.root;
        let mut reached = TreePath::root();

        for segment in path.segments() {
            match dir.items.get(segment) {
                Some(Node::Directory(next)) if !next.metadata.is_deleted() => {
                    dir = next;
                    reached = reached.join(segment);
                }
                _ => break,
            }
        }

        (reached, dir)
    }

    /// The live node at `path`. The root is not a node and never resolves.
    #[must_use]
    pub fn resolve(&self, path: &TreePath) -> Option<&Node> {
        let (last, parents) = path.segments().split_last()?;
        let (reached, dir) = self.navigate(&TreePath::from_segments(parents));

        if reached.depth() != parents.len() {
            return None;
        }

        dir.items.get(last).filter(|node| !node.is_deleted())
    }

    #[must_use]
    pub fn embedded(&self, path: &TreePath) -> Option<&EmbeddedFile> {
        self.embedded
            .get(&path.to_string())
            .filter(|entry| !entry.metadata.is_deleted())
    }

    /// Whether `path` holds a live tree node or embedded file.
    #[must_use]
    pub fn exists(&self, path: &TreePath) -> bool {
        path.is_root() || self.embedded(path).is_some() || self.resolve(path).is_some()
    }

    /// Whether `path` is still recorded but was soft-deleted, itself or
    /// through one of its ancestors.
    #[must_use]
    pub fn is_deleted(&self, path: &TreePath) -> bool {
        if self.exists(path) {
            return false;
        }

        lookup_any(&self.root, path).is_some() || self.embedded.contains_key(&path.to_string())
    }

    pub fn stat(&self, path: &TreePath) -> Result<Stat> {
        if path.is_root() {
            return Ok(Stat {
                kind: NodeKind::Directory,
                metadata: self.root.metadata.clone(),
                size: None,
            });
        }

        if let Some(entry) = self.embedded(path) {
            return Ok(Stat {
                kind: NodeKind::Embedded,
                metadata: entry.metadata.clone(),
                size: Some(entry.content.len() as u64),
            });
        }

        match self.resolve(path) {
            Some(Node::Directory(dir)) => Ok(Stat {
                kind: NodeKind::Directory,
                metadata: dir.metadata.clone(),
                size: None,
            }),
            Some(Node::File(file)) => Ok(Stat {
                kind: NodeKind::File,
                metadata: file.metadata.clone(),
                size: file.size(),
            }),
            None => Err(Error::not_found(path)),
        }
    }

    /// The brick references making up the file at `path`.
    pub fn bricks_meta(&self, path: &TreePath) -> Result<&[BrickRef]> {
        match self.resolve(path) {
            Some(Node::File(file)) => Ok(&file.hash_links),
            Some(Node::Directory(_)) => Err(Error::type_conflict(
                path,
                NodeKind::File,
                NodeKind::Directory,
            )),
            None if self.embedded(path).is_some() => Err(Error::type_conflict(
                path,
                NodeKind::File,
                NodeKind::Embedded,
            )),
            None => Err(Error::not_found(path)),
        }
    }

    /// Lazily lists what lives below `base`. A missing base lists only the
    /// embedded files filed under it, which may be none.
    pub fn walk(&self, base: &TreePath, mode: WalkMode, recursive: bool) -> Result<Walk<'_>> {
        let dir = if base.is_root() {
            Some(&self.root)
        } else {
            match self.resolve(base) {
                Some(Node::Directory(dir)) => Some(dir),
                Some(Node::File(_)) => {
                    return Err(Error::type_conflict(
                        base,
                        NodeKind::Directory,
                        NodeKind::File,
                    ))
                }
                None if self.embedded(base).is_some() => {
                    return Err(Error::type_conflict(
                        base,
                        NodeKind::Directory,
                        NodeKind::Embedded,
                    ))
                }
                None => None,
            }
        };

        Ok(Walk::new(base, dir, &self.embedded, mode, recursive))
    }

    pub fn list_files(&self, base: &TreePath, recursive: bool) -> Result<Vec<String>> {
        Ok(self.walk(base, WalkMode::Files, recursive)?.collect())
    }

    pub fn list_folders(&self, base: &TreePath, recursive: bool) -> Result<Vec<String>> {
        Ok(self.walk(base, WalkMode::Folders, recursive)?.collect())
    }

    /// Checks that a `kind` entry could be created at `path` without
    /// clobbering a live entry of another kind, anywhere along the path.
    fn check_creatable(&self, path: &TreePath, kind: NodeKind) -> Result<()> {
        let (last, parents) = split_entry(path)?;

        let mut dir = Some(&self.root);
        let mut prefix = TreePath::root();

        for segment in parents {
            prefix = prefix.join(segment);

            if self.embedded(&prefix).is_some() {
                return Err(Error::type_conflict(
                    &prefix,
                    NodeKind::Directory,
                    NodeKind::Embedded,
                ));
            }

            dir = match dir.and_then(|dir| dir.items.get(segment)) {
                Some(node) if node.is_deleted() => None,
                Some(Node::Directory(next)) => Some(next),
                Some(Node::File(_)) => {
                    return Err(Error::type_conflict(
                        &prefix,
                        NodeKind::Directory,
                        NodeKind::File,
                    ))
                }
                None => None,
            };
        }

        if let Some(node) = dir.and_then(|dir| dir.items.get(last)) {
            if !node.is_deleted() && node.kind() != kind {
                return Err(Error::type_conflict(path, kind, node.kind()));
            }
        }

        self.check_embedded_slot(path, kind)
    }

    fn check_embedded_slot(&self, path: &TreePath, kind: NodeKind) -> Result<()> {
        if kind != NodeKind::Embedded && self.embedded(path).is_some() {
            return Err(Error::type_conflict(path, kind, NodeKind::Embedded));
        }

        Ok(())
    }

    /// Returns the `kind` node at `path`, creating it and any missing
    /// directories on the way. Soft-deleted entries along the path are
    /// replaced by fresh ones. Nothing is mutated if the call fails.
    pub fn create_path(&mut self, path: &TreePath, kind: NodeKind, at: Timestamp) -> Result<&mut Node> {
        self.check_creatable(path, kind)?;

        let (last, parents) = split_entry(path)?;
        let mut dir = &mut self.root;

        for segment in parents {
            let entry = dir
                .items
                .entry(segment.clone())
                .or_insert_with(|| Node::new(NodeKind::Directory, at));

            if entry.is_deleted() {
                *entry = Node::new(NodeKind::Directory, at);
            }

            dir = match entry {
                Node::Directory(next) => next,
                Node::File(_) => {
                    return Err(Error::type_conflict(path, NodeKind::Directory, NodeKind::File))
                }
            };
        }

        let node = dir
            .items
            .entry(last.clone())
            .or_insert_with(|| Node::new(kind, at));

        if node.is_deleted() {
            *node = Node::new(kind, at);
        }

        Ok(node)
    }

    fn file_entry(&mut self, path: &TreePath, at: Timestamp) -> Result<&mut File> {
        match self.create_path(path, NodeKind::File, at)? {
            Node::File(file) => Ok(file),
            Node::Directory(_) => Err(Error::type_conflict(
                path,
                NodeKind::File,
                NodeKind::Directory,
            )),
        }
    }

    fn existing_file(&mut self, path: &TreePath) -> Result<&mut File> {
        match lookup_mut(&mut self.root, path) {
            Some(Node::File(file)) => Ok(file),
            Some(Node::Directory(_)) => Err(Error::type_conflict(
                path,
                NodeKind::File,
                NodeKind::Directory,
            )),
            None => Err(Error::not_found(path)),
        }
    }

    fn embedded_slot(&mut self, path: &TreePath, at: Timestamp) -> Result<&mut EmbeddedFile> {
        self.check_creatable(path, NodeKind::Embedded)?;

        let entry = self
            .embedded
            .entry(path.to_string())
            .or_insert_with(|| EmbeddedFile::new(Vec::new(), at));

        if entry.metadata.is_deleted() {
            *entry = EmbeddedFile::new(Vec::new(), at);
        }

        Ok(entry)
    }

    /// Live embedded files filed below `base`, keyed by their path.
    fn embedded_below<'a>(
        &'a self,
        base: &'a TreePath,
    ) -> impl Iterator<Item = (TreePath, &'a EmbeddedFile)> + 'a {
        self.embedded.iter().filter_map(move |(key, entry)| {
            if entry.metadata.is_deleted() {
                return None;
            }

            let path = TreePath::parse(key).ok()?;

            (path != *base && path.starts_with(base)).then_some((path, entry))
        })
    }

    pub(crate) fn touch(&mut self, at: Timestamp) {
        self.root.metadata.touch(at);
        self.metadata.updated_at = Some(at);
    }
}

impl TreeMutator for BrickMap {
    fn add_file_entry(
        &mut self,
        path: &TreePath,
        bricks: Vec<BrickRef>,
        at: Timestamp,
    ) -> Result<()> {
        let file = self.file_entry(path, at)?;
        file.hash_links = bricks;
        file.metadata.touch(at);

        self.touch(at);
        Ok(())
    }

    fn append_bricks(
        &mut self,
        path: &TreePath,
        bricks: Vec<BrickRef>,
        at: Timestamp,
    ) -> Result<()> {
        let file = self.file_entry(path, at)?;
        file.hash_links.extend(bricks);
        file.metadata.touch(at);

        self.touch(at);
        Ok(())
    }

    fn truncate(&mut self, path: &TreePath, at: Timestamp) -> Result<()> {
        let _ = split_entry(path)?;

        match lookup_mut(&mut self.root, path) {
            Some(Node::File(file)) => {
                file.hash_links.clear();
                file.metadata.touch(at);
            }
            Some(Node::Directory(dir)) => {
                dir.items.clear();
                dir.metadata.touch(at);

                let prefix = format!("{path}/");
                self.embedded.retain(|key, _| !key.starts_with(&prefix));
            }
            None => return Err(Error::not_found(path)),
        }

        self.touch(at);
        Ok(())
    }

    fn replace_first_brick(
        &mut self,
        path: &TreePath,
        brick: BrickRef,
        at: Timestamp,
    ) -> Result<()> {
        let file = self.existing_file(path)?;

        match file.hash_links.first_mut() {
            Some(first) => *first = brick,
            None => file.hash_links.push(brick),
        }
        file.metadata.touch(at);

        self.touch(at);
        Ok(())
    }

    fn replace_last_brick(
        &mut self,
        path: &TreePath,
        brick: BrickRef,
        at: Timestamp,
    ) -> Result<()> {
        let file = self.existing_file(path)?;

        match file.hash_links.last_mut() {
            Some(last) => *last = brick,
            None => file.hash_links.push(brick),
        }
        file.metadata.touch(at);

        self.touch(at);
        Ok(())
    }

    fn delete(&mut self, path: &TreePath, at: Timestamp) -> Result<()> {
        let _ = split_entry(path)?;

        let mut deleted = false;

        if let Some(node) = lookup_mut(&mut self.root, path) {
            let metadata = node.metadata_mut();
            metadata.deleted_at = Some(at);
            metadata.touch(at);
            deleted = true;
        }

        let key = path.to_string();
        let prefix = format!("{key}/");

        for (name, entry) in &mut self.embedded {
            if entry.metadata.is_deleted() || (*name != key && !name.starts_with(&prefix)) {
                continue;
            }

            entry.metadata.deleted_at = Some(at);
            entry.metadata.touch(at);
            deleted = true;
        }

        if deleted {
            self.touch(at);
            return Ok(());
        }

        if lookup_any(&self.root, path).is_some() || self.embedded.contains_key(&key) {
            return Ok(());
        }

        Err(Error::not_found(path))
    }

    fn copy(&mut self, src: &TreePath, dst: &TreePath, at: Timestamp) -> Result<()> {
        let _ = split_entry(src)?;

        if let Some(entry) = self.embedded(src).cloned() {
            let slot = self.embedded_slot(dst, at)?;
            *slot = entry;
            slot.metadata.touch(at);

            self.touch(at);
            return Ok(());
        }

        let node = self.resolve(src).cloned().ok_or_else(|| Error::not_found(src))?;
        self.check_creatable(dst, node.kind())?;

        let nested: Vec<_> = self
            .embedded_below(src)
            .filter_map(|(path, entry)| Some((path.rebase(src, dst)?.to_string(), entry.clone())))
            .collect();

        let target = self.create_path(dst, node.kind(), at)?;
        *target = node;
        target.metadata_mut().touch(at);

        self.embedded.extend(nested);

        self.touch(at);
        Ok(())
    }

    fn create_folder(&mut self, path: &TreePath, at: Timestamp) -> Result<()> {
        let node = self.create_path(path, NodeKind::Directory, at)?;
        node.metadata_mut().touch(at);

        self.touch(at);
        Ok(())
    }

    fn create_file(&mut self, path: &TreePath, at: Timestamp) -> Result<()> {
        let file = self.file_entry(path, at)?;
        file.metadata.touch(at);

        self.touch(at);
        Ok(())
    }

    fn put_embedded(&mut self, path: &TreePath, content: Vec<u8>, at: Timestamp) -> Result<()> {
        let entry = self.embedded_slot(path, at)?;
        entry.content = content;
        entry.metadata.touch(at);

        self.touch(at);
        Ok(())
    }

    fn append_embedded(
        &mut self,
        path: &TreePath,
        content: Vec<u8>,
        at: Timestamp,
    ) -> Result<()> {
        let entry = self.embedded_slot(path, at)?;
        entry.content.extend(content);
        entry.metadata.touch(at);

        self.touch(at);
        Ok(())
    }
}

fn split_entry(path: &TreePath) -> Result<(&String, &[String])> {
    path.segments()
        .split_last()
        .ok_or_else(|| Error::InvalidPath(path.to_string()))
}

/// The live node at `path`, reached through live directories only.
fn lookup_mut<'a>(mut dir: &'a mut Directory, path: &TreePath) -> Option<&'a mut Node> {
    let (last, parents) = path.segments().split_last()?;

    for segment in parents {
        dir = match dir.items.get_mut(segment) {
            Some(Node::Directory(next)) if !next.metadata.is_deleted() => next,
            _ => return None,
        };
    }

    dir.items.get_mut(last).filter(|node| !node.is_deleted())
}

/// The node stored at `path`, whether or not it or an ancestor is deleted.
fn lookup_any<'a>(mut dir: &'a Directory, path: &TreePath) -> Option<&'a Node> {
    let (last, parents) = path.segments().split_last()?;

    for segment in parents {
        dir = dir.items.get(segment)?.as_dir()?;
    }

    dir.items.get(last)
}
