use std::collections::btree_map;
use std::collections::BTreeMap;

use crate::node::{Directory, EmbeddedFile, Node};
use crate::path::TreePath;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkMode {
    Files,
    Folders,
}

/// A lazy, depth-first listing of live entries below a base path.
///
/// Tree entries come first, in pre-order with siblings sorted by name,
/// followed by embedded files when listing files. Cloning a walk restarts it
/// from wherever the clone was taken.
#[derive(Clone, Debug)]
pub struct Walk<'a> {
    mode: WalkMode,
    recursive: bool,
    stack: Vec<(TreePath, &'a Node)>,
    embedded: btree_map::Iter<'a, String, EmbeddedFile>,
    prefix: String,
}

impl<'a> Walk<'a> {
    pub(crate) fn new(
        base: &TreePath,
        dir: Option<&'a Directory>,
        embedded: &'a BTreeMap<String, EmbeddedFile>,
        mode: WalkMode,
        recursive: bool,
    ) -> Self {
        let mut walk = Self {
            mode,
            recursive,
            stack: Vec::new(),
            embedded: embedded.iter(),
            prefix: if base.is_root() {
                "/".to_owned()
            } else {
                format!("{base}/")
            },
        };

        if let Some(dir) = dir {
            walk.push_children(base, dir);
        }

        walk
    }

    fn push_children(&mut self, path: &TreePath, dir: &'a Directory) {
        for (name, node) in dir.live_items().rev() {
            self.stack.push((path.join(name), node));
        }
    }

    fn next_embedded(&mut self) -> Option<String> {
        for (key, entry) in self.embedded.by_ref() {
            if entry.metadata.is_deleted() {
                continue;
            }

            let Some(rest) = key.strip_prefix(&self.prefix) else {
                continue;
            };

            if !rest.is_empty() && (self.recursive || !rest.contains('/')) {
                return Some(key.clone());
            }
        }

        None
    }
}

impl Iterator for Walk<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((path, node)) = self.stack.pop() {
            match node {
                Node::Directory(dir) => {
                    if self.recursive {
                        self.push_children(&path, dir);
                    }

                    if self.mode == WalkMode::Folders {
                        return Some(path.to_string());
                    }
                }
                Node::File(_) => {
                    if self.mode == WalkMode::Files {
                        return Some(path.to_string());
                    }
                }
            }
        }

        match self.mode {
            WalkMode::Files => self.next_embedded(),
            WalkMode::Folders => None,
        }
    }
}
