use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use bricks_map::{BrickMap, BrickMapDiff, OpData, OpKind, Operation, TreePath};
use bricks_primitives::HashLink;
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ConflictKind {
    /// A local write lands on a path that already exists remotely.
    LocalOverwrite,
    /// A local copy reads from a path that was deleted remotely.
    RemoteDelete,
    /// A local delete removes a path that still exists remotely.
    LocalDelete,
}

impl ConflictKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalOverwrite => "LOCAL_OVERWRITE",
            Self::RemoteDelete => "REMOTE_DELETE",
            Self::LocalDelete => "LOCAL_DELETE",
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub message: String,
}

/// Conflicts by path. Only the last conflict found for a path is kept.
pub type Conflicts = BTreeMap<String, Conflict>;

/// Classifies every logged operation of `diffs` against the state of
/// `remote`.
///
/// Appends, embeds and brick replacements are never reported: they only
/// extend or patch content and merge onto whatever the remote holds.
pub fn detect_conflicts<'a, I>(remote: &BrickMap, diffs: I) -> Conflicts
where
    I: IntoIterator<Item = &'a BrickMapDiff>,
{
    let mut conflicts = Conflicts::new();

    for op in diffs.into_iter().flat_map(BrickMapDiff::log) {
        if let Some((path, conflict)) = classify(remote, op) {
            debug!(%path, kind = %conflict.kind, "conflicting operation");
            conflicts.insert(path, conflict);
        }
    }

    conflicts
}

fn classify(remote: &BrickMap, op: &Operation) -> Option<(String, Conflict)> {
    // Malformed paths surface as corrupt diffs once the log is replayed.
    let path = TreePath::parse_entry(&op.path).ok()?;

    let conflict = |path: &TreePath, kind, message: String| {
        Some((path.to_string(), Conflict { kind, message }))
    };

    match &op.op {
        OpKind::Add | OpKind::CreateFolder | OpKind::CreateFile | OpKind::Truncate
            if remote.exists(&path) =>
        {
            conflict(
                &path,
                ConflictKind::LocalOverwrite,
                format!("`{}` of `{path}` would overwrite a remote entry", op.op),
            )
        }
        OpKind::Copy => {
            if remote.is_deleted(&path) {
                return conflict(
                    &path,
                    ConflictKind::RemoteDelete,
                    format!("copy source `{path}` was deleted remotely"),
                );
            }

            let Some(OpData::Text(target)) = &op.data else {
                return None;
            };
            let target = TreePath::parse_entry(target).ok()?;

            remote.exists(&target).then(|| {
                (
                    target.to_string(),
                    Conflict {
                        kind: ConflictKind::LocalOverwrite,
                        message: format!("copy of `{path}` would overwrite remote `{target}`"),
                    },
                )
            })
        }
        OpKind::Delete if remote.exists(&path) => conflict(
            &path,
            ConflictKind::LocalDelete,
            format!("`{path}` was deleted locally but still exists remotely"),
        ),
        _ => None,
    }
}

/// Reconciliation found local changes that clash with the remote version.
#[derive(Clone, Debug, Error)]
#[error(
    "{} conflicting change(s) between local version {} and remote version {}",
    .conflicts.len(),
    display_version(.ours.as_ref()),
    display_version(.theirs.as_ref())
)]
pub struct ConflictError {
    pub conflicts: Conflicts,
    /// The version local changes were made against.
    pub ours: Option<HashLink>,
    /// The version the backend holds now.
    pub theirs: Option<HashLink>,
}

fn display_version(version: Option<&HashLink>) -> String {
    version.map_or_else(|| "<none>".to_owned(), |link| format!("`{link}`"))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Merge local changes onto the remote version anyway.
    Proceed,
    /// Give up and surface the conflict to the writer.
    Abort,
}

/// Decides what happens when reconciliation finds conflicts.
#[async_trait]
pub trait ConflictResolver: Send + Sync + fmt::Debug {
    async fn resolve(&self, conflict: &ConflictError) -> Resolution;
}

#[cfg(test)]
mod tests {
    use bricks_map::TreeMutator;
    use chrono::DateTime;

    use super::*;

    fn path(raw: &str) -> TreePath {
        raw.parse().unwrap()
    }

    fn remote() -> BrickMap {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut map = BrickMap::new(at);
        map.create_file(&path("/a"), at).unwrap();
        map.create_folder(&path("/gone"), at).unwrap();
        map.delete(&path("/gone"), at).unwrap();
        map
    }

    fn diff(record: impl FnOnce(&mut BrickMapDiff)) -> BrickMapDiff {
        let mut diff = BrickMapDiff::new(None, DateTime::from_timestamp(1_700_000_100, 0).unwrap());
        record(&mut diff);
        diff
    }

    #[test]
    fn test_add_over_remote_entry_is_local_overwrite() {
        let at = DateTime::from_timestamp(1_700_000_100, 0).unwrap();
        let local = diff(|d| d.add_file_entry(&path("/a"), vec![], at).unwrap());

        let conflicts = detect_conflicts(&remote(), [&local]);

        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts["/a"].kind, ConflictKind::LocalOverwrite);
    }

    #[test]
    fn test_copy_from_remotely_deleted_source() {
        let at = DateTime::from_timestamp(1_700_000_100, 0).unwrap();
        let local = diff(|d| d.copy(&path("/gone"), &path("/b"), at).unwrap());

        let conflicts = detect_conflicts(&remote(), [&local]);

        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts["/gone"].kind, ConflictKind::RemoteDelete);
    }

    #[test]
    fn test_copy_onto_remote_entry_is_keyed_on_destination() {
        let at = DateTime::from_timestamp(1_700_000_100, 0).unwrap();
        let local = diff(|d| d.copy(&path("/x"), &path("/a"), at).unwrap());

        let conflicts = detect_conflicts(&remote(), [&local]);

        assert_eq!(conflicts["/a"].kind, ConflictKind::LocalOverwrite);
        assert!(!conflicts.contains_key("/x"));
    }

    #[test]
    fn test_last_conflict_on_a_path_wins() {
        let at = DateTime::from_timestamp(1_700_000_100, 0).unwrap();
        let local = diff(|d| {
            d.create_file(&path("/a"), at).unwrap();
            d.delete(&path("/a"), at).unwrap();
        });

        let conflicts = detect_conflicts(&remote(), [&local]);

        assert_eq!(conflicts["/a"].kind, ConflictKind::LocalDelete);
    }

    #[test]
    fn test_appends_and_new_paths_are_clean() {
        let at = DateTime::from_timestamp(1_700_000_100, 0).unwrap();
        let local = diff(|d| {
            d.append_bricks(&path("/a"), vec![], at).unwrap();
            d.put_embedded(&path("/a"), b"x".to_vec(), at).unwrap();
            d.create_folder(&path("/fresh"), at).unwrap();
            d.delete(&path("/gone"), at).unwrap();
        });

        assert!(detect_conflicts(&remote(), [&local]).is_empty());
    }

    #[test]
    fn test_error_names_both_versions() {
        let error = ConflictError {
            conflicts: Conflicts::new(),
            ours: None,
            theirs: Some(HashLink::of("test", b"remote")),
        };

        let message = error.to_string();

        assert!(message.starts_with("0 conflicting change(s) between local version <none>"));
        assert!(message.contains(&HashLink::of("test", b"remote").to_string()));
    }
}
