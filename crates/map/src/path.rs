use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A normalized absolute path inside a brick map.
///
/// Empty and `.` segments are dropped and `..` pops the previous segment;
/// climbing above the root is an error. The root itself is the empty path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreePath {
    segments: Vec<String>,
}

impl TreePath {
    #[must_use]
    pub const fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    pub(crate) fn from_segments(segments: &[String]) -> Self {
        Self {
            segments: segments.to_vec(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut segments: Vec<String> = Vec::new();

        for segment in raw.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(Error::InvalidPath(raw.to_owned()));
                    }
                }
                other => segments.push(other.to_owned()),
            }
        }

        Ok(Self { segments })
    }

    /// Parses a path that must name something below the root.
    pub fn parse_entry(raw: &str) -> Result<Self> {
        let path = Self::parse(raw)?;

        if path.is_root() {
            return Err(Error::InvalidPath(raw.to_owned()));
        }

        Ok(path)
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.segments.split_last()?;

        Some(Self {
            segments: parent.to_vec(),
        })
    }

    #[must_use]
    pub fn join(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_owned());
        Self { segments }
    }

    #[must_use]
    pub fn starts_with(&self, base: &Self) -> bool {
        self.segments.starts_with(&base.segments)
    }

    /// The remainder of `self` below `base`, if `base` is a prefix.
    #[must_use]
    pub fn strip_prefix(&self, base: &Self) -> Option<Self> {
        let rest = self.segments.strip_prefix(base.segments.as_slice())?;

        Some(Self {
            segments: rest.to_vec(),
        })
    }

    /// Rewrites the `from` prefix of this path to `to`.
    #[must_use]
    pub fn rebase(&self, from: &Self, to: &Self) -> Option<Self> {
        let rest = self.strip_prefix(from)?;

        let mut segments = to.segments.clone();
        segments.extend(rest.segments);

        Some(Self { segments })
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }

        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }

        Ok(())
    }
}

impl FromStr for TreePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
