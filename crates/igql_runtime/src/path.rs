//! Response paths for error attribution and incremental chunk labeling.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single step in a response path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl From<String> for PathSegment {
    fn from(s: String) -> Self {
        Self::Key(s)
    }
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        Self::Key(s.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

/// An immutable chain locating a value in the response tree.
///
/// Paths are shared by reference among sibling completions; extending a
/// path never touches the parent.
#[derive(Debug, Clone)]
pub struct Path {
    segment: PathSegment,
    parent: Option<Arc<Path>>,
}

impl Path {
    /// Creates a root-level path for a response key.
    pub fn root(key: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            segment: PathSegment::Key(key.into()),
            parent: None,
        })
    }

    /// Extends a path with a response key.
    pub fn child_key(self: &Arc<Self>, key: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            segment: PathSegment::Key(key.into()),
            parent: Some(Arc::clone(self)),
        })
    }

    /// Extends a path with a list index.
    pub fn child_index(self: &Arc<Self>, index: usize) -> Arc<Self> {
        Arc::new(Self {
            segment: PathSegment::Index(index),
            parent: Some(Arc::clone(self)),
        })
    }

    /// The ordered segments, root to leaf.
    pub fn to_segments(&self) -> Vec<PathSegment> {
        let mut segments = Vec::new();
        let mut current = Some(self);
        while let Some(path) = current {
            segments.push(path.segment.clone());
            current = path.parent.as_deref();
        }
        segments.reverse();
        segments
    }
}

/// Converts an optional path (None = the response root) to segments.
pub fn segments_of(path: Option<&Arc<Path>>) -> Vec<PathSegment> {
    path.map(|p| p.to_segments()).unwrap_or_default()
}

/// Returns true if `candidate` equals or extends `prefix`.
pub fn starts_with(candidate: &[PathSegment], prefix: &[PathSegment]) -> bool {
    candidate.len() >= prefix.len() && candidate[..prefix.len()] == *prefix
}
