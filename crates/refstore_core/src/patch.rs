//! Change records in JSON-Patch form.
//!
//! Every mutation of a model or collection is described by a [`Patch`]:
//! an operation kind, a path addressing the changed field, the new
//! value and the previous value. Patches are immutable once emitted and
//! can be replayed with `apply_patch` on the addressed model or
//! collection.
//!
//! Paths follow JSON Pointer (RFC 6901) escaping. Model-level patches
//! use `/<field>`; collection-level patches use `/<type>/<id>/<field>`
//! for attribute changes and `/<type>/<id>` for membership changes.

use crate::key::Key;
use crate::schema::TypeTag;
use refstore_codec::Value;
use serde::Serialize;

/// Patch operation kind.
///
/// Only `Add`, `Replace` and `Remove` are ever emitted. `Copy`, `Move`
/// and `Test` exist for JSON-Patch compatibility and are accepted but
/// ignored on replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    /// A new attribute or member was added.
    Add,
    /// An existing attribute was replaced.
    Replace,
    /// An attribute or member was removed.
    Remove,
    /// Reserved.
    Copy,
    /// Reserved.
    Move,
    /// Reserved.
    Test,
}

/// A single immutable change record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Patch {
    /// Operation kind.
    pub op: PatchOp,
    /// Path addressing the changed field or member.
    pub path: String,
    /// The new value, for `Add` and `Replace`. Reference fields carry
    /// their raw key form here, never resolved entities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// The previous value, for `Replace` and `Remove`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
}

impl Patch {
    /// Creates an add patch.
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value: Some(value),
            old_value: None,
        }
    }

    /// Creates a replace patch.
    pub fn replace(path: impl Into<String>, value: Value, old_value: Option<Value>) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.into(),
            value: Some(value),
            old_value,
        }
    }

    /// Creates a remove patch.
    pub fn remove(path: impl Into<String>, old_value: Option<Value>) -> Self {
        Self {
            op: PatchOp::Remove,
            path: path.into(),
            value: None,
            old_value,
        }
    }

    /// Splits the path into unescaped segments.
    pub fn segments(&self) -> Vec<String> {
        parse_path(&self.path)
    }

    /// Rewrites a model-level path into its collection-level form by
    /// prefixing the owning model's type and id.
    #[must_use]
    pub(crate) fn rebase(&self, ty: &TypeTag, id: &Key) -> Self {
        let mut rebased = self.clone();
        rebased.path = format!(
            "/{}/{}{}",
            escape_segment(ty.as_str()),
            escape_segment(&id.to_string()),
            self.path
        );
        rebased
    }

    /// Returns the patch that undoes this one, or `None` for reserved
    /// operations.
    #[must_use]
    pub fn inverse(&self) -> Option<Self> {
        match self.op {
            PatchOp::Add => Some(Self::remove(self.path.clone(), self.value.clone())),
            PatchOp::Remove => self
                .old_value
                .clone()
                .map(|old| Self::add(self.path.clone(), old)),
            PatchOp::Replace => self.old_value.clone().map(|old| Self {
                op: PatchOp::Replace,
                path: self.path.clone(),
                value: Some(old),
                old_value: self.value.clone(),
            }),
            PatchOp::Copy | PatchOp::Move | PatchOp::Test => None,
        }
    }
}

/// Escapes a path segment per RFC 6901: `~` becomes `~0`, `/` becomes
/// `~1`.
pub(crate) fn escape_segment(segment: &str) -> String {
    if !segment.contains(['~', '/']) {
        return segment.to_string();
    }
    segment.replace('~', "~0").replace('/', "~1")
}

/// Unescapes a path segment per RFC 6901.
///
/// `~1` must be replaced before `~0`.
pub(crate) fn unescape_segment(segment: &str) -> String {
    if !segment.contains('~') {
        return segment.to_string();
    }
    segment.replace("~1", "/").replace("~0", "~")
}

/// Builds a model-level field path.
pub(crate) fn field_path(field: &str) -> String {
    format!("/{}", escape_segment(field))
}

/// Builds a collection-level membership path.
pub(crate) fn member_path(ty: &TypeTag, id: &Key) -> String {
    format!(
        "/{}/{}",
        escape_segment(ty.as_str()),
        escape_segment(&id.to_string())
    )
}

/// Parses a path into unescaped segments.
pub(crate) fn parse_path(path: &str) -> Vec<String> {
    if path.is_empty() || path == "/" {
        return Vec::new();
    }
    path.trim_start_matches('/')
        .split('/')
        .map(unescape_segment)
        .collect()
}
