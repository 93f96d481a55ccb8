//! Error types for the store core.

use crate::key::Key;
use crate::schema::TypeTag;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
///
/// All of these are synchronous, non-retryable contract violations.
/// Absence is never an error: `find` and `remove` of something that
/// isn't there return `None`/empty instead.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Codec error from the plain-data boundary.
    #[error("codec error: {0}")]
    Codec(#[from] refstore_codec::CodecError),

    /// Auto-id is disabled and no identifier was supplied.
    #[error("missing identifier: attribute '{attribute}' is required")]
    MissingId {
        /// Name of the id attribute that was expected.
        attribute: String,
    },

    /// A reference upsert resolved to a different type than declared.
    #[error("reference type mismatch: expected '{expected}', got '{actual}'")]
    RefTypeMismatch {
        /// The declared target type of the reference.
        expected: TypeTag,
        /// The type the value actually resolved to.
        actual: TypeTag,
    },

    /// A live model was assigned to a reference on a model with no
    /// owning collection to resolve it against.
    #[error("unanchored reference: '{key}' cannot hold an entity without an owning collection")]
    UnanchoredReference {
        /// Name of the reference attribute.
        key: String,
    },

    /// A write-reference operation was invoked on an external
    /// (derived, read-only) reference.
    #[error("'{key}' is an external reference")]
    ExternalReference {
        /// Name of the reference attribute.
        key: String,
    },

    /// Bulk import data lacked a resolvable type tag.
    #[error("unresolvable type: {message}")]
    UnresolvableType {
        /// Description of the offending item.
        message: String,
    },

    /// A runtime reference was declared with no way to determine its
    /// target type.
    #[error("reference '{key}' has no resolvable target type")]
    UnknownReferenceType {
        /// Name of the reference attribute.
        key: String,
    },

    /// A model addressed by a patch path is not in the collection.
    #[error("no model '{ty}' with id '{id}'")]
    ModelNotFound {
        /// Type segment of the patch path.
        ty: TypeTag,
        /// Id segment of the patch path.
        id: Key,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl StoreError {
    /// Creates a missing identifier error.
    pub fn missing_id(attribute: impl Into<String>) -> Self {
        Self::MissingId {
            attribute: attribute.into(),
        }
    }

    /// Creates a reference type mismatch error.
    pub fn ref_type_mismatch(expected: TypeTag, actual: TypeTag) -> Self {
        Self::RefTypeMismatch { expected, actual }
    }

    /// Creates an unanchored reference error.
    pub fn unanchored_reference(key: impl Into<String>) -> Self {
        Self::UnanchoredReference { key: key.into() }
    }

    /// Creates an external reference error.
    pub fn external_reference(key: impl Into<String>) -> Self {
        Self::ExternalReference { key: key.into() }
    }

    /// Creates an unresolvable type error.
    pub fn unresolvable_type(message: impl Into<String>) -> Self {
        Self::UnresolvableType {
            message: message.into(),
        }
    }

    /// Creates an unknown reference type error.
    pub fn unknown_reference_type(key: impl Into<String>) -> Self {
        Self::UnknownReferenceType { key: key.into() }
    }

    /// Creates a model not found error.
    pub fn model_not_found(ty: TypeTag, id: Key) -> Self {
        Self::ModelNotFound { ty, id }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
