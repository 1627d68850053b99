//! Composite primary key of a versioned object row.
//!
//! # Invariants
//! - `repository_id` is opaque but never blank.
//! - `object_number` is `>= FIRST_OBJECT_NUMBER`.
//! - `is_latest` is asserted by the caller, never derived from storage.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Opaque repository identifier in string form.
pub type RepositoryId = String;

/// Repository-scoped object number.
pub type ObjectNumber = i64;

/// Smallest object number a repository can hand out.
pub const FIRST_OBJECT_NUMBER: ObjectNumber = 1;

/// Key shape validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValidationError {
    /// `repository_id` is empty after trim.
    BlankRepositoryId,
    /// `object_number` is below `FIRST_OBJECT_NUMBER`.
    ObjectNumberOutOfRange(ObjectNumber),
}

impl Display for KeyValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankRepositoryId => write!(f, "repository_id must not be blank"),
            Self::ObjectNumberOutOfRange(value) => write!(
                f,
                "object_number must be >= {FIRST_OBJECT_NUMBER}, got {value}"
            ),
        }
    }
}

impl Error for KeyValidationError {}

/// Full primary key of one object row: `(repository_id, is_latest, object_number)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionedObjectKey {
    pub repository_id: RepositoryId,
    pub is_latest: bool,
    pub object_number: ObjectNumber,
}

impl VersionedObjectKey {
    /// Builds a key addressing the latest row of one object.
    pub fn latest(repository_id: impl Into<RepositoryId>, object_number: ObjectNumber) -> Self {
        Self {
            repository_id: repository_id.into(),
            is_latest: true,
            object_number,
        }
    }

    /// Checks key shape. Does not touch storage.
    pub fn validate(&self) -> Result<(), KeyValidationError> {
        validate_repository_id(&self.repository_id)?;
        if self.object_number < FIRST_OBJECT_NUMBER {
            return Err(KeyValidationError::ObjectNumberOutOfRange(
                self.object_number,
            ));
        }
        Ok(())
    }
}

impl Display for VersionedObjectKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}#{} (is_latest={})",
            self.repository_id, self.object_number, self.is_latest
        )
    }
}

pub(crate) fn validate_repository_id(repository_id: &str) -> Result<(), KeyValidationError> {
    if repository_id.trim().is_empty() {
        return Err(KeyValidationError::BlankRepositoryId);
    }
    Ok(())
}
