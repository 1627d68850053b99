//! Create payloads and persisted row shapes.

use crate::model::key::{
    validate_repository_id, KeyValidationError, ObjectNumber, RepositoryId, VersionedObjectKey,
};
use serde::{Deserialize, Serialize};

/// Data-column values keyed by column name.
pub type DataMap = serde_json::Map<String, serde_json::Value>;

/// Input for creating one object.
///
/// `object_number` is server-assigned: whatever the caller passes is replaced
/// by the allocator before the row is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePayload {
    pub repository_id: RepositoryId,
    pub is_latest: bool,
    #[serde(default)]
    pub object_number: Option<ObjectNumber>,
    #[serde(default)]
    pub data: DataMap,
}

impl CreatePayload {
    /// Creates a latest-row payload with no object number yet.
    pub fn new(repository_id: impl Into<RepositoryId>, data: DataMap) -> Self {
        Self {
            repository_id: repository_id.into(),
            is_latest: true,
            object_number: None,
            data,
        }
    }

    /// Returns the full key once an object number has been assigned.
    pub fn key(&self) -> Option<VersionedObjectKey> {
        self.object_number.map(|object_number| VersionedObjectKey {
            repository_id: self.repository_id.clone(),
            is_latest: self.is_latest,
            object_number,
        })
    }

    pub(crate) fn validate(&self) -> Result<(), KeyValidationError> {
        validate_repository_id(&self.repository_id)
    }
}

/// Audit columns maintained by the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemColumns {
    pub created_by: Option<String>,
    /// Epoch milliseconds.
    pub created_at: i64,
    pub updated_by: Option<String>,
    /// Epoch milliseconds.
    pub updated_at: i64,
}

/// One persisted object row as returned by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedObjectRow {
    #[serde(flatten)]
    pub key: VersionedObjectKey,
    pub data: DataMap,
    #[serde(flatten)]
    pub system: SystemColumns,
}

#[cfg(test)]
mod tests {
    use super::{CreatePayload, DataMap};
    use serde_json::json;

    #[test]
    fn payload_key_is_none_until_number_assigned() {
        let mut payload = CreatePayload::new("r1", DataMap::new());
        assert!(payload.key().is_none());

        payload.object_number = Some(7);
        let key = payload.key().expect("key should exist after assignment");
        assert_eq!(key.object_number, 7);
        assert!(key.is_latest);
    }

    #[test]
    fn payload_deserializes_without_object_number() {
        let payload: CreatePayload = serde_json::from_value(json!({
            "repository_id": "r1",
            "is_latest": true,
            "data": { "name": "a" }
        }))
        .expect("payload should deserialize");
        assert_eq!(payload.object_number, None);
        assert_eq!(payload.data["name"], "a");
    }
}
