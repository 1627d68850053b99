//! Versioned object use-case service.
//!
//! # Responsibility
//! - Guard every mutation with the caller-asserted `is_latest` flag.
//! - Allocate repository-scoped object numbers on create.
//! - Verify object numbers were allocated before update/delete.
//! - Delegate row persistence to an injected `RecordStore`.
//!
//! # Invariants
//! - The latest check runs before any lookup or write on every mutation.
//! - On create, the allocation row is written before the data row.
//! - On update/delete, an unallocated number never reaches the record store.
//! - Errors from sub-steps propagate unchanged; nothing is retried here.
//!
//! All calls run inside the caller's query context. Wrap them with
//! `db::run_in_transaction` so allocation and row write commit or roll back
//! together.

use crate::model::key::{KeyValidationError, ObjectNumber, VersionedObjectKey};
use crate::model::row::{CreatePayload, DataMap, VersionedObjectRow};
use crate::repo::object_number_repo::ObjectNumberRepository;
use crate::repo::record_store::{RecordStore, RepoError};
use crate::service::trace::{column_list, OperationTrace};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Message of the bad-request error raised for non-latest mutations.
pub const IS_LATEST_REQUIRED: &str = "is_latest must be true";

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Protocol-independent error classes for service callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller sent an invalid request (non-latest key, malformed fields).
    BadRequest,
    /// Unknown repository counter, object number or row.
    NotFound,
    /// Storage failure, including allocation uniqueness conflicts.
    Persistence,
}

impl ErrorKind {
    /// HTTP status a protocol layer should answer with.
    pub fn http_status(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::Persistence => 500,
        }
    }

    pub fn is_caller_error(self) -> bool {
        !matches!(self, Self::Persistence)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::NotFound => "not_found",
            Self::Persistence => "persistence",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service error for versioned object mutations.
#[derive(Debug)]
pub enum ServiceError {
    /// Request violates a precondition checked before touching storage.
    BadRequest(String),
    /// Repository-layer failure, passed through unchanged.
    Repo(RepoError),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::Repo(err) if err.is_not_found() => ErrorKind::NotFound,
            Self::Repo(
                RepoError::Validation(_) | RepoError::InvalidField { .. } | RepoError::EmptyChanges,
            ) => ErrorKind::BadRequest,
            Self::Repo(_) => ErrorKind::Persistence,
        }
    }

    /// Returns whether a concurrent create consumed the same object number.
    ///
    /// Retrying the whole create in a fresh transaction is the recovery.
    pub fn is_allocation_conflict(&self) -> bool {
        matches!(self, Self::Repo(RepoError::AllocationConflict { .. }))
    }
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(message) => write!(f, "{message}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::BadRequest(_) => None,
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<rusqlite::Error> for ServiceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(value.into())
    }
}

impl From<KeyValidationError> for ServiceError {
    fn from(value: KeyValidationError) -> Self {
        Self::BadRequest(value.to_string())
    }
}

/// Versioned object service over injected storage capabilities.
pub struct VersionedObjectService<S: RecordStore, N: ObjectNumberRepository> {
    name: String,
    store: S,
    numbers: N,
}

impl<S: RecordStore, N: ObjectNumberRepository> VersionedObjectService<S, N> {
    /// Creates a service; `name` only labels diagnostics.
    pub fn new(name: impl Into<String>, store: S, numbers: N) -> Self {
        Self {
            name: name.into(),
            store,
            numbers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates the latest row of a new object and returns it as persisted.
    ///
    /// # Contract
    /// - `payload.is_latest` must be `true`, else `BadRequest`.
    /// - `payload.object_number` is replaced by the allocated number.
    /// - Unknown repository counter fails `NotFound`.
    pub fn create(
        &self,
        ctx: &Connection,
        payload: CreatePayload,
        actor: Option<&str>,
    ) -> ServiceResult<VersionedObjectRow> {
        let trace = OperationTrace::enter(
            &self.name,
            "create",
            format_args!(
                "repository_id={} is_latest={} columns={} actor={}",
                payload.repository_id,
                payload.is_latest,
                column_list(&payload.data),
                actor.is_some()
            ),
        );
        match self.create_inner(ctx, payload, actor, &trace) {
            Ok(row) => {
                trace.exit(format_args!("object_number={}", row.key.object_number));
                Ok(row)
            }
            Err(err) => {
                trace.fail(&err);
                Err(err)
            }
        }
    }

    /// Updates data columns of the latest row of an allocated object.
    ///
    /// # Contract
    /// - `key.is_latest` must be `true`, else `BadRequest`.
    /// - `(repository_id, object_number)` must be allocated, else `NotFound`.
    pub fn update(
        &self,
        ctx: &Connection,
        key: &VersionedObjectKey,
        changes: &DataMap,
        actor: Option<&str>,
    ) -> ServiceResult<VersionedObjectRow> {
        let trace = OperationTrace::enter(
            &self.name,
            "update",
            format_args!(
                "repository_id={} object_number={} is_latest={} columns={} actor={}",
                key.repository_id,
                key.object_number,
                key.is_latest,
                column_list(changes),
                actor.is_some()
            ),
        );
        let result = self.verify_mutation_target(ctx, key, &trace).and_then(|()| {
            trace.step("record_store_update");
            Ok(self.store.update(ctx, key, changes, actor)?)
        });
        match result {
            Ok(row) => {
                trace.exit(format_args!("object_number={}", row.key.object_number));
                Ok(row)
            }
            Err(err) => {
                trace.fail(&err);
                Err(err)
            }
        }
    }

    /// Deletes the latest row of an allocated object.
    ///
    /// The allocation row stays, so the number is never handed out again and
    /// a repeated delete fails `NotFound` at the record store.
    pub fn delete(&self, ctx: &Connection, key: &VersionedObjectKey) -> ServiceResult<()> {
        let trace = OperationTrace::enter(
            &self.name,
            "delete",
            format_args!(
                "repository_id={} object_number={} is_latest={}",
                key.repository_id, key.object_number, key.is_latest
            ),
        );
        let result = self.verify_mutation_target(ctx, key, &trace).and_then(|()| {
            trace.step("record_store_delete");
            Ok(self.store.delete(ctx, key)?)
        });
        match result {
            Ok(()) => {
                trace.exit("deleted=true");
                Ok(())
            }
            Err(err) => {
                trace.fail(&err);
                Err(err)
            }
        }
    }

    /// Loads one row by key. Reads accept historical (`is_latest=false`) keys.
    pub fn get(
        &self,
        ctx: &Connection,
        key: &VersionedObjectKey,
    ) -> ServiceResult<Option<VersionedObjectRow>> {
        key.validate()?;
        Ok(self.store.find(ctx, key)?)
    }

    fn create_inner(
        &self,
        ctx: &Connection,
        payload: CreatePayload,
        actor: Option<&str>,
        trace: &OperationTrace<'_>,
    ) -> ServiceResult<VersionedObjectRow> {
        trace.step("check_is_latest");
        check_is_latest(payload.is_latest)?;
        payload.validate()?;

        trace.step("allocate_object_number");
        // Any caller-supplied object_number is ignored.
        let object_number = self.allocate_object_number(ctx, &payload.repository_id)?;
        let key = VersionedObjectKey {
            repository_id: payload.repository_id,
            is_latest: payload.is_latest,
            object_number,
        };

        trace.step("record_store_create");
        Ok(self.store.create(ctx, &key, &payload.data, actor)?)
    }

    /// Latest guard, key shape, then allocation lookup, in that order.
    fn verify_mutation_target(
        &self,
        ctx: &Connection,
        key: &VersionedObjectKey,
        trace: &OperationTrace<'_>,
    ) -> ServiceResult<()> {
        trace.step("check_is_latest");
        check_is_latest(key.is_latest)?;
        key.validate()?;

        trace.step("find_object_number");
        self.verify_object_number(ctx, &key.repository_id, key.object_number)
    }

    fn allocate_object_number(
        &self,
        ctx: &Connection,
        repository_id: &str,
    ) -> ServiceResult<ObjectNumber> {
        let object_number = self.numbers.allocate_next(ctx, repository_id)?;
        self.numbers
            .record_allocation(ctx, repository_id, object_number)?;
        Ok(object_number)
    }

    fn verify_object_number(
        &self,
        ctx: &Connection,
        repository_id: &str,
        object_number: ObjectNumber,
    ) -> ServiceResult<()> {
        match self
            .numbers
            .find_allocation(ctx, repository_id, object_number)?
        {
            Some(_) => Ok(()),
            None => Err(RepoError::AllocationNotFound {
                repository_id: repository_id.to_string(),
                object_number,
            }
            .into()),
        }
    }
}

fn check_is_latest(is_latest: bool) -> ServiceResult<()> {
    if !is_latest {
        return Err(ServiceError::BadRequest(IS_LATEST_REQUIRED.to_string()));
    }
    Ok(())
}
