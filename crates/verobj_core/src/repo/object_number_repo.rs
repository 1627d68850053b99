//! Object number counters and allocation records.
//!
//! # Responsibility
//! - Hand out the next object number of a repository.
//! - Record and look up consumed `(repository_id, object_number)` pairs.
//!
//! # Invariants
//! - `allocate_next` is one atomic fetch-and-increment; a value it returns is
//!   never returned again for the same repository.
//! - Allocation rows are inserted once and never updated or deleted here.
//! - Counter rows are provisioned with the repository, not on demand.

use crate::db::DbError;
use crate::model::key::{validate_repository_id, KeyValidationError, ObjectNumber, FIRST_OBJECT_NUMBER};
use crate::repo::record_store::{RepoError, RepoResult};
use crate::repo::schema_check::ensure_table_ready;
use log::info;
use rusqlite::{params, Connection, OptionalExtension};

/// Counter table, one row per repository.
pub const COUNTER_TABLE: &str = "_next_object_numbers";
/// Allocation table, one row per consumed object number.
pub const ALLOCATION_TABLE: &str = "_object_numbers";

/// One recorded object number allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNumberAllocation {
    pub repository_id: String,
    pub object_number: ObjectNumber,
    /// Epoch milliseconds.
    pub allocated_at: i64,
}

/// Repository interface for object number bookkeeping.
pub trait ObjectNumberRepository {
    /// Consumes and returns the repository's next object number.
    fn allocate_next(&self, ctx: &Connection, repository_id: &str) -> RepoResult<ObjectNumber>;
    /// Records that `object_number` is now in use.
    ///
    /// Fails with `AllocationConflict` when the pair was recorded before.
    fn record_allocation(
        &self,
        ctx: &Connection,
        repository_id: &str,
        object_number: ObjectNumber,
    ) -> RepoResult<()>;
    /// Looks up one allocation by primary key.
    fn find_allocation(
        &self,
        ctx: &Connection,
        repository_id: &str,
        object_number: ObjectNumber,
    ) -> RepoResult<Option<ObjectNumberAllocation>>;
    /// Reads the value `allocate_next` would return, without consuming it.
    fn current_counter(
        &self,
        ctx: &Connection,
        repository_id: &str,
    ) -> RepoResult<Option<ObjectNumber>>;
}

/// SQLite-backed object number repository.
#[derive(Debug, Clone, Copy)]
pub struct SqliteObjectNumberRepository {
    _ready: (),
}

impl SqliteObjectNumberRepository {
    /// Creates a repository after checking `ctx` carries the numbering tables.
    pub fn try_new(ctx: &Connection) -> RepoResult<Self> {
        ensure_table_ready(
            ctx,
            COUNTER_TABLE,
            ["repository_id", "next_object_number"],
        )?;
        ensure_table_ready(
            ctx,
            ALLOCATION_TABLE,
            ["repository_id", "object_number", "allocated_at"],
        )?;
        Ok(Self { _ready: () })
    }
}

impl ObjectNumberRepository for SqliteObjectNumberRepository {
    fn allocate_next(&self, ctx: &Connection, repository_id: &str) -> RepoResult<ObjectNumber> {
        let allocated: Option<ObjectNumber> = ctx
            .prepare_cached(
                "UPDATE _next_object_numbers
                 SET next_object_number = next_object_number + 1
                 WHERE repository_id = ?1
                 RETURNING next_object_number - 1;",
            )?
            .query_row([repository_id], |row| row.get(0))
            .optional()?;

        allocated.ok_or_else(|| RepoError::CounterNotFound(repository_id.to_string()))
    }

    fn record_allocation(
        &self,
        ctx: &Connection,
        repository_id: &str,
        object_number: ObjectNumber,
    ) -> RepoResult<()> {
        let result = ctx
            .prepare_cached(
                "INSERT INTO _object_numbers (repository_id, object_number)
                 VALUES (?1, ?2);",
            )?
            .execute(params![repository_id, object_number]);

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let err = DbError::from(err);
                if err.is_constraint_violation() {
                    return Err(RepoError::AllocationConflict {
                        repository_id: repository_id.to_string(),
                        object_number,
                        source: err,
                    });
                }
                Err(err.into())
            }
        }
    }

    fn find_allocation(
        &self,
        ctx: &Connection,
        repository_id: &str,
        object_number: ObjectNumber,
    ) -> RepoResult<Option<ObjectNumberAllocation>> {
        let allocation = ctx
            .prepare_cached(
                "SELECT repository_id, object_number, allocated_at
                 FROM _object_numbers
                 WHERE repository_id = ?1
                   AND object_number = ?2;",
            )?
            .query_row(params![repository_id, object_number], |row| {
                Ok(ObjectNumberAllocation {
                    repository_id: row.get("repository_id")?,
                    object_number: row.get("object_number")?,
                    allocated_at: row.get("allocated_at")?,
                })
            })
            .optional()?;
        Ok(allocation)
    }

    fn current_counter(
        &self,
        ctx: &Connection,
        repository_id: &str,
    ) -> RepoResult<Option<ObjectNumber>> {
        let next = ctx
            .query_row(
                "SELECT next_object_number
                 FROM _next_object_numbers
                 WHERE repository_id = ?1;",
                [repository_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(next)
    }
}

/// Registers a repository and its counter starting at `first_object_number`.
///
/// Both rows are inserted through `ctx`; run it inside a transaction so a
/// repository never exists without its counter. Re-provisioning an existing
/// repository fails with a constraint violation.
pub fn provision_repository(
    ctx: &Connection,
    repository_id: &str,
    first_object_number: ObjectNumber,
) -> RepoResult<()> {
    validate_repository_id(repository_id)?;
    if first_object_number < FIRST_OBJECT_NUMBER {
        return Err(KeyValidationError::ObjectNumberOutOfRange(first_object_number).into());
    }

    ctx.execute(
        "INSERT INTO repositories (repository_id) VALUES (?1);",
        [repository_id],
    )?;
    ctx.execute(
        "INSERT INTO _next_object_numbers (repository_id, next_object_number)
         VALUES (?1, ?2);",
        params![repository_id, first_object_number],
    )?;

    info!(
        "event=repository_provision module=repo status=ok first_object_number={}",
        first_object_number
    );
    Ok(())
}
