//! Core logic for repository-scoped versioned objects.
//! This crate is the single source of truth for object numbering and the
//! latest-row mutation rule.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, CoreConfig};
pub use db::{open_db, open_db_in_memory, run_in_transaction, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status, LogTarget};
pub use model::key::{ObjectNumber, RepositoryId, VersionedObjectKey, FIRST_OBJECT_NUMBER};
pub use model::row::{CreatePayload, DataMap, SystemColumns, VersionedObjectRow};
pub use repo::object_number_repo::{
    provision_repository, ObjectNumberAllocation, ObjectNumberRepository,
    SqliteObjectNumberRepository,
};
pub use repo::record_store::{
    RecordStore, RepoError, RepoResult, SqliteRecordStore, TableSchema, OBJECTS_TABLE,
};
pub use service::object_service::{
    ErrorKind, ServiceError, ServiceResult, VersionedObjectService, IS_LATEST_REQUIRED,
};

/// SQLite-backed service over the built-in `objects` table.
pub type SqliteObjectService = VersionedObjectService<SqliteRecordStore, SqliteObjectNumberRepository>;

/// Builds a `SqliteObjectService` after checking `ctx` is fully migrated.
pub fn sqlite_object_service(ctx: &rusqlite::Connection) -> RepoResult<SqliteObjectService> {
    Ok(VersionedObjectService::new(
        "objects",
        SqliteRecordStore::try_new(ctx, OBJECTS_TABLE)?,
        SqliteObjectNumberRepository::try_new(ctx)?,
    ))
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
