use rusqlite::Connection;
use serde_json::json;
use std::cell::Cell;
use verobj_core::{
    open_db_in_memory, provision_repository, run_in_transaction, sqlite_object_service,
    CreatePayload, DataMap, ErrorKind, ObjectNumber, ObjectNumberAllocation,
    ObjectNumberRepository, RecordStore, RepoError, RepoResult, ServiceError,
    SqliteObjectNumberRepository, SqliteRecordStore, VersionedObjectKey, VersionedObjectService,
    IS_LATEST_REQUIRED, OBJECTS_TABLE,
};

const REPO: &str = "R1";

fn setup(first_object_number: ObjectNumber) -> Connection {
    let conn = open_db_in_memory().unwrap();
    provision_repository(&conn, REPO, first_object_number).unwrap();
    conn
}

fn data(value: serde_json::Value) -> DataMap {
    value.as_object().unwrap().clone()
}

fn counter(conn: &Connection) -> ObjectNumber {
    let numbers = SqliteObjectNumberRepository::try_new(conn).unwrap();
    numbers.current_counter(conn, REPO).unwrap().unwrap()
}

fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}

/// Wraps the SQLite numbering repository and counts lookups/writes.
struct CountingNumbers {
    inner: SqliteObjectNumberRepository,
    calls: Cell<u32>,
}

impl CountingNumbers {
    fn new(conn: &Connection) -> Self {
        Self {
            inner: SqliteObjectNumberRepository::try_new(conn).unwrap(),
            calls: Cell::new(0),
        }
    }

    fn touch(&self) {
        self.calls.set(self.calls.get() + 1);
    }
}

impl ObjectNumberRepository for &CountingNumbers {
    fn allocate_next(&self, ctx: &Connection, repository_id: &str) -> RepoResult<ObjectNumber> {
        self.touch();
        self.inner.allocate_next(ctx, repository_id)
    }

    fn record_allocation(
        &self,
        ctx: &Connection,
        repository_id: &str,
        object_number: ObjectNumber,
    ) -> RepoResult<()> {
        self.touch();
        self.inner.record_allocation(ctx, repository_id, object_number)
    }

    fn find_allocation(
        &self,
        ctx: &Connection,
        repository_id: &str,
        object_number: ObjectNumber,
    ) -> RepoResult<Option<ObjectNumberAllocation>> {
        self.touch();
        self.inner.find_allocation(ctx, repository_id, object_number)
    }

    fn current_counter(
        &self,
        ctx: &Connection,
        repository_id: &str,
    ) -> RepoResult<Option<ObjectNumber>> {
        self.touch();
        self.inner.current_counter(ctx, repository_id)
    }
}

#[test]
fn create_assigns_counter_value_and_records_allocation() {
    let conn = setup(5);
    let service = sqlite_object_service(&conn).unwrap();

    let row = service
        .create(
            &conn,
            CreatePayload::new(REPO, data(json!({ "name": "first" }))),
            Some("alice"),
        )
        .unwrap();

    assert_eq!(row.key, VersionedObjectKey::latest(REPO, 5));
    assert_eq!(row.data["name"], "first");
    assert_eq!(row.system.created_by.as_deref(), Some("alice"));

    let numbers = SqliteObjectNumberRepository::try_new(&conn).unwrap();
    let allocation = numbers.find_allocation(&conn, REPO, 5).unwrap().unwrap();
    assert_eq!(allocation.object_number, 5);
    assert_eq!(counter(&conn), 6);
}

#[test]
fn consecutive_creates_receive_strictly_increasing_numbers() {
    let conn = setup(1);
    let service = sqlite_object_service(&conn).unwrap();

    let numbers: Vec<ObjectNumber> = (0..4)
        .map(|index| {
            service
                .create(
                    &conn,
                    CreatePayload::new(REPO, data(json!({ "name": format!("obj-{index}") }))),
                    None,
                )
                .unwrap()
                .key
                .object_number
        })
        .collect();

    assert_eq!(numbers, vec![1, 2, 3, 4]);
    assert_eq!(count_rows(&conn, "_object_numbers"), 4);
}

#[test]
fn create_with_is_latest_false_fails_without_side_effects() {
    let conn = setup(5);
    let numbers = CountingNumbers::new(&conn);
    let store = SqliteRecordStore::try_new(&conn, OBJECTS_TABLE).unwrap();
    let service = VersionedObjectService::new("objects", store, &numbers);

    let mut payload = CreatePayload::new(REPO, data(json!({ "name": "historic" })));
    payload.is_latest = false;
    let err = service.create(&conn, payload, None).unwrap_err();

    assert!(matches!(&err, ServiceError::BadRequest(message) if message == IS_LATEST_REQUIRED));
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert_eq!(numbers.calls.get(), 0);
    assert_eq!(counter(&conn), 5);
    assert_eq!(count_rows(&conn, "_object_numbers"), 0);
    assert_eq!(count_rows(&conn, "objects"), 0);
}

#[test]
fn create_ignores_caller_supplied_object_number() {
    let conn = setup(5);
    let service = sqlite_object_service(&conn).unwrap();

    let mut payload = CreatePayload::new(REPO, DataMap::new());
    payload.object_number = Some(42);
    let row = service.create(&conn, payload, None).unwrap();

    assert_eq!(row.key.object_number, 5);
}

#[test]
fn create_for_unknown_repository_is_not_found() {
    let conn = setup(1);
    let service = sqlite_object_service(&conn).unwrap();

    let err = service
        .create(&conn, CreatePayload::new("missing", DataMap::new()), None)
        .unwrap_err();

    assert!(matches!(
        err,
        ServiceError::Repo(RepoError::CounterNotFound(ref id)) if id == "missing"
    ));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn create_with_blank_repository_is_bad_request() {
    let conn = setup(1);
    let service = sqlite_object_service(&conn).unwrap();

    let err = service
        .create(&conn, CreatePayload::new("  ", DataMap::new()), None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
}

#[test]
fn failed_row_write_rolls_back_allocation_inside_transaction() {
    let mut conn = setup(5);
    let service = sqlite_object_service(&conn).unwrap();

    let err = run_in_transaction(&mut conn, |tx| {
        service.create(
            tx,
            CreatePayload::new(REPO, data(json!({ "not_a_column": 1 }))),
            None,
        )
    })
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert_eq!(counter(&conn), 5);
    assert_eq!(count_rows(&conn, "_object_numbers"), 0);
    assert_eq!(count_rows(&conn, "objects"), 0);
}

#[test]
fn existing_allocation_surfaces_as_retryable_conflict() {
    let mut conn = setup(5);
    conn.execute(
        "INSERT INTO _object_numbers (repository_id, object_number) VALUES (?1, 5);",
        [REPO],
    )
    .unwrap();
    let service = sqlite_object_service(&conn).unwrap();

    let err = run_in_transaction(&mut conn, |tx| {
        service.create(tx, CreatePayload::new(REPO, DataMap::new()), None)
    })
    .unwrap_err();

    assert!(err.is_allocation_conflict());
    assert_eq!(err.kind(), ErrorKind::Persistence);
    assert_eq!(counter(&conn), 5);

    // The caller retries; the counter moves past the stale number.
    conn.execute(
        "UPDATE _next_object_numbers SET next_object_number = 6 WHERE repository_id = ?1;",
        [REPO],
    )
    .unwrap();
    let row = run_in_transaction(&mut conn, |tx| {
        service.create(tx, CreatePayload::new(REPO, DataMap::new()), None)
    })
    .unwrap();
    assert_eq!(row.key.object_number, 6);
}

#[test]
fn update_allocated_object_returns_updated_row() {
    let conn = setup(5);
    let service = sqlite_object_service(&conn).unwrap();
    service
        .create(
            &conn,
            CreatePayload::new(REPO, data(json!({ "name": "draft" }))),
            Some("alice"),
        )
        .unwrap();

    let key = VersionedObjectKey::latest(REPO, 5);
    let row = service
        .update(
            &conn,
            &key,
            &data(json!({ "name": "final", "description": "done" })),
            Some("bob"),
        )
        .unwrap();

    assert_eq!(row.key, key);
    assert_eq!(row.data["name"], "final");
    assert_eq!(row.data["description"], "done");
    assert_eq!(row.system.created_by.as_deref(), Some("alice"));
    assert_eq!(row.system.updated_by.as_deref(), Some("bob"));
}

#[test]
fn update_unallocated_object_is_not_found_and_mutates_nothing() {
    let conn = setup(5);
    let service = sqlite_object_service(&conn).unwrap();
    service
        .create(
            &conn,
            CreatePayload::new(REPO, data(json!({ "name": "keep" }))),
            None,
        )
        .unwrap();

    let err = service
        .update(
            &conn,
            &VersionedObjectKey::latest(REPO, 99),
            &data(json!({ "name": "changed" })),
            None,
        )
        .unwrap_err();

    assert!(matches!(
        err,
        ServiceError::Repo(RepoError::AllocationNotFound {
            object_number: 99,
            ..
        })
    ));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let kept = service
        .get(&conn, &VersionedObjectKey::latest(REPO, 5))
        .unwrap()
        .unwrap();
    assert_eq!(kept.data["name"], "keep");
}

#[test]
fn update_with_is_latest_false_is_bad_request() {
    let conn = setup(5);
    let service = sqlite_object_service(&conn).unwrap();
    service
        .create(&conn, CreatePayload::new(REPO, DataMap::new()), None)
        .unwrap();

    let mut key = VersionedObjectKey::latest(REPO, 5);
    key.is_latest = false;
    let err = service
        .update(&conn, &key, &data(json!({ "name": "x" })), None)
        .unwrap_err();

    assert_eq!(err.to_string(), IS_LATEST_REQUIRED);
    assert_eq!(err.kind(), ErrorKind::BadRequest);
}

#[test]
fn delete_with_is_latest_false_fails_before_any_lookup() {
    let conn = setup(5);
    let numbers = CountingNumbers::new(&conn);
    let store = SqliteRecordStore::try_new(&conn, OBJECTS_TABLE).unwrap();
    let service = VersionedObjectService::new("objects", store, &numbers);

    let key = VersionedObjectKey {
        repository_id: REPO.to_string(),
        is_latest: false,
        object_number: 5,
    };
    let err = service.delete(&conn, &key).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert_eq!(err.to_string(), IS_LATEST_REQUIRED);
    assert_eq!(numbers.calls.get(), 0);
}

#[test]
fn delete_twice_fails_not_found_the_second_time() {
    let conn = setup(5);
    let service = sqlite_object_service(&conn).unwrap();
    service
        .create(&conn, CreatePayload::new(REPO, DataMap::new()), None)
        .unwrap();
    let key = VersionedObjectKey::latest(REPO, 5);

    service.delete(&conn, &key).unwrap();
    assert!(service.get(&conn, &key).unwrap().is_none());

    let err = service.delete(&conn, &key).unwrap_err();
    assert!(matches!(err, ServiceError::Repo(RepoError::RowNotFound(_))));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // The number stays consumed.
    let next = service
        .create(&conn, CreatePayload::new(REPO, DataMap::new()), None)
        .unwrap();
    assert_eq!(next.key.object_number, 6);
}

#[test]
fn delete_unallocated_object_is_not_found() {
    let conn = setup(5);
    let service = sqlite_object_service(&conn).unwrap();

    let err = service
        .delete(&conn, &VersionedObjectKey::latest(REPO, 5))
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Repo(RepoError::AllocationNotFound { .. })
    ));
}

#[test]
fn mutation_with_zero_object_number_is_bad_request() {
    let conn = setup(1);
    let service = sqlite_object_service(&conn).unwrap();

    let err = service
        .delete(&conn, &VersionedObjectKey::latest(REPO, 0))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
}

#[test]
fn get_reads_historical_rows() {
    let conn = setup(1);
    let service = sqlite_object_service(&conn).unwrap();
    service
        .create(
            &conn,
            CreatePayload::new(REPO, data(json!({ "name": "v2" }))),
            None,
        )
        .unwrap();
    conn.execute(
        "INSERT INTO objects (repository_id, is_latest, object_number, name)
         VALUES (?1, 0, 1, 'v1');",
        [REPO],
    )
    .unwrap();

    let historical = VersionedObjectKey {
        repository_id: REPO.to_string(),
        is_latest: false,
        object_number: 1,
    };
    let row = service.get(&conn, &historical).unwrap().unwrap();
    assert_eq!(row.data["name"], "v1");
    assert!(!row.key.is_latest);

    let store = SqliteRecordStore::try_new(&conn, OBJECTS_TABLE).unwrap();
    let latest = store
        .find(&conn, &VersionedObjectKey::latest(REPO, 1))
        .unwrap()
        .unwrap();
    assert_eq!(latest.data["name"], "v2");
}
