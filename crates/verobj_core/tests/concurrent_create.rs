use serde_json::json;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::thread;
use verobj_core::{
    open_db, provision_repository, run_in_transaction, sqlite_object_service, CreatePayload,
    ObjectNumber, ServiceError,
};

const WORKERS: usize = 4;
const CREATES_PER_WORKER: usize = 10;

fn spawn_creators(path: PathBuf, repository_id: &'static str) -> Vec<ObjectNumber> {
    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut conn = open_db(&path).unwrap();
                let service = sqlite_object_service(&conn).unwrap();
                barrier.wait();

                let mut numbers = Vec::with_capacity(CREATES_PER_WORKER);
                for index in 0..CREATES_PER_WORKER {
                    let payload = CreatePayload::new(
                        repository_id,
                        json!({ "name": format!("w{worker}-{index}") })
                            .as_object()
                            .unwrap()
                            .clone(),
                    );
                    let row = run_in_transaction(&mut conn, |tx| {
                        service.create(tx, payload, Some("worker"))
                    })
                    .unwrap();
                    numbers.push(row.key.object_number);
                }
                numbers
            })
        })
        .collect();

    handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect()
}

#[test]
fn concurrent_creates_on_one_repository_get_distinct_numbers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("objects.db");
    {
        let mut conn = open_db(&path).unwrap();
        run_in_transaction(&mut conn, |tx| -> Result<(), ServiceError> {
            Ok(provision_repository(tx, "shared", 1)?)
        })
        .unwrap();
    }

    let numbers = spawn_creators(path.clone(), "shared");

    let unique: BTreeSet<_> = numbers.iter().copied().collect();
    let total = (WORKERS * CREATES_PER_WORKER) as ObjectNumber;
    assert_eq!(unique.len(), numbers.len(), "duplicate object number allocated");
    assert_eq!(unique, (1..=total).collect::<BTreeSet<_>>());

    let conn = open_db(&path).unwrap();
    let allocations: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM _object_numbers WHERE repository_id = 'shared';",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(allocations, total);
}

#[test]
fn repositories_are_numbered_independently() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("objects.db");
    {
        let mut conn = open_db(&path).unwrap();
        run_in_transaction(&mut conn, |tx| -> Result<(), ServiceError> {
            provision_repository(tx, "left", 1)?;
            provision_repository(tx, "right", 1)?;
            Ok(())
        })
        .unwrap();
    }

    let left = thread::spawn({
        let path = path.clone();
        move || spawn_creators(path, "left")
    });
    let right = spawn_creators(path, "right");
    let left = left.join().unwrap();

    let total = (WORKERS * CREATES_PER_WORKER) as ObjectNumber;
    let expected: BTreeSet<_> = (1..=total).collect();
    assert_eq!(left.into_iter().collect::<BTreeSet<_>>(), expected);
    assert_eq!(right.into_iter().collect::<BTreeSet<_>>(), expected);
}
