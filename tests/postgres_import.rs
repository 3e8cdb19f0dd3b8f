use gcs_pg_import::config::ImportSettings;
use gcs_pg_import::db::PgDestination;
use gcs_pg_import::models::ImportRequest;
use gcs_pg_import::pipeline::{ImportError, ImportService, ImportState};
use gcs_pg_import::test_support::{MemoryStore, TestDatabase, TestDatabaseError, gzip_bytes};
use std::sync::Arc;
use std::time::Duration;

const CSV: &[u8] = b"a,b\n1,2\n3,4\n5,6\n";

async fn database() -> Option<TestDatabase> {
    match TestDatabase::new().await {
        Ok(db) => Some(db),
        Err(TestDatabaseError::Unavailable(err)) => {
            eprintln!("skipping postgres import test: {err}");
            None
        }
        Err(err) => panic!("failed to start test database: {err}"),
    }
}

async fn create_target(db: &TestDatabase) {
    sqlx::query("CREATE TABLE target (id serial PRIMARY KEY, a integer, b text)")
        .execute(db.pool())
        .await
        .expect("create table");
}

fn service(db: &TestDatabase, store: &MemoryStore) -> ImportService {
    ImportService::new(
        Arc::new(store.clone()),
        Arc::new(PgDestination::new()),
        ImportSettings {
            database: db.database_settings(),
            copy_frame_bytes: 16,
            timeout: Duration::from_secs(60),
        },
    )
}

fn request(db: &TestDatabase, path: &str) -> ImportRequest {
    let mut request = ImportRequest::new(
        "target",
        "bucket",
        path,
        db.instance_connection_name(),
        vec!["a".to_string(), "b".to_string()],
    );
    request.chunk_size = 2;
    request.skip_header = true;
    request
}

async fn target_rows(db: &TestDatabase) -> Vec<(i32, Option<String>)> {
    sqlx::query_as("SELECT a, b FROM target ORDER BY id")
        .fetch_all(db.pool())
        .await
        .expect("select rows")
}

#[tokio::test]
async fn loads_rows_in_order_and_appends_on_repeat() {
    let Some(db) = database().await else { return };
    create_target(&db).await;

    let store = MemoryStore::new().with_chunk_size(5);
    store.insert("bucket", "rows.csv.gz", gzip_bytes(CSV));
    let service = service(&db, &store);

    let first = service
        .run(&request(&db, "rows.csv.gz"))
        .await
        .expect("first import");
    assert_eq!(first.rows_loaded, 3);
    assert_eq!(first.batches, 2);

    let expected = vec![
        (1, Some("2".to_string())),
        (3, Some("4".to_string())),
        (5, Some("6".to_string())),
    ];
    assert_eq!(target_rows(&db).await, expected);

    service
        .run(&request(&db, "rows.csv.gz"))
        .await
        .expect("second import");
    let rows = target_rows(&db).await;
    assert_eq!(rows.len(), 6);
    assert_eq!(rows[..3], rows[3..]);

    db.close().await;
}

#[tokio::test]
async fn corrupt_object_leaves_table_untouched() {
    let Some(db) = database().await else { return };
    create_target(&db).await;
    sqlx::query("INSERT INTO target (a, b) VALUES (0, 'seed')")
        .execute(db.pool())
        .await
        .expect("seed row");

    let store = MemoryStore::new();
    let mut broken = gzip_bytes(CSV);
    broken.truncate(broken.len() / 2);
    store.insert("bucket", "broken.csv.gz", broken);

    let failure = service(&db, &store)
        .run(&request(&db, "broken.csv.gz"))
        .await
        .unwrap_err();

    assert!(matches!(failure.error, ImportError::StorageAccess(_)));
    assert_eq!(failure.state, ImportState::Streaming);
    assert_eq!(target_rows(&db).await, vec![(0, Some("seed".to_string()))]);

    db.close().await;
}

#[tokio::test]
async fn missing_table_fails_before_reading_the_object() {
    let Some(db) = database().await else { return };

    let store = MemoryStore::new();
    store.insert("bucket", "rows.csv.gz", gzip_bytes(CSV));

    let failure = service(&db, &store)
        .run(&request(&db, "rows.csv.gz"))
        .await
        .unwrap_err();

    assert!(matches!(failure.error, ImportError::TableNotFound(_)));
    assert_eq!(failure.state, ImportState::Validating);
    assert_eq!(store.opens(), 0);

    db.close().await;
}

#[tokio::test]
async fn rejected_rows_roll_back_the_import() {
    let Some(db) = database().await else { return };
    create_target(&db).await;

    let store = MemoryStore::new();
    store.insert(
        "bucket",
        "bad.csv.gz",
        gzip_bytes(b"a,b\n1,x\n2,y\nnot-a-number,z\n"),
    );

    let failure = service(&db, &store)
        .run(&request(&db, "bad.csv.gz"))
        .await
        .unwrap_err();

    assert!(matches!(failure.error, ImportError::Load(_)));
    assert_eq!(failure.rows_committed, 0);
    assert!(target_rows(&db).await.is_empty());

    db.close().await;
}
