use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use gcs_pg_import::db::TableRef;
use gcs_pg_import::models::ImportResult;
use gcs_pg_import::pipeline::ImportService;
use gcs_pg_import::request_logger::{REQUEST_ID_HEADER, RequestLogger};
use gcs_pg_import::service_routes;
use gcs_pg_import::test_support::{
    MemoryDestination, MemoryStore, TestRocketBuilder, gzip_bytes, memory_settings,
};
use rocket::http::{ContentType, Status};
use rocket::local::blocking::Client;
use serde_json::{Value, json};
use std::sync::Arc;

struct Fixture {
    client: Client,
    destination: MemoryDestination,
    store: MemoryStore,
}

fn fixture() -> Fixture {
    let store = MemoryStore::new().with_chunk_size(7);
    store.insert("bucket", "data/rows.csv.gz", gzip_bytes(b"a,b\n1,2\n3,4\n5,6\n"));

    let destination = MemoryDestination::new();
    destination.create_table(TableRef::new("public", "target"), &["a", "b"]);

    let service = ImportService::new(
        Arc::new(store.clone()),
        Arc::new(destination.clone()),
        memory_settings(),
    );

    let client = TestRocketBuilder::new()
        .mount_routes(service_routes())
        .manage_service(service)
        .blocking_client();

    Fixture {
        client,
        destination,
        store,
    }
}

fn request_body(table: &str, chunk_size: i64) -> Value {
    json!({
        "table_name": table,
        "bucket_name": "bucket",
        "file_path": "data/rows.csv.gz",
        "instance_connection_name": "project:region:instance",
        "columns": ["a", "b"],
        "chunk_size": chunk_size,
        "skip_header": true,
    })
}

fn post_import(client: &Client, body: &Value) -> (Status, Value) {
    let response = client
        .post("/import_async")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    let status = response.status();
    let payload = response.into_json().expect("JSON body");
    (status, payload)
}

#[test]
fn import_reports_rows_and_batches() {
    let fx = fixture();

    let (status, payload) = post_import(&fx.client, &request_body("target", 2));
    assert_eq!(status, Status::Ok);

    let result: ImportResult = serde_json::from_value(payload).expect("import result");
    assert!(result.success);
    assert_eq!(result.rows_loaded, 3);
    assert_eq!(result.batches, 2);
    assert_eq!(result.gcs_uri, "bucket/data/rows.csv.gz");
    assert_eq!(result.schema_table, "public.target");
    assert_eq!(fx.destination.rows(&TableRef::new("public", "target")).len(), 3);
}

#[test]
fn zero_chunk_size_is_a_bad_request() {
    let fx = fixture();

    let (status, payload) = post_import(&fx.client, &request_body("target", 0));
    assert_eq!(status, Status::BadRequest);
    assert_eq!(payload["error"], "ConfigurationError");
    assert_eq!(payload["state"], "pending");
    assert_eq!(payload["rowsCommitted"], 0);
    assert_eq!(fx.destination.connects(), 0);
}

#[test]
fn missing_table_is_not_found() {
    let fx = fixture();

    let (status, payload) = post_import(&fx.client, &request_body("absent", 2));
    assert_eq!(status, Status::NotFound);
    assert_eq!(payload["error"], "TableNotFoundError");
    assert_eq!(fx.store.opens(), 0);
}

#[test]
fn missing_object_is_a_storage_error() {
    let fx = fixture();
    let mut body = request_body("target", 2);
    body["file_path"] = json!("data/missing.csv.gz");

    let (status, payload) = post_import(&fx.client, &body);
    assert_eq!(status, Status::BadRequest);
    assert_eq!(payload["error"], "StorageAccessError");
    assert_eq!(payload["state"], "streaming");
}

#[test]
fn refused_connection_is_a_server_error() {
    let fx = fixture();
    fx.destination.refuse_connections();

    let (status, payload) = post_import(&fx.client, &request_body("target", 2));
    assert_eq!(status, Status::InternalServerError);
    assert_eq!(payload["error"], "ConnectionError");
}

#[test]
fn malformed_body_is_a_bad_request() {
    let fx = fixture();

    let response = fx
        .client
        .post("/import_async")
        .header(ContentType::JSON)
        .body(r#"{"table_name": "target"}"#)
        .dispatch();

    assert_eq!(response.status(), Status::BadRequest);
    let payload: Value = response.into_json().expect("JSON body");
    assert_eq!(payload["error"], "BadRequest");
}

#[test]
fn pubsub_push_runs_embedded_request() {
    let fx = fixture();
    let data = STANDARD.encode(request_body("target", 10).to_string());
    let envelope = json!({
        "message": { "data": data, "messageId": "1" },
        "subscription": "projects/p/subscriptions/imports",
    });

    let response = fx
        .client
        .post("/pubsub/push")
        .header(ContentType::JSON)
        .body(envelope.to_string())
        .dispatch();

    assert_eq!(response.status(), Status::Ok);
    let result: ImportResult = response.into_json().expect("import result");
    assert_eq!(result.rows_loaded, 3);
    assert_eq!(result.batches, 1);
}

#[test]
fn pubsub_push_rejects_undecodable_data() {
    let fx = fixture();
    let envelope = json!({
        "message": { "data": "not base64!", "messageId": "1" },
        "subscription": "projects/p/subscriptions/imports",
    });

    let response = fx
        .client
        .post("/pubsub/push")
        .header(ContentType::JSON)
        .body(envelope.to_string())
        .dispatch();

    assert_eq!(response.status(), Status::BadRequest);
    assert_eq!(fx.store.opens(), 0);
}

#[test]
fn responses_carry_a_request_id() {
    let rocket = TestRocketBuilder::new()
        .mount_routes(service_routes())
        .manage_service(ImportService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryDestination::new()),
            memory_settings(),
        ))
        .build()
        .attach(RequestLogger);
    let client = Client::tracked(rocket).expect("valid Rocket instance");

    let response = client.get("/health").dispatch();
    let id = response
        .headers()
        .get_one(REQUEST_ID_HEADER)
        .expect("request id header");
    assert_eq!(id.len(), 36);
}
