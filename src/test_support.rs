//! Fakes and fixtures shared by unit and integration tests.

use crate::config::{DatabaseSettings, ImportSettings};
use crate::db::{ConnectTarget, CopyCommand, Credentials, Destination, LoadSession, TableRef};
use crate::pipeline::ImportService;
use crate::storage::{ByteSource, ObjectStore, StorageError};
use flate2::Compression;
use flate2::write::GzEncoder;
use rocket::config::LogLevel;
use rocket::figment::Figment;
use rocket::local::asynchronous::Client as AsyncClient;
use rocket::local::blocking::Client;
use rocket::{Build, Rocket, Route};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use database::{TestDatabase, TestDatabaseError};

/// Gzip-compress a payload in one member.
pub fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("in-memory gzip write");
    encoder.finish().expect("in-memory gzip finish")
}

pub fn test_credentials() -> Credentials {
    Credentials {
        user: "loader".to_string(),
        password: "secret".to_string(),
        database: "warehouse".to_string(),
    }
}

/// Settings with credentials present and small COPY frames.
pub fn memory_settings() -> ImportSettings {
    let credentials = test_credentials();
    ImportSettings {
        database: DatabaseSettings {
            user: Some(credentials.user),
            password: Some(credentials.password),
            database: Some(credentials.database),
            socket_dir: PathBuf::from("/cloudsql"),
        },
        copy_frame_bytes: 64,
        timeout: Duration::from_secs(30),
    }
}

// ===== Storage =====

/// In-memory byte stream handing out fixed-size chunks.
pub struct MemorySource {
    data: Vec<u8>,
    pos: usize,
    chunk_size: usize,
}

impl MemorySource {
    pub fn new(data: Vec<u8>, chunk_size: usize) -> Self {
        Self {
            data,
            pos: 0,
            chunk_size: chunk_size.max(1),
        }
    }
}

#[rocket::async_trait]
impl ByteSource for MemorySource {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StorageError> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let end = (self.pos + self.chunk_size).min(self.data.len());
        let chunk = self.data[self.pos..end].to_vec();
        self.pos = end;
        Ok(Some(chunk))
    }
}

/// Object store backed by a map, counting how often objects are opened.
#[derive(Clone)]
pub struct MemoryStore {
    objects: Arc<Mutex<HashMap<(String, String), Vec<u8>>>>,
    opens: Arc<AtomicUsize>,
    chunk_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(Mutex::new(HashMap::new())),
            opens: Arc::new(AtomicUsize::new(0)),
            chunk_size: 8 * 1024,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn insert(&self, bucket: &str, path: &str, data: Vec<u8>) {
        self.objects
            .lock()
            .expect("memory store lock")
            .insert((bucket.to_string(), path.to_string()), data);
    }

    /// Successful and failed `open` calls so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[rocket::async_trait]
impl ObjectStore for MemoryStore {
    async fn open(&self, bucket: &str, path: &str) -> Result<Box<dyn ByteSource>, StorageError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let data = self
            .objects
            .lock()
            .expect("memory store lock")
            .get(&(bucket.to_string(), path.to_string()))
            .cloned();

        match data {
            Some(data) => Ok(Box::new(MemorySource::new(data, self.chunk_size))),
            None => Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                path: path.to_string(),
            }),
        }
    }
}

// ===== Database =====

type StoredRow = Vec<Option<String>>;

struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<StoredRow>,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<TableRef, MemoryTable>,
    unreadable: HashSet<TableRef>,
    refuse_connections: bool,
    fail_on_copy: Option<usize>,
    copies: usize,
    connects: usize,
    closes: usize,
    events: Vec<String>,
}

/// Destination keeping tables in memory with PostgreSQL-like transaction
/// behavior: rows copied inside a transaction appear only on commit.
#[derive(Clone, Default)]
pub struct MemoryDestination {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        f(&mut self.state.lock().expect("memory destination lock"))
    }

    pub fn create_table(&self, table: TableRef, columns: &[&str]) {
        self.with_state(|state| {
            state.tables.insert(
                table,
                MemoryTable {
                    columns: columns.iter().map(|c| c.to_string()).collect(),
                    rows: Vec::new(),
                },
            );
        });
    }

    /// Make the zero-row probe of `table` fail.
    pub fn deny_reads(&self, table: TableRef) {
        self.with_state(|state| {
            state.unreadable.insert(table);
        });
    }

    pub fn refuse_connections(&self) {
        self.with_state(|state| state.refuse_connections = true);
    }

    /// Reject the `n`th COPY (1-based, counted across sessions).
    pub fn fail_on_copy(&self, n: usize) {
        self.with_state(|state| state.fail_on_copy = Some(n));
    }

    /// Committed rows of `table` in insertion order.
    pub fn rows(&self, table: &TableRef) -> Vec<StoredRow> {
        self.with_state(|state| {
            state
                .tables
                .get(table)
                .map(|t| t.rows.clone())
                .unwrap_or_default()
        })
    }

    pub fn connects(&self) -> usize {
        self.with_state(|state| state.connects)
    }

    /// Sessions released, by `close` or by being dropped.
    pub fn closes(&self) -> usize {
        self.with_state(|state| state.closes)
    }

    pub fn events(&self) -> Vec<String> {
        self.with_state(|state| state.events.clone())
    }
}

#[rocket::async_trait]
impl Destination for MemoryDestination {
    async fn connect(
        &self,
        _target: &ConnectTarget,
        _credentials: &Credentials,
    ) -> Result<Box<dyn LoadSession>, sqlx::Error> {
        self.with_state(|state| -> Result<(), sqlx::Error> {
            state.connects += 1;
            if state.refuse_connections {
                return Err(sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )));
            }
            state.events.push("connect".to_string());
            Ok(())
        })?;

        Ok(Box::new(MemorySession {
            state: Arc::clone(&self.state),
            in_transaction: false,
            pending: Vec::new(),
            released: false,
        }))
    }
}

struct MemorySession {
    state: Arc<Mutex<MemoryState>>,
    in_transaction: bool,
    pending: Vec<(TableRef, StoredRow)>,
    released: bool,
}

impl MemorySession {
    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        f(&mut self.state.lock().expect("memory destination lock"))
    }

    fn release(&mut self, event: &str) {
        if self.released {
            return;
        }
        self.released = true;
        self.pending.clear();
        self.with_state(|state| {
            state.closes += 1;
            state.events.push(event.to_string());
        });
    }
}

fn protocol_error(message: impl Into<String>) -> sqlx::Error {
    sqlx::Error::Protocol(message.into())
}

/// Inverse of the COPY text encoding: tab separated, `\N` is NULL.
fn decode_copy_rows(frames: &[Vec<u8>]) -> Result<Vec<StoredRow>, sqlx::Error> {
    let data: Vec<u8> = frames.concat();
    let text = String::from_utf8(data).map_err(|_| protocol_error("invalid UTF-8 in COPY data"))?;

    text.split_terminator('\n')
        .map(|line| {
            line.split('\t')
                .map(|field| {
                    if field == "\\N" {
                        return Ok(None);
                    }
                    let mut value = String::with_capacity(field.len());
                    let mut chars = field.chars();
                    while let Some(c) = chars.next() {
                        if c != '\\' {
                            value.push(c);
                            continue;
                        }
                        match chars.next() {
                            Some('\\') => value.push('\\'),
                            Some('t') => value.push('\t'),
                            Some('n') => value.push('\n'),
                            Some('r') => value.push('\r'),
                            other => {
                                return Err(protocol_error(format!(
                                    "unsupported escape \\{}",
                                    other.map(String::from).unwrap_or_default()
                                )));
                            }
                        }
                    }
                    Ok(Some(value))
                })
                .collect()
        })
        .collect()
}

#[rocket::async_trait]
impl LoadSession for MemorySession {
    async fn table_columns(&mut self, table: &TableRef) -> Result<Vec<String>, sqlx::Error> {
        Ok(self.with_state(|state| {
            state
                .tables
                .get(table)
                .map(|t| t.columns.clone())
                .unwrap_or_default()
        }))
    }

    async fn probe_table(&mut self, table: &TableRef) -> Result<(), sqlx::Error> {
        self.with_state(|state| {
            if state.unreadable.contains(table) {
                return Err(protocol_error(format!("permission denied for table {}", table.table)));
            }
            if !state.tables.contains_key(table) {
                return Err(protocol_error(format!("relation \"{table}\" does not exist")));
            }
            Ok(())
        })
    }

    async fn begin(&mut self) -> Result<(), sqlx::Error> {
        self.in_transaction = true;
        self.with_state(|state| state.events.push("begin".to_string()));
        Ok(())
    }

    async fn copy_in(&mut self, copy: &CopyCommand, frames: Vec<Vec<u8>>) -> Result<u64, sqlx::Error> {
        let decoded = decode_copy_rows(&frames)?;

        let rows = self.with_state(|state| -> Result<Vec<StoredRow>, sqlx::Error> {
            state.copies += 1;
            if state.fail_on_copy == Some(state.copies) {
                return Err(protocol_error("injected COPY failure"));
            }

            let table = state
                .tables
                .get(&copy.table)
                .ok_or_else(|| protocol_error(format!("relation \"{}\" does not exist", copy.table)))?;

            let positions = copy
                .columns
                .iter()
                .map(|column| {
                    table
                        .columns
                        .iter()
                        .position(|c| c == column)
                        .ok_or_else(|| protocol_error(format!("column \"{column}\" does not exist")))
                })
                .collect::<Result<Vec<_>, _>>()?;

            let mut rows = Vec::with_capacity(decoded.len());
            for (line, fields) in decoded.into_iter().enumerate() {
                if fields.len() > positions.len() {
                    return Err(protocol_error(format!(
                        "extra data after last expected column (line {})",
                        line + 1
                    )));
                }
                if fields.len() < positions.len() {
                    return Err(protocol_error(format!(
                        "missing data for column \"{}\" (line {})",
                        copy.columns[fields.len()],
                        line + 1
                    )));
                }
                let mut row = vec![None; table.columns.len()];
                for (value, &position) in fields.into_iter().zip(&positions) {
                    row[position] = value;
                }
                rows.push(row);
            }

            state.events.push(format!("copy {}", rows.len()));
            Ok(rows)
        })?;

        let count = rows.len() as u64;
        if self.in_transaction {
            self.pending
                .extend(rows.into_iter().map(|row| (copy.table.clone(), row)));
        } else {
            self.with_state(|state| {
                if let Some(table) = state.tables.get_mut(&copy.table) {
                    table.rows.extend(rows);
                }
            });
        }
        Ok(count)
    }

    async fn commit(&mut self) -> Result<(), sqlx::Error> {
        let pending = std::mem::take(&mut self.pending);
        self.in_transaction = false;
        self.with_state(|state| {
            for (table, row) in pending {
                if let Some(table) = state.tables.get_mut(&table) {
                    table.rows.push(row);
                }
            }
            state.events.push("commit".to_string());
        });
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), sqlx::Error> {
        self.pending.clear();
        self.in_transaction = false;
        self.with_state(|state| state.events.push("rollback".to_string()));
        Ok(())
    }

    async fn close(mut self: Box<Self>) -> Result<(), sqlx::Error> {
        self.release("close");
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.release("drop");
    }
}

// ===== Rocket =====

/// Builder for constructing Rocket instances tailored for integration tests.
pub struct TestRocketBuilder {
    figment: Figment,
    routes: Vec<Route>,
    service: Option<ImportService>,
}

impl Default for TestRocketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRocketBuilder {
    /// Start a builder with sensible defaults: random port, logging disabled.
    pub fn new() -> Self {
        let figment = rocket::Config::figment()
            .merge(("port", 0))
            .merge(("log_level", LogLevel::Off))
            .merge(("cli_colors", false));

        Self {
            figment,
            routes: Vec::new(),
            service: None,
        }
    }

    /// Mount routes at the root, where the service exposes them.
    pub fn mount_routes(mut self, routes: Vec<Route>) -> Self {
        self.routes.extend(routes);
        self
    }

    pub fn manage_service(mut self, service: ImportService) -> Self {
        self.service = Some(service);
        self
    }

    /// Finish building the Rocket instance.
    pub fn build(self) -> Rocket<Build> {
        let mut rocket = rocket::custom(self.figment).mount("/", self.routes);

        if let Some(service) = self.service {
            rocket = rocket.manage(service);
        }

        rocket
    }

    /// Convenience helper to produce a blocking local client.
    pub fn blocking_client(self) -> Client {
        Client::tracked(self.build()).expect("valid Rocket instance")
    }

    /// Convenience helper to produce an asynchronous local client.
    pub async fn async_client(self) -> AsyncClient {
        AsyncClient::tracked(self.build())
            .await
            .expect("valid Rocket instance")
    }
}

// ===== PostgreSQL =====

pub mod database {
    use crate::config::DatabaseSettings;
    use sqlx::PgPool;
    use sqlx::postgres::PgPoolOptions;
    use std::path::PathBuf;
    use testcontainers_modules::postgres::Postgres;
    use testcontainers_modules::testcontainers::{
        ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
    };
    use thiserror::Error;

    const USER: &str = "postgres";
    const PASSWORD: &str = "postgres";
    const DATABASE: &str = "postgres";

    #[derive(Debug, Error)]
    pub enum TestDatabaseError {
        /// No container runtime; callers skip the test.
        #[error("container runtime unavailable: {0}")]
        Unavailable(#[from] TestcontainersError),
        #[error("database error: {0}")]
        Sqlx(#[from] sqlx::Error),
    }

    /// Disposable PostgreSQL server for integration tests.
    pub struct TestDatabase {
        pool: Option<PgPool>,
        host: String,
        port: u16,
        container: Option<ContainerAsync<Postgres>>,
    }

    impl TestDatabase {
        /// Launch a fresh PostgreSQL container.
        pub async fn new() -> Result<Self, TestDatabaseError> {
            let container = Postgres::default().start().await?;
            let host = container.get_host().await?.to_string();
            let port = container.get_host_port_ipv4(5432).await?;

            let url = format!("postgres://{USER}:{PASSWORD}@{host}:{port}/{DATABASE}");
            let pool = PgPoolOptions::new().max_connections(2).connect(&url).await?;

            Ok(Self {
                pool: Some(pool),
                host,
                port,
                container: Some(container),
            })
        }

        /// Pool for arranging and asserting table contents.
        pub fn pool(&self) -> &PgPool {
            self.pool.as_ref().expect("test database pool is available")
        }

        /// `instance_connection_name` routing imports to this server.
        pub fn instance_connection_name(&self) -> String {
            format!("tcp://{}:{}", self.host, self.port)
        }

        pub fn database_settings(&self) -> DatabaseSettings {
            DatabaseSettings {
                user: Some(USER.to_string()),
                password: Some(PASSWORD.to_string()),
                database: Some(DATABASE.to_string()),
                socket_dir: PathBuf::from("/cloudsql"),
            }
        }

        /// Close the pool and stop the container.
        pub async fn close(mut self) {
            if let Some(pool) = self.pool.take() {
                pool.close().await;
            }
            if let Some(container) = self.container.take() {
                drop(container);
            }
        }
    }
}
