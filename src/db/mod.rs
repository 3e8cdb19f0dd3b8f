//! Destination database seam.
//!
//! The import pipeline talks to the database only through [`Destination`]
//! and the [`LoadSession`] it hands out: one exclusively owned connection per
//! import. [`PgDestination`] is the PostgreSQL implementation.

pub mod postgres;

pub use postgres::PgDestination;

use crate::pipeline::ImportError;
use std::fmt;
use std::path::{Path, PathBuf};

const TCP_PREFIX: &str = "tcp://";
const DEFAULT_PG_PORT: u16 = 5432;

/// Where to reach the database for one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    /// Directory containing the server's Unix socket.
    Socket(PathBuf),
    Tcp { host: String, port: u16 },
}

impl ConnectTarget {
    /// Derive the target from an instance connection name.
    ///
    /// `tcp://host[:port]` selects a network connection; anything else is a
    /// Cloud SQL instance name whose socket lives in `socket_dir/<name>`.
    pub fn resolve(instance_connection_name: &str, socket_dir: &Path) -> Result<Self, ImportError> {
        let name = instance_connection_name.trim();
        if name.is_empty() {
            return Err(ImportError::Configuration(
                "instance_connection_name must not be empty".to_string(),
            ));
        }

        let Some(address) = name.strip_prefix(TCP_PREFIX) else {
            if name.contains("..") || name.starts_with('/') {
                return Err(ImportError::Configuration(format!(
                    "invalid instance connection name '{name}'"
                )));
            }
            return Ok(ConnectTarget::Socket(socket_dir.join(name)));
        };

        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    ImportError::Configuration(format!("invalid port in '{name}'"))
                })?;
                (host, port)
            }
            None => (address, DEFAULT_PG_PORT),
        };

        if host.is_empty() {
            return Err(ImportError::Configuration(format!("missing host in '{name}'")));
        }

        Ok(ConnectTarget::Tcp {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectTarget::Socket(dir) => write!(f, "unix:{}", dir.display()),
            ConnectTarget::Tcp { host, port } => write!(f, "tcp:{host}:{port}"),
        }
    }
}

/// Login for the destination database.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
    pub database: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// Schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// `"schema"."table"`, safe to splice into SQL.
    pub fn quoted(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Double-quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// A prepared `COPY ... FROM STDIN` for one table and column list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyCommand {
    pub table: TableRef,
    pub columns: Vec<String>,
    pub statement: String,
}

impl CopyCommand {
    /// Text-format COPY: tab separated, `\N` for NULL.
    pub fn new(table: &TableRef, columns: &[String]) -> Self {
        let column_list = columns
            .iter()
            .map(|column| quote_ident(column))
            .collect::<Vec<_>>()
            .join(", ");

        Self {
            statement: format!("COPY {} ({}) FROM STDIN", table.quoted(), column_list),
            table: table.clone(),
            columns: columns.to_vec(),
        }
    }
}

/// Opens connections to the destination database.
#[rocket::async_trait]
pub trait Destination: Send + Sync {
    async fn connect(
        &self,
        target: &ConnectTarget,
        credentials: &Credentials,
    ) -> Result<Box<dyn LoadSession>, sqlx::Error>;
}

/// One open connection, owned by a single import for its whole lifetime.
#[rocket::async_trait]
pub trait LoadSession: Send {
    /// Declared column names in ordinal order; empty when the table is not
    /// visible to this connection.
    async fn table_columns(&mut self, table: &TableRef) -> Result<Vec<String>, sqlx::Error>;

    /// Zero-row read of the table.
    async fn probe_table(&mut self, table: &TableRef) -> Result<(), sqlx::Error>;

    async fn begin(&mut self) -> Result<(), sqlx::Error>;

    /// Stream the encoded frames through one COPY, returning the row count
    /// reported by the server.
    async fn copy_in(&mut self, copy: &CopyCommand, frames: Vec<Vec<u8>>) -> Result<u64, sqlx::Error>;

    async fn commit(&mut self) -> Result<(), sqlx::Error>;

    async fn rollback(&mut self) -> Result<(), sqlx::Error>;

    async fn close(self: Box<Self>) -> Result<(), sqlx::Error>;
}
