use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use gcs_pg_import::config::ServiceConfig;
use gcs_pg_import::db::PgDestination;
use gcs_pg_import::models::ImportRequest;
use gcs_pg_import::pipeline::ImportService;
use gcs_pg_import::storage::LocalStore;
use gcs_pg_import::telemetry;

#[derive(Parser, Debug)]
#[command(
    name = "import_file",
    about = "Load one gzip-compressed CSV object into a PostgreSQL table"
)]
struct Args {
    /// Bucket holding the object.
    #[arg(long)]
    bucket: String,

    /// Object path inside the bucket; must end in `.csv.gz`.
    #[arg(long)]
    path: String,

    /// Destination table.
    #[arg(long)]
    table: String,

    #[arg(long, default_value = "public")]
    schema: String,

    /// Cloud SQL instance name, or `tcp://host:port`.
    #[arg(long)]
    instance: String,

    /// Destination columns in file field order, comma separated.
    #[arg(long, value_delimiter = ',', required = true)]
    columns: Vec<String>,

    #[arg(long, default_value_t = 1_000_000)]
    chunk_size: i64,

    #[arg(long)]
    skip_header: bool,

    #[arg(long, default_value = ",")]
    delimiter: String,

    /// Load empty fields as empty strings instead of NULL.
    #[arg(long)]
    keep_empty: bool,

    /// Commit each batch on its own instead of one transaction.
    #[arg(long)]
    no_transaction: bool,

    /// Read `<root>/<bucket>/<path>` from disk instead of Cloud Storage.
    #[arg(long)]
    local_root: Option<PathBuf>,
}

impl Args {
    fn request(&self) -> ImportRequest {
        let mut request = ImportRequest::new(
            &self.table,
            &self.bucket,
            &self.path,
            &self.instance,
            self.columns.clone(),
        );
        request.table_schema = self.schema.clone();
        request.chunk_size = self.chunk_size;
        request.skip_header = self.skip_header;
        request.delimiter = self.delimiter.clone();
        request.empty_as_null = !self.keep_empty;
        request.transactional = !self.no_transaction;
        request
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init_logging()?;

    let args = Args::parse();
    let config = ServiceConfig::from_env();

    let service = match &args.local_root {
        Some(root) => ImportService::new(
            Arc::new(LocalStore::new(root)),
            Arc::new(PgDestination::new()),
            config.import.clone(),
        ),
        None => ImportService::from_config(&config)?,
    };

    match service.run_with_timeout(&args.request()).await {
        Ok(result) => {
            writeln!(io::stdout(), "{}", serde_json::to_string_pretty(&result)?)?;
            Ok(())
        }
        Err(failure) => {
            writeln!(
                io::stderr(),
                "error: {} ({}, {} rows committed)",
                failure,
                failure.error.kind(),
                failure.rows_committed
            )?;
            std::process::exit(1);
        }
    }
}
