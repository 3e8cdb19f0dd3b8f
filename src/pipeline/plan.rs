//! Entry checks turning an [`ImportRequest`] into a runnable plan.
//!
//! Everything here runs before any network I/O; a request that fails a check
//! never reaches the database or object storage.

use super::ImportError;
use crate::config::DatabaseSettings;
use crate::db::{ConnectTarget, Credentials, TableRef};
use crate::models::ImportRequest;
use std::collections::HashSet;

/// The only accepted object suffix.
pub const SUPPORTED_EXTENSION: &str = ".csv.gz";

/// A validated import.
#[derive(Debug, Clone)]
pub struct ImportPlan {
    pub table: TableRef,
    pub columns: Vec<String>,
    pub bucket: String,
    pub path: String,
    pub target: ConnectTarget,
    pub credentials: Credentials,
    pub chunk_size: usize,
    pub skip_header: bool,
    pub delimiter: u8,
    pub empty_as_null: bool,
    pub transactional: bool,
}

impl ImportPlan {
    pub fn from_request(
        request: &ImportRequest,
        database: &DatabaseSettings,
    ) -> Result<Self, ImportError> {
        let credentials = credentials(database)?;

        let table_name = required("table_name", &request.table_name)?;
        let table_schema = required("table_schema", &request.table_schema)?;
        let bucket = required("bucket_name", &request.bucket_name)?;
        let path = required("file_path", &request.file_path)?;

        if !path.ends_with(SUPPORTED_EXTENSION) {
            return Err(ImportError::Configuration(format!(
                "unsupported file type: {}/{}. Only CSV.GZ files are currently supported.",
                bucket, path
            )));
        }

        let chunk_size = usize::try_from(request.chunk_size)
            .ok()
            .filter(|size| *size > 0)
            .ok_or_else(|| {
                ImportError::Configuration(format!(
                    "chunk_size must be a positive integer, got {}",
                    request.chunk_size
                ))
            })?;

        let columns = columns(&request.columns)?;
        let delimiter = delimiter(&request.delimiter)?;
        let target = ConnectTarget::resolve(&request.instance_connection_name, &database.socket_dir)?;

        Ok(Self {
            table: TableRef::new(table_schema, table_name),
            columns,
            bucket: bucket.to_string(),
            path: path.to_string(),
            target,
            credentials,
            chunk_size,
            skip_header: request.skip_header,
            delimiter,
            empty_as_null: request.empty_as_null,
            transactional: request.transactional,
        })
    }
}

fn credentials(database: &DatabaseSettings) -> Result<Credentials, ImportError> {
    let missing: Vec<&str> = [
        ("DB_USER", &database.user),
        ("DB_PASS", &database.password),
        ("DB_NAME", &database.database),
    ]
    .into_iter()
    .filter(|(_, value)| value.is_none())
    .map(|(name, _)| name)
    .collect();

    match (&database.user, &database.password, &database.database) {
        (Some(user), Some(password), Some(database)) => Ok(Credentials {
            user: user.clone(),
            password: password.clone(),
            database: database.clone(),
        }),
        _ => Err(ImportError::Configuration(format!(
            "missing environment variables: {}",
            missing.join(", ")
        ))),
    }
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, ImportError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ImportError::Configuration(format!("{field} must not be empty")));
    }
    Ok(value)
}

fn columns(requested: &[String]) -> Result<Vec<String>, ImportError> {
    if requested.is_empty() {
        return Err(ImportError::Configuration(
            "columns must list the destination columns in file order".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for column in requested {
        if column.trim().is_empty() {
            return Err(ImportError::Configuration(
                "column names must not be empty".to_string(),
            ));
        }
        if !seen.insert(column.as_str()) {
            return Err(ImportError::Configuration(format!(
                "column '{column}' is listed more than once"
            )));
        }
    }

    Ok(requested.to_vec())
}

fn delimiter(value: &str) -> Result<u8, ImportError> {
    match value.as_bytes() {
        [byte] if byte.is_ascii() && !matches!(byte, b'"' | b'\r' | b'\n') => Ok(*byte),
        _ => Err(ImportError::Configuration(format!(
            "delimiter must be a single ASCII character other than quote or newline, got {value:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn database() -> DatabaseSettings {
        DatabaseSettings {
            user: Some("loader".into()),
            password: Some("secret".into()),
            database: Some("warehouse".into()),
            socket_dir: PathBuf::from("/cloudsql"),
        }
    }

    fn request() -> ImportRequest {
        ImportRequest::new(
            "t",
            "b",
            "f.csv.gz",
            "proj:region:inst",
            vec!["a".into(), "b".into()],
        )
    }

    fn configuration_error(request: &ImportRequest, database: &DatabaseSettings) -> String {
        match ImportPlan::from_request(request, database) {
            Err(ImportError::Configuration(message)) => message,
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn valid_request_builds_plan() {
        let mut request = request();
        request.table_schema = "sales".into();
        request.chunk_size = 2;
        request.delimiter = "|".into();

        let plan = ImportPlan::from_request(&request, &database()).expect("valid plan");

        assert_eq!(plan.table, TableRef::new("sales", "t"));
        assert_eq!(plan.chunk_size, 2);
        assert_eq!(plan.delimiter, b'|');
        assert_eq!(
            plan.target,
            ConnectTarget::Socket(PathBuf::from("/cloudsql/proj:region:inst"))
        );
        assert_eq!(plan.credentials.user, "loader");
    }

    #[test]
    fn non_positive_chunk_size_is_rejected() {
        for size in [0, -1, i64::MIN] {
            let mut request = request();
            request.chunk_size = size;
            let message = configuration_error(&request, &database());
            assert!(message.contains("chunk_size"), "{message}");
        }
    }

    #[test]
    fn missing_environment_is_reported_by_name() {
        let mut db = database();
        db.password = None;
        db.database = None;

        let message = configuration_error(&request(), &db);
        assert_eq!(message, "missing environment variables: DB_PASS, DB_NAME");
    }

    #[test]
    fn only_gzip_csv_objects_are_accepted() {
        for path in ["f.csv", "f.json.gz", "f.csv.gz.bak", "f.tsv.gz"] {
            let mut request = request();
            request.file_path = path.into();
            let message = configuration_error(&request, &database());
            assert!(message.contains("unsupported file type"), "{message}");
        }
    }

    #[test]
    fn columns_are_required_and_unique() {
        let mut request = request();
        request.columns.clear();
        assert!(configuration_error(&request, &database()).contains("columns"));

        request.columns = vec!["a".into(), "a".into()];
        assert!(configuration_error(&request, &database()).contains("more than once"));

        request.columns = vec!["a".into(), " ".into()];
        assert!(configuration_error(&request, &database()).contains("must not be empty"));
    }

    #[test]
    fn empty_coordinates_are_rejected() {
        let mut request = request();
        request.table_name = "  ".into();
        assert!(configuration_error(&request, &database()).contains("table_name"));

        let mut request = self::request();
        request.bucket_name.clear();
        assert!(configuration_error(&request, &database()).contains("bucket_name"));

        let mut request = self::request();
        request.instance_connection_name.clear();
        assert!(configuration_error(&request, &database()).contains("instance_connection_name"));
    }

    #[test]
    fn delimiter_must_be_one_ascii_byte() {
        for bad in ["", ",,", "\"", "\n", "§"] {
            let mut request = request();
            request.delimiter = bad.into();
            assert!(configuration_error(&request, &database()).contains("delimiter"));
        }

        let mut request = request();
        request.delimiter = "\t".into();
        let plan = ImportPlan::from_request(&request, &database()).expect("tab is fine");
        assert_eq!(plan.delimiter, b'\t');
    }
}
