use super::ImportError;
use crate::db::{LoadSession, TableRef};

/// Confirm the destination exists, is readable, and has every requested
/// column. Returns the table's declared columns in ordinal order.
pub async fn validate_table(
    session: &mut dyn LoadSession,
    table: &TableRef,
    columns: &[String],
) -> Result<Vec<String>, ImportError> {
    let declared = session.table_columns(table).await.map_err(|e| {
        ImportError::TableNotFound(format!("failed to inspect {table}: {e}"))
    })?;

    if declared.is_empty() {
        return Err(ImportError::TableNotFound(format!(
            "{table} does not exist or is not visible to this connection"
        )));
    }

    session
        .probe_table(table)
        .await
        .map_err(|e| ImportError::TableNotFound(format!("{table} is not readable: {e}")))?;

    let missing: Vec<&str> = columns
        .iter()
        .filter(|column| !declared.contains(column))
        .map(String::as_str)
        .collect();

    if !missing.is_empty() {
        return Err(ImportError::TableNotFound(format!(
            "{table} has no column(s) {}",
            missing.join(", ")
        )));
    }

    log::debug!(
        "{} validated: loading {} of {} columns",
        table,
        columns.len(),
        declared.len()
    );

    Ok(declared)
}
