//! Import orchestration.
//!
//! [`ImportService`] runs one import per call through the state machine
//! `Connecting → Validating → Streaming → Completed`, aborting from any of
//! them. The connection is opened after the entry checks pass and closed on
//! every path out; the object stream only exists inside the streaming state.

use super::{
    BulkLoader, Chunker, CopyOptions, DecoderOptions, ImportError, ImportFailure, ImportPlan,
    ImportState, RowDecoder, validate_table,
};
use crate::config::{ImportSettings, ServiceConfig};
use crate::db::{Destination, LoadSession, PgDestination};
use crate::models::{ImportRequest, ImportResult};
use crate::storage::{GcsStore, GzipStream, ObjectStore, StorageError};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Running totals for one import.
struct Progress {
    import_id: Uuid,
    state: ImportState,
    batches: usize,
    rows_loaded: u64,
    rows_committed: u64,
}

/// Runs imports against injected storage and database collaborators.
///
/// Shared between requests; holds no per-import state.
pub struct ImportService {
    store: Arc<dyn ObjectStore>,
    destination: Arc<dyn Destination>,
    settings: ImportSettings,
}

impl ImportService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        destination: Arc<dyn Destination>,
        settings: ImportSettings,
    ) -> Self {
        Self {
            store,
            destination,
            settings,
        }
    }

    /// Production wiring: Cloud Storage in, PostgreSQL out.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, StorageError> {
        let store = GcsStore::new(config.storage.clone())?;
        Ok(Self::new(
            Arc::new(store),
            Arc::new(PgDestination::new()),
            config.import.clone(),
        ))
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    /// [`run`](Self::run) bounded by the configured timeout. On expiry the
    /// import future is dropped, which closes its connection and object
    /// stream; an open transaction dies with the connection.
    pub async fn run_with_timeout(
        &self,
        request: &ImportRequest,
    ) -> Result<ImportResult, ImportFailure> {
        let limit = self.settings.timeout;
        match tokio::time::timeout(limit, self.run(request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                log::error!(
                    "import into {} timed out after {:?}",
                    request.schema_table(),
                    limit
                );
                Err(ImportFailure::new(
                    ImportError::Timeout(limit),
                    ImportState::Aborted,
                ))
            }
        }
    }

    /// Run one import to completion.
    pub async fn run(&self, request: &ImportRequest) -> Result<ImportResult, ImportFailure> {
        let import_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();

        let plan = ImportPlan::from_request(request, &self.settings.database).map_err(|err| {
            log::warn!("import {}: rejected: {}", import_id, err);
            ImportFailure::new(err, ImportState::Pending)
        })?;

        log::info!(
            "import {}: loading {}/{} into {} via {}",
            import_id,
            plan.bucket,
            plan.path,
            plan.table,
            plan.target
        );

        let mut session = self
            .destination
            .connect(&plan.target, &plan.credentials)
            .await
            .map_err(|err| {
                let err = ImportError::Connection(format!("{}: {}", plan.target, err));
                log::error!("import {}: {}", import_id, err);
                ImportFailure::new(err, ImportState::Connecting)
            })?;

        let mut progress = Progress {
            import_id,
            state: ImportState::Connecting,
            batches: 0,
            rows_loaded: 0,
            rows_committed: 0,
        };
        let outcome = self.drive(session.as_mut(), &plan, &mut progress).await;

        if let Err(err) = session.close().await {
            log::warn!("import {}: closing connection failed: {}", import_id, err);
        }

        if let Err(error) = outcome {
            log::error!(
                "import {}: aborted while {} ({} rows committed): {}",
                import_id,
                progress.state,
                progress.rows_committed,
                error
            );
            return Err(ImportFailure {
                error,
                state: progress.state,
                rows_committed: progress.rows_committed,
            });
        }

        let elapsed = clock.elapsed();
        let time_taken = format_elapsed(elapsed);
        let schema_table = plan.table.to_string();

        log::info!(
            "import {}: data import successful for table: {}, {} rows in {} batches, time taken: {}",
            import_id,
            schema_table,
            progress.rows_loaded,
            progress.batches,
            time_taken
        );

        Ok(ImportResult {
            success: true,
            message: "Data import successful".to_string(),
            import_id,
            gcs_uri: format!("{}/{}", plan.bucket, plan.path),
            schema_table,
            started_at,
            time_taken,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            rows_loaded: progress.rows_loaded,
            batches: progress.batches,
        })
    }

    async fn drive(
        &self,
        session: &mut dyn LoadSession,
        plan: &ImportPlan,
        progress: &mut Progress,
    ) -> Result<(), ImportError> {
        progress.state = ImportState::Validating;
        validate_table(session, &plan.table, &plan.columns).await?;

        progress.state = ImportState::Streaming;
        if !plan.transactional {
            return self.stream(session, plan, progress).await;
        }

        session
            .begin()
            .await
            .map_err(|e| ImportError::Load(format!("failed to open transaction: {e}")))?;

        match self.stream(session, plan, progress).await {
            Ok(()) => {
                session
                    .commit()
                    .await
                    .map_err(|e| ImportError::Load(format!("commit failed: {e}")))?;
                progress.rows_committed = progress.rows_loaded;
                progress.state = ImportState::Completed;
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = session.rollback().await {
                    log::warn!(
                        "import {}: rollback failed: {}",
                        progress.import_id,
                        rollback_err
                    );
                }
                Err(err)
            }
        }
    }

    async fn stream(
        &self,
        session: &mut dyn LoadSession,
        plan: &ImportPlan,
        progress: &mut Progress,
    ) -> Result<(), ImportError> {
        let object = self.store.open(&plan.bucket, &plan.path).await?;
        let decoder = RowDecoder::new(
            GzipStream::new(object),
            DecoderOptions {
                delimiter: plan.delimiter,
                skip_header: plan.skip_header,
            },
        );
        let mut chunker = Chunker::new(decoder, plan.chunk_size)?;
        let mut loader = BulkLoader::new(
            &plan.table,
            &plan.columns,
            CopyOptions {
                empty_as_null: plan.empty_as_null,
                frame_bytes: self.settings.copy_frame_bytes,
            },
        );
        log::debug!(
            "import {}: {}",
            progress.import_id,
            loader.copy_command().statement
        );

        while let Some(batch) = chunker.next_batch().await? {
            let number = batch.number;
            let copied = loader.load(session, batch).await?;

            progress.batches = loader.batches_loaded();
            progress.rows_loaded = loader.rows_loaded();
            if !plan.transactional {
                progress.rows_committed = progress.rows_loaded;
            }

            log::debug!(
                "import {}: batch {} copied {} rows ({} total)",
                progress.import_id,
                number,
                copied,
                progress.rows_loaded
            );
        }

        if !plan.transactional {
            progress.state = ImportState::Completed;
        }
        Ok(())
    }
}

/// `H:MM:SS.ffffff`, as reported in `time_taken`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!(
        "{}:{:02}:{:02}.{:06}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60,
        elapsed.subsec_micros()
    )
}
