//! Uploads the downloaded files into the stage and triggers the procedure.

use std::path::Path;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::config::Destination;
use crate::error::Result;
use crate::outcome::{LoadReport, StepOutcome};
use crate::snowflake::PutOptions;

/// Something that can open warehouse sessions.
#[async_trait]
pub trait Warehouse: Send + Sync {
    type Session: WarehouseSession;

    async fn connect(&self) -> Result<Self::Session>;
}

/// One open session. Statements run in submission order.
#[async_trait]
pub trait WarehouseSession: Send {
    /// Run a single SQL statement.
    async fn execute(&mut self, sql: &str) -> Result<QueryResult>;

    /// Upload the local files matching `source` into `stage_ref`.
    async fn put(&mut self, source: &str, stage_ref: &str, options: PutOptions) -> Result<PutSummary>;

    /// `CALL procedure(argument)`, returning the first column of the first row.
    async fn call(&mut self, procedure: &str, argument: &str) -> Result<Option<String>>;

    async fn close(self) -> Result<()>;
}

/// Rows returned by a statement, every value in its text form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub query_id: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

/// Files written by a PUT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutSummary {
    pub uploaded: Vec<String>,
    pub skipped: Vec<String>,
}

pub struct StageLoader<W> {
    warehouse: W,
    destination: Destination,
}

impl<W: Warehouse> StageLoader<W> {
    pub fn new(warehouse: W, destination: Destination) -> Self {
        Self {
            warehouse,
            destination,
        }
    }

    /// Put every file of `dir` into the stage, then call the procedure with
    /// `database.schema`.
    ///
    /// Nothing happens for an empty `file_names`. The procedure is only
    /// called once the upload succeeded, and the session is closed on every
    /// path after it was opened.
    pub async fn load_and_trigger(&self, dir: &Path, file_names: &[String]) -> StepOutcome<LoadReport> {
        if file_names.is_empty() {
            return StepOutcome::Skipped("no files to load".to_string());
        }

        let mut session = match self.warehouse.connect().await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "cannot connect to the warehouse; check the Snowflake credentials");
                return StepOutcome::Failed(e.to_string());
            }
        };

        let result = self.put_and_call(&mut session, dir, file_names.len()).await;

        if let Err(e) = session.close().await {
            warn!(error = %e, "failed to close warehouse session");
        }

        match result {
            Ok(report) => StepOutcome::Completed(report),
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }

    async fn put_and_call(
        &self,
        session: &mut W::Session,
        dir: &Path,
        count: usize,
    ) -> Result<LoadReport> {
        let stage_ref = self.destination.stage_ref();
        let dir = tokio::fs::canonicalize(dir).await?;
        let source = format!("{}/*", dir.display());
        let options = PutOptions {
            auto_compress: self.destination.auto_compress,
            overwrite: self.destination.overwrite,
        };

        info!(stage = %stage_ref, files = count, "uploading files to stage");
        let summary = session
            .put(&source, &stage_ref, options)
            .await
            .inspect_err(|e| error!(stage = %stage_ref, error = %e, "PUT into stage failed"))?;

        let label = self.destination.label();
        info!(procedure = %self.destination.procedure, argument = %label, "calling procedure");
        let procedure_result = session
            .call(&self.destination.procedure, &label)
            .await
            .inspect_err(|e| error!(procedure = %self.destination.procedure, error = %e, "procedure call failed"))?;
        info!(result = procedure_result.as_deref().unwrap_or("-"), "procedure returned");

        Ok(LoadReport {
            staged: summary.uploaded,
            skipped: summary.skipped,
            procedure_result,
        })
    }
}
