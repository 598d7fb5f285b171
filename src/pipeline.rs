//! The extract and load job: download, stage, trigger, clean up.

use tracing::{error, info};

use crate::auth::Authenticator;
use crate::config::{DriveConfig, StageLayout, WarehouseConfig};
use crate::downloader::{self, Downloader, FileSource};
use crate::drive::DriveClient;
use crate::folder_id::FolderId;
use crate::outcome::{RunReport, StepOutcome};
use crate::snowflake::Snowflake;
use crate::stage_loader::{StageLoader, Warehouse};

pub struct Pipeline<S, W> {
    downloader: Downloader<S>,
    loader: StageLoader<W>,
    folder: FolderId,
}

impl<S: FileSource, W: Warehouse> Pipeline<S, W> {
    pub fn new(downloader: Downloader<S>, loader: StageLoader<W>, folder: FolderId) -> Self {
        Self {
            downloader,
            loader,
            folder,
        }
    }

    /// Run the job once. The download directory is removed before
    /// returning, whatever happened to the steps.
    pub async fn run(&self) -> RunReport {
        let download = self.downloader.list_and_download(&self.folder).await;

        let files = download
            .completed()
            .map(|report| report.downloaded.clone())
            .unwrap_or_default();
        let load = if files.is_empty() {
            let reason = match &download {
                StepOutcome::Completed(_) => "no file was downloaded",
                _ => "nothing was downloaded",
            };
            StepOutcome::Skipped(reason.to_string())
        } else {
            self.loader
                .load_and_trigger(self.downloader.dir(), &files)
                .await
        };

        let dir = self.downloader.dir();
        let cleaned_up = match downloader::remove_dir(dir).await {
            Ok(removed) => {
                if removed {
                    info!(dir = %dir.display(), "temporary directory removed");
                }
                true
            }
            Err(e) => {
                error!(dir = %dir.display(), error = %e, "failed to remove temporary directory");
                false
            }
        };

        RunReport {
            download,
            load,
            cleaned_up,
        }
    }
}

/// Build the Drive and Snowflake clients from configuration and run the job.
pub async fn run_job(drive: &DriveConfig, warehouse: WarehouseConfig, layout: &StageLayout) -> RunReport {
    let auth = match Authenticator::from_file(&drive.credentials) {
        Ok(auth) => auth,
        Err(e) => {
            error!(error = %e, "Drive authentication failed; check GOOGLE_SERVICE_ACCOUNT_PATH and its permissions");
            return RunReport {
                download: StepOutcome::Failed(e.to_string()),
                load: StepOutcome::Skipped("nothing was downloaded".to_string()),
                cleaned_up: true,
            };
        }
    };

    let destination = layout.resolve(&warehouse);
    let pipeline = Pipeline::new(
        Downloader::new(DriveClient::new(auth), &drive.temp_dir),
        StageLoader::new(Snowflake::new(warehouse), destination),
        drive.folder.clone(),
    );
    pipeline.run().await
}
