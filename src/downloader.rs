//! Lists the source folder and downloads its files into a local directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::folder_id::FolderId;
use crate::models::RemoteFile;
use crate::outcome::{DownloadReport, StepOutcome};

const PARTIAL_SUFFIX: &str = ".part";

/// A remote folder the job can list and fetch from.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Items directly under `folder_id`.
    async fn list(&self, folder_id: &str) -> Result<Vec<RemoteFile>>;

    /// Write the content of `file` to `destination`, returning the bytes written.
    async fn download(&self, file: &RemoteFile, destination: &Path) -> Result<u64>;
}

/// Fetches every file of one folder into `dir`, one at a time.
pub struct Downloader<S> {
    source: S,
    dir: PathBuf,
}

impl<S: FileSource> Downloader<S> {
    pub fn new(source: S, dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// List the folder and download each regular, non-trashed file.
    ///
    /// A file that fails to download is logged and recorded in the report;
    /// the remaining files are still fetched. The directory is only created
    /// when there is at least one file to fetch.
    pub async fn list_and_download(&self, folder_id: &FolderId) -> StepOutcome<DownloadReport> {
        let files = match self.list(folder_id).await {
            Ok(files) => files,
            Err(e) => {
                match e {
                    Error::Authentication(_) | Error::TokenRefresh(_) | Error::Jwt(_) => {
                        error!(error = %e, "Drive authentication failed; check the service account path and folder permissions")
                    }
                    _ => error!(folder = %folder_id, error = %e, "failed to list Drive folder"),
                }
                return StepOutcome::Failed(e.to_string());
            }
        };

        if files.is_empty() {
            info!(folder = %folder_id, "no files found to download");
            return StepOutcome::Skipped("no files in folder".to_string());
        }

        if let Err(e) = reset_dir(&self.dir).await {
            error!(dir = %self.dir.display(), error = %e, "cannot prepare download directory");
            return StepOutcome::Failed(e.to_string());
        }

        let mut report = DownloadReport::default();
        for file in &files {
            let local_name = file.local_name();
            let path = self.dir.join(&local_name);

            match self.fetch(file, &path).await {
                Ok(bytes) => {
                    info!(file = %file.name, bytes, "downloaded");
                    if report.downloaded.contains(&local_name) {
                        warn!(file = %local_name, "duplicate name in folder; later file replaced earlier one");
                    } else {
                        report.downloaded.push(local_name);
                    }
                }
                Err(e) => {
                    warn!(file = %file.name, error = %e, "download failed; skipping");
                    report.failed.push((file.name.clone(), e.to_string()));
                }
            }
        }

        info!(
            downloaded = report.downloaded.len(),
            failed = report.failed.len(),
            "download finished"
        );
        StepOutcome::Completed(report)
    }

    /// Download into `<path>.part` and move it into place once complete, so
    /// a failed attempt never touches an earlier file with the same name.
    async fn fetch(&self, file: &RemoteFile, path: &Path) -> Result<u64> {
        let mut partial = path.as_os_str().to_owned();
        partial.push(PARTIAL_SUFFIX);
        let partial = PathBuf::from(partial);

        let result = match self.source.download(file, &partial).await {
            Ok(bytes) => tokio::fs::rename(&partial, path)
                .await
                .map(|_| bytes)
                .map_err(Error::from),
            Err(e) => Err(e),
        };
        if result.is_err() && tokio::fs::try_exists(&partial).await.unwrap_or(false) {
            if let Err(e) = tokio::fs::remove_file(&partial).await {
                warn!(file = %partial.display(), error = %e, "cannot remove partial download");
            }
        }
        result
    }

    /// Eligible files in the folder, without downloading anything.
    pub async fn list(&self, folder_id: &FolderId) -> Result<Vec<RemoteFile>> {
        info!(folder = %folder_id, "listing Drive folder");
        let items = self.source.list(folder_id.as_str()).await?;
        Ok(items
            .into_iter()
            .filter(|item| {
                let keep = item.is_downloadable();
                if !keep {
                    debug!(file = %item.name, "ignoring folder or trashed item");
                }
                keep
            })
            .collect())
    }
}

/// Start from an empty directory, dropping leftovers of an earlier run
/// whose cleanup did not happen.
async fn reset_dir(dir: &Path) -> std::io::Result<()> {
    check_scratch_dir(dir)?;
    if tokio::fs::try_exists(dir).await? {
        warn!(dir = %dir.display(), "download directory already exists; removing leftovers");
        tokio::fs::remove_dir_all(dir).await?;
    }
    tokio::fs::create_dir_all(dir).await
}

/// Remove the download directory and everything in it.
///
/// Returns `Ok(false)` when there was nothing to remove.
pub async fn remove_dir(dir: &Path) -> std::io::Result<bool> {
    check_scratch_dir(dir)?;
    if !tokio::fs::try_exists(dir).await? {
        return Ok(false);
    }
    tokio::fs::remove_dir_all(dir).await?;
    Ok(true)
}

/// Refuse directories whose recursive removal would reach beyond the
/// scratch area: empty, `.`, `..`, a root, or the working directory or one
/// of its ancestors.
fn check_scratch_dir(dir: &Path) -> std::io::Result<()> {
    let refuse = || {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("refusing to use {:?} as the download directory", dir),
        )
    };
    if dir.file_name().is_none() {
        return Err(refuse());
    }
    if let (Ok(target), Ok(cwd)) = (std::fs::canonicalize(dir), std::env::current_dir()) {
        if cwd.starts_with(&target) {
            return Err(refuse());
        }
    }
    Ok(())
}
