//! Per-step results of a run.

use std::fmt;

/// What happened to one step of the job.
///
/// Each step catches its own failures and reports them here instead of
/// returning an error, so the caller decides whether a failure should fail
/// the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome<T> {
    Completed(T),
    Skipped(String),
    Failed(String),
}

impl<T> StepOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, StepOutcome::Completed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }

    pub fn completed(&self) -> Option<&T> {
        match self {
            StepOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }
}

impl<T> fmt::Display for StepOutcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Completed(_) => write!(f, "completed"),
            StepOutcome::Skipped(reason) => write!(f, "skipped ({})", reason),
            StepOutcome::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// Files fetched by the downloader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    /// Local names of the files now in the download directory.
    pub downloaded: Vec<String>,
    /// Remote names that could not be fetched, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Result of the stage load and procedure trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Stage paths written by the PUT.
    pub staged: Vec<String>,
    /// Stage paths left untouched because they already existed.
    pub skipped: Vec<String>,
    /// Whatever the procedure returned, when it returned anything.
    pub procedure_result: Option<String>,
}

/// The outcome of one invocation of the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub download: StepOutcome<DownloadReport>,
    pub load: StepOutcome<LoadReport>,
    /// False when the download directory existed but could not be removed.
    pub cleaned_up: bool,
}

impl RunReport {
    /// Whether any step failed outright or a file could not be downloaded.
    pub fn has_failures(&self) -> bool {
        let partial = self
            .download
            .completed()
            .is_some_and(|report| !report.failed.is_empty());
        self.download.is_failed() || self.load.is_failed() || partial || !self.cleaned_up
    }
}
