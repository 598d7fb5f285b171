//! drive_stage - move files from a Google Drive folder into a Snowflake stage.
//!
//! One run of the job:
//! - lists the regular, non-trashed files of a Drive folder and downloads
//!   them into a local directory
//! - PUTs that directory into a Snowflake stage and calls a procedure that
//!   loads the CSV files and extracts the text of the PDFs
//! - removes the local directory
//!
//! # Example
//!
//! ```no_run
//! use drive_stage::{Authenticator, Downloader, DriveClient, FolderId};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let auth = Authenticator::from_file("service-account.json")?;
//!     let downloader = Downloader::new(DriveClient::new(auth), "temp_drive_files");
//!     let folder: FolderId = "1AbCdEfGh".parse()?;
//!
//!     for file in downloader.list(&folder).await? {
//!         println!("{}", file);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod downloader;
pub mod drive;
pub mod error;
pub mod folder_id;
pub mod models;
pub mod outcome;
pub mod pipeline;
pub mod snowflake;
pub mod stage_loader;
pub mod transformer;

// Re-exports for convenience
pub use auth::Authenticator;
pub use config::{Destination, DriveConfig, StageLayout, WarehouseConfig};
pub use downloader::{Downloader, FileSource};
pub use drive::DriveClient;
pub use error::{Error, Result};
pub use folder_id::FolderId;
pub use models::RemoteFile;
pub use outcome::{DownloadReport, LoadReport, RunReport, StepOutcome};
pub use pipeline::Pipeline;
pub use snowflake::{PutOptions, Snowflake};
pub use stage_loader::{PutSummary, QueryResult, StageLoader, Warehouse, WarehouseSession};
pub use transformer::{TransformStatus, Transformer};
