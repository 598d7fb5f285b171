//! Connection settings and warehouse layout.
//!
//! Every value can come from a command-line flag or the matching environment
//! variable; the binary loads an env file before parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args};

use crate::folder_id::FolderId;

/// Where to read files from.
#[derive(Debug, Clone, Args)]
pub struct DriveConfig {
    /// Path to the service account JSON key with read access to the folder.
    #[arg(long, env = "GOOGLE_SERVICE_ACCOUNT_PATH")]
    pub credentials: PathBuf,

    /// Source folder URL or ID.
    #[arg(long, env = "DRIVE_FOLDER_ID")]
    pub folder: FolderId,

    /// Local directory files are downloaded into; removed at the end of every run.
    #[arg(long, env = "TEMP_UPLOAD_DIR", default_value = "temp_drive_files")]
    pub temp_dir: PathBuf,
}

/// How to reach the warehouse.
#[derive(Clone, Args)]
pub struct WarehouseConfig {
    #[arg(long = "sf-user", env = "SNOWFLAKE_USER")]
    pub user: String,

    #[arg(long = "sf-password", env = "SNOWFLAKE_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Account identifier, e.g. `myorg-myaccount`.
    #[arg(long = "sf-account", env = "SNOWFLAKE_ACCOUNT")]
    pub account: String,

    #[arg(long = "sf-warehouse", env = "SNOWFLAKE_WAREHOUSE")]
    pub warehouse: String,

    #[arg(long = "sf-database", env = "SNOWFLAKE_DATABASE")]
    pub database: String,

    #[arg(long = "sf-schema", env = "SNOWFLAKE_SCHEMA")]
    pub schema: String,

    #[arg(long = "sf-role", env = "SNOWFLAKE_ROLE")]
    pub role: Option<String>,

    /// Override for `https://<account>.snowflakecomputing.com`.
    #[arg(long = "sf-host", env = "SNOWFLAKE_HOST")]
    pub host: Option<String>,
}

impl WarehouseConfig {
    /// Root URL of the account's REST endpoints.
    pub fn base_url(&self) -> String {
        match self.host.as_deref() {
            Some(host) if host.starts_with("http://") || host.starts_with("https://") => {
                host.trim_end_matches('/').to_string()
            }
            Some(host) => format!("https://{}", host.trim_end_matches('/')),
            None => format!("https://{}.snowflakecomputing.com", self.account),
        }
    }

    /// Account name as the login request expects it: the part before any region suffix.
    pub fn account_name(&self) -> &str {
        self.account.split('.').next().unwrap_or(&self.account)
    }
}

impl std::fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarehouseConfig")
            .field("user", &self.user)
            .field("password", &"***")
            .field("account", &self.account)
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("role", &self.role)
            .field("host", &self.host)
            .finish()
    }
}

/// Names of the warehouse objects the job writes to.
///
/// Unqualified names are resolved against the configured database and schema.
#[derive(Debug, Clone, Args)]
pub struct StageLayout {
    /// Stage that receives the files.
    #[arg(long, env = "SNOWFLAKE_STAGE", default_value = "PDF_FILES_STAGE")]
    pub stage: String,

    /// Procedure invoked after the upload.
    #[arg(long, env = "SNOWFLAKE_PROCEDURE", default_value = "PROCESS_STAGED_FILES")]
    pub procedure: String,

    /// Table receiving rows of the staged CSV files.
    #[arg(long, env = "SNOWFLAKE_CSV_TABLE", default_value = "RAW_CSV_DATA")]
    pub csv_table: String,

    /// Table receiving text extracted from the staged PDFs.
    #[arg(long, env = "SNOWFLAKE_PDF_TABLE", default_value = "RAW_PDF_TEXT")]
    pub pdf_table: String,

    /// Gzip files on upload (PDFs and already compressed files are stored as is).
    #[arg(long, env = "SNOWFLAKE_AUTO_COMPRESS", default_value_t = true, action = ArgAction::Set)]
    pub auto_compress: bool,

    /// Replace staged files with the same name.
    #[arg(long, env = "SNOWFLAKE_OVERWRITE", default_value_t = true, action = ArgAction::Set)]
    pub overwrite: bool,
}

impl Default for StageLayout {
    fn default() -> Self {
        Self {
            stage: "PDF_FILES_STAGE".to_string(),
            procedure: "PROCESS_STAGED_FILES".to_string(),
            csv_table: "RAW_CSV_DATA".to_string(),
            pdf_table: "RAW_PDF_TEXT".to_string(),
            auto_compress: true,
            overwrite: true,
        }
    }
}

impl StageLayout {
    pub fn resolve(&self, warehouse: &WarehouseConfig) -> Destination {
        let qualify = |name: &str| {
            if name.contains('.') {
                name.to_string()
            } else {
                format!("{}.{}.{}", warehouse.database, warehouse.schema, name)
            }
        };
        Destination {
            database: warehouse.database.clone(),
            schema: warehouse.schema.clone(),
            stage: qualify(self.stage.trim_start_matches('@')),
            procedure: qualify(&self.procedure),
            csv_table: qualify(&self.csv_table),
            pdf_table: qualify(&self.pdf_table),
            auto_compress: self.auto_compress,
            overwrite: self.overwrite,
        }
    }
}

/// Fully qualified warehouse objects for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub database: String,
    pub schema: String,
    pub stage: String,
    pub procedure: String,
    pub csv_table: String,
    pub pdf_table: String,
    pub auto_compress: bool,
    pub overwrite: bool,
}

impl Destination {
    /// `database.schema`, the argument passed to the procedure.
    pub fn label(&self) -> String {
        format!("{}.{}", self.database, self.schema)
    }

    /// Stage reference as used in SQL, e.g. `@DB.RAW.PDF_FILES_STAGE`.
    pub fn stage_ref(&self) -> String {
        format!("@{}", self.stage)
    }
}
