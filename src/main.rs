//! drive-stage CLI - load a Drive folder into a Snowflake stage.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use drive_stage::{
    pipeline, Authenticator, Downloader, DriveClient, DriveConfig, RunReport, Snowflake,
    StageLayout, StepOutcome, Transformer, WarehouseConfig, WarehouseSession,
};

/// Default env file, read before parsing arguments.
const DEFAULT_ENV_FILE: &str = "ignore.env";

/// Move files from a Google Drive folder into a Snowflake stage.
#[derive(Parser)]
#[command(name = "drive-stage")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the folder, stage the files and call the procedure.
    Run {
        #[command(flatten)]
        drive: DriveConfig,

        #[command(flatten)]
        warehouse: WarehouseConfig,

        #[command(flatten)]
        layout: StageLayout,

        /// Exit with status 1 when any step or file failed.
        #[arg(long)]
        fail_on_error: bool,
    },

    /// List the files a run would download.
    List {
        #[command(flatten)]
        drive: DriveConfig,
    },

    /// Run the CSV load and PDF extraction directly and print the status.
    Transform {
        #[command(flatten)]
        warehouse: WarehouseConfig,

        #[command(flatten)]
        layout: StageLayout,
    },

    /// Create the stage and text table, and install the procedure.
    Deploy {
        #[command(flatten)]
        warehouse: WarehouseConfig,

        #[command(flatten)]
        layout: StageLayout,

        /// Print the statements instead of executing them.
        #[arg(long)]
        print: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let env_file =
        std::env::var("DRIVE_STAGE_ENV_FILE").unwrap_or_else(|_| DEFAULT_ENV_FILE.to_string());
    match dotenvy::from_filename(&env_file) {
        Ok(_) => {}
        Err(e) if e.not_found() => {}
        Err(e) => return Err(e).with_context(|| format!("Failed to read env file {}", env_file)),
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drive_stage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            drive,
            warehouse,
            layout,
            fail_on_error,
        } => {
            println!("--- START: Drive -> Snowflake stage ---");
            let report = pipeline::run_job(&drive, warehouse, &layout).await;
            print_report(&report);
            println!("--- DONE ---");

            if fail_on_error && report.has_failures() {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::List { drive } => {
            let auth = Authenticator::from_file(&drive.credentials)
                .with_context(|| format!("Failed to load credentials from {:?}", drive.credentials))?;
            let downloader = Downloader::new(DriveClient::new(auth), &drive.temp_dir);

            let files = downloader
                .list(&drive.folder)
                .await
                .with_context(|| format!("Failed to list files in folder: {}", drive.folder))?;

            if files.is_empty() {
                println!("No files found.");
            } else {
                println!("{:<44} {:>10} {:<30} {}", "ID", "SIZE", "TYPE", "NAME");
                println!("{}", "-".repeat(100));
                for file in files {
                    println!("{}", file);
                }
            }
        }

        Commands::Transform { warehouse, layout } => {
            let destination = layout.resolve(&warehouse);
            let mut session = Snowflake::new(warehouse)
                .login()
                .await
                .context("Failed to connect to Snowflake")?;

            let status = Transformer::new(destination.clone())
                .run(&mut session, &destination.label())
                .await;
            if let Err(e) = session.close().await {
                tracing::warn!(error = %e, "failed to close Snowflake session");
            }

            println!("{}", status);
            if !status.is_completed() {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Deploy {
            warehouse,
            layout,
            print,
        } => {
            let transformer = Transformer::new(layout.resolve(&warehouse));
            let mut statements = transformer.setup_statements();
            statements.push(transformer.procedure_ddl());

            if print {
                for sql in &statements {
                    println!("{};\n", sql);
                }
                return Ok(ExitCode::SUCCESS);
            }

            let mut session = Snowflake::new(warehouse)
                .login()
                .await
                .context("Failed to connect to Snowflake")?;

            let mut result: Result<()> = Ok(());
            for sql in &statements {
                if let Err(e) = session.execute(sql).await {
                    result = Err(e).with_context(|| format!("Statement failed: {}", sql));
                    break;
                }
            }
            if let Err(e) = session.close().await {
                tracing::warn!(error = %e, "failed to close Snowflake session");
            }
            result?;

            println!("Deployed {}", transformer.procedure_ddl().lines().next().unwrap_or_default());
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &RunReport) {
    match &report.download {
        StepOutcome::Completed(download) => {
            println!("Downloaded {} file(s)", download.downloaded.len());
            for (name, reason) in &download.failed {
                println!("  FAILED {}: {}", name, reason);
            }
        }
        other => println!("Download {}", other),
    }

    match &report.load {
        StepOutcome::Completed(load) => {
            println!("Staged {} file(s)", load.staged.len());
            if !load.skipped.is_empty() {
                println!("  already staged: {}", load.skipped.join(", "));
            }
            if let Some(result) = &load.procedure_result {
                println!("Procedure: {}", result);
            }
        }
        other => println!("Stage load {}", other),
    }

    if !report.cleaned_up {
        println!("Temporary directory could not be removed");
    }
}
