//! Warehouse-side processing of the staged files.
//!
//! Step A copies the staged CSV files into the raw table; step B extracts
//! the text of each staged PDF with `PARSE_DOCUMENT` into the raw text
//! table. The statements either run over a session from this process or
//! are installed as the procedure the stage loader calls.

use std::fmt;

use tracing::{error, info};

use crate::config::Destination;
use crate::stage_loader::WarehouseSession;

/// Staged CSV files, plain or gzipped, in any letter case. Matches the
/// case-insensitive `ILIKE '%.pdf'` used for documents.
const CSV_PATTERN: &str = ".*[.][cC][sS][vV]([.][gG][zZ])?";

/// Result of a transformation, in the form the procedure returns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformStatus {
    Completed { target: String },
    /// The warehouse rejected a statement.
    SqlFailure { message: String },
    Unexpected { message: String },
}

impl TransformStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, TransformStatus::Completed { .. })
    }
}

impl fmt::Display for TransformStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformStatus::Completed { target } => {
                write!(f, "Transformation completed for {}", target)
            }
            TransformStatus::SqlFailure { message } => {
                write!(f, "SQL error during transformation: {}", message)
            }
            TransformStatus::Unexpected { message } => {
                write!(f, "Unexpected error during transformation: {}", message)
            }
        }
    }
}

pub struct Transformer {
    destination: Destination,
}

impl Transformer {
    pub fn new(destination: Destination) -> Self {
        Self { destination }
    }

    /// Step A: load every staged CSV, skipping one header row per file and
    /// dropping rows that fail to parse.
    pub fn copy_csv_statement(&self) -> String {
        format!(
            "COPY INTO {} FROM {} PATTERN = '{}' FILE_FORMAT = (TYPE = 'CSV' SKIP_HEADER = 1) ON_ERROR = 'CONTINUE'",
            self.destination.csv_table,
            self.destination.stage_ref(),
            CSV_PATTERN
        )
    }

    /// Make newly uploaded files visible in the stage directory table.
    pub fn refresh_statement(&self) -> String {
        format!("ALTER STAGE {} REFRESH", self.destination.stage)
    }

    /// Step B: one row of extracted text per staged PDF.
    pub fn extract_pdf_statement(&self) -> String {
        let stage = self.destination.stage_ref();
        format!(
            "INSERT INTO {table} (FILE_NAME, CONTENT) \
             SELECT RELATIVE_PATH, \
             TO_VARCHAR(SNOWFLAKE.CORTEX.PARSE_DOCUMENT({stage}, RELATIVE_PATH, {{'mode': 'LAYOUT'}}):content) \
             FROM DIRECTORY({stage}) \
             WHERE RELATIVE_PATH ILIKE '%.pdf'",
            table = self.destination.pdf_table,
            stage = stage
        )
    }

    pub fn statements(&self) -> Vec<String> {
        vec![
            self.copy_csv_statement(),
            self.refresh_statement(),
            self.extract_pdf_statement(),
        ]
    }

    /// Run both steps over `session`. Never fails: every error is folded
    /// into the returned status.
    pub async fn run<S: WarehouseSession>(&self, session: &mut S, target: &str) -> TransformStatus {
        for sql in self.statements() {
            if let Err(e) = session.execute(&sql).await {
                error!(error = %e, "transformation statement failed");
                return if e.is_sql() {
                    TransformStatus::SqlFailure {
                        message: e.to_string(),
                    }
                } else {
                    TransformStatus::Unexpected {
                        message: e.to_string(),
                    }
                };
            }
        }
        info!(label = %target, "transformation completed");
        TransformStatus::Completed {
            target: target.to_string(),
        }
    }

    /// Statements that create the stage and the text table if missing.
    ///
    /// The stage uses server-side encryption, which the built-in PUT
    /// transfer requires, and a directory table, which the PDF extraction reads.
    /// The CSV table is left to the caller since its columns follow the data.
    pub fn setup_statements(&self) -> Vec<String> {
        vec![
            format!(
                "CREATE STAGE IF NOT EXISTS {} ENCRYPTION = (TYPE = 'SNOWFLAKE_SSE') DIRECTORY = (ENABLE = TRUE)",
                self.destination.stage
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (FILE_NAME VARCHAR, CONTENT VARCHAR)",
                self.destination.pdf_table
            ),
        ]
    }

    /// `CREATE PROCEDURE` statement installing both steps as a Snowflake
    /// Scripting procedure with the same status strings as [`Transformer::run`].
    pub fn procedure_ddl(&self) -> String {
        let body: String = self
            .statements()
            .iter()
            .map(|sql| format!("    {};\n", sql))
            .collect();
        format!(
            "CREATE OR REPLACE PROCEDURE {name}(TARGET VARCHAR)\n\
             RETURNS VARCHAR\n\
             LANGUAGE SQL\n\
             EXECUTE AS CALLER\n\
             AS\n\
             $$\n\
             BEGIN\n\
             {body}    RETURN 'Transformation completed for ' || :TARGET;\n\
             EXCEPTION\n\
             \x20   WHEN STATEMENT_ERROR THEN\n\
             \x20       RETURN 'SQL error during transformation: ' || SQLERRM;\n\
             \x20   WHEN OTHER THEN\n\
             \x20       RETURN 'Unexpected error during transformation: ' || SQLERRM;\n\
             END;\n\
             $$",
            name = self.destination.procedure,
            body = body
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageLayout;

    fn transformer() -> Transformer {
        Transformer::new(Destination {
            database: "DOCS".to_string(),
            schema: "RAW".to_string(),
            stage: "DOCS.RAW.PDF_FILES_STAGE".to_string(),
            procedure: "DOCS.RAW.PROCESS_STAGED_FILES".to_string(),
            csv_table: "DOCS.RAW.RAW_CSV_DATA".to_string(),
            pdf_table: "DOCS.RAW.RAW_PDF_TEXT".to_string(),
            auto_compress: StageLayout::default().auto_compress,
            overwrite: true,
        })
    }

    #[test]
    fn test_copy_statement_skips_header_and_continues() {
        let sql = transformer().copy_csv_statement();
        assert!(sql.starts_with("COPY INTO DOCS.RAW.RAW_CSV_DATA FROM @DOCS.RAW.PDF_FILES_STAGE"));
        assert!(sql.contains(&format!("PATTERN = '{}'", CSV_PATTERN)));
        assert!(sql.contains("SKIP_HEADER = 1"));
        assert!(sql.contains("ON_ERROR = 'CONTINUE'"));
    }

    #[test]
    fn test_csv_pattern_ignores_case() {
        // COPY PATTERN must match the whole staged path.
        let pattern = regex::Regex::new(&format!("^{}$", CSV_PATTERN)).unwrap();
        for name in ["b.csv", "b.csv.gz", "DATA.CSV", "Report.Csv.GZ", "2024/q1.csv"] {
            assert!(pattern.is_match(name), "{}", name);
        }
        for name in ["a.pdf", "b.csv.bak", "csv", "b.tsv.gz"] {
            assert!(!pattern.is_match(name), "{}", name);
        }
    }

    #[test]
    fn test_pdf_statement_keys_by_relative_path() {
        let sql = transformer().extract_pdf_statement();
        assert!(sql.starts_with("INSERT INTO DOCS.RAW.RAW_PDF_TEXT (FILE_NAME, CONTENT) SELECT RELATIVE_PATH,"));
        assert!(sql.contains(
            "SNOWFLAKE.CORTEX.PARSE_DOCUMENT(@DOCS.RAW.PDF_FILES_STAGE, RELATIVE_PATH, {'mode': 'LAYOUT'}):content"
        ));
        assert!(sql.contains("FROM DIRECTORY(@DOCS.RAW.PDF_FILES_STAGE)"));
        assert!(sql.ends_with("WHERE RELATIVE_PATH ILIKE '%.pdf'"));
    }

    #[test]
    fn test_procedure_ddl() {
        let ddl = transformer().procedure_ddl();
        assert!(ddl.starts_with("CREATE OR REPLACE PROCEDURE DOCS.RAW.PROCESS_STAGED_FILES(TARGET VARCHAR)\n"));
        assert!(ddl.contains("    COPY INTO DOCS.RAW.RAW_CSV_DATA"));
        assert!(ddl.contains("    ALTER STAGE DOCS.RAW.PDF_FILES_STAGE REFRESH;\n"));
        assert!(ddl.contains("    WHEN STATEMENT_ERROR THEN\n"));
        assert!(ddl.contains("        RETURN 'Unexpected error during transformation: ' || SQLERRM;\n"));
        assert!(ddl.ends_with("END;\n$$"));
    }

    #[test]
    fn test_status_messages_are_distinct() {
        let ok = TransformStatus::Completed {
            target: "DOCS.RAW".to_string(),
        };
        assert_eq!(ok.to_string(), "Transformation completed for DOCS.RAW");
        let sql = TransformStatus::SqlFailure {
            message: "boom".to_string(),
        };
        let other = TransformStatus::Unexpected {
            message: "boom".to_string(),
        };
        assert!(sql.to_string().starts_with("SQL error"));
        assert!(other.to_string().starts_with("Unexpected error"));
    }
}
