//! Snowflake session over the connector REST protocol.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::WarehouseConfig;
use crate::error::{Error, Result};
use crate::snowflake::models::{
    Binding, ClientEnvironment, Envelope, LoginData, LoginRequest, LoginResponseData,
    QueryRequest, QueryResponseData,
};
use crate::snowflake::transfer::{self, PutOptions, StageStore};
use crate::stage_loader::{PutSummary, QueryResult, Warehouse, WarehouseSession};

const CLIENT_APP_ID: &str = "drive_stage";

/// Codes returned while a statement is still running.
const QUERY_IN_PROGRESS: &[&str] = &["333333", "333334"];

/// Delay between polls of a running statement.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Opens sessions against one Snowflake account.
pub struct Snowflake {
    config: WarehouseConfig,
    http: Client,
    storage_url: Option<String>,
}

impl Snowflake {
    pub fn new(config: WarehouseConfig) -> Self {
        Self {
            config,
            http: Client::new(),
            storage_url: None,
        }
    }

    /// Send stage file transfers to this endpoint instead of the cloud
    /// storage service named by the stage (for testing).
    pub fn with_storage_url(mut self, url: impl Into<String>) -> Self {
        self.storage_url = Some(url.into());
        self
    }

    /// Log in with user and password and return an open session.
    pub async fn login(&self) -> Result<SnowflakeSession> {
        let base_url = self.config.base_url();
        info!(account = %self.config.account, user = %self.config.user, "connecting to Snowflake");

        let mut session_parameters = BTreeMap::new();
        session_parameters.insert("QUERY_RESULT_FORMAT".to_string(), Value::from("JSON"));
        let body = LoginRequest {
            data: LoginData {
                client_app_id: CLIENT_APP_ID.to_string(),
                client_app_version: env!("CARGO_PKG_VERSION").to_string(),
                account_name: self.config.account_name().to_string(),
                login_name: self.config.user.clone(),
                password: self.config.password.clone(),
                client_environment: ClientEnvironment {
                    application: CLIENT_APP_ID.to_string(),
                    os: std::env::consts::OS.to_string(),
                },
                session_parameters,
            },
        };

        let request_id = Uuid::new_v4().to_string();
        let mut params = vec![
            ("request_id", request_id.as_str()),
            ("warehouse", self.config.warehouse.as_str()),
            ("databaseName", self.config.database.as_str()),
            ("schemaName", self.config.schema.as_str()),
        ];
        if let Some(role) = self.config.role.as_deref() {
            params.push(("roleName", role));
        }

        let response = with_headers(self.http.post(format!("{}/session/v1/login-request", base_url)))
            .query(&params)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Connection(format!("login returned HTTP {}: {}", status, body)));
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| Error::Connection(format!("unreadable login response: {}", e)))?;
        if !envelope.success {
            return Err(Error::Connection(format!(
                "{} ({})",
                envelope.message.unwrap_or_else(|| "login rejected".to_string()),
                envelope.code.unwrap_or_default()
            )));
        }
        let data: LoginResponseData = serde_json::from_value(envelope.data.unwrap_or_default())
            .map_err(|e| Error::Connection(format!("login response without token: {}", e)))?;

        debug!(session_id = ?data.session_id, "Snowflake session opened");
        Ok(SnowflakeSession {
            http: self.http.clone(),
            base_url,
            token: data.token,
            sequence_id: 0,
            storage_url: self.storage_url.clone(),
        })
    }
}

#[async_trait]
impl Warehouse for Snowflake {
    type Session = SnowflakeSession;

    async fn connect(&self) -> Result<SnowflakeSession> {
        self.login().await
    }
}

/// An authenticated session; statements run one at a time.
pub struct SnowflakeSession {
    http: Client,
    base_url: String,
    token: String,
    sequence_id: u64,
    storage_url: Option<String>,
}

impl SnowflakeSession {
    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        with_headers(request).header(AUTHORIZATION, format!("Snowflake Token=\"{}\"", self.token))
    }

    /// Run one statement and wait for it to finish.
    async fn query(
        &mut self,
        sql: &str,
        bindings: Option<BTreeMap<String, Binding>>,
    ) -> Result<QueryResponseData> {
        self.sequence_id += 1;
        let submitted = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let body = QueryRequest {
            sql_text: sql,
            async_exec: false,
            sequence_id: self.sequence_id,
            query_submission_time: submitted,
            bindings,
        };

        debug!(sql, "executing statement");
        let request_id = Uuid::new_v4().to_string();
        let response = self
            .authorized(self.http.post(format!("{}/queries/v1/query-request", self.base_url)))
            .query(&[("requestId", request_id.as_str())])
            .json(&body)
            .send()
            .await?;
        let mut envelope = read_envelope(response).await?;

        while envelope
            .code
            .as_deref()
            .is_some_and(|code| QUERY_IN_PROGRESS.contains(&code))
        {
            let data: QueryResponseData = parse_data(envelope.data.take())?;
            let result_url = data.get_result_url.ok_or_else(|| {
                Error::Protocol("statement in progress without a result URL".to_string())
            })?;
            tokio::time::sleep(POLL_INTERVAL).await;
            let response = self
                .authorized(self.http.get(format!("{}{}", self.base_url, result_url)))
                .send()
                .await?;
            envelope = read_envelope(response).await?;
        }

        if !envelope.success {
            let data: QueryResponseData = parse_data(envelope.data).unwrap_or_default();
            let message = envelope
                .message
                .unwrap_or_else(|| "statement failed".to_string());
            return match envelope.code {
                Some(code) => Err(Error::Sql {
                    code,
                    sql_state: data.sql_state.unwrap_or_default(),
                    message,
                }),
                None => Err(Error::Protocol(message)),
            };
        }

        parse_data(envelope.data)
    }
}

#[async_trait]
impl WarehouseSession for SnowflakeSession {
    async fn execute(&mut self, sql: &str) -> Result<QueryResult> {
        let data = self.query(sql, None).await?;
        Ok(QueryResult {
            query_id: data.query_id.unwrap_or_default(),
            columns: data.rowtype.into_iter().map(|c| c.name).collect(),
            rows: data.rowset,
        })
    }

    async fn put(&mut self, source: &str, stage_ref: &str, options: PutOptions) -> Result<PutSummary> {
        let sql = transfer::put_command(source, stage_ref, options);
        let data = self.query(&sql, None).await?;

        if data.encryption_material.as_ref().is_some_and(|m| !m.is_null()) {
            return Err(Error::UnsupportedStage(
                "stage requires client-side encryption; recreate it with ENCRYPTION = (TYPE = 'SNOWFLAKE_SSE')"
                    .to_string(),
            ));
        }
        let stage_info = data
            .stage_info
            .ok_or_else(|| Error::Protocol("PUT response without stage information".to_string()))?;
        let store = StageStore::from_stage_info(&stage_info, &self.http, self.storage_url.as_deref())?;

        let locations = if data.src_locations.is_empty() {
            vec![source.to_string()]
        } else {
            data.src_locations
        };
        let files = transfer::expand_sources(&locations)?;
        if files.is_empty() {
            return Err(Error::Stage(format!("no local files match {}", source)));
        }

        let mut summary = PutSummary::default();
        for path in files {
            let prepared = transfer::prepare_file(&path, options.auto_compress).await?;
            if !options.overwrite && store.exists(&prepared.name).await? {
                info!(file = %prepared.name, "already staged; skipping");
                summary.skipped.push(prepared.name);
                continue;
            }
            let name = prepared.name.clone();
            store.upload(prepared).await?;
            info!(file = %name, stage = %stage_ref, "staged");
            summary.uploaded.push(name);
        }
        Ok(summary)
    }

    async fn call(&mut self, procedure: &str, argument: &str) -> Result<Option<String>> {
        let mut bindings = BTreeMap::new();
        bindings.insert("1".to_string(), Binding::text(argument));
        let data = self
            .query(&format!("CALL {}(?)", procedure), Some(bindings))
            .await?;
        Ok(data
            .rowset
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .flatten())
    }

    async fn close(self) -> Result<()> {
        let response = self
            .authorized(self.http.post(format!("{}/session", self.base_url)))
            .query(&[("delete", "true")])
            .send()
            .await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "Snowflake logout was not acknowledged");
        } else {
            debug!("Snowflake session closed");
        }
        Ok(())
    }
}

fn with_headers(request: RequestBuilder) -> RequestBuilder {
    request
        .header(ACCEPT, "application/snowflake")
        .header(CONTENT_TYPE, "application/json")
        .header(USER_AGENT, concat!("drive_stage/", env!("CARGO_PKG_VERSION")))
}

async fn read_envelope(response: reqwest::Response) -> Result<Envelope> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Protocol(format!("HTTP {}: {}", status, body)));
    }
    Ok(response.json().await?)
}

fn parse_data(data: Option<Value>) -> Result<QueryResponseData> {
    match data {
        Some(value) if !value.is_null() => Ok(serde_json::from_value(value)?),
        _ => Ok(QueryResponseData::default()),
    }
}

#[cfg(test)]
mod tests {
    // Tests are in tests/snowflake_test.rs
}
