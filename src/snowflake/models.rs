//! Request and response bodies of the Snowflake session protocol.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub data: LoginData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct LoginData {
    pub client_app_id: String,
    pub client_app_version: String,
    pub account_name: String,
    pub login_name: String,
    pub password: String,
    pub client_environment: ClientEnvironment,
    pub session_parameters: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ClientEnvironment {
    pub application: String,
    pub os: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponseData {
    pub token: String,
    #[serde(default)]
    pub master_token: Option<String>,
    #[serde(default)]
    pub session_id: Option<u64>,
}

/// Envelope shared by every Snowflake REST response.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest<'a> {
    pub sql_text: &'a str,
    pub async_exec: bool,
    pub sequence_id: u64,
    pub query_submission_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bindings: Option<BTreeMap<String, Binding>>,
}

/// A positional bind value.
#[derive(Debug, Serialize)]
pub struct Binding {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub value: String,
}

impl Binding {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            kind: "TEXT",
            value: value.into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponseData {
    #[serde(default)]
    pub query_id: Option<String>,
    #[serde(default)]
    pub sql_state: Option<String>,
    #[serde(default)]
    pub rowtype: Vec<RowType>,
    #[serde(default)]
    pub rowset: Vec<Vec<Option<String>>>,
    #[serde(default)]
    pub get_result_url: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub stage_info: Option<StageInfo>,
    #[serde(default, rename = "src_locations")]
    pub src_locations: Vec<String>,
    #[serde(default)]
    pub encryption_material: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RowType {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Where a stage keeps its files, as returned for a PUT command.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageInfo {
    pub location_type: String,
    /// `<bucket or container>/<path>/`
    pub location: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub storage_account: Option<String>,
    #[serde(default)]
    pub end_point: Option<String>,
    #[serde(default)]
    pub is_client_side_encrypted: bool,
    #[serde(default)]
    pub creds: StageCredentials,
}

impl StageInfo {
    /// Split `location` into the bucket (or container) and a key prefix
    /// that is either empty or ends with `/`.
    pub fn bucket_and_prefix(&self) -> (String, String) {
        let location = self.location.trim_start_matches('/');
        match location.split_once('/') {
            Some((bucket, path)) if !path.is_empty() => {
                let prefix = if path.ends_with('/') {
                    path.to_string()
                } else {
                    format!("{}/", path)
                };
                (bucket.to_string(), prefix)
            }
            Some((bucket, _)) => (bucket.to_string(), String::new()),
            None => (location.to_string(), String::new()),
        }
    }
}

/// Temporary credentials scoped to the stage location.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct StageCredentials {
    #[serde(default)]
    pub aws_key_id: Option<String>,
    #[serde(default)]
    pub aws_secret_key: Option<String>,
    #[serde(default)]
    pub aws_token: Option<String>,
    #[serde(default)]
    pub azure_sas_token: Option<String>,
    #[serde(default)]
    pub gcs_access_token: Option<String>,
}
