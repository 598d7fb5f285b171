//! Google Drive API client for reading a source folder.

use std::path::Path;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::auth::Authenticator;
use crate::downloader::FileSource;
use crate::error::{Error, Result};
use crate::models::{ApiErrorResponse, FileListResponse, RemoteFile, FOLDER_MIME_TYPE};

/// Base URL for Google Drive API v3.
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

const LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType, trashed, size)";

/// Read-only client for the files in one Drive folder.
pub struct DriveClient {
    auth: Authenticator,
    http: Client,
    api_base: String,
}

impl DriveClient {
    pub fn new(auth: Authenticator) -> Self {
        Self {
            auth,
            http: Client::new(),
            api_base: DRIVE_API_BASE.to_string(),
        }
    }

    /// Point the client at another API root, e.g. a local mock server.
    pub fn with_base_url(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Query string selecting the regular, non-trashed files directly under a folder.
    pub fn folder_query(folder_id: &str) -> String {
        format!(
            "'{}' in parents and mimeType != '{}' and trashed = false",
            folder_id.replace('\'', "\\'"),
            FOLDER_MIME_TYPE
        )
    }

    /// List every file directly under `folder_id`, following pagination.
    pub async fn list_folder(&self, folder_id: &str) -> Result<Vec<RemoteFile>> {
        let token = self.auth.get_access_token().await?;
        let query = Self::folder_query(folder_id);
        let mut all_files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(format!("{}/files", self.api_base))
                .bearer_auth(&token)
                .query(&[
                    ("q", query.as_str()),
                    ("fields", LIST_FIELDS),
                    ("supportsAllDrives", "true"),
                    ("includeItemsFromAllDrives", "true"),
                    ("pageSize", "1000"),
                ]);

            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let response = check_status(request.send().await?).await?;
            let list_response: FileListResponse = response.json().await?;
            debug!(count = list_response.files.len(), "received file list page");
            all_files.extend(list_response.files);

            match list_response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(all_files)
    }

    /// Stream a file's content to `destination`, returning the bytes written.
    pub async fn download_file(&self, file_id: &str, destination: &Path) -> Result<u64> {
        let token = self.auth.get_access_token().await?;

        let response = self
            .http
            .get(format!("{}/files/{}", self.api_base, file_id))
            .bearer_auth(&token)
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            .send()
            .await?;
        let response = check_status(response).await?;

        let mut file = File::create(destination).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        Ok(written)
    }
}

/// Turn a non-success response into a `DriveApi` error, preferring the
/// structured message Google returns.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_body = response.text().await.unwrap_or_default();
    if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(&error_body) {
        return Err(Error::DriveApi {
            status: api_error.error.code,
            message: api_error.error.message,
        });
    }
    Err(Error::DriveApi {
        status: status.as_u16(),
        message: error_body,
    })
}

#[async_trait]
impl FileSource for DriveClient {
    async fn list(&self, folder_id: &str) -> Result<Vec<RemoteFile>> {
        self.list_folder(folder_id).await
    }

    async fn download(&self, file: &RemoteFile, destination: &Path) -> Result<u64> {
        self.download_file(&file.id, destination).await
    }
}
