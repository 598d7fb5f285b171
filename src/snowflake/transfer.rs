//! Client side of the PUT command: uploads local files into the storage
//! location behind a stage.

use std::io::Write;
use std::path::{Path, PathBuf};

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::{Client, Url};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::snowflake::models::StageInfo;

/// Extensions stored as they are when auto-compressing: already compressed
/// formats, and documents that are parsed in place by the warehouse.
const STORE_AS_IS: &[&str] = &["gz", "bz2", "zst", "br", "zip", "deflate", "pdf"];

const GCS_ROOT: &str = "https://storage.googleapis.com";

/// Options of the PUT command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOptions {
    pub auto_compress: bool,
    pub overwrite: bool,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            auto_compress: true,
            overwrite: true,
        }
    }
}

/// Render the PUT statement for `source` (a local path or glob).
pub fn put_command(source: &str, stage_ref: &str, options: PutOptions) -> String {
    format!(
        "PUT 'file://{}' {} AUTO_COMPRESS={} OVERWRITE={}",
        source.replace('\\', "/").replace('\'', "\\'"),
        stage_ref,
        upper(options.auto_compress),
        upper(options.overwrite)
    )
}

fn upper(value: bool) -> &'static str {
    if value {
        "TRUE"
    } else {
        "FALSE"
    }
}

/// Whether auto-compress should gzip the file with this name.
pub fn should_compress(name: &str) -> bool {
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some(ext) => !STORE_AS_IS.contains(&ext.to_ascii_lowercase().as_str()),
        None => true,
    }
}

/// Expand the source locations of a PUT into the files they match.
pub fn expand_sources(locations: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for location in locations {
        let pattern = location.strip_prefix("file://").unwrap_or(location);
        for entry in glob::glob(pattern)? {
            match entry {
                Ok(path) if path.is_file() => files.push(path),
                Ok(_) => {}
                Err(e) => return Err(Error::Io(e.into_error())),
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// A file ready to be written into the stage.
#[derive(Debug)]
pub struct PreparedFile {
    /// Name the file gets in the stage.
    pub name: String,
    pub content: Vec<u8>,
    /// Base64 SHA-256 of `content`.
    pub digest: String,
    pub content_type: String,
}

/// Read a local file and compress it when requested.
pub async fn prepare_file(path: &Path, auto_compress: bool) -> Result<PreparedFile> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Stage(format!("unusable file name: {}", path.display())))?
        .to_string();
    let raw = tokio::fs::read(path).await?;

    let (name, content, content_type) = if auto_compress && should_compress(&name) {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw)?;
        (format!("{}.gz", name), encoder.finish()?, "application/gzip".to_string())
    } else {
        let content_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string();
        (name, raw, content_type)
    };

    let digest = BASE64.encode(Sha256::digest(&content));
    Ok(PreparedFile {
        name,
        content,
        digest,
        content_type,
    })
}

/// Writer for the cloud storage behind a stage.
pub enum StageStore {
    S3 {
        client: aws_sdk_s3::Client,
        bucket: String,
        prefix: String,
    },
    Azure {
        http: Client,
        /// Container path the stage files live under.
        folder: Url,
        sas_token: String,
    },
    Gcs {
        http: Client,
        folder: Url,
        access_token: String,
    },
}

impl StageStore {
    /// Build the writer for the location a PUT returned.
    ///
    /// `storage_root` replaces the storage service endpoint
    /// (`https://<account>.blob.core.windows.net`, `https://storage.googleapis.com`
    /// or the S3 regional endpoint).
    pub fn from_stage_info(
        info: &StageInfo,
        http: &Client,
        storage_root: Option<&str>,
    ) -> Result<Self> {
        if info.is_client_side_encrypted {
            return Err(Error::UnsupportedStage(
                "stage uses client-side encryption; recreate it with ENCRYPTION = (TYPE = 'SNOWFLAKE_SSE')"
                    .to_string(),
            ));
        }

        let (bucket, prefix) = info.bucket_and_prefix();
        let creds = &info.creds;
        match info.location_type.to_ascii_uppercase().as_str() {
            "S3" => {
                let (Some(key_id), Some(secret)) = (&creds.aws_key_id, &creds.aws_secret_key) else {
                    return Err(Error::Stage("S3 stage returned without credentials".to_string()));
                };
                let credentials = Credentials::new(
                    key_id.clone(),
                    secret.clone(),
                    creds.aws_token.clone(),
                    None,
                    "snowflake-stage",
                );
                let mut builder = aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .region(Region::new(
                        info.region.clone().unwrap_or_else(|| "us-east-1".to_string()),
                    ))
                    .credentials_provider(credentials);
                if let Some(root) = storage_root {
                    builder = builder.endpoint_url(root).force_path_style(true);
                } else if let Some(endpoint) = info.end_point.as_deref().filter(|e| !e.is_empty()) {
                    builder = builder.endpoint_url(format!("https://{}", endpoint));
                }
                Ok(StageStore::S3 {
                    client: aws_sdk_s3::Client::from_conf(builder.build()),
                    bucket,
                    prefix,
                })
            }
            "AZURE" => {
                let account = info.storage_account.as_deref().ok_or_else(|| {
                    Error::Stage("Azure stage returned without storage account".to_string())
                })?;
                let sas_token = creds.azure_sas_token.clone().ok_or_else(|| {
                    Error::Stage("Azure stage returned without SAS token".to_string())
                })?;
                let root = match storage_root {
                    Some(root) => root.to_string(),
                    None => {
                        let endpoint = info
                            .end_point
                            .as_deref()
                            .filter(|e| !e.is_empty())
                            .unwrap_or("blob.core.windows.net");
                        format!("https://{}.{}", account, endpoint)
                    }
                };
                Ok(StageStore::Azure {
                    http: http.clone(),
                    folder: folder_url(&root, &bucket, &prefix)?,
                    sas_token: sas_token.trim_start_matches('?').to_string(),
                })
            }
            "GCS" => {
                let access_token = creds.gcs_access_token.clone().ok_or_else(|| {
                    Error::UnsupportedStage(
                        "GCS stage without an access token (presigned uploads are not supported)"
                            .to_string(),
                    )
                })?;
                Ok(StageStore::Gcs {
                    http: http.clone(),
                    folder: folder_url(storage_root.unwrap_or(GCS_ROOT), &bucket, &prefix)?,
                    access_token,
                })
            }
            other => Err(Error::UnsupportedStage(format!("location type {}", other))),
        }
    }

    /// Whether a file with this name is already in the stage.
    pub async fn exists(&self, name: &str) -> Result<bool> {
        match self {
            StageStore::S3 {
                client,
                bucket,
                prefix,
            } => {
                let result = client
                    .head_object()
                    .bucket(bucket)
                    .key(format!("{}{}", prefix, name))
                    .send()
                    .await;
                match result {
                    Ok(_) => Ok(true),
                    Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
                    Err(e) => Err(Error::Stage(DisplayErrorContext(e).to_string())),
                }
            }
            StageStore::Azure {
                http,
                folder,
                sas_token,
            } => {
                let response = http
                    .head(object_url(folder, name, Some(sas_token.as_str()))?)
                    .send()
                    .await?;
                head_exists(response.status())
            }
            StageStore::Gcs {
                http,
                folder,
                access_token,
            } => {
                let response = http
                    .head(object_url(folder, name, None)?)
                    .bearer_auth(access_token)
                    .send()
                    .await?;
                head_exists(response.status())
            }
        }
    }

    /// Write one file, replacing any file with the same name.
    pub async fn upload(&self, file: PreparedFile) -> Result<()> {
        match self {
            StageStore::S3 {
                client,
                bucket,
                prefix,
            } => {
                client
                    .put_object()
                    .bucket(bucket)
                    .key(format!("{}{}", prefix, file.name))
                    .content_type(file.content_type)
                    .metadata("sfc-digest", file.digest)
                    .body(ByteStream::from(file.content))
                    .send()
                    .await
                    .map_err(|e| Error::Stage(DisplayErrorContext(e).to_string()))?;
                Ok(())
            }
            StageStore::Azure {
                http,
                folder,
                sas_token,
            } => {
                let response = http
                    .put(object_url(folder, &file.name, Some(sas_token.as_str()))?)
                    .header("x-ms-blob-type", "BlockBlob")
                    .header("x-ms-meta-sfcdigest", file.digest)
                    .header("Content-Type", file.content_type)
                    .body(file.content)
                    .send()
                    .await?;
                check_upload(&file.name, response).await
            }
            StageStore::Gcs {
                http,
                folder,
                access_token,
            } => {
                let response = http
                    .put(object_url(folder, &file.name, None)?)
                    .bearer_auth(access_token)
                    .header("x-goog-meta-sfc-digest", file.digest)
                    .header("Content-Type", file.content_type)
                    .body(file.content)
                    .send()
                    .await?;
                check_upload(&file.name, response).await
            }
        }
    }
}

/// `<root>/<bucket>/<prefix segments>`, each segment percent-encoded.
fn folder_url(root: &str, bucket: &str, prefix: &str) -> Result<Url> {
    let mut url = Url::parse(root)
        .map_err(|e| Error::Stage(format!("invalid storage endpoint {}: {}", root, e)))?;
    url.path_segments_mut()
        .map_err(|_| Error::Stage(format!("invalid storage endpoint {}", root)))?
        .pop_if_empty()
        .push(bucket)
        .extend(prefix.split('/').filter(|s| !s.is_empty()));
    Ok(url)
}

/// URL of one object under `folder`. The name is a single path segment, so
/// `#`, `?` and `%` in file names stay part of the object name.
fn object_url(folder: &Url, name: &str, query: Option<&str>) -> Result<Url> {
    let mut url = folder.clone();
    url.path_segments_mut()
        .map_err(|_| Error::Stage(format!("cannot address objects under {}", folder)))?
        .push(name);
    url.set_query(query);
    Ok(url)
}

fn head_exists(status: reqwest::StatusCode) -> Result<bool> {
    if status.is_success() {
        Ok(true)
    } else if status == reqwest::StatusCode::NOT_FOUND {
        Ok(false)
    } else {
        Err(Error::Stage(format!("existence check returned HTTP {}", status)))
    }
}

async fn check_upload(name: &str, response: reqwest::Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Stage(format!("upload of {} returned HTTP {}: {}", name, status, body)))
}
