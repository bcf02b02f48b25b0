use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;

pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
pub const GOOGLE_DOC_MIME: &str = "application/vnd.google-apps.document";

pub const DRIVE_BASE_URL: &str = "https://www.googleapis.com/drive/v3";
pub const DRIVE_UPLOAD_BASE_URL: &str = "https://www.googleapis.com/upload/drive/v3";

#[derive(Debug, Error)]
pub enum StorageError {
    /// 5xx from the storage API; worth retrying.
    #[error("storage server error ({status}): {message}")]
    Transient { status: u16, message: String },

    #[error("storage API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("storage network error: {0}")]
    Network(String),

    #[error("storage I/O error: {0}")]
    Io(String),

    #[error("invalid storage response: {0}")]
    InvalidResponse(String),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient { .. })
    }

    fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        if status.is_server_error() {
            StorageError::Transient {
                status: status.as_u16(),
                message,
            }
        } else {
            StorageError::Api {
                status: status.as_u16(),
                message,
            }
        }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        StorageError::Network(err.to_string())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

/// A hierarchical folder/document store. `parent: None` means the store's top level.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_folder(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<Option<String>, StorageError>;

    async fn create_folder(&self, name: &str, parent: Option<&str>)
    -> Result<String, StorageError>;

    async fn create_document(
        &self,
        name: &str,
        parent: &str,
        mime_type: &str,
        content: &str,
    ) -> Result<String, StorageError>;
}

/// Returns the id of folder `name` under `parent`, creating it only when absent.
pub async fn ensure_folder(
    store: &dyn DocumentStore,
    name: &str,
    parent: Option<&str>,
) -> Result<String, StorageError> {
    if let Some(id) = store.find_folder(name, parent).await? {
        return Ok(id);
    }
    let id = store.create_folder(name, parent).await?;
    tracing::info!(folder = name, parent = ?parent, id = %id, "created folder");
    Ok(id)
}

/// Mirrors the hierarchy as directories; folder ids are paths relative to `root`.
#[derive(Debug, Clone)]
pub struct LocalFsStore {
    root: PathBuf,
}

impl LocalFsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn child_id(&self, name: &str, parent: Option<&str>) -> Result<String, StorageError> {
        let name = sanitize_file_name(name);
        if name.is_empty() {
            return Err(StorageError::Io("empty file name".to_owned()));
        }
        Ok(match parent {
            Some(parent) => format!("{parent}/{name}"),
            None => name,
        })
    }

    fn resolve(&self, id: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(id);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::Io(format!("folder id escapes root: {id}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl DocumentStore for LocalFsStore {
    async fn find_folder(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<Option<String>, StorageError> {
        let id = self.child_id(name, parent)?;
        let exists = fs::metadata(self.resolve(&id)?)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        Ok(exists.then_some(id))
    }

    async fn create_folder(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<String, StorageError> {
        let id = self.child_id(name, parent)?;
        fs::create_dir_all(self.resolve(&id)?).await?;
        Ok(id)
    }

    async fn create_document(
        &self,
        name: &str,
        parent: &str,
        _mime_type: &str,
        content: &str,
    ) -> Result<String, StorageError> {
        let id = self.child_id(name, Some(parent))?;
        let path = self.resolve(&id)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        fs::write(&path, content).await?;
        Ok(id)
    }
}

fn sanitize_file_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect::<String>()
        .trim_matches('.')
        .to_owned()
}

/// Where Drive access tokens come from.
#[derive(Debug, Clone)]
pub enum TokenSource {
    Static(String),
    /// GCE/Cloud Run metadata server for the attached service account.
    Metadata,
}

impl TokenSource {
    pub fn from_env() -> Self {
        match std::env::var("GOOGLE_DRIVE_ACCESS_TOKEN") {
            Ok(token) if !token.trim().is_empty() => TokenSource::Static(token.trim().to_owned()),
            _ => TokenSource::Metadata,
        }
    }
}

/// Google Drive v3 over REST. Every call sets `supportsAllDrives` so shared drives work
/// as roots.
#[derive(Debug, Clone)]
pub struct DriveStore {
    client: reqwest::Client,
    base_url: String,
    upload_base_url: String,
    tokens: TokenSource,
}

impl DriveStore {
    pub fn new(base_url: &str, upload_base_url: &str, tokens: TokenSource) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            upload_base_url: upload_base_url.trim_end_matches('/').to_owned(),
            tokens,
        }
    }

    async fn access_token(&self) -> Result<String, StorageError> {
        #[derive(Debug, serde::Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        match &self.tokens {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Metadata => {
                let url = "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
                let resp = self
                    .client
                    .get(url)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await?;
                let status = resp.status();
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(StorageError::from_status(
                        status,
                        format!("metadata token request failed: {body}"),
                    ));
                }
                let token: TokenResponse = resp.json().await?;
                Ok(token.access_token)
            }
        }
    }

    async fn read_id(resp: reqwest::Response) -> Result<String, StorageError> {
        #[derive(Debug, serde::Deserialize)]
        struct Created {
            id: String,
        }

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(StorageError::from_status(status, body));
        }
        let created: Created = serde_json::from_str(&body)
            .map_err(|err| StorageError::InvalidResponse(format!("{err}: {body}")))?;
        Ok(created.id)
    }
}

#[async_trait]
impl DocumentStore for DriveStore {
    async fn find_folder(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<Option<String>, StorageError> {
        #[derive(Debug, serde::Deserialize)]
        struct FileList {
            #[serde(default)]
            files: Vec<FileRef>,
        }
        #[derive(Debug, serde::Deserialize)]
        struct FileRef {
            id: String,
        }

        let token = self.access_token().await?;
        let query = folder_query(name, parent);
        let resp = self
            .client
            .get(format!("{}/files", self.base_url))
            .bearer_auth(token)
            .query(&[
                ("q", query.as_str()),
                ("fields", "files(id)"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(StorageError::from_status(status, body));
        }
        let list: FileList = serde_json::from_str(&body)
            .map_err(|err| StorageError::InvalidResponse(format!("{err}: {body}")))?;
        Ok(list.files.into_iter().next().map(|f| f.id))
    }

    async fn create_folder(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<String, StorageError> {
        let token = self.access_token().await?;
        let mut metadata = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME,
        });
        if let Some(parent) = parent {
            metadata["parents"] = serde_json::json!([parent]);
        }

        let resp = self
            .client
            .post(format!("{}/files", self.base_url))
            .bearer_auth(token)
            .query(&[("supportsAllDrives", "true"), ("fields", "id")])
            .json(&metadata)
            .send()
            .await?;
        Self::read_id(resp).await
    }

    async fn create_document(
        &self,
        name: &str,
        parent: &str,
        mime_type: &str,
        content: &str,
    ) -> Result<String, StorageError> {
        let token = self.access_token().await?;
        let metadata = serde_json::json!({
            "name": name,
            "parents": [parent],
            "mimeType": mime_type,
        });
        let media_type = if mime_type == GOOGLE_DOC_MIME {
            "text/html"
        } else {
            mime_type
        };

        let boundary = format!("postsort-{}", uuid::Uuid::new_v4().simple());
        let body = multipart_related_body(&boundary, &metadata.to_string(), media_type, content);

        let resp = self
            .client
            .post(format!("{}/files", self.upload_base_url))
            .bearer_auth(token)
            .query(&[
                ("uploadType", "multipart"),
                ("supportsAllDrives", "true"),
                ("fields", "id"),
            ])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await?;
        Self::read_id(resp).await
    }
}

/// Drive query selecting non-trashed folders named `name`, optionally under `parent`.
pub fn folder_query(name: &str, parent: Option<&str>) -> String {
    let mut query = format!(
        "name = '{}' and mimeType = '{FOLDER_MIME}' and trashed = false",
        escape_query_literal(name)
    );
    if let Some(parent) = parent {
        query.push_str(&format!(" and '{}' in parents", escape_query_literal(parent)));
    }
    query
}

fn escape_query_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn multipart_related_body(
    boundary: &str,
    metadata_json: &str,
    media_type: &str,
    content: &str,
) -> String {
    format!(
        "--{boundary}\r\n\
Content-Type: application/json; charset=UTF-8\r\n\
\r\n\
{metadata_json}\r\n\
--{boundary}\r\n\
Content-Type: {media_type}; charset=UTF-8\r\n\
\r\n\
{content}\r\n\
--{boundary}--\r\n"
    )
}
