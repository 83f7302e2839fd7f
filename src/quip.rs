//! Quip REST client.
//!
//! Synchronous, bearer-token authenticated. Every call goes through the
//! configured [`Backoff`], so rate limits and 5xx responses are retried and
//! only surface once the retry budget is spent.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backoff::Backoff;
use crate::error::{ensure_success, MigrateError, Result};
use crate::models::{FileType, FolderEnvelope, ThreadEnvelope, ThreadMetadata};

/// Messages fetched per thread when collecting comments.
pub const RECENT_MESSAGES_COUNT: usize = 100;

/// A thread response split into its sidecar part and the document HTML.
#[derive(Debug, Clone)]
pub struct ThreadWithHtml {
    pub envelope: ThreadEnvelope,
    pub html: Option<String>,
}

impl ThreadWithHtml {
    /// Splits the raw JSON of `GET /threads/{id}`; `html` is not persisted.
    pub fn from_value(mut value: Value) -> Result<Self> {
        let html = value
            .as_object_mut()
            .and_then(|obj| obj.remove("html"))
            .and_then(|v| v.as_str().map(str::to_string));
        let envelope = serde_json::from_value(value).map_err(|e| MigrateError::Remote {
            status: 0,
            body: format!("unexpected thread response: {}", e),
        })?;
        Ok(ThreadWithHtml { envelope, html })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: String,
    #[serde(default)]
    pub highlight_section_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub author_id: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub created_usec: i64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub annotation: Option<Annotation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QuipUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub emails: Vec<String>,
}

/// Read side of the migration.
pub trait SourcePlatform {
    fn get_thread(&self, id: &str) -> Result<ThreadWithHtml>;
    fn get_folder(&self, id: &str) -> Result<FolderEnvelope>;
    fn export(&self, thread: &ThreadMetadata, file_type: FileType) -> Result<Vec<u8>>;
    /// Oldest first, at most [`RECENT_MESSAGES_COUNT`].
    fn recent_messages(&self, thread_id: &str) -> Result<Vec<Message>>;
    /// `None` for unknown or inaccessible users.
    fn get_user(&self, id: &str) -> Result<Option<QuipUser>>;
}

#[derive(Deserialize)]
struct AsyncExportStarted {
    request_id: String,
}

#[derive(Deserialize)]
struct AsyncExportStatus {
    status: String,
    #[serde(default)]
    pdf_url: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct QuipClient {
    http: Client,
    api_base: String,
    token: String,
    backoff: Backoff,
}

impl QuipClient {
    pub fn new(api_base: &str, token: String, backoff: Backoff) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(QuipClient {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            backoff,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        self.backoff.retry(&format!("GET {}", path), || {
            let response = self.http.get(&url).bearer_auth(&self.token).send()?;
            Ok(ensure_success(response)?.json::<T>()?)
        })
    }

    fn get_bytes(&self, url: &str, what: &str) -> Result<Vec<u8>> {
        self.backoff.retry(what, || {
            let response = self.http.get(url).bearer_auth(&self.token).send()?;
            Ok(ensure_success(response)?.bytes()?.to_vec())
        })
    }

    /// Slides only export as PDF through the asynchronous export API.
    fn export_pdf(&self, thread_id: &str) -> Result<Vec<u8>> {
        let start_url = self.url(&format!("threads/{}/export/pdf/async", thread_id));
        let started: AsyncExportStarted = self.backoff.retry("start PDF export", || {
            let response = self.http.post(&start_url).bearer_auth(&self.token).send()?;
            Ok(ensure_success(response)?.json()?)
        })?;

        let status_path = format!(
            "threads/{}/export/pdf/async?request_id={}",
            thread_id, started.request_id
        );
        let pdf_url = self.backoff.retry("wait for PDF export", || {
            let status: AsyncExportStatus = self.get_json(&status_path)?;
            match status.status.as_str() {
                "SUCCESS" => status.pdf_url.ok_or_else(|| {
                    MigrateError::Remote {
                        status: 0,
                        body: "PDF export finished without pdf_url".to_string(),
                    }
                }),
                "FAILURE" | "PARTIAL_SUCCESS" => Err(MigrateError::Remote {
                    status: 0,
                    body: format!(
                        "PDF export {}: {}",
                        status.status,
                        status.message.unwrap_or_default()
                    ),
                }),
                other => Err(MigrateError::Transient(format!("PDF export is {}", other))),
            }
        })?;

        self.get_bytes(&pdf_url, "download PDF export")
    }
}

impl SourcePlatform for QuipClient {
    fn get_thread(&self, id: &str) -> Result<ThreadWithHtml> {
        let value: Value = self.get_json(&format!("threads/{}", id))?;
        ThreadWithHtml::from_value(value)
    }

    fn get_folder(&self, id: &str) -> Result<FolderEnvelope> {
        self.get_json(&format!("folders/{}", id))
    }

    fn export(&self, thread: &ThreadMetadata, file_type: FileType) -> Result<Vec<u8>> {
        match file_type {
            FileType::Docx | FileType::Xlsx => {
                let url = self.url(&format!(
                    "threads/{}/export/{}",
                    thread.id,
                    file_type.extension()
                ));
                self.get_bytes(&url, &format!("export {}", thread.id))
            }
            FileType::Pdf => self.export_pdf(&thread.id),
        }
    }

    fn recent_messages(&self, thread_id: &str) -> Result<Vec<Message>> {
        self.get_json(&format!(
            "messages/{}?count={}&sorted_by=ASC",
            thread_id, RECENT_MESSAGES_COUNT
        ))
    }

    fn get_user(&self, id: &str) -> Result<Option<QuipUser>> {
        match self.get_json(&format!("users/{}", id)) {
            Ok(user) => Ok(Some(user)),
            Err(MigrateError::Remote {
                status: 400 | 404, ..
            }) => Ok(None),
            Err(MigrateError::Permission(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
