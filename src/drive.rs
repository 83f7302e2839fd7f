//! Google Drive v3 client.
//!
//! Files and folders are created with ids reserved up front through
//! `files/generateIds`, which makes creation idempotent: a second create with
//! the same id answers "A file already exists with the provided ID." and is
//! treated as success.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::backoff::Backoff;
use crate::error::{ensure_success, MigrateError, Result};
use crate::ooxml::mime_for_extension;

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
pub const SHORTCUT_MIME_TYPE: &str = "application/vnd.google-apps.shortcut";

/// Maximum ids per `generateIds` request.
pub const GENERATE_IDS_BATCH: usize = 1000;

const ALREADY_EXISTS: &str = "A file already exists with the provided ID";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Files,
    Shortcuts,
}

impl IdKind {
    fn as_str(self) -> &'static str {
        match self {
            IdKind::Files => "files",
            IdKind::Shortcuts => "shortcuts",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveResource {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub web_view_link: Option<String>,
    #[serde(default)]
    pub mime_type: String,
}

impl DriveResource {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }
}

/// Write side of the migration.
pub trait DestinationService {
    /// Reserves `count` ids, in batches of at most [`GENERATE_IDS_BATCH`].
    fn generate_ids(&self, count: usize, kind: IdKind) -> Result<Vec<String>>;
    fn create_folder(&self, name: &str, id: &str, parent: Option<&str>) -> Result<String>;
    fn create_file(&self, name: &str, id: &str, parent: &str, source: &Path) -> Result<String>;
    fn create_shortcut(&self, target_id: &str, parent: &str, name: &str, id: &str)
        -> Result<String>;
    /// Replaces the content of an existing file.
    fn update_file(&self, id: &str, source: &Path) -> Result<()>;
    /// Children of `folder_id`, or of My Drive when `None`.
    fn list_folder_contents(&self, folder_id: Option<&str>) -> Result<Vec<DriveResource>>;
    fn transfer_ownership(&self, file_id: &str, email: &str) -> Result<()>;

    /// Id of the folder called `name` under `parent`, creating it when
    /// absent. More than one match is a consistency error.
    fn find_or_create_root_folder(&self, name: &str, parent: Option<&str>) -> Result<String> {
        let matches: Vec<DriveResource> = self
            .list_folder_contents(parent)?
            .into_iter()
            .filter(|r| r.is_folder() && r.name == name)
            .collect();
        match matches.as_slice() {
            [] => {
                let id = self
                    .generate_ids(1, IdKind::Files)?
                    .pop()
                    .ok_or_else(|| MigrateError::consistency("generateIds returned no id"))?;
                self.create_folder(name, &id, parent)
            }
            [single] => Ok(single.id.clone()),
            _ => Err(MigrateError::consistency(format!(
                "{} folders named '{}' found",
                matches.len(),
                name
            ))),
        }
    }
}

pub fn mime_type_of(path: &Path) -> Result<&'static str> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(mime_for_extension)
        .ok_or_else(|| {
            MigrateError::consistency(format!("unsupported upload extension: {}", path.display()))
        })
}

/// `multipart/related` body: JSON metadata part, then the media part.
fn multipart_related(metadata: &serde_json::Value, mime: &str, content: &[u8]) -> (String, Vec<u8>) {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let boundary = format!("qdm-boundary-{:x}", nanos);

    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{m}\r\n--{b}\r\nContent-Type: {t}\r\n\r\n",
            b = boundary,
            m = metadata,
            t = mime
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    (format!("multipart/related; boundary={}", boundary), body)
}

#[derive(Deserialize)]
struct GeneratedIds {
    ids: Vec<String>,
}

#[derive(Deserialize)]
struct Created {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveResource>,
    #[serde(default)]
    next_page_token: Option<String>,
}

pub struct DriveClient {
    http: Client,
    api_base: String,
    upload_base: String,
    token: String,
    backoff: Backoff,
}

impl DriveClient {
    pub fn new(api_base: &str, upload_base: &str, token: String, backoff: Backoff) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(DriveClient {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            upload_base: upload_base.trim_end_matches('/').to_string(),
            token,
            backoff,
        })
    }

    fn send_json<T: DeserializeOwned>(
        &self,
        what: &str,
        build: impl Fn() -> reqwest::blocking::RequestBuilder,
    ) -> Result<T> {
        self.backoff.retry(what, || {
            let response = build().bearer_auth(&self.token).send()?;
            Ok(ensure_success(response)?.json::<T>()?)
        })
    }

    /// Treats "already exists" for a pre-assigned id as success.
    fn create_with_id(
        &self,
        what: &str,
        id: &str,
        build: impl Fn() -> reqwest::blocking::RequestBuilder,
    ) -> Result<String> {
        match self.send_json::<Created>(what, build) {
            Ok(created) => Ok(created.id),
            Err(MigrateError::Remote { body, .. }) if body.contains(ALREADY_EXISTS) => {
                tracing::debug!("{}: {} already exists", what, id);
                Ok(id.to_string())
            }
            Err(e) => Err(e),
        }
    }
}

impl DestinationService for DriveClient {
    fn generate_ids(&self, count: usize, kind: IdKind) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(count);
        while ids.len() < count {
            let now = GENERATE_IDS_BATCH.min(count - ids.len());
            let url = format!("{}/files/generateIds", self.api_base);
            let batch: GeneratedIds = self.send_json("generate ids", || {
                self.http.get(&url).query(&[
                    ("count", now.to_string()),
                    ("type", kind.as_str().to_string()),
                    ("space", "drive".to_string()),
                ])
            })?;
            if batch.ids.len() != now {
                return Err(MigrateError::consistency(format!(
                    "requested {} ids, got {}",
                    now,
                    batch.ids.len()
                )));
            }
            ids.extend(batch.ids);
        }
        Ok(ids)
    }

    fn create_folder(&self, name: &str, id: &str, parent: Option<&str>) -> Result<String> {
        let url = format!("{}/files", self.api_base);
        let metadata = json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": parent.into_iter().collect::<Vec<_>>(),
            "id": id,
        });
        self.create_with_id("create folder", id, || {
            self.http
                .post(&url)
                .query(&[("fields", "id"), ("supportsAllDrives", "true")])
                .json(&metadata)
        })
    }

    fn create_file(&self, name: &str, id: &str, parent: &str, source: &Path) -> Result<String> {
        let mime = mime_type_of(source)?;
        let content = fs::read(source).map_err(|e| MigrateError::io(source, e))?;
        let metadata = json!({
            "name": name,
            "parents": [parent],
            "id": id,
        });
        let (content_type, body) = multipart_related(&metadata, mime, &content);
        let url = format!("{}/files", self.upload_base);
        self.create_with_id("upload file", id, || {
            self.http
                .post(&url)
                .query(&[
                    ("uploadType", "multipart"),
                    ("fields", "id"),
                    ("supportsAllDrives", "true"),
                ])
                .header(reqwest::header::CONTENT_TYPE, content_type.as_str())
                .body(body.clone())
        })
    }

    fn create_shortcut(
        &self,
        target_id: &str,
        parent: &str,
        name: &str,
        id: &str,
    ) -> Result<String> {
        let url = format!("{}/files", self.api_base);
        let metadata = json!({
            "name": name,
            "mimeType": SHORTCUT_MIME_TYPE,
            "shortcutDetails": { "targetId": target_id },
            "parents": [parent],
            "id": id,
        });
        self.create_with_id("create shortcut", id, || {
            self.http
                .post(&url)
                .query(&[("fields", "id"), ("supportsAllDrives", "true")])
                .json(&metadata)
        })
    }

    fn update_file(&self, id: &str, source: &Path) -> Result<()> {
        let mime = mime_type_of(source)?;
        let content = fs::read(source).map_err(|e| MigrateError::io(source, e))?;
        let url = format!("{}/files/{}", self.upload_base, id);
        let _: Created = self.send_json("update file", || {
            self.http
                .patch(&url)
                .query(&[
                    ("uploadType", "media"),
                    ("fields", "id"),
                    ("supportsAllDrives", "true"),
                ])
                .header(reqwest::header::CONTENT_TYPE, mime)
                .body(content.clone())
        })?;
        Ok(())
    }

    fn list_folder_contents(&self, folder_id: Option<&str>) -> Result<Vec<DriveResource>> {
        let url = format!("{}/files", self.api_base);
        let query = format!(
            "'{}' in parents and trashed = false",
            folder_id.unwrap_or("root")
        );
        let mut resources = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page: FileList = self.send_json("list folder", || {
                let mut request = self.http.get(&url).query(&[
                    ("q", query.as_str()),
                    ("spaces", "drive"),
                    ("fields", "nextPageToken, files(id, name, webViewLink, mimeType)"),
                    ("supportsAllDrives", "true"),
                    ("includeItemsFromAllDrives", "true"),
                ]);
                if let Some(token) = &page_token {
                    request = request.query(&[("pageToken", token.as_str())]);
                }
                request
            })?;
            resources.extend(page.files);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(resources)
    }

    fn transfer_ownership(&self, file_id: &str, email: &str) -> Result<()> {
        let url = format!("{}/files/{}/permissions", self.api_base, file_id);
        let permission = json!({
            "role": "owner",
            "type": "user",
            "emailAddress": email,
        });
        let _: serde_json::Value = self.send_json("transfer ownership", || {
            self.http
                .post(&url)
                .query(&[("transferOwnership", "true"), ("supportsAllDrives", "true")])
                .json(&permission)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn multipart_body_layout() {
        let (content_type, body) =
            multipart_related(&json!({"name": "a.docx"}), "text/markdown", b"# hi");
        let boundary = content_type
            .strip_prefix("multipart/related; boundary=")
            .unwrap()
            .to_string();
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with(&format!("--{}\r\nContent-Type: application/json", boundary)));
        assert!(text.contains("{\"name\":\"a.docx\"}"));
        assert!(text.contains("Content-Type: text/markdown\r\n\r\n# hi\r\n"));
        assert!(text.ends_with(&format!("--{}--\r\n", boundary)));
    }

    #[test]
    fn upload_mime_types() {
        assert_eq!(
            mime_type_of(Path::new("x/a_with_comments_and_author_and_links.xlsx")).unwrap(),
            crate::ooxml::MIME_XLSX
        );
        assert!(mime_type_of(Path::new("a.txt")).is_err());
    }

    struct Listing {
        existing: Vec<DriveResource>,
        created: RefCell<Vec<String>>,
    }

    impl DestinationService for Listing {
        fn generate_ids(&self, count: usize, _: IdKind) -> Result<Vec<String>> {
            Ok((0..count).map(|i| format!("new{}", i)).collect())
        }
        fn create_folder(&self, name: &str, id: &str, _: Option<&str>) -> Result<String> {
            self.created.borrow_mut().push(name.to_string());
            Ok(id.to_string())
        }
        fn create_file(&self, _: &str, id: &str, _: &str, _: &Path) -> Result<String> {
            Ok(id.to_string())
        }
        fn create_shortcut(&self, _: &str, _: &str, _: &str, id: &str) -> Result<String> {
            Ok(id.to_string())
        }
        fn update_file(&self, _: &str, _: &Path) -> Result<()> {
            Ok(())
        }
        fn list_folder_contents(&self, _: Option<&str>) -> Result<Vec<DriveResource>> {
            Ok(self.existing.clone())
        }
        fn transfer_ownership(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
    }

    fn folder(id: &str, name: &str) -> DriveResource {
        DriveResource {
            id: id.into(),
            name: name.into(),
            web_view_link: None,
            mime_type: FOLDER_MIME_TYPE.into(),
        }
    }

    #[test]
    fn find_or_create_root_folder_cases() {
        let empty = Listing {
            existing: vec![],
            created: RefCell::new(vec![]),
        };
        assert_eq!(empty.find_or_create_root_folder("Quip", None).unwrap(), "new0");
        assert_eq!(*empty.created.borrow(), vec!["Quip".to_string()]);

        let one = Listing {
            existing: vec![folder("F1", "Quip"), folder("F2", "Other")],
            created: RefCell::new(vec![]),
        };
        assert_eq!(one.find_or_create_root_folder("Quip", None).unwrap(), "F1");
        assert!(one.created.borrow().is_empty());

        let two = Listing {
            existing: vec![folder("F1", "Quip"), folder("F2", "Quip")],
            created: RefCell::new(vec![]),
        };
        assert!(matches!(
            two.find_or_create_root_folder("Quip", None),
            Err(MigrateError::Consistency(_))
        ));
    }
}
