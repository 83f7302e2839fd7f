//! Core data models persisted in the mirror's sidecar files.
//!
//! Wire names follow the sidecar format shared by every pass (`quip`,
//! `driveFileId`, `isOriginal`, ...). Records returned by Quip are parsed into
//! typed structs at the API boundary; fields this crate does not interpret are
//! kept in `extra` so a rewrite of the sidecar never drops data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{MigrateError, Result};

/// Thread kind as reported by Quip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadType {
    Document,
    Spreadsheet,
    Slides,
    Chat,
}

/// Local export format of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Docx,
    Xlsx,
    Pdf,
}

impl FileType {
    pub fn for_thread(kind: ThreadType) -> Result<Self> {
        match kind {
            ThreadType::Document => Ok(FileType::Docx),
            ThreadType::Spreadsheet => Ok(FileType::Xlsx),
            ThreadType::Slides => Ok(FileType::Pdf),
            ThreadType::Chat => Err(MigrateError::consistency("chats are not supported")),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            FileType::Docx => "docx",
            FileType::Xlsx => "xlsx",
            FileType::Pdf => "pdf",
        }
    }

    /// Zip-packaged OOXML containers.
    pub fn is_ooxml(self) -> bool {
        matches!(self, FileType::Docx | FileType::Xlsx)
    }
}

/// `thread` object of a Quip thread response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMetadata {
    pub id: String,
    pub title: String,
    pub author_id: String,
    pub created_usec: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_usec: Option<i64>,
    pub link: String,
    #[serde(rename = "type")]
    pub kind: ThreadType,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Thread response without its HTML body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadEnvelope {
    pub thread: ThreadMetadata,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderMetadata {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_usec: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry of a folder's `children` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderChild {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildNode<'a> {
    Thread(&'a str),
    Folder(&'a str),
}

impl FolderChild {
    pub fn node(&self) -> Option<ChildNode<'_>> {
        match (&self.folder_id, &self.thread_id) {
            (Some(id), _) => Some(ChildNode::Folder(id)),
            (None, Some(id)) => Some(ChildNode::Thread(id)),
            (None, None) => None,
        }
    }
}

/// Folder response from Quip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderEnvelope {
    pub folder: FolderMetadata,
    #[serde(default)]
    pub children: Vec<FolderChild>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub member_ids: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Where a comment thread is anchored in its document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum SectionAnchor {
    /// Text of the highlighted section.
    Highlight(String),
    /// Comments posted to the document chat rather than a section.
    DocumentChat,
    /// The highlighted section no longer exists in the document.
    DeletedSection,
}

impl SectionAnchor {
    pub fn display_text(&self) -> &str {
        match self {
            SectionAnchor::Highlight(text) => text,
            SectionAnchor::DocumentChat => "Document's chat",
            SectionAnchor::DeletedSection => "!!! This section was deleted from the document !!!",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub author: String,
    pub author_id: String,
    pub created_usec: i64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentThread {
    pub section: SectionAnchor,
    pub comments: Vec<Comment>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Sidecar of one document: `<documentId>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDescriptor {
    #[serde(rename = "quip")]
    pub source: ThreadEnvelope,
    #[serde(rename = "quipComments", default, skip_serializing_if = "Option::is_none")]
    pub comment_threads: Option<Vec<CommentThread>>,
    #[serde(rename = "driveFileId", default, skip_serializing_if = "Option::is_none")]
    pub destination_file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_original: Option<bool>,
    #[serde(
        rename = "originalDriveFileId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub original_destination_file_id: Option<String>,
    #[serde(
        rename = "driveCommentsFileId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub comments_file_id: Option<String>,
    #[serde(rename = "driveUploaded", default, skip_serializing_if = "is_false")]
    pub uploaded: bool,
    #[serde(
        rename = "driveOwnershipTransferred",
        default,
        skip_serializing_if = "is_false"
    )]
    pub ownership_transferred: bool,
}

impl DocumentDescriptor {
    pub fn new(source: ThreadEnvelope) -> Self {
        Self {
            source,
            comment_threads: None,
            destination_file_id: None,
            is_original: None,
            original_destination_file_id: None,
            comments_file_id: None,
            uploaded: false,
            ownership_transferred: false,
        }
    }

    pub fn thread(&self) -> &ThreadMetadata {
        &self.source.thread
    }

    /// Marked as a duplicate reference of another document.
    pub fn is_shortcut(&self) -> bool {
        self.is_original == Some(false)
    }
}

/// Sidecar of one folder: `_folder.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderDescriptor {
    #[serde(rename = "quip")]
    pub source: FolderEnvelope,
    #[serde(rename = "driveFolderId", default, skip_serializing_if = "Option::is_none")]
    pub destination_folder_id: Option<String>,
    #[serde(rename = "driveFolderCreated", default, skip_serializing_if = "is_false")]
    pub created: bool,
}

impl FolderDescriptor {
    pub fn new(source: FolderEnvelope) -> Self {
        Self {
            source,
            destination_folder_id: None,
            created: false,
        }
    }

    pub fn folder(&self) -> &FolderMetadata {
        &self.source.folder
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn thread(id: &str, title: &str, kind: ThreadType) -> ThreadEnvelope {
        ThreadEnvelope {
            thread: ThreadMetadata {
                id: id.to_string(),
                title: title.to_string(),
                author_id: "AUTHOR1".to_string(),
                created_usec: 1_600_000_000_000_000,
                updated_usec: None,
                link: format!("https://jetbrains.quip.com/{}", id.to_lowercase()),
                kind,
                extra: Map::new(),
            },
            extra: Map::new(),
        }
    }

    pub fn folder(id: &str, title: &str) -> FolderEnvelope {
        FolderEnvelope {
            folder: FolderMetadata {
                id: id.to_string(),
                title: title.to_string(),
                creator_id: Some("AUTHOR1".to_string()),
                created_usec: None,
                link: Some(format!("https://jetbrains.quip.com/{}", id.to_lowercase())),
                parent_id: None,
                extra: Map::new(),
            },
            children: Vec::new(),
            member_ids: Vec::new(),
            extra: Map::new(),
        }
    }
}
