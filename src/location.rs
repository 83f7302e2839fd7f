//! Locations: a sidecar path plus the descriptor read from it.
//!
//! A [`FileLocation`] also derives the paths of every document variant the
//! pipeline produces. Each stage writes its own file, so re-running a stage
//! never clobbers an earlier stage's output.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::{DocumentDescriptor, FileType, FolderDescriptor, ThreadType};
use crate::sidecar::{self, Stored, FOLDER_SIDECAR};

const WITH_COMMENTS: &str = "_with_comments";
const WITH_COMMENTS_AND_AUTHOR: &str = "_with_comments_and_author";
const WITH_COMMENTS_AND_AUTHOR_AND_LINKS: &str = "_with_comments_and_author_and_links";
const COMMENTS_MARKDOWN: &str = "_comments.md";

/// `"<title> (<id>)"`, the form used in progress labels and log lines.
pub fn title_with_id(title: &str, id: &str) -> String {
    format!("{} ({})", title, id)
}

#[derive(Debug, Clone)]
pub struct FileLocation {
    path: PathBuf,
    id: String,
    stored: Stored<DocumentDescriptor>,
}

impl FileLocation {
    /// Loads a document sidecar. `None` if `path` is not one.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let Some(stored) = sidecar::read_document(path)? else {
            return Ok(None);
        };
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(Some(FileLocation {
            path: path.to_path_buf(),
            id,
            stored,
        }))
    }

    /// Sidecar path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the sidecar and every document variant.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("."))
    }

    /// Document id, taken from the sidecar file name.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn descriptor(&self) -> &DocumentDescriptor {
        &self.stored.value
    }

    pub fn title(&self) -> &str {
        &self.descriptor().thread().title
    }

    pub fn title_with_id(&self) -> String {
        title_with_id(self.title(), &self.id)
    }

    pub fn kind(&self) -> ThreadType {
        self.descriptor().thread().kind
    }

    pub fn is_shortcut(&self) -> bool {
        self.descriptor().is_shortcut()
    }

    /// Fails with a consistency error for chats.
    pub fn file_type(&self) -> Result<FileType> {
        FileType::for_thread(self.kind())
    }

    fn variant(&self, infix: &str) -> Result<PathBuf> {
        let ext = self.file_type()?.extension();
        Ok(self.dir().join(format!("{}{}.{}", self.id, infix, ext)))
    }

    /// Raw export: `<id>.<ext>`.
    pub fn document_path(&self) -> Result<PathBuf> {
        self.variant("")
    }

    pub fn with_comments_path(&self) -> Result<PathBuf> {
        self.variant(WITH_COMMENTS)
    }

    pub fn with_comments_and_author_path(&self) -> Result<PathBuf> {
        self.variant(WITH_COMMENTS_AND_AUTHOR)
    }

    /// The variant that gets uploaded.
    pub fn final_path(&self) -> Result<PathBuf> {
        self.variant(WITH_COMMENTS_AND_AUTHOR_AND_LINKS)
    }

    pub fn comments_markdown_path(&self) -> PathBuf {
        self.dir().join(format!("{}{}", self.id, COMMENTS_MARKDOWN))
    }

    /// Fingerprinted read-modify-write of the sidecar. Returns whether the
    /// file was written.
    pub fn update<F>(&mut self, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut DocumentDescriptor),
    {
        sidecar::update(&self.path, &mut self.stored, mutate)
    }
}

#[derive(Debug, Clone)]
pub struct FolderLocation {
    dir: PathBuf,
    stored: Stored<FolderDescriptor>,
}

impl FolderLocation {
    /// Loads `<dir>/_folder.json`. `None` if it does not exist.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let Some(stored) = sidecar::read_folder(&dir.join(FOLDER_SIDECAR))? else {
            return Ok(None);
        };
        Ok(Some(FolderLocation {
            dir: dir.to_path_buf(),
            stored,
        }))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn sidecar_path(&self) -> PathBuf {
        self.dir.join(FOLDER_SIDECAR)
    }

    pub fn descriptor(&self) -> &FolderDescriptor {
        &self.stored.value
    }

    pub fn id(&self) -> &str {
        &self.descriptor().folder().id
    }

    pub fn title(&self) -> &str {
        &self.descriptor().folder().title
    }

    pub fn title_with_id(&self) -> String {
        title_with_id(self.title(), self.id())
    }

    pub fn update<F>(&mut self, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut FolderDescriptor),
    {
        let path = self.sidecar_path();
        sidecar::update(&path, &mut self.stored, mutate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrateError;
    use crate::models::fixtures;
    use tempfile::TempDir;

    #[test]
    fn variant_paths() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("AbC.json");
        sidecar::write(
            &path,
            &DocumentDescriptor::new(fixtures::thread("AbC", "Plan", ThreadType::Spreadsheet)),
        )
        .unwrap();

        let loc = FileLocation::load(&path).unwrap().unwrap();
        assert_eq!(loc.id(), "AbC");
        assert_eq!(loc.title_with_id(), "Plan (AbC)");
        assert_eq!(loc.document_path().unwrap(), tmp.path().join("AbC.xlsx"));
        assert_eq!(
            loc.with_comments_and_author_path().unwrap(),
            tmp.path().join("AbC_with_comments_and_author.xlsx")
        );
        assert_eq!(
            loc.final_path().unwrap(),
            tmp.path().join("AbC_with_comments_and_author_and_links.xlsx")
        );
        assert_eq!(loc.comments_markdown_path(), tmp.path().join("AbC_comments.md"));
    }

    #[test]
    fn chat_paths_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("C1.json");
        sidecar::write(
            &path,
            &DocumentDescriptor::new(fixtures::thread("C1", "Chat", ThreadType::Chat)),
        )
        .unwrap();
        let loc = FileLocation::load(&path).unwrap().unwrap();
        assert!(matches!(
            loc.document_path(),
            Err(MigrateError::Consistency(_))
        ));
    }

    #[test]
    fn folder_update_roundtrip() {
        let tmp = TempDir::new().unwrap();
        sidecar::write(
            &tmp.path().join(FOLDER_SIDECAR),
            &FolderDescriptor::new(fixtures::folder("F1", "Root")),
        )
        .unwrap();

        let mut loc = FolderLocation::load(tmp.path()).unwrap().unwrap();
        assert!(loc
            .update(|f| f.destination_folder_id = Some("G1".into()))
            .unwrap());
        let again = FolderLocation::load(tmp.path()).unwrap().unwrap();
        assert_eq!(again.descriptor().destination_folder_id.as_deref(), Some("G1"));
        assert!(FolderLocation::load(&tmp.path().join("missing")).unwrap().is_none());
    }
}
