//! Depth-first traversal of the local mirror.
//!
//! Every directory under the root is a folder with a `_folder.json`; every
//! `<id>.json` beside it is a document. Within a folder, documents are
//! visited before subfolders, each group sorted by title and then by file
//! name. Any visitor error aborts the walk; re-running is safe because every
//! pass is idempotent against the sidecars.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{MigrateError, Result};
use crate::location::{FileLocation, FolderLocation};
use crate::progress::{DocumentCounter, Progress};
use crate::sidecar::is_document_sidecar;

/// Callbacks of a walk. All methods default to no-ops.
pub trait TreeVisitor {
    fn before_visit_folder(&mut self, _folder: &mut FolderLocation, _progress: &Progress) -> Result<()> {
        Ok(())
    }

    fn after_visit_folder(&mut self, _folder: &mut FolderLocation, _progress: &Progress) -> Result<()> {
        Ok(())
    }

    fn visit_file(&mut self, _file: &mut FileLocation, _progress: &Progress) -> Result<()> {
        Ok(())
    }
}

/// Adapts a closure into a file-only visitor.
pub struct FileVisitor<F>(pub F);

impl<F> TreeVisitor for FileVisitor<F>
where
    F: FnMut(&mut FileLocation, &Progress) -> Result<()>,
{
    fn visit_file(&mut self, file: &mut FileLocation, progress: &Progress) -> Result<()> {
        (self.0)(file, progress)
    }
}

/// Counts gathered during one walk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkStats {
    pub folders: u64,
    pub documents: u64,
    pub shortcuts_skipped: u64,
}

pub struct TreeWalker {
    root: PathBuf,
    name: String,
    skip_shortcuts: bool,
}

impl TreeWalker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        TreeWalker {
            root: root.into(),
            name: String::new(),
            skip_shortcuts: false,
        }
    }

    /// Root progress label, usually the pass name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Do not hand duplicates (`isOriginal == false`) to `visit_file`.
    pub fn skip_shortcuts(mut self, skip: bool) -> Self {
        self.skip_shortcuts = skip;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of document sidecars under the root, by file name only.
    pub fn count_documents(&self) -> u64 {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_document_sidecar(e.path()))
            .count() as u64
    }

    pub fn run(&self, visitor: &mut dyn TreeVisitor) -> Result<WalkStats> {
        if !self.root.is_dir() {
            return Err(MigrateError::Precondition(format!(
                "mirror root {} does not exist; run download-structure first",
                self.root.display()
            )));
        }

        let mut walk = Walk {
            visitor,
            skip_shortcuts: self.skip_shortcuts,
            counter: DocumentCounter {
                done: 0,
                total: self.count_documents(),
            },
            stats: WalkStats::default(),
        };

        let root_progress = Progress::root(self.name.clone());
        if !self.name.is_empty() {
            tracing::info!("Started {}", self.name);
        }
        let mut root = load_folder(&self.root)?;
        walk.folder(&mut root, &root_progress, 1, 1)?;
        if !self.name.is_empty() {
            tracing::info!(
                "Finished {}: {} folders, {} documents, {} shortcuts skipped",
                self.name,
                walk.stats.folders,
                walk.stats.documents,
                walk.stats.shortcuts_skipped
            );
        }
        Ok(walk.stats)
    }

    /// Walks files only, with a closure.
    pub fn for_each_file<F>(&self, f: F) -> Result<WalkStats>
    where
        F: FnMut(&mut FileLocation, &Progress) -> Result<()>,
    {
        self.run(&mut FileVisitor(f))
    }
}

struct Walk<'a> {
    visitor: &'a mut dyn TreeVisitor,
    skip_shortcuts: bool,
    counter: DocumentCounter,
    stats: WalkStats,
}

impl Walk<'_> {
    fn folder(
        &mut self,
        location: &mut FolderLocation,
        parent: &Progress,
        index: usize,
        total: usize,
    ) -> Result<()> {
        let progress = parent.with_index(&location.title_with_id(), index, total);
        self.stats.folders += 1;
        self.visitor.before_visit_folder(location, &progress)?;

        let (mut files, mut folders) = list_children(location.dir())?;
        files.sort_by(|a, b| {
            a.title()
                .cmp(b.title())
                .then_with(|| a.path().file_name().cmp(&b.path().file_name()))
        });
        folders.sort_by(|a, b| {
            a.title()
                .cmp(b.title())
                .then_with(|| a.dir().file_name().cmp(&b.dir().file_name()))
        });

        let file_count = files.len();
        for (i, mut file) in files.into_iter().enumerate() {
            self.counter.done += 1;
            if self.skip_shortcuts && file.is_shortcut() {
                self.stats.shortcuts_skipped += 1;
                continue;
            }
            self.stats.documents += 1;
            let file_progress = progress
                .with_index(&file.title_with_id(), i + 1, file_count)
                .with_counter(self.counter);
            self.visitor.visit_file(&mut file, &file_progress)?;
        }

        let folder_count = folders.len();
        for (i, mut child) in folders.into_iter().enumerate() {
            self.folder(&mut child, &progress, i + 1, folder_count)?;
        }

        self.visitor.after_visit_folder(location, &progress)
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|n| n.to_string_lossy().starts_with('.'))
}

fn load_folder(dir: &Path) -> Result<FolderLocation> {
    FolderLocation::load(dir)?.ok_or_else(|| {
        MigrateError::consistency(format!(
            "folder {} has no _folder.json; re-run download-structure",
            dir.display()
        ))
    })
}

fn list_children(dir: &Path) -> Result<(Vec<FileLocation>, Vec<FolderLocation>)> {
    let mut files = Vec::new();
    let mut folders = Vec::new();
    let entries = fs::read_dir(dir).map_err(|e| MigrateError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| MigrateError::io(dir, e))?;
        let path = entry.path();
        if is_hidden(&path) {
            continue;
        }
        let file_type = entry.file_type().map_err(|e| MigrateError::io(&path, e))?;
        if file_type.is_dir() {
            folders.push(load_folder(&path)?);
        } else if file_type.is_file() {
            if let Some(file) = FileLocation::load(&path)? {
                files.push(file);
            }
        }
    }
    Ok((files, folders))
}
