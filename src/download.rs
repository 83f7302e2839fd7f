//! Passes that pull data from the source platform into the mirror.
//!
//! The structure download writes a folder's `_folder.json` only after all of
//! its children are on disk, so a folder with a sidecar is complete and an
//! interrupted run resumes where it stopped.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::comments::build_comment_threads;
use crate::context::RunContext;
use crate::error::{MigrateError, Result};
use crate::location::{title_with_id, FolderLocation};
use crate::models::{ChildNode, DocumentDescriptor, FolderDescriptor, FolderEnvelope, ThreadType};
use crate::progress::{Progress, Tally};
use crate::quip::SourcePlatform;
use crate::sidecar::{self, write_atomic, FOLDER_SIDECAR};
use crate::walker::TreeWalker;

/// Folder sidecars are left untouched when present; `Refresh` re-fetches
/// every folder and prunes what disappeared remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Resume,
    Refresh,
}

struct StructureDownload<'a> {
    quip: &'a dyn SourcePlatform,
    mode: Mode,
    tally: Tally,
}

impl StructureDownload<'_> {
    fn folder(
        &mut self,
        id: &str,
        dir: &Path,
        parent: &Progress,
        position: (usize, usize),
    ) -> Result<()> {
        if self.mode == Mode::Resume && dir.join(FOLDER_SIDECAR).exists() {
            self.tally.add("folders skipped");
            return Ok(());
        }

        let envelope = match self.quip.get_folder(id) {
            Ok(envelope) => envelope,
            Err(MigrateError::Permission(message)) => {
                parent.warn(&format!("no access to folder {}: {}", id, message));
                if dir.exists() {
                    fs::remove_dir_all(dir).map_err(|e| MigrateError::io(dir, e))?;
                }
                self.tally.add("folders inaccessible");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        fs::create_dir_all(dir).map_err(|e| MigrateError::io(dir, e))?;

        let progress = parent.with_index(
            &title_with_id(&envelope.folder.title, id),
            position.0,
            position.1,
        );
        if self.mode == Mode::Refresh {
            prune_removed_children(dir, &envelope, &progress, &mut self.tally)?;
        }

        let total = envelope.children.len();
        for (i, child) in envelope.children.iter().enumerate() {
            let position = (i + 1, total);
            match child.node() {
                Some(ChildNode::Thread(thread_id)) => {
                    self.thread(thread_id, dir, &progress.with_index(thread_id, i + 1, total))?
                }
                Some(ChildNode::Folder(folder_id)) => {
                    self.folder(folder_id, &dir.join(folder_id), &progress, position)?
                }
                None => progress.warn("child without thread_id or folder_id"),
            }
        }

        store_folder(dir, envelope)?;
        self.tally.add("folders written");
        progress.log("folder stored");
        Ok(())
    }

    fn thread(&mut self, id: &str, dir: &Path, progress: &Progress) -> Result<()> {
        let path = dir.join(format!("{}.json", id));
        if path.exists() {
            self.tally.add("documents skipped");
            return Ok(());
        }
        let thread = match self.quip.get_thread(id) {
            Ok(thread) => thread,
            Err(MigrateError::Permission(message)) => {
                progress.warn(&format!("no access to thread {}: {}", id, message));
                self.tally.add("documents inaccessible");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        sidecar::write(&path, &DocumentDescriptor::new(thread.envelope))?;
        self.tally.add("documents written");
        Ok(())
    }
}

/// Writes the folder sidecar, keeping destination fields of an existing one.
fn store_folder(dir: &Path, envelope: FolderEnvelope) -> Result<()> {
    match FolderLocation::load(dir)? {
        Some(mut existing) => {
            existing.update(|d| d.source = envelope)?;
        }
        None => {
            sidecar::write(&dir.join(FOLDER_SIDECAR), &FolderDescriptor::new(envelope))?;
        }
    }
    Ok(())
}

/// Leading id of a mirror entry: `AbC.json`, `AbC_with_comments.docx` and
/// `AbC_comments.md` all belong to `AbC`.
fn entry_id(name: &str) -> &str {
    let end = name
        .find(|c: char| !c.is_alphanumeric())
        .unwrap_or(name.len());
    &name[..end]
}

/// Deletes local documents and folders that are no longer children of the
/// remote folder.
fn prune_removed_children(
    dir: &Path,
    envelope: &FolderEnvelope,
    progress: &Progress,
    tally: &mut Tally,
) -> Result<()> {
    let mut threads = HashSet::new();
    let mut folders = HashSet::new();
    for child in &envelope.children {
        match child.node() {
            Some(ChildNode::Thread(id)) => {
                threads.insert(id);
            }
            Some(ChildNode::Folder(id)) => {
                folders.insert(id);
            }
            None => {}
        }
    }

    let entries = fs::read_dir(dir).map_err(|e| MigrateError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| MigrateError::io(dir, e))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || name == FOLDER_SIDECAR {
            continue;
        }
        let file_type = entry.file_type().map_err(|e| MigrateError::io(&path, e))?;
        if file_type.is_dir() {
            if !folders.contains(name.as_str()) {
                progress.log(&format!("removing folder {}", name));
                fs::remove_dir_all(&path).map_err(|e| MigrateError::io(&path, e))?;
                tally.add("folders removed");
            }
        } else if !threads.contains(entry_id(&name)) {
            progress.log(&format!("removing {}", name));
            fs::remove_file(&path).map_err(|e| MigrateError::io(&path, e))?;
            tally.add("files removed");
        }
    }
    Ok(())
}

fn download_tree(
    ctx: &RunContext,
    quip: &dyn SourcePlatform,
    mode: Mode,
    name: &str,
) -> Result<Tally> {
    let root = ctx.root();
    fs::create_dir_all(root).map_err(|e| MigrateError::io(root, e))?;
    tracing::info!("Started {}", name);
    let mut download = StructureDownload {
        quip,
        mode,
        tally: Tally::new(),
    };
    download.folder(&ctx.config.quip.root_folder_id, root, &Progress::root(name), (1, 1))?;
    tracing::info!("Finished {}", name);
    Ok(download.tally)
}

/// Mirrors the remote folder tree. Existing sidecars are kept.
pub fn download_structure(ctx: &RunContext, quip: &dyn SourcePlatform) -> Result<Tally> {
    download_tree(ctx, quip, Mode::Resume, "download-structure")
}

/// Re-fetches every folder, removes local entries deleted remotely and
/// downloads new ones. Destination fields of folder sidecars survive.
pub fn actualize_structure(ctx: &RunContext, quip: &dyn SourcePlatform) -> Result<Tally> {
    download_tree(ctx, quip, Mode::Refresh, "actualize-structure")
}

/// Exports every original document that has no raw file yet. A refused
/// export is fatal.
pub fn download_files(ctx: &RunContext, quip: &dyn SourcePlatform) -> Result<Tally> {
    let mut tally = Tally::new();
    TreeWalker::new(ctx.root())
        .named("download-files")
        .skip_shortcuts(true)
        .for_each_file(|file, progress| {
            if file.kind() == ThreadType::Chat {
                progress.warn("chats are not exported");
                tally.add("chats skipped");
                return Ok(());
            }
            let path = file.document_path()?;
            if path.exists() {
                tally.add("already downloaded");
                return Ok(());
            }
            let file_type = file.file_type()?;
            match quip.export(file.descriptor().thread(), file_type) {
                Ok(bytes) => {
                    write_atomic(&path, &bytes)?;
                    progress.log(&format!("exported {} bytes", bytes.len()));
                    tally.add("downloaded");
                    Ok(())
                }
                // Every later pass reads the raw file.
                Err(MigrateError::Permission(message)) => Err(MigrateError::Permission(format!(
                    "export of {} refused: {}",
                    file.title_with_id(),
                    message
                ))),
                Err(e) => Err(e),
            }
        })?;
    Ok(tally)
}

/// Fetches and anchors the comments of every original document that has
/// none stored yet.
pub fn download_comments(ctx: &RunContext, quip: &dyn SourcePlatform) -> Result<Tally> {
    let mut tally = Tally::new();
    TreeWalker::new(ctx.root())
        .named("download-comments")
        .skip_shortcuts(true)
        .for_each_file(|file, progress| {
            if file.kind() == ThreadType::Chat {
                tally.add("chats skipped");
                return Ok(());
            }
            if file.descriptor().comment_threads.is_some() {
                tally.add("already downloaded");
                return Ok(());
            }
            let messages = quip.recent_messages(file.id())?;
            let html = if messages.iter().any(|m| m.annotation.is_some()) {
                quip.get_thread(file.id())?.html
            } else {
                None
            };
            let threads = build_comment_threads(&messages, html.as_deref())?;
            let count: usize = threads.iter().map(|t| t.comments.len()).sum();
            file.update(|d| d.comment_threads = Some(threads))?;
            progress.log(&format!("{} comments", count));
            tally.add("downloaded");
            Ok(())
        })?;
    Ok(tally)
}
