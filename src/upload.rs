//! Passes that write to the destination service.
//!
//! Destination ids are reserved before anything is created, so every create
//! call is idempotent and the sidecar flags (`driveFolderCreated`,
//! `driveUploaded`, `driveOwnershipTransferred`) make a rerun over a finished
//! mirror perform no remote calls at all.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::context::RunContext;
use crate::drive::{DestinationService, IdKind};
use crate::error::{MigrateError, Result};
use crate::location::{FileLocation, FolderLocation};
use crate::models::ThreadType;
use crate::progress::{Progress, Tally};
use crate::quip::SourcePlatform;
use crate::sidecar::is_folder_sidecar;
use crate::walker::{TreeVisitor, TreeWalker};

#[derive(Default)]
struct PendingIds {
    folders: Vec<PathBuf>,
    originals: Vec<PathBuf>,
    duplicates: Vec<PathBuf>,
    /// Source id -> destination id of originals that already have one.
    assigned: HashMap<String, String>,
}

struct CollectPending {
    pending: PendingIds,
}

impl TreeVisitor for CollectPending {
    fn before_visit_folder(&mut self, folder: &mut FolderLocation, _: &Progress) -> Result<()> {
        if folder.descriptor().destination_folder_id.is_none() {
            self.pending.folders.push(folder.dir().to_path_buf());
        }
        Ok(())
    }

    fn visit_file(&mut self, file: &mut FileLocation, _: &Progress) -> Result<()> {
        if file.kind() == ThreadType::Chat {
            return Ok(());
        }
        let descriptor = file.descriptor();
        if file.is_shortcut() {
            self.pending.duplicates.push(file.path().to_path_buf());
        } else if let Some(id) = &descriptor.destination_file_id {
            self.pending
                .assigned
                .insert(file.id().to_string(), id.clone());
        } else {
            self.pending.originals.push(file.path().to_path_buf());
        }
        Ok(())
    }
}

fn load_file(path: &Path) -> Result<FileLocation> {
    FileLocation::load(path)?.ok_or_else(|| {
        MigrateError::consistency(format!("sidecar {} disappeared", path.display()))
    })
}

fn load_folder(dir: &Path) -> Result<FolderLocation> {
    FolderLocation::load(dir)?.ok_or_else(|| {
        MigrateError::consistency(format!("folder sidecar in {} disappeared", dir.display()))
    })
}

/// Reserves destination ids: one `files` batch for folders (the mirror root
/// included) and originals without an id, one `shortcuts` batch for duplicates without one. Every
/// duplicate gets the destination id of its original.
pub fn generate_ids(ctx: &RunContext, drive: &dyn DestinationService) -> Result<Tally> {
    let mut collect = CollectPending {
        pending: PendingIds::default(),
    };
    TreeWalker::new(ctx.root())
        .named("generate-ids")
        .run(&mut collect)?;
    let mut pending = collect.pending;
    let mut tally = Tally::new();

    let file_count = pending.folders.len() + pending.originals.len();
    if file_count > 0 {
        let mut ids = drive.generate_ids(file_count, IdKind::Files)?.into_iter();
        for dir in &pending.folders {
            let id = ids.next().ok_or_else(|| MigrateError::consistency("ran out of ids"))?;
            load_folder(dir)?.update(|d| d.destination_folder_id = Some(id))?;
            tally.add("folder ids");
        }
        for path in &pending.originals {
            let id = ids.next().ok_or_else(|| MigrateError::consistency("ran out of ids"))?;
            let mut file = load_file(path)?;
            pending.assigned.insert(file.id().to_string(), id.clone());
            file.update(|d| d.destination_file_id = Some(id))?;
            tally.add("document ids");
        }
    }

    let mut duplicates = Vec::with_capacity(pending.duplicates.len());
    for path in &pending.duplicates {
        duplicates.push(load_file(path)?);
    }
    let shortcut_count = duplicates
        .iter()
        .filter(|f| f.descriptor().destination_file_id.is_none())
        .count();
    let shortcut_ids = match shortcut_count {
        0 => Vec::new(),
        n => drive.generate_ids(n, IdKind::Shortcuts)?,
    };
    let mut shortcut_ids = shortcut_ids.into_iter();

    for mut file in duplicates {
        let original = pending.assigned.get(file.id()).cloned().ok_or_else(|| {
            MigrateError::consistency(format!(
                "duplicate {} has no original with a destination id",
                file.path().display()
            ))
        })?;
        let shortcut = match &file.descriptor().destination_file_id {
            Some(id) => id.clone(),
            None => shortcut_ids
                .next()
                .ok_or_else(|| MigrateError::consistency("ran out of shortcut ids"))?,
        };
        if file.update(|d| {
            d.destination_file_id = Some(shortcut);
            d.original_destination_file_id = Some(original);
        })? {
            tally.add("shortcut ids");
        }
    }
    Ok(tally)
}

struct Upload<'a> {
    ctx: &'a RunContext,
    drive: &'a dyn DestinationService,
    parents: Vec<String>,
    tally: Tally,
}

impl Upload<'_> {
    fn parent(&self) -> Result<&str> {
        self.parents
            .last()
            .map(String::as_str)
            .ok_or_else(|| MigrateError::consistency("document outside of any folder"))
    }

    fn upload_companion(&mut self, file: &mut FileLocation, parent: &str) -> Result<()> {
        let companion = file.comments_markdown_path();
        if !companion.exists() {
            return Ok(());
        }
        let id = match &file.descriptor().comments_file_id {
            Some(id) => id.clone(),
            None => {
                let id = self
                    .drive
                    .generate_ids(1, IdKind::Files)?
                    .pop()
                    .ok_or_else(|| MigrateError::consistency("generateIds returned no id"))?;
                file.update(|d| d.comments_file_id = Some(id.clone()))?;
                id
            }
        };
        let name = format!("{} (comments).md", file.title());
        self.drive.create_file(&name, &id, parent, &companion)?;
        self.tally.add("comment files");
        Ok(())
    }
}

fn require_id<'i>(id: Option<&'i str>, what: &str) -> Result<&'i str> {
    id.ok_or_else(|| {
        MigrateError::Precondition(format!("{} has no destination id; run generate-ids first", what))
    })
}

impl TreeVisitor for Upload<'_> {
    fn before_visit_folder(&mut self, folder: &mut FolderLocation, progress: &Progress) -> Result<()> {
        let descriptor = folder.descriptor();
        if descriptor.created {
            let id = require_id(descriptor.destination_folder_id.as_deref(), &folder.title_with_id())?;
            self.parents.push(id.to_string());
            return Ok(());
        }

        let id = require_id(descriptor.destination_folder_id.as_deref(), &folder.title_with_id())?;
        // The mirror root goes under the named folder of the destination.
        let id = if folder.dir() == self.ctx.root() {
            let drive_config = &self.ctx.config.drive;
            let named = self.drive.find_or_create_root_folder(
                &drive_config.root_folder_name,
                drive_config.parent_folder_id.as_deref(),
            )?;
            self.drive.create_folder(folder.title(), id, Some(&named))?
        } else {
            let parent = self.parent()?;
            self.drive.create_folder(folder.title(), id, Some(parent))?
        };
        folder.update(|d| {
            d.destination_folder_id = Some(id.clone());
            d.created = true;
        })?;
        progress.log("folder created");
        self.tally.add("folders created");
        self.parents.push(id);
        Ok(())
    }

    fn after_visit_folder(&mut self, _: &mut FolderLocation, _: &Progress) -> Result<()> {
        self.parents.pop();
        Ok(())
    }

    fn visit_file(&mut self, file: &mut FileLocation, progress: &Progress) -> Result<()> {
        if file.kind() == ThreadType::Chat {
            self.tally.add("chats skipped");
            return Ok(());
        }
        if file.descriptor().uploaded {
            self.tally.add("already uploaded");
            return Ok(());
        }
        let parent = self.parent()?.to_string();
        let descriptor = file.descriptor();
        let id = require_id(descriptor.destination_file_id.as_deref(), &file.title_with_id())?
            .to_string();

        if file.is_shortcut() {
            let target = descriptor.original_destination_file_id.clone().ok_or_else(|| {
                MigrateError::Precondition(format!(
                    "duplicate {} has no original destination id; run generate-ids first",
                    file.title_with_id()
                ))
            })?;
            self.drive
                .create_shortcut(&target, &parent, file.title(), &id)?;
            progress.log("shortcut created");
            self.tally.add("shortcuts created");
        } else {
            let path = file.final_path()?;
            if !path.exists() {
                return Err(MigrateError::Precondition(format!(
                    "{} is missing; run update-links first",
                    path.display()
                )));
            }
            self.drive.create_file(file.title(), &id, &parent, &path)?;
            self.upload_companion(file, &parent)?;
            progress.log("uploaded");
            self.tally.add("documents uploaded");
        }
        file.update(|d| d.uploaded = true)?;
        Ok(())
    }
}

/// Mirrors folders, uploads final variants and comment companions of
/// originals and creates shortcuts for duplicates.
pub fn upload(ctx: &RunContext, drive: &dyn DestinationService) -> Result<Tally> {
    let mut upload = Upload {
        ctx,
        drive,
        parents: Vec::new(),
        tally: Tally::new(),
    };
    TreeWalker::new(ctx.root()).named("upload").run(&mut upload)?;
    Ok(upload.tally)
}

/// Replaces the content of every uploaded original with its current final
/// variant. Run after `update-links` once more links resolve.
pub fn reupload(ctx: &RunContext, drive: &dyn DestinationService) -> Result<Tally> {
    let mut tally = Tally::new();
    TreeWalker::new(ctx.root())
        .named("reupload")
        .skip_shortcuts(true)
        .for_each_file(|file, progress| {
            let descriptor = file.descriptor();
            if file.kind() == ThreadType::Chat || !descriptor.uploaded {
                return Ok(());
            }
            let id = require_id(descriptor.destination_file_id.as_deref(), &file.title_with_id())?;
            drive.update_file(id, &file.final_path()?)?;
            progress.log("content replaced");
            tally.add("documents updated");
            Ok(())
        })?;
    Ok(tally)
}

/// Hands every uploaded original (and its comment companion) to the
/// document's author. Fails with `MissingUsers` before any transfer when an
/// author has no email.
pub fn transfer_ownership(
    ctx: &RunContext,
    drive: &dyn DestinationService,
    quip: Option<&dyn SourcePlatform>,
) -> Result<Tally> {
    let walker = TreeWalker::new(ctx.root())
        .named("transfer-ownership")
        .skip_shortcuts(true);

    let mut missing = BTreeSet::new();
    walker.for_each_file(|file, _| {
        let descriptor = file.descriptor();
        if file.kind() != ThreadType::Chat && descriptor.uploaded && !descriptor.ownership_transferred
        {
            let author = &descriptor.thread().author_id;
            if ctx.users.email(author).is_none() {
                missing.insert(author.clone());
            }
        }
        Ok(())
    })?;
    if !missing.is_empty() {
        let missing: Vec<String> = missing.into_iter().collect();
        return Err(ctx.missing_users(quip, &missing));
    }

    let mut tally = Tally::new();
    walker.for_each_file(|file, progress| {
        let descriptor = file.descriptor();
        if file.kind() == ThreadType::Chat || descriptor.ownership_transferred {
            return Ok(());
        }
        if !descriptor.uploaded {
            tally.add("not uploaded");
            return Ok(());
        }
        let email = ctx
            .users
            .email(&descriptor.thread().author_id)
            .ok_or_else(|| MigrateError::consistency("author email vanished"))?
            .to_string();
        let id = require_id(descriptor.destination_file_id.as_deref(), &file.title_with_id())?;
        drive.transfer_ownership(id, &email)?;
        if let Some(comments_id) = &descriptor.comments_file_id {
            drive.transfer_ownership(comments_id, &email)?;
        }
        file.update(|d| d.ownership_transferred = true)?;
        progress.log(&format!("ownership transferred to {}", email));
        tally.add("transferred");
        Ok(())
    })?;
    Ok(tally)
}

/// Forgets every destination id and flag, for a migration into a fresh
/// destination.
pub fn reset_drive_info(ctx: &RunContext) -> Result<Tally> {
    struct Reset(Tally);

    impl TreeVisitor for Reset {
        fn before_visit_folder(&mut self, folder: &mut FolderLocation, _: &Progress) -> Result<()> {
            if folder.update(|d| {
                d.destination_folder_id = None;
                d.created = false;
            })? {
                self.0.add("folders reset");
            }
            Ok(())
        }

        fn visit_file(&mut self, file: &mut FileLocation, _: &Progress) -> Result<()> {
            if file.update(|d| {
                d.destination_file_id = None;
                d.original_destination_file_id = None;
                d.comments_file_id = None;
                d.uploaded = false;
                d.ownership_transferred = false;
            })? {
                self.0.add("documents reset");
            }
            Ok(())
        }
    }

    let mut reset = Reset(Tally::new());
    TreeWalker::new(ctx.root())
        .named("reset-drive-info")
        .run(&mut reset)?;
    Ok(reset.0)
}

/// Deletes every folder sidecar so the next structure download re-fetches
/// all folders. Document sidecars and exports stay.
pub fn reset_structure(ctx: &RunContext) -> Result<Tally> {
    let mut tally = Tally::new();
    for entry in WalkDir::new(ctx.root()) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_default();
            MigrateError::io(path, e.into())
        })?;
        if entry.file_type().is_file() && is_folder_sidecar(entry.path()) {
            std::fs::remove_file(entry.path()).map_err(|e| MigrateError::io(entry.path(), e))?;
            tally.add("folder sidecars removed");
        }
    }
    tracing::info!("Finished reset-structure");
    Ok(tally)
}
