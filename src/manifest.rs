//! Inventory reports: what was migrated where, and who the users are.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::context::RunContext;
use crate::error::Result;
use crate::location::{FileLocation, FolderLocation};
use crate::mapping::{build_drive_file_link, build_drive_folder_link};
use crate::models::ThreadType;
use crate::progress::{Progress, Tally};
use crate::report::write_tsv;
use crate::walker::{TreeVisitor, TreeWalker};

pub const MANIFEST_HEADER: [&str; 8] = [
    "Author",
    "Title",
    "Type",
    "Drive Link",
    "Path",
    "Quip ID",
    "Quip Link",
    "Original File Drive Link",
];

pub const USERS_HEADER: [&str; 4] = ["Quip ID", "Name", "Email", "Documents"];

fn kind_name(kind: ThreadType) -> &'static str {
    match kind {
        ThreadType::Document => "document",
        ThreadType::Spreadsheet => "spreadsheet",
        ThreadType::Slides => "slides",
        ThreadType::Chat => "chat",
    }
}

struct Manifest<'a> {
    ctx: &'a RunContext,
    /// Titles from the root down to the current folder.
    path: Vec<String>,
    rows: Vec<[String; 8]>,
}

impl Manifest<'_> {
    fn joined_path(&self) -> String {
        self.path.join("/")
    }

    fn file_link(id: Option<&str>, kind: ThreadType) -> Result<String> {
        match id {
            Some(id) if kind != ThreadType::Chat => build_drive_file_link(id, kind),
            _ => Ok(String::new()),
        }
    }
}

impl TreeVisitor for Manifest<'_> {
    fn before_visit_folder(&mut self, folder: &mut FolderLocation, _: &Progress) -> Result<()> {
        self.path.push(folder.title().to_string());
        let meta = folder.descriptor().folder();
        let row = [
            meta.creator_id
                .as_deref()
                .map(|id| self.ctx.users.display(id))
                .unwrap_or_default(),
            meta.title.clone(),
            "folder".to_string(),
            folder
                .descriptor()
                .destination_folder_id
                .as_deref()
                .map(build_drive_folder_link)
                .unwrap_or_default(),
            self.joined_path(),
            meta.id.clone(),
            meta.link.clone().unwrap_or_default(),
            String::new(),
        ];
        self.rows.push(row);
        Ok(())
    }

    fn after_visit_folder(&mut self, _: &mut FolderLocation, _: &Progress) -> Result<()> {
        self.path.pop();
        Ok(())
    }

    fn visit_file(&mut self, file: &mut FileLocation, _: &Progress) -> Result<()> {
        let descriptor = file.descriptor();
        let thread = descriptor.thread();
        let (drive_link, original_link) = if file.is_shortcut() {
            (
                descriptor
                    .destination_file_id
                    .as_deref()
                    .map(|id| format!("https://drive.google.com/file/d/{}", id))
                    .unwrap_or_default(),
                Self::file_link(descriptor.original_destination_file_id.as_deref(), thread.kind)?,
            )
        } else {
            (
                Self::file_link(descriptor.destination_file_id.as_deref(), thread.kind)?,
                String::new(),
            )
        };
        let kind = if file.is_shortcut() {
            "shortcut".to_string()
        } else {
            kind_name(thread.kind).to_string()
        };
        let row = [
            self.ctx.users.display(&thread.author_id),
            thread.title.clone(),
            kind,
            drive_link,
            format!("{}/{}", self.joined_path(), thread.title),
            thread.id.clone(),
            thread.link.clone(),
            original_link,
        ];
        self.rows.push(row);
        Ok(())
    }
}

/// One row per folder, document and shortcut of the mirror.
pub fn collect_manifest(ctx: &RunContext, output: Option<&Path>) -> Result<Tally> {
    let mut manifest = Manifest {
        ctx,
        path: Vec::new(),
        rows: Vec::new(),
    };
    let stats = TreeWalker::new(ctx.root())
        .named("collect-manifest")
        .run(&mut manifest)?;
    write_tsv(output, &MANIFEST_HEADER, manifest.rows)?;

    let mut tally = Tally::new();
    tally.add_n("folders", stats.folders);
    tally.add_n("documents", stats.documents);
    Ok(tally)
}

/// Every known user plus every author seen in the mirror, sorted by id, with
/// the number of documents each authored.
pub fn extract_users(ctx: &RunContext, output: Option<&Path>) -> Result<Tally> {
    let mut authored: HashMap<String, u64> = HashMap::new();
    TreeWalker::new(ctx.root())
        .named("extract-users")
        .skip_shortcuts(true)
        .for_each_file(|file, _| {
            *authored
                .entry(file.descriptor().thread().author_id.clone())
                .or_default() += 1;
            Ok(())
        })?;

    let mut ids: BTreeMap<String, u64> = ctx.users.all().map(|u| (u.id.clone(), 0)).collect();
    for (id, count) in authored {
        ids.insert(id, count);
    }

    let mut tally = Tally::new();
    let mut rows = Vec::with_capacity(ids.len());
    for (id, count) in ids {
        if ctx.users.get(&id).is_none() {
            tally.add("unknown authors");
        }
        rows.push([
            id.clone(),
            ctx.users.name(&id).unwrap_or_default().to_string(),
            ctx.users.email(&id).unwrap_or_default().to_string(),
            count.to_string(),
        ]);
        tally.add("users");
    }
    write_tsv(output, &USERS_HEADER, rows)?;
    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::context;
    use crate::walker::testing::{document, folder};
    use tempfile::TempDir;

    #[test]
    fn manifest_rows_cover_folders_documents_and_shortcuts() {
        let tmp = TempDir::new().unwrap();
        let root = folder(&tmp.path().join("mirror"), "R", "Root");
        let doc = document(&root, "D1", "Plan", ThreadType::Document);
        let sub = folder(&root.join("S1"), "S1", "Sub");
        let dup = document(&sub, "D1", "Plan", ThreadType::Document);

        FileLocation::load(&doc)
            .unwrap()
            .unwrap()
            .update(|d| d.destination_file_id = Some("G1".into()))
            .unwrap();
        FileLocation::load(&dup)
            .unwrap()
            .unwrap()
            .update(|d| {
                d.is_original = Some(false);
                d.destination_file_id = Some("S9".into());
                d.original_destination_file_id = Some("G1".into());
            })
            .unwrap();

        let ctx = context(&root);
        let out = tmp.path().join("migrated_files.tsv");
        let tally = collect_manifest(&ctx, Some(&out)).unwrap();
        assert_eq!(tally.get("folders"), 2);

        let text = std::fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], MANIFEST_HEADER.join("\t"));
        assert_eq!(
            lines[2],
            "Ann Author (ann@example.com)\tPlan\tdocument\thttps://docs.google.com/document/d/G1\tRoot/Plan\tD1\thttps://jetbrains.quip.com/d1\t"
        );
        assert_eq!(
            lines[4],
            "Ann Author (ann@example.com)\tPlan\tshortcut\thttps://drive.google.com/file/d/S9\tRoot/Sub/Plan\tD1\thttps://jetbrains.quip.com/d1\thttps://docs.google.com/document/d/G1"
        );
    }

    #[test]
    fn users_report_includes_unknown_authors() {
        let tmp = TempDir::new().unwrap();
        let root = folder(&tmp.path().join("mirror"), "R", "Root");
        let path = document(&root, "D1", "Plan", ThreadType::Document);
        document(&root, "D2", "Notes", ThreadType::Document);
        let mut loc = FileLocation::load(&path).unwrap().unwrap();
        loc.update(|d| d.source.thread.author_id = "GHOST".into()).unwrap();

        let ctx = context(&root);
        let out = tmp.path().join("all_users.tsv");
        let tally = extract_users(&ctx, Some(&out)).unwrap();
        assert_eq!(tally.get("unknown authors"), 1);

        let text = std::fs::read_to_string(&out).unwrap();
        assert_eq!(
            text,
            "Quip ID\tName\tEmail\tDocuments\nAUTHOR1\tAnn Author\tann@example.com\t1\nGHOST\t\t\t1\n"
        );
    }
}
