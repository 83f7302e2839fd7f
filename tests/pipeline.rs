use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use quip_drive_migrate::authors::insert_authors;
use quip_drive_migrate::comments::{insert_comments, MarkdownCompanion};
use quip_drive_migrate::config::parse_config;
use quip_drive_migrate::context::RunContext;
use quip_drive_migrate::download::{
    actualize_structure, download_comments, download_files, download_structure,
};
use quip_drive_migrate::drive::{DestinationService, DriveResource, IdKind};
use quip_drive_migrate::error::{MigrateError, Result};
use quip_drive_migrate::location::{FileLocation, FolderLocation};
use quip_drive_migrate::manifest::collect_manifest;
use quip_drive_migrate::mapping::mark_originals;
use quip_drive_migrate::models::{FileType, FolderEnvelope, ThreadMetadata};
use quip_drive_migrate::quip::{Message, QuipUser, SourcePlatform, ThreadWithHtml};
use quip_drive_migrate::report::UnresolvedLinkReport;
use quip_drive_migrate::update_links::{find_links, update_links};
use quip_drive_migrate::upload::{
    generate_ids, reset_drive_info, reupload, transfer_ownership, upload,
};

const RELS_PART: &str = "word/_rels/document.xml.rels";
const BODY_PART: &str = "word/document.xml";

fn docx(rels: Option<&str>) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    zip.start_file(BODY_PART, options).unwrap();
    zip.write_all(b"<w:document><w:body><w:p/></w:body></w:document>")
        .unwrap();
    if let Some(rels) = rels {
        zip.start_file(RELS_PART, options).unwrap();
        zip.write_all(rels.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

fn read_entry(path: &Path, name: &str) -> String {
    let bytes = fs::read(path).unwrap();
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut out = String::new();
    entry.read_to_string(&mut out).unwrap();
    out
}

fn rels(targets: &[&str]) -> String {
    let mut out = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    for (i, target) in targets.iter().enumerate() {
        out.push_str(&format!(
            r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="{}" TargetMode="External"/>"#,
            i + 1,
            target
        ));
    }
    out.push_str("</Relationships>");
    out
}

fn thread_json(id: &str, title: &str) -> Value {
    json!({
        "thread": {
            "id": id,
            "title": title,
            "author_id": "AUTHOR1",
            "created_usec": 1_641_204_000_000_000i64,
            "link": format!("https://jetbrains.quip.com/{}", id.to_lowercase()),
            "type": "document"
        },
        "html": "<p id='s1'>Body</p>"
    })
}

fn folder_json(id: &str, title: &str, children: Value) -> Value {
    json!({
        "folder": {
            "id": id,
            "title": title,
            "creator_id": "AUTHOR1",
            "link": format!("https://jetbrains.quip.com/{}", id.to_lowercase())
        },
        "children": children
    })
}

/// In-memory source. Threads missing from `threads` answer 403.
#[derive(Default)]
struct FakeQuip {
    folders: RefCell<HashMap<String, Value>>,
    threads: HashMap<String, Value>,
    exports: HashMap<String, Vec<u8>>,
    messages: HashMap<String, Vec<Value>>,
    calls: Cell<usize>,
}

impl FakeQuip {
    /// `Root` holds `Plan` (D1), an inaccessible D3 and folder `Specs` (S1);
    /// `Specs` holds a second reference to D1 plus `Budget` (D2).
    fn workspace() -> Self {
        let mut quip = FakeQuip::default();
        quip.folders.borrow_mut().insert(
            "R".into(),
            folder_json(
                "R",
                "Root",
                json!([{"thread_id": "D1"}, {"thread_id": "D3"}, {"folder_id": "S1"}]),
            ),
        );
        quip.folders.borrow_mut().insert(
            "S1".into(),
            folder_json("S1", "Specs", json!([{"thread_id": "D1"}, {"thread_id": "D2"}])),
        );
        quip.threads.insert("D1".into(), thread_json("D1", "Plan"));
        quip.threads.insert("D2".into(), thread_json("D2", "Budget"));
        quip.exports.insert(
            "D1".into(),
            docx(Some(&rels(&[
                "https://jetbrains.quip.com/D2",
                "https://jetbrains.quip.com/GONE42",
                "https://example.com/",
            ]))),
        );
        quip.exports.insert("D2".into(), docx(None));
        quip.messages.insert(
            "D1".into(),
            vec![json!({
                "id": "M1",
                "author_id": "AUTHOR1",
                "author_name": "Ann Author",
                "created_usec": 1_641_204_000_000_000i64,
                "text": "See https://jetbrains.quip.com/D2 for numbers"
            })],
        );
        quip
    }

    fn tick(&self) {
        self.calls.set(self.calls.get() + 1);
    }
}

impl SourcePlatform for FakeQuip {
    fn get_thread(&self, id: &str) -> Result<ThreadWithHtml> {
        self.tick();
        match self.threads.get(id) {
            Some(value) => ThreadWithHtml::from_value(value.clone()),
            None => Err(MigrateError::Permission(format!("thread {}", id))),
        }
    }

    fn get_folder(&self, id: &str) -> Result<FolderEnvelope> {
        self.tick();
        let value = self
            .folders
            .borrow()
            .get(id)
            .cloned()
            .ok_or_else(|| MigrateError::Permission(format!("folder {}", id)))?;
        serde_json::from_value(value).map_err(|e| MigrateError::consistency(e.to_string()))
    }

    fn export(&self, thread: &ThreadMetadata, _: FileType) -> Result<Vec<u8>> {
        self.tick();
        self.exports
            .get(&thread.id)
            .cloned()
            .ok_or_else(|| MigrateError::Permission(format!("export {}", thread.id)))
    }

    fn recent_messages(&self, thread_id: &str) -> Result<Vec<Message>> {
        self.tick();
        self.messages
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|m| serde_json::from_value(m).map_err(|e| MigrateError::consistency(e.to_string())))
            .collect()
    }

    fn get_user(&self, _: &str) -> Result<Option<QuipUser>> {
        self.tick();
        Ok(None)
    }
}

/// Destination that hands out sequential ids and records every call.
#[derive(Default)]
struct FakeDrive {
    next: Cell<u32>,
    calls: RefCell<Vec<String>>,
}

impl FakeDrive {
    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn total(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl DestinationService for FakeDrive {
    fn generate_ids(&self, count: usize, kind: IdKind) -> Result<Vec<String>> {
        self.record(format!("generate_ids {}", count));
        let prefix = match kind {
            IdKind::Files => "G",
            IdKind::Shortcuts => "SC",
        };
        Ok((0..count)
            .map(|_| {
                self.next.set(self.next.get() + 1);
                format!("{}{}", prefix, self.next.get())
            })
            .collect())
    }

    fn create_folder(&self, name: &str, id: &str, parent: Option<&str>) -> Result<String> {
        self.record(format!("create_folder {} {:?}", name, parent));
        Ok(id.to_string())
    }

    fn create_file(&self, name: &str, id: &str, parent: &str, source: &Path) -> Result<String> {
        assert!(source.exists(), "{} does not exist", source.display());
        self.record(format!("create_file {} {}", name, parent));
        Ok(id.to_string())
    }

    fn create_shortcut(&self, target_id: &str, parent: &str, name: &str, id: &str) -> Result<String> {
        self.record(format!("create_shortcut {} -> {} in {}", name, target_id, parent));
        Ok(id.to_string())
    }

    fn update_file(&self, id: &str, _: &Path) -> Result<()> {
        self.record(format!("update_file {}", id));
        Ok(())
    }

    fn list_folder_contents(&self, folder_id: Option<&str>) -> Result<Vec<DriveResource>> {
        self.record(format!("list {:?}", folder_id));
        Ok(Vec::new())
    }

    fn transfer_ownership(&self, file_id: &str, email: &str) -> Result<()> {
        self.record(format!("transfer {} {}", file_id, email));
        Ok(())
    }
}

fn setup() -> (TempDir, RunContext) {
    let tmp = TempDir::new().unwrap();
    let base = tmp.path();
    fs::write(
        base.join("users.json"),
        r#"{"Resources":[{"id":"AUTHOR1","emails":[{"value":"ann@example.com"}],"name":{"formatted":"Ann Author"}}]}"#,
    )
    .unwrap();

    let mut config = parse_config(
        "[quip]\nroot_folder_id = \"R\"\nbase_url = \"https://jetbrains.quip.com/\"\n\n[drive]\nroot_folder_name = \"Migrated\"\n",
    )
    .unwrap();
    config.paths.downloaded = base.join("mirror");
    config.paths.users_scim = base.join("users.json");
    config.paths.extra_emails = base.join("extra_emails.json");
    config.paths.extra_id_replacements = base.join("aliases.jsonc");
    config.paths.unresolved_links_report = base.join("unresolved_links.tsv");
    config.paths.migrated_files_report = base.join("migrated_files.tsv");
    config.paths.all_users_report = base.join("all_users.tsv");

    let ctx = RunContext::new(config).unwrap();
    (tmp, ctx)
}

fn file(ctx: &RunContext, relative: &str) -> FileLocation {
    FileLocation::load(&ctx.root().join(relative)).unwrap().unwrap()
}

fn dest_id(ctx: &RunContext, relative: &str) -> String {
    file(ctx, relative)
        .descriptor()
        .destination_file_id
        .clone()
        .unwrap()
}

fn mirror_path(ctx: &RunContext, relative: &str) -> PathBuf {
    ctx.root().join(relative)
}

#[test]
fn structure_download_resumes_without_remote_calls() {
    let (_tmp, ctx) = setup();
    let quip = FakeQuip::workspace();

    let tally = download_structure(&ctx, &quip).unwrap();
    assert_eq!(tally.get("documents written"), 3);
    assert_eq!(tally.get("documents inaccessible"), 1);
    assert!(mirror_path(&ctx, "_folder.json").exists());
    assert!(mirror_path(&ctx, "D1.json").exists());
    assert!(mirror_path(&ctx, "S1/_folder.json").exists());
    assert!(mirror_path(&ctx, "S1/D1.json").exists());
    assert!(mirror_path(&ctx, "S1/D2.json").exists());
    assert!(!mirror_path(&ctx, "D3.json").exists());

    let calls = quip.calls.get();
    let tally = download_structure(&ctx, &quip).unwrap();
    assert_eq!(quip.calls.get(), calls);
    assert_eq!(tally.get("folders skipped"), 1);
}

#[test]
fn actualize_prunes_removed_entries_and_keeps_destination_fields() {
    let (_tmp, ctx) = setup();
    let quip = FakeQuip::workspace();
    download_structure(&ctx, &quip).unwrap();

    FolderLocation::load(&mirror_path(&ctx, "S1"))
        .unwrap()
        .unwrap()
        .update(|d| d.destination_folder_id = Some("GF".into()))
        .unwrap();
    fs::write(mirror_path(&ctx, "S1/D2.docx"), b"stale").unwrap();

    quip.folders.borrow_mut().insert(
        "S1".into(),
        folder_json("S1", "Specs (renamed)", json!([{"thread_id": "D1"}])),
    );
    let tally = actualize_structure(&ctx, &quip).unwrap();
    assert_eq!(tally.get("files removed"), 2);
    assert!(!mirror_path(&ctx, "S1/D2.json").exists());
    assert!(!mirror_path(&ctx, "S1/D2.docx").exists());
    assert!(mirror_path(&ctx, "S1/D1.json").exists());

    let folder = FolderLocation::load(&mirror_path(&ctx, "S1")).unwrap().unwrap();
    assert_eq!(folder.title(), "Specs (renamed)");
    assert_eq!(folder.descriptor().destination_folder_id.as_deref(), Some("GF"));
}

#[test]
fn full_migration_is_idempotent() {
    let (tmp, ctx) = setup();
    let quip = FakeQuip::workspace();
    let drive = FakeDrive::default();

    // Download.
    download_structure(&ctx, &quip).unwrap();
    assert_eq!(mark_originals(ctx.root()).unwrap(), 3);
    assert!(!file(&ctx, "D1.json").is_shortcut());
    assert!(file(&ctx, "S1/D1.json").is_shortcut());

    assert_eq!(download_files(&ctx, &quip).unwrap().get("downloaded"), 2);
    assert!(mirror_path(&ctx, "D1.docx").exists());
    assert!(!mirror_path(&ctx, "S1/D1.docx").exists());
    assert_eq!(download_comments(&ctx, &quip).unwrap().get("downloaded"), 2);
    let threads = file(&ctx, "D1.json").descriptor().comment_threads.clone().unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].comments[0].author, "Ann Author");

    let calls = quip.calls.get();
    download_files(&ctx, &quip).unwrap();
    download_comments(&ctx, &quip).unwrap();
    assert_eq!(quip.calls.get(), calls);

    // Destination ids.
    let tally = generate_ids(&ctx, &drive).unwrap();
    assert_eq!(tally.get("folder ids"), 2);
    assert_eq!(tally.get("document ids"), 2);
    assert_eq!(tally.get("shortcut ids"), 1);
    assert_eq!(drive.count("generate_ids"), 2);
    let d1 = dest_id(&ctx, "D1.json");
    let d2 = dest_id(&ctx, "S1/D2.json");
    let duplicate = file(&ctx, "S1/D1.json");
    assert_eq!(
        duplicate.descriptor().original_destination_file_id.as_deref(),
        Some(d1.as_str())
    );
    assert!(duplicate
        .descriptor()
        .destination_file_id
        .as_deref()
        .unwrap()
        .starts_with("SC"));

    let before = drive.total();
    assert_eq!(generate_ids(&ctx, &drive).unwrap().get("shortcut ids"), 0);
    assert_eq!(drive.total(), before);

    // Document processing.
    let mapping = ctx.build_mapping().unwrap();
    let d2_link = format!("https://docs.google.com/document/d/{}", d2);
    let mut report = UnresolvedLinkReport::new();

    insert_comments(&ctx, &mapping, &MarkdownCompanion, &mut report).unwrap();
    let companion = fs::read_to_string(mirror_path(&ctx, "D1_comments.md")).unwrap();
    assert!(companion.starts_with("# Comments on Plan\n"));
    assert!(companion.contains(&format!("See {} for numbers", d2_link)));
    assert!(!mirror_path(&ctx, "S1/D2_comments.md").exists());
    assert!(report.is_empty());

    let tally = insert_authors(&ctx, None).unwrap();
    assert_eq!(tally.get("author inserted"), 2);

    update_links(&ctx, &mapping, &mut report).unwrap();
    let final_d1 = mirror_path(&ctx, "D1_with_comments_and_author_and_links.docx");
    let rels = read_entry(&final_d1, RELS_PART);
    assert!(rels.contains(&format!("Target=\"{}\"", d2_link)));
    assert!(rels.contains("Target=\"https://jetbrains.quip.com/GONE42\""));
    assert!(rels.contains("Target=\"https://example.com/\""));
    assert!(read_entry(&final_d1, BODY_PART)
        .contains("Author: Ann Author, email ann@example.com, created on Mon, 3 Jan 2022 10:00:00 GMT"));
    assert!(mirror_path(&ctx, "S1/D2_with_comments_and_author_and_links.docx").exists());
    assert_eq!(report.len(), 1);
    assert_eq!(report.records()[0].link, "https://jetbrains.quip.com/GONE42");

    // Upload.
    let tally = upload(&ctx, &drive).unwrap();
    assert_eq!(tally.get("folders created"), 2);
    assert_eq!(tally.get("documents uploaded"), 2);
    assert_eq!(tally.get("comment files"), 1);
    assert_eq!(tally.get("shortcuts created"), 1);
    assert_eq!(drive.count("create_folder Migrated None"), 1);
    assert_eq!(drive.count("create_folder Root Some("), 1);
    assert_eq!(drive.count("create_file Plan (comments).md"), 1);
    assert_eq!(drive.count(&format!("create_shortcut Plan -> {}", d1)), 1);

    let before = drive.total();
    let tally = upload(&ctx, &drive).unwrap();
    assert_eq!(tally.get("already uploaded"), 3);
    assert_eq!(drive.total(), before);

    let tally = reupload(&ctx, &drive).unwrap();
    assert_eq!(tally.get("documents updated"), 2);
    assert_eq!(drive.count(&format!("update_file {}", d1)), 1);

    let manifest = tmp.path().join("manifest.tsv");
    collect_manifest(&ctx, Some(&manifest)).unwrap();
    assert_eq!(fs::read_to_string(&manifest).unwrap().lines().count(), 6);

    // Ownership.
    let tally = transfer_ownership(&ctx, &drive, None).unwrap();
    assert_eq!(tally.get("transferred"), 2);
    assert_eq!(drive.count("transfer"), 3);
    assert_eq!(drive.count(&format!("transfer {} ann@example.com", d1)), 1);

    let before = drive.total();
    transfer_ownership(&ctx, &drive, None).unwrap();
    assert_eq!(drive.total(), before);
}

#[test]
fn root_folder_link_resolves_after_generate_ids() {
    let (_tmp, ctx) = setup();
    let quip = FakeQuip::workspace();
    let drive = FakeDrive::default();
    download_structure(&ctx, &quip).unwrap();
    mark_originals(ctx.root()).unwrap();
    generate_ids(&ctx, &drive).unwrap();

    let root_id = FolderLocation::load(ctx.root())
        .unwrap()
        .unwrap()
        .descriptor()
        .destination_folder_id
        .clone()
        .unwrap();
    let mapping = ctx.build_mapping().unwrap();
    let root_link = format!("https://drive.google.com/drive/folders/{}", root_id);
    assert_eq!(mapping.get("R"), Some(root_link.as_str()));
    assert_eq!(mapping.get("r"), Some(root_link.as_str()));
    assert!(mapping.get("S1").is_some());

    // Upload creates the root under the named destination folder, then
    // stops at the first document without a final variant.
    let err = upload(&ctx, &drive).unwrap_err();
    assert!(matches!(err, MigrateError::Precondition(_)), "{}", err);
    assert_eq!(drive.count("create_folder Migrated None"), 1);
    assert_eq!(drive.count("create_folder Root Some("), 1);
}

#[test]
fn refused_export_stops_download_files() {
    let (_tmp, ctx) = setup();
    let mut quip = FakeQuip::workspace();
    quip.exports.remove("D2");
    download_structure(&ctx, &quip).unwrap();
    mark_originals(ctx.root()).unwrap();

    let err = download_files(&ctx, &quip).unwrap_err();
    assert!(matches!(err, MigrateError::Permission(_)), "{}", err);
    assert!(err.to_string().contains("D2"), "{}", err);
    assert!(!mirror_path(&ctx, "S1/D2.docx").exists());
}

#[test]
fn find_links_reports_without_writing() {
    let (_tmp, ctx) = setup();
    let quip = FakeQuip::workspace();
    download_structure(&ctx, &quip).unwrap();
    mark_originals(ctx.root()).unwrap();
    download_files(&ctx, &quip).unwrap();
    download_comments(&ctx, &quip).unwrap();

    // No destination ids yet: every source link is unresolved.
    let mapping = ctx.build_mapping().unwrap();
    let mut report = UnresolvedLinkReport::new();
    let tally = find_links(&ctx, &mapping, &mut report).unwrap();
    assert_eq!(tally.get("suspicious links"), 2);
    assert_eq!(tally.get("unresolved comment links"), 1);
    assert_eq!(report.len(), 3);
    assert!(!mirror_path(&ctx, "D1_with_comments_and_author_and_links.docx").exists());
}

#[test]
fn missing_upstream_variant_is_a_precondition_error() {
    let (_tmp, ctx) = setup();
    let quip = FakeQuip::workspace();
    download_structure(&ctx, &quip).unwrap();
    mark_originals(ctx.root()).unwrap();
    download_files(&ctx, &quip).unwrap();

    let mapping = ctx.build_mapping().unwrap();
    let mut report = UnresolvedLinkReport::new();
    let err = insert_comments(&ctx, &mapping, &MarkdownCompanion, &mut report).unwrap_err();
    assert!(matches!(err, MigrateError::Precondition(_)), "{}", err);

    let err = update_links(&ctx, &mapping, &mut report).unwrap_err();
    assert!(matches!(err, MigrateError::Precondition(_)), "{}", err);
}

#[test]
fn reset_drive_info_forgets_ids() {
    let (_tmp, ctx) = setup();
    let quip = FakeQuip::workspace();
    let drive = FakeDrive::default();
    download_structure(&ctx, &quip).unwrap();
    mark_originals(ctx.root()).unwrap();
    generate_ids(&ctx, &drive).unwrap();

    let tally = reset_drive_info(&ctx).unwrap();
    assert_eq!(tally.get("folders reset"), 2);
    assert_eq!(tally.get("documents reset"), 3);
    assert!(file(&ctx, "D1.json").descriptor().destination_file_id.is_none());
    assert!(file(&ctx, "S1/D1.json")
        .descriptor()
        .original_destination_file_id
        .is_none());

    generate_ids(&ctx, &drive).unwrap();
    assert_eq!(drive.count("generate_ids"), 4);
}
