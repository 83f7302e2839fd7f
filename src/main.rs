//! # Quip Drive Migrate CLI (`qdm`)
//!
//! Every pass of the migration is a subcommand. Passes are idempotent: each
//! one can be interrupted and re-run, and a re-run over finished work does
//! nothing.
//!
//! ## Usage
//!
//! ```bash
//! qdm --config ./config/qdm.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `qdm download-structure` | Mirror the folder tree and document metadata |
//! | `qdm actualize-structure` | Refresh the mirror against the source |
//! | `qdm mark-originals` | Pick the canonical copy of duplicated documents |
//! | `qdm download-files` | Export documents (docx, xlsx, pdf) |
//! | `qdm download-comments` | Fetch and anchor comments |
//! | `qdm insert-comments` | Build the with-comments variant |
//! | `qdm insert-authors` | Build the with-author variant |
//! | `qdm update-links` | Rewrite links into the final variant |
//! | `qdm find-links` | Report links the mapping cannot resolve |
//! | `qdm generate-ids` | Reserve destination ids |
//! | `qdm upload` | Create folders, files and shortcuts |
//! | `qdm reupload` | Push current final variants over uploaded files |
//! | `qdm collect-manifest` | Write the migrated files report |
//! | `qdm extract-users` | Write the users report |
//! | `qdm transfer-ownership` | Give files to their authors |
//! | `qdm reset-drive-info` | Forget destination ids |
//! | `qdm reset-structure` | Delete folder sidecars |
//! | `qdm download-all` | Structure, originals, files, comments |
//! | `qdm process-documents` | Ids, comments, authors, links |
//! | `qdm upload-all` | Upload and manifest |
//!
//! ## Environment
//!
//! `QUIP_ACCESS_TOKEN` and `DRIVE_ACCESS_TOKEN` hold the API tokens (the
//! variable names are configurable). `RUST_LOG` controls log verbosity.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use quip_drive_migrate::authors::insert_authors;
use quip_drive_migrate::comments::{insert_comments, MarkdownCompanion};
use quip_drive_migrate::config::{self, Config};
use quip_drive_migrate::context::RunContext;
use quip_drive_migrate::download::{
    actualize_structure, download_comments, download_files, download_structure,
};
use quip_drive_migrate::drive::DriveClient;
use quip_drive_migrate::manifest::{collect_manifest, extract_users};
use quip_drive_migrate::mapping::mark_originals;
use quip_drive_migrate::progress::Tally;
use quip_drive_migrate::quip::{QuipClient, SourcePlatform};
use quip_drive_migrate::report::{LinkKind, UnresolvedLinkReport};
use quip_drive_migrate::update_links::{find_links, update_links};
use quip_drive_migrate::upload::{
    generate_ids, reset_drive_info, reset_structure, reupload, transfer_ownership, upload,
};

/// Quip to Google Drive migration.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/qdm.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "qdm",
    about = "Resumable Quip to Google Drive migration",
    version,
    long_about = "Migrates a Quip folder tree into Google Drive as a sequence of resumable \
    passes over a local mirror, preserving folders, comments, authorship and links between \
    documents."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/qdm.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror the remote folder tree. Existing sidecars are kept.
    DownloadStructure,

    /// Re-fetch every folder, prune what was deleted remotely and download
    /// what is new.
    ActualizeStructure,

    /// Mark the first copy of every document as original, later copies as
    /// duplicates.
    MarkOriginals,

    /// Export every original document that has no local file yet.
    DownloadFiles,

    /// Fetch comments of documents that have none stored.
    DownloadComments,

    /// Write the with-comments variant and comment companions.
    InsertComments,

    /// Write the with-author variant.
    InsertAuthors,

    /// Rewrite document links into the final variant.
    UpdateLinks,

    /// Report unresolvable links without writing any document.
    FindLinks,

    /// Reserve destination ids for folders, documents and shortcuts.
    GenerateIds,

    /// Create folders, upload documents and create shortcuts.
    Upload,

    /// Replace the content of uploaded documents with their current final
    /// variant.
    Reupload,

    /// Write the migrated files report.
    CollectManifest {
        /// Output file; `-` for stdout. Defaults to the configured path.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Write the users report.
    ExtractUsers {
        /// Output file; `-` for stdout. Defaults to the configured path.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Transfer ownership of uploaded documents to their authors.
    TransferOwnership,

    /// Forget every destination id and upload flag.
    ResetDriveInfo,

    /// Delete all folder sidecars so the structure is downloaded again.
    ResetStructure,

    /// download-structure, mark-originals, download-files, download-comments.
    DownloadAll,

    /// generate-ids, insert-comments, insert-authors, update-links.
    ProcessDocuments,

    /// upload, collect-manifest.
    UploadAll,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();
}

fn quip_client(cfg: &Config) -> Result<QuipClient> {
    Ok(QuipClient::new(
        &cfg.quip.api_base,
        cfg.quip_token()?,
        cfg.backoff(),
    )?)
}

fn drive_client(cfg: &Config) -> Result<DriveClient> {
    Ok(DriveClient::new(
        &cfg.drive.api_base,
        &cfg.drive.upload_base,
        cfg.drive_token()?,
        cfg.backoff(),
    )?)
}

/// Source client when a token is available. Used only to fill in names of
/// unknown users.
fn optional_quip_client(cfg: &Config) -> Option<QuipClient> {
    quip_client(cfg).ok()
}

fn print_tally(name: &str, tally: &Tally) {
    println!("{}", name);
    print!("{}", tally);
}

/// `replaced` names the record kinds this run owns; `None` rewrites the
/// whole report.
fn write_report(
    ctx: &RunContext,
    report: &UnresolvedLinkReport,
    replaced: Option<&[LinkKind]>,
) -> Result<()> {
    let path = &ctx.config.paths.unresolved_links_report;
    let written = match replaced {
        Some(kinds) => report.merge_into(path, kinds),
        None => report.write(path),
    };
    written.with_context(|| format!("Failed to write {}", path.display()))?;
    println!("  unresolved links: {} ({})", report.len(), path.display());
    Ok(())
}

/// `-` selects stdout.
fn report_target<'p>(output: Option<&'p Path>, default: &'p Path) -> Option<&'p Path> {
    match output {
        Some(path) if path == Path::new("-") => None,
        Some(path) => Some(path),
        None => Some(default),
    }
}

fn run_download_all(ctx: &RunContext) -> Result<()> {
    let quip = quip_client(&ctx.config)?;
    print_tally("download-structure", &download_structure(ctx, &quip)?);
    let marked = mark_originals(ctx.root())?;
    println!("mark-originals\n  sidecars updated: {}", marked);
    print_tally("download-files", &download_files(ctx, &quip)?);
    print_tally("download-comments", &download_comments(ctx, &quip)?);
    Ok(())
}

fn run_process_documents(ctx: &RunContext) -> Result<()> {
    let drive = drive_client(&ctx.config)?;
    print_tally("generate-ids", &generate_ids(ctx, &drive)?);

    let mapping = ctx.build_mapping()?;
    let mut report = UnresolvedLinkReport::new();
    print_tally(
        "insert-comments",
        &insert_comments(ctx, &mapping, &MarkdownCompanion, &mut report)?,
    );
    let quip = optional_quip_client(&ctx.config);
    print_tally(
        "insert-authors",
        &insert_authors(ctx, quip.as_ref().map(|q| q as &dyn SourcePlatform))?,
    );
    print_tally("update-links", &update_links(ctx, &mapping, &mut report)?);
    write_report(ctx, &report, None)
}

fn run_upload_all(ctx: &RunContext) -> Result<()> {
    let drive = drive_client(&ctx.config)?;
    print_tally("upload", &upload(ctx, &drive)?);
    let output = ctx.config.paths.migrated_files_report.clone();
    print_tally("collect-manifest", &collect_manifest(ctx, Some(&output))?);
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    let ctx = RunContext::new(cfg).context("Failed to load the user directory")?;

    match cli.command {
        Commands::DownloadStructure => {
            let quip = quip_client(&ctx.config)?;
            print_tally("download-structure", &download_structure(&ctx, &quip)?);
        }
        Commands::ActualizeStructure => {
            let quip = quip_client(&ctx.config)?;
            print_tally("actualize-structure", &actualize_structure(&ctx, &quip)?);
        }
        Commands::MarkOriginals => {
            let marked = mark_originals(ctx.root())?;
            println!("mark-originals\n  sidecars updated: {}", marked);
        }
        Commands::DownloadFiles => {
            let quip = quip_client(&ctx.config)?;
            print_tally("download-files", &download_files(&ctx, &quip)?);
        }
        Commands::DownloadComments => {
            let quip = quip_client(&ctx.config)?;
            print_tally("download-comments", &download_comments(&ctx, &quip)?);
        }
        Commands::InsertComments => {
            let mapping = ctx.build_mapping()?;
            let mut report = UnresolvedLinkReport::new();
            print_tally(
                "insert-comments",
                &insert_comments(&ctx, &mapping, &MarkdownCompanion, &mut report)?,
            );
            write_report(&ctx, &report, Some(&[LinkKind::Unresolved][..]))?;
        }
        Commands::InsertAuthors => {
            let quip = optional_quip_client(&ctx.config);
            print_tally(
                "insert-authors",
                &insert_authors(&ctx, quip.as_ref().map(|q| q as &dyn SourcePlatform))?,
            );
        }
        Commands::UpdateLinks => {
            let mapping = ctx.build_mapping()?;
            let mut report = UnresolvedLinkReport::new();
            print_tally("update-links", &update_links(&ctx, &mapping, &mut report)?);
            write_report(&ctx, &report, Some(&[LinkKind::Suspicious][..]))?;
        }
        Commands::FindLinks => {
            let mapping = ctx.build_mapping()?;
            let mut report = UnresolvedLinkReport::new();
            print_tally("find-links", &find_links(&ctx, &mapping, &mut report)?);
            write_report(&ctx, &report, None)?;
        }
        Commands::GenerateIds => {
            let drive = drive_client(&ctx.config)?;
            print_tally("generate-ids", &generate_ids(&ctx, &drive)?);
        }
        Commands::Upload => {
            let drive = drive_client(&ctx.config)?;
            print_tally("upload", &upload(&ctx, &drive)?);
        }
        Commands::Reupload => {
            let drive = drive_client(&ctx.config)?;
            print_tally("reupload", &reupload(&ctx, &drive)?);
        }
        Commands::CollectManifest { output } => {
            let target = report_target(output.as_deref(), &ctx.config.paths.migrated_files_report);
            print_tally("collect-manifest", &collect_manifest(&ctx, target)?);
        }
        Commands::ExtractUsers { output } => {
            let target = report_target(output.as_deref(), &ctx.config.paths.all_users_report);
            print_tally("extract-users", &extract_users(&ctx, target)?);
        }
        Commands::TransferOwnership => {
            let drive = drive_client(&ctx.config)?;
            let quip = optional_quip_client(&ctx.config);
            print_tally(
                "transfer-ownership",
                &transfer_ownership(&ctx, &drive, quip.as_ref().map(|q| q as &dyn SourcePlatform))?,
            );
        }
        Commands::ResetDriveInfo => {
            print_tally("reset-drive-info", &reset_drive_info(&ctx)?);
        }
        Commands::ResetStructure => {
            print_tally("reset-structure", &reset_structure(&ctx)?);
        }
        Commands::DownloadAll => run_download_all(&ctx)?,
        Commands::ProcessDocuments => run_process_documents(&ctx)?,
        Commands::UploadAll => run_upload_all(&ctx)?,
    }

    println!("ok");
    Ok(())
}
