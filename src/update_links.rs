//! Hyperlink passes over the prepared documents.

use std::fs;

use crate::context::RunContext;
use crate::error::{MigrateError, Result};
use crate::mapping::IdentifierMapping;
use crate::models::ThreadType;
use crate::ooxml::rewrite_links;
use crate::progress::Tally;
use crate::report::{LinkKind, UnresolvedLinkReport};
use crate::resolve::SourceLinkResolver;
use crate::sidecar::write_atomic;
use crate::text_links::unresolved_links_in_text;
use crate::walker::TreeWalker;

/// Writes the final variant of every original: the with-comments-and-author
/// variant with its relationship targets resolved, or an exact copy when
/// nothing resolved. Always regenerated, since the mapping grows as ids are
/// assigned.
pub fn update_links(
    ctx: &RunContext,
    mapping: &IdentifierMapping,
    report: &mut UnresolvedLinkReport,
) -> Result<Tally> {
    let resolver = SourceLinkResolver::new(mapping, &ctx.users);
    let mut tally = Tally::new();
    TreeWalker::new(ctx.root())
        .named("update-links")
        .skip_shortcuts(true)
        .for_each_file(|file, progress| {
            if file.kind() == ThreadType::Chat {
                tally.add("chats skipped");
                return Ok(());
            }
            let source = file.with_comments_and_author_path()?;
            let bytes = fs::read(&source).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => MigrateError::Precondition(format!(
                    "{} is missing; run insert-authors first",
                    source.display()
                )),
                _ => MigrateError::io(&source, e),
            })?;

            let rewrite = rewrite_links(&bytes, file.file_type()?, &resolver)?;
            for link in &rewrite.suspicious {
                progress.warn(&format!("unresolved link {}", link));
                report.record(file, &ctx.users, link, LinkKind::Suspicious);
            }
            for (from, to) in &rewrite.replacements {
                tracing::debug!("{} -> {}", from, to);
            }
            if !rewrite.replacements.is_empty() {
                progress.log(&format!("{} links rewritten", rewrite.replacements.len()));
            }

            tally.add("documents");
            tally.add_n("links rewritten", rewrite.replacements.len() as u64);
            tally.add_n("suspicious links", rewrite.suspicious.len() as u64);
            let output = rewrite.bytes.as_deref().unwrap_or(&bytes);
            write_atomic(&file.final_path()?, output)
        })?;
    Ok(tally)
}

/// Read-only survey: records the links of raw exports and comment text that
/// the current mapping cannot resolve.
pub fn find_links(
    ctx: &RunContext,
    mapping: &IdentifierMapping,
    report: &mut UnresolvedLinkReport,
) -> Result<Tally> {
    let resolver = SourceLinkResolver::new(mapping, &ctx.users);
    let mut tally = Tally::new();
    TreeWalker::new(ctx.root())
        .named("find-links")
        .skip_shortcuts(true)
        .for_each_file(|file, progress| {
            if file.kind() == ThreadType::Chat {
                return Ok(());
            }
            let path = file.document_path()?;
            if path.exists() {
                let bytes = fs::read(&path).map_err(|e| MigrateError::io(&path, e))?;
                let rewrite = rewrite_links(&bytes, file.file_type()?, &resolver)?;
                tally.add_n("resolvable links", rewrite.replacements.len() as u64);
                for link in &rewrite.suspicious {
                    report.record(file, &ctx.users, link, LinkKind::Suspicious);
                    tally.add("suspicious links");
                }
            } else {
                progress.warn("not downloaded");
                tally.add("documents not downloaded");
            }

            for thread in file.descriptor().comment_threads.iter().flatten() {
                for comment in &thread.comments {
                    for link in unresolved_links_in_text(&comment.text, &resolver)? {
                        report.record(file, &ctx.users, &link, LinkKind::Unresolved);
                        tally.add("unresolved comment links");
                    }
                }
            }
            tally.add("documents");
            Ok(())
        })?;
    Ok(tally)
}
