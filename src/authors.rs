//! Authorship: the leading "Author: ..." paragraph of migrated documents.

use std::collections::BTreeSet;
use std::fs;

use chrono::DateTime;

use crate::context::RunContext;
use crate::error::{MigrateError, Result};
use crate::models::{FileType, ThreadType};
use crate::ooxml::insert_author_paragraph;
use crate::progress::Tally;
use crate::quip::SourcePlatform;
use crate::sidecar::write_atomic;
use crate::walker::TreeWalker;

/// `Mon, 3 Jan 2022 10:00:00 GMT`.
pub fn rfc1123(usec: i64) -> String {
    DateTime::from_timestamp_micros(usec)
        .map(|t| t.format("%a, %-d %b %Y %H:%M:%S GMT").to_string())
        .unwrap_or_else(|| usec.to_string())
}

pub fn author_line(name: &str, email: Option<&str>, created_usec: i64) -> String {
    match email {
        Some(email) => format!(
            "Author: {}, email {}, created on {}",
            name,
            email,
            rfc1123(created_usec)
        ),
        None => format!("Author: {}, created on {}", name, rfc1123(created_usec)),
    }
}

/// Author ids of original documents the user directory has no name for,
/// sorted.
pub fn unknown_authors(ctx: &RunContext) -> Result<Vec<String>> {
    let mut missing = BTreeSet::new();
    TreeWalker::new(ctx.root())
        .skip_shortcuts(true)
        .for_each_file(|file, _| {
            if file.kind() != ThreadType::Chat {
                let author = &file.descriptor().thread().author_id;
                if ctx.users.name(author).is_none() {
                    missing.insert(author.clone());
                }
            }
            Ok(())
        })?;
    Ok(missing.into_iter().collect())
}

/// Builds the with-comments-and-author variant of every original. Fails with
/// `MissingUsers` before touching any file when an author is unknown.
pub fn insert_authors(ctx: &RunContext, quip: Option<&dyn SourcePlatform>) -> Result<Tally> {
    let insert = ctx.config.documents.insert_author_paragraph;
    if insert {
        let missing = unknown_authors(ctx)?;
        if !missing.is_empty() {
            return Err(ctx.missing_users(quip, &missing));
        }
    }

    let mut tally = Tally::new();
    TreeWalker::new(ctx.root())
        .named("insert-authors")
        .skip_shortcuts(true)
        .for_each_file(|file, progress| {
            if file.kind() == ThreadType::Chat {
                tally.add("chats skipped");
                return Ok(());
            }
            let source = file.with_comments_path()?;
            let bytes = fs::read(&source).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => MigrateError::Precondition(format!(
                    "{} is missing; run insert-comments first",
                    source.display()
                )),
                _ => MigrateError::io(&source, e),
            })?;

            let thread = file.descriptor().thread();
            let output = if insert && file.file_type()? == FileType::Docx {
                let name = ctx.users.name(&thread.author_id).unwrap_or_default();
                let line = author_line(name, ctx.users.email(&thread.author_id), thread.created_usec);
                progress.log(&line);
                tally.add("author inserted");
                insert_author_paragraph(&bytes, &line)?
            } else {
                tally.add("copied");
                bytes
            };
            write_atomic(&file.with_comments_and_author_path()?, &output)
        })?;
    Ok(tally)
}
