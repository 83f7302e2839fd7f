//! Document comments: anchoring, link rewriting and insertion.
//!
//! Messages are grouped by annotation. A group is anchored to the text of the
//! sections its annotation highlights; messages without an annotation belong
//! to the document chat. Insertion into the document itself sits behind
//! [`CommentInserter`]; the built-in [`MarkdownCompanion`] writes the threads
//! next to the document instead of editing its XML.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use chrono::DateTime;
use regex::Regex;

use crate::context::RunContext;
use crate::error::{MigrateError, Result};
use crate::location::FileLocation;
use crate::mapping::IdentifierMapping;
use crate::models::{Comment, CommentThread, SectionAnchor, ThreadType};
use crate::progress::Tally;
use crate::quip::Message;
use crate::report::{LinkKind, UnresolvedLinkReport};
use crate::resolve::{LinkResolver, SourceLinkResolver};
use crate::sidecar::write_atomic;
use crate::text_links::rewrite_text;
use crate::walker::TreeWalker;

static ELEMENT_WITH_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<([a-zA-Z][\w-]*)\b[^>]*?\sid=['"]([^'"]+)['"][^>]*>"#)
        .expect("element id regex")
});

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag regex"));

static NAMED_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(/?)([a-zA-Z][\w-]*)\b[^>]*?(/?)>").expect("named tag regex")
});

/// Content of an element whose open tag ends where `rest` starts: up to the
/// matching close tag, counting nested elements of the same name. Unclosed
/// elements run to the end.
fn element_content<'h>(rest: &'h str, tag: &str) -> &'h str {
    let mut depth = 0usize;
    for captures in NAMED_TAG.captures_iter(rest) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(2)) else {
            continue;
        };
        if !name.as_str().eq_ignore_ascii_case(tag) {
            continue;
        }
        let closing = captures.get(1).is_some_and(|m| !m.is_empty());
        let self_closing = captures.get(3).is_some_and(|m| !m.is_empty());
        if closing {
            if depth == 0 {
                return &rest[..whole.start()];
            }
            depth -= 1;
        } else if !self_closing {
            depth += 1;
        }
    }
    rest
}

/// Plain text of every element carrying an `id`, keyed by that id.
pub fn section_texts(html: &str) -> HashMap<String, String> {
    let mut sections = HashMap::new();
    for captures in ELEMENT_WITH_ID.captures_iter(html) {
        let (Some(whole), Some(tag), Some(id)) = (captures.get(0), captures.get(1), captures.get(2))
        else {
            continue;
        };
        let inner = element_content(&html[whole.end()..], tag.as_str());
        let text = TAG.replace_all(inner, "");
        let text = quick_xml::escape::unescape(&text)
            .map(|t| t.into_owned())
            .unwrap_or_else(|_| text.to_string());
        sections
            .entry(id.as_str().to_string())
            .or_insert_with(|| text.trim().to_string());
    }
    sections
}

/// Section ids a message refers to. Empty for document-chat messages.
fn section_ids(message: &Message) -> BTreeSet<String> {
    match &message.annotation {
        None => BTreeSet::new(),
        Some(annotation) => match &annotation.highlight_section_ids {
            Some(ids) if !ids.is_empty() => ids.iter().cloned().collect(),
            _ => BTreeSet::from([annotation.id.clone()]),
        },
    }
}

fn anchor(ids: &BTreeSet<String>, sections: &HashMap<String, String>) -> SectionAnchor {
    if ids.is_empty() {
        return SectionAnchor::DocumentChat;
    }
    let mut texts = Vec::with_capacity(ids.len());
    for id in ids {
        match sections.get(id) {
            Some(text) => texts.push(text.as_str()),
            None => return SectionAnchor::DeletedSection,
        }
    }
    SectionAnchor::Highlight(texts.join("\n"))
}

/// Groups `messages` (oldest first) into anchored threads, ordered by their
/// first message. A group whose messages disagree on the highlighted
/// sections is a consistency error.
pub fn build_comment_threads(
    messages: &[Message],
    html: Option<&str>,
) -> Result<Vec<CommentThread>> {
    let sections = html.map(section_texts).unwrap_or_default();

    let mut order: Vec<Option<String>> = Vec::new();
    let mut groups: HashMap<Option<String>, Vec<&Message>> = HashMap::new();
    for message in messages {
        let key = message.annotation.as_ref().map(|a| a.id.clone());
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(message);
    }

    let mut threads = Vec::with_capacity(order.len());
    for key in order {
        let members = groups.remove(&key).unwrap_or_default();
        let distinct: BTreeSet<BTreeSet<String>> =
            members.iter().map(|m| section_ids(m)).collect();
        if distinct.len() > 1 {
            return Err(MigrateError::consistency(format!(
                "comment thread {} refers to {} different section sets",
                key.as_deref().unwrap_or("<document chat>"),
                distinct.len()
            )));
        }
        let ids = distinct.into_iter().next().unwrap_or_default();
        threads.push(CommentThread {
            section: anchor(&ids, &sections),
            comments: members
                .into_iter()
                .map(|m| Comment {
                    author: if m.author_name.is_empty() {
                        m.author_id.clone()
                    } else {
                        m.author_name.clone()
                    },
                    author_id: m.author_id.clone(),
                    created_usec: m.created_usec,
                    text: m.text.clone(),
                })
                .collect(),
        });
    }
    Ok(threads)
}

/// Attaches comment threads to a document, producing the with-comments
/// variant.
pub trait CommentInserter {
    fn insert(
        &self,
        file: &FileLocation,
        source: &Path,
        target: &Path,
        threads: &[CommentThread],
    ) -> Result<()>;
}

/// Copies the document unchanged and writes the threads to
/// `<id>_comments.md`.
pub struct MarkdownCompanion;

impl CommentInserter for MarkdownCompanion {
    fn insert(
        &self,
        file: &FileLocation,
        source: &Path,
        target: &Path,
        threads: &[CommentThread],
    ) -> Result<()> {
        let bytes = fs::read(source).map_err(|e| MigrateError::io(source, e))?;
        write_atomic(target, &bytes)?;

        let companion = file.comments_markdown_path();
        if threads.is_empty() {
            if companion.exists() {
                fs::remove_file(&companion).map_err(|e| MigrateError::io(&companion, e))?;
            }
            return Ok(());
        }
        write_atomic(&companion, render_markdown(file.title(), threads).as_bytes())
    }
}

fn format_usec(usec: i64) -> String {
    DateTime::from_timestamp_micros(usec)
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| usec.to_string())
}

fn quote(text: &str) -> String {
    text.lines()
        .map(|line| format!("> {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_markdown(title: &str, threads: &[CommentThread]) -> String {
    let mut out = format!("# Comments on {}\n", title);
    for thread in threads {
        out.push('\n');
        out.push_str(&quote(thread.section.display_text()));
        out.push('\n');
        for comment in &thread.comments {
            out.push_str(&format!(
                "\n### {} wrote at {}\n\n{}\n",
                comment.author,
                format_usec(comment.created_usec),
                quote(&comment.text)
            ));
        }
        out.push_str("\n---\n");
    }
    out
}

/// Comment threads with every resolvable source link rewritten; links that
/// stay unresolved are recorded.
fn rewrite_thread_links(
    file: &FileLocation,
    threads: &[CommentThread],
    resolver: &dyn LinkResolver,
    ctx: &RunContext,
    report: &mut UnresolvedLinkReport,
) -> Result<(Vec<CommentThread>, usize)> {
    let mentions =
        file.kind() == ThreadType::Spreadsheet && ctx.config.documents.mention_emails_in_spreadsheets;
    let mut replaced = 0;
    let mut out = Vec::with_capacity(threads.len());
    for thread in threads {
        let mut thread = thread.clone();
        for comment in &mut thread.comments {
            let rewrite = rewrite_text(&comment.text, resolver, mentions)?;
            for link in &rewrite.unresolved {
                report.record(file, &ctx.users, link, LinkKind::Unresolved);
            }
            replaced += rewrite.replacements.len();
            comment.text = rewrite.text;
        }
        out.push(thread);
    }
    Ok((out, replaced))
}

/// Builds the with-comments variant of every original document.
pub fn insert_comments(
    ctx: &RunContext,
    mapping: &IdentifierMapping,
    inserter: &dyn CommentInserter,
    report: &mut UnresolvedLinkReport,
) -> Result<Tally> {
    let resolver = SourceLinkResolver::new(mapping, &ctx.users);
    let mut tally = Tally::new();
    TreeWalker::new(ctx.root())
        .named("insert-comments")
        .skip_shortcuts(true)
        .for_each_file(|file, progress| {
            if file.kind() == ThreadType::Chat {
                tally.add("chats skipped");
                return Ok(());
            }
            let source = file.document_path()?;
            if !source.exists() {
                return Err(MigrateError::Precondition(format!(
                    "{} is missing; run download-files first",
                    source.display()
                )));
            }
            let Some(threads) = file.descriptor().comment_threads.as_deref() else {
                return Err(MigrateError::Precondition(format!(
                    "comments of {} are not downloaded; run download-comments first",
                    file.title_with_id()
                )));
            };
            let (threads, replaced) = rewrite_thread_links(file, threads, &resolver, ctx, report)?;
            inserter.insert(file, &source, &file.with_comments_path()?, &threads)?;
            if !threads.is_empty() {
                progress.log(&format!(
                    "{} comment threads, {} links rewritten",
                    threads.len(),
                    replaced
                ));
            }
            tally.add("documents");
            tally.add_n("comment threads", threads.len() as u64);
            tally.add_n("links rewritten", replaced as u64);
            Ok(())
        })?;
    Ok(tally)
}
