//! Zip-packaged OOXML containers (docx, xlsx).
//!
//! Hyperlinks in these formats live in `Relationship/@Target` attributes of
//! the `*.rels` parts. [`rewrite_links`] re-packs an archive with those
//! targets resolved; every other entry is raw-copied, compressed bytes and
//! all. [`insert_author_paragraph`] prepends one paragraph to a docx body.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::io::{Cursor, Read, Write};
use std::sync::LazyLock;

use quick_xml::events::{BytesStart, Event};
use regex::Regex;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::{MigrateError, Result};
use crate::models::FileType;
use crate::resolve::{mentions_source_domain, resolve_with_suffix_backtracking, LinkResolver};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_MARKDOWN: &str = "text/markdown";

/// Upper bound on a decompressed part we read into memory.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const DOCX_MAIN_PART: &str = "word/document.xml";

static BODY_OPEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<w:body(?:\s[^>]*)?>").expect("w:body regex"));

/// MIME type for an upload, by file extension.
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "pdf" => Some(MIME_PDF),
        "docx" => Some(MIME_DOCX),
        "xlsx" => Some(MIME_XLSX),
        "md" => Some(MIME_MARKDOWN),
        _ => None,
    }
}

/// Outcome of [`rewrite_links`].
#[derive(Debug, Default)]
pub struct LinkRewrite {
    /// New archive bytes; `None` when nothing was substituted.
    pub bytes: Option<Vec<u8>>,
    /// Original target -> resolved target.
    pub replacements: BTreeMap<String, String>,
    /// Unresolved targets that still mention the source domain.
    pub suspicious: Vec<String>,
}

/// A `Target` attribute as written in the part and as it reads unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipTarget {
    pub raw: String,
    pub value: String,
}

/// Distinct `Relationship/@Target` values of a `.rels` part, in document
/// order.
pub fn relationship_targets(xml: &str) -> Result<Vec<RelationshipTarget>> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().check_end_names = false;

    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"Relationship" {
                    if let Some(target) = target_attribute(&e)? {
                        if seen.insert(target.raw.clone()) {
                            targets.push(target);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(MigrateError::Xml(e.to_string())),
            _ => {}
        }
    }
    Ok(targets)
}

fn target_attribute(e: &BytesStart<'_>) -> Result<Option<RelationshipTarget>> {
    for attr in e.attributes().with_checks(false) {
        let attr = attr.map_err(|e| MigrateError::Xml(e.to_string()))?;
        if attr.key.as_ref() != b"Target" {
            continue;
        }
        let raw = String::from_utf8_lossy(&attr.value).into_owned();
        // A bare `&` is common in exported targets; keep such values verbatim.
        let value = attr
            .unescape_value()
            .map(Cow::into_owned)
            .unwrap_or_else(|_| raw.clone());
        return Ok(Some(RelationshipTarget { raw, value }));
    }
    Ok(None)
}

/// Replaces `Target="<raw>"` (either quote style) with the escaped
/// resolution. A target that cannot be found verbatim is a consistency
/// error.
fn substitute_target(content: &str, raw: &str, resolved: &str) -> Result<String> {
    let escaped = quick_xml::escape::escape(resolved);
    for quote in ['"', '\''] {
        let from = format!("Target={q}{}{q}", raw, q = quote);
        if content.contains(&from) {
            let to = format!("Target={q}{}{q}", escaped, q = quote);
            return Ok(content.replace(&from, &to));
        }
    }
    Err(MigrateError::consistency(format!(
        "failed to replace target {} with {} (attribute text not found)",
        raw, resolved
    )))
}

/// Resolves every relationship target of one `.rels` part. Returns the new
/// content only when at least one substitution happened.
fn rewrite_part(
    content: &str,
    resolver: &dyn LinkResolver,
    out: &mut LinkRewrite,
) -> Result<Option<String>> {
    let mut result = Cow::Borrowed(content);
    let mut changed = false;
    for target in relationship_targets(content)? {
        match resolve_with_suffix_backtracking(resolver, &target.value)? {
            Some(resolved) => {
                result = Cow::Owned(substitute_target(&result, &target.raw, &resolved)?);
                out.replacements.insert(target.value, resolved);
                changed = true;
            }
            None if mentions_source_domain(&target.value) => out.suspicious.push(target.value),
            None => {}
        }
    }
    Ok(changed.then(|| result.into_owned()))
}

fn read_bounded(reader: impl Read, name: &str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    reader
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(ZipError::Io)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(MigrateError::Xml(format!(
            "zip entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Rewrites hyperlinks of a docx/xlsx archive. Other formats are returned
/// untouched (`bytes == None`).
pub fn rewrite_links(
    bytes: &[u8],
    file_type: FileType,
    resolver: &dyn LinkResolver,
) -> Result<LinkRewrite> {
    let mut out = LinkRewrite::default();
    if !file_type.is_ooxml() {
        return Ok(out);
    }

    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut substituted = false;

    for i in 0..archive.len() {
        let name = archive.by_index_raw(i)?.name().to_string();
        if !name.ends_with(".rels") {
            writer.raw_copy_file(archive.by_index_raw(i)?)?;
            continue;
        }

        let entry = archive.by_index(i)?;
        let options = SimpleFileOptions::default().compression_method(entry.compression());
        let raw = read_bounded(entry, &name)?;
        let content = String::from_utf8(raw)
            .map_err(|e| MigrateError::Xml(format!("{} is not UTF-8: {}", name, e)))?;

        let rewritten = rewrite_part(&content, resolver, &mut out)?;
        substituted |= rewritten.is_some();
        writer.start_file(name.as_str(), options)?;
        writer
            .write_all(rewritten.as_deref().unwrap_or(&content).as_bytes())
            .map_err(ZipError::Io)?;
    }

    let packed = writer.finish()?.into_inner();
    if substituted {
        out.bytes = Some(packed);
    }
    Ok(out)
}

/// Inserts a plain-text paragraph at the start of a docx body.
pub fn insert_author_paragraph(docx: &[u8], text: &str) -> Result<Vec<u8>> {
    let mut archive = ZipArchive::new(Cursor::new(docx))?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut inserted = false;

    for i in 0..archive.len() {
        let name = archive.by_index_raw(i)?.name().to_string();
        if name != DOCX_MAIN_PART {
            writer.raw_copy_file(archive.by_index_raw(i)?)?;
            continue;
        }

        let entry = archive.by_index(i)?;
        let options = SimpleFileOptions::default().compression_method(entry.compression());
        let raw = read_bounded(entry, &name)?;
        let content = String::from_utf8(raw)
            .map_err(|e| MigrateError::Xml(format!("{} is not UTF-8: {}", name, e)))?;

        let body = BODY_OPEN_TAG
            .find(&content)
            .ok_or_else(|| MigrateError::Xml(format!("{} has no <w:body>", name)))?;
        let paragraph = format!(
            "<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>",
            quick_xml::escape::escape(text)
        );
        let mut updated = String::with_capacity(content.len() + paragraph.len());
        updated.push_str(&content[..body.end()]);
        updated.push_str(&paragraph);
        updated.push_str(&content[body.end()..]);

        writer.start_file(name.as_str(), options)?;
        writer.write_all(updated.as_bytes()).map_err(ZipError::Io)?;
        inserted = true;
    }

    if !inserted {
        return Err(MigrateError::Xml(format!("{} not found", DOCX_MAIN_PART)));
    }
    Ok(writer.finish()?.into_inner())
}


#[cfg(test)]
mod tests {
    use super::testing::{archive, read_entry};
    use super::*;
    use crate::mapping::IdentifierMapping;
    use crate::resolve::SourceLinkResolver;
    use crate::users::UserRepository;

    const RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://jetbrains.quip.com/abc123" TargetMode="External"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://jetbrains.quip.com/unknown1" TargetMode="External"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

    fn mapping() -> IdentifierMapping {
        [(
            "abc123".to_string(),
            "https://docs.google.com/document/d/XYZ?a=1&b=2".to_string(),
        )]
        .into_iter()
        .collect()
    }

    #[test]
    fn targets_are_collected_distinct() {
        let targets = relationship_targets(RELS).unwrap();
        let values: Vec<_> = targets.iter().map(|t| t.value.as_str()).collect();
        assert_eq!(
            values,
            vec![
                "https://jetbrains.quip.com/abc123",
                "https://jetbrains.quip.com/unknown1",
                "styles.xml"
            ]
        );
    }

    #[test]
    fn escaped_targets_match_raw_text() {
        let xml = r#"<Relationships><Relationship Target="https://x.quip.com/a?b=1&amp;c=2"/></Relationships>"#;
        let targets = relationship_targets(xml).unwrap();
        assert_eq!(targets[0].raw, "https://x.quip.com/a?b=1&amp;c=2");
        assert_eq!(targets[0].value, "https://x.quip.com/a?b=1&c=2");
    }

    #[test]
    fn bare_ampersand_target_is_kept_verbatim() {
        let xml = r#"<Relationships><Relationship Id="rId1" Target="https://jetbrains.quip.com/abc123"/><Relationship Id="rId2" Target="https://example.com/?a=1&b=2"/></Relationships>"#;
        let targets = relationship_targets(xml).unwrap();
        assert_eq!(targets[1].raw, "https://example.com/?a=1&b=2");
        assert_eq!(targets[1].value, "https://example.com/?a=1&b=2");

        let doc = archive(&[("word/_rels/document.xml.rels", xml)]);
        let mapping = mapping();
        let users = UserRepository::default();
        let resolver = SourceLinkResolver::new(&mapping, &users);
        let out = rewrite_links(&doc, FileType::Docx, &resolver).unwrap();
        let rels = read_entry(&out.bytes.expect("substituted"), "word/_rels/document.xml.rels");
        assert!(rels.contains(r#"Target="https://docs.google.com/document/d/XYZ?a=1&amp;b=2""#));
        assert!(rels.contains(r#"Target="https://example.com/?a=1&b=2""#));
        assert!(out.suspicious.is_empty());
    }

    #[test]
    fn rewrites_rels_and_keeps_other_entries() {
        let doc = archive(&[
            ("word/document.xml", "<w:document><w:body/></w:document>"),
            ("word/_rels/document.xml.rels", RELS),
        ]);
        let mapping = mapping();
        let users = UserRepository::default();
        let resolver = SourceLinkResolver::new(&mapping, &users);

        let out = rewrite_links(&doc, FileType::Docx, &resolver).unwrap();
        let bytes = out.bytes.expect("substituted");
        let rels = read_entry(&bytes, "word/_rels/document.xml.rels");
        assert!(rels.contains(r#"Target="https://docs.google.com/document/d/XYZ?a=1&amp;b=2""#));
        assert!(rels.contains(r#"Target="styles.xml""#));
        assert_eq!(
            read_entry(&bytes, "word/document.xml"),
            "<w:document><w:body/></w:document>"
        );
        assert_eq!(
            out.replacements.get("https://jetbrains.quip.com/abc123").map(String::as_str),
            Some("https://docs.google.com/document/d/XYZ?a=1&b=2")
        );
        assert_eq!(out.suspicious, vec!["https://jetbrains.quip.com/unknown1".to_string()]);
    }

    #[test]
    fn no_substitution_returns_none() {
        let doc = archive(&[("xl/_rels/workbook.xml.rels", RELS)]);
        let mapping = IdentifierMapping::default();
        let users = UserRepository::default();
        let resolver = SourceLinkResolver::new(&mapping, &users);
        let out = rewrite_links(&doc, FileType::Xlsx, &resolver).unwrap();
        assert!(out.bytes.is_none());
        assert!(out.replacements.is_empty());
        assert_eq!(out.suspicious.len(), 2);
    }

    #[test]
    fn pdf_is_passed_through() {
        let mapping = mapping();
        let users = UserRepository::default();
        let resolver = SourceLinkResolver::new(&mapping, &users);
        let out = rewrite_links(b"%PDF-1.4", FileType::Pdf, &resolver).unwrap();
        assert!(out.bytes.is_none());
    }

    #[test]
    fn author_paragraph_goes_first() {
        let doc = archive(&[(
            "word/document.xml",
            r#"<w:document xmlns:w="x"><w:body><w:p><w:r><w:t>Hello</w:t></w:r></w:p></w:body></w:document>"#,
        )]);
        let out = insert_author_paragraph(&doc, "Author: A & B").unwrap();
        let xml = read_entry(&out, "word/document.xml");
        assert!(xml.contains(
            r#"<w:body><w:p><w:r><w:t xml:space="preserve">Author: A &amp; B</w:t></w:r></w:p><w:p>"#
        ));
    }

    #[test]
    fn mime_by_extension() {
        assert_eq!(mime_for_extension("DOCX"), Some(MIME_DOCX));
        assert_eq!(mime_for_extension("md"), Some(MIME_MARKDOWN));
        assert_eq!(mime_for_extension("exe"), None);
    }
}
