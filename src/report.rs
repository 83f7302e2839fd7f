//! Tab-separated reports.
//!
//! [`UnresolvedLinkReport`] collects links that could not be mapped during a
//! run so an operator can triage them by hand. Passes that produce only one
//! kind of record merge into the existing file, replacing rows of that kind.

use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::str::FromStr;

use crate::error::{MigrateError, Result};
use crate::location::FileLocation;
use crate::sidecar::write_atomic;
use crate::users::UserRepository;

/// Tabs and line breaks would break the row structure.
pub fn sanitize_field(value: &str) -> String {
    value
        .chars()
        .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
        .collect()
}

fn render<R, F>(header: &[&str], rows: R) -> String
where
    R: IntoIterator<Item = F>,
    F: IntoIterator,
    F::Item: AsRef<str>,
{
    let mut out = header.join("\t");
    out.push('\n');
    for row in rows {
        let fields: Vec<String> = row
            .into_iter()
            .map(|f| sanitize_field(f.as_ref()))
            .collect();
        out.push_str(&fields.join("\t"));
        out.push('\n');
    }
    out
}

/// Writes a TSV with a header row to `output`, or to stdout when `None`.
pub fn write_tsv<R, F>(output: Option<&Path>, header: &[&str], rows: R) -> Result<()>
where
    R: IntoIterator<Item = F>,
    F: IntoIterator,
    F::Item: AsRef<str>,
{
    let text = render(header, rows);
    match output {
        Some(path) => write_atomic(path, text.as_bytes()),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(text.as_bytes())
                .and_then(|_| stdout.flush())
                .map_err(|e| MigrateError::io("<stdout>", e))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Relationship target that mentions the source domain but did not
    /// resolve.
    Suspicious,
    /// Link found in comment text that did not resolve.
    Unresolved,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkKind::Suspicious => f.write_str("suspicious"),
            LinkKind::Unresolved => f.write_str("unresolved"),
        }
    }
}

impl FromStr for LinkKind {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "suspicious" => Ok(LinkKind::Suspicious),
            "unresolved" => Ok(LinkKind::Unresolved),
            other => Err(MigrateError::consistency(format!("unknown link kind '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedLink {
    pub document_title: String,
    pub author: String,
    pub document_link: String,
    pub link: String,
    pub kind: LinkKind,
}

#[derive(Debug, Default)]
pub struct UnresolvedLinkReport {
    records: Vec<UnresolvedLink>,
}

pub const UNRESOLVED_HEADER: [&str; 5] = [
    "Document Title",
    "Author",
    "Document Link",
    "Unresolved Link",
    "Kind",
];

impl UnresolvedLinkReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `link` as found in the document at `file`.
    pub fn record(
        &mut self,
        file: &FileLocation,
        users: &UserRepository,
        link: &str,
        kind: LinkKind,
    ) {
        let thread = file.descriptor().thread();
        self.records.push(UnresolvedLink {
            document_title: thread.title.clone(),
            author: users.display(&thread.author_id),
            document_link: thread.link.clone(),
            link: link.to_string(),
            kind,
        });
    }

    pub fn records(&self) -> &[UnresolvedLink] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Overwrites `path` with the collected records.
    pub fn write(&self, path: &Path) -> Result<()> {
        write_records(path, &self.records)?;
        tracing::info!("wrote {} unresolved links to {}", self.len(), path.display());
        Ok(())
    }

    /// Rewrites `path` with the collected records, keeping rows of an
    /// earlier report whose kind is not in `replaced`.
    pub fn merge_into(&self, path: &Path, replaced: &[LinkKind]) -> Result<()> {
        let mut records: Vec<UnresolvedLink> = read_records(path)?
            .into_iter()
            .filter(|r| !replaced.contains(&r.kind))
            .collect();
        let kept = records.len();
        records.extend(self.records.iter().cloned());
        write_records(path, &records)?;
        tracing::info!(
            "wrote {} unresolved links to {} ({} kept from earlier passes)",
            self.len(),
            path.display(),
            kept
        );
        Ok(())
    }
}

fn write_records(path: &Path, records: &[UnresolvedLink]) -> Result<()> {
    write_tsv(
        Some(path),
        &UNRESOLVED_HEADER,
        records.iter().map(|r| {
            [
                r.document_title.clone(),
                r.author.clone(),
                r.document_link.clone(),
                r.link.clone(),
                r.kind.to_string(),
            ]
        }),
    )
}

/// Rows of an existing report. A missing file reads as empty; malformed
/// rows are dropped with a warning.
fn read_records(path: &Path) -> Result<Vec<UnresolvedLink>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(MigrateError::io(path, e)),
    };
    let mut records = Vec::new();
    for line in text.lines().skip(1).filter(|l| !l.is_empty()) {
        let fields: Vec<&str> = line.split('\t').collect();
        let parsed = match fields.as_slice() {
            [title, author, document_link, link, kind] => kind.parse().map(|kind| UnresolvedLink {
                document_title: title.to_string(),
                author: author.to_string(),
                document_link: document_link.to_string(),
                link: link.to_string(),
                kind,
            }),
            _ => Err(MigrateError::consistency(format!("{} fields", fields.len()))),
        };
        match parsed {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!("dropping row of {}: {}", path.display(), e),
        }
    }
    Ok(records)
}
