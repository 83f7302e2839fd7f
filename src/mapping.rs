//! Source id -> destination link mapping.
//!
//! Built in two walks over the mirror: [`mark_originals`] decides which copy
//! of a document that appears in several folders is the canonical one, then
//! [`build_mapping`] collects the destination link of every original and
//! every folder under both its link id and its thread/folder id.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{MigrateError, Result};
use crate::location::{FileLocation, FolderLocation};
use crate::models::ThreadType;
use crate::progress::Progress;
use crate::walker::{TreeVisitor, TreeWalker};

/// Browser link of a destination file.
pub fn build_drive_file_link(file_id: &str, kind: ThreadType) -> Result<String> {
    match kind {
        ThreadType::Document => Ok(format!("https://docs.google.com/document/d/{}", file_id)),
        ThreadType::Spreadsheet => Ok(format!(
            "https://docs.google.com/spreadsheets/d/{}",
            file_id
        )),
        ThreadType::Slides => Ok(format!("https://drive.google.com/file/d/{}", file_id)),
        ThreadType::Chat => Err(MigrateError::consistency(format!(
            "chats are not migrated, no link for {}",
            file_id
        ))),
    }
}

pub fn build_drive_folder_link(folder_id: &str) -> String {
    format!("https://drive.google.com/drive/folders/{}", folder_id)
}

/// Immutable lookup table; keys are lower-cased source ids.
#[derive(Debug, Default, Clone)]
pub struct IdentifierMapping {
    links: HashMap<String, String>,
}

impl IdentifierMapping {
    /// Case-insensitive lookup.
    pub fn get(&self, source_id: &str) -> Option<&str> {
        self.links
            .get(&source_id.to_lowercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl FromIterator<(String, String)> for IdentifierMapping {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        IdentifierMapping {
            links: iter
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
        }
    }
}

pub struct MappingBuilder {
    base_url: String,
    links: HashMap<String, String>,
}

impl MappingBuilder {
    /// `base_url` is the source site root, e.g. `https://jetbrains.quip.com/`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        MappingBuilder {
            base_url,
            links: HashMap::new(),
        }
    }

    /// Adds `key -> link`. Re-adding the same pair is a no-op; a different
    /// link for a known key is a consistency error.
    pub fn insert(&mut self, key: &str, link: &str) -> Result<()> {
        let key = key.to_lowercase();
        match self.links.get(&key) {
            Some(existing) if existing == link => Ok(()),
            Some(existing) => Err(MigrateError::consistency(format!(
                "id {} maps to both {} and {}",
                key, existing, link
            ))),
            None => {
                self.links.insert(key, link.to_string());
                Ok(())
            }
        }
    }

    /// Path of a canonical source link after the site root, lower-cased.
    pub fn link_id(&self, canonical_link: &str) -> Result<String> {
        canonical_link
            .strip_prefix(&self.base_url)
            .map(str::to_lowercase)
            .ok_or_else(|| {
                MigrateError::consistency(format!(
                    "link {} does not start with {}",
                    canonical_link, self.base_url
                ))
            })
    }

    pub fn add_document(&mut self, file: &FileLocation) -> Result<()> {
        let Some(file_id) = file.descriptor().destination_file_id.as_deref() else {
            return Ok(());
        };
        let thread = file.descriptor().thread();
        let link = build_drive_file_link(file_id, thread.kind)?;
        let link_id = self.link_id(&thread.link)?;
        self.insert(&link_id, &link)?;
        self.insert(&thread.id, &link)
    }

    pub fn add_folder(&mut self, folder: &FolderLocation) -> Result<()> {
        let Some(folder_id) = folder.descriptor().destination_folder_id.as_deref() else {
            return Ok(());
        };
        let link = build_drive_folder_link(folder_id);
        let meta = folder.descriptor().folder();
        if let Some(source_link) = meta.link.as_deref() {
            let link_id = self.link_id(source_link)?;
            self.insert(&link_id, &link)?;
        }
        self.insert(&meta.id, &link)
    }

    /// Adds `alias -> mapping[target]` for each alias whose target is known.
    pub fn add_aliases(&mut self, aliases: &[IdAlias]) -> Result<()> {
        for alias in aliases {
            let target = alias.real_quip_id.to_lowercase();
            match self.links.get(&target).cloned() {
                Some(link) => self.insert(&alias.quip_id, &link)?,
                None => tracing::warn!(
                    "no mapping for id {} (alias {})",
                    alias.real_quip_id,
                    alias.quip_id
                ),
            }
        }
        Ok(())
    }

    pub fn build(self) -> IdentifierMapping {
        IdentifierMapping { links: self.links }
    }
}

/// One entry of the extra id replacements file: links to `quip_id` resolve
/// like links to `real_quip_id`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdAlias {
    pub quip_id: String,
    pub real_quip_id: String,
}

/// Reads the aliases file. Whole-line `//` comments are allowed.
pub fn load_aliases(path: &Path) -> Result<Vec<IdAlias>> {
    let text = fs::read_to_string(path).map_err(|e| MigrateError::io(path, e))?;
    let json: String = text
        .lines()
        .filter(|line| !line.trim_start().starts_with("//"))
        .collect::<Vec<_>>()
        .join("\n");
    serde_json::from_str(&json).map_err(|source| MigrateError::Json {
        path: path.to_path_buf(),
        source,
    })
}

struct MarkOriginals {
    seen: HashSet<String>,
    written: u64,
}

impl TreeVisitor for MarkOriginals {
    fn visit_file(&mut self, file: &mut FileLocation, progress: &Progress) -> Result<()> {
        let is_original = self.seen.insert(file.id().to_string());
        if file.update(|d| d.is_original = Some(is_original))? {
            self.written += 1;
            if !is_original {
                progress.log("marked as duplicate");
            }
        }
        Ok(())
    }
}

/// Flags the first copy of each document id (in walk order) as original and
/// every later copy as a duplicate. Returns the number of sidecars written.
pub fn mark_originals(root: &Path) -> Result<u64> {
    let mut visitor = MarkOriginals {
        seen: HashSet::new(),
        written: 0,
    };
    TreeWalker::new(root)
        .named("mark-originals")
        .run(&mut visitor)?;
    Ok(visitor.written)
}

struct CollectLinks {
    builder: MappingBuilder,
}

impl TreeVisitor for CollectLinks {
    fn before_visit_folder(&mut self, folder: &mut FolderLocation, _: &Progress) -> Result<()> {
        self.builder.add_folder(folder)
    }

    fn visit_file(&mut self, file: &mut FileLocation, _: &Progress) -> Result<()> {
        self.builder.add_document(file)
    }
}

/// Walks the mirror (originals only) and builds the mapping, then applies
/// the optional aliases file.
pub fn build_mapping(
    root: &Path,
    base_url: &str,
    aliases: Option<&Path>,
) -> Result<IdentifierMapping> {
    let mut visitor = CollectLinks {
        builder: MappingBuilder::new(base_url),
    };
    TreeWalker::new(root)
        .named("build-mapping")
        .skip_shortcuts(true)
        .run(&mut visitor)?;

    let mut builder = visitor.builder;
    if let Some(path) = aliases.filter(|p| p.exists()) {
        builder.add_aliases(&load_aliases(path)?)?;
    }
    let mapping = builder.build();
    tracing::info!("mapping holds {} source ids", mapping.len());
    Ok(mapping)
}
