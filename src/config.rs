use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backoff::Backoff;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    pub quip: QuipConfig,
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
}

/// Local files. Relative paths resolve against the working directory.
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Root of the local mirror.
    #[serde(default = "default_downloaded")]
    pub downloaded: PathBuf,
    #[serde(default = "default_users_scim")]
    pub users_scim: PathBuf,
    #[serde(default = "default_extra_emails")]
    pub extra_emails: PathBuf,
    #[serde(default = "default_extra_id_replacements")]
    pub extra_id_replacements: PathBuf,
    #[serde(default = "default_unresolved_links")]
    pub unresolved_links_report: PathBuf,
    #[serde(default = "default_migrated_files")]
    pub migrated_files_report: PathBuf,
    #[serde(default = "default_all_users")]
    pub all_users_report: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            downloaded: default_downloaded(),
            users_scim: default_users_scim(),
            extra_emails: default_extra_emails(),
            extra_id_replacements: default_extra_id_replacements(),
            unresolved_links_report: default_unresolved_links(),
            migrated_files_report: default_migrated_files(),
            all_users_report: default_all_users(),
        }
    }
}

fn default_downloaded() -> PathBuf {
    PathBuf::from("downloaded")
}
fn default_users_scim() -> PathBuf {
    PathBuf::from("quip_users_scim.json")
}
fn default_extra_emails() -> PathBuf {
    PathBuf::from("quip_emails_extra.json")
}
fn default_extra_id_replacements() -> PathBuf {
    PathBuf::from("extra_quip_id_replacements.jsonc")
}
fn default_unresolved_links() -> PathBuf {
    PathBuf::from("unresolved_links.tsv")
}
fn default_migrated_files() -> PathBuf {
    PathBuf::from("migrated_files.tsv")
}
fn default_all_users() -> PathBuf {
    PathBuf::from("all_users.tsv")
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuipConfig {
    /// Folder whose subtree is migrated.
    pub root_folder_id: String,
    /// Site root every canonical document link starts with,
    /// e.g. `https://jetbrains.quip.com/`.
    pub base_url: String,
    #[serde(default = "default_quip_api")]
    pub api_base: String,
    /// Environment variable holding the access token.
    #[serde(default = "default_quip_token_env")]
    pub token_env: String,
}

fn default_quip_api() -> String {
    "https://platform.quip.com/1".to_string()
}
fn default_quip_token_env() -> String {
    "QUIP_ACCESS_TOKEN".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DriveConfig {
    /// Name of the destination folder that mirrors the source root.
    #[serde(default = "default_root_folder_name")]
    pub root_folder_name: String,
    /// Where the root folder is looked up or created. `None` means My Drive.
    #[serde(default)]
    pub parent_folder_id: Option<String>,
    #[serde(default = "default_drive_api")]
    pub api_base: String,
    #[serde(default = "default_drive_upload")]
    pub upload_base: String,
    #[serde(default = "default_drive_token_env")]
    pub token_env: String,
}

impl Default for DriveConfig {
    fn default() -> Self {
        DriveConfig {
            root_folder_name: default_root_folder_name(),
            parent_folder_id: None,
            api_base: default_drive_api(),
            upload_base: default_drive_upload(),
            token_env: default_drive_token_env(),
        }
    }
}

fn default_root_folder_name() -> String {
    "Quip".to_string()
}
fn default_drive_api() -> String {
    "https://www.googleapis.com/drive/v3".to_string()
}
fn default_drive_upload() -> String {
    "https://www.googleapis.com/upload/drive/v3".to_string()
}
fn default_drive_token_env() -> String {
    "DRIVE_ACCESS_TOKEN".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackoffConfig {
    #[serde(default = "default_start_secs")]
    pub start_secs: u64,
    #[serde(default = "default_max_secs")]
    pub max_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            start_secs: default_start_secs(),
            max_secs: default_max_secs(),
        }
    }
}

fn default_start_secs() -> u64 {
    5
}
fn default_max_secs() -> u64 {
    30 * 60
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    /// Prepend an "Author: ..." paragraph to docx documents.
    #[serde(default = "default_true")]
    pub insert_author_paragraph: bool,
    /// Rewrite resolved user links in spreadsheet comments as `@email`.
    #[serde(default = "default_true")]
    pub mention_emails_in_spreadsheets: bool,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        DocumentsConfig {
            insert_author_paragraph: true,
            mention_emails_in_spreadsheets: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_secs(self.backoff.start_secs),
            Duration::from_secs(self.backoff.max_secs),
        )
    }

    pub fn quip_token(&self) -> Result<String> {
        read_token(&self.quip.token_env)
    }

    pub fn drive_token(&self) -> Result<String> {
        read_token(&self.drive.token_env)
    }
}

fn read_token(var: &str) -> Result<String> {
    let token = std::env::var(var)
        .with_context(|| format!("{} environment variable not set", var))?;
    if token.trim().is_empty() {
        anyhow::bail!("{} is empty", var);
    }
    Ok(token.trim().to_string())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.quip.root_folder_id.trim().is_empty() {
        anyhow::bail!("quip.root_folder_id must not be empty");
    }

    if !config.quip.base_url.starts_with("https://") {
        anyhow::bail!(
            "quip.base_url must be an https:// URL, got '{}'",
            config.quip.base_url
        );
    }

    if config.paths.downloaded.as_os_str().is_empty() {
        anyhow::bail!("paths.downloaded must not be empty");
    }

    if config.drive.root_folder_name.trim().is_empty() {
        anyhow::bail!("drive.root_folder_name must not be empty");
    }

    if config.backoff.start_secs == 0 {
        anyhow::bail!("backoff.start_secs must be > 0");
    }
    if config.backoff.max_secs < config.backoff.start_secs {
        anyhow::bail!("backoff.max_secs must be >= backoff.start_secs");
    }

    Ok(config)
}
