//! Source user directory.
//!
//! Built from the SCIM export of the Quip organisation plus an optional
//! operator-maintained override file mapping `id -> "Name:email"`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{MigrateError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

#[derive(Deserialize)]
struct ScimExport {
    #[serde(rename = "Resources", default)]
    resources: Vec<ScimResource>,
}

#[derive(Deserialize)]
struct ScimResource {
    id: String,
    #[serde(default)]
    emails: Vec<ScimEmail>,
    #[serde(default)]
    name: Option<ScimName>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScimEmail {
    Plain(String),
    Entry { value: String },
}

impl ScimEmail {
    fn value(&self) -> &str {
        match self {
            ScimEmail::Plain(v) => v,
            ScimEmail::Entry { value } => value,
        }
    }
}

#[derive(Deserialize)]
struct ScimName {
    #[serde(default)]
    formatted: String,
}

#[derive(Debug, Default, Clone)]
pub struct UserRepository {
    users: HashMap<String, User>,
}

impl UserRepository {
    /// Loads the SCIM export and, when `extra` exists, the override file.
    /// A missing SCIM file yields an empty directory.
    pub fn load(scim: &Path, extra: Option<&Path>) -> Result<Self> {
        let mut repo = UserRepository::default();
        if scim.exists() {
            repo.add_scim(&read(scim)?, scim)?;
        } else {
            tracing::warn!("user directory {} not found; no emails will resolve", scim.display());
        }
        if let Some(extra) = extra.filter(|p| p.exists()) {
            repo.add_overrides(&read(extra)?, extra)?;
        }
        tracing::debug!("loaded {} users", repo.users.len());
        Ok(repo)
    }

    fn add_scim(&mut self, json: &str, path: &Path) -> Result<()> {
        let export: ScimExport = serde_json::from_str(json).map_err(|source| MigrateError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        for resource in export.resources {
            let email = resource
                .emails
                .iter()
                .map(ScimEmail::value)
                .find(|e| !e.is_empty())
                .map(str::to_string);
            let name = resource.name.map(|n| n.formatted).unwrap_or_default();
            self.users.insert(
                resource.id.clone(),
                User {
                    id: resource.id,
                    name,
                    email,
                },
            );
        }
        Ok(())
    }

    fn add_overrides(&mut self, json: &str, path: &Path) -> Result<()> {
        let entries: HashMap<String, String> =
            serde_json::from_str(json).map_err(|source| MigrateError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        for (id, name_and_email) in entries {
            if self.users.contains_key(&id) {
                return Err(MigrateError::consistency(format!(
                    "user {} is present both in the directory export and in {}",
                    id,
                    path.display()
                )));
            }
            let mut parts = name_and_email.split(':');
            let name = parts.next().unwrap_or_default().to_string();
            let email = parts.next().filter(|e| !e.is_empty()).map(str::to_string);
            if parts.next().is_some() {
                return Err(MigrateError::consistency(format!(
                    "invalid \"Name:email\" value for {}: {}",
                    id, name_and_email
                )));
            }
            self.users.insert(id.clone(), User { id, name, email });
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&User> {
        self.users.get(id)
    }

    pub fn email(&self, id: &str) -> Option<&str> {
        self.get(id).and_then(|u| u.email.as_deref())
    }

    pub fn name(&self, id: &str) -> Option<&str> {
        self.get(id).map(|u| u.name.as_str()).filter(|n| !n.is_empty())
    }

    /// `"Name (email)"`, falling back to whatever is known, then the id.
    pub fn display(&self, id: &str) -> String {
        match (self.name(id), self.email(id)) {
            (Some(name), Some(email)) => format!("{} ({})", name, email),
            (Some(name), None) => name.to_string(),
            (None, Some(email)) => email.to_string(),
            (None, None) => id.to_string(),
        }
    }

    /// Template of the override file listing `missing` ids. `lookup_name`
    /// supplies a best-known name for users the directory lacks.
    pub fn missing_users_instructions<F>(&self, missing: &[String], lookup_name: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut out = String::new();
        out.push_str("Add the following users to the extra emails file\n");
        out.push_str("Format for the file is below (you can omit the \":email\" part)\n");
        out.push_str("{\n");
        for (i, id) in missing.iter().enumerate() {
            let name = self
                .name(id)
                .map(str::to_string)
                .or_else(|| lookup_name(id))
                .unwrap_or_else(|| "FirstName LastName".to_string());
            out.push_str(&format!("\t\"{}\": \"{}:email@example.com\"", id, name));
            if i + 1 < missing.len() {
                out.push(',');
            }
            out.push('\n');
        }
        out.push_str("}\n");
        out
    }

    /// The `MissingUsers` failure for `missing` ids.
    pub fn missing_users_error<F>(&self, missing: &[String], lookup_name: F) -> MigrateError
    where
        F: Fn(&str) -> Option<String>,
    {
        MigrateError::MissingUsers {
            count: missing.len(),
            instructions: self.missing_users_instructions(missing, lookup_name),
        }
    }

    pub fn all(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| MigrateError::io(path, e))
}
