//! Per-run state shared by every pass.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;

use crate::config::Config;
use crate::error::Result;
use crate::mapping::{build_mapping, IdentifierMapping};
use crate::quip::SourcePlatform;
use crate::users::UserRepository;

/// Built once in `main` and passed by reference.
pub struct RunContext {
    pub config: Config,
    pub users: UserRepository,
    remote_names: RefCell<HashMap<String, Option<String>>>,
}

impl RunContext {
    pub fn new(config: Config) -> Result<Self> {
        let users = UserRepository::load(
            &config.paths.users_scim,
            Some(config.paths.extra_emails.as_path()),
        )?;
        Ok(Self::with_users(config, users))
    }

    pub fn with_users(config: Config, users: UserRepository) -> Self {
        RunContext {
            config,
            users,
            remote_names: RefCell::new(HashMap::new()),
        }
    }

    /// Root of the local mirror.
    pub fn root(&self) -> &Path {
        &self.config.paths.downloaded
    }

    /// Mapping over the current state of the mirror, aliases included.
    pub fn build_mapping(&self) -> Result<IdentifierMapping> {
        build_mapping(
            self.root(),
            &self.config.quip.base_url,
            Some(self.config.paths.extra_id_replacements.as_path()),
        )
    }

    /// Best-known name of a user the directory lacks, asked from the source
    /// platform once per id. Lookup failures only cost the name.
    pub fn remote_user_name(&self, quip: Option<&dyn SourcePlatform>, id: &str) -> Option<String> {
        let quip = quip?;
        if let Some(cached) = self.remote_names.borrow().get(id) {
            return cached.clone();
        }
        let name = match quip.get_user(id) {
            Ok(user) => user.map(|u| u.name).filter(|n| !n.is_empty()),
            Err(e) => {
                tracing::warn!("failed to look up user {}: {}", id, e);
                None
            }
        };
        self.remote_names
            .borrow_mut()
            .insert(id.to_string(), name.clone());
        name
    }

    /// The `MissingUsers` failure for `missing`, names filled in from the
    /// source platform where possible.
    pub fn missing_users(
        &self,
        quip: Option<&dyn SourcePlatform>,
        missing: &[String],
    ) -> crate::error::MigrateError {
        self.users
            .missing_users_error(missing, |id| self.remote_user_name(quip, id))
    }
}
