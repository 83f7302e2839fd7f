//! Link resolution against the identifier mapping.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{MigrateError, Result};
use crate::mapping::IdentifierMapping;
use crate::users::UserRepository;

pub const SOURCE_DOMAIN: &str = "quip.com";

// Host labels (or path segments) followed by quip.com/<rest>.
static SOURCE_LINK_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:[\w-]*[./])*quip\.com/(.+)$").expect("source link shape regex")
});

/// Case-insensitive check for the source domain anywhere in `text`.
pub fn mentions_source_domain(text: &str) -> bool {
    text.to_lowercase().contains(SOURCE_DOMAIN)
}

/// Maps one link to its destination reference.
pub trait LinkResolver {
    /// `Ok(None)` when the link is not resolvable. Errors are fatal.
    fn resolve(&self, link: &str) -> Result<Option<String>>;
}

/// Resolves source document/folder links through the mapping and user
/// profile links through the user directory.
pub struct SourceLinkResolver<'a> {
    mapping: &'a IdentifierMapping,
    users: &'a UserRepository,
}

impl<'a> SourceLinkResolver<'a> {
    pub fn new(mapping: &'a IdentifierMapping, users: &'a UserRepository) -> Self {
        SourceLinkResolver { mapping, users }
    }
}

impl LinkResolver for SourceLinkResolver<'_> {
    fn resolve(&self, link: &str) -> Result<Option<String>> {
        let Some((_, after_protocol)) = link.split_once("://") else {
            if mentions_source_domain(link) {
                return Err(MigrateError::consistency(format!(
                    "found {} in a link without protocol: {}",
                    SOURCE_DOMAIN, link
                )));
            }
            return Ok(None);
        };

        let Some(captures) = SOURCE_LINK_SHAPE.captures(after_protocol) else {
            return Ok(None);
        };
        let rest = captures.get(1).map_or("", |m| m.as_str());
        let id: String = rest.chars().take_while(|c| c.is_alphanumeric()).collect();
        if id.is_empty() {
            return Ok(None);
        }

        if let Some(link) = self.mapping.get(&id) {
            return Ok(Some(link.to_string()));
        }
        Ok(self.users.email(&id).map(|email| format!("mailto:{}", email)))
    }
}

/// Tries `link`, then repeatedly drops a trailing alphanumeric character and
/// retries. Stops at the first success, at a non-alphanumeric last
/// character, or when the string is exhausted. Returns the prefix that
/// resolved together with its resolution.
pub fn resolve_longest_prefix<'l>(
    resolver: &dyn LinkResolver,
    link: &'l str,
) -> Result<Option<(&'l str, String)>> {
    let mut candidate = link;
    loop {
        if let Some(resolved) = resolver.resolve(candidate)? {
            return Ok(Some((candidate, resolved)));
        }
        match candidate.chars().next_back() {
            Some(last) if last.is_alphanumeric() => {
                candidate = &candidate[..candidate.len() - last.len_utf8()];
            }
            _ => return Ok(None),
        }
    }
}

pub fn resolve_with_suffix_backtracking(
    resolver: &dyn LinkResolver,
    link: &str,
) -> Result<Option<String>> {
    Ok(resolve_longest_prefix(resolver, link)?.map(|(_, resolved)| resolved))
}
