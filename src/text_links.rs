//! Links embedded in free text (comment bodies).

use std::sync::LazyLock;

use regex::Regex;

use crate::error::Result;
use crate::resolve::{resolve_longest_prefix, resolve_with_suffix_backtracking, LinkResolver};

static SOURCE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https://(?:[\w-]*\.)*quip\.com/[\w/#-]+").expect("source link regex")
});

const MAILTO: &str = "mailto:";

/// Candidate source links in `text`. The text is cut at every `https://`
/// first so that links written back to back are not merged into one.
pub fn find_links_in_text(text: &str) -> Vec<String> {
    text.split("https://")
        .skip(1)
        .flat_map(|chunk| {
            let candidate = format!("https://{}", chunk);
            SOURCE_LINK
                .find_iter(&candidate)
                .map(|m| m.as_str().to_string())
                .collect::<Vec<_>>()
        })
        .collect()
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TextRewrite {
    pub text: String,
    /// `(matched prefix, resolved)`, longest prefix first.
    pub replacements: Vec<(String, String)>,
    pub unresolved: Vec<String>,
}

/// Resolves every candidate link and substitutes the longest matches first.
/// With `mailto_as_mention`, user links become `@email` instead of
/// `mailto:email`.
pub fn rewrite_text(
    text: &str,
    resolver: &dyn LinkResolver,
    mailto_as_mention: bool,
) -> Result<TextRewrite> {
    let mut replacements = Vec::new();
    let mut unresolved = Vec::new();

    for link in find_links_in_text(text) {
        match resolve_longest_prefix(resolver, &link)? {
            Some((prefix, resolved)) => replacements.push((prefix.to_string(), resolved)),
            None => unresolved.push(link),
        }
    }

    replacements.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.cmp(b)));
    replacements.dedup();

    let mut out = text.to_string();
    for (from, to) in &replacements {
        let to = match to.strip_prefix(MAILTO) {
            Some(email) if mailto_as_mention => format!("@{}", email),
            _ => to.clone(),
        };
        out = out.replace(from.as_str(), &to);
    }

    Ok(TextRewrite {
        text: out,
        replacements,
        unresolved,
    })
}

/// Links of `text` that do not resolve, reported read-only.
pub fn unresolved_links_in_text(text: &str, resolver: &dyn LinkResolver) -> Result<Vec<String>> {
    let mut unresolved = Vec::new();
    for link in find_links_in_text(text) {
        if resolve_with_suffix_backtracking(resolver, &link)?.is_none() {
            unresolved.push(link);
        }
    }
    Ok(unresolved)
}
