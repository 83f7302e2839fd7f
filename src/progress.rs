//! Walk progress reporting.
//!
//! A [`Progress`] is a hierarchical label such as
//! `update-links > Root (F1) (1/3) > Plan (AbC) (2/7)` plus, for documents,
//! a global `[k/N]` counter. Log lines go through `tracing`, so they land on
//! stderr and stdout stays free for reports.

use std::fmt;

/// Position of a document in the whole walk.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DocumentCounter {
    pub done: u64,
    pub total: u64,
}

impl fmt::Display for DocumentCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}]",
            format_number(self.done),
            format_number(self.total)
        )
    }
}

#[derive(Clone, Debug, Default)]
pub struct Progress {
    label: String,
    counter: Option<DocumentCounter>,
}

impl Progress {
    pub fn root(name: impl Into<String>) -> Self {
        Progress {
            label: name.into(),
            counter: None,
        }
    }

    /// Child label joined with ` > `.
    pub fn named(&self, name: &str) -> Self {
        let label = if self.label.is_empty() {
            name.to_string()
        } else {
            format!("{} > {}", self.label, name)
        };
        Progress {
            label,
            counter: self.counter,
        }
    }

    /// Child label with its position among siblings: `"<name> (i/n)"`.
    pub fn with_index(&self, name: &str, index: usize, total: usize) -> Self {
        self.named(&format!("{} ({}/{})", name, index, total))
    }

    pub fn with_counter(mut self, counter: DocumentCounter) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn counter(&self) -> Option<DocumentCounter> {
        self.counter
    }

    /// `"[k/N] <label> -- <message>"`, counter omitted for folders.
    pub fn action(&self, message: &str) -> String {
        match self.counter {
            Some(counter) => format!("{} {} -- {}", counter, self.label, message),
            None => format!("{} -- {}", self.label, message),
        }
    }

    pub fn log(&self, message: &str) {
        tracing::info!("{}", self.action(message));
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!("{}", self.action(message));
    }
}

/// Named counters a pass reports when it finishes, in insertion order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Tally {
    counts: Vec<(&'static str, u64)>,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: &'static str) {
        self.add_n(key, 1);
    }

    pub fn add_n(&mut self, key: &'static str, n: u64) {
        match self.counts.iter_mut().find(|(k, _)| *k == key) {
            Some((_, count)) => *count += n,
            None => self.counts.push((key, n)),
        }
    }

    pub fn get(&self, key: &str) -> u64 {
        self.counts
            .iter()
            .find(|(k, _)| *k == key)
            .map_or(0, |(_, n)| *n)
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, n) in &self.counts {
            writeln!(f, "  {}: {}", key, format_number(*n))?;
        }
        Ok(())
    }
}

/// `1234567` -> `"1,234,567"`.
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn hierarchical_labels() {
        let root = Progress::root("update-links");
        let folder = root.with_index("Root (F1)", 1, 1);
        let doc = folder
            .with_index("Plan (AbC)", 2, 7)
            .with_counter(DocumentCounter { done: 5, total: 1200 });

        assert_eq!(doc.label(), "update-links > Root (F1) (1/1) > Plan (AbC) (2/7)");
        assert_eq!(
            doc.action("done"),
            "[5/1,200] update-links > Root (F1) (1/1) > Plan (AbC) (2/7) -- done"
        );
        assert_eq!(folder.action("start"), "update-links > Root (F1) (1/1) -- start");
        assert_eq!(Progress::default().named("x").label(), "x");
    }

    #[test]
    fn tally_keeps_insertion_order() {
        let mut tally = Tally::new();
        tally.add("downloaded");
        tally.add_n("skipped", 1500);
        tally.add("downloaded");
        assert_eq!(tally.get("downloaded"), 2);
        assert_eq!(tally.get("missing"), 0);
        assert_eq!(tally.to_string(), "  downloaded: 2\n  skipped: 1,500\n");
    }
}
