//! Bounded-length output identifiers for table names
//!
//! Output sheets are limited to 31 characters. Longer table names are elided to
//! `first5...last20`; colliding elisions get a numeric suffix.

use std::collections::{HashMap, HashSet};

/// Longest identifier an output sheet accepts
pub const MAX_IDENTIFIER_LEN: usize = 31;

const HEAD_LEN: usize = 5;
const TAIL_LEN: usize = 20;
const ELLIPSIS: &str = "...";

/// Per-document registry of produced identifiers
#[derive(Debug, Default)]
pub struct SheetNamer {
    /// How many distinct table names produced each elided form
    elided: HashMap<String, usize>,
    assigned: HashMap<String, String>,
    produced: HashSet<String>,
}

impl SheetNamer {
    pub fn new() -> Self {
        SheetNamer::default()
    }

    /// Map a table name to its output identifier
    ///
    /// Asking again for the same table name returns the same identifier.
    pub fn name(&mut self, table_name: &str) -> String {
        if let Some(existing) = self.assigned.get(table_name) {
            return existing.clone();
        }

        let chars: Vec<char> = table_name.chars().collect();
        let identifier = if chars.len() > MAX_IDENTIFIER_LEN {
            self.elide(&chars)
        } else if self.produced.contains(table_name) {
            // A short name can spell out an identifier an elision already took
            self.numbered(&chars)
        } else {
            table_name.to_string()
        };

        self.produced.insert(identifier.clone());
        self.assigned
            .insert(table_name.to_string(), identifier.clone());
        identifier
    }

    /// Number of table names that were elided to `elided_form` so far
    pub fn occurrences(&self, elided_form: &str) -> usize {
        self.elided.get(elided_form).copied().unwrap_or(0)
    }

    fn numbered(&self, chars: &[char]) -> String {
        (2..)
            .map(|n: usize| {
                let suffix = n.to_string();
                let keep = chars.len().min(MAX_IDENTIFIER_LEN - suffix.len());
                format!("{}{}", chars[..keep].iter().collect::<String>(), suffix)
            })
            .find(|candidate| !self.produced.contains(candidate))
            .unwrap_or_default()
    }

    fn elide(&mut self, chars: &[char]) -> String {
        let tail: String = chars[chars.len() - TAIL_LEN..].iter().collect();
        let head = |len: usize| -> String { chars[..len].iter().collect() };
        let base = format!("{}{}{}", head(HEAD_LEN), ELLIPSIS, tail);

        let count = self.elided.entry(base.clone()).or_insert(0);
        *count += 1;
        let mut occurrence = *count;

        if occurrence == 1 && !self.produced.contains(&base) {
            return base;
        }

        loop {
            // Second producer of a form gets suffix 3, third gets 4, ...
            let suffix = (occurrence + 1).to_string();
            let overflow = (HEAD_LEN + ELLIPSIS.len() + TAIL_LEN + suffix.len())
                .saturating_sub(MAX_IDENTIFIER_LEN);
            let candidate = format!(
                "{}{}{}{}",
                head(HEAD_LEN.saturating_sub(overflow)),
                ELLIPSIS,
                tail,
                suffix
            );
            if !self.produced.contains(&candidate) {
                return candidate;
            }
            occurrence += 1;
        }
    }
}
