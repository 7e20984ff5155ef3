//! Native name generation.
//!
//! A native role name is always derived from an Access Provider's naming hint.
//! [`NamingConstraints`] translates a free-form hint into a string the
//! warehouse accepts, and [`UniqueNameGenerator`] makes the result unique
//! within one namespace for the duration of a run.
//!
//! On collision a numeric suffix is appended behind a doubled split character
//! (`AP2` → `AP2__0` → `AP2__1`). Translation never produces a doubled split
//! character on its own, so cutting a name at the first doubled split character
//! always recovers the base name.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while generating names.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NamingError {
    #[error("naming hint '{0}' does not contain any allowed character")]
    EmptyName(String),

    #[error("naming constraints are invalid: {0}")]
    InvalidConstraints(String),
}

/// Character-set and length rules for generated names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingConstraints {
    /// Whether uppercase ASCII letters are allowed.
    #[serde(default = "default_true")]
    pub upper_case_letters: bool,

    /// Whether lowercase ASCII letters are allowed.
    #[serde(default)]
    pub lower_case_letters: bool,

    /// Whether ASCII digits are allowed.
    #[serde(default = "default_true")]
    pub numbers: bool,

    /// Additional allowed characters. Must contain the split character.
    #[serde(default = "default_special_characters")]
    pub special_characters: String,

    /// Maximum name length in characters.
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Replacement for disallowed characters; doubled, it separates the
    /// uniqueness suffix.
    #[serde(default = "default_split_character")]
    pub split_character: char,
}

impl Default for NamingConstraints {
    fn default() -> Self {
        Self {
            upper_case_letters: true,
            lower_case_letters: false,
            numbers: true,
            special_characters: default_special_characters(),
            max_length: default_max_length(),
            split_character: default_split_character(),
        }
    }
}

impl NamingConstraints {
    /// Check the constraints are usable before any generation happens.
    pub fn validate(&self) -> Result<(), NamingError> {
        if !self.upper_case_letters && !self.lower_case_letters && !self.numbers {
            return Err(NamingError::InvalidConstraints(
                "at least one of letters or numbers must be allowed".to_string(),
            ));
        }
        if !self.special_characters.contains(self.split_character) {
            return Err(NamingError::InvalidConstraints(format!(
                "split character '{}' must be part of the special characters",
                self.split_character
            )));
        }
        // room for a base character, the separator and one suffix digit
        if self.max_length < 4 {
            return Err(NamingError::InvalidConstraints(format!(
                "max_length {} is too small",
                self.max_length
            )));
        }
        Ok(())
    }

    /// The doubled split character separating a name from its uniqueness suffix.
    pub fn suffix_separator(&self) -> String {
        let mut separator = String::with_capacity(2);
        separator.push(self.split_character);
        separator.push(self.split_character);
        separator
    }

    /// Cut a name at the first doubled split character.
    pub fn strip_suffix<'a>(&self, name: &'a str) -> &'a str {
        let separator = self.suffix_separator();
        name.split_once(separator.as_str())
            .map(|(base, _)| base)
            .unwrap_or(name)
    }

    /// Translate a hint into a name that satisfies the constraints.
    pub fn translate(&self, hint: &str) -> Result<String, NamingError> {
        let split = self.split_character;
        let mut out = String::with_capacity(hint.len());

        for c in hint.chars() {
            let mapped = self.map_char(c).unwrap_or(split);
            if mapped == split && out.ends_with(split) {
                continue;
            }
            out.push(mapped);
        }

        let trimmed = out.trim_matches(split);
        let truncated: String = trimmed.chars().take(self.max_length).collect();
        let name = truncated.trim_end_matches(split).to_string();

        if name.is_empty() {
            return Err(NamingError::EmptyName(hint.to_string()));
        }
        Ok(name)
    }

    fn map_char(&self, c: char) -> Option<char> {
        if c.is_ascii_lowercase() {
            if self.lower_case_letters {
                return Some(c);
            }
            if self.upper_case_letters {
                return Some(c.to_ascii_uppercase());
            }
            return None;
        }
        if c.is_ascii_uppercase() {
            if self.upper_case_letters {
                return Some(c);
            }
            if self.lower_case_letters {
                return Some(c.to_ascii_lowercase());
            }
            return None;
        }
        if c.is_ascii_digit() {
            return self.numbers.then_some(c);
        }
        self.special_characters.contains(c).then_some(c)
    }

    /// Append a uniqueness suffix, shortening the base when needed.
    fn with_suffix(&self, base: &str, n: usize) -> String {
        let suffix = format!("{}{}", self.suffix_separator(), n);
        let room = self.max_length.saturating_sub(suffix.chars().count());
        let head: String = base.chars().take(room).collect();
        format!("{}{}", head.trim_end_matches(self.split_character), suffix)
    }
}

/// Generates unique names within one namespace.
///
/// Names handed out (or reserved) once are never handed out again by the same
/// generator. Suffix counters are kept per base name so the sequence for a
/// base is gap-free and reproducible for the same input order.
#[derive(Debug, Clone)]
pub struct UniqueNameGenerator {
    constraints: NamingConstraints,
    used: HashSet<String>,
    counters: HashMap<String, usize>,
}

impl UniqueNameGenerator {
    pub fn new(constraints: NamingConstraints) -> Self {
        Self {
            constraints,
            used: HashSet::new(),
            counters: HashMap::new(),
        }
    }

    pub fn constraints(&self) -> &NamingConstraints {
        &self.constraints
    }

    /// Mark a name as taken without generating it.
    pub fn reserve(&mut self, name: impl Into<String>) {
        self.used.insert(name.into());
    }

    pub fn is_used(&self, name: &str) -> bool {
        self.used.contains(name)
    }

    /// Generate the next free name for a hint.
    pub fn generate(&mut self, hint: &str) -> Result<String, NamingError> {
        let base = self.constraints.translate(hint)?;

        if self.used.insert(base.clone()) {
            return Ok(base);
        }

        loop {
            let counter = self.counters.entry(base.clone()).or_insert(0);
            let candidate = self.constraints.with_suffix(&base, *counter);
            *counter += 1;

            if self.used.insert(candidate.clone()) {
                tracing::debug!(hint, name = %candidate, "generated suffixed name");
                return Ok(candidate);
            }
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_special_characters() -> String {
    "_$".to_string()
}

fn default_max_length() -> usize {
    255
}

fn default_split_character() -> char {
    '_'
}
