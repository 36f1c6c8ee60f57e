//! `.env` file parsing and editing.
//!
//! Every read goes through [`read_dotenv`], both for merging files into the
//! environment and for direct lookups, so the two can't disagree about the
//! file format. Values are read literally; `$VAR` references are never
//! expanded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;

/// Header written at the top of a freshly created `.env` file.
pub const DOTENV_HEADER: &str = "# Environment variables for the homework assistant";

/// Parse a dotenv file into ordered `(key, value)` pairs.
///
/// Returns `Ok(None)` if the file doesn't exist. Lines that aren't
/// `KEY=value` (optionally prefixed with `export`) are skipped.
///
/// Unquoted values run to the end of the line, `#` included. Single-quoted
/// values are verbatim. Double-quoted values understand `\n`, `\"`, `\\`
/// and `\$`.
pub fn read_dotenv(path: &Path) -> Result<Option<Vec<(String, String)>>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read dotenv file: {}", path.display()))
        }
    };

    let line_pattern =
        Regex::new(r"^\s*(?:export\s+)?([A-Za-z_][A-Za-z0-9_.]*)\s*=\s*(.*?)\s*$")
            .context("Failed to build dotenv line pattern")?;

    let mut pairs = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let parsed = line_pattern
            .captures(line)
            .and_then(|caps| Some((caps[1].to_string(), unquote(&caps[2])?)));
        match parsed {
            Some(pair) => pairs.push(pair),
            None => {
                tracing::debug!(path = %path.display(), line = index + 1, "Skipping malformed dotenv line");
            }
        }
    }
    Ok(Some(pairs))
}

/// Strip quotes from a raw value. `None` for an unterminated quote.
fn unquote(raw: &str) -> Option<String> {
    if let Some(rest) = raw.strip_prefix('\'') {
        let end = rest.find('\'')?;
        return Some(rest[..end].to_string());
    }

    let Some(rest) = raw.strip_prefix('"') else {
        return Some(raw.to_string());
    };
    let mut value = String::new();
    let mut chars = rest.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Some(value),
            '\\' => match chars.next()? {
                'n' => value.push('\n'),
                escaped @ ('"' | '\\' | '$') => value.push(escaped),
                other => {
                    value.push('\\');
                    value.push(other);
                }
            },
            c => value.push(c),
        }
    }
    None
}

/// Look up keys in a dotenv file.
///
/// The first occurrence of each key wins. Empty values are dropped.
pub fn scan_dotenv(path: &Path, keys: &[&str]) -> Result<HashMap<String, String>> {
    let mut found = HashMap::new();
    let Some(pairs) = read_dotenv(path)? else {
        return Ok(found);
    };

    for (key, value) in pairs {
        if value.is_empty() || !keys.contains(&key.as_str()) {
            continue;
        }
        found.entry(key).or_insert(value);
    }
    Ok(found)
}

/// A `.env` file edited in place.
#[derive(Debug, Clone)]
pub struct DotenvFile {
    path: PathBuf,
}

impl DotenvFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value for `key`, if present and non-empty.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(scan_dotenv(&self.path, &[key])?.remove(key))
    }

    /// Set `key=value`, replacing an existing line for `key` in place.
    ///
    /// Other lines (comments included) are kept as they are. New keys are
    /// appended; a new file starts with [`DOTENV_HEADER`].
    pub fn upsert(&self, key: &str, value: &str) -> Result<()> {
        let existing = match std::fs::read_to_string(&self.path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read dotenv file: {}", self.path.display()))
            }
        };

        let entry = format!("{key}={}", quote_value(value));
        let content = match existing {
            Some(content) => replace_or_append(&content, key, &entry)?,
            None => format!("{DOTENV_HEADER}\n{entry}\n"),
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory: {}", parent.display())
                })?;
            }
        }
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write dotenv file: {}", self.path.display()))?;

        if let Err(err) = crate::config::restrict_to_owner(&self.path) {
            tracing::warn!(error = %format!("{err:#}"), "Could not set secure permissions on dotenv file");
        }
        Ok(())
    }
}

fn replace_or_append(content: &str, key: &str, entry: &str) -> Result<String> {
    let pattern = Regex::new(&format!(r"^\s*(?:export\s+)?{}\s*=", regex::escape(key)))
        .context("Failed to build dotenv key pattern")?;

    let mut replaced = false;
    let mut lines: Vec<&str> = Vec::new();
    for line in content.lines() {
        if pattern.is_match(line) {
            // Only the first definition survives; later duplicates are dropped.
            if !replaced {
                lines.push(entry);
                replaced = true;
            }
        } else {
            lines.push(line);
        }
    }
    if !replaced {
        lines.push(entry);
    }

    let mut out = lines.join("\n");
    out.push('\n');
    Ok(out)
}

/// Quote a value when the dotenv parser wouldn't read it back verbatim.
fn quote_value(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| !c.is_whitespace() && !matches!(c, '#' | '"' | '\'' | '\\' | '$' | '`'));
    if plain {
        return value.to_string();
    }
    if !value.contains('\'') && !value.contains('\n') {
        return format!("'{value}'");
    }
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "\\$")
        .replace('\n', "\\n");
    format!("\"{escaped}\"")
}
