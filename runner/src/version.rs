use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{HarnessError, Result};

/// Identifiers whose quoted assignment declares the CLI's version.
pub const VERSION_IDENTIFIERS: &[&str] = &["package_version"];

fn assignment_pattern() -> Result<Regex> {
    let names = VERSION_IDENTIFIERS
        .iter()
        .map(|name| regex::escape(name))
        .collect::<Vec<_>>()
        .join("|");
    Ok(Regex::new(&format!(
        r#"\b(?:{names})\s*=\s*(?:"([^"]*)"|'([^']*)')"#
    ))?)
}

/// First quoted value assigned to a version identifier on a single line.
pub fn version_in_line(pattern: &Regex, line: &str) -> Option<String> {
    let caps = pattern.captures(line)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

/// Scans `path` line by line and stops at the first match.
pub fn extract_version(path: &Path) -> Result<Option<String>> {
    let io_err = |source| HarnessError::Io {
        path: path.to_path_buf(),
        source,
    };
    let pattern = assignment_pattern()?;
    let file = File::open(path).map_err(io_err)?;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(io_err)?;
        if let Some(version) = version_in_line(&pattern, &line) {
            return Ok(Some(version));
        }
    }
    Ok(None)
}
