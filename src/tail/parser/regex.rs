// SPDX-License-Identifier: Apache-2.0

use regex::Regex;
use serde_json::Value;

use super::traits::{Parser, Record};
use crate::tail::error::{Error, Result};

/// A parser that extracts fields from a line using a regular expression
/// with named capture groups.
#[derive(Debug, Clone)]
pub struct RegexParser {
    regex: Regex,
    /// Names of the capture groups (excluding the full match)
    group_names: Vec<String>,
}

impl RegexParser {
    /// Create a new RegexParser from a regex pattern string.
    ///
    /// The pattern must contain at least one named capture group using
    /// the `(?P<name>...)` syntax.
    pub fn new(pattern: &str) -> Result<Self> {
        let regex =
            Regex::new(pattern).map_err(|e| Error::Regex(format!("invalid regex pattern: {}", e)))?;

        let group_names: Vec<String> = regex
            .capture_names()
            .skip(1)
            .filter_map(|name| name.map(|s| s.to_string()))
            .collect();

        if group_names.is_empty() {
            return Err(Error::Regex(
                "regex pattern must contain at least one named capture group (use (?P<name>...) syntax)"
                    .to_string(),
            ));
        }

        Ok(Self { regex, group_names })
    }

    pub fn group_names(&self) -> &[String] {
        &self.group_names
    }
}

impl Parser for RegexParser {
    fn parse(&self, line: &str) -> Result<Record> {
        let captures = self.regex.captures(line).ok_or_else(|| {
            Error::Parse(format!(
                "regex pattern does not match input: {:?}",
                line.chars().take(100).collect::<String>()
            ))
        })?;

        let mut record = Record::with_capacity(self.group_names.len());
        for name in &self.group_names {
            // Unmatched optional groups are left out
            if let Some(m) = captures.name(name) {
                record.insert(name.clone(), Value::String(m.as_str().to_string()));
            }
        }
        Ok(record)
    }
}
