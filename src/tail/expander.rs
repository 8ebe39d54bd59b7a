// SPDX-License-Identifier: Apache-2.0

//! Resolves configured path templates into the concrete set of files to watch.
//!
//! A template is first rendered as a strftime format string (when date
//! expansion is enabled) and then expanded as a glob. All templates in one
//! expansion are rendered against the same captured time.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, TimeZone};
use glob::{Pattern, glob};
use std::collections::HashSet;
use std::fmt::{Display, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::tail::config::TailReceiverConfig;
use crate::tail::error::{Error, Result};

/// PathExpander finds files matching the configured templates while excluding others
#[derive(Debug, Clone)]
pub struct PathExpander {
    templates: Vec<String>,
    exclude: Vec<Pattern>,
    expand_date: bool,
}

impl PathExpander {
    /// Create an expander. Malformed templates and exclude patterns are rejected here,
    /// never during a refresh.
    pub fn new(templates: Vec<String>, exclude: Vec<String>, expand_date: bool) -> Result<Self> {
        for template in &templates {
            if expand_date && has_invalid_strftime(template) {
                return Err(Error::InvalidTemplate(format!(
                    "{}: unsupported date placeholder",
                    template
                )));
            }

            // Placeholders render to plain text, so checking the rendered form for
            // a representative time validates the glob part of every rendering.
            let rendered = if expand_date {
                render(template, &Local::now()).ok_or_else(|| {
                    Error::InvalidTemplate(format!("{}: cannot be rendered", template))
                })?
            } else {
                template.clone()
            };
            Pattern::new(&rendered).map_err(|e| Error::InvalidGlob(format!("{}: {}", template, e)))?;
        }

        let exclude = exclude
            .iter()
            .map(|p| Pattern::new(p).map_err(|e| Error::InvalidGlob(format!("{}: {}", p, e))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            templates,
            exclude,
            expand_date,
        })
    }

    pub fn from_config(config: &TailReceiverConfig) -> Result<Self> {
        Self::new(
            config.paths.clone(),
            config.exclude.clone(),
            config.expand_date,
        )
    }

    /// Expand all templates against the current local time.
    pub fn expand(&self) -> Vec<PathBuf> {
        self.expand_at(&Local::now())
    }

    /// Expand all templates against `now`. Paths are returned in template order,
    /// duplicates removed. A template with no matches contributes nothing.
    pub fn expand_at<Tz>(&self, now: &DateTime<Tz>) -> Vec<PathBuf>
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();

        for template in &self.templates {
            let pattern = if self.expand_date {
                match render(template, now) {
                    Some(p) => p,
                    None => {
                        warn!(template = %template, "Failed to render path template");
                        continue;
                    }
                }
            } else {
                template.clone()
            };

            let matches = match glob(&pattern) {
                Ok(m) => m,
                Err(e) => {
                    warn!(pattern = %pattern, "Invalid glob pattern: {}", e);
                    continue;
                }
            };

            for entry in matches {
                let path = match entry {
                    Ok(p) => p,
                    Err(e) => {
                        debug!("Skipping unreadable glob entry: {}", e);
                        continue;
                    }
                };

                if path.is_dir() {
                    continue;
                }

                if self.exclude.iter().any(|p| p.matches_path(&path)) {
                    continue;
                }

                if seen.insert(path.clone()) {
                    paths.push(path);
                }
            }
        }

        paths
    }
}

fn has_invalid_strftime(template: &str) -> bool {
    StrftimeItems::new(template).any(|item| matches!(item, Item::Error))
}

fn render<Tz>(template: &str, now: &DateTime<Tz>) -> Option<String>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut out = String::with_capacity(template.len() + 16);
    write!(out, "{}", now.format(template)).ok()?;
    Some(out)
}
