// SPDX-License-Identifier: Apache-2.0

//! Routing tag derivation.
//!
//! A tag template either is static or contains a `*` marker that is replaced by
//! the path token of the file a line batch came from.

use std::path::{Path, is_separator};

use crate::tail::error::{Error, Result};

const WILDCARD: char = '*';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagResolver {
    /// Every batch gets the same tag
    Static(String),
    /// `prefix + token + suffix`
    Templated { prefix: String, suffix: String },
}

impl TagResolver {
    pub fn new(template: &str) -> Result<Self> {
        if template.is_empty() {
            return Err(Error::Config("tag must not be empty".to_string()));
        }

        let mut parts = template.split(WILDCARD);
        let prefix = parts.next().unwrap_or_default();
        match parts.next() {
            None => Ok(TagResolver::Static(template.to_string())),
            // Only the first marker is substituted; anything from a second marker on is dropped.
            Some(suffix) => Ok(TagResolver::Templated {
                prefix: prefix.to_string(),
                suffix: suffix.to_string(),
            }),
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, TagResolver::Static(_))
    }

    pub fn resolve(&self, token: &str) -> String {
        match self {
            TagResolver::Static(tag) => tag.clone(),
            TagResolver::Templated { prefix, suffix } => {
                let mut tag = String::with_capacity(prefix.len() + token.len() + suffix.len());
                tag.push_str(prefix);
                tag.push_str(token);
                tag.push_str(suffix);
                tag
            }
        }
    }
}

/// Sanitized, dot-delimited form of a path: separators become `.`, runs of `.`
/// collapse to one and a leading `.` is removed.
pub fn path_token(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut token = String::with_capacity(raw.len());

    for c in raw.chars() {
        let c = if is_separator(c) { '.' } else { c };
        if c == '.' && token.ends_with('.') {
            continue;
        }
        token.push(c);
    }

    match token.strip_prefix('.') {
        Some(stripped) => stripped.to_string(),
        None => token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_token() {
        assert_eq!(path_token(Path::new("/var/tmp//foo.log")), "var.tmp.foo.log");
        assert_eq!(path_token(Path::new("/var/log/app..log")), "var.log.app.log");
        assert_eq!(path_token(Path::new("relative/a.log")), "relative.a.log");
        assert_eq!(path_token(Path::new("/./x/./y.log")), "x.y.log");
    }

    #[test]
    fn test_static_tag_ignores_token() {
        let resolver = TagResolver::new("app.access").unwrap();
        assert!(resolver.is_static());
        assert_eq!(resolver.resolve("foo.bar.log"), "app.access");
    }

    #[test]
    fn test_templated_tags() {
        let token = "foo.bar.log";
        assert_eq!(TagResolver::new("pre.*").unwrap().resolve(token), "pre.foo.bar.log");
        assert_eq!(TagResolver::new("*.post").unwrap().resolve(token), "foo.bar.log.post");
        assert_eq!(
            TagResolver::new("pre.*.post").unwrap().resolve(token),
            "pre.foo.bar.log.post"
        );
        assert_eq!(TagResolver::new("*").unwrap().resolve(token), "foo.bar.log");
    }

    #[test]
    fn test_only_first_marker_is_substituted() {
        let resolver = TagResolver::new("pre.*.post*ignore").unwrap();
        assert_eq!(resolver.resolve("foo.bar.log"), "pre.foo.bar.log.post");
    }

    #[test]
    fn test_empty_template_rejected() {
        assert!(TagResolver::new("").is_err());
    }
}
