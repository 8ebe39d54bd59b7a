// SPDX-License-Identifier: Apache-2.0

use crate::tail::error::Result;

/// A parsed line: field name to JSON value
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Parser turns a raw log line into a structured record.
pub trait Parser: Send + Sync {
    /// Parse one line. Returns an error when the line does not fit the
    /// parser's format; the caller decides whether to skip it.
    fn parse(&self, line: &str) -> Result<Record>;
}
