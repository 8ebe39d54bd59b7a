// SPDX-License-Identifier: Apache-2.0

use serde_json::Value;

use super::traits::{Parser, Record};
use crate::tail::error::Result;

/// Field that holds the raw line
pub const MESSAGE_KEY: &str = "message";

/// Passes the line through untouched as `{"message": line}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneParser;

impl Parser for NoneParser {
    fn parse(&self, line: &str) -> Result<Record> {
        let mut record = Record::with_capacity(1);
        record.insert(MESSAGE_KEY.to_string(), Value::String(line.to_string()));
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_parser_keeps_line() {
        let record = NoneParser.parse("  raw line with {braces}").unwrap();
        assert_eq!(record.len(), 1);
        assert_eq!(record[MESSAGE_KEY], "  raw line with {braces}");
    }
}
