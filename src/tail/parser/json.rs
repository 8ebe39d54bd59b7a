// SPDX-License-Identifier: Apache-2.0

use serde_json::Value;

use super::traits::{Parser, Record};
use crate::tail::error::{Error, Result};

/// A parser that parses JSON object lines into records.
#[derive(Debug, Clone, Default)]
pub struct JsonParser {
    /// If true, parsing failures return an empty record.
    /// If false, parsing failures return an error.
    lenient: bool,
}

impl JsonParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a lenient JsonParser that returns an empty record on parse failure
    pub fn lenient() -> Self {
        Self { lenient: true }
    }

    pub fn with_lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }
}

impl Parser for JsonParser {
    fn parse(&self, line: &str) -> Result<Record> {
        let parsed: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                if self.lenient {
                    return Ok(Record::new());
                }
                return Err(Error::Parse(format!("invalid JSON: {}", e)));
            }
        };

        match parsed {
            Value::Object(map) => Ok(map),
            _ if self.lenient => Ok(Record::new()),
            _ => Err(Error::Parse("JSON value is not an object".to_string())),
        }
    }
}
