// SPDX-License-Identifier: Apache-2.0

//! Line parsers.
//!
//! Every parser turns one raw line into a JSON object record:
//!
//! - [`NoneParser`] stores the line under `message`
//! - [`JsonParser`] requires the line to be a JSON object
//! - [`RegexParser`] maps named capture groups to fields

mod json;
mod none;
mod regex;
mod traits;

pub use json::JsonParser;
pub use none::{MESSAGE_KEY, NoneParser};
pub use regex::RegexParser;
pub use traits::{Parser, Record};

use crate::tail::config::ParserType;
use crate::tail::error::{Error, Result};

/// Build the parser selected by configuration.
pub fn build_parser(
    parser_type: ParserType,
    regex_pattern: Option<&str>,
) -> Result<Box<dyn Parser>> {
    match parser_type {
        ParserType::None => Ok(Box::new(NoneParser)),
        ParserType::Json => Ok(Box::new(JsonParser::new())),
        ParserType::Regex => {
            let pattern = regex_pattern.ok_or_else(|| {
                Error::Config("regex_pattern is required when parser is regex".to_string())
            })?;
            Ok(Box::new(RegexParser::new(pattern)?))
        }
    }
}
