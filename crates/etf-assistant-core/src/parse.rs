//! Strict parsers for model outputs and partitioner element types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected YES or NO, got {0:?}")]
    NotYesNo(String),
    #[error("unsupported document element type: {0}")]
    UnknownElement(String),
}

/// Parse a binary classifier answer.
///
/// Surrounding whitespace is ignored and the comparison is
/// case-insensitive. Anything other than the bare token is an error:
/// `"Yes."` or `"YES, because..."` do not parse.
pub fn parse_yes_no(output: &str) -> Result<bool, ParseError> {
    let token = output.trim();
    if token.eq_ignore_ascii_case("YES") {
        Ok(true)
    } else if token.eq_ignore_ascii_case("NO") {
        Ok(false)
    } else {
        Err(ParseError::NotYesNo(output.to_string()))
    }
}
