//! Extraction of a tool call from model output.
//!
//! The model requests a tool by emitting exactly one block of the form:
//!
//! ```text
//! ---TOOL_START---
//! TOOL: <name>
//! INPUT: <JSON object>
//! ---TOOL_END---
//! ```
//!
//! Only a reply with no markers at all is an ordinary answer. A block that is
//! present but does not match the format exactly is an error that must be
//! shown to the user, never treated as "no call".

use serde_json::{Map, Value};
use thiserror::Error;

/// Marker opening a call block.
pub const CALL_BEGIN: &str = "---TOOL_START---";
/// Marker closing a call block.
pub const CALL_END: &str = "---TOOL_END---";

const TOOL_PREFIX: &str = "TOOL:";
const INPUT_PREFIX: &str = "INPUT:";

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Tool name, exactly as written after `TOOL:`
    pub name: String,
    /// Decoded `INPUT:` object
    pub arguments: Map<String, Value>,
}

/// Ways a call block can be malformed.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Only one of the two markers is present, or they are out of order
    #[error("tool call markers are unbalanced")]
    UnbalancedMarkers,
    /// More than one call block is present
    #[error("more than one tool call in a single reply ({0} found)")]
    MultipleCalls(usize),
    /// The block does not contain exactly two non-blank lines
    #[error("invalid tool call format: expected 2 lines (TOOL, INPUT), found {0}")]
    WrongLineCount(usize),
    /// The first line is not a `TOOL:` line
    #[error("invalid tool call format: first line must start with TOOL:")]
    MissingToolLine,
    /// The second line is not an `INPUT:` line
    #[error("invalid tool call format: second line must start with INPUT:")]
    MissingInputLine,
    /// `TOOL:` has no name after it
    #[error("invalid tool call format: tool name is empty")]
    EmptyToolName,
    /// `INPUT:` is not valid JSON
    #[error("invalid JSON format in tool input: {0}")]
    InvalidJson(#[source] serde_json::Error),
    /// `INPUT:` is valid JSON but not an object
    #[error("tool input must be a JSON object, got {0}")]
    InputNotObject(&'static str),
}

impl ParseError {
    /// Whether the structure was right but `INPUT:` failed to decode.
    pub fn is_decode_failure(&self) -> bool {
        matches!(self, ParseError::InvalidJson(_) | ParseError::InputNotObject(_))
    }
}

/// Find the tool call in a complete model reply.
///
/// Returns `Ok(None)` only when neither marker appears.
pub fn parse_reply(reply: &str) -> Result<Option<ToolCall>, ParseError> {
    let begins = reply.matches(CALL_BEGIN).count();
    let ends = reply.matches(CALL_END).count();

    match (begins, ends) {
        (0, 0) => return Ok(None),
        (1, 1) => {}
        (b, e) if b == e => return Err(ParseError::MultipleCalls(b)),
        _ => return Err(ParseError::UnbalancedMarkers),
    }

    let (_, after_begin) = reply
        .split_once(CALL_BEGIN)
        .ok_or(ParseError::UnbalancedMarkers)?;
    let (body, _) = after_begin
        .split_once(CALL_END)
        .ok_or(ParseError::UnbalancedMarkers)?;

    parse_block(body).map(Some)
}

fn parse_block(body: &str) -> Result<ToolCall, ParseError> {
    let lines: Vec<&str> = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let [tool_line, input_line] = lines.as_slice() else {
        return Err(ParseError::WrongLineCount(lines.len()));
    };

    let name = tool_line
        .strip_prefix(TOOL_PREFIX)
        .ok_or(ParseError::MissingToolLine)?
        .trim();
    if name.is_empty() {
        return Err(ParseError::EmptyToolName);
    }

    let input = input_line
        .strip_prefix(INPUT_PREFIX)
        .ok_or(ParseError::MissingInputLine)?
        .trim();

    match serde_json::from_str::<Value>(input).map_err(ParseError::InvalidJson)? {
        Value::Object(arguments) => Ok(ToolCall {
            name: name.to_string(),
            arguments,
        }),
        other => Err(ParseError::InputNotObject(json_type(&other))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
