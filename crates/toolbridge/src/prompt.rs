//! System prompt construction.

use std::fmt::Write as _;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Local, TimeZone, Utc};

use crate::catalog::Catalog;
use crate::parser::{CALL_BEGIN, CALL_END};

/// Zone the time context is rendered in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockZone {
    /// The host's local zone
    Local,
    /// UTC
    Utc,
    /// A fixed offset from UTC
    Fixed(FixedOffset),
}

impl FromStr for ClockZone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ClockZone::Local),
            "utc" | "z" => Ok(ClockZone::Utc),
            other => other
                .parse::<FixedOffset>()
                .map(ClockZone::Fixed)
                .map_err(|_| "expected `local`, `utc` or an offset like +05:30".to_string()),
        }
    }
}

impl ClockZone {
    /// Describe the current time in this zone.
    pub fn now_context(&self) -> String {
        let now = Utc::now();
        match self {
            ClockZone::Local => time_context(&now.with_timezone(&Local)),
            ClockZone::Utc => time_context(&now),
            ClockZone::Fixed(offset) => time_context(&now.with_timezone(offset)),
        }
    }
}

/// Render a time context line pair for the model.
pub fn time_context<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!(
        "Current local time: {} {}\nISO format: {}",
        now.format("%A, %B %d, %Y at %I:%M:%S %p"),
        now.offset(),
        now.to_rfc3339()
    )
}

/// Render the catalog the way the model sees it.
///
/// ```text
/// Tool 1: read_file
/// Description: Read the contents of a file
/// Input Schema: {"type":"object",...}
/// ```
pub fn describe_tools(catalog: &Catalog) -> String {
    let mut out = String::new();
    for (i, tool) in catalog.iter().enumerate() {
        let _ = writeln!(out, "Tool {}: {}", i + 1, tool.name);
        let _ = writeln!(out, "Description: {}", tool.description);
        let _ = writeln!(out, "Input Schema: {}", tool.input_schema);
        out.push('\n');
    }
    out
}

/// Build the system prompt for one turn.
pub fn system_prompt(catalog: &Catalog, time_context: &str) -> String {
    format!(
        "You are an AI assistant with access to tools.

Available Tools:
{tools}
Instructions:
1. Carefully analyze the user's query to determine if a tool is needed.
2. To call a tool, respond EXACTLY in this format:
{begin}
TOOL: tool_name
INPUT: {{\"key\": \"value\"}}
{end}
3. The INPUT must be valid JSON on a single line matching the tool's input schema.
4. Call at most one tool per reply.
5. If no tool is needed, respond normally to the user's query.
6. Never make up tool names or parameters - only use what's provided.
7. Paths are relative to the workspace root.

Current details:
{time}
",
        tools = describe_tools(catalog),
        begin = CALL_BEGIN,
        end = CALL_END,
        time = time_context,
    )
}

/// Message carrying a tool result back to the model.
pub fn tool_result_message(tool: &str, result: &str) -> String {
    format!(
        "Tool {} returned: {}\n\nNow provide a helpful response to my original query \
         incorporating this information.",
        tool, result
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::ToolDescriptor;
    use crate::parser::parse_reply;
    use serde_json::json;

    #[test]
    fn test_time_context_format() {
        let offset = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        let at = offset.with_ymd_and_hms(2026, 10, 15, 14, 5, 9).unwrap();
        assert_eq!(
            time_context(&at),
            "Current local time: Thursday, October 15, 2026 at 02:05:09 PM +05:30\n\
             ISO format: 2026-10-15T14:05:09+05:30"
        );
    }

    #[test]
    fn test_clock_zone_parse() {
        assert_eq!("Local".parse::<ClockZone>().unwrap(), ClockZone::Local);
        assert_eq!("UTC".parse::<ClockZone>().unwrap(), ClockZone::Utc);
        assert_eq!(
            "+05:30".parse::<ClockZone>().unwrap(),
            ClockZone::Fixed(FixedOffset::east_opt(19800).unwrap())
        );
        assert!("Mars/Olympus".parse::<ClockZone>().is_err());
    }

    #[test]
    fn test_system_prompt_lists_tools_in_order() {
        let catalog = Catalog::new([
            ToolDescriptor::new("read_file", "Read a file", json!({"type": "object"})),
            ToolDescriptor::new("list_directory", "List a directory", json!({})),
        ]);
        let prompt = system_prompt(&catalog, "Current local time: now");

        let first = prompt.find("Tool 1: read_file").unwrap();
        let second = prompt.find("Tool 2: list_directory").unwrap();
        assert!(first < second);
        assert!(prompt.contains("Input Schema: {\"type\":\"object\"}"));
        assert!(prompt.contains("Current local time: now"));
    }

    #[test]
    fn test_prompt_example_is_not_a_call_but_would_parse() {
        // The format example inside the prompt is itself a well-formed block.
        let prompt = system_prompt(&Catalog::default(), "t");
        let call = parse_reply(&prompt).unwrap().unwrap();
        assert_eq!(call.name, "tool_name");
    }
}
