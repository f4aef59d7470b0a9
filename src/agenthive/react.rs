//! Tolerant tokenizer for the prompt-embedded tool-call wire format.
//!
//! Open-weights backends signal tool use with two literal-prefix lines
//! embedded anywhere in their output:
//!
//! ```text
//! TOOL: tool_name
//! ARGS: {"param": "value"}
//! ```
//!
//! The format is a contract with the models, so it is kept byte-compatible;
//! the parser, however, is deliberately forgiving: prefixes match
//! case-insensitively, whitespace is free, prose before and after the block
//! is ignored, a truncated `ARGS:` object gets its closing brace restored,
//! and unparseable arguments degrade to an empty object rather than failing
//! the call.

use serde_json::Value;

/// A parsed tool directive extracted from model output.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDirective {
    /// Tool name following the `TOOL:` prefix.
    pub name: String,
    /// Parsed `ARGS:` object; empty object when absent or unparseable.
    pub args: Value,
    /// True when an `ARGS:` block was present but did not parse. Non-fatal:
    /// the tool is invoked with empty arguments.
    pub args_parse_failed: bool,
}

/// Case-insensitive substring search.
fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    let haystack_lower = haystack.to_lowercase();
    haystack_lower.find(&needle.to_lowercase())
}

/// Extract the first `TOOL:` directive from a model response, if any.
pub fn parse_tool_directive(response: &str) -> Option<ToolDirective> {
    let tool_idx = find_ci(response, "TOOL:")?;
    let after_tool = &response[tool_idx + "TOOL:".len()..];

    // Tool name: first run of identifier characters on the same line as the
    // prefix.
    let name_line = after_tool.split('\n').next().unwrap_or("");
    let name: String = name_line
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        return None;
    }

    let (args, args_parse_failed) = match find_ci(after_tool, "ARGS:") {
        Some(args_idx) => parse_args(&after_tool[args_idx + "ARGS:".len()..]),
        None => (Value::Object(Default::default()), false),
    };

    Some(ToolDirective {
        name,
        args,
        args_parse_failed,
    })
}

/// Parse the JSON object following an `ARGS:` prefix.
///
/// Returns the parsed object plus a flag marking a failed parse. Whitespace
/// and embedded newlines are tolerated, as is a missing final `}` (a common
/// truncation at the model's token limit).
fn parse_args(after_args: &str) -> (Value, bool) {
    let start = match after_args.find('{') {
        Some(idx) => idx,
        None => return (Value::Object(Default::default()), true),
    };

    // Brace-count to the matching close so trailing prose is ignored.
    let mut depth = 0usize;
    let mut end = None;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in after_args[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    end = Some(start + i + 1);
                    break;
                }
            }
            _ => {}
        }
    }

    let candidate: String = match end {
        Some(end) => after_args[start..end].to_string(),
        // Truncated object: take the rest and restore the closing braces.
        None => {
            let mut s = after_args[start..].trim_end().to_string();
            for _ in 0..depth {
                s.push('}');
            }
            s
        }
    };

    let cleaned = candidate.replace('\n', " ");
    match serde_json::from_str::<Value>(&cleaned) {
        Ok(Value::Object(map)) => (Value::Object(map), false),
        _ => (Value::Object(Default::default()), true),
    }
}

/// Render a directive in the exact wire format the models are instructed to
/// emit. Used by tests to property-check the round trip.
pub fn render_tool_directive(name: &str, args: &Value) -> String {
    format!(
        "TOOL: {}\nARGS: {}",
        name,
        serde_json::to_string(args).unwrap_or_else(|_| "{}".to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_directive() {
        let d = parse_tool_directive("TOOL: glob\nARGS: {\"pattern\": \"*.py\"}").unwrap();
        assert_eq!(d.name, "glob");
        assert_eq!(d.args["pattern"], "*.py");
        assert!(!d.args_parse_failed);
    }

    #[test]
    fn prose_around_the_block_is_ignored() {
        let response = "I'll search for the files first.\n\nTOOL: grep\nARGS: {\"pattern\": \"TODO\", \"files\": \"src\"}\n\nThen I'll summarize.";
        let d = parse_tool_directive(response).unwrap();
        assert_eq!(d.name, "grep");
        assert_eq!(d.args["pattern"], "TODO");
    }

    #[test]
    fn case_and_whitespace_are_tolerated() {
        let d = parse_tool_directive("tool:   web_search\nargs:  { \"query\" : \"rust\" }").unwrap();
        assert_eq!(d.name, "web_search");
        assert_eq!(d.args["query"], "rust");
    }

    #[test]
    fn missing_closing_brace_is_restored() {
        let d = parse_tool_directive("TOOL: read_file\nARGS: {\"file_path\": \"main.rs\"").unwrap();
        assert_eq!(d.name, "read_file");
        assert_eq!(d.args["file_path"], "main.rs");
        assert!(!d.args_parse_failed);
    }

    #[test]
    fn garbage_args_degrade_to_empty_object() {
        let d = parse_tool_directive("TOOL: bash\nARGS: not json at all").unwrap();
        assert_eq!(d.name, "bash");
        assert_eq!(d.args, serde_json::json!({}));
        assert!(d.args_parse_failed);
    }

    #[test]
    fn no_directive_returns_none() {
        assert!(parse_tool_directive("The answer is 42.").is_none());
        assert!(parse_tool_directive("TOOL: \nno name here").is_none());
    }

    #[test]
    fn missing_args_line_means_empty_args() {
        let d = parse_tool_directive("TOOL: system_info").unwrap();
        assert_eq!(d.args, serde_json::json!({}));
        assert!(!d.args_parse_failed);
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scanner() {
        let d = parse_tool_directive(
            "TOOL: write_file\nARGS: {\"content\": \"fn main() { println!(\\\"{}\\\"); }\", \"file_path\": \"x.rs\"} trailing",
        )
        .unwrap();
        assert_eq!(d.name, "write_file");
        assert!(d.args["content"].as_str().unwrap().contains("println!"));
    }

    #[test]
    fn render_then_parse_round_trips() {
        let cases = vec![
            ("glob", serde_json::json!({"pattern": "*.rs"})),
            ("bash", serde_json::json!({"command": "ls -la", "timeout": 5})),
            ("save_context", serde_json::json!({"key": "k", "value": "v", "tags": ["a", "b"]})),
            ("system_info", serde_json::json!({})),
        ];
        for (name, args) in cases {
            let rendered = render_tool_directive(name, &args);
            let parsed = parse_tool_directive(&rendered).unwrap();
            assert_eq!(parsed.name, name);
            assert_eq!(parsed.args, args);
            assert!(!parsed.args_parse_failed);
        }
    }

    #[test]
    fn only_first_directive_is_parsed() {
        let response = "TOOL: glob\nARGS: {\"pattern\": \"a\"}\nTOOL: grep\nARGS: {\"pattern\": \"b\"}";
        let d = parse_tool_directive(response).unwrap();
        assert_eq!(d.name, "glob");
        assert_eq!(d.args["pattern"], "a");
    }
}
