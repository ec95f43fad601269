// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tool-use extraction from streaming agent output.
//!
//! The runner feeds successive tail windows of the agent's stdout; parsing
//! never fails, it just finds nothing. Two formats are recognized: the XML
//! invoke block (namespace-prefix tolerant) and the JSON function-call shape
//! used by other providers.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// A structured tool call extracted from agent output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolUseEvent {
    pub tool_name: String,
    pub parameters: BTreeMap<String, String>,
}

/// UI context derived from a tool call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolContext {
    pub current_file: Option<String>,
    pub current_action: Option<String>,
}

// Pattern is a compile-time constant; construction cannot fail.
#[allow(clippy::unwrap_used)]
fn invoke_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<(?:[A-Za-z0-9_]+:)?invoke\s+name="([^"]+)"\s*>"#).unwrap()
    })
}

// Pattern is a compile-time constant; construction cannot fail.
#[allow(clippy::unwrap_used)]
fn invoke_close_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"</(?:[A-Za-z0-9_]+:)?invoke>").unwrap()
    })
}

// Pattern is a compile-time constant; construction cannot fail.
#[allow(clippy::unwrap_used)]
fn parameter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<(?:[A-Za-z0-9_]+:)?parameter\s+name="([^"]+)"\s*>(.*?)</(?:[A-Za-z0-9_]+:)?parameter>"#)
            .unwrap()
    })
}

// Pattern is a compile-time constant; construction cannot fail.
#[allow(clippy::unwrap_used)]
fn json_function_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""function"\s*:\s*\{\s*"name"\s*:\s*"([^"]+)""#).unwrap()
    })
}

// Pattern is a compile-time constant; construction cannot fail.
#[allow(clippy::unwrap_used)]
fn arguments_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""arguments"\s*:\s*"#).unwrap()
    })
}

/// Parse the first complete tool call in `window`, if any.
pub fn parse_tool_use(window: &str) -> Option<ToolUseEvent> {
    parse_tool_use_with_end(window).map(|(event, _)| event)
}

/// Like [`parse_tool_use`], also returning the byte offset just past the
/// accepted call so streaming callers can advance their cursor.
pub fn parse_tool_use_with_end(window: &str) -> Option<(ToolUseEvent, usize)> {
    parse_xml_tool_use(window).or_else(|| parse_json_tool_use(window))
}

fn parse_xml_tool_use(window: &str) -> Option<(ToolUseEvent, usize)> {
    let open = invoke_open_re().captures(window)?;
    let tool_name = open.get(1)?.as_str().to_string();
    let body_start = open.get(0)?.end();
    let close = invoke_close_re().find(&window[body_start..])?;
    let inner = &window[body_start..body_start + close.start()];

    let mut parameters = BTreeMap::new();
    for param in parameter_re().captures_iter(inner) {
        if let (Some(key), Some(value)) = (param.get(1), param.get(2)) {
            parameters.insert(key.as_str().to_string(), value.as_str().to_string());
        }
    }

    let end = body_start + close.end();
    Some((ToolUseEvent { tool_name, parameters }, end))
}

fn parse_json_tool_use(window: &str) -> Option<(ToolUseEvent, usize)> {
    let func = json_function_re().captures(window)?;
    let tool_name = func.get(1)?.as_str().to_string();
    let after_name = func.get(0)?.end();

    let Some((arguments, end)) = extract_arguments(&window[after_name..]) else {
        // Arguments missing or unparsable: tool name only.
        return Some((
            ToolUseEvent {
                tool_name,
                parameters: BTreeMap::new(),
            },
            after_name,
        ));
    };

    let parameters = match serde_json::from_str::<serde_json::Value>(&arguments) {
        Ok(serde_json::Value::Object(map)) => map
            .into_iter()
            .map(|(k, v)| {
                let s = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, s)
            })
            .collect(),
        _ => BTreeMap::new(),
    };

    Some((ToolUseEvent { tool_name, parameters }, after_name + end))
}

/// Locate the `"arguments": {...}` object after a function-name match and
/// return its text plus the offset just past its closing brace.
fn extract_arguments(rest: &str) -> Option<(String, usize)> {
    let key = arguments_key_re().find(rest)?;
    let obj_start = key.end() + rest[key.end()..].find('{')?;
    let bytes = rest.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(obj_start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((rest[obj_start..=i].to_string(), i + 1));
                }
            }
            _ => {}
        }
    }
    None
}

/// Final segment of a slash-separated path.
fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Truncate a command for display, appending an ellipsis when clipped.
fn clip_command(command: &str) -> String {
    const MAX: usize = 50;
    if command.chars().count() <= MAX {
        command.to_string()
    } else {
        let clipped: String = command.chars().take(MAX).collect();
        format!("{clipped}...")
    }
}

/// Derive UI context (current file / current action) from a tool call.
pub fn extract_context_from_tool(
    tool_name: &str,
    parameters: &BTreeMap<String, String>,
) -> ToolContext {
    match tool_name {
        "Read" | "Write" | "Edit" => {
            let verb = match tool_name {
                "Read" => "Reading",
                "Write" => "Writing",
                _ => "Editing",
            };
            let Some(path) = parameters.get("file_path") else {
                return ToolContext {
                    current_file: None,
                    current_action: Some(format!("{verb} a file")),
                };
            };
            ToolContext {
                current_file: Some(path.clone()),
                current_action: Some(format!("{verb} {}", file_name(path))),
            }
        }
        "Bash" => {
            let action = parameters
                .get("description")
                .cloned()
                .or_else(|| parameters.get("command").map(|c| clip_command(c)))
                .unwrap_or_else(|| "Running a command".to_string());
            ToolContext {
                current_file: None,
                current_action: Some(action),
            }
        }
        "Glob" | "Grep" => ToolContext {
            current_file: None,
            current_action: parameters
                .get("pattern")
                .map(|p| format!("Searching for {p}")),
        },
        "Task" => ToolContext {
            current_file: None,
            current_action: parameters.get("description").cloned(),
        },
        "AskUserQuestion" => ToolContext {
            current_file: None,
            current_action: Some("Asking a question".to_string()),
        },
        "WebFetch" => ToolContext {
            current_file: None,
            current_action: Some("Fetching web content".to_string()),
        },
        "WebSearch" => ToolContext {
            current_file: None,
            current_action: Some("Searching the web".to_string()),
        },
        other => ToolContext {
            current_file: None,
            current_action: Some(format!("Using {other} tool")),
        },
    }
}

// Pattern is a compile-time constant; construction cannot fail.
#[allow(clippy::unwrap_used)]
fn goal_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)(?:goal|objective|task):\s*(.+)$").unwrap()
    })
}

// Pattern is a compile-time constant; construction cannot fail.
#[allow(clippy::unwrap_used)]
fn goal_phrase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)(?:please|help me|i want to)\s+(.+?)[.\n]").unwrap()
    })
}

fn accept_goal(candidate: &str) -> Option<String> {
    let trimmed = candidate.trim();
    let len = trimmed.chars().count();
    if len > 10 && len < 100 {
        Some(trimmed.to_string())
    } else {
        None
    }
}

/// Extract a short goal phrase from a prompt.
///
/// Tries an explicit `goal:`/`objective:`/`task:` label, then a polite-request
/// phrase, then the first sentence. Candidates outside (10, 100) characters
/// are rejected.
pub fn extract_goal(prompt: &str) -> Option<String> {
    if let Some(c) = goal_label_re().captures(prompt) {
        if let Some(goal) = c.get(1).and_then(|m| accept_goal(m.as_str())) {
            return Some(goal);
        }
    }
    if let Some(c) = goal_phrase_re().captures(prompt) {
        if let Some(goal) = c.get(1).and_then(|m| accept_goal(m.as_str())) {
            return Some(goal);
        }
    }
    let first_sentence = prompt
        .split(['.', '\n'])
        .next()
        .unwrap_or("");
    accept_goal(first_sentence)
}

#[cfg(test)]
#[path = "tool_parser_tests.rs"]
mod tests;
