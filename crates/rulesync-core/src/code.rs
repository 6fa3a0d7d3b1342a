// ── Rule code helpers ──
//
// Problem-report parsing, foreign-format normalization and rule name
// validation. Pure functions; nothing here talks to a device.

use serde::Serialize;

use rulesync_api::SyntaxReport;

/// Prefix of lines that mark a rule as written in a foreign format.
pub const FOREIGN_MARKER: &str = "#@";

/// A diagnostic attached to a rule's code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    pub description: String,
    /// 1-based.
    pub line: usize,
    /// Character offset of the start of `line` in the checked text.
    pub start: usize,
    /// Character offset one past the end of `line`.
    pub end: usize,
    pub is_error: bool,
}

/// Parse a remote syntax report against the text that was checked.
pub fn parse_report(report: &SyntaxReport, text: &str) -> Vec<Problem> {
    let mut problems = parse_block(&report.errors, "Error:", true, text);
    problems.extend(parse_block(&report.warnings, "Warning:", false, text));
    problems
}

pub fn has_errors(problems: &[Problem]) -> bool {
    problems.iter().any(|p| p.is_error)
}

fn parse_block(block: &str, prefix: &str, is_error: bool, text: &str) -> Vec<Problem> {
    let mut problems: Vec<Problem> = Vec::new();

    for raw in block.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        let Some(rest) = line.strip_prefix(prefix) else {
            // Continuation of the previous message.
            if let Some(last) = problems.last_mut() {
                last.description.push('\n');
                last.description.push_str(line);
            } else {
                problems.push(problem_at(text, 1, line.to_owned(), is_error));
            }
            continue;
        };

        let rest = rest.trim_start();
        let (line_no, description) = split_line_number(rest);
        problems.push(problem_at(text, line_no, description.to_owned(), is_error));
    }

    problems
}

/// `line 12: message` → `(12, "message")`; anything else covers line 1.
fn split_line_number(rest: &str) -> (usize, &str) {
    let Some(after) = rest.strip_prefix("line") else {
        return (1, rest);
    };
    let after = after.trim_start();
    let digits = after.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return (1, rest);
    }
    let line_no = after[..digits].parse::<usize>().unwrap_or(1).max(1);
    let message = after[digits..]
        .trim_start()
        .strip_prefix(':')
        .unwrap_or(&after[digits..])
        .trim();
    (line_no, message)
}

fn problem_at(text: &str, line: usize, description: String, is_error: bool) -> Problem {
    let (start, end) = line_span(text, line);
    Problem {
        description,
        line,
        start,
        end,
        is_error,
    }
}

/// Character span of 1-based `line`; past the end clamps to `(len, len)`.
fn line_span(text: &str, line: usize) -> (usize, usize) {
    let mut offset = 0;
    for (idx, content) in text.split('\n').enumerate() {
        let len = content.chars().count();
        if idx + 1 == line {
            return (offset, offset + len);
        }
        offset += len + 1;
    }
    let total = text.chars().count();
    (total, total)
}

// ── Foreign format ──────────────────────────────────────────────────

/// Rule text with foreign-format marker lines removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub text: String,
    pub is_foreign: bool,
}

/// Strip leading `#@` marker lines.
pub fn normalize(raw: &str) -> Normalized {
    let mut rest = raw;
    let mut is_foreign = false;
    while rest.starts_with(FOREIGN_MARKER) {
        is_foreign = true;
        rest = match rest.find('\n') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        };
    }
    Normalized {
        text: rest.to_owned(),
        is_foreign,
    }
}

// ── Names ───────────────────────────────────────────────────────────

/// Why a rule name is unusable, or `None` if it is fine.
pub fn validate_rule_name(name: &str) -> Option<&'static str> {
    if name.is_empty() {
        Some("name is empty")
    } else if name.trim() != name {
        Some("name has leading or trailing whitespace")
    } else if name.contains(['/', '\\']) {
        Some("name contains a path separator")
    } else if name.chars().any(char::is_control) {
        Some("name contains control characters")
    } else if name == "." || name == ".." {
        Some("name is reserved")
    } else {
        None
    }
}
