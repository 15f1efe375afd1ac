// EN: src/core/parser.rs

use crate::{
    constants::{COMMAND_SIGIL, FENCE},
    models::{Command, ParseWarning},
};

/// The commands found in a message plus the lines that had to be skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutput {
    /// Commands in document order.
    pub commands: Vec<Command>,
    /// One entry per malformed command line.
    pub warnings: Vec<ParseWarning>,
}

/// What the end of a command line asks the parser to do next.
#[derive(Debug, PartialEq, Eq)]
enum LineTail {
    /// Plain arguments only; a fence may still open on a following line.
    Args,
    /// A fence was opened on the command line and continues on the next lines.
    OpenFence,
    /// A fence was opened and closed on the command line itself.
    InlineBlock(String),
}

/// Extracts command invocations from free-form message text.
///
/// # Logic:
/// - A command line starts at column 0 with `/` followed by a name
///   (`[A-Za-z_][A-Za-z0-9_]*`) and then whitespace or the end of the line.
///   Anything else, such as `/usr/bin/env`, is ordinary prose.
/// - Arguments are split on whitespace; `"..."` and `'...'` group words, with
///   `\"`, `\'` and `\\` as the only escapes.
/// - A fenced block either opens on the command line itself or on the first
///   non-blank line below it. Its lines are captured verbatim and never scanned
///   for further commands.
/// - A malformed line (unterminated quote) is skipped with a warning. An unterminated
///   fence swallows the rest of the message, so parsing stops there with a warning.
///
/// Pure function: no filesystem or network access.
pub fn parse(text: &str) -> ParseOutput {
    let lines: Vec<&str> = text
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect();
    let mut output = ParseOutput::default();
    let mut index = 0usize;

    while let Some(line) = lines.get(index) {
        let line_number = index + 1;
        let Some((name, rest)) = split_command_name(line) else {
            index += 1;
            continue;
        };

        let (args, tail) = match tokenize_arguments(rest) {
            Ok(parsed) => parsed,
            Err(reason) => {
                log::warn!("Skipping malformed command on line {}: {}", line_number, reason);
                output.warnings.push(ParseWarning {
                    line: line_number,
                    reason: format!("/{}: {}", name, reason),
                });
                index += 1;
                continue;
            }
        };
        let mut command = Command::new(name, args);

        // 1. Bind a fenced block, if one follows.
        let fence_start = match tail {
            LineTail::InlineBlock(block) => {
                command.raw_block = Some(block);
                None
            }
            LineTail::OpenFence => Some(index + 1),
            LineTail::Args => find_fence_opener(&lines, index + 1).map(|opener| opener + 1),
        };

        // 2. Capture it up to the closing delimiter.
        match fence_start {
            None => index += 1,
            Some(start) => match capture_fence(&lines, start) {
                Some((block, closing)) => {
                    command.raw_block = Some(block);
                    index = closing + 1;
                }
                None => {
                    log::warn!("Unterminated fenced block for /{} on line {}", name, line_number);
                    output.warnings.push(ParseWarning {
                        line: line_number,
                        reason: format!("/{}: unterminated fenced block", name),
                    });
                    break;
                }
            },
        }

        log::trace!("Parsed command on line {}: {}", line_number, command);
        output.commands.push(command);
    }

    output
}

/// Splits `/name rest` into `("name", " rest")`, or `None` if the line is not a command.
fn split_command_name(line: &str) -> Option<(&str, &str)> {
    let body = line.strip_prefix(COMMAND_SIGIL)?;
    let end = body
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
        .map_or(body.len(), |(i, _)| i);
    let (name, rest) = body.split_at_checked(end)?;

    let first = name.chars().next()?;
    if first.is_ascii_digit() {
        return None;
    }
    match rest.chars().next() {
        Some(c) if !c.is_whitespace() => None,
        _ => Some((name, rest)),
    }
}

/// Tokenizes the argument part of a command line.
fn tokenize_arguments(rest: &str) -> Result<(Vec<String>, LineTail), String> {
    let mut args = Vec::new();
    let mut chars = rest.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        // A fence ends the argument list; text after an inline close is ignored.
        if let Some(after) = rest.get(pos..).and_then(|r| r.strip_prefix(FENCE)) {
            let tail = match after.find(FENCE) {
                Some(end) => LineTail::InlineBlock(after.get(..end).unwrap_or_default().to_string()),
                None => LineTail::OpenFence,
            };
            return Ok((args, tail));
        }

        if c == '"' || c == '\'' {
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some((_, ch)) = chars.next() {
                match ch {
                    '\\' => match chars.peek() {
                        Some(&(_, next)) if next == '"' || next == '\'' || next == '\\' => {
                            value.push(next);
                            chars.next();
                        }
                        _ => value.push('\\'),
                    },
                    _ if ch == c => {
                        closed = true;
                        break;
                    }
                    _ => value.push(ch),
                }
            }
            if !closed {
                return Err(format!("unterminated {} quote", c));
            }
            args.push(value);
            continue;
        }

        let mut token = String::new();
        while let Some(&(_, ch)) = chars.peek() {
            if ch.is_whitespace() {
                break;
            }
            token.push(ch);
            chars.next();
        }
        args.push(token);
    }

    Ok((args, LineTail::Args))
}

/// Looks for a fence opener on the first non-blank line at or after `from`.
fn find_fence_opener(lines: &[&str], from: usize) -> Option<usize> {
    lines
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, l)| !l.trim().is_empty())
        .filter(|(_, l)| l.trim_start().starts_with(FENCE))
        .map(|(i, _)| i)
}

/// Collects lines from `start` up to the next fence line.
/// Returns the block (newline-terminated when non-empty) and the closing line's index.
fn capture_fence(lines: &[&str], start: usize) -> Option<(String, usize)> {
    let mut content: Vec<&str> = Vec::new();
    for (i, line) in lines.iter().enumerate().skip(start) {
        if line.trim_start().starts_with(FENCE) {
            let block = if content.is_empty() {
                String::new()
            } else {
                let mut joined = content.join("\n");
                joined.push('\n');
                joined
            };
            return Some((block, i));
        }
        content.push(line);
    }
    None
}
