// EN: src/core/text.rs

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// A line that would itself be read as a command (`/name` at the start, after indentation).
    static ref COMMAND_LINE_REGEX: Regex =
        Regex::new(r"^\s*/[A-Za-z_][A-Za-z0-9_]*(\s|$)").expect("Invalid regex for command lines");
}

/// A text file split into lines, remembering its line ending and final newline
/// so that rendering an unmodified buffer reproduces the input byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLines {
    /// Lines without their terminators.
    pub lines: Vec<String>,
    eol: &'static str,
    trailing_newline: bool,
}

impl TextLines {
    /// Splits text on `\n`, detecting `\r\n` files.
    pub fn parse(text: &str) -> Self {
        let eol = if text.contains("\r\n") { "\r\n" } else { "\n" };
        let trailing_newline = text.is_empty() || text.ends_with('\n');
        let body = text.strip_suffix('\n').unwrap_or(text);
        let lines = if text.is_empty() {
            Vec::new()
        } else {
            body.split('\n')
                .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
                .collect()
        };
        Self {
            lines,
            eol,
            trailing_newline,
        }
    }

    /// Number of lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the buffer holds no lines at all.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Joins the lines back with the original terminator.
    pub fn render(&self) -> String {
        if self.lines.is_empty() {
            return String::new();
        }
        let mut out = self.lines.join(self.eol);
        if self.trailing_newline {
            out.push_str(self.eol);
        }
        out
    }
}

/// Removes lines that look like commands from content about to be written, so a
/// model echoing its own instructions into a file does not plant commands in it.
///
/// # Returns
/// The cleaned content and the number of lines removed.
pub fn strip_command_lines(content: &str) -> (String, usize) {
    let mut removed = 0usize;
    let kept: String = content
        .split_inclusive('\n')
        .filter(|line| {
            let is_command = COMMAND_LINE_REGEX.is_match(line.trim_end_matches(['\r', '\n']));
            if is_command {
                log::debug!("Dropping command-like line from content: {:?}", line);
                removed += 1;
            }
            !is_command
        })
        .collect();
    (kept, removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_preserves_bytes() {
        for text in ["a\nb\nc\n", "a\nb", "a\r\nb\r\n", "\n\n", "single"] {
            assert_eq!(TextLines::parse(text).render(), text, "{:?}", text);
        }
    }

    #[test]
    fn test_empty_text_has_no_lines() {
        let lines = TextLines::parse("");
        assert!(lines.is_empty());
        assert_eq!(lines.render(), "");
    }

    #[test]
    fn test_lines_are_split_without_terminators() {
        let lines = TextLines::parse("one\r\ntwo\r\n");
        assert_eq!(lines.lines, vec!["one", "two"]);
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_strip_command_lines() {
        let (clean, removed) =
            strip_command_lines("#!/usr/bin/env python\n  /delete_file x\nprint(1)\n/usr/bin/tool\n/ok");
        assert_eq!(clean, "#!/usr/bin/env python\nprint(1)\n/usr/bin/tool\n");
        assert_eq!(removed, 2);
    }
}
