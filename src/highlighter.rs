// ABOUTME: Syntax highlighter for the REPL with color support
// Implements rustyline's Highlighter trait to provide ANSI color codes
// for PyRaf syntax elements while preserving display width

use rustyline::Helper;
use rustyline::completion::Completer;
use rustyline::highlight::{CmdKind, Highlighter};
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use std::borrow::Cow;
use std::collections::HashSet;

const COLOR_RESET: &str = "\x1b[0m";
const COLOR_PUNCT: &str = "\x1b[1;34m"; // Bold blue
const COLOR_KEYWORD: &str = "\x1b[1;35m"; // Bold magenta
const COLOR_BUILTIN: &str = "\x1b[36m"; // Cyan
const COLOR_NUMBER: &str = "\x1b[33m"; // Yellow
const COLOR_STRING: &str = "\x1b[32m"; // Green
const COLOR_BOOLEAN: &str = "\x1b[33m"; // Yellow
const COLOR_COMMENT: &str = "\x1b[90m"; // Bright black (gray)

/// REPL helper providing syntax-aware color highlighting for PyRaf source.
pub struct PyRafHelper;

impl PyRafHelper {
    pub fn new() -> Self {
        PyRafHelper
    }
}

impl Default for PyRafHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl Helper for PyRafHelper {}

impl Completer for PyRafHelper {
    type Candidate = String;
}

impl Hinter for PyRafHelper {
    type Hint = String;
}

impl Validator for PyRafHelper {}

impl Highlighter for PyRafHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        let keywords = get_keywords();
        let builtins = get_builtins();
        let highlighted = highlight_line(line, &keywords, &builtins);

        if highlighted == line {
            Cow::Borrowed(line)
        } else {
            Cow::Owned(highlighted)
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _kind: CmdKind) -> bool {
        true
    }
}

fn highlight_line(line: &str, keywords: &HashSet<&'static str>, builtins: &HashSet<&'static str>) -> String {
    let mut result = String::new();
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '/' if i + 1 < chars.len() && chars[i + 1] == '/' => {
                result.push_str(COLOR_COMMENT);
                while i < chars.len() {
                    result.push(chars[i]);
                    i += 1;
                }
                result.push_str(COLOR_RESET);
            }

            '"' => {
                result.push_str(COLOR_STRING);
                result.push('"');
                i += 1;
                let mut closed = false;
                while i < chars.len() {
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        result.push(chars[i]);
                        result.push(chars[i + 1]);
                        i += 2;
                    } else if chars[i] == '"' {
                        result.push('"');
                        i += 1;
                        closed = true;
                        break;
                    } else {
                        result.push(chars[i]);
                        i += 1;
                    }
                }
                result.push_str(COLOR_RESET);
                if !closed {
                    // unterminated string: nothing left on the line to color
                }
            }

            '0'..='9' => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if i < chars.len() && chars[i] == '.' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit() {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let num: String = chars[start..i].iter().collect();
                result.push_str(COLOR_NUMBER);
                result.push_str(&num);
                result.push_str(COLOR_RESET);
            }

            '(' | ')' | '{' | '}' | '[' | ']' | ',' | ';' => {
                result.push_str(COLOR_PUNCT);
                result.push(chars[i]);
                i += 1;
                result.push_str(COLOR_RESET);
            }

            c if c.is_whitespace() => {
                result.push(c);
                i += 1;
            }

            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if word == "true" || word == "false" || word == "nil" {
                    result.push_str(COLOR_BOOLEAN);
                    result.push_str(&word);
                    result.push_str(COLOR_RESET);
                } else if keywords.contains(word.as_str()) {
                    result.push_str(COLOR_KEYWORD);
                    result.push_str(&word);
                    result.push_str(COLOR_RESET);
                } else if builtins.contains(word.as_str()) {
                    result.push_str(COLOR_BUILTIN);
                    result.push_str(&word);
                    result.push_str(COLOR_RESET);
                } else {
                    result.push_str(&word);
                }
            }

            _ => {
                result.push(chars[i]);
                i += 1;
            }
        }
    }

    result
}

fn get_keywords() -> HashSet<&'static str> {
    ["if", "else", "while", "def", "return", "and", "or", "not", "import"]
        .iter()
        .copied()
        .collect()
}

fn get_builtins() -> HashSet<&'static str> {
    ["print", "len", "str", "num"].iter().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_highlighting() {
        let highlighted = highlight_line("42", &get_keywords(), &get_builtins());
        assert!(highlighted.contains(COLOR_NUMBER));
    }

    #[test]
    fn test_string_highlighting() {
        let highlighted = highlight_line("\"hello\"", &get_keywords(), &get_builtins());
        assert!(highlighted.contains(COLOR_STRING));
    }

    #[test]
    fn test_comment_highlighting() {
        let highlighted = highlight_line("// a comment", &get_keywords(), &get_builtins());
        assert!(highlighted.contains(COLOR_COMMENT));
    }

    #[test]
    fn test_keyword_highlighting() {
        let highlighted = highlight_line("if (x) { return x; }", &get_keywords(), &get_builtins());
        assert!(highlighted.contains(COLOR_KEYWORD));
        assert!(highlighted.contains(COLOR_PUNCT));
    }

    #[test]
    fn test_builtin_highlighting() {
        let highlighted = highlight_line("print(1)", &get_keywords(), &get_builtins());
        assert!(highlighted.contains(COLOR_BUILTIN));
    }

    #[test]
    fn test_boolean_and_nil_highlighting() {
        let highlighted = highlight_line("true false nil", &get_keywords(), &get_builtins());
        assert!(highlighted.contains(COLOR_BOOLEAN));
    }
}
