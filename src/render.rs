//! Terminal output for the `toolflow` binary.
//!
//! Status, tool traces and prompts go to stderr; assistant text goes to
//! stdout so it can be piped.

use crate::textutil::clip_chars;
use crossterm::style::{Color, Stylize};
use std::io::{self, Write};

const INDENT: &str = "  ";
const GLYPH_TOOL_CALL: &str = "▸";
const GLYPH_TOOL_RESULT: &str = "←";
const GLYPH_SECTION: &str = "•";

/// Handles all terminal output formatting.
#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    /// Interactive input prompt (stderr).
    pub fn prompt(&self) {
        if self.color {
            eprint!("{} ", ">".with(Color::Cyan).bold());
        } else {
            eprint!("> ");
        }
        let _ = io::stderr().flush();
    }

    /// Whole assistant reply, written to stdout.
    pub fn assistant_message(&self, content: &str) {
        println!("{}", content.trim_end());
    }

    /// One streamed fragment, written to stdout without a newline.
    pub fn assistant_delta(&self, text: &str) {
        print!("{text}");
        let _ = io::stdout().flush();
    }

    pub fn header(&self, model: &str, session_id: &str) {
        if self.color {
            eprintln!(
                "{} {} {}",
                "toolflow".with(Color::Cyan).bold(),
                model.with(Color::Magenta),
                format!("[{session_id}]").with(Color::DarkGrey),
            );
        } else {
            eprintln!("toolflow ({model}) [{session_id}]");
        }
    }

    pub fn tool_call(&self, name: &str, args: &str) {
        let preview = single_line_preview(args, 80);
        if self.color {
            eprintln!(
                "{INDENT}{} {}({})",
                GLYPH_TOOL_CALL.with(Color::Yellow),
                name.with(Color::Yellow).bold(),
                preview.with(Color::DarkGrey),
            );
        } else {
            eprintln!("{INDENT}{GLYPH_TOOL_CALL} {name}({preview})");
        }
    }

    pub fn tool_result(&self, success: bool, output: &str) {
        let preview = single_line_preview(output, 120);
        if self.color {
            let tone = if success { Color::Green } else { Color::Red };
            eprintln!(
                "{INDENT}{} {}",
                GLYPH_TOOL_RESULT.with(tone),
                preview.with(Color::DarkGrey),
            );
        } else {
            eprintln!("{INDENT}{GLYPH_TOOL_RESULT} {preview}");
        }
    }

    /// Confirmation question for a permission-bearing call.
    pub fn approval_prompt(&self, name: &str, permissions: &str, args: &str) {
        let preview = single_line_preview(args, 160);
        if self.color {
            eprintln!(
                "{INDENT}{} {} {}",
                "approve?".with(Color::Yellow).bold(),
                name.bold(),
                format!("[{permissions}]").with(Color::Yellow),
            );
            eprintln!("{INDENT}{INDENT}{}", preview.with(Color::DarkGrey));
            eprint!("{INDENT}{} ", "[y/N]".with(Color::Yellow));
        } else {
            eprintln!("{INDENT}approve? {name} [{permissions}]");
            eprintln!("{INDENT}{INDENT}{preview}");
            eprint!("{INDENT}[y/N] ");
        }
        let _ = io::stderr().flush();
    }

    pub fn section(&self, title: &str) {
        if self.color {
            eprintln!("{} {}", GLYPH_SECTION.with(Color::Cyan), title.bold());
        } else {
            eprintln!("{title}:");
        }
    }

    pub fn field(&self, key: &str, value: &str) {
        if self.color {
            eprintln!("{INDENT}{} {value}", format!("{key}:").with(Color::DarkGrey));
        } else {
            eprintln!("{INDENT}{key}: {value}");
        }
    }

    pub fn detail(&self, text: &str) {
        eprintln!("{INDENT}{text}");
    }

    pub fn warn(&self, msg: &str) {
        if self.color {
            eprintln!("{} {msg}", "warning:".with(Color::Yellow).bold());
        } else {
            eprintln!("warning: {msg}");
        }
    }

    pub fn error(&self, msg: &str) {
        if self.color {
            eprintln!("{} {msg}", "error:".with(Color::Red).bold());
        } else {
            eprintln!("error: {msg}");
        }
    }
}

/// First line of `text`, clipped to `max_chars`, with a marker when more
/// lines were dropped.
pub fn single_line_preview(text: &str, max_chars: usize) -> String {
    let mut lines = text.trim().lines();
    let first = lines.next().unwrap_or_default();
    let clipped = clip_chars(first, max_chars, "...");
    if lines.next().is_some() && !clipped.ends_with("...") {
        format!("{clipped} ...")
    } else {
        clipped
    }
}
