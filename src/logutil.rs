//! Keeps radio text on one log line.
//!
//! Mesh payloads routinely carry newlines (menus, bulletin bodies) and the
//! occasional control byte from a misbehaving client. Everything that came
//! off the air goes through [`escape_log`] before it reaches a log record.

use std::fmt::Write;

/// Longest preview written to a log line, in characters.
pub const LOG_PREVIEW_CHARS: usize = 240;

/// Escape `s` for a single-line log record and cap it at [`LOG_PREVIEW_CHARS`].
pub fn escape_log(s: &str) -> String {
    escape_log_capped(s, LOG_PREVIEW_CHARS)
}

/// Same as [`escape_log`] with an explicit cap; a truncated value ends in `…`.
pub fn escape_log_capped(s: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(s.len().min(max_chars) + 4);
    let mut chars = s.chars();
    for _ in 0..max_chars {
        let Some(ch) = chars.next() else {
            return out;
        };
        match ch {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:x}}}", c as u32);
            }
            c => out.push(c),
        }
    }
    if chars.next().is_some() {
        out.push('…');
    }
    out
}
