//! Session naming.
//!
//! A session name is the local time rendered through a strftime pattern with
//! the `{stream_title}` token replaced by the broadcast title, then sanitized so
//! it is a single valid path component on Windows, Linux and macOS.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, TimeZone};

use crate::{Error, Result};

/// Placeholder replaced by the stream title.
pub const STREAM_TITLE_TOKEN: &str = "{stream_title}";

/// Title used when the server reports none.
pub const UNTITLED: &str = "untitled";

/// Characters that are invalid in Windows filenames (also covers `/`).
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Windows reserved filenames (case-insensitive)
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Sanitize a string for use as one path component.
///
/// Control and reserved characters become `_` (runs collapse to one), leading
/// and trailing spaces/dots are trimmed, Windows device names get a `_` prefix
/// and an empty result becomes `"unnamed"`. Non-ASCII text is preserved.
pub fn sanitize_filename(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for c in input.chars() {
        if c.is_control() || INVALID_CHARS.contains(&c) {
            if !result.ends_with('_') {
                result.push('_');
            }
        } else {
            result.push(c);
        }
    }

    let trimmed = result.trim_matches([' ', '.']);
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    let stem = trimmed.split('.').next().unwrap_or(trimmed);
    if RESERVED_NAMES
        .iter()
        .any(|reserved| stem.eq_ignore_ascii_case(reserved))
    {
        return format!("_{trimmed}");
    }

    trimmed.to_string()
}

/// Check that `pattern` only uses strftime specifiers chrono understands.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    if pattern.trim().is_empty() {
        return Err(Error::config("output name format must not be empty"));
    }
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(Error::config(format!(
            "invalid strftime specifier in output name format \"{pattern}\""
        )));
    }
    Ok(())
}

/// Build the session name for a broadcast that went live at `now`.
///
/// The title is substituted after time formatting, so a `%` in a stream title
/// is never interpreted as a specifier.
pub fn format_session_name<Tz>(pattern: &str, now: &DateTime<Tz>, title: &str) -> Result<String>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    validate_pattern(pattern)?;

    let title = match title.trim() {
        "" => UNTITLED,
        t => t,
    };
    let formatted = now
        .format_with_items(StrftimeItems::new(pattern))
        .to_string();
    Ok(sanitize_filename(
        &formatted.replace(STREAM_TITLE_TOKEN, title),
    ))
}
