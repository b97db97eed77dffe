//! Address cleanup and validation for spreadsheet-sourced emails.

use std::sync::LazyLock;

use regex::Regex;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap()
});

/// Characters that sneak into copied addresses and never belong there.
const INVISIBLE: [char; 6] = [' ', '\u{a0}', '\u{200b}', '\u{200c}', '\u{200d}', '\u{feff}'];

/// Strip whitespace, non-breaking spaces and zero-width characters.
pub fn clean_email(raw: &str) -> String {
    raw.trim().chars().filter(|c| !INVISIBLE.contains(c)).collect()
}

/// Whether `raw` is a usable address once cleaned.
pub fn is_valid_email(raw: &str) -> bool {
    EMAIL_RE.is_match(&clean_email(raw))
}
