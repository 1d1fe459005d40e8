//! Numbered title prefixes ("1.2 Title", "1.2.3: Title", "1.2").

use std::sync::OnceLock;

use regex::Regex;

/// A title split into its dotted number and the remaining text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberedTitle<'a> {
    pub parts: Vec<u32>,
    pub text: &'a str,
}

impl NumberedTitle<'_> {
    pub fn label(&self) -> String {
        join(&self.parts)
    }
}

/// Parse a dotted number prefix with at least two components, whatever
/// follows it. Separators after the number (`.`, `:`, `)`, dashes) are not
/// part of the text, which may be empty.
///
/// A single leading integer ("2024 in review") is not a number prefix.
pub fn parse_prefix(title: &str) -> Option<NumberedTitle<'_>> {
    static PREFIX_RE: OnceLock<Regex> = OnceLock::new();
    let re = PREFIX_RE
        .get_or_init(|| Regex::new(r"(?s)^\s*(\d+(?:\.\d+)+)(.*)$").expect("invalid number prefix regex"));

    let caps = re.captures(title)?;
    let parts = caps
        .get(1)?
        .as_str()
        .split('.')
        .map(str::parse::<u32>)
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    let text = caps
        .get(2)?
        .as_str()
        .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '.' | ':' | ')' | '-' | '\u{2013}'))
        .trim_end();
    Some(NumberedTitle { parts, text })
}

pub fn join(parts: &[u32]) -> String {
    parts
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(".")
}
