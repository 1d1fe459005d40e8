//! Keyword and figure-number extraction for caption matching.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

/// Tokens shorter than this are ignored.
pub const MIN_KEYWORD_CHARS: usize = 4;

const STOP_WORDS: &[&str] = &[
    // English
    "about", "after", "also", "been", "before", "being", "between", "both", "does", "each",
    "from", "have", "here", "into", "more", "most", "only", "other", "over", "same", "some",
    "such", "than", "that", "their", "them", "then", "there", "these", "they", "this", "those",
    "through", "very", "what", "when", "where", "which", "while", "will", "with", "within",
    "your", "figure", "image", "shows", "shown",
    // Dutch
    "aan", "alle", "alleen", "andere", "anders", "bijvoorbeeld", "daar", "daarom", "deze",
    "dient", "door", "echter", "elke", "geen", "heeft", "hier", "hierbij", "hebben", "hoe",
    "jouw", "kunnen", "maar", "meer", "naar", "niet", "onder", "ook", "over", "tegen", "tussen",
    "uit", "vaak", "veel", "voor", "waar", "wanneer", "welke", "worden", "wordt", "zich",
    "zijn", "zoals", "zonder", "figuur", "afbeelding", "toont",
];

/// Lowercased content words of `text`.
pub fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_KEYWORD_CHARS)
        .map(str::to_lowercase)
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

fn label_re() -> &'static Regex {
    static LABEL_RE: OnceLock<Regex> = OnceLock::new();
    LABEL_RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:figuur|figure|fig\.?|afbeelding|afb\.?)\s*(\d+(?:\.\d+)+)")
            .expect("invalid figure label regex")
    })
}

fn number_re() -> &'static Regex {
    static NUMBER_RE: OnceLock<Regex> = OnceLock::new();
    NUMBER_RE.get_or_init(|| Regex::new(r"\d+(?:\.\d+)+").expect("invalid figure number regex"))
}

/// First labelled figure number in a caption ("Figuur 3.2 ..." → "3.2").
pub fn figure_number_from_caption(caption: &str) -> Option<String> {
    label_re()
        .captures(caption)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// How a paragraph refers to a figure number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NumberMention {
    None,
    /// The number appears without a figure label.
    Bare,
    /// "Figuur 3.2", "Fig. 3.2", ...
    Labelled,
}

pub fn find_number(text: &str, number: &str) -> NumberMention {
    let labelled = label_re()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .any(|m| m.as_str() == number);
    if labelled {
        return NumberMention::Labelled;
    }
    if number_re().find_iter(text).any(|m| m.as_str() == number) {
        NumberMention::Bare
    } else {
        NumberMention::None
    }
}
