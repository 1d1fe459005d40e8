//! Figure Placement Matcher.
//!
//! Scores every (library image, paragraph) pair of one chapter and keeps the
//! best paragraph per image. Matches below `min_confidence` are kept with
//! `uncertain = true`. The canonical document is only read.

use serde::{Deserialize, Serialize};

use super::keywords::{NumberMention, figure_number_from_caption, find_number, keywords};
use crate::domain::{CanonicalChapter, FigureAssignment, ImageLibrary, LibraryImage};

/// Share of `numeric_weight` given to an unlabelled number mention.
pub const BARE_NUMBER_FACTOR: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub min_confidence: f64,
    pub numeric_weight: f64,
    pub keyword_weight: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            numeric_weight: 0.7,
            keyword_weight: 0.3,
        }
    }
}

/// Caption-derived matching data of one library image.
#[derive(Debug, Clone)]
struct ImageCue<'a> {
    image: &'a LibraryImage,
    number: Option<String>,
    keywords: Vec<String>,
}

impl<'a> ImageCue<'a> {
    fn new(image: &'a LibraryImage) -> Option<Self> {
        let caption = image.caption.as_deref().unwrap_or("");
        let number = image
            .figure_number
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| figure_number_from_caption(caption));
        let keywords: Vec<String> = keywords(caption).into_iter().collect();
        if number.is_none() && keywords.is_empty() {
            return None;
        }
        Some(Self {
            image,
            number,
            keywords,
        })
    }

    /// Leading component of the figure number, i.e. its chapter.
    fn chapter_number(&self) -> Option<u32> {
        self.number
            .as_deref()
            .and_then(|n| n.split('.').next())
            .and_then(|c| c.parse().ok())
    }
}

pub struct FigureMatcher {
    config: MatcherConfig,
}

impl FigureMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    /// Score one image caption against one paragraph text.
    pub fn score(&self, image: &LibraryImage, paragraph_text: &str) -> f64 {
        ImageCue::new(image)
            .map(|cue| self.score_cue(&cue, paragraph_text))
            .unwrap_or(0.0)
    }

    fn score_cue(&self, cue: &ImageCue<'_>, text: &str) -> f64 {
        let numeric = match cue.number.as_deref().map(|n| find_number(text, n)) {
            Some(NumberMention::Labelled) => self.config.numeric_weight,
            Some(NumberMention::Bare) => self.config.numeric_weight * BARE_NUMBER_FACTOR,
            _ => 0.0,
        };
        let keyword = if cue.keywords.is_empty() {
            0.0
        } else {
            let words = keywords(text);
            let shared = cue.keywords.iter().filter(|k| words.contains(*k)).count();
            self.config.keyword_weight * shared as f64 / cue.keywords.len() as f64
        };
        (numeric + keyword).min(1.0)
    }

    /// Best paragraph per image for one chapter, in library order.
    ///
    /// Images numbered for another chapter are out of scope. Unnumbered
    /// images need at least one keyword hit to be placed.
    pub fn place_chapter(
        &self,
        library: &ImageLibrary,
        chapter: &CanonicalChapter,
        chapter_index: usize,
    ) -> Vec<FigureAssignment> {
        let paragraphs: Vec<(&str, String)> = chapter
            .sections
            .iter()
            .flat_map(|s| &s.content)
            .filter_map(|b| b.anchor_id().map(|id| (id, b.text())))
            .collect();

        let mut assignments = Vec::new();
        for image in &library.entries {
            let Some(cue) = ImageCue::new(image) else {
                tracing::debug!(image = %image.original_name, "image has no caption or number, skipped");
                continue;
            };
            if cue
                .chapter_number()
                .is_some_and(|c| c != chapter.number)
            {
                continue;
            }
            if paragraphs.is_empty() {
                tracing::warn!(
                    image = %image.original_name,
                    chapter_index,
                    "no candidate paragraph in chapter, image skipped"
                );
                continue;
            }

            // Ties keep the earliest paragraph.
            let mut best: Option<(&str, f64)> = None;
            for (id, text) in &paragraphs {
                let score = self.score_cue(&cue, text);
                if best.is_none_or(|(_, s)| score > s) {
                    best = Some((*id, score));
                }
            }
            let Some((paragraph_id, confidence)) = best else {
                continue;
            };
            if cue.number.is_none() && confidence <= 0.0 {
                tracing::debug!(image = %image.original_name, "no keyword overlap, skipped");
                continue;
            }

            let uncertain = confidence < self.config.min_confidence;
            if uncertain {
                tracing::info!(
                    image = %image.original_name,
                    paragraph_id,
                    confidence,
                    "low-confidence figure placement"
                );
            }
            assignments.push(FigureAssignment {
                image_ref: cue.image.storage_path.clone(),
                paragraph_id: paragraph_id.to_string(),
                chapter_index,
                confidence,
                uncertain,
            });
        }
        assignments
    }
}

impl Default for FigureMatcher {
    fn default() -> Self {
        Self::new(MatcherConfig::default())
    }
}
