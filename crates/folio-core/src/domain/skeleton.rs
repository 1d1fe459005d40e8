//! Skeleton: the mutable authoring representation of a book.
//!
//! book → chapters → sections → subparagraphs → paragraph blocks.
//!
//! Structure (ids, titles, order) is fixed once seeded. Generation only
//! fills paragraph content in place; `replace_section` refuses anything that
//! would change structure.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::StructuralViolation;

/// Text written into every paragraph of a freshly seeded Skeleton.
pub const PLACEHOLDER_TEXT: &str = "[[placeholder]]";

/// Storage key of one book version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookKey {
    pub book_id: String,
    pub version_id: String,
}

impl BookKey {
    pub fn new(book_id: impl Into<String>, version_id: impl Into<String>) -> Self {
        Self {
            book_id: book_id.into(),
            version_id: version_id.into(),
        }
    }
}

impl fmt::Display for BookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.book_id, self.version_id)
    }
}

impl FromStr for BookKey {
    type Err = String;

    /// `book/version`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((book, version))
                if !book.trim().is_empty() && !version.trim().is_empty() && !version.contains('/') =>
            {
                Ok(Self::new(book.trim(), version.trim()))
            }
            _ => Err(format!("expected <book>/<version>, got '{s}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkeletonMeta {
    pub book_id: String,
    pub version_id: String,
    pub title: String,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
}

fn default_language() -> String {
    "nl".to_string()
}

fn default_schema_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skeleton {
    pub meta: SkeletonMeta,
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: String,
    pub number: u32,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opener_image_ref: Option<String>,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub title: String,
    pub blocks: Vec<Subparagraph>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subparagraph {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    pub blocks: Vec<Paragraph>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paragraph {
    pub id: String,
    pub basis_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub practice_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ParagraphImage>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParagraphImage {
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl Skeleton {
    pub fn key(&self) -> BookKey {
        BookKey::new(&self.meta.book_id, &self.meta.version_id)
    }

    /// True when no paragraph anywhere still holds placeholder text.
    pub fn is_fully_generated(&self) -> bool {
        self.chapters
            .iter()
            .flat_map(|c| &c.sections)
            .all(Section::is_generated)
    }

    /// Swap in a regenerated section, keeping everything else untouched.
    ///
    /// The replacement must carry the seeded structure of the section it
    /// replaces; only paragraph content may differ.
    pub fn replace_section(
        &mut self,
        chapter_index: usize,
        section: Section,
    ) -> Result<(), StructuralViolation> {
        let chapter = self.chapters.get_mut(chapter_index).ok_or_else(|| {
            StructuralViolation::single(
                format!("chapters[{chapter_index}]"),
                "chapter does not exist",
            )
        })?;
        let Some((index, current)) = chapter
            .sections
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.id == section.id)
        else {
            return Err(StructuralViolation::single(
                format!("chapters[{chapter_index}]"),
                format!("no section with id '{}'", section.id),
            ));
        };
        current.check_same_structure(&section).map_err(|reason| {
            StructuralViolation::single(
                format!("chapters[{chapter_index}].sections[{index}]"),
                reason,
            )
        })?;
        *current = section;
        Ok(())
    }
}

impl Section {
    pub fn paragraphs(&self) -> impl Iterator<Item = &Paragraph> {
        self.blocks.iter().flat_map(|sp| sp.blocks.iter())
    }

    pub fn paragraphs_mut(&mut self) -> impl Iterator<Item = &mut Paragraph> {
        self.blocks.iter_mut().flat_map(|sp| sp.blocks.iter_mut())
    }

    pub fn is_generated(&self) -> bool {
        self.paragraphs().all(|p| !p.is_placeholder())
    }

    /// Compares ids, titles and ordering down to paragraph ids.
    pub fn check_same_structure(&self, other: &Section) -> Result<(), String> {
        if self.id != other.id {
            return Err(format!("section id changed: '{}' -> '{}'", self.id, other.id));
        }
        if self.title != other.title {
            return Err(format!(
                "section title changed: '{}' -> '{}'",
                self.title, other.title
            ));
        }
        if self.blocks.len() != other.blocks.len() {
            return Err(format!(
                "subparagraph count changed: {} -> {}",
                self.blocks.len(),
                other.blocks.len()
            ));
        }
        for (i, (a, b)) in self.blocks.iter().zip(&other.blocks).enumerate() {
            if a.id != b.id || a.title != b.title {
                return Err(format!("subparagraph {i} changed identity or title"));
            }
            let ids_a: Vec<&str> = a.blocks.iter().map(|p| p.id.as_str()).collect();
            let ids_b: Vec<&str> = b.blocks.iter().map(|p| p.id.as_str()).collect();
            if ids_a != ids_b {
                return Err(format!("subparagraph {i} paragraph ids changed"));
            }
        }
        Ok(())
    }
}

impl Paragraph {
    pub fn placeholder(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            basis_text: PLACEHOLDER_TEXT.to_string(),
            practice_text: None,
            depth_text: None,
            images: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        let text = self.basis_text.trim();
        text.is_empty() || text.starts_with(PLACEHOLDER_TEXT)
    }
}
