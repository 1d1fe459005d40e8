//! Outline: the input a Skeleton is seeded from.

use serde::{Deserialize, Serialize};

use super::skeleton::{Chapter, Paragraph, Section, Skeleton, SkeletonMeta, Subparagraph};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outline {
    pub meta: SkeletonMeta,
    pub chapters: Vec<OutlineChapter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineChapter {
    pub title: String,
    #[serde(default)]
    pub opener_image_ref: Option<String>,
    pub sections: Vec<OutlineSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineSection {
    pub title: String,
    pub subparagraphs: Vec<OutlineSubparagraph>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineSubparagraph {
    pub title: String,
    #[serde(default = "default_paragraphs")]
    pub paragraphs: usize,
}

fn default_paragraphs() -> usize {
    1
}

impl Outline {
    /// Build a Skeleton with deterministic ids and placeholder content.
    ///
    /// Chapters are numbered by position. Titles are taken verbatim, so a
    /// numbered outline must already carry consistent prefixes.
    pub fn seed(&self) -> Skeleton {
        let chapters = self
            .chapters
            .iter()
            .enumerate()
            .map(|(ci, ch)| {
                let ch_id = format!("ch{}", ci + 1);
                let sections = ch
                    .sections
                    .iter()
                    .enumerate()
                    .map(|(si, s)| {
                        let s_id = format!("{ch_id}-s{}", si + 1);
                        let blocks = s
                            .subparagraphs
                            .iter()
                            .enumerate()
                            .map(|(ki, sp)| {
                                let sp_id = format!("{s_id}-sp{}", ki + 1);
                                let blocks = (1..=sp.paragraphs)
                                    .map(|j| Paragraph::placeholder(format!("{sp_id}-p{j}")))
                                    .collect();
                                Subparagraph {
                                    id: Some(sp_id),
                                    title: sp.title.clone(),
                                    blocks,
                                }
                            })
                            .collect();
                        Section {
                            id: s_id,
                            title: s.title.clone(),
                            blocks,
                        }
                    })
                    .collect();
                Chapter {
                    id: ch_id,
                    number: (ci + 1) as u32,
                    title: ch.title.clone(),
                    opener_image_ref: ch.opener_image_ref.clone(),
                    sections,
                }
            })
            .collect();

        Skeleton {
            meta: self.meta.clone(),
            chapters,
        }
    }
}
