//! Canonical Document: compiled, numbering-validated form consumed by
//! rendering. Derived from the Skeleton and disposable.

use serde::{Deserialize, Serialize};

use super::skeleton::{ParagraphImage, SkeletonMeta};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalDocument {
    pub meta: SkeletonMeta,
    pub chapters: Vec<CanonicalChapter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalChapter {
    pub number: u32,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opener_image_ref: Option<String>,
    pub sections: Vec<CanonicalSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalSection {
    pub id: String,
    /// Dotted number taken from the title prefix, when the title is numbered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    pub title: String,
    pub content: Vec<Block>,
}

/// A flat content block. Heading hierarchy survives as the `subparagraph`
/// tag; its content follows it in the same list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Paragraph {
        id: String,
        basis: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        practice: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        depth: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<ParagraphImage>,
    },
    List {
        id: String,
        ordered: bool,
        items: Vec<String>,
    },
    Subparagraph {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        number: Option<String>,
        title: String,
    },
}

impl Block {
    /// Id of a paragraph-like block that figures can attach to.
    pub fn anchor_id(&self) -> Option<&str> {
        match self {
            Block::Paragraph { id, .. } | Block::List { id, .. } => Some(id),
            Block::Subparagraph { .. } => None,
        }
    }

    /// Plain text of the block, used for matching.
    pub fn text(&self) -> String {
        match self {
            Block::Paragraph {
                basis,
                practice,
                depth,
                ..
            } => {
                let mut out = basis.clone();
                for extra in [practice, depth].into_iter().flatten() {
                    out.push('\n');
                    out.push_str(extra);
                }
                out
            }
            Block::List { items, .. } => items.join("\n"),
            Block::Subparagraph { title, .. } => title.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_is_tagged_by_type() {
        let b = Block::Subparagraph {
            id: Some("sp".into()),
            number: Some("1.2.1".into()),
            title: "Lipids".into(),
        };
        let v = serde_json::to_value(&b).unwrap();
        assert_eq!(v["type"], "subparagraph");
        assert_eq!(v["number"], "1.2.1");
    }

    #[test]
    fn paragraph_text_joins_optional_parts() {
        let b = Block::Paragraph {
            id: "p".into(),
            basis: "Basis.".into(),
            practice: None,
            depth: Some("Depth.".into()),
            images: vec![],
        };
        assert_eq!(b.text(), "Basis.\nDepth.");
        assert_eq!(b.anchor_id(), Some("p"));
    }
}
