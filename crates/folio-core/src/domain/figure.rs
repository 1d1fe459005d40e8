//! Figure library and placement assignments.
//!
//! The library mirrors the per-book image index produced when a book's
//! images are uploaded: a list of entries plus a `srcMap` from original
//! file name to storage path.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageLibrary {
    #[serde(default)]
    pub book_slug: Option<String>,
    #[serde(default)]
    pub entries: Vec<LibraryImage>,
    #[serde(default)]
    pub src_map: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryImage {
    pub original_name: String,
    pub storage_path: String,
    #[serde(default)]
    pub caption: Option<String>,
    /// Explicit figure number such as "3.2". Falls back to the caption.
    #[serde(default)]
    pub figure_number: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl ImageLibrary {
    /// Storage path for an original file name, if the library knows it.
    pub fn resolve(&self, original_name: &str) -> Option<&str> {
        self.src_map
            .get(original_name)
            .map(String::as_str)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|e| e.original_name == original_name)
                    .map(|e| e.storage_path.as_str())
            })
    }
}

/// Advisory placement of one library image on one canonical paragraph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FigureAssignment {
    pub image_ref: String,
    pub paragraph_id: String,
    pub chapter_index: usize,
    pub confidence: f64,
    pub uncertain: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_upload_index_shape() {
        let lib: ImageLibrary = serde_json::from_value(serde_json::json!({
            "bookSlug": "anatomy",
            "entries": [{
                "originalName": "fig_3_2.tif",
                "storagePath": "library/anatomy/images/fig_3_2.tif.jpg",
                "caption": "Figuur 3.2 De celmembraan"
            }],
            "srcMap": { "fig_3_2.tif": "library/anatomy/images/fig_3_2.tif.jpg" }
        }))
        .unwrap();

        assert_eq!(lib.entries.len(), 1);
        assert_eq!(
            lib.resolve("fig_3_2.tif"),
            Some("library/anatomy/images/fig_3_2.tif.jpg")
        );
        assert_eq!(lib.resolve("missing.png"), None);
    }
}
