//! Prompt construction and model-output parsing for section generation.

use serde::Deserialize;

use super::section::SectionContext;
use crate::domain::{Section, SkeletonMeta};
use crate::ports::ModelRequest;

const SYSTEM_PROMPT: &str = "You write chapters of a vocational textbook. \
Answer with JSON only, no prose around it, in the shape \
{\"paragraphs\":[{\"id\":\"...\",\"basis\":\"...\",\"practice\":\"...\",\"depth\":\"...\"}]}. \
Return exactly one entry per requested paragraph id, in the requested order. \
`practice` and `depth` are optional.";

/// Build the request for one section.
pub fn section_request(
    meta: &SkeletonMeta,
    section: &Section,
    context: &SectionContext,
    max_tokens: u32,
) -> ModelRequest {
    let mut prompt = format!(
        "Book: {title}\nLanguage: {lang}\n",
        title = meta.title,
        lang = meta.language
    );
    if let Some(level) = &meta.level {
        prompt.push_str(&format!("Level: {level}\n"));
    }
    prompt.push_str(&format!("Chapter: {}\n", context.chapter_title));
    if !context.sibling_titles.is_empty() {
        prompt.push_str("Other sections in this chapter:\n");
        for title in &context.sibling_titles {
            prompt.push_str(&format!("- {title}\n"));
        }
    }
    prompt.push_str(&format!("\nWrite section \"{}\".\n", section.title));
    for sub in &section.blocks {
        prompt.push_str(&format!("\n## {}\n", sub.title));
        for p in &sub.blocks {
            prompt.push_str(&format!("- paragraph id: {}\n", p.id));
        }
    }

    let paragraph_ids: Vec<&str> = section.paragraphs().map(|p| p.id.as_str()).collect();
    ModelRequest {
        system: SYSTEM_PROMPT.to_string(),
        prompt,
        context: serde_json::json!({
            "section_id": section.id,
            "section_title": section.title,
            "paragraph_ids": paragraph_ids,
        }),
        max_tokens,
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeneratedParagraph {
    pub id: String,
    pub basis: String,
    #[serde(default)]
    pub practice: Option<String>,
    #[serde(default)]
    pub depth: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeneratedSection {
    paragraphs: Vec<GeneratedParagraph>,
}

/// Pull the JSON object out of a model answer. Tolerates code fences and
/// chatter around the object.
pub fn parse_paragraphs(raw: &str) -> Result<Vec<GeneratedParagraph>, String> {
    let start = raw.find('{').ok_or("no JSON object in model output")?;
    let end = raw.rfind('}').ok_or("no JSON object in model output")?;
    if end < start {
        return Err("no JSON object in model output".into());
    }
    let parsed: GeneratedSection =
        serde_json::from_str(&raw[start..=end]).map_err(|e| format!("invalid JSON: {e}"))?;
    Ok(parsed.paragraphs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::skeleton::fixtures::two_section_skeleton;

    #[test]
    fn request_lists_every_paragraph_id() {
        let sk = two_section_skeleton();
        let context = SectionContext {
            chapter_title: "The cell".into(),
            sibling_titles: vec!["1.2 Section 2".into()],
        };

        let req = section_request(&sk.meta, &sk.chapters[0].sections[0], &context, 512);

        assert!(req.prompt.contains("- paragraph id: ch1-s1-sp1-p2"));
        assert!(req.prompt.contains("- 1.2 Section 2"));
        assert!(req.prompt.contains("Level: n3"));
        assert_eq!(
            req.context["paragraph_ids"],
            serde_json::json!(["ch1-s1-sp1-p1", "ch1-s1-sp1-p2"])
        );
        assert_eq!(req.max_tokens, 512);
    }

    #[test]
    fn parses_fenced_answer() {
        let raw = "Here you go:\n```json\n{\"paragraphs\":[{\"id\":\"a\",\"basis\":\"x\",\"depth\":\"d\"}]}\n```";
        let parsed = parse_paragraphs(raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].depth.as_deref(), Some("d"));
        assert_eq!(parsed[0].practice, None);
    }

    #[test]
    fn rejects_non_json() {
        assert!(parse_paragraphs("sorry, I cannot").is_err());
        assert!(parse_paragraphs("} {").is_err());
        assert!(parse_paragraphs("{\"paragraphs\": 3}").is_err());
    }
}
