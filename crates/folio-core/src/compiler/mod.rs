//! Compiler: Skeleton → Canonical Document.
//!
//! Pure and deterministic. Validation runs first and collects every broken
//! invariant; a Skeleton with any violation produces no document.

pub mod numbering;

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::domain::{
    Block, CanonicalChapter, CanonicalDocument, CanonicalSection, Chapter, Paragraph, Section,
    Skeleton, StructuralViolation, Subparagraph, Violation,
};
use numbering::parse_prefix;

pub fn compile(skeleton: &Skeleton) -> Result<CanonicalDocument, StructuralViolation> {
    validate(skeleton)?;
    Ok(CanonicalDocument {
        meta: skeleton.meta.clone(),
        chapters: skeleton.chapters.iter().map(compile_chapter).collect(),
    })
}

/// Check every structural invariant, reporting all violations at once.
pub fn validate(skeleton: &Skeleton) -> Result<(), StructuralViolation> {
    let mut v = Validator::default();
    for (ci, chapter) in skeleton.chapters.iter().enumerate() {
        v.chapter(ci, chapter);
    }
    if v.violations.is_empty() {
        Ok(())
    } else {
        Err(StructuralViolation {
            violations: v.violations,
        })
    }
}

#[derive(Default)]
struct Validator<'a> {
    violations: Vec<Violation>,
    section_ids: HashSet<&'a str>,
    paragraph_ids: HashSet<&'a str>,
}

impl<'a> Validator<'a> {
    fn push(&mut self, path: String, reason: impl Into<String>) {
        self.violations.push(Violation {
            path,
            reason: reason.into(),
        });
    }

    fn chapter(&mut self, ci: usize, chapter: &'a Chapter) {
        let path = format!("chapters[{ci}]");
        if chapter.title.trim().is_empty() {
            self.push(path.clone(), "missing title");
        }
        let expected = ci as u32 + 1;
        if chapter.number != expected {
            self.push(
                path.clone(),
                format!("chapter number {} does not match position {expected}", chapter.number),
            );
        }
        for (si, section) in chapter.sections.iter().enumerate() {
            self.section(&format!("{path}.sections[{si}]"), chapter.number, si, section);
        }
    }

    fn section(&mut self, path: &str, chapter_number: u32, si: usize, section: &'a Section) {
        if section.id.trim().is_empty() {
            self.push(path.to_string(), "missing id");
        } else if !self.section_ids.insert(&section.id) {
            self.push(path.to_string(), format!("duplicate section id '{}'", section.id));
        }

        let number = if section.title.trim().is_empty() {
            self.push(path.to_string(), "missing title");
            None
        } else {
            parse_prefix(&section.title)
        };

        let expected = [chapter_number, si as u32 + 1];
        if let Some(n) = &number
            && n.text.is_empty()
        {
            self.push(path.to_string(), format!("number {} without title text", n.label()));
        }
        if let Some(n) = &number
            && n.parts != expected
        {
            self.push(
                path.to_string(),
                format!(
                    "number {} does not match position {}",
                    n.label(),
                    numbering::join(&expected)
                ),
            );
        }

        for (ki, sub) in section.blocks.iter().enumerate() {
            self.subparagraph(
                &format!("{path}.blocks[{ki}]"),
                number.as_ref().map(|_| expected),
                ki,
                sub,
            );
        }
    }

    fn subparagraph(
        &mut self,
        path: &str,
        parent: Option<[u32; 2]>,
        ki: usize,
        sub: &'a Subparagraph,
    ) {
        if sub.title.trim().is_empty() {
            self.push(path.to_string(), "missing title");
        } else if let Some(n) = parse_prefix(&sub.title) {
            if n.text.is_empty() {
                self.push(path.to_string(), format!("number {} without title text", n.label()));
            }
            match parent {
                None => self.push(
                    path.to_string(),
                    format!("numbered subparagraph {} under an unnumbered section", n.label()),
                ),
                Some([c, s]) => {
                    let expected = [c, s, ki as u32 + 1];
                    if n.parts != expected {
                        self.push(
                            path.to_string(),
                            format!(
                                "number {} does not match parent position {}",
                                n.label(),
                                numbering::join(&expected)
                            ),
                        );
                    }
                }
            }
        }

        for (pi, paragraph) in sub.blocks.iter().enumerate() {
            let ppath = format!("{path}.blocks[{pi}]");
            if paragraph.id.trim().is_empty() {
                self.push(ppath, "missing id");
            } else if !self.paragraph_ids.insert(&paragraph.id) {
                self.push(ppath, format!("duplicate paragraph id '{}'", paragraph.id));
            }
        }
    }
}

fn compile_chapter(chapter: &Chapter) -> CanonicalChapter {
    CanonicalChapter {
        number: chapter.number,
        title: chapter.title.clone(),
        opener_image_ref: chapter.opener_image_ref.clone(),
        sections: chapter.sections.iter().map(compile_section).collect(),
    }
}

fn compile_section(section: &Section) -> CanonicalSection {
    let (number, title) = split_title(&section.title);
    let mut content = Vec::new();
    for sub in &section.blocks {
        let (number, title) = split_title(&sub.title);
        content.push(Block::Subparagraph {
            id: sub.id.clone(),
            number,
            title,
        });
        content.extend(sub.blocks.iter().map(compile_paragraph));
    }
    CanonicalSection {
        id: section.id.clone(),
        number,
        title,
        content,
    }
}

fn split_title(title: &str) -> (Option<String>, String) {
    match parse_prefix(title) {
        Some(n) => (Some(n.label()), n.text.to_string()),
        None => (None, title.trim().to_string()),
    }
}

fn compile_paragraph(p: &Paragraph) -> Block {
    let plain = p.practice_text.is_none()
        && p.depth_text.is_none()
        && p.images.as_ref().is_none_or(Vec::is_empty);
    if plain && let Some((ordered, items)) = as_list(&p.basis_text) {
        return Block::List {
            id: p.id.clone(),
            ordered,
            items,
        };
    }
    Block::Paragraph {
        id: p.id.clone(),
        basis: p.basis_text.clone(),
        practice: p.practice_text.clone(),
        depth: p.depth_text.clone(),
        images: p.images.clone().unwrap_or_default(),
    }
}

/// A text whose non-blank lines are all bullets, or all numbered items.
fn as_list(text: &str) -> Option<(bool, Vec<String>)> {
    static ORDERED_RE: OnceLock<Regex> = OnceLock::new();
    let ordered_re =
        ORDERED_RE.get_or_init(|| Regex::new(r"^\d+[.)]\s+(.*)$").expect("invalid list regex"));

    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return None;
    }

    let bullets: Option<Vec<String>> = lines
        .iter()
        .map(|l| {
            ["- ", "* ", "• "]
                .iter()
                .find_map(|m| l.strip_prefix(m))
                .map(|rest| rest.trim().to_string())
        })
        .collect();
    if let Some(items) = bullets {
        return Some((false, items));
    }

    let numbered: Option<Vec<String>> = lines
        .iter()
        .map(|l| {
            ordered_re
                .captures(l)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
        })
        .collect();
    numbered.map(|items| (true, items))
}
