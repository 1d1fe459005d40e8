#![allow(dead_code)]

use std::sync::Arc;

use folio_core::app::{AppBuilder, BookService, Worker, WorkerSettings};
use folio_core::config::FolioConfig;
use folio_core::domain::{BookKey, Outline};
use folio_core::figures::FigureMatcher;
use folio_core::impls::{InMemoryBookStore, ScriptedModel};
use folio_core::ports::{BookStore, JobStore};

pub fn key() -> BookKey {
    BookKey::new("anatomy", "v1")
}

/// `chapters` chapters of `sections` numbered sections, one subparagraph
/// with two paragraphs each.
pub fn outline(chapters: usize, sections: usize) -> Outline {
    let chapters: Vec<_> = (1..=chapters)
        .map(|c| {
            let sections: Vec<_> = (1..=sections)
                .map(|s| {
                    serde_json::json!({
                        "title": format!("{c}.{s} Section {s}"),
                        "subparagraphs": [{ "title": format!("{c}.{s}.1 Basics"), "paragraphs": 2 }]
                    })
                })
                .collect();
            serde_json::json!({ "title": format!("Chapter {c}"), "sections": sections })
        })
        .collect();
    serde_json::from_value(serde_json::json!({
        "meta": { "bookId": "anatomy", "versionId": "v1", "title": "Anatomy" },
        "chapters": chapters
    }))
    .expect("valid outline")
}

pub fn config() -> FolioConfig {
    let mut config = FolioConfig::default();
    config.worker.yield_delay_ms = 0;
    config
}

pub struct Harness {
    pub jobs: Arc<dyn JobStore>,
    pub books: Arc<dyn BookStore>,
    pub service: BookService,
    pub worker: Worker,
}

pub fn harness(jobs: Arc<dyn JobStore>, books: Arc<dyn BookStore>, model: ScriptedModel) -> Harness {
    let config = config();
    let app = AppBuilder::new()
        .with_book_generation(jobs.clone(), books.clone(), Arc::new(model), &config)
        .expect("handlers register")
        .build()
        .expect("app builds");
    let worker = app.worker(jobs.clone(), WorkerSettings::default());
    let service = BookService::new(jobs.clone(), books.clone(), FigureMatcher::default());
    Harness {
        jobs,
        books,
        service,
        worker,
    }
}

pub fn in_memory_books() -> Arc<dyn BookStore> {
    Arc::new(InMemoryBookStore::new())
}
