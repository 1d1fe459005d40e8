//! `folio` のコマンドライン定義（clap）
//!
//! 書籍は `<book>/<version>` で指定する。

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use folio_core::domain::{BookKey, JobId};

/// Folio: job-driven textbook generator.
#[derive(Debug, Parser)]
#[command(name = "folio", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file (default: ./folio.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging unless RUST_LOG is set.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a placeholder skeleton from an outline JSON file.
    Seed {
        outline: PathBuf,
    },

    /// Validate and store a skeleton JSON file.
    Save {
        skeleton: PathBuf,

        /// Also compile and store the canonical document.
        #[arg(long, default_value_t = false)]
        compile: bool,
    },

    /// Enqueue chapter generation.
    Generate {
        book: BookKey,

        /// 0-based chapter to start from.
        #[arg(long, default_value_t = 0)]
        chapter: usize,

        /// Generate only this chapter.
        #[arg(long, default_value_t = false)]
        no_chain: bool,

        /// Idempotency key; repeating it within the dedup window returns the
        /// original job.
        #[arg(long)]
        key: Option<String>,
    },

    /// Claim and execute due jobs, then exit.
    Pump {
        /// Upper bound on jobs handled in this call.
        #[arg(long, default_value_t = 1)]
        max: usize,
    },

    /// Run workers until Ctrl-C.
    Work {
        /// Overrides worker.concurrency.
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Show one job.
    Status {
        job: JobId,
    },

    /// Jobs per status.
    Counts,

    /// Re-queue a dead-lettered job.
    Reset {
        job: JobId,
    },

    /// Compile the stored skeleton into the canonical document.
    Compile {
        book: BookKey,

        /// Also write the document to this file.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Place library images on the paragraphs of one chapter.
    PlaceFigures {
        book: BookKey,

        /// 0-based chapter index.
        #[arg(long)]
        chapter: usize,

        /// Image library index JSON (entries + srcMap).
        #[arg(long)]
        library: PathBuf,
    },
}
