mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::de::DeserializeOwned;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use folio_core::app::{App, AppBuilder, BookService, WorkerGroup};
use folio_core::config::FolioConfig;
use folio_core::domain::{ImageLibrary, Outline, Skeleton};
use folio_core::figures::FigureMatcher;
use folio_core::impls::{FileBookStore, HttpModel, ScriptedModel};
use folio_core::ports::{BookStore, JobStore, LanguageModel, SystemClock};
use folio_core::queue::FileJobStore;

/// Stores and services opened from the config.
struct Folio {
    config: FolioConfig,
    jobs: Arc<dyn JobStore>,
    books: Arc<dyn BookStore>,
    service: BookService,
}

impl Folio {
    async fn open(config: FolioConfig) -> Result<Self> {
        let jobs_file = config.storage.jobs_file();
        let jobs: Arc<dyn JobStore> = Arc::new(
            FileJobStore::open_with(
                &jobs_file,
                config.retry.policy(),
                config.queue.dedup_window(),
                Arc::new(SystemClock),
            )
            .await
            .with_context(|| format!("opening job store {}", jobs_file.display()))?,
        );
        let books: Arc<dyn BookStore> = Arc::new(FileBookStore::new(config.storage.data_dir.clone()));
        let service = BookService::new(
            jobs.clone(),
            books.clone(),
            FigureMatcher::new(config.figures.clone()),
        );
        Ok(Self {
            config,
            jobs,
            books,
            service,
        })
    }

    fn model(&self) -> Result<Arc<dyn LanguageModel>> {
        let cfg = &self.config.model;
        if cfg.is_offline() {
            tracing::warn!("no model API key configured, using the offline model");
            return Ok(Arc::new(ScriptedModel::offline()));
        }
        let model = HttpModel::new(&cfg.endpoint, &cfg.api_key, &cfg.model, cfg.timeout())?;
        Ok(Arc::new(model))
    }

    fn app(&self) -> Result<App> {
        let app = AppBuilder::new()
            .with_book_generation(
                self.jobs.clone(),
                self.books.clone(),
                self.model()?,
                &self.config,
            )?
            .build()?;
        Ok(app)
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = FolioConfig::load(cli.config.as_deref()).context("loading config")?;
    let ctx = Folio::open(config).await?;

    match cli.command {
        Command::Seed { outline } => {
            let outline: Outline = read_json(&outline)?;
            let skeleton = ctx.service.seed(&outline).await?;
            println!("seeded {} ({} chapters)", skeleton.key(), skeleton.chapters.len());
        }
        Command::Save { skeleton, compile } => {
            let skeleton: Skeleton = read_json(&skeleton)?;
            match ctx.service.save_skeleton(&skeleton, compile).await? {
                Some(doc) => println!("saved {} and compiled {} chapters", skeleton.key(), doc.chapters.len()),
                None => println!("saved {}", skeleton.key()),
            }
        }
        Command::Generate {
            book,
            chapter,
            no_chain,
            key,
        } => {
            let id = ctx.service.start_generation(&book, chapter, !no_chain, key).await?;
            println!("{id}");
        }
        Command::Pump { max } => {
            let worker = ctx.app()?.worker(ctx.jobs.clone(), ctx.config.worker.settings());
            let handled = worker.drain(max).await?;
            println!("handled {handled} job(s)");
        }
        Command::Work { concurrency } => {
            let n = concurrency.unwrap_or(ctx.config.worker.concurrency);
            if n == 0 {
                bail!("--concurrency must be at least 1");
            }
            let worker = ctx.app()?.worker(ctx.jobs.clone(), ctx.config.worker.settings());
            let group = WorkerGroup::spawn(n, worker);
            tracing::info!(workers = n, "working, Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            tracing::info!("shutting down");
            group.shutdown_and_join().await;
        }
        Command::Status { job } => {
            print_json(&ctx.service.job(job).await?)?;
        }
        Command::Counts => {
            println!("{}", ctx.jobs.counts().await?);
        }
        Command::Reset { job } => {
            if ctx.service.reset(job).await? {
                println!("{job} re-queued");
            } else {
                bail!("{job} is not dead-lettered");
            }
        }
        Command::Compile { book, out } => {
            let doc = ctx.service.compile(&book).await?;
            if let Some(out) = out {
                std::fs::write(&out, serde_json::to_vec_pretty(&doc)?)
                    .with_context(|| format!("writing {}", out.display()))?;
            }
            println!("compiled {book}: {} chapters", doc.chapters.len());
        }
        Command::PlaceFigures {
            book,
            chapter,
            library,
        } => {
            let library: ImageLibrary = read_json(&library)?;
            let placed = ctx.service.place_figures(&book, chapter, &library).await?;
            print_json(&placed)?;
        }
    }
    Ok(())
}
