//! AssetSleuth: production asset browser engine.
//!
//! Thin command-line front end. Scans one folder of a location, waits for
//! enrichment and prints the listing. All logic lives in the
//! `assetsleuth-core` and `assetsleuth-view` crates.

use anyhow::Context;
use assetsleuth_core::collab::{BookmarkDb, ImageThumbnailCache, MemoryBookmarkDb, SqliteBookmarkDb};
use assetsleuth_core::config::{BrowserConfig, Settings};
use assetsleuth_core::filter::{FlagFilter, SortRole, SortSpec};
use assetsleuth_core::model::size::{format_count, format_size};
use assetsleuth_core::scanner::ASSET_FOLDER;
use assetsleuth_core::{Browser, Location, Record, RecordFlags, RecordKind};
use assetsleuth_view::ListViewState;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// List the files and frame sequences of a production location
#[derive(Parser)]
#[command(name = "assetsleuth", version)]
struct Cli {
    /// Server (top-level directory) of the location
    server: String,
    /// Job directory below the server
    job: String,
    /// Asset root directory below the job
    root: String,

    /// Asset whose task folders are listed
    #[arg(long)]
    asset: Option<String>,

    /// Task folder to list; without it the assets themselves are listed
    #[arg(long)]
    task: Option<String>,

    /// List every frame instead of collapsing sequences
    #[arg(long)]
    flat: bool,

    /// Text filter, e.g. `shot --wip "final take"`
    #[arg(long, default_value = "")]
    query: String,

    #[arg(long, value_enum, default_value_t = SortArg::Name)]
    sort: SortArg,

    #[arg(long)]
    descending: bool,

    /// Include archived items
    #[arg(long)]
    archived: bool,

    /// Only favourites
    #[arg(long)]
    favourites: bool,

    /// Only the active item
    #[arg(long)]
    active: bool,

    #[arg(long, value_enum, default_value_t = Format::Table)]
    format: Format,

    /// Skip thumbnail generation
    #[arg(long)]
    no_thumbnails: bool,

    /// Seconds to wait for enrichment before printing
    #[arg(long, default_value_t = 120)]
    timeout: u64,

    /// Browser configuration (JSON); written with defaults when missing
    #[arg(long)]
    config: Option<PathBuf>,

    /// Persisted settings (JSON); created on first save
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Bookmark database (SQLite); in-memory when omitted
    #[arg(long)]
    database: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Name,
    Modified,
    Size,
}

impl From<SortArg> for SortRole {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Name => SortRole::Name,
            SortArg::Modified => SortRole::Modified,
            SortArg::Size => SortRole::Size,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Table,
    Csv,
    Json,
}

/// One printed line.
#[derive(Serialize)]
struct Row {
    name: String,
    kind: RecordKind,
    path: String,
    frames: Option<String>,
    size: u64,
    modified: i64,
    details: String,
    flags: String,
    description: String,
}

fn flag_letters(flags: RecordFlags) -> String {
    [
        (RecordFlags::ACTIVE, 'A'),
        (RecordFlags::FAVOURITE, 'F'),
        (RecordFlags::ARCHIVED, 'X'),
    ]
    .into_iter()
    .map(|(flag, c)| if flags.contains(flag) { c } else { '-' })
    .collect()
}

impl From<Record> for Row {
    fn from(record: Record) -> Self {
        Self {
            name: record.collapsed_name(),
            kind: record.kind,
            frames: record.frame_range.clone(),
            size: record.sort_keys.by_size,
            modified: record.sort_keys.by_mtime,
            details: record.file_details,
            flags: flag_letters(record.flags),
            description: record.description,
            path: record.path,
        }
    }
}

fn print_rows(rows: &[Row], format: Format) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match format {
        Format::Table => {
            let width = rows.iter().map(|r| r.name.len()).max().unwrap_or(4).max(4);
            writeln!(out, "{:<width$}  {:>10}  {:<3}  DETAILS", "NAME", "SIZE", "FLG")?;
            for row in rows {
                writeln!(
                    out,
                    "{:<width$}  {:>10}  {:<3}  {}",
                    row.name,
                    format_size(row.size),
                    row.flags,
                    row.details
                )?;
            }
        }
        Format::Csv => {
            let mut writer = csv::Writer::from_writer(out);
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        Format::Json => {
            serde_json::to_writer_pretty(&mut out, rows)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they never mix with csv/json output.
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_writer(io::stderr)
        .init();

    tracing::info!("AssetSleuth starting");

    let mut config = match &cli.config {
        Some(path) => BrowserConfig::load_or_create(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => BrowserConfig::default(),
    };
    if cli.no_thumbnails {
        config.generate_thumbnails = false;
    }

    let db: Arc<dyn BookmarkDb> = match &cli.database {
        Some(path) => Arc::new(
            SqliteBookmarkDb::open(path)
                .with_context(|| format!("opening bookmark database {}", path.display()))?,
        ),
        None => Arc::new(MemoryBookmarkDb::new()),
    };
    let thumbnails = Arc::new(ImageThumbnailCache::new(config.thumbnail_cache_dir()));
    let settings = match &cli.settings {
        Some(path) => Settings::open(path),
        None => Settings::in_memory(),
    };

    let mut location = Location::new(&cli.server, &cli.job, &cli.root);
    if let Some(asset) = &cli.asset {
        location = location.with_asset(asset);
    }
    let folder = cli.task.as_deref().unwrap_or(ASSET_FOLDER);
    let kind = if cli.flat {
        RecordKind::File
    } else {
        RecordKind::Sequence
    };

    let browser = Arc::new(Browser::new(location, config, db, thumbnails, settings));
    browser.set_text_query(&cli.query);
    browser.set_flag_filter(FlagFilter::Archived, cli.archived);
    browser.set_flag_filter(FlagFilter::Favourite, cli.favourites);
    browser.set_flag_filter(FlagFilter::Active, cli.active);

    let mut view = ListViewState::new(Arc::clone(&browser), kind);
    view.open_folder(folder);
    if let Some(error) = &view.last_error {
        anyhow::bail!("cannot list {folder}: {error}");
    }

    if !browser.wait_idle(Duration::from_secs(cli.timeout)) {
        tracing::warn!("Enrichment still running after {}s; printing partial data", cli.timeout);
    }
    // Sort after enrichment so size and date keys are filled in.
    view.set_sort(SortSpec {
        role: cli.sort.into(),
        descending: cli.descending,
    });
    browser.resort().context("sorting")?;
    view.process_events();
    view.set_viewport(0, view.rows.len().max(1));

    let rows: Vec<Row> = view.visible_records().into_iter().map(Row::from).collect();
    print_rows(&rows, cli.format)?;
    tracing::info!(
        "{} of {} items listed",
        format_count(rows.len() as u64),
        format_count(browser.store().len(folder, kind) as u64)
    );

    browser.shutdown().context("saving settings")?;
    Ok(())
}
