use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use log::{error, info};
use simplelog::{Config, LevelFilter, WriteLogger};

use tileview::panic_handler;
use tileview::render::{
    DocumentInfo, DocumentSession, Listeners, PageSize, PatternBackend, PlanSummary,
    SessionEvent, Tile, TileConfig, TileKey,
};
use tileview::settings;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Parser)]
#[command(name = "tileview")]
#[command(about = "Render the visible tiles of a paginated document", long_about = None)]
struct Cli {
    /// PDF file to open (needs the `pdf` feature)
    file: Option<PathBuf>,

    /// Use a generated document with this many pages instead of a file
    #[arg(long, value_name = "PAGES")]
    synthetic: Option<usize>,

    /// Page size of the generated document
    #[arg(long, default_value_t = 600.0)]
    page_width: f32,

    #[arg(long, default_value_t = 800.0)]
    page_height: f32,

    /// Custom page order, e.g. `0,4,4,6,3`
    #[arg(long, value_delimiter = ',')]
    order: Option<Vec<usize>>,

    /// Page to show (0-based)
    #[arg(long, default_value_t = 0)]
    page: usize,

    #[arg(long, default_value_t = 1.0)]
    zoom: f32,

    /// Viewport width in pixels
    #[arg(long, default_value_t = 1280.0)]
    width: f32,

    /// Viewport height in pixels
    #[arg(long, default_value_t = 800.0)]
    height: f32,

    /// Strip offset, clamped so the page stays on screen; defaults to the
    /// page centered at the chosen zoom
    #[arg(long, allow_hyphen_values = true)]
    offset_x: Option<f32>,

    #[arg(long, allow_hyphen_values = true)]
    offset_y: Option<f32>,

    /// Write every cached tile and thumbnail as PNG into this directory
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,

    /// Seconds to wait for the render worker
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    #[arg(long, default_value = "tileview.log")]
    log_file: PathBuf,

    /// Settings file to use instead of the default location
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Default)]
struct Counters {
    published: AtomicUsize,
    failed: AtomicUsize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cfg!(debug_assertions) {
        panic_handler::initialize_panic_handler();
    } else {
        human_panic::setup_panic!();
    }

    WriteLogger::init(
        cli.log_level.into(),
        Config::default(),
        File::create(&cli.log_file)
            .with_context(|| format!("creating log file {}", cli.log_file.display()))?,
    )?;

    info!("Starting tileview");

    match &cli.config {
        Some(path) => settings::load_settings_from_path(path),
        None => settings::load_settings(),
    }
    let config = settings::get_tile_config();

    let result = run(&cli, config);
    if let Err(e) = &result {
        error!("tileview failed: {e:?}");
    }

    info!("Shutting down tileview");
    result
}

fn run(cli: &Cli, config: TileConfig) -> Result<()> {
    let counters = Arc::new(Counters::default());
    let published = Arc::clone(&counters);
    let failed = Arc::clone(&counters);
    let listeners = Listeners::new()
        .on_tile_ready(move |_| {
            published.published.fetch_add(1, Ordering::Relaxed);
        })
        .on_render_error(move |request, error| {
            failed.failed.fetch_add(1, Ordering::Relaxed);
            eprintln!(
                "page {}: failed to render {:?}: {error}",
                request.key.document_page, request.key.bounds
            );
        })
        .on_load_complete(|count| info!("Document ready with {count} pages"));

    let mut session = DocumentSession::new(config, listeners);
    let info = open_document(cli, &mut session, &config)?;

    if cli.page >= session.page_count() {
        bail!(
            "page {} does not exist (document has {} pages)",
            cli.page,
            session.page_count()
        );
    }

    session.on_viewport_changed(cli.width, cli.height, 0.0, 0.0, 1.0, cli.page);
    let mut plan = session.jump_to(i64::try_from(cli.page)?);

    if config.clamp_zoom(cli.zoom) != 1.0 {
        plan = session.zoom_centered_to(cli.zoom, cli.width / 2.0, cli.height / 2.0);
    }
    if cli.offset_x.is_some() || cli.offset_y.is_some() {
        let Some(viewport) = session.viewport() else {
            bail!("document was unloaded");
        };
        plan = session.move_to(
            cli.offset_x.unwrap_or(viewport.offset_x),
            cli.offset_y.unwrap_or(viewport.offset_y),
        );
    }

    let events = session.settle(Duration::from_secs(cli.timeout));

    let written = match &cli.out {
        Some(dir) => write_tiles(&session, dir)?,
        None => 0,
    };

    print_summary(&session, &info, &plan, &events, &counters, written);
    session.unload();
    Ok(())
}

fn open_document(
    cli: &Cli,
    session: &mut DocumentSession,
    config: &TileConfig,
) -> Result<DocumentInfo> {
    let order = cli.order.clone();
    match (&cli.file, cli.synthetic) {
        (Some(_), Some(_)) => bail!("pass either FILE or --synthetic, not both"),
        (None, None) => bail!("nothing to render: pass a PDF file or --synthetic <PAGES>"),
        (None, Some(pages)) => {
            let size = PageSize::new(cli.page_width, cli.page_height);
            let backend = PatternBackend::new(pages, size);
            Ok(session.load_document(backend, order)?)
        }
        (Some(path), None) => open_pdf(session, path, config, order),
    }
}

#[cfg(feature = "pdf")]
fn open_pdf(
    session: &mut DocumentSession,
    path: &Path,
    config: &TileConfig,
    order: Option<Vec<usize>>,
) -> Result<DocumentInfo> {
    use tileview::render::MupdfBackend;

    let path = path.to_path_buf();
    let pool_size = config.page_pool_size;
    let info = session
        .load_with(move || MupdfBackend::open_with_pool(&path, pool_size), order)
        .context("opening PDF")?;
    Ok(info)
}

#[cfg(not(feature = "pdf"))]
fn open_pdf(
    _session: &mut DocumentSession,
    path: &Path,
    _config: &TileConfig,
    _order: Option<Vec<usize>>,
) -> Result<DocumentInfo> {
    bail!(
        "cannot open {}: tileview was built without the `pdf` feature",
        path.display()
    )
}

fn tile_file_name(key: &TileKey, thumbnail: bool) -> String {
    if thumbnail {
        return format!("thumb_p{:04}.png", key.user_page);
    }
    format!(
        "tile_p{:04}_{:04}_{:04}_{}x{}.png",
        key.user_page,
        (key.bounds.left * 1000.0).round() as u32,
        (key.bounds.top * 1000.0).round() as u32,
        key.raster_size().0,
        key.raster_size().1
    )
}

fn write_tiles(session: &DocumentSession, dir: &Path) -> Result<usize> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    session.with_cache(|cache| -> Result<usize> {
        let tiles: Vec<&Tile> = cache
            .snapshot_for_draw()
            .into_iter()
            .chain(cache.thumbnails())
            .collect();
        for tile in &tiles {
            let path = dir.join(tile_file_name(tile.key(), tile.is_thumbnail()));
            tile.bitmap()
                .save(&path)
                .with_context(|| format!("writing {}", path.display()))?;
        }
        Ok(tiles.len())
    })
}

fn print_summary(
    session: &DocumentSession,
    info: &DocumentInfo,
    plan: &PlanSummary,
    events: &[SessionEvent],
    counters: &Counters,
    written: usize,
) {
    let cached = events
        .iter()
        .filter(|event| matches!(event, SessionEvent::TileCached { .. }))
        .count();
    let stats = session.cache_stats();

    println!(
        "Document: {} pages ({} shown), page size {}x{}",
        info.page_count,
        session.page_count(),
        info.page_size.width,
        info.page_size.height
    );
    if let Some(optimal) = session.optimal_page_size() {
        println!("Fitted page: {}x{}", optimal.width, optimal.height);
    }
    println!(
        "Last plan: {} pages, {} tiles ({} requested, {} already cached), {} thumbnails",
        plan.pages, plan.tiles, plan.requested, plan.promoted, plan.thumbnails
    );
    println!(
        "Rendered: {} published, {} cached, {} failed",
        counters.published.load(Ordering::Relaxed),
        cached,
        counters.failed.load(Ordering::Relaxed)
    );
    println!(
        "Cache: {}/{} tiles ({} active, {} passive), {}/{} thumbnails",
        stats.active + stats.passive,
        stats.capacity,
        stats.active,
        stats.passive,
        stats.thumbnails,
        stats.thumbnail_capacity
    );
    if written > 0 {
        println!("Wrote {written} PNG files");
    }
}
