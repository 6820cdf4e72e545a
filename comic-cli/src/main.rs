//! # comic
//!
//! Command-line front end for the comic page composer. Talks to the page
//! server through a sync session, or renders a local pages file offline.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use comic_core::{
    LayoutResolver, MediaEnv, OffscreenGeometry, PageRecord, Rgba, TemplateRegistry,
};
use comic_renderer::silhouette::tint;
use comic_renderer::{
    compose_pages, decode_all, CompositorConfig, ExportConfig, ExportFormat, PageExporter,
    SilhouetteCache, EXPORT_SCALE,
};
use comic_sync::{
    HttpRemote, SessionBuilder, SessionHandle, StateArchive, SyncConfig, DEFAULT_SERVER_URL,
};
use futures::StreamExt;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "comic", version, about = "Compose and export comic pages")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export the server's pages.
    Export(ExportArgs),
    /// Render a local pages file without a server.
    Render(RenderArgs),
    /// Regenerate every template silhouette and store them on the server.
    Overlays(ServerArgs),
    /// Follow the server's pages and log every change.
    Watch(ServerArgs),
    /// Reset, download or restore the server state.
    State(StateArgs),
}

#[derive(Args, Debug)]
struct ServerArgs {
    /// Page server base URL.
    #[arg(long, env = "COMIC_SERVER_URL", default_value = DEFAULT_SERVER_URL)]
    server: String,

    /// Template directory used instead of the bundled templates.
    #[arg(long, env = "COMIC_TEMPLATES")]
    templates: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Output encoding.
    #[arg(long, value_enum, default_value_t = Format::Png)]
    format: Format,

    /// Output directory.
    #[arg(long, default_value = ".")]
    out: PathBuf,

    /// Raster pixels per layout pixel.
    #[arg(long, default_value_t = EXPORT_SCALE)]
    scale: f64,

    /// Skip the gutter silhouette pass.
    #[arg(long, default_value_t = false)]
    no_overlays: bool,
}

impl OutputArgs {
    fn compositor(&self) -> CompositorConfig {
        CompositorConfig {
            scale: self.scale,
            overlays: !self.no_overlays,
            ..CompositorConfig::default()
        }
    }
}

#[derive(Args, Debug)]
struct ExportArgs {
    #[command(flatten)]
    server: ServerArgs,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Pages JSON: a list of pages, or an object with a `pages` list.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Directory holding the images the pages reference.
    #[arg(long)]
    images: PathBuf,

    /// Template directory used instead of the bundled templates.
    #[arg(long, env = "COMIC_TEMPLATES")]
    templates: Option<PathBuf>,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug)]
struct StateArgs {
    #[command(flatten)]
    server: ServerArgs,

    #[command(subcommand)]
    action: StateAction,
}

#[derive(Subcommand, Debug)]
enum StateAction {
    /// Clear every page and image on the server.
    Reset,
    /// Download the state archive.
    Export {
        /// Output directory.
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Replace the server state with an archive.
    Import {
        /// Archive to upload.
        file: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Png,
    Jpeg,
    Pdf,
}

impl From<Format> for ExportFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Png => Self::Png,
            Format::Jpeg => Self::Jpeg,
            Format::Pdf => Self::Pdf,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PagesFile {
    Bare(Vec<PageRecord>),
    Wrapped { pages: Vec<PageRecord> },
}

/// Initialize structured tracing with optional JSON format.
///
/// Set `RUST_LOG` to control log levels (default: info,comic_sync=debug).
/// Set `RUST_LOG_FORMAT=json` for JSON output.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,comic_sync=debug"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Export(args) => cmd_export(args).await,
        Command::Render(args) => cmd_render(args).await,
        Command::Overlays(args) => cmd_overlays(args).await,
        Command::Watch(args) => cmd_watch(args).await,
        Command::State(args) => cmd_state(args).await,
    }
}

fn load_resolver(templates: Option<&Path>) -> anyhow::Result<Arc<LayoutResolver>> {
    let resolver = match templates {
        Some(dir) => {
            let registry = TemplateRegistry::load_dir(dir)
                .with_context(|| format!("loading templates from {}", dir.display()))?;
            LayoutResolver::new(registry, MediaEnv::default())
        }
        None => LayoutResolver::builtin(),
    };
    Ok(Arc::new(resolver))
}

fn session_builder(args: &ServerArgs) -> anyhow::Result<SessionBuilder> {
    let config = SyncConfig {
        server_url: args.server.clone(),
        ..SyncConfig::from_env()
    };
    let remote = HttpRemote::from_config(&config)
        .with_context(|| format!("invalid server URL {}", args.server))?;
    Ok(SessionBuilder::http(remote)
        .with_config(config)
        .with_resolver(load_resolver(args.templates.as_deref())?))
}

async fn cmd_export(args: ExportArgs) -> anyhow::Result<()> {
    let session = session_builder(&args.server)?
        .hidden()
        .with_compositor(args.output.compositor())
        .start()
        .await?;
    let files = session
        .export_pages(args.output.format.into())
        .await
        .context("export failed")?;
    write_files(&args.output.out, &files).await?;
    session.shutdown().await?;
    Ok(())
}

async fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let raw = tokio::fs::read(&args.in_path)
        .await
        .with_context(|| format!("reading {}", args.in_path.display()))?;
    let pages = parse_pages(&raw).with_context(|| format!("parsing {}", args.in_path.display()))?;
    let resolver = load_resolver(args.templates.as_deref())?;
    let provider = OffscreenGeometry::new();
    let config = args.output.compositor();

    let names: BTreeSet<&str> = pages.iter().flat_map(|page| page.images()).collect();
    let mut sources = Vec::with_capacity(names.len());
    for name in names {
        let path = args.images.join(safe_file_name(name)?);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading image {}", path.display()))?;
        sources.push((name.to_string(), bytes));
    }
    let images = decode_all(sources).await?;

    let silhouettes = SilhouetteCache::new();
    let mut overlays = HashMap::new();
    if config.overlays {
        let layouts: BTreeSet<&str> = pages.iter().map(|p| p.layout_name.as_str()).collect();
        for layout in layouts {
            let pixmap = silhouettes
                .load_or_generate(layout, &resolver, &provider, None, config.scale)
                .await
                .with_context(|| format!("silhouette for {layout}"))?;
            overlays.insert(layout.to_string(), pixmap);
        }
    }

    let rasters = compose_pages(&pages, &resolver, &provider, &images, &config, |record| {
        overlays.get(&record.layout_name).map(|silhouette| {
            tint(silhouette, Rgba::gutter_or_default(Some(record.gutter_color.as_str())))
        })
    })?;
    let files = PageExporter::new(ExportConfig::default()).export(
        &rasters,
        args.output.format.into(),
        unix_millis(),
    )?;
    write_files(&args.output.out, &files).await
}

async fn cmd_overlays(args: ServerArgs) -> anyhow::Result<()> {
    let session = session_builder(&args)?.hidden().start().await?;
    let names = session
        .rebuild_overlays()
        .await
        .context("rebuilding silhouettes failed")?;
    info!(count = names.len(), "Silhouettes stored");
    for name in &names {
        println!("{name}");
    }
    session.shutdown().await?;
    Ok(())
}

async fn cmd_watch(args: ServerArgs) -> anyhow::Result<()> {
    let session = session_builder(&args)?.start().await?;
    let mut statuses = session.status_stream();
    let mut poll = tokio::time::interval(Duration::from_secs(1));
    let mut last_seen = None;

    info!(server = %args.server, "Watching pages, Ctrl-C to stop");
    loop {
        tokio::select! {
            Some(status) = statuses.next() => info!(?status, "Save status"),
            _ = poll.tick() => report_change(&session, &mut last_seen).await?,
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(error = %err, "Signal handler failed");
                }
                break;
            }
        }
    }
    session.shutdown().await?;
    Ok(())
}

async fn report_change(
    session: &SessionHandle,
    last_seen: &mut Option<String>,
) -> anyhow::Result<()> {
    let snapshot = session.snapshot().await?;
    if snapshot.last_acknowledged != *last_seen {
        info!(
            pages = snapshot.pages.len(),
            images = snapshot.images.len(),
            unassigned = snapshot.partition.unassigned.len(),
            "Pages changed"
        );
        *last_seen = snapshot.last_acknowledged;
    }
    Ok(())
}

async fn cmd_state(args: StateArgs) -> anyhow::Result<()> {
    let session = session_builder(&args.server)?.hidden().start().await?;
    match args.action {
        StateAction::Reset => {
            let snapshot = session.reset_state().await.context("reset failed")?;
            info!(pages = snapshot.pages.len(), "Server state reset");
        }
        StateAction::Export { out } => {
            let archive = session.export_state().await.context("export failed")?;
            let name = safe_file_name(&archive.file_name)?;
            write_files(&out, &[(name, archive.bytes)]).await?;
        }
        StateAction::Import { file } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let file_name = safe_file_name(&file.to_string_lossy())?;
            let snapshot = session
                .import_state(StateArchive { file_name, bytes })
                .await
                .context("import failed")?;
            info!(
                pages = snapshot.pages.len(),
                images = snapshot.images.len(),
                "Server state imported"
            );
        }
    }
    session.shutdown().await?;
    Ok(())
}

fn parse_pages(raw: &[u8]) -> anyhow::Result<Vec<PageRecord>> {
    Ok(match serde_json::from_slice(raw)? {
        PagesFile::Bare(pages) | PagesFile::Wrapped { pages } => pages,
    })
}

/// Last path component of `name`, refusing names that have none.
fn safe_file_name(name: &str) -> anyhow::Result<String> {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("unusable file name {name:?}"))
}

async fn write_files(out: &Path, files: &[(String, Vec<u8>)]) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(out)
        .await
        .with_context(|| format!("creating {}", out.display()))?;
    for (name, bytes) in files {
        let path = out.join(name);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), bytes = bytes.len(), "Wrote file");
    }
    Ok(())
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
