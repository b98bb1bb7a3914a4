//! Paper snapshot CLI: build snapshots, serve the read API + MCP surface

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paperdb::api::{ApiState, SharedState};
use paperdb::assets::fetch::AssetFetcher;
use paperdb::api::urls::UrlResolver;
use paperdb::build::{build_snapshot, BuildOptions};
use paperdb::config::{AppConfig, StaticMode};
use paperdb::mcp::mcp_router;
use paperdb::snapshot::store::SnapshotStore;

#[derive(Debug, Parser)]
#[command(name = "paper", version, about = "Paper snapshot search and retrieval core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Snapshot database operations
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Snapshot building
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommand,
    },
    /// Read API serving
    Api {
        #[command(subcommand)]
        command: ApiCommand,
    },
}

#[derive(Debug, Subcommand)]
enum SnapshotCommand {
    /// Build a snapshot database and static asset tree from input collections
    Build(BuildArgs),
}

#[derive(Debug, Subcommand)]
enum ApiCommand {
    /// Serve the HTTP API and MCP surface over a snapshot
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
struct BuildArgs {
    /// Input collection JSON (repeatable; listing order sets merge precedence)
    #[arg(long = "input", required = true)]
    inputs: Vec<PathBuf>,

    /// BibTeX file enriching paper metadata
    #[arg(long)]
    bibtex: Option<PathBuf>,

    /// Root directory searched for referenced PDFs (repeatable)
    #[arg(long = "pdf-root")]
    pdf_roots: Vec<PathBuf>,

    /// Root directory searched for source markdown and images (repeatable)
    #[arg(long = "md-root")]
    md_roots: Vec<PathBuf>,

    /// Root directory searched for translated markdown (repeatable)
    #[arg(long = "md-translated-root")]
    md_translated_roots: Vec<PathBuf>,

    /// Previous snapshot database for paper-id continuity
    #[arg(long)]
    previous_snapshot_db: Option<PathBuf>,

    /// Output snapshot database path
    #[arg(long)]
    output_db: PathBuf,

    /// Static asset tree output directory
    #[arg(long, env = "PAPER_DB_STATIC_EXPORT_DIR")]
    static_export_dir: Option<PathBuf>,

    /// Base URL the API will emit for static assets
    #[arg(long, env = "PAPER_DB_STATIC_BASE_URL")]
    static_base_url: Option<String>,

    /// dev (relative fallback URL allowed) or prod (base URL required)
    #[arg(long, env = "PAPER_DB_STATIC_MODE")]
    static_mode: Option<String>,
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Snapshot database to serve
    #[arg(long)]
    snapshot_db: PathBuf,

    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Base URL for static asset links
    #[arg(long, env = "PAPER_DB_STATIC_BASE_URL")]
    static_base_url: Option<String>,

    /// Local static tree used for summary/source proxying (falls back to
    /// fetching from the base URL)
    #[arg(long, env = "PAPER_DB_STATIC_EXPORT_DIR")]
    static_export_dir: Option<PathBuf>,

    /// Allowed CORS/MCP origin (repeatable)
    #[arg(long = "allowed-origin", env = "PAPER_DB_ALLOWED_ORIGINS", value_delimiter = ',')]
    allowed_origins: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "paperdb=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Db { command } => match command {
            DbCommand::Snapshot {
                command: SnapshotCommand::Build(args),
            } => run_build(args).await,
            DbCommand::Api {
                command: ApiCommand::Serve(args),
            } => run_serve(args).await,
        },
    }
}

async fn run_build(args: BuildArgs) -> anyhow::Result<()> {
    let mut config = AppConfig::load()?;
    let static_mode = args
        .static_mode
        .as_deref()
        .map(str::parse::<StaticMode>)
        .transpose()?;
    config.apply_cli(
        args.static_base_url,
        static_mode,
        args.static_export_dir,
        Vec::new(),
    );

    // prod builds must know where assets will be served from.
    let base_url = config.resolved_static_base_url()?;
    tracing::info!(static_base_url = %base_url, "building snapshot");

    let export_dir = config
        .static_export_dir
        .clone()
        .context("--static-export-dir (or PAPER_DB_STATIC_EXPORT_DIR) is required")?;

    let options = BuildOptions {
        inputs: args.inputs,
        bibtex: args.bibtex,
        pdf_roots: args.pdf_roots,
        md_roots: args.md_roots,
        md_translated_roots: args.md_translated_roots,
        previous_snapshot_db: args.previous_snapshot_db,
        output_db: args.output_db,
        static_export_dir: PathBuf::from(export_dir),
    };
    let (meta, report) = build_snapshot(options).await?;

    println!("{}", report.render());
    if report.has_problems() {
        tracing::warn!(
            identity_conflicts = report.identity_conflicts.len(),
            fingerprint_divergences = report.fingerprint_divergences.len(),
            skipped = report.skipped_records.len(),
            missing_assets = report.missing_assets.len(),
            "build finished with problems"
        );
    }
    println!("snapshot build {} complete", meta.snapshot_build_id);
    Ok(())
}

async fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = AppConfig::load()?;
    config.apply_cli(
        args.static_base_url,
        None,
        args.static_export_dir.clone(),
        args.allowed_origins,
    );
    let base_url = config.resolved_static_base_url()?;

    let store = SnapshotStore::open(&args.snapshot_db)?;
    let urls = UrlResolver::new(base_url.clone(), store.snapshot_build_id());

    // Prefer proxying from the local export tree; otherwise fetch over HTTP.
    let proxy_base = match &config.static_export_dir {
        Some(dir) => dir.clone(),
        None => {
            if !base_url.starts_with("http") {
                bail!(
                    "summary/source proxying needs --static-export-dir or an http static_base_url"
                );
            }
            base_url.clone()
        }
    };
    let fetcher = Arc::new(AssetFetcher::new(&proxy_base)?);

    let state: SharedState = Arc::new(ApiState {
        store,
        urls,
        fetcher,
        allowed_origins: config.allowed_origins.clone(),
    });

    let app = paperdb::api::create_router(Arc::clone(&state)).merge(mcp_router(state));

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
