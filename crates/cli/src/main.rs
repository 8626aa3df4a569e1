use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use moly_metadata_core::cache::JsonFileCache;
use moly_metadata_core::config::{
    config_path, load_config, load_config_from, lookup_options_from_config, save_config, set_config_key, AppConfig,
};
use moly_metadata_core::error::{ConfigError, MetadataError};
use moly_metadata_core::lookup::moly::MolySource;
use moly_metadata_core::lookup::{
    drain_sink, result_sink, IdentifyStatus, MetadataRecord, MetadataSource, Query, ISBN_KEY, SITE_ID_KEY,
};

type CliResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "moly-lookup")]
#[command(about = "Look up book metadata and covers on moly.hu")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct QueryArgs {
    /// Book title
    #[arg(short, long)]
    title: Option<String>,

    /// Author (repeat for several)
    #[arg(short, long = "author")]
    authors: Vec<String>,

    /// ISBN-10 or ISBN-13
    #[arg(long)]
    isbn: Option<String>,

    /// moly.hu book id (the part after /konyvek/)
    #[arg(long)]
    id: Option<String>,

    /// Per-request timeout in seconds (defaults to the config value)
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Find metadata for a book
    Identify {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Find cover images for a book
    Cover {
        #[command(flatten)]
        query: QueryArgs,

        /// Download the images into this directory instead of printing URLs
        #[arg(short, long)]
        output: Option<String>,

        /// Only keep the first usable cover
        #[arg(long)]
        best: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Initialize default config file
    Init,
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Key (dot-separated path)
        key: String,
        /// Value
        value: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let result = match &cli.command {
        Commands::Identify { query } => run_identify(&cli, query).await,
        Commands::Cover { query, output, best } => run_cover(&cli, query, output.as_deref(), *best).await,
        Commands::Config { action } => run_config(&cli, action),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load(cli: &Cli) -> AppConfig {
    match &cli.config {
        Some(path) if path.exists() => load_config_from(path).unwrap_or_else(|e| {
            eprintln!("Ignoring {}: {}", path.display(), e);
            AppConfig::default()
        }),
        Some(_) => AppConfig::default(),
        None => load_config(),
    }
}

fn build_query(args: &QueryArgs) -> Query {
    let mut query = Query {
        title: args.title.clone(),
        authors: args.authors.clone(),
        ..Query::default()
    };
    if let Some(isbn) = &args.isbn {
        query = query.with_identifier(ISBN_KEY, isbn);
    }
    if let Some(id) = &args.id {
        query = query.with_identifier(SITE_ID_KEY, id);
    }
    query
}

/// Source backed by the on-disk cache, or by memory only when the cache
/// file cannot be read.
fn build_source(cfg: &AppConfig) -> Result<(MolySource, Option<Arc<JsonFileCache>>), MetadataError> {
    match MolySource::from_config(cfg) {
        Err(MetadataError::Cache(e)) => {
            tracing::warn!("Cache unusable, using memory only: {}", e);
            Ok((MolySource::new(lookup_options_from_config(&cfg.lookup))?, None))
        }
        built => built,
    }
}

fn persist(cache: Option<&Arc<JsonFileCache>>) {
    if let Some(cache) = cache {
        if let Err(e) = cache.save() {
            tracing::warn!("Could not save cache {}: {}", cache.path().display(), e);
        }
    }
}

/// Cancelled on Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    cancel
}

fn spinner(json: bool, message: &str) -> Option<ProgressBar> {
    if json {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

async fn collect_records<S: MetadataSource>(
    source: &S,
    query: &Query,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(IdentifyStatus, Vec<MetadataRecord>), Box<dyn std::error::Error + Send + Sync>> {
    let (tx, mut rx) = result_sink();
    let status = source.identify(query, &tx, timeout, cancel).await?;
    drop(tx);
    let mut records = drain_sink(&mut rx);
    records.sort_by_key(|r| r.relevance);
    Ok((status, records))
}

fn print_record(r: &MetadataRecord) {
    println!("{} by {}", r.title, r.authors.join(", "));
    println!("  moly.hu id: {}", r.site_id);
    if let Some(isbn) = &r.isbn {
        println!("  ISBN: {}", isbn);
    }
    if let Some(series) = &r.series {
        println!("  Series: {} #{}", series.name, series.index);
    }
    if let Some(p) = &r.publisher {
        println!("  Publisher: {}", p);
    }
    if let Some(d) = &r.pubdate {
        println!("  Published: {}", d.format("%Y"));
    }
    if let Some(rating) = r.rating {
        println!("  Rating: {:.0}/5", rating);
    }
    if !r.languages.is_empty() {
        println!("  Languages: {}", r.languages.join(", "));
    }
    if !r.tags.is_empty() {
        println!("  Tags: {}", r.tags.join(", "));
    }
    for url in &r.cover_urls {
        println!("  Cover: {}", url);
    }
}

async fn run_identify(cli: &Cli, args: &QueryArgs) -> CliResult {
    let cfg = load(cli);
    let (source, cache) = build_source(&cfg)?;
    let query = build_query(args);
    let timeout = Duration::from_secs(args.timeout.unwrap_or(cfg.lookup.timeout_secs));
    let cancel = cancel_on_interrupt();

    let pb = spinner(cli.json, "Searching moly.hu...");
    let outcome = collect_records(&source, &query, timeout, &cancel).await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    persist(cache.as_ref());
    let (status, records) = outcome?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    match status {
        IdentifyStatus::Cancelled => eprintln!("Cancelled"),
        _ if records.is_empty() => println!("No metadata found"),
        _ => {
            for (i, r) in records.iter().enumerate() {
                print!("Result {}: ", i + 1);
                print_record(r);
            }
        }
    }
    Ok(())
}

fn extension_for(media_type: &str) -> &str {
    match media_type {
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "jpg",
    }
}

async fn run_cover(cli: &Cli, args: &QueryArgs, output: Option<&str>, best: bool) -> CliResult {
    let cfg = load(cli);
    let (source, cache) = build_source(&cfg)?;
    let query = build_query(args);
    let timeout = Duration::from_secs(args.timeout.unwrap_or(cfg.lookup.timeout_secs));
    let cancel = cancel_on_interrupt();

    let Some(dir) = output else {
        let pb = spinner(cli.json, "Looking for covers...");
        let mut urls = source.resolve_cover_urls(&query, timeout, &cancel).await;
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        persist(cache.as_ref());
        if best {
            urls.truncate(1);
        }
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&urls)?);
        } else if urls.is_empty() {
            println!("No cover found");
        } else {
            for url in &urls {
                println!("{}", url);
            }
        }
        return Ok(());
    };

    let pb = spinner(cli.json, "Downloading covers...");
    let covers = source.download_covers(&query, timeout, best, &cancel).await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    persist(cache.as_ref());

    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for (i, cover) in covers.iter().enumerate() {
        let path = Path::new(dir).join(format!("cover-{}.{}", i + 1, extension_for(&cover.media_type)));
        std::fs::write(&path, &cover.data)?;
        written.push(serde_json::json!({ "url": cover.url, "path": path.display().to_string() }));
        if !cli.json {
            println!("Saved {} -> {}", cover.url, path.display());
        }
    }
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&written)?);
    } else if written.is_empty() {
        println!("No cover found");
    }
    Ok(())
}

fn run_config(cli: &Cli, action: &ConfigAction) -> CliResult {
    let path = || -> Result<PathBuf, ConfigError> {
        match &cli.config {
            Some(p) => Ok(p.clone()),
            None => config_path().ok_or(ConfigError::NoConfigDir),
        }
    };
    match action {
        ConfigAction::Init => {
            let path = path()?;
            save_config(&AppConfig::default(), &path)?;
            println!("Wrote default config to {}", path.display());
        }
        ConfigAction::Show => {
            let cfg = load(cli);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&cfg)?);
            } else {
                println!("{}", toml::to_string_pretty(&cfg)?);
            }
        }
        ConfigAction::Set { key, value } => {
            let path = path()?;
            let mut cfg = if path.exists() {
                load_config_from(&path).unwrap_or_default()
            } else {
                AppConfig::default()
            };
            set_config_key(&mut cfg, key, value)?;
            save_config(&cfg, &path)?;
            if !cli.json {
                println!("Updated {}", key);
            }
        }
    }
    Ok(())
}
