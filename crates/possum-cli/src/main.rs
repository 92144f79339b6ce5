//! possum: encrypted block storage CLI
//!
//! Key management:
//!   keygen [--force]         - create the block key and tag secret
//!   export-public            - print the public verification key
//!
//! Storage:
//!   upload <path>            - split, encrypt, tag, index, and store a file
//!   download <id> <dest>     - fetch, decrypt, and reassemble a file
//!   verify <id> [--deep | --public <key>]
//!                            - re-check every block's tag (and ciphertext)
//!   check                    - stateless tag check for one block
//!   health                   - probe the blob store
//!
//! Catalog:
//!   info <id>, search <query>, clear --yes, config show

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use possum_core::config::PossumConfig;
use possum_core::BlockRef;
use possum_crypto::{KeyRing, PublicKey};
use possum_index::{JsonStore, MetadataStore, TagExtractor};
use possum_pipeline::{PipelineContext, PipelineOptions, ProgressFn, VerifyMode};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "possum",
    version,
    about = "Encrypted, verifiable, searchable block storage",
    long_about = "possum: store files as AES-encrypted blocks in S3-compatible storage, \
                  tagged for pairing-based verification and indexed for term search"
)]
struct Cli {
    /// Path to possum.toml configuration file
    #[arg(long, short = 'c', env = "POSSUM_CONFIG", default_value = "/etc/possum/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a new key file (block key + tag secret)
    Keygen {
        /// Replace an existing key file
        #[arg(long)]
        force: bool,
    },

    /// Print the public verification key as hex
    #[command(name = "export-public")]
    ExportPublic,

    /// Upload a local file
    ///
    /// Credentials are read from AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY
    /// (or POSSUM_ACCESS_KEY_ID and POSSUM_SECRET_ACCESS_KEY).
    Upload {
        /// Local file to upload
        path: PathBuf,
        /// Extra metadata as key=value (repeatable)
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },

    /// Download a file by id
    Download {
        file_id: String,
        /// Local destination path
        dest: PathBuf,
    },

    /// Show a file's record and block locations
    Info { file_id: String },

    /// Verify every block of a file
    ///
    /// Without --deep only the public key is needed: from --public, or else
    /// from the configured key file.
    Verify {
        file_id: String,
        /// Also fetch, checksum, decrypt, and re-hash each block (needs the full key file)
        #[arg(long, conflicts_with = "public")]
        deep: bool,
        /// Public key as hex, or a file holding it (bare hex or a key file)
        #[arg(long)]
        public: Option<String>,
    },

    /// Check one (hash, tag) pair against a public key
    Check {
        /// Public key (hex, compressed G2)
        #[arg(long)]
        public: String,
        /// SHA-256 of the block plaintext (hex)
        #[arg(long)]
        hash: String,
        /// Tag (hex, compressed G1)
        #[arg(long)]
        tag: String,
    },

    /// Search indexed blocks by term
    Search {
        query: String,
        /// Minimum relevance score (default: index.default_min_score)
        #[arg(long)]
        min_score: Option<f64>,
    },

    /// Remove every file, block, and tag record from the catalog
    Clear {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },

    /// Check that the blob store is reachable
    Health,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).await?;
    init_logging(&config.logging.level, &config.logging.format);
    tracing::debug!(config = %cli.config.display(), "configuration loaded");

    match &cli.command {
        Commands::Keygen { force } => cmd_keygen(&config, *force),
        Commands::ExportPublic => cmd_export_public(&config),
        Commands::Upload { path, meta } => cmd_upload(&config, path, meta).await,
        Commands::Download { file_id, dest } => cmd_download(&config, file_id, dest).await,
        Commands::Info { file_id } => cmd_info(&config, file_id),
        Commands::Verify {
            file_id,
            deep,
            public,
        } => cmd_verify(&config, file_id, *deep, public.as_deref()).await,
        Commands::Check { public, hash, tag } => cmd_check(public, hash, tag),
        Commands::Search { query, min_score } => {
            cmd_search(&config, query, min_score.unwrap_or(config.index.default_min_score))
        }
        Commands::Clear { yes } => cmd_clear(&config, *yes).await,
        Commands::Health => cmd_health(&config).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => cmd_config_show(&config, &cli.config),
        },
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stderr keeps stdout clean for command output
    if format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn load_config(path: &Path) -> Result<PossumConfig> {
    let config = if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("parsing config: {}", path.display()))?
    } else {
        PossumConfig::default()
    };
    config
        .validate()
        .with_context(|| format!("invalid config: {}", path.display()))?;
    Ok(config)
}

fn build_operator_from_env(config: &PossumConfig) -> Result<opendal::Operator> {
    let access_key = std::env::var("AWS_ACCESS_KEY_ID")
        .or_else(|_| std::env::var("POSSUM_ACCESS_KEY_ID"))
        .context(
            "S3 credentials not set\n\
             Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY environment variables.\n\
             Example:\n\
             \texport AWS_ACCESS_KEY_ID=your-key\n\
             \texport AWS_SECRET_ACCESS_KEY=your-secret",
        )?;
    let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .or_else(|_| std::env::var("POSSUM_SECRET_ACCESS_KEY"))
        .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;

    possum_storage::build_from_core_config(&config.storage, &access_key, &secret_key)
        .context("building storage operator")
}

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    expand_tilde_with(path, &std::env::var("HOME").unwrap_or_default())
}

fn expand_tilde_with(path: &Path, home: &str) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

fn open_catalog(config: &PossumConfig) -> Result<JsonStore> {
    let path = expand_tilde(&config.index.catalog_path);
    JsonStore::open(&path).with_context(|| format!("opening catalog: {}", path.display()))
}

fn load_keys(config: &PossumConfig) -> Result<KeyRing> {
    let path = expand_tilde(&config.crypto.keys_file);
    KeyRing::load(&path).with_context(|| format!("loading keys: {}", path.display()))
}

/// Everything needed for commands that touch the blob store.
fn build_context(config: &PossumConfig) -> Result<PipelineContext> {
    Ok(PipelineContext {
        op: build_operator_from_env(config)?,
        store: Arc::new(open_catalog(config)?),
        keys: Arc::new(load_keys(config)?),
        extractor: Arc::new(TagExtractor::from_config(&config.index)),
        options: PipelineOptions::from_config(config),
    })
}

fn parse_meta(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got '{s}'")),
    }
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupted, stopping at the next block boundary...");
            token.cancel();
        }
    });
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=>-");
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn progress_callback(pb: &ProgressBar) -> ProgressFn {
    let pb = pb.clone();
    Box::new(move |done, total, msg| {
        pb.set_length(total);
        pb.set_position(done);
        pb.set_message(msg.to_string());
    })
}

// ── `possum keygen` / `possum export-public` ─────────────────────────────────

fn cmd_keygen(config: &PossumConfig, force: bool) -> Result<()> {
    let path = expand_tilde(&config.crypto.keys_file);
    let ring = KeyRing::generate();
    ring.save(&path, force)
        .with_context(|| format!("writing key file: {}", path.display()))?;

    println!("Wrote key file: {}", path.display());
    println!("  public key: {}", ring.public_key().to_hex());
    Ok(())
}

fn cmd_export_public(config: &PossumConfig) -> Result<()> {
    let path = expand_tilde(&config.crypto.keys_file);
    let public = possum_crypto::load_public_key(&path)
        .with_context(|| format!("reading public key: {}", path.display()))?;
    println!("{}", public.to_hex());
    Ok(())
}

// ── `possum upload` ───────────────────────────────────────────────────────────

async fn cmd_upload(config: &PossumConfig, path: &Path, meta: &[(String, String)]) -> Result<()> {
    let ctx = build_context(config)?;

    let mut metadata = Map::new();
    for (k, v) in meta {
        metadata.insert(k.clone(), Value::from(v.as_str()));
    }

    println!(
        "Uploading {} → {}:{} (endpoint: {})",
        path.display(),
        config.storage.bucket,
        config.storage.prefix,
        config.storage.endpoint,
    );

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let pb = make_progress_bar(0, "upload");
    let progress = progress_callback(&pb);
    let result = possum_pipeline::upload_file(&ctx, path, metadata, &cancel, Some(&progress)).await;
    let result = match result {
        Ok(r) => r,
        Err(e) => {
            pb.abandon_with_message("failed");
            return Err(e).with_context(|| format!("uploading {}", path.display()));
        }
    };
    pb.finish_with_message("done");

    println!("  file id: {}", result.file_id);
    println!("  blocks:  {}", result.block_count);
    println!("  bytes:   {}", fmt_bytes(result.bytes));
    for (i, url) in result.urls.iter().enumerate() {
        println!("  [{i}] {url}");
    }
    Ok(())
}

// ── `possum download` ─────────────────────────────────────────────────────────

async fn cmd_download(config: &PossumConfig, file_id: &str, dest: &Path) -> Result<()> {
    let ctx = build_context(config)?;

    let pb = make_progress_bar(0, "download");
    let progress = progress_callback(&pb);
    let result = match possum_pipeline::download_file(&ctx, file_id, dest, Some(&progress)).await {
        Ok(r) => r,
        Err(e) => {
            pb.abandon_with_message("failed");
            let hint = if e.is_integrity_failure() {
                "stored data failed integrity checks"
            } else if e.is_storage_failure() {
                "blob store unavailable"
            } else {
                "download failed"
            };
            return Err(e).with_context(|| format!("{hint}: {file_id}"));
        }
    };
    pb.finish_with_message("done");

    println!(
        "Downloaded {} → {} ({})",
        result.file_id,
        result.local_path.display(),
        fmt_bytes(result.bytes)
    );
    Ok(())
}

// ── `possum info` ─────────────────────────────────────────────────────────────

fn cmd_info(config: &PossumConfig, file_id: &str) -> Result<()> {
    let store = open_catalog(config)?;
    let Some(file) = store.get_file(file_id)? else {
        bail!("unknown file id: {file_id}");
    };
    let blocks = store.get_file_blocks(file_id)?;

    println!("File:    {}", file.file_id);
    println!("  name:    {}", file.original_name);
    println!("  type:    {}", file.mime_type);
    println!("  size:    {}", fmt_bytes(file.size_bytes));
    println!("  created: {}", file.created_at);
    println!("  blocks:  {}", file.block_count);

    let extra: Vec<_> = file
        .metadata
        .iter()
        .filter(|(k, _)| !possum_pipeline::assemble::RESERVED_KEYS.contains(&k.as_str()))
        .collect();
    if !extra.is_empty() {
        println!("  metadata:");
        for (k, v) in extra {
            println!("    {k} = {v}");
        }
    }

    for b in blocks {
        let loc = BlockRef {
            index: b.index,
            url: possum_storage::object_url(&config.storage, &b.ciphertext_ref),
            ciphertext_ref: b.ciphertext_ref,
        };
        println!(
            "  [{}] {} ({}, hash {})",
            loc.index,
            loc.url,
            fmt_bytes(b.size_bytes),
            &b.content_hash.to_hex()[..16]
        );
    }
    Ok(())
}

// ── `possum verify` / `possum check` ──────────────────────────────────────────

async fn cmd_verify(
    config: &PossumConfig,
    file_id: &str,
    deep: bool,
    public: Option<&str>,
) -> Result<()> {
    let result = if deep {
        let ctx = build_context(config)?;
        possum_pipeline::verify_file(&ctx, file_id, VerifyMode::Deep).await
    } else {
        let public = resolve_public(config, public)?;
        let op = build_operator_from_env(config)?;
        let store = open_catalog(config)?;
        possum_pipeline::verify_tags(&op, &store, &public, file_id).await
    };
    let report = result.with_context(|| format!("verifying {file_id}"))?;

    for b in &report.blocks {
        let status = serde_json::to_value(&b.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("{:?}", b.status));
        println!("  [{}] {:<18} {}", b.index, status, b.block_id);
    }

    let failed = report.failures().count();
    if failed > 0 {
        bail!("{failed} of {} blocks failed verification", report.blocks.len());
    }
    println!("All {} blocks verified", report.blocks.len());
    Ok(())
}

/// `--public` as a file path or hex, falling back to the configured key file.
fn resolve_public(config: &PossumConfig, arg: Option<&str>) -> Result<PublicKey> {
    let Some(arg) = arg else {
        let path = expand_tilde(&config.crypto.keys_file);
        return possum_crypto::load_public_key(&path)
            .with_context(|| format!("reading public key: {}", path.display()));
    };
    let path = expand_tilde(Path::new(arg));
    if path.is_file() {
        possum_crypto::load_public_key(&path)
            .with_context(|| format!("reading public key: {}", path.display()))
    } else {
        PublicKey::from_hex(arg.trim()).context("parsing --public as hex")
    }
}

fn cmd_check(public: &str, hash: &str, tag: &str) -> Result<()> {
    let ok = possum_pipeline::verify_block(public, hash, tag).context("parsing check inputs")?;
    if !ok {
        bail!("tag does not verify");
    }
    println!("valid");
    Ok(())
}

// ── `possum search` ───────────────────────────────────────────────────────────

fn cmd_search(config: &PossumConfig, query: &str, min_score: f64) -> Result<()> {
    let store = open_catalog(config)?;
    let hits = possum_index::search(&store, query, min_score)?;

    if hits.is_empty() {
        println!("No blocks match '{query}' (min score {min_score})");
        return Ok(());
    }

    for hit in hits {
        println!(
            "{:.3}  {} [{}]  {}",
            hit.relevance_score, hit.original_name, hit.block_index, hit.block_id
        );
        println!("       tags: {}", hit.tags.join(", "));
        if !hit.content_preview.is_empty() {
            let preview: String = hit
                .content_preview
                .chars()
                .map(|c| if c.is_control() { ' ' } else { c })
                .collect();
            println!("       {preview}");
        }
    }
    Ok(())
}

// ── `possum clear` ────────────────────────────────────────────────────────────

async fn cmd_clear(config: &PossumConfig, yes: bool) -> Result<()> {
    if !yes {
        bail!("refusing to clear the catalog without --yes");
    }
    let store = open_catalog(config)?;
    let files = store.list_files()?.len();
    tokio::task::spawn_blocking(move || store.clear())
        .await
        .context("clear task failed")??;
    println!("Cleared {files} files from the catalog (stored blocks are untouched)");
    Ok(())
}

// ── `possum health` / `possum config show` ────────────────────────────────────

async fn cmd_health(config: &PossumConfig) -> Result<()> {
    let op = build_operator_from_env(config)?;
    possum_storage::check_health(&op)
        .await
        .with_context(|| format!("blob store unreachable: {}", config.storage.endpoint))?;
    println!(
        "ok: {} bucket {} is reachable",
        config.storage.endpoint, config.storage.bucket
    );
    Ok(())
}

fn cmd_config_show(config: &PossumConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
