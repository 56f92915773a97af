/*!
Sitestate CLI - inspect and manage the cached build state of a site.
*/

use clap::{Parser, Subcommand, ValueEnum};
use sitestate_core::config::{DEFAULT_CACHE_DIR, DEFAULT_SNAPSHOT_KEY, ENV_CACHE_DIR, ENV_SNAPSHOT_KEY};
use sitestate_core::observability::StoreMetrics;
use sitestate_core::{
    create_codec_from_config, BuildState, CacheConfig, CompressionKind, SnapshotCodecInterface,
    SnapshotMetadata, StoreError,
};
use std::path::PathBuf;
use tabled::{Table, Tabled};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "sitestate")]
#[command(about = "Inspect and manage the cached build state of a site")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Cache directory holding the snapshot
    #[arg(short, long, global = true, env = ENV_CACHE_DIR, default_value = DEFAULT_CACHE_DIR)]
    cache_dir: PathBuf,

    /// Key the snapshot is stored under
    #[arg(short, long, global = true, env = ENV_SNAPSHOT_KEY, default_value = DEFAULT_SNAPSHOT_KEY)]
    key: String,

    /// Compression the snapshot was written with
    #[arg(long, global = true, value_enum, default_value = "gzip")]
    compression: Compression,

    /// Print Prometheus metrics after the command
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Compression {
    Gzip,
    None,
}

impl From<Compression> for CompressionKind {
    fn from(compression: Compression) -> Self {
        match compression {
            Compression::Gzip => CompressionKind::Gzip,
            Compression::None => CompressionKind::None,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show snapshot metadata and slice sizes
    Show {
        /// Print as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Check that the snapshot can be restored
    Verify,
    /// Delete the snapshot
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Tabled)]
struct SliceInfo {
    #[tabled(rename = "Slice")]
    slice: &'static str,
    #[tabled(rename = "Entries")]
    entries: usize,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let config = CacheConfig::default_local()
        .with_cache_dir(cli.cache_dir.clone())
        .with_snapshot_key(cli.key.clone())
        .with_compression(cli.compression.into());
    let codec = create_codec_from_config(&config)?;

    match cli.command {
        Commands::Show { json } => show_snapshot(codec.as_ref(), json)?,
        Commands::Verify => verify_snapshot(codec.as_ref())?,
        Commands::Clear { force } => clear_snapshot(codec.as_ref(), force)?,
    }

    if cli.metrics {
        print!("{}", StoreMetrics::global().gather_metrics()?);
    }

    Ok(())
}

fn show_snapshot(codec: &dyn SnapshotCodecInterface, json: bool) -> Result<(), anyhow::Error> {
    info!("Showing snapshot: {}", codec.key());

    let Some((metadata, state)) = codec.load_snapshot()? else {
        println!("No cached build state under '{}'", codec.key());
        return Ok(());
    };
    let slices = slice_sizes(&state);

    if json {
        let sizes: serde_json::Map<String, serde_json::Value> = slices
            .iter()
            .map(|info| (info.slice.to_string(), info.entries.into()))
            .collect();
        let output = serde_json::json!({ "metadata": metadata, "slices": sizes });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print_metadata(&metadata);
    println!();
    println!("{}", Table::new(slices));
    Ok(())
}

fn verify_snapshot(codec: &dyn SnapshotCodecInterface) -> Result<(), anyhow::Error> {
    info!("Verifying snapshot: {}", codec.key());

    match codec.try_load() {
        Ok(Some(state)) => {
            println!(
                "✓ Snapshot is valid ({} nodes restored)",
                state.nodes.len()
            );
        }
        Ok(None) => {
            println!("No cached build state under '{}'", codec.key());
        }
        Err(StoreError::IntegrityCheckFailed { expected, actual }) => {
            error!("✗ Integrity check failed:");
            error!("  Expected hash: {}", expected);
            error!("  Actual hash: {}", actual);
            return Err(anyhow::anyhow!("Integrity check failed"));
        }
        Err(e) => {
            error!("✗ Failed to verify snapshot: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}

fn clear_snapshot(codec: &dyn SnapshotCodecInterface, force: bool) -> Result<(), anyhow::Error> {
    if !codec.snapshot_exists() {
        println!("No cached build state under '{}'", codec.key());
        return Ok(());
    }

    if !force {
        print!("Delete cached build state '{}'? (y/N): ", codec.key());
        use std::io::{self, Write};
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().to_lowercase().starts_with('y') {
            println!("Deletion cancelled");
            return Ok(());
        }
    }

    codec.clear()?;
    println!("✓ Cached build state deleted");
    Ok(())
}

fn print_metadata(metadata: &SnapshotMetadata) {
    println!("Snapshot Details:");
    println!("  ID: {}", metadata.snapshot_id);
    println!("  Created: {}", format_timestamp(metadata));
    println!("  Format Version: {}", metadata.format_version);
    println!("  Content Hash: {}", metadata.content_hash);
    println!("  Compression: {}", metadata.compression_algorithm);
    println!("  State Size: {}", format_size(metadata.uncompressed_size as u64));
    println!("  Nodes: {}", metadata.node_count);
}

fn slice_sizes(state: &BuildState) -> Vec<SliceInfo> {
    let deps = &state.component_data_dependencies;
    let jobs = &state.jobs_v2;
    [
        ("nodes", state.nodes.len()),
        ("status", state.status.plugins.len()),
        (
            "componentDataDependencies",
            deps.nodes.len() + deps.connections.len(),
        ),
        ("components", state.components.len()),
        ("jobsV2", jobs.incomplete.len() + jobs.complete.len()),
        ("staticQueryComponents", state.static_query_components.len()),
        (
            "webpackCompilationHash",
            usize::from(!state.webpack_compilation_hash.is_empty()),
        ),
        ("pageDataStats", state.page_data_stats.len()),
        ("pageData", state.page_data.len()),
        ("modules", state.modules.len()),
        (
            "queryModuleDependencies",
            state.query_module_dependencies.len(),
        ),
        (
            "pendingPageDataWrites",
            state.pending_page_data_writes.page_paths.len(),
        ),
        (
            "staticQueriesByTemplate",
            state.static_queries_by_template.len(),
        ),
    ]
    .into_iter()
    .map(|(slice, entries)| SliceInfo { slice, entries })
    .collect()
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

fn format_timestamp(metadata: &SnapshotMetadata) -> String {
    metadata
        .created_at
        .with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
