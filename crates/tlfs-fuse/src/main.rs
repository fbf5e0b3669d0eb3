//! `tlfsmount`: mounts an in-memory folder store described by a manifest.

use anyhow::{Context, Result};
use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tlfs_core::RequestContext;
use tlfs_core::memory::MemoryOps;
use tlfs_fuse::{CapacityPolicy, FAVORITE_WORKERS, MountConfig, spawn_mount};
use tracing_subscriber::EnvFilter;
#[cfg(feature = "tokio-console")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Mount shared folders as a filesystem
#[derive(Parser)]
#[command(name = "tlfsmount")]
#[command(author, version)]
#[command(after_help = "EXAMPLES:
    # Mount the folders listed in a manifest
    tlfsmount --manifest folders.toml /mnt/tlfs

    # Start with just your own folder
    tlfsmount --user alice /mnt/tlfs
")]
struct Cli {
    /// Directory to mount on
    mountpoint: PathBuf,

    /// TOML manifest describing the user, folders and favorites
    #[arg(short, long, env = "TLFS_MANIFEST")]
    manifest: Option<PathBuf>,

    /// User to act as when no manifest is given (ignored with --manifest)
    #[arg(long, env = "USER")]
    user: Option<String>,

    /// Trace every kernel request
    #[arg(long)]
    debug: bool,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Concurrent folder fetches when listing the root
    #[arg(long, default_value_t = FAVORITE_WORKERS)]
    workers: usize,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    io_timeout: u64,

    /// Kernel attribute and entry cache TTL in milliseconds
    #[arg(long, default_value_t = 1000)]
    ttl_ms: u64,

    /// Warn when an identity cache grows past this many entries
    #[arg(long)]
    cache_soft_limit: Option<usize>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_tracing(cli.verbose, cli.debug);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let ops = load_backend(cli)?;
    let ttl = Duration::from_millis(cli.ttl_ms);
    let config = MountConfig::default()
        .attr_ttl(ttl)
        .entry_ttl(ttl)
        .io_timeout(Duration::from_secs(cli.io_timeout))
        .favorite_workers(cli.workers)
        .debug(cli.debug)
        .allow_other(cli.allow_other)
        .capacity_policy(
            cli.cache_soft_limit
                .map_or(CapacityPolicy::Unbounded, CapacityPolicy::SoftLimit),
        );

    let (ctx, cancel) = RequestContext::new();
    let handle = spawn_mount(&ctx, ops, config, &cli.mountpoint)
        .with_context(|| format!("Failed to mount at {}", cli.mountpoint.display()))?;
    eprintln!("Mounted at {}", cli.mountpoint.display());

    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("Failed to set signal handler")?;

    let _ = stop_rx.recv();
    eprintln!("\nUnmounting...");
    cancel.cancel();
    handle.unmount();
    Ok(())
}

fn load_backend(cli: &Cli) -> Result<Arc<MemoryOps>> {
    if let Some(path) = &cli.manifest {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let ops = MemoryOps::from_manifest(&text)
            .with_context(|| format!("Invalid manifest {}", path.display()))?;
        return Ok(Arc::new(ops));
    }

    let user = cli
        .user
        .as_deref()
        .context("No manifest given and no user to act as (set --user or USER)")?;
    let ops = MemoryOps::new(user.to_ascii_lowercase());
    let own = ops
        .create_folder(user)
        .with_context(|| format!("{user:?} is not a valid folder member"))?;
    ops.add_favorite(own);
    Ok(Arc::new(ops))
}

/// Set up tracing/logging based on verbosity level
fn setup_tracing(verbose: u8, debug: bool) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = if debug {
        format!("{level},tlfs_fuse::protocol=debug")
    } else {
        level.to_string()
    };

    #[cfg(feature = "tokio-console")]
    {
        use tracing_subscriber::Layer;

        let fmt_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());
        tracing_subscriber::registry()
            .with(console_subscriber::spawn())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(io::stderr)
                    .with_filter(fmt_filter),
            )
            .init();
    }

    #[cfg(not(feature = "tokio-console"))]
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}
