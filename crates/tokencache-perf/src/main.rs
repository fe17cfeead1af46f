use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokencache_core::CacheCounters;
use tokencache_perf::config::loader::{DEFAULT_CONFIG_FILE, load_config};
use tokencache_perf::simulation::SimulatedIdentityProvider;
use tokencache_perf::{TestRunner, create_blob_store, create_provider, create_registry, instrument_store};

/// Drive the token cache persistence layer with simulated sign-ins.
#[derive(Debug, Parser)]
#[command(name = "tokencache-perf", version, about)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "TOKENCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// First test user ordinal
    #[arg(long)]
    users_start: Option<u32>,

    /// Last test user ordinal (inclusive)
    #[arg(long)]
    users_end: Option<u32>,

    /// Passes over the user range
    #[arg(short, long)]
    iterations: Option<u32>,

    /// Concurrent acquisitions
    #[arg(long)]
    concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist - it's optional
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    let args = Args::parse();

    let config_path = args.config.as_ref().map(|p| p.to_string_lossy().into_owned());
    let mut cfg = match load_config(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };
    apply_overrides(&mut cfg.harness, &args);
    if let Err(e) = cfg.validate() {
        eprintln!("Configuration error: {e}");
        std::process::exit(2);
    }

    tokencache_perf::observability::init_tracing(&cfg.logging);
    tracing::info!(
        path = config_path.as_deref().unwrap_or(DEFAULT_CONFIG_FILE),
        backend = ?cfg.store.backend,
        "Configuration loaded"
    );

    if cfg.metrics.enabled {
        tokencache_perf::metrics::init_metrics();
    }

    let store = create_blob_store(&cfg)
        .await
        .context("failed to create token cache store")?;
    let store = instrument_store(&cfg, store);

    let registry = Arc::new(
        create_registry(&cfg)
            .await
            .context("failed to open key mapping registry")?,
    );
    let provider = create_provider(&cfg, store, Arc::clone(&registry));
    let identity_provider = Arc::new(SimulatedIdentityProvider::new(
        &cfg.harness.tenant_domain,
        cfg.harness.token_lifetime,
    ));

    let runner = TestRunner::new(cfg.harness.clone(), provider, registry, identity_provider);
    runner.seed_from_registry();

    tracing::info!(
        users = cfg.harness.user_count(),
        iterations = cfg.harness.iterations,
        concurrency = cfg.harness.concurrency,
        "Starting token acquisition run"
    );
    let summary = runner.run().await;

    let counters = CacheCounters::global().snapshot();
    tracing::info!(
        requests = summary.requests,
        from_cache = summary.served_from_cache,
        sign_ins = summary.sign_ins,
        failures = summary.failures,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "Run complete"
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "summary": summary,
            "counters": counters,
            "hit_rate_percent": counters.hit_rate(),
        }))?
    );
    if let Some(rendered) = tokencache_perf::metrics::render_metrics() {
        println!("{rendered}");
    }

    if summary.failures > 0 {
        anyhow::bail!("{} token acquisitions failed", summary.failures);
    }
    Ok(())
}

fn apply_overrides(harness: &mut tokencache_perf::config::HarnessConfig, args: &Args) {
    if let Some(start) = args.users_start {
        harness.users_start_index = start;
    }
    if let Some(end) = args.users_end {
        harness.users_end_index = end;
    }
    if let Some(iterations) = args.iterations {
        harness.iterations = iterations;
    }
    if let Some(concurrency) = args.concurrency {
        harness.concurrency = concurrency;
    }
}
