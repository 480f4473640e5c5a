//! CLI entry point for the society store runtime.
//!
//! This binary provides the `society` command for inspecting and steering
//! feature-flag rollout against the app's persisted state: toggling flags
//! and groups, migrating stores, refreshing from the remote source, and the
//! emergency rollback.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use society_state::flags::FeatureFlag;
use society_state::{
    AppStores, FlagUpdate, HttpFlagSource, PersistOutcome, RefreshOutcome, StateConfig,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Society app store runtime.
#[derive(Parser)]
#[command(
    name = "society",
    version,
    about = "Inspect and steer the society app's stores and feature flags",
    long_about = "Operator tool for the society app's client state: feature-flag rollout, \
                  store migration flags, remote refresh, reset and emergency rollback."
)]
struct Cli {
    /// Configuration file.
    #[arg(long, short, global = true, default_value = "config/society.toml")]
    config: PathBuf,

    /// Default log level when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show migration status, flags, groups and store state.
    Status {
        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Turn a flag on.
    Enable { key: String },

    /// Turn a flag off.
    Disable { key: String },

    /// Turn every flag of a group on.
    EnableGroup { name: String },

    /// Turn every flag of a group off.
    DisableGroup { name: String },

    /// Enable store migration flags (e.g. USE_AUTH_STORE).
    Migrate {
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Disable store migration flags.
    Unmigrate {
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Pull flag values from the configured remote source.
    Refresh,

    /// Check whether the configured storage is usable.
    Probe,

    /// Reset every store to its initial state and save it.
    Reset {
        /// Delete the persisted slices instead of saving the reset state.
        #[arg(long)]
        purge: bool,
    },

    /// Disable every flag and reset every store.
    Rollback,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Environment and tracing.
    dotenvy::dotenv().ok();
    init_tracing(&cli.log_level);

    // 2. Config and stores.
    let config = StateConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let app = AppStores::from_config(&config)
        .await
        .context("failed to build stores")?;
    let hydrated = app.hydrate().await;
    info!(?hydrated, "stores ready");

    // 3. Command.
    match cli.command {
        Commands::Status { json } => cmd_status(&app, json).await,
        Commands::Enable { key } => {
            warn_if_unknown(&key);
            report("enable", &app.flags.enable_feature(&key).await);
            Ok(())
        }
        Commands::Disable { key } => {
            warn_if_unknown(&key);
            report("disable", &app.flags.disable_feature(&key).await);
            Ok(())
        }
        Commands::EnableGroup { name } => cmd_group(&app, &name, true).await,
        Commands::DisableGroup { name } => cmd_group(&app, &name, false).await,
        Commands::Migrate { keys } => {
            report("migrate", &app.flags.enable_migration_flags(&keys).await);
            print_migration(&app);
            Ok(())
        }
        Commands::Unmigrate { keys } => {
            report("unmigrate", &app.flags.disable_migration_flags(&keys).await);
            print_migration(&app);
            Ok(())
        }
        Commands::Refresh => cmd_refresh(&app, &config).await,
        Commands::Probe => cmd_probe(&app).await,
        Commands::Reset { purge } => cmd_reset(&app, purge).await,
        Commands::Rollback => cmd_rollback(&app).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

async fn cmd_status(app: &AppStores, json: bool) -> Result<()> {
    let available = app.persistence().storage().probe().await;

    if json {
        let stores: serde_json::Map<String, serde_json::Value> = app
            .registry()
            .store_ids()
            .into_iter()
            .filter_map(|id| {
                let store = app.registry().get(id).ok()?;
                Some((id.to_string(), serde_json::Value::Bool(store.is_pristine())))
            })
            .collect();
        let out = serde_json::json!({
            "storage": {
                "backend": app.persistence().storage().backend_name(),
                "available": available,
                "namespace": app.persistence().namespace(),
            },
            "migration": app.flags.get_migration_status(),
            "flags": app.flags.flags(),
            "groups": app.flags.groups(),
            "pristine": stores,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&out).context("failed to encode status")?
        );
        return Ok(());
    }

    println!();
    println!("  Society Store Status");
    println!("  ====================");
    println!();
    println!(
        "  Storage:          {} ({})",
        app.persistence().storage().backend_name(),
        if available { "OK" } else { "UNAVAILABLE" }
    );
    println!("  Namespace:        {}", app.persistence().namespace());
    println!();

    print_migration(app);

    println!("  Flags:");
    for (key, enabled) in app.flags.flags() {
        println!("    {key:<26} {}", on_off(enabled));
    }
    println!();

    println!("  Groups:");
    for (name, members) in app.flags.groups() {
        let members: Vec<String> = members.into_iter().collect();
        println!("    {name:<14} {}", members.join(", "));
    }
    println!();

    println!("  Stores:");
    for id in app.registry().store_ids() {
        let pristine = app.registry().get(id).map(|s| s.is_pristine()).unwrap_or(false);
        println!(
            "    {id:<14} {}",
            if pristine { "initial" } else { "modified" }
        );
    }
    println!();

    Ok(())
}

async fn cmd_group(app: &AppStores, name: &str, enabled: bool) -> Result<()> {
    if !app.flags.groups().contains_key(name) {
        let known: Vec<String> = app.flags.groups().into_keys().collect();
        anyhow::bail!("unknown group `{name}` (known: {})", known.join(", "));
    }
    let update = if enabled {
        app.flags.enable_feature_group(name).await
    } else {
        app.flags.disable_feature_group(name).await
    };
    report(if enabled { "enable-group" } else { "disable-group" }, &update);
    for (key, value) in app.flags.get_feature_group(name) {
        println!("    {key:<26} {}", on_off(value));
    }
    Ok(())
}

async fn cmd_refresh(app: &AppStores, config: &StateConfig) -> Result<()> {
    let url = config
        .remote_url()?
        .context("no remote flag source configured (set flags.remote_url or SOCIETY_FLAGS_URL)")?;
    let source = HttpFlagSource::new(url, config.flag_timeout())
        .context("failed to build HTTP client")?;

    match app.flags.refresh_flags(&source).await {
        RefreshOutcome::Updated(update) => report("refresh", &update),
        RefreshOutcome::Failed { reason } => {
            println!("  refresh failed, flags unchanged: {reason}");
        }
    }
    Ok(())
}

async fn cmd_probe(app: &AppStores) -> Result<()> {
    let storage = app.persistence().storage();
    if storage.probe().await {
        println!("  {}: available", storage.backend_name());
        let persisted = app.persistence().persisted_store_ids().await;
        println!("  persisted slices: {}", persisted.join(", "));
    } else {
        println!(
            "  {}: unavailable, state will not survive restarts",
            storage.backend_name()
        );
    }
    Ok(())
}

async fn cmd_reset(app: &AppStores, purge: bool) -> Result<()> {
    let report = app.reset_all_stores().await;
    println!("  reset in memory: {}", report.store_ids.join(", "));

    if purge {
        let persisted = app.persistence().persisted_store_ids().await;
        if persisted.is_empty() {
            println!("  nothing persisted to purge");
        }
        for id in persisted {
            if app.persistence().clear(&id).await {
                println!("  purged: {id}");
            } else {
                warn!(store_id = %id, "failed to purge persisted slice");
                println!("  failed to purge: {id}");
            }
        }
        return Ok(());
    }

    let flushed = app.flush().await;
    for (id, written) in [
        ("auth", flushed.auth),
        ("feature_flags", flushed.feature_flags),
        ("theme", flushed.theme),
    ] {
        if written {
            println!("  saved initial state: {id}");
        } else {
            println!("  not saved, previous state will return on next run: {id}");
        }
    }
    Ok(())
}

async fn cmd_rollback(app: &AppStores) -> Result<()> {
    let report = app.emergency_rollback().await;
    println!(
        "  rollback: {} flag(s) disabled, {} store(s) reset",
        report.flags_disabled.len(),
        report.reset.store_ids.len()
    );
    if report.persist == PersistOutcome::Failed {
        println!("  warning: rolled-back flags were not persisted");
    }
    print_migration(app);
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn warn_if_unknown(key: &str) {
    if FeatureFlag::from_key(key).is_none() {
        println!("  note: `{key}` is not a known flag, storing it anyway");
    }
}

fn report(action: &str, update: &FlagUpdate) {
    if update.changed.is_empty() {
        println!("  {action}: nothing changed");
    } else {
        println!("  {action}: {}", update.changed.join(", "));
    }
    match update.persist {
        PersistOutcome::Written => {}
        PersistOutcome::Failed => println!("  warning: change applied but not persisted"),
        PersistOutcome::Skipped => {}
    }
}

fn print_migration(app: &AppStores) {
    let status = app.flags.get_migration_status();
    println!(
        "  Migration ({}/{} stores):",
        status.enabled_count(),
        FeatureFlag::MIGRATION.len()
    );
    for (flag, enabled) in status.iter() {
        println!("    {:<26} {}", flag.key(), on_off(enabled));
    }
    println!();
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
