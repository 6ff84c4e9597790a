//! Quill kernel CLI.
//!
//! Operator commands for discovering, installing, toggling, and configuring
//! plugins against the configured database.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use quill_kernel::config::Config;
use quill_kernel::db;
use quill_kernel::plugin::{
    ExtensionRegistry, PgMigrationRunner, PgPluginRepository, PluginManager, cli,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Plugin management.
    #[command(subcommand)]
    Plugin(PluginCommand),
}

#[derive(Subcommand, Debug)]
enum PluginCommand {
    /// List discovered plugins and their state.
    List,
    /// Reconcile manifests, legacy state, and the plugin table.
    Sync,
    /// Install and enable a plugin.
    Install { id: String },
    /// Uninstall a disabled plugin.
    Uninstall { id: String },
    /// Enable or disable an installed plugin.
    Toggle { id: String },
    /// Show a plugin's stored configuration.
    Config { id: String },
    /// Save configuration given as JSON or `@file`.
    Configure { id: String, payload: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let args = Args::parse();
    let config = Config::from_env().context("failed to load configuration")?;
    let pool = db::create_pool(&config).await?;

    let repo = PgPluginRepository::new(pool.clone(), &config.table_prefix)?;
    if !db::plugin_table_exists(&pool, repo.table()).await? {
        bail!(
            "plugin table '{}' does not exist; provision it before managing plugins",
            repo.table()
        );
    }
    info!(table = repo.table(), plugins_dir = %config.plugins_dir.display(), "plugin store ready");

    let manager = PluginManager::new(
        config.plugin_settings(),
        Arc::new(repo),
        Arc::new(PgMigrationRunner::new(pool)),
        Arc::new(ExtensionRegistry::new()),
    );

    let Command::Plugin(command) = args.command;
    match command {
        PluginCommand::List => cli::cmd_plugin_list(&manager).await,
        PluginCommand::Sync => cli::cmd_plugin_sync(&manager).await,
        PluginCommand::Install { id } => cli::cmd_plugin_install(&manager, &id).await,
        PluginCommand::Uninstall { id } => cli::cmd_plugin_uninstall(&manager, &id).await,
        PluginCommand::Toggle { id } => cli::cmd_plugin_toggle(&manager, &id).await,
        PluginCommand::Config { id } => cli::cmd_plugin_config(&manager, &id).await,
        PluginCommand::Configure { id, payload } => {
            cli::cmd_plugin_configure(&manager, &id, &payload).await
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
