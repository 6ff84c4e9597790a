//! CLI command implementations for plugin management.
//!
//! Each command runs one manager operation and prints its outcome. Listing is
//! rendered as a table; everything else is printed as JSON.

use std::path::Path;

use anyhow::{Context, Result, bail};

use super::manager::PluginManager;
use super::outcome::ActionOutcome;

/// List all discovered plugins and their state.
pub async fn cmd_plugin_list(manager: &PluginManager) -> Result<()> {
    let plugins = manager.list().await?;

    if plugins.is_empty() {
        println!(
            "No plugins found in {}.",
            manager.settings().plugins_dir.display()
        );
        return Ok(());
    }

    println!(
        "{:<36} {:<24} {:<10} {:<14} {:<13} {:<6}",
        "PLUGIN", "NAME", "VERSION", "STATUS", "TYPE", "LEGACY"
    );
    println!("{}", "-".repeat(108));

    for plugin in &plugins {
        let d = &plugin.descriptor;
        let status = if plugin.state.installed {
            plugin.state.status.as_str()
        } else {
            "not installed"
        };
        let kind = match d.kind.as_str() {
            "" => "-",
            other => other,
        };
        println!(
            "{:<36} {:<24} {:<10} {:<14} {:<13} {}",
            d.id,
            plugin.display_name,
            d.version,
            status,
            kind,
            if d.legacy { "yes" } else { "no" }
        );
    }

    Ok(())
}

/// Run a resolve pass.
pub async fn cmd_plugin_sync(manager: &PluginManager) -> Result<()> {
    report(manager.sync().await)
}

/// Install a plugin: validate, run its install script, enable it.
pub async fn cmd_plugin_install(manager: &PluginManager, id: &str) -> Result<()> {
    report(manager.install(id).await)
}

/// Uninstall a disabled plugin.
pub async fn cmd_plugin_uninstall(manager: &PluginManager, id: &str) -> Result<()> {
    report(manager.uninstall(id).await)
}

/// Enable a disabled plugin or disable an enabled one.
pub async fn cmd_plugin_toggle(manager: &PluginManager, id: &str) -> Result<()> {
    report(manager.toggle(id).await)
}

/// Print a plugin's stored configuration.
pub async fn cmd_plugin_config(manager: &PluginManager, id: &str) -> Result<()> {
    report(manager.get_config(id).await)
}

/// Save configuration given inline as JSON or as `@path/to/file.json`.
pub async fn cmd_plugin_configure(manager: &PluginManager, id: &str, payload: &str) -> Result<()> {
    let bytes = match payload.strip_prefix('@') {
        Some(path) => std::fs::read(Path::new(path))
            .with_context(|| format!("failed to read configuration file {path}"))?,
        None => payload.as_bytes().to_vec(),
    };
    report(manager.set_config_raw(id, &bytes).await)
}

fn report(outcome: ActionOutcome) -> Result<()> {
    let rendered = serde_json::to_string_pretty(&outcome)?;
    println!("{rendered}");
    if !outcome.success {
        bail!("{}", outcome.message);
    }
    Ok(())
}
