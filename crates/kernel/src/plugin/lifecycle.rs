//! Install, uninstall, and toggle.
//!
//! Each operation validates first, runs its migration second, and writes
//! state last, so a rejected or failed operation leaves every store as it
//! was. State goes to the plugin row, then the manifest (modern) or the
//! legacy flat file (when mirroring is on).
//!
//! Enabling a verification plugin disables its scope siblings before the
//! target is written, so a failure part way never leaves two of them
//! enabled. Siblings already disabled by a failed operation are re-enabled.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::descriptor::{
    LifecyclePhase, LifecycleState, PluginDescriptor, PluginStatus, ResolvedPlugin,
};
use super::error::PluginError;
use super::legacy::LegacyStateFile;
use super::manifest;
use super::migration::SqlMigrationRunner;
use super::repository::{PluginRecord, PluginRepository};

const INSTALLED_ENABLED: LifecycleState = LifecycleState::new(true, PluginStatus::Enabled);
const INSTALLED_DISABLED: LifecycleState = LifecycleState::new(true, PluginStatus::Disabled);

/// Result of a successful transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub plugin: String,
    pub installed: bool,
    pub status: PluginStatus,
    /// Plugins disabled because they share the exclusion scope.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disabled_siblings: Vec<String>,
}

/// Applies lifecycle transitions and writes state through to every store.
#[derive(Clone)]
pub struct LifecycleEngine {
    repo: Arc<dyn PluginRepository>,
    runner: Arc<dyn SqlMigrationRunner>,
    legacy_state: LegacyStateFile,
    table_prefix: String,
    legacy_mirror: bool,
}

impl LifecycleEngine {
    pub fn new(
        repo: Arc<dyn PluginRepository>,
        runner: Arc<dyn SqlMigrationRunner>,
        legacy_state: LegacyStateFile,
        table_prefix: impl Into<String>,
        legacy_mirror: bool,
    ) -> Self {
        Self {
            repo,
            runner,
            legacy_state,
            table_prefix: table_prefix.into(),
            legacy_mirror,
        }
    }

    /// `NOT_INSTALLED -> INSTALLED_ENABLED`.
    pub async fn install(
        &self,
        target: &ResolvedPlugin,
        all: &[ResolvedPlugin],
    ) -> Result<Transition, PluginError> {
        let descriptor = &target.descriptor;
        if target.state.lifecycle().phase() != LifecyclePhase::NotInstalled {
            return Err(PluginError::AlreadyInstalled {
                plugin: descriptor.id.clone(),
            });
        }

        if !descriptor.legacy {
            check_entry_points(descriptor)?;

            let implementation = descriptor.resolve(&descriptor.main_class.path);
            if !implementation.is_file() {
                return Err(PluginError::MissingImplementation {
                    plugin: descriptor.id.clone(),
                    path: implementation.display().to_string(),
                });
            }

            if let Some(script) = &descriptor.install_script {
                let path = descriptor.resolve(script);
                if !path.is_file() {
                    return Err(PluginError::MigrationFileNotFound {
                        plugin: descriptor.id.clone(),
                        path: path.display().to_string(),
                    });
                }
                self.runner
                    .run(&descriptor.id, &path, &self.table_prefix)
                    .await?;
            }
        }

        let disabled_siblings = self.disable_siblings(descriptor, all).await?;
        self.enable_target(descriptor, INSTALLED_ENABLED, all, &disabled_siblings)
            .await?;
        info!(plugin = %descriptor.id, "plugin installed");

        Ok(transition(descriptor, INSTALLED_ENABLED, disabled_siblings))
    }

    /// `INSTALLED_DISABLED -> NOT_INSTALLED`.
    pub async fn uninstall(&self, target: &ResolvedPlugin) -> Result<Transition, PluginError> {
        let descriptor = &target.descriptor;
        match target.state.lifecycle().phase() {
            LifecyclePhase::NotInstalled => {
                return Err(PluginError::NotInstalled {
                    plugin: descriptor.id.clone(),
                });
            }
            LifecyclePhase::InstalledEnabled => {
                return Err(PluginError::UninstallWhileEnabled {
                    plugin: descriptor.id.clone(),
                });
            }
            LifecyclePhase::InstalledDisabled => {}
        }

        if !descriptor.legacy
            && let Some(script) = &descriptor.uninstall_script
        {
            let path = descriptor.resolve(script);
            if path.is_file() {
                self.runner
                    .run(&descriptor.id, &path, &self.table_prefix)
                    .await?;
            } else {
                debug!(plugin = %descriptor.id, path = %path.display(), "no uninstall script on disk, skipping");
            }
        }

        self.persist(descriptor, LifecycleState::NOT_INSTALLED)
            .await?;
        info!(plugin = %descriptor.id, "plugin uninstalled");
        Ok(transition(descriptor, LifecycleState::NOT_INSTALLED, Vec::new()))
    }

    /// Flip `status` of an installed plugin.
    pub async fn toggle(
        &self,
        target: &ResolvedPlugin,
        all: &[ResolvedPlugin],
    ) -> Result<Transition, PluginError> {
        let descriptor = &target.descriptor;
        let current = target.state.lifecycle();
        if !current.installed {
            return Err(PluginError::NotInstalled {
                plugin: descriptor.id.clone(),
            });
        }

        let next = LifecycleState::new(true, current.status.toggled());
        let disabled_siblings = if next.is_enabled() {
            self.disable_siblings(descriptor, all).await?
        } else {
            Vec::new()
        };
        self.enable_target(descriptor, next, all, &disabled_siblings)
            .await?;
        info!(plugin = %descriptor.id, status = %next.status, "plugin status changed");

        Ok(transition(descriptor, next, disabled_siblings))
    }

    /// Write the target's new state, re-enabling `disabled_siblings` if that
    /// write fails.
    async fn enable_target(
        &self,
        descriptor: &PluginDescriptor,
        state: LifecycleState,
        all: &[ResolvedPlugin],
        disabled_siblings: &[String],
    ) -> Result<(), PluginError> {
        if let Err(e) = self.persist(descriptor, state).await {
            self.restore_siblings(all, disabled_siblings).await;
            return Err(e);
        }
        Ok(())
    }

    /// Disable every other enabled verification plugin in the same scope.
    /// On failure the siblings disabled so far are re-enabled.
    async fn disable_siblings(
        &self,
        descriptor: &PluginDescriptor,
        all: &[ResolvedPlugin],
    ) -> Result<Vec<String>, PluginError> {
        if !descriptor.is_verification() {
            return Ok(Vec::new());
        }

        let mut disabled = Vec::new();
        for sibling in all.iter().filter(|p| {
            p.descriptor.id != descriptor.id
                && p.descriptor.shares_exclusion_scope(descriptor)
                && p.state.lifecycle().is_enabled()
        }) {
            if let Err(e) = self.persist(&sibling.descriptor, INSTALLED_DISABLED).await {
                self.restore_siblings(all, &disabled).await;
                return Err(e);
            }
            info!(
                plugin = %sibling.descriptor.id,
                enabled = %descriptor.id,
                scope = %descriptor.exclusion_scope,
                "disabled competing verification plugin"
            );
            disabled.push(sibling.descriptor.id.clone());
        }
        Ok(disabled)
    }

    async fn restore_siblings(&self, all: &[ResolvedPlugin], ids: &[String]) {
        for sibling in all.iter().filter(|p| ids.contains(&p.descriptor.id)) {
            match self.persist(&sibling.descriptor, INSTALLED_ENABLED).await {
                Ok(()) => debug!(plugin = %sibling.descriptor.id, "re-enabled sibling after failed operation"),
                Err(e) => {
                    warn!(plugin = %sibling.descriptor.id, error = %e, "failed to re-enable sibling");
                }
            }
        }
    }

    /// Write a state to the row and the plugin's cache file.
    ///
    /// The row is written first and is the only write that can fail the
    /// operation; cache write failures are logged and healed by the next
    /// resolve pass.
    async fn persist(
        &self,
        descriptor: &PluginDescriptor,
        state: LifecycleState,
    ) -> Result<(), PluginError> {
        if !self.repo.set_state(&descriptor.id, state).await? {
            let record = PluginRecord::from_descriptor(descriptor, state);
            if !self.repo.insert(&record).await? {
                self.repo.set_state(&descriptor.id, state).await?;
            }
        }

        if let Some(path) = &descriptor.manifest_path {
            if let Err(e) = manifest::write_state(path, state) {
                warn!(plugin = %descriptor.id, error = %e, "failed to write manifest state");
            }
        } else if descriptor.legacy
            && self.legacy_mirror
            && let Err(e) = self.legacy_state.set(&descriptor.id, state)
        {
            warn!(plugin = %descriptor.id, error = %e, "failed to mirror legacy state file");
        }
        Ok(())
    }
}

fn check_entry_points(descriptor: &PluginDescriptor) -> Result<(), PluginError> {
    if !descriptor.is_app() {
        return Ok(());
    }
    let entries = &descriptor.entry_points;
    for (value, entry) in [
        (&entries.frontend, "frontend_entry"),
        (&entries.admin, "admin_entry"),
    ] {
        if value.trim().is_empty() {
            return Err(PluginError::MissingEntryPoint {
                plugin: descriptor.id.clone(),
                entry,
            });
        }
    }
    Ok(())
}

fn transition(
    descriptor: &PluginDescriptor,
    state: LifecycleState,
    disabled_siblings: Vec<String>,
) -> Transition {
    Transition {
        plugin: descriptor.id.clone(),
        installed: state.installed,
        status: state.status,
        disabled_siblings,
    }
}
