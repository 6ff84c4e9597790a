//! Merged view of discovered plugins and their stored state.
//!
//! One batch query loads every known row. Modern plugins reconcile the row
//! with the manifest and heal whichever side is stale; legacy plugins read
//! the flat state file only until their entry has been imported as a row.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use super::descriptor::{LifecycleState, PluginDescriptor, PluginState, ResolvedPlugin};
use super::legacy::LegacyStateFile;
use super::manifest::{self, Manifest};
use super::reconcile::{display_name, reconcile, reconcile_legacy, reconcile_name};
use super::repository::{PluginRecord, PluginRepository};

/// Resolves descriptors against the plugin table and state caches.
#[derive(Clone)]
pub struct PluginRegistry {
    repo: Arc<dyn PluginRepository>,
    legacy_state: LegacyStateFile,
}

impl PluginRegistry {
    pub fn new(repo: Arc<dyn PluginRepository>, legacy_state: LegacyStateFile) -> Self {
        Self { repo, legacy_state }
    }

    /// Merge each descriptor with its state, healing caches along the way.
    ///
    /// Only the batch fetch can fail; individual write-backs are logged and
    /// skipped so one broken plugin does not hide the others.
    pub async fn resolve(&self, descriptors: Vec<PluginDescriptor>) -> Result<Vec<ResolvedPlugin>> {
        let ids: Vec<String> = descriptors.iter().map(|d| d.id.clone()).collect();
        let rows = self.repo.fetch_many(&ids).await?;
        let flat = if descriptors.iter().any(|d| d.legacy) {
            self.legacy_state.load()
        } else {
            Default::default()
        };

        let mut resolved = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let row = rows.get(&descriptor.id);
            let state = if descriptor.legacy {
                self.resolve_legacy(&descriptor, row, flat.get(&descriptor.id).copied())
                    .await
            } else {
                self.resolve_modern(&descriptor, row).await
            };

            if let Some(row) = row {
                self.refresh_metadata(&descriptor, row, state).await;
            }

            resolved.push(ResolvedPlugin {
                display_name: display_name(
                    row.map(|r| r.name.as_str()),
                    &descriptor.name,
                    &descriptor.id,
                ),
                state: PluginState {
                    installed: state.installed,
                    status: state.status,
                    config_json: row.and_then(|r| r.config.clone()),
                },
                descriptor,
            });
        }

        debug!(count = resolved.len(), "plugin states resolved");
        Ok(resolved)
    }

    async fn resolve_modern(
        &self,
        descriptor: &PluginDescriptor,
        row: Option<&PluginRecord>,
    ) -> LifecycleState {
        let manifest_state = match &descriptor.manifest_path {
            Some(path) => match Manifest::read(path) {
                Ok(manifest) => manifest.lifecycle(),
                Err(e) => {
                    warn!(plugin = %descriptor.id, error = %e, "manifest unreadable during resolve");
                    LifecycleState::NOT_INSTALLED
                }
            },
            None => LifecycleState::NOT_INSTALLED,
        };

        let outcome = reconcile(row.map(PluginRecord::lifecycle), manifest_state);

        if outcome.manifest_needs_rewrite
            && let Some(path) = &descriptor.manifest_path
        {
            match manifest::write_state(path, outcome.state) {
                Ok(()) => info!(
                    plugin = %descriptor.id,
                    installed = outcome.state.installed,
                    status = %outcome.state.status,
                    "manifest state rewritten from database"
                ),
                Err(e) => {
                    warn!(plugin = %descriptor.id, error = %e, "failed to rewrite manifest state");
                }
            }
        }

        if outcome.db_needs_insert {
            let record = PluginRecord::from_descriptor(descriptor, outcome.state);
            match self.repo.insert(&record).await {
                Ok(true) => info!(plugin = %descriptor.id, "plugin row created from manifest"),
                Ok(false) => {}
                Err(e) => warn!(plugin = %descriptor.id, error = %e, "failed to create plugin row"),
            }
        }

        outcome.state
    }

    async fn resolve_legacy(
        &self,
        descriptor: &PluginDescriptor,
        row: Option<&PluginRecord>,
        flat: Option<LifecycleState>,
    ) -> LifecycleState {
        let outcome = reconcile_legacy(row.map(PluginRecord::lifecycle), flat);

        if outcome.import {
            let record = PluginRecord::from_descriptor(descriptor, outcome.state);
            match self.repo.insert(&record).await {
                Ok(true) => info!(
                    plugin = %descriptor.id,
                    installed = outcome.state.installed,
                    "legacy state imported into plugin table"
                ),
                Ok(false) => {}
                Err(e) => {
                    warn!(plugin = %descriptor.id, error = %e, "failed to import legacy state");
                }
            }
        }

        outcome.state
    }

    /// Push manifest metadata into an existing row. Legacy rows are only
    /// refreshed while installed. Operator-chosen names are kept.
    async fn refresh_metadata(
        &self,
        descriptor: &PluginDescriptor,
        row: &PluginRecord,
        state: LifecycleState,
    ) {
        if descriptor.legacy && !state.installed {
            return;
        }

        let mut candidate = PluginRecord::from_descriptor(descriptor, state);
        candidate.name = reconcile_name(&row.name, &descriptor.name, &descriptor.id)
            .unwrap_or_else(|| row.name.clone());
        if !candidate.metadata_differs(row) {
            return;
        }

        match self.repo.update_metadata(&candidate).await {
            Ok(_) => debug!(plugin = %descriptor.id, "plugin row metadata refreshed"),
            Err(e) => warn!(plugin = %descriptor.id, error = %e, "failed to refresh plugin metadata"),
        }
    }
}
