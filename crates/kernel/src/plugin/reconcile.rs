//! Pure reconciliation rules between the plugin table and the manifest/flat-file caches.
//!
//! The database row is authoritative for lifecycle state because it is the
//! only store updated alongside SQL migrations. Manifests (and the legacy flat
//! file) are caches that get rewritten to match, never the reverse. The one
//! exception is a plugin with no row at all: its cached state seeds a new row.

use super::descriptor::{LifecycleState, last_segment};

/// Result of reconciling a modern plugin's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    /// The state callers should see.
    pub state: LifecycleState,
    /// The manifest disagrees with the row and must be rewritten.
    pub manifest_needs_rewrite: bool,
    /// No row exists but the manifest says installed; a row must be created.
    pub db_needs_insert: bool,
}

/// Reconcile the row state (if any) with the manifest's cached state.
pub fn reconcile(db: Option<LifecycleState>, manifest: LifecycleState) -> Reconciliation {
    let manifest = manifest.normalized();
    match db {
        Some(db) => {
            let db = db.normalized();
            Reconciliation {
                state: db,
                manifest_needs_rewrite: db != manifest,
                db_needs_insert: false,
            }
        }
        None => Reconciliation {
            state: manifest,
            manifest_needs_rewrite: false,
            db_needs_insert: manifest.installed,
        },
    }
}

/// Result of reconciling a legacy plugin's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyReconciliation {
    pub state: LifecycleState,
    /// The flat-file entry should be imported as a new row.
    pub import: bool,
}

/// Reconcile a legacy plugin: an existing row wins; otherwise the flat-file
/// entry is used and imported; otherwise the plugin is not installed.
pub fn reconcile_legacy(
    db: Option<LifecycleState>,
    flat: Option<LifecycleState>,
) -> LegacyReconciliation {
    match (db, flat) {
        (Some(db), _) => LegacyReconciliation {
            state: db.normalized(),
            import: false,
        },
        (None, Some(flat)) => LegacyReconciliation {
            state: flat.normalized(),
            import: true,
        },
        (None, None) => LegacyReconciliation {
            state: LifecycleState::NOT_INSTALLED,
            import: false,
        },
    }
}

/// Whether a stored name looks like a never-customized default: empty, the
/// bare id, or the id's last segment.
pub fn name_is_default(stored: &str, id: &str) -> bool {
    let stored = stored.trim();
    stored.is_empty() || stored == id || stored == last_segment(id)
}

/// The name to write to the row, if the stored one should be replaced by the
/// descriptor's. Operator-relabelled names are kept.
pub fn reconcile_name(stored: &str, descriptor_name: &str, id: &str) -> Option<String> {
    if name_is_default(stored, id) && stored != descriptor_name && !descriptor_name.is_empty() {
        Some(descriptor_name.to_string())
    } else {
        None
    }
}

/// The name to show: the stored one unless it is a default.
pub fn display_name(stored: Option<&str>, descriptor_name: &str, id: &str) -> String {
    match stored {
        Some(stored) if !name_is_default(stored, id) => stored.trim().to_string(),
        _ => descriptor_name.to_string(),
    }
}
