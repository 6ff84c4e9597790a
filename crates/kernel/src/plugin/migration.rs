//! Plugin SQL migration runner.
//!
//! Install and uninstall scripts are plain SQL files inside the plugin
//! directory. Table names are written as `__PREFIX__name` and the placeholder
//! is replaced with the configured table prefix before execution. Nothing
//! records which scripts ran, so scripts must be safe to run twice
//! (`CREATE TABLE IF NOT EXISTS`, `DROP TABLE IF EXISTS`).

use std::path::Path;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info};

use super::error::PluginError;

/// Placeholder replaced by the table prefix in migration scripts.
pub const PREFIX_PLACEHOLDER: &str = "__PREFIX__";

/// Replace every prefix placeholder in a script.
pub fn substitute_prefix(sql: &str, table_prefix: &str) -> String {
    sql.replace(PREFIX_PLACEHOLDER, table_prefix)
}

/// Read a migration script, mapping read failures to a resource error.
pub fn read_script(plugin: &str, script: &Path) -> Result<String, PluginError> {
    std::fs::read_to_string(script).map_err(|e| {
        debug!(plugin, path = %script.display(), error = %e, "migration script unreadable");
        PluginError::MigrationFileNotFound {
            plugin: plugin.to_string(),
            path: script.display().to_string(),
        }
    })
}

/// Executes a plugin's SQL script.
#[async_trait]
pub trait SqlMigrationRunner: Send + Sync {
    /// Run `script` for `plugin`. An unreadable file is
    /// [`PluginError::MigrationFileNotFound`]; a failing statement is
    /// [`PluginError::MigrationFailed`].
    async fn run(&self, plugin: &str, script: &Path, table_prefix: &str)
    -> Result<(), PluginError>;
}

/// Runs scripts against PostgreSQL, one transaction per script.
#[derive(Clone)]
pub struct PgMigrationRunner {
    pool: PgPool,
}

impl PgMigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SqlMigrationRunner for PgMigrationRunner {
    async fn run(
        &self,
        plugin: &str,
        script: &Path,
        table_prefix: &str,
    ) -> Result<(), PluginError> {
        let sql = substitute_prefix(&read_script(plugin, script)?, table_prefix);
        let migration = script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| script.display().to_string());

        let fail = |e: sqlx::Error| PluginError::migration_failed(plugin, &migration, e.to_string());

        debug!(plugin, migration = %migration, "executing migration");

        // raw_sql because scripts hold several statements; prepared
        // statements only accept one.
        let mut tx = self.pool.begin().await.map_err(fail)?;
        // A concrete connection type keeps the future `Send` under async-trait.
        let conn: &mut sqlx::PgConnection = &mut tx;
        sqlx::Executor::execute(conn, sqlx::raw_sql(&sql)).await.map_err(fail)?;
        tx.commit().await.map_err(fail)?;

        info!(plugin, migration = %migration, "migration complete");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use quill_test_utils::TestDir;

    #[test]
    fn placeholder_is_replaced_everywhere() {
        let sql = "CREATE TABLE IF NOT EXISTS __PREFIX__orders (id INT);\n\
                   CREATE INDEX ON __PREFIX__orders (id);";
        let out = substitute_prefix(sql, "qa_");
        assert!(!out.contains(PREFIX_PLACEHOLDER));
        assert_eq!(out.matches("qa_orders").count(), 2);
    }

    #[test]
    fn empty_prefix_strips_placeholder() {
        assert_eq!(
            substitute_prefix("DROP TABLE __PREFIX__x;", ""),
            "DROP TABLE x;"
        );
    }

    #[test]
    fn missing_script_is_a_resource_error() {
        let dir = TestDir::new("migration_missing");
        let err = read_script("payment/stripe", &dir.path().join("install.sql")).unwrap_err();
        assert!(matches!(err, PluginError::MigrationFileNotFound { .. }));
        assert!(err.to_string().contains("payment/stripe"));
    }

    #[test]
    fn pg_runner_is_usable_as_a_shared_runner() {
        fn shared(runner: PgMigrationRunner) -> std::sync::Arc<dyn SqlMigrationRunner> {
            std::sync::Arc::new(runner)
        }
        let _ = shared;
    }

    #[test]
    fn readable_script_is_returned() {
        let dir = TestDir::new("migration_read");
        let path = dir.path().join("install.sql");
        std::fs::write(&path, "SELECT 1;").unwrap();
        assert_eq!(read_script("a/b", &path).unwrap(), "SELECT 1;");
    }
}
