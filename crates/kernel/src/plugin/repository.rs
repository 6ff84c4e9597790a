//! Plugin table access.
//!
//! One row per plugin id in `{prefix}plugins`, for both modern and legacy
//! plugins. The hosting application provisions the table:
//!
//! ```sql
//! CREATE TABLE {prefix}plugins (
//!     id           TEXT PRIMARY KEY,
//!     name         TEXT NOT NULL DEFAULT '',
//!     version      TEXT NOT NULL DEFAULT '',
//!     plugin_type  TEXT NOT NULL DEFAULT '',
//!     category     TEXT NOT NULL DEFAULT '',
//!     description  TEXT NOT NULL DEFAULT '',
//!     author       TEXT NOT NULL DEFAULT '',
//!     website      TEXT NOT NULL DEFAULT '',
//!     namespace    TEXT NOT NULL DEFAULT '',
//!     main_class   TEXT NOT NULL DEFAULT '',
//!     status       SMALLINT NOT NULL DEFAULT 0,
//!     installed    BOOLEAN NOT NULL DEFAULT FALSE,
//!     legacy       BOOLEAN NOT NULL DEFAULT FALSE,
//!     config       TEXT,
//!     installed_at BIGINT,
//!     updated_at   BIGINT NOT NULL
//! );
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use sqlx::{FromRow, PgPool};

use super::descriptor::{LifecycleState, PluginDescriptor, PluginStatus};

/// Regex for a valid table prefix (may be empty).
#[allow(clippy::expect_used)]
static VALID_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_]*$").expect("valid regex literal"));

const COLUMNS: &str = "id, name, version, plugin_type, category, description, author, website, \
                       namespace, main_class, status, installed, legacy, config, installed_at, \
                       updated_at";

/// Check a table prefix before it is interpolated into SQL.
pub fn validate_table_prefix(prefix: &str) -> Result<()> {
    if !VALID_PREFIX.is_match(prefix) {
        bail!("table prefix '{prefix}' may only contain letters, digits, and underscores");
    }
    Ok(())
}

/// A row from the plugin table.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct PluginRecord {
    pub id: String,
    pub name: String,
    pub version: String,
    pub plugin_type: String,
    pub category: String,
    pub description: String,
    pub author: String,
    pub website: String,
    pub namespace: String,
    pub main_class: String,
    pub status: i16,
    pub installed: bool,
    pub legacy: bool,
    /// Config blob as JSON text.
    pub config: Option<String>,
    pub installed_at: Option<i64>,
    pub updated_at: i64,
}

impl PluginRecord {
    /// Build a row from discovery metadata.
    pub fn from_descriptor(descriptor: &PluginDescriptor, state: LifecycleState) -> Self {
        let now = chrono::Utc::now().timestamp();
        let state = state.normalized();
        Self {
            id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            version: descriptor.version.clone(),
            plugin_type: descriptor.kind.as_str().to_string(),
            category: descriptor.category.clone(),
            description: descriptor.description.clone(),
            author: descriptor.author.clone(),
            website: descriptor.website.clone(),
            namespace: descriptor.main_class.namespace.clone(),
            main_class: descriptor.main_class.qualified(),
            status: state.status.as_i16(),
            installed: state.installed,
            legacy: descriptor.legacy,
            config: None,
            installed_at: state.installed.then_some(now),
            updated_at: now,
        }
    }

    pub fn lifecycle(&self) -> LifecycleState {
        LifecycleState::new(self.installed, PluginStatus::from_i16(self.status)).normalized()
    }

    /// Whether any static metadata column differs from `other`.
    pub fn metadata_differs(&self, other: &PluginRecord) -> bool {
        self.name != other.name
            || self.version != other.version
            || self.plugin_type != other.plugin_type
            || self.category != other.category
            || self.description != other.description
            || self.author != other.author
            || self.website != other.website
            || self.namespace != other.namespace
            || self.main_class != other.main_class
            || self.legacy != other.legacy
    }
}

/// Storage for plugin rows.
#[async_trait]
pub trait PluginRepository: Send + Sync {
    /// Rows for the given ids in one round trip.
    async fn fetch_many(&self, ids: &[String]) -> Result<HashMap<String, PluginRecord>>;

    async fn fetch(&self, id: &str) -> Result<Option<PluginRecord>>;

    /// Insert a row; returns `false` if one already exists.
    async fn insert(&self, record: &PluginRecord) -> Result<bool>;

    /// Overwrite the static metadata columns of an existing row.
    async fn update_metadata(&self, record: &PluginRecord) -> Result<bool>;

    /// Set `installed`/`status`; returns `false` if no row exists.
    async fn set_state(&self, id: &str, state: LifecycleState) -> Result<bool>;

    /// Replace the config blob; returns `false` if no row exists.
    async fn set_config(&self, id: &str, config: &str) -> Result<bool>;
}

/// PostgreSQL-backed repository.
#[derive(Clone)]
pub struct PgPluginRepository {
    pool: PgPool,
    table: String,
}

impl PgPluginRepository {
    pub fn new(pool: PgPool, table_prefix: &str) -> Result<Self> {
        validate_table_prefix(table_prefix)?;
        Ok(Self {
            pool,
            table: format!("{table_prefix}plugins"),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl PluginRepository for PgPluginRepository {
    async fn fetch_many(&self, ids: &[String]) -> Result<HashMap<String, PluginRecord>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, PluginRecord>(&format!(
            "SELECT {COLUMNS} FROM {} WHERE id = ANY($1)",
            self.table
        ))
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch plugin rows")?;

        Ok(rows.into_iter().map(|r| (r.id.clone(), r)).collect())
    }

    async fn fetch(&self, id: &str) -> Result<Option<PluginRecord>> {
        let row = sqlx::query_as::<_, PluginRecord>(&format!(
            "SELECT {COLUMNS} FROM {} WHERE id = $1",
            self.table
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch plugin row")?;

        Ok(row)
    }

    async fn insert(&self, record: &PluginRecord) -> Result<bool> {
        let result = sqlx::query(&format!(
            "INSERT INTO {} ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             ON CONFLICT (id) DO NOTHING",
            self.table
        ))
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.version)
        .bind(&record.plugin_type)
        .bind(&record.category)
        .bind(&record.description)
        .bind(&record.author)
        .bind(&record.website)
        .bind(&record.namespace)
        .bind(&record.main_class)
        .bind(record.status)
        .bind(record.installed)
        .bind(record.legacy)
        .bind(&record.config)
        .bind(record.installed_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .context("failed to insert plugin row")?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_metadata(&self, record: &PluginRecord) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(&format!(
            "UPDATE {} SET name = $1, version = $2, plugin_type = $3, category = $4, \
             description = $5, author = $6, website = $7, namespace = $8, main_class = $9, \
             legacy = $10, updated_at = $11 WHERE id = $12",
            self.table
        ))
        .bind(&record.name)
        .bind(&record.version)
        .bind(&record.plugin_type)
        .bind(&record.category)
        .bind(&record.description)
        .bind(&record.author)
        .bind(&record.website)
        .bind(&record.namespace)
        .bind(&record.main_class)
        .bind(record.legacy)
        .bind(now)
        .bind(&record.id)
        .execute(&self.pool)
        .await
        .context("failed to update plugin metadata")?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_state(&self, id: &str, state: LifecycleState) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let state = state.normalized();
        let result = sqlx::query(&format!(
            "UPDATE {} SET installed = $1, status = $2, \
             installed_at = CASE WHEN $1 THEN COALESCE(installed_at, $3) ELSE NULL END, \
             updated_at = $3 WHERE id = $4",
            self.table
        ))
        .bind(state.installed)
        .bind(state.status.as_i16())
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("failed to update plugin state")?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_config(&self, id: &str, config: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(&format!(
            "UPDATE {} SET config = $1, updated_at = $2 WHERE id = $3",
            self.table
        ))
        .bind(config)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("failed to update plugin config")?;

        Ok(result.rows_affected() > 0)
    }
}

/// In-process repository for embedding and tests.
#[derive(Default)]
pub struct MemoryPluginRepository {
    rows: Mutex<BTreeMap<String, PluginRecord>>,
}

impl MemoryPluginRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all rows.
    pub fn records(&self) -> Vec<PluginRecord> {
        self.rows.lock().values().cloned().collect()
    }

    /// Replace or add a row unconditionally.
    pub fn put(&self, record: PluginRecord) {
        self.rows.lock().insert(record.id.clone(), record);
    }
}

#[async_trait]
impl PluginRepository for MemoryPluginRepository {
    async fn fetch_many(&self, ids: &[String]) -> Result<HashMap<String, PluginRecord>> {
        let rows = self.rows.lock();
        Ok(ids
            .iter()
            .filter_map(|id| rows.get(id).map(|r| (id.clone(), r.clone())))
            .collect())
    }

    async fn fetch(&self, id: &str) -> Result<Option<PluginRecord>> {
        Ok(self.rows.lock().get(id).cloned())
    }

    async fn insert(&self, record: &PluginRecord) -> Result<bool> {
        let mut rows = self.rows.lock();
        if rows.contains_key(&record.id) {
            return Ok(false);
        }
        rows.insert(record.id.clone(), record.clone());
        Ok(true)
    }

    async fn update_metadata(&self, record: &PluginRecord) -> Result<bool> {
        let mut rows = self.rows.lock();
        let Some(row) = rows.get_mut(&record.id) else {
            return Ok(false);
        };
        row.name = record.name.clone();
        row.version = record.version.clone();
        row.plugin_type = record.plugin_type.clone();
        row.category = record.category.clone();
        row.description = record.description.clone();
        row.author = record.author.clone();
        row.website = record.website.clone();
        row.namespace = record.namespace.clone();
        row.main_class = record.main_class.clone();
        row.legacy = record.legacy;
        row.updated_at = chrono::Utc::now().timestamp();
        Ok(true)
    }

    async fn set_state(&self, id: &str, state: LifecycleState) -> Result<bool> {
        let mut rows = self.rows.lock();
        let Some(row) = rows.get_mut(id) else {
            return Ok(false);
        };
        let now = chrono::Utc::now().timestamp();
        let state = state.normalized();
        row.installed = state.installed;
        row.status = state.status.as_i16();
        row.installed_at = if state.installed {
            row.installed_at.or(Some(now))
        } else {
            None
        };
        row.updated_at = now;
        Ok(true)
    }

    async fn set_config(&self, id: &str, config: &str) -> Result<bool> {
        let mut rows = self.rows.lock();
        let Some(row) = rows.get_mut(id) else {
            return Ok(false);
        };
        row.config = Some(config.to_string());
        row.updated_at = chrono::Utc::now().timestamp();
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::plugin::descriptor::{EntryPoints, MainClassRef, PluginKind};
    use std::path::PathBuf;

    fn descriptor(id: &str) -> PluginDescriptor {
        PluginDescriptor {
            id: id.to_string(),
            category: id.split('/').next().unwrap().to_string(),
            kind: PluginKind::Verification,
            name: "reCAPTCHA".to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            author: String::new(),
            website: String::new(),
            main_class: MainClassRef {
                path: PathBuf::from("Main.php"),
                namespace: "plugins\\recaptcha".to_string(),
                class: "Main".to_string(),
            },
            entry_points: EntryPoints::default(),
            install_script: None,
            uninstall_script: None,
            legacy: false,
            exclusion_scope: "verification/basic".to_string(),
            config_fields: Vec::new(),
            dir: PathBuf::from("/tmp"),
            manifest_path: None,
        }
    }

    #[test]
    fn prefix_validation() {
        assert!(validate_table_prefix("").is_ok());
        assert!(validate_table_prefix("qa_").is_ok());
        assert!(validate_table_prefix("x; DROP TABLE y").is_err());
    }

    #[test]
    fn record_from_descriptor() {
        let record = PluginRecord::from_descriptor(
            &descriptor("verification/basic/recaptcha"),
            LifecycleState::new(true, PluginStatus::Enabled),
        );
        assert_eq!(record.plugin_type, "verification");
        assert_eq!(record.main_class, "plugins\\recaptcha\\Main");
        assert_eq!(record.status, 1);
        assert!(record.installed_at.is_some());
    }

    #[tokio::test]
    async fn memory_repository_state_transitions() {
        let repo = MemoryPluginRepository::new();
        let record =
            PluginRecord::from_descriptor(&descriptor("a/b"), LifecycleState::NOT_INSTALLED);

        assert!(repo.insert(&record).await.unwrap());
        assert!(!repo.insert(&record).await.unwrap());

        repo.set_state("a/b", LifecycleState::new(true, PluginStatus::Enabled))
            .await
            .unwrap();
        let row = repo.fetch("a/b").await.unwrap().unwrap();
        assert!(row.lifecycle().is_enabled());
        assert!(row.installed_at.is_some());

        repo.set_state("a/b", LifecycleState::NOT_INSTALLED)
            .await
            .unwrap();
        let row = repo.fetch("a/b").await.unwrap().unwrap();
        assert_eq!(row.lifecycle(), LifecycleState::NOT_INSTALLED);
        assert!(row.installed_at.is_none());
    }

    #[tokio::test]
    async fn memory_repository_missing_rows() {
        let repo = MemoryPluginRepository::new();
        assert!(!repo.set_state("x/y", LifecycleState::NOT_INSTALLED).await.unwrap());
        assert!(!repo.set_config("x/y", "{}").await.unwrap());
        let rows = repo
            .fetch_many(&["x/y".to_string()])
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
