//! TabLens: profiling and query engine for tabular data
//!
//! Load a delimited or in-memory source into an immutable columnar
//! snapshot, run a SQL subset against it, and request a statistical
//! profile. Profiles and query results are memoized per dataset
//! fingerprint; a change notification swaps the snapshot and invalidates
//! everything keyed by the superseded fingerprint.

pub mod cache;
pub mod dataset;
pub mod errors;
pub mod monitor;
pub mod profiler;
pub mod query;
pub mod sketch;
pub mod source;
pub mod stats;
pub mod store;

// Re-exports
pub use cache::{CacheMetrics, SingleFlightCache, DEFAULT_CACHE_CAPACITY};
pub use dataset::{Column, ColumnType, Dataset, DatasetRef, Fingerprint, Value};
pub use errors::{Result, TabLensError};
pub use monitor::{ChangeMonitor, ChangeNotifier, SourceEvent};
pub use profiler::{
    ColumnProfile, CorrelationMatrix, DatasetProfile, DistinctMode, Histogram, Profiler,
    ProfilerConfig, QuantileMode,
};
pub use query::{QueryEngine, QueryResult, ResultColumn};
pub use source::DataSource;
pub use store::DatasetStore;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct TabLensConfig {
    pub profiler: ProfilerConfig,
    /// Capacity of each memoization cache (profiles and query results).
    pub cache_capacity: usize,
    /// Queue depth for change notifications.
    pub monitor_queue: usize,
}

impl Default for TabLensConfig {
    fn default() -> Self {
        Self {
            profiler: ProfilerConfig::default(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            monitor_queue: 32,
        }
    }
}

/// Main engine facade. One current snapshot, a registry of named sources,
/// and fingerprint-keyed caches over profile and query computations.
pub struct TabLens {
    sources: DashMap<String, DataSource>,
    store: DatasetStore,
    profiler: Profiler,
    profiles: SingleFlightCache<DatasetProfile>,
    queries: SingleFlightCache<QueryResult>,
    config: TabLensConfig,
}

impl TabLens {
    pub fn new(config: TabLensConfig) -> Result<Self> {
        config.profiler.validate()?;
        Ok(Self {
            sources: DashMap::new(),
            store: DatasetStore::new(),
            profiler: Profiler::new(config.profiler.clone()),
            profiles: SingleFlightCache::new(config.cache_capacity),
            queries: SingleFlightCache::new(config.cache_capacity),
            config,
        })
    }

    pub fn with_defaults() -> Self {
        // Default configuration always validates.
        Self::new(TabLensConfig::default()).unwrap_or_else(|_| unreachable!())
    }

    /// Register a named source and make its content the current snapshot.
    pub async fn load(&self, name: impl Into<String>, source: DataSource) -> Result<DatasetRef> {
        let name = name.into();
        let previous = self.store.fingerprint().ok();
        let dataset = self.store.load(&source).await?;
        self.sources.insert(name.clone(), source);
        self.invalidate_superseded(previous, dataset.fingerprint());
        info!(source = %name, fingerprint = %dataset.fingerprint().short(), "source loaded");
        Ok(dataset)
    }

    /// Re-ingest a registered source. On success the snapshot is swapped and
    /// cache entries for the superseded fingerprint are dropped; on failure
    /// the previous snapshot and caches stay intact.
    pub async fn reload(&self, name: &str) -> Result<DatasetRef> {
        let source = self
            .sources
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TabLensError::UnknownSource(name.to_string()))?;
        let previous = self.store.fingerprint().ok();
        let dataset = self.store.load(&source).await?;
        self.invalidate_superseded(previous, dataset.fingerprint());
        info!(source = %name, fingerprint = %dataset.fingerprint().short(), "source reloaded");
        Ok(dataset)
    }

    /// Change notification entry point, at most one reload per signal.
    pub async fn on_source_changed(&self, name: &str) -> Result<DatasetRef> {
        self.reload(name).await
    }

    /// Drop a source registration. Cache entries for its data fall out via
    /// LRU once nothing requests them.
    pub fn remove_source(&self, name: &str) -> bool {
        self.sources.remove(name).is_some()
    }

    /// Start a listener that reacts to watcher events. Returns the monitor;
    /// hand `monitor.notifier()` to the watcher.
    pub fn change_monitor(self: &Arc<Self>) -> ChangeMonitor {
        let engine = self.clone();
        ChangeMonitor::spawn(self.config.monitor_queue, move |event| {
            let engine = engine.clone();
            async move {
                match event {
                    SourceEvent::Modified(name) => {
                        if let Err(err) = engine.on_source_changed(&name).await {
                            warn!(source = %name, error = %err, "reload after change failed");
                        }
                    }
                    SourceEvent::Removed(name) => {
                        engine.remove_source(&name);
                    }
                }
            }
        })
    }

    /// Execute a query against the current snapshot, memoized per
    /// (fingerprint, query text).
    pub async fn submit_query(&self, sql: &str) -> Result<Arc<QueryResult>> {
        let dataset = self.store.current()?;
        // Validate eagerly so syntax and binding errors keep their type and
        // never occupy an in-flight cache slot.
        QueryEngine::validate(sql, &dataset)?;

        let key = (dataset.fingerprint(), text_hash(sql));
        let sql = sql.to_string();
        self.queries
            .get_or_compute(key, move || async move {
                tokio::task::spawn_blocking(move || QueryEngine::execute(&sql, &dataset)).await?
            })
            .await
    }

    /// Profile the current snapshot with the engine's configuration.
    pub async fn request_profile(&self) -> Result<Arc<DatasetProfile>> {
        self.profile_with(self.profiler.config().clone()).await
    }

    /// Profile with a one-off configuration. Distinct configurations cache
    /// independently under the same fingerprint.
    pub async fn request_profile_with(
        &self,
        config: ProfilerConfig,
    ) -> Result<Arc<DatasetProfile>> {
        config.validate()?;
        self.profile_with(config).await
    }

    async fn profile_with(&self, config: ProfilerConfig) -> Result<Arc<DatasetProfile>> {
        let dataset = self.store.current()?;
        let key = (dataset.fingerprint(), config.config_hash());
        self.profiles
            .get_or_compute(key, move || async move {
                let profiler = Profiler::new(config);
                tokio::task::spawn_blocking(move || Ok(profiler.profile(&dataset))).await?
            })
            .await
    }

    /// First `n` rows of the current snapshot, for previews.
    pub fn preview(&self, n: usize) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
        let dataset = self.store.current()?;
        let headers = dataset
            .columns()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        Ok((headers, dataset.head(n)))
    }

    /// Render the current schema as a CREATE TABLE statement.
    pub fn schema_sql(&self, table: &str) -> Result<String> {
        let dataset = self.store.current()?;
        let mut out = format!("CREATE TABLE \"{table}\" (\n");
        let defs: Vec<String> = dataset
            .columns()
            .iter()
            .map(|c| format!("    \"{}\" {}", c.name, c.ty.sql_name()))
            .collect();
        out.push_str(&defs.join(",\n"));
        out.push_str("\n)");
        Ok(out)
    }

    /// Starter queries tailored to the current schema, as (title, sql).
    pub fn sample_queries(&self, table: &str) -> Result<Vec<(String, String)>> {
        let dataset = self.store.current()?;
        let mut queries = vec![
            (
                "Select all data".to_string(),
                format!("SELECT * FROM '{table}' LIMIT 100"),
            ),
            (
                "Count rows".to_string(),
                format!("SELECT COUNT(*) AS row_count FROM '{table}'"),
            ),
        ];

        let numeric = dataset.columns().iter().find(|c| c.ty.is_numeric());
        if let Some(col) = numeric {
            let mut sql = String::new();
            let _ = write!(
                sql,
                "SELECT\n    MIN(\"{name}\") AS min_value,\n    MAX(\"{name}\") AS max_value,\n    AVG(\"{name}\") AS avg_value,\n    COUNT(*) AS count\nFROM '{table}'",
                name = col.name,
            );
            queries.push(("Basic statistics".to_string(), sql));
        }

        let group = dataset
            .columns()
            .iter()
            .find(|c| !c.ty.is_numeric())
            .or_else(|| dataset.columns().first());
        if let Some(col) = group {
            queries.push((
                "Group and count".to_string(),
                format!(
                    "SELECT \"{name}\", COUNT(*) AS count FROM '{table}' GROUP BY \"{name}\" ORDER BY count DESC LIMIT 20",
                    name = col.name,
                ),
            ));
            queries.push((
                "Filter data".to_string(),
                format!(
                    "SELECT * FROM '{table}' WHERE \"{name}\" IS NOT NULL LIMIT 100",
                    name = col.name,
                ),
            ));
        }
        Ok(queries)
    }

    pub fn current(&self) -> Result<DatasetRef> {
        self.store.current()
    }

    pub fn fingerprint(&self) -> Result<Fingerprint> {
        self.store.fingerprint()
    }

    pub fn is_loaded(&self) -> bool {
        self.store.is_loaded()
    }

    pub fn profile_cache_metrics(&self) -> &CacheMetrics {
        self.profiles.metrics()
    }

    pub fn query_cache_metrics(&self) -> &CacheMetrics {
        self.queries.metrics()
    }

    fn invalidate_superseded(&self, previous: Option<Fingerprint>, current: Fingerprint) {
        if let Some(old) = previous {
            if old != current {
                let profiles = self.profiles.invalidate(&old);
                let queries = self.queries.invalidate(&old);
                info!(
                    fingerprint = %old.short(),
                    profiles,
                    queries,
                    "invalidated superseded fingerprint"
                );
            }
        }
    }
}

/// Stable 64-bit hash of query text, for cache keys.
fn text_hash(sql: &str) -> u64 {
    let digest = Sha256::digest(sql.trim().as_bytes());
    u64::from_le_bytes(digest[..8].try_into().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> TabLens {
        TabLens::with_defaults()
    }

    #[tokio::test]
    async fn test_query_before_load_fails() {
        let lens = engine();
        assert!(matches!(
            lens.submit_query("SELECT 1 FROM t").await,
            Err(TabLensError::NoDataset)
        ));
    }

    #[tokio::test]
    async fn test_load_query_profile_roundtrip() {
        let lens = engine();
        lens.load(
            "orders",
            DataSource::delimited_bytes(b"id,amount\n1,10\n2,20\n".to_vec(), b',', true),
        )
        .await
        .unwrap();

        let result = lens.submit_query("SELECT SUM(amount) FROM orders").await.unwrap();
        assert_eq!(result.value(0, 0), &Value::Integer(30));

        let profile = lens.request_profile().await.unwrap();
        assert_eq!(profile.row_count, 2);
        assert_eq!(profile.columns.len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_query_hits_cache() {
        let lens = engine();
        lens.load(
            "t",
            DataSource::delimited_bytes(b"a\n1\n2\n".to_vec(), b',', true),
        )
        .await
        .unwrap();
        lens.submit_query("SELECT COUNT(*) FROM t").await.unwrap();
        lens.submit_query("SELECT COUNT(*) FROM t").await.unwrap();
        let metrics = lens.query_cache_metrics();
        assert_eq!(metrics.hits.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_reload_unknown_source_fails() {
        let lens = engine();
        assert!(matches!(
            lens.reload("missing").await,
            Err(TabLensError::UnknownSource(_))
        ));
    }

    #[tokio::test]
    async fn test_schema_sql_renders_types() {
        let lens = engine();
        lens.load(
            "t",
            DataSource::delimited_bytes(b"id,name\n1,ann\n".to_vec(), b',', true),
        )
        .await
        .unwrap();
        let schema = lens.schema_sql("t").unwrap();
        assert!(schema.contains("\"id\" INTEGER"));
        assert!(schema.contains("\"name\" VARCHAR"));
    }

    #[tokio::test]
    async fn test_sample_queries_are_valid() {
        let lens = engine();
        lens.load(
            "sales",
            DataSource::delimited_bytes(
                b"region,amount\neast,10\nwest,20\neast,5\n".to_vec(),
                b',',
                true,
            ),
        )
        .await
        .unwrap();
        for (title, sql) in lens.sample_queries("sales").unwrap() {
            let result = lens.submit_query(&sql).await;
            assert!(result.is_ok(), "{title}: {sql}: {result:?}");
        }
    }
}
