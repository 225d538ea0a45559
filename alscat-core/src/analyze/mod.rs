pub mod devices;
pub mod health;
pub mod storage;
pub mod traits;

use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use crate::config::AnalyticsSection;
use crate::error::{AnalyzeError, CatalogError};
use crate::store::CatalogStore;
use crate::types::{Materialized, Scope};

pub use traits::{AnalyzeContext, Analyzer};

/// `catalog_meta` key holding the unix time of the last recompute.
pub const LAST_ANALYZE_KEY: &str = "last_analyze_at";

/// Statistics returned by an analyzer after a run.
#[derive(Debug, Default)]
pub struct AnalyzeStats {
    pub tables_written: u64,
    pub rows_written: u64,
    pub duration: Duration,
    pub errors: Vec<(String, CatalogError)>,
}

impl AnalyzeStats {
    fn absorb(&mut self, other: Self) {
        self.tables_written += other.tables_written;
        self.rows_written += other.rows_written;
        self.errors.extend(other.errors);
    }
}

/// Replace one table and count it.
pub(crate) async fn write_table(
    store: &dyn CatalogStore,
    ctx: &AnalyzeContext,
    table: Materialized,
    stats: &mut AnalyzeStats,
) -> crate::error::Result<()> {
    store.replace_materialized(&ctx.scope, &table, ctx.now).await?;
    stats.tables_written += 1;
    stats.rows_written += table.row_count() as u64;
    Ok(())
}

/// The analyzers run by `recompute`, in order.
pub fn default_analyzers() -> Vec<Box<dyn Analyzer>> {
    vec![
        Box::new(devices::DeviceAnalyzer),
        Box::new(health::HealthAnalyzer),
        Box::new(storage::StorageAnalyzer),
    ]
}

/// Outcome of recomputing one scope.
#[derive(Debug)]
pub struct ScopeAnalysis {
    pub scope: Scope,
    pub stats: AnalyzeStats,
}

/// Recompute every analytics table for each scope.
///
/// Each scope's tables are replaced in one transaction, so readers see either
/// the previous or the new set. A failing analyzer is recorded in that scope's
/// `errors` and the remaining analyzers still run; a store failure rolls the
/// scope back and ends the recompute.
pub async fn recompute(
    store: &dyn CatalogStore,
    scopes: &[Scope],
    config: &AnalyticsSection,
    now: i64,
) -> crate::error::Result<Vec<ScopeAnalysis>> {
    recompute_with(store, &default_analyzers(), scopes, config, now).await
}

/// Run `analyzers` over each scope.
#[instrument(skip_all, name = "recompute")]
pub async fn recompute_with(
    store: &dyn CatalogStore,
    analyzers: &[Box<dyn Analyzer>],
    scopes: &[Scope],
    config: &AnalyticsSection,
    now: i64,
) -> crate::error::Result<Vec<ScopeAnalysis>> {
    if config.chain_len == 0 {
        return Err(AnalyzeError::InvalidChainLength(config.chain_len).into());
    }

    let mut results = Vec::with_capacity(scopes.len());
    for scope in scopes {
        let start = Instant::now();
        let ctx = AnalyzeContext {
            scope: scope.clone(),
            config: config.clone(),
            now,
        };
        let mut stats = AnalyzeStats::default();
        store.begin_transaction().await?;
        for analyzer in analyzers {
            match analyzer.analyze(store, &ctx).await {
                Ok(s) => stats.absorb(s),
                Err(e @ CatalogError::Store(_)) => {
                    warn!(scope = %scope, analyzer = analyzer.name(), error = %e, "Store failed, rolling back scope");
                    if let Err(rollback) = store.rollback_transaction().await {
                        warn!(error = %rollback, "Rollback failed");
                    }
                    return Err(e);
                }
                Err(e) => {
                    warn!(scope = %scope, analyzer = analyzer.name(), error = %e, "Analyzer failed");
                    stats.errors.push((analyzer.name().to_string(), e));
                }
            }
        }
        store.commit_transaction().await?;
        stats.duration = start.elapsed();
        info!(
            scope = %scope,
            tables = stats.tables_written,
            rows = stats.rows_written,
            errors = stats.errors.len(),
            duration = ?stats.duration,
            "Analytics recomputed"
        );
        results.push(ScopeAnalysis {
            scope: scope.clone(),
            stats,
        });
    }

    store.set_meta(LAST_ANALYZE_KEY, &now.to_string()).await?;
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::query::CatalogQuery;
    use crate::store::SqliteCatalog;
    use crate::types::{DeviceUsage, ScopeSelector};

    struct Failing;

    #[async_trait::async_trait]
    impl Analyzer for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn analyze(
            &self,
            _store: &dyn CatalogStore,
            _ctx: &AnalyzeContext,
        ) -> crate::error::Result<AnalyzeStats> {
            Err(AnalyzeError::Computation("boom".into()).into())
        }
    }

    /// Writes one table, then loses the store.
    struct LosesStore;

    #[async_trait::async_trait]
    impl Analyzer for LosesStore {
        fn name(&self) -> &'static str {
            "loses_store"
        }

        async fn analyze(
            &self,
            store: &dyn CatalogStore,
            ctx: &AnalyzeContext,
        ) -> crate::error::Result<AnalyzeStats> {
            let mut stats = AnalyzeStats::default();
            let usage = Materialized::DeviceUsage(vec![DeviceUsage {
                device: "Eq Eight".into(),
                usage_count: 1,
                doc_count: 1,
            }]);
            write_table(store, ctx, usage, &mut stats).await?;
            Err(StoreError::Migration("catalog went away".into()).into())
        }
    }

    #[tokio::test]
    async fn store_failure_rolls_back_the_scope() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.sqlite");
        let store = SqliteCatalog::open(&path).unwrap();

        let analyzers: Vec<Box<dyn Analyzer>> = vec![Box::new(LosesStore)];
        let err = recompute_with(
            &store,
            &analyzers,
            &[Scope::default()],
            &AnalyticsSection::default(),
            5,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CatalogError::Store(StoreError::Migration(_))));
        assert_eq!(store.meta(LAST_ANALYZE_KEY).await.unwrap(), None);

        let query = CatalogQuery::open(&path).unwrap();
        assert!(query.top_devices(&ScopeSelector::All, None).unwrap().is_empty());

        // The rolled-back transaction is closed, so the next recompute runs.
        recompute(&store, &[Scope::default()], &AnalyticsSection::default(), 6)
            .await
            .unwrap();
        assert_eq!(
            store.meta(LAST_ANALYZE_KEY).await.unwrap().as_deref(),
            Some("6")
        );
    }

    #[tokio::test]
    async fn recompute_on_empty_catalog_writes_every_table() {
        let store = SqliteCatalog::in_memory().unwrap();
        let results = recompute(&store, &[Scope::default()], &AnalyticsSection::default(), 0)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].stats.errors.is_empty());
        assert_eq!(results[0].stats.tables_written, 13);
        assert_eq!(
            store.meta(LAST_ANALYZE_KEY).await.unwrap().as_deref(),
            Some("0")
        );
    }

    #[tokio::test]
    async fn zero_chain_length_is_rejected() {
        let store = SqliteCatalog::in_memory().unwrap();
        let config = AnalyticsSection {
            chain_len: 0,
            ..AnalyticsSection::default()
        };
        let err = recompute(&store, &[Scope::default()], &config, 0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::CatalogError::Analyze(AnalyzeError::InvalidChainLength(0))
        ));
    }

    #[tokio::test]
    async fn failing_analyzer_does_not_stop_others() {
        let store = SqliteCatalog::in_memory().unwrap();
        let analyzers: Vec<Box<dyn Analyzer>> =
            vec![Box::new(Failing), Box::new(storage::StorageAnalyzer)];
        let results = recompute_with(
            &store,
            &analyzers,
            &[Scope::default()],
            &AnalyticsSection::default(),
            0,
        )
        .await
        .unwrap();
        let stats = &results[0].stats;
        assert_eq!(stats.errors.len(), 1);
        assert_eq!(stats.errors[0].0, "failing");
        assert!(stats.tables_written > 0);
    }
}
