use crate::config::AnalyticsSection;
use crate::store::CatalogStore;
use crate::types::Scope;

use super::AnalyzeStats;

/// Inputs shared by every analyzer in one recompute.
#[derive(Debug, Clone)]
pub struct AnalyzeContext {
    pub scope: Scope,
    pub config: AnalyticsSection,
    /// Unix seconds used for trailing windows and `computed_at`.
    pub now: i64,
}

/// Common interface for all analyzers.
#[async_trait::async_trait]
pub trait Analyzer: Send + Sync {
    /// Human-readable name for this analyzer.
    fn name(&self) -> &'static str;

    /// Recompute this analyzer's tables for `ctx.scope`, replacing prior rows.
    async fn analyze(
        &self,
        store: &dyn CatalogStore,
        ctx: &AnalyzeContext,
    ) -> crate::error::Result<AnalyzeStats>;
}
