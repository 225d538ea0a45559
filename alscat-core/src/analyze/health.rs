// Document health: complexity, health score, quality issues and
// missing-reference hotspots.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{info, instrument};

use crate::store::CatalogStore;
use crate::types::{
    DocComplexity, DocumentMetrics, IssueKind, Materialized, MissingHotspot, QualityIssue,
    SetHealth,
};

use super::traits::{AnalyzeContext, Analyzer};
use super::{AnalyzeStats, write_table};

const MISSING_PENALTY: f64 = 15.0;
const DEVICE_WEIGHT: f64 = 0.5;
const DEVICE_CAP: u32 = 20;
const SAMPLE_WEIGHT: f64 = 0.25;
const SAMPLE_CAP: u32 = 40;

#[derive(Debug, Clone, Copy, Default)]
pub struct HealthAnalyzer;

#[async_trait::async_trait]
impl Analyzer for HealthAnalyzer {
    fn name(&self) -> &'static str {
        "health"
    }

    #[instrument(skip_all, name = "health_analyze", fields(scope = %ctx.scope))]
    async fn analyze(
        &self,
        store: &dyn CatalogStore,
        ctx: &AnalyzeContext,
    ) -> crate::error::Result<AnalyzeStats> {
        let start = Instant::now();
        let mut stats = AnalyzeStats::default();

        let metrics = store.document_metrics(&ctx.scope).await?;
        let missing = store.missing_references(&ctx.scope).await?;

        let complexity = compute_complexity(&metrics);
        let health = compute_health(&metrics);
        let issues = compute_quality_issues(&metrics);
        let hotspots = compute_missing_hotspots(&missing);

        write_table(store, ctx, Materialized::DocComplexity(complexity), &mut stats).await?;
        write_table(store, ctx, Materialized::SetHealth(health), &mut stats).await?;
        write_table(store, ctx, Materialized::QualityIssues(issues), &mut stats).await?;
        write_table(store, ctx, Materialized::MissingHotspots(hotspots), &mut stats).await?;

        stats.duration = start.elapsed();
        info!(
            documents = metrics.len(),
            missing_refs = missing.len(),
            duration = ?stats.duration,
            "Health analysis complete"
        );
        Ok(stats)
    }
}

/// Health score in `[0, 100]`; higher is healthier.
///
/// Each missing reference costs 15 points. Devices (up to 20) and samples
/// (up to 40) add a small bonus, so the score never rises with missing
/// references and never falls with devices or samples.
pub fn health_score(missing_refs: u32, devices: u32, samples: u32) -> f64 {
    let score = 100.0 - MISSING_PENALTY * f64::from(missing_refs)
        + DEVICE_WEIGHT * f64::from(devices.min(DEVICE_CAP))
        + SAMPLE_WEIGHT * f64::from(samples.min(SAMPLE_CAP));
    score.clamp(0.0, 100.0)
}

pub fn compute_complexity(metrics: &[DocumentMetrics]) -> Vec<DocComplexity> {
    let mut rows: Vec<DocComplexity> = metrics
        .iter()
        .filter(|m| m.error.is_none())
        .map(|m| DocComplexity {
            path: m.path.clone(),
            tracks_total: m.tracks_total,
            clips_total: m.clips_total,
            devices_count: m.devices_count,
            samples_count: m.samples_count,
        })
        .collect();
    rows.sort_by(|a, b| {
        let weight = |c: &DocComplexity| {
            u64::from(c.tracks_total) + u64::from(c.clips_total) + u64::from(c.devices_count)
        };
        weight(b).cmp(&weight(a)).then_with(|| a.path.cmp(&b.path))
    });
    rows
}

/// Health rows, worst first.
pub fn compute_health(metrics: &[DocumentMetrics]) -> Vec<SetHealth> {
    let mut rows: Vec<SetHealth> = metrics
        .iter()
        .filter(|m| m.error.is_none())
        .map(|m| SetHealth {
            path: m.path.clone(),
            score: health_score(m.missing_refs, m.devices_count, m.samples_count),
            missing_refs: m.missing_refs,
            devices_count: m.devices_count,
            samples_count: m.samples_count,
        })
        .collect();
    rows.sort_by(|a, b| a.score.total_cmp(&b.score).then_with(|| a.path.cmp(&b.path)));
    rows
}

/// Quality flags, most severe first. A document that failed to parse only
/// gets `parse_error`; its zero counts are not meaningful.
pub fn compute_quality_issues(metrics: &[DocumentMetrics]) -> Vec<QualityIssue> {
    let mut issues = Vec::new();
    let mut push = |path: &str, issue: IssueKind, issue_value: u64| {
        issues.push(QualityIssue {
            path: path.to_string(),
            issue,
            issue_value,
            severity: issue.severity(),
        });
    };

    for m in metrics {
        if m.error.is_some() {
            push(&m.path, IssueKind::ParseError, 1);
            continue;
        }
        if m.missing_refs > 0 {
            push(&m.path, IssueKind::MissingRefs, u64::from(m.missing_refs));
        }
        if m.tracks_total == 0 {
            push(&m.path, IssueKind::ZeroTracks, 0);
        }
        if m.clips_total == 0 {
            push(&m.path, IssueKind::ZeroClips, 0);
        }
    }

    issues.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.issue_value.cmp(&a.issue_value))
            .then_with(|| a.path.cmp(&b.path))
    });
    issues
}

/// Parent directory of a reference target, accepting either separator.
pub fn parent_directory(target: &str) -> &str {
    match target.rfind(['/', '\\']) {
        Some(0) => &target[..1],
        Some(i) => &target[..i],
        None => "",
    }
}

/// Missing reference targets grouped by parent directory.
pub fn compute_missing_hotspots(targets: &[String]) -> Vec<MissingHotspot> {
    let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
    for target in targets {
        *counts.entry(parent_directory(target)).or_default() += 1;
    }
    let mut rows: Vec<MissingHotspot> = counts
        .into_iter()
        .map(|(directory, missing_count)| MissingHotspot {
            directory: directory.to_string(),
            missing_count,
        })
        .collect();
    rows.sort_by(|a, b| {
        b.missing_count
            .cmp(&a.missing_count)
            .then_with(|| a.directory.cmp(&b.directory))
    });
    rows
}
