// Device analytics: usage, ordered chains, pairwise co-occurrence and
// recent usage per trailing window.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use tracing::{info, instrument};

use crate::error::AnalyzeError;
use crate::store::CatalogStore;
use crate::types::{ChainStat, DevicePair, DeviceUsage, Materialized, RecentDeviceUsage};

use super::traits::{AnalyzeContext, Analyzer};
use super::{AnalyzeStats, write_table};

/// Separator between device names in a chain signature.
pub const CHAIN_SEPARATOR: &str = " > ";

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceAnalyzer;

#[async_trait::async_trait]
impl Analyzer for DeviceAnalyzer {
    fn name(&self) -> &'static str {
        "devices"
    }

    #[instrument(skip_all, name = "devices_analyze", fields(scope = %ctx.scope))]
    async fn analyze(
        &self,
        store: &dyn CatalogStore,
        ctx: &AnalyzeContext,
    ) -> crate::error::Result<AnalyzeStats> {
        let start = Instant::now();
        let mut stats = AnalyzeStats::default();

        let sequences = store.device_sequences(&ctx.scope).await?;
        let hints = store.device_hints(&ctx.scope).await?;
        let mtimes: HashMap<String, i64> = store
            .document_metrics(&ctx.scope)
            .await?
            .into_iter()
            .map(|m| (m.path, m.mtime))
            .collect();

        let usage = compute_usage(&sequences, &hints);
        let chains = compute_chains(&sequences, ctx.config.chain_len)?;
        let pairs = compute_cooccurrence(&hints, ctx.config.max_devices_per_doc);
        let recent = compute_recent_usage(&hints, &mtimes, &ctx.config.activity_windows, ctx.now);

        write_table(store, ctx, Materialized::DeviceUsage(usage), &mut stats).await?;
        write_table(store, ctx, Materialized::DeviceChains(chains), &mut stats).await?;
        write_table(store, ctx, Materialized::DeviceCooccurrence(pairs), &mut stats).await?;
        write_table(store, ctx, Materialized::DeviceUsageRecent(recent), &mut stats).await?;

        stats.duration = start.elapsed();
        info!(
            documents = hints.len(),
            rows = stats.rows_written,
            duration = ?stats.duration,
            "Device analysis complete"
        );
        Ok(stats)
    }
}

/// Per-device usage.
///
/// `doc_count` is the number of documents naming the device; `usage_count`
/// adds, per document, its occurrences in the ordered sequence (at least one
/// when the device is only known from hints).
pub fn compute_usage(
    sequences: &[(String, Vec<String>)],
    hints: &[(String, Vec<String>)],
) -> Vec<DeviceUsage> {
    let mut per_doc: BTreeMap<&str, BTreeMap<&str, u64>> = BTreeMap::new();
    for (doc, devices) in hints {
        let entry = per_doc.entry(doc.as_str()).or_default();
        for device in devices {
            entry.entry(device.as_str()).or_insert(0);
        }
    }
    for (doc, devices) in sequences {
        let entry = per_doc.entry(doc.as_str()).or_default();
        for device in devices {
            *entry.entry(device.as_str()).or_insert(0) += 1;
        }
    }

    let mut totals: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
    for devices in per_doc.values() {
        for (device, occurrences) in devices {
            let total = totals.entry(device).or_default();
            total.0 += (*occurrences).max(1);
            total.1 += 1;
        }
    }

    let mut usage: Vec<DeviceUsage> = totals
        .into_iter()
        .map(|(device, (usage_count, doc_count))| DeviceUsage {
            device: device.to_string(),
            usage_count,
            doc_count,
        })
        .collect();
    usage.sort_by(|a, b| {
        b.usage_count
            .cmp(&a.usage_count)
            .then_with(|| a.device.cmp(&b.device))
    });
    usage
}

/// Count sliding windows of `len` consecutive devices in each sequence.
pub fn compute_chains(
    sequences: &[(String, Vec<String>)],
    len: usize,
) -> Result<Vec<ChainStat>, AnalyzeError> {
    if len == 0 {
        return Err(AnalyzeError::InvalidChainLength(len));
    }
    let chain_len =
        u32::try_from(len).map_err(|_| AnalyzeError::InvalidChainLength(len))?;

    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for (_, devices) in sequences {
        for window in devices.windows(len) {
            *counts.entry(window.join(CHAIN_SEPARATOR)).or_default() += 1;
        }
    }

    let mut chains: Vec<ChainStat> = counts
        .into_iter()
        .map(|(chain, usage_count)| ChainStat {
            chain,
            chain_len,
            usage_count,
        })
        .collect();
    chains.sort_by(|a, b| {
        b.usage_count
            .cmp(&a.usage_count)
            .then_with(|| a.chain.cmp(&b.chain))
    });
    Ok(chains)
}

/// Count unordered device pairs per document. Documents naming more than
/// `max_devices` distinct devices are left out.
pub fn compute_cooccurrence(hints: &[(String, Vec<String>)], max_devices: usize) -> Vec<DevicePair> {
    let mut counts: BTreeMap<(String, String), u64> = BTreeMap::new();
    for (_, devices) in hints {
        let distinct: BTreeSet<&str> = devices.iter().map(String::as_str).collect();
        if distinct.len() > max_devices {
            continue;
        }
        let ordered: Vec<&str> = distinct.into_iter().collect();
        for (i, a) in ordered.iter().enumerate() {
            for b in &ordered[i + 1..] {
                *counts
                    .entry(((*a).to_string(), (*b).to_string()))
                    .or_default() += 1;
            }
        }
    }

    let mut pairs: Vec<DevicePair> = counts
        .into_iter()
        .map(|((device_a, device_b), count)| DevicePair {
            device_a,
            device_b,
            count,
        })
        .collect();
    pairs.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| (&a.device_a, &a.device_b).cmp(&(&b.device_a, &b.device_b)))
    });
    pairs
}

/// Documents per device among those modified inside each trailing window.
pub fn compute_recent_usage(
    hints: &[(String, Vec<String>)],
    mtimes: &HashMap<String, i64>,
    windows: &[u32],
    now: i64,
) -> Vec<RecentDeviceUsage> {
    let mut rows = Vec::new();
    for &days in windows {
        let cutoff = now - i64::from(days) * SECONDS_PER_DAY;
        let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
        for (doc, devices) in hints {
            let Some(&mtime) = mtimes.get(doc) else {
                continue;
            };
            if mtime < cutoff {
                continue;
            }
            for device in devices {
                *counts.entry(device.as_str()).or_default() += 1;
            }
        }
        let mut window: Vec<RecentDeviceUsage> = counts
            .into_iter()
            .map(|(device, doc_count)| RecentDeviceUsage {
                window_days: days,
                device: device.to_string(),
                doc_count,
            })
            .collect();
        window.sort_by(|a, b| b.doc_count.cmp(&a.doc_count).then_with(|| a.device.cmp(&b.device)));
        rows.extend(window);
    }
    rows
}
