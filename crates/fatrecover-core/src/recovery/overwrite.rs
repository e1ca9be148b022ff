//! Overwrite detection against the cluster ledger
//!
//! A deleted file's cluster counts as overwritten when it is also claimed by
//! a live file, or by a deleted file discovered later in the scan.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::chain::ClusterChain;
use super::ledger::{ClusterUsageLedger, ClusterUsageRecord};
use crate::FileId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverwriteAnalysis {
    pub has_overwrite: bool,
    /// Overwritten clusters in chain order
    pub overwritten_clusters: Vec<u32>,
    /// Who took each overwritten cluster
    pub overwritten_by: BTreeMap<u32, Vec<FileId>>,
    /// Overwritten share of the clusters the declared size needs
    pub overwrite_percentage: f64,
}

impl OverwriteAnalysis {
    pub fn is_overwritten(&self, cluster: u32) -> bool {
        self.overwritten_by.contains_key(&cluster)
    }
}

fn supersedes(other: &ClusterUsageRecord, file_id: FileId, ordinal: u64) -> bool {
    other.file_id != file_id && (!other.deleted || other.ordinal > ordinal)
}

/// Analyze one candidate's chain
///
/// `expected_clusters` is the count the declared size calls for; it is
/// raised to one so an empty file cannot divide by zero. Clusters past it
/// are still reported but do not count toward the percentage.
pub fn analyze(
    ledger: &ClusterUsageLedger,
    chain: &ClusterChain,
    ordinal: u64,
    expected_clusters: u32,
) -> OverwriteAnalysis {
    let mut overwritten_clusters = Vec::new();
    let mut overwritten_by = BTreeMap::new();
    let expected = expected_clusters.max(1) as usize;
    let mut counted = 0usize;

    for (index, &cluster) in chain.clusters.iter().enumerate() {
        let takers: Vec<FileId> = ledger
            .claims_for(cluster)
            .iter()
            .filter(|record| supersedes(record, chain.file_id, ordinal))
            .map(|record| record.file_id)
            .collect();

        if !takers.is_empty() && !overwritten_by.contains_key(&cluster) {
            overwritten_clusters.push(cluster);
            overwritten_by.insert(cluster, takers);
            if index < expected {
                counted += 1;
            }
        }
    }

    let percentage = (counted as f64 / expected as f64).clamp(0.0, 1.0);

    if !overwritten_clusters.is_empty() {
        tracing::debug!(
            "File {}: {} of {} clusters overwritten",
            chain.file_id,
            overwritten_clusters.len(),
            expected_clusters
        );
    }

    OverwriteAnalysis {
        has_overwrite: !overwritten_clusters.is_empty(),
        overwritten_clusters,
        overwritten_by,
        overwrite_percentage: percentage,
    }
}
