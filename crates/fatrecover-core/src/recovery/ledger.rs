//! Cluster ownership ledger for one recovery pass
//!
//! Maps each cluster to every claim made on it, in claim order. A cluster
//! with more than one claimant has been reused since one of them was written.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::FileId;

/// Claimant id of the root directory chain; scanned entries start at 1
pub const ROOT_DIRECTORY_ID: FileId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterUsageRecord {
    pub cluster: u32,
    pub file_id: FileId,
    /// Ordinal of the claimant's directory entry
    pub ordinal: u64,
    pub deleted: bool,
    /// Byte offset of the cluster within the claimant's file
    pub write_offset: u64,
}

/// Claims of every walked chain, owned by a single pass
#[derive(Debug, Default, Clone)]
pub struct ClusterUsageLedger {
    claims: BTreeMap<u32, Vec<ClusterUsageRecord>>,
    total_claims: usize,
}

impl ClusterUsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a claim; a file claiming the same cluster twice is kept once
    pub fn claim(&mut self, record: ClusterUsageRecord) {
        let records = self.claims.entry(record.cluster).or_default();
        if records.iter().any(|r| r.file_id == record.file_id) {
            return;
        }
        records.push(record);
        self.total_claims += 1;
    }

    pub fn claims_for(&self, cluster: u32) -> &[ClusterUsageRecord] {
        self.claims.get(&cluster).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_contended(&self, cluster: u32) -> bool {
        self.claims_for(cluster).len() > 1
    }

    /// Clusters with more than one claimant
    pub fn contended_clusters(&self) -> impl Iterator<Item = u32> + '_ {
        self.claims
            .iter()
            .filter(|(_, records)| records.len() > 1)
            .map(|(&cluster, _)| cluster)
    }

    pub fn cluster_count(&self) -> usize {
        self.claims.len()
    }

    pub fn total_claims(&self) -> usize {
        self.total_claims
    }
}
