//! Bounded FAT chain walking
//!
//! Every walk is capped at `max_length` clusters so a corrupted or looping
//! FAT cannot drive unbounded I/O. Each visited cluster is appended before
//! the stop decision, so data up to the failure point stays recoverable.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::ledger::{ClusterUsageLedger, ClusterUsageRecord};
use crate::device::SectorSource;
use crate::fs::fat32::fat::{FatEntry, FatTable};
use crate::fs::fat32::scanner::DirectoryEntryCandidate;
use crate::FileId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainTermination {
    /// FAT marked the last cluster, or a cleared FAT already covered the size
    EndOfChain,
    /// Bad, reserved or (without contiguous inference) free entry
    Invalid,
    /// A cluster already in this chain came up again
    Looped,
    /// Link or starting cluster outside the data region
    OutOfRange,
    /// `max_length` reached, or the FAT could not be read
    Truncated,
}

impl std::fmt::Display for ChainTermination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainTermination::EndOfChain => write!(f, "end-of-chain"),
            ChainTermination::Invalid => write!(f, "invalid"),
            ChainTermination::Looped => write!(f, "looped"),
            ChainTermination::OutOfRange => write!(f, "out-of-range"),
            ChainTermination::Truncated => write!(f, "truncated"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterChain {
    pub file_id: FileId,
    /// Clusters in walk order
    pub clusters: Vec<u32>,
    /// Clusters that were revisited (recorded, not followed)
    pub repeated: Vec<u32>,
    /// Links taken as `current + 1` because the FAT entry was free
    pub inferred: u32,
    pub read_failed: bool,
    pub termination: ChainTermination,
}

impl ClusterChain {
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

/// Walks chains for scanned entries and records their claims
#[derive(Debug, Clone)]
pub struct ClusterChainWalker {
    /// Slack over the declared size before a walk is cut off
    pub chain_tolerance: f64,
    /// Follow free FAT entries contiguously until the declared size is covered
    pub assume_contiguous: bool,
    /// Cap for directory chains, whose size field is zero
    pub max_directory_clusters: usize,
}

impl Default for ClusterChainWalker {
    fn default() -> Self {
        Self {
            chain_tolerance: 1.5,
            assume_contiguous: true,
            max_directory_clusters: 4096,
        }
    }
}

impl ClusterChainWalker {
    /// Longest chain accepted for a file of `expected` clusters
    pub fn max_length(&self, expected: u32) -> usize {
        let inflated = (expected as f64 * self.chain_tolerance.max(1.0)).ceil() as usize;
        inflated.max(expected as usize + 1)
    }

    /// Walk the chain of a scanned entry, registering every cluster
    pub fn walk<S: SectorSource>(
        &self,
        source: &mut S,
        fat: &mut FatTable,
        ledger: &mut ClusterUsageLedger,
        entry: &DirectoryEntryCandidate,
    ) -> ClusterChain {
        let geometry = *fat.geometry();
        let (expected, max_length) = if entry.is_directory() {
            (1, self.max_directory_clusters)
        } else {
            let expected = geometry.clusters_for_size(entry.size as u64);
            (expected, self.max_length(expected))
        };

        self.walk_from(
            source,
            fat,
            ledger,
            ChainOwner {
                file_id: entry.file_id,
                ordinal: entry.ordinal,
                deleted: entry.deleted,
            },
            entry.start_cluster,
            expected,
            max_length,
        )
    }

    /// Walk from `start_cluster` for an arbitrary owner
    #[allow(clippy::too_many_arguments)]
    pub fn walk_from<S: SectorSource>(
        &self,
        source: &mut S,
        fat: &mut FatTable,
        ledger: &mut ClusterUsageLedger,
        owner: ChainOwner,
        start_cluster: u32,
        expected_clusters: u32,
        max_length: usize,
    ) -> ClusterChain {
        let geometry = *fat.geometry();
        let cluster_size = geometry.cluster_size() as u64;
        let mut chain = ClusterChain {
            file_id: owner.file_id,
            clusters: Vec::new(),
            repeated: Vec::new(),
            inferred: 0,
            read_failed: false,
            termination: ChainTermination::OutOfRange,
        };

        if !geometry.is_valid_cluster(start_cluster) {
            tracing::debug!(
                "File {}: start cluster {} outside data region",
                owner.file_id,
                start_cluster
            );
            return chain;
        }

        let mut visited = HashSet::new();
        let mut current = start_cluster;

        chain.termination = loop {
            if !visited.insert(current) {
                tracing::warn!("File {}: chain loops back to cluster {}", owner.file_id, current);
                chain.repeated.push(current);
                break ChainTermination::Looped;
            }

            ledger.claim(ClusterUsageRecord {
                cluster: current,
                file_id: owner.file_id,
                ordinal: owner.ordinal,
                deleted: owner.deleted,
                write_offset: chain.clusters.len() as u64 * cluster_size,
            });
            chain.clusters.push(current);

            let entry = match fat.entry(source, current) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(
                        "File {}: FAT entry for cluster {} unreadable: {}",
                        owner.file_id,
                        current,
                        e
                    );
                    chain.read_failed = true;
                    break ChainTermination::Truncated;
                }
            };

            let next = match entry {
                FatEntry::EndOfChain => break ChainTermination::EndOfChain,
                FatEntry::Bad | FatEntry::Reserved => break ChainTermination::Invalid,
                FatEntry::Free if !self.assume_contiguous => break ChainTermination::Invalid,
                FatEntry::Free => {
                    if chain.clusters.len() >= expected_clusters as usize {
                        break ChainTermination::EndOfChain;
                    }
                    chain.inferred += 1;
                    current + 1
                }
                FatEntry::Next(next) => next,
            };

            if !geometry.is_valid_cluster(next) {
                break ChainTermination::OutOfRange;
            }
            if chain.clusters.len() >= max_length {
                break ChainTermination::Truncated;
            }
            current = next;
        };

        tracing::debug!(
            "File {}: chain of {} clusters ({} inferred) ended {}",
            owner.file_id,
            chain.clusters.len(),
            chain.inferred,
            chain.termination
        );

        chain
    }
}

/// Identity under which a walk registers its clusters
#[derive(Debug, Clone, Copy)]
pub struct ChainOwner {
    pub file_id: FileId,
    pub ordinal: u64,
    pub deleted: bool,
}
