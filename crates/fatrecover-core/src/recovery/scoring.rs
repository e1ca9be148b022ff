//! Chain corruption scoring
//!
//! A pure function of the walked chain: how fragmented it is, and which of
//! its clusters look like the product of a damaged or reused FAT.

use serde::{Deserialize, Serialize};

use super::chain::{ChainTermination, ClusterChain};
use crate::fs::fat32::FilesystemGeometry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAnalysisResult {
    /// Share of links that are not `+1`, in `0.0..=1.0`
    pub fragmentation: f64,
    pub is_corrupted: bool,
    pub back_jumps: u32,
    pub large_gaps: u32,
    pub repeated_clusters: u32,
    /// Suspect clusters in discovery order, without duplicates
    pub corrupted_clusters: Vec<u32>,
}

impl ClusterAnalysisResult {
    pub fn anomalies(&self) -> u32 {
        self.back_jumps + self.large_gaps + self.repeated_clusters
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CorruptionScorer {
    /// Absolute link distance above which a jump counts as a large gap
    large_gap_threshold: u32,
}

impl CorruptionScorer {
    pub fn new(large_gap_threshold: u32) -> Self {
        Self {
            large_gap_threshold: large_gap_threshold.max(1),
        }
    }

    /// Threshold as a fraction of the volume's cluster count
    pub fn for_geometry(geometry: &FilesystemGeometry, large_gap_fraction: f64) -> Self {
        let threshold = (geometry.cluster_count as f64 * large_gap_fraction).ceil();
        Self::new(threshold.clamp(1.0, u32::MAX as f64) as u32)
    }

    pub fn large_gap_threshold(&self) -> u32 {
        self.large_gap_threshold
    }

    pub fn score(&self, chain: &ClusterChain) -> ClusterAnalysisResult {
        let mut result = ClusterAnalysisResult {
            fragmentation: 0.0,
            is_corrupted: false,
            back_jumps: 0,
            large_gaps: 0,
            repeated_clusters: chain.repeated.len() as u32,
            corrupted_clusters: Vec::new(),
        };

        let mut discontinuities = 0usize;
        for pair in chain.clusters.windows(2) {
            let (current, next) = (pair[0], pair[1]);
            if next != current.wrapping_add(1) {
                discontinuities += 1;
            }

            let mut suspect = false;
            if next < current {
                result.back_jumps += 1;
                suspect = true;
            }
            if current.abs_diff(next) > self.large_gap_threshold {
                result.large_gaps += 1;
                suspect = true;
            }
            if suspect {
                push_unique(&mut result.corrupted_clusters, next);
            }
        }

        for &cluster in &chain.repeated {
            push_unique(&mut result.corrupted_clusters, cluster);
        }

        if chain.clusters.len() > 1 {
            result.fragmentation = discontinuities as f64 / (chain.clusters.len() - 1) as f64;
        }

        result.is_corrupted =
            chain.termination != ChainTermination::EndOfChain || result.anomalies() > 0;

        result
    }
}

fn push_unique(clusters: &mut Vec<u32>, cluster: u32) {
    if !clusters.contains(&cluster) {
        clusters.push(cluster);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(clusters: &[u32], repeated: &[u32], termination: ChainTermination) -> ClusterChain {
        ClusterChain {
            file_id: 1,
            clusters: clusters.to_vec(),
            repeated: repeated.to_vec(),
            inferred: 0,
            read_failed: false,
            termination,
        }
    }

    #[test]
    fn test_contiguous_chain_is_clean() {
        let result = CorruptionScorer::new(10).score(&chain(&[5, 6, 7, 8], &[], ChainTermination::EndOfChain));
        assert_eq!(result.fragmentation, 0.0);
        assert!(!result.is_corrupted);
        assert!(result.corrupted_clusters.is_empty());
    }

    #[test]
    fn test_single_cluster_has_no_fragmentation() {
        let result = CorruptionScorer::new(10).score(&chain(&[5], &[], ChainTermination::EndOfChain));
        assert_eq!(result.fragmentation, 0.0);
        assert!(!result.is_corrupted);
    }

    #[test]
    fn test_one_loop() {
        let result = CorruptionScorer::new(10).score(&chain(&[5, 6, 7], &[5], ChainTermination::Looped));
        assert_eq!(result.repeated_clusters, 1);
        assert!(result.is_corrupted);
        assert_eq!(result.corrupted_clusters, vec![5]);
    }

    #[test]
    fn test_back_jump() {
        let result = CorruptionScorer::new(10).score(&chain(&[20, 21, 15, 16], &[], ChainTermination::EndOfChain));
        assert_eq!(result.back_jumps, 1);
        assert_eq!(result.large_gaps, 0);
        assert!(result.is_corrupted);
        assert_eq!(result.corrupted_clusters, vec![15]);
        assert!((result.fragmentation - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_large_gap_forward() {
        let result = CorruptionScorer::new(10).score(&chain(&[5, 6, 50], &[], ChainTermination::EndOfChain));
        assert_eq!(result.back_jumps, 0);
        assert_eq!(result.large_gaps, 1);
        assert_eq!(result.corrupted_clusters, vec![50]);
        assert_eq!(result.fragmentation, 0.5);
    }

    #[test]
    fn test_small_forward_skip_only_fragments() {
        let result = CorruptionScorer::new(10).score(&chain(&[5, 8, 9], &[], ChainTermination::EndOfChain));
        assert!(!result.is_corrupted);
        assert_eq!(result.fragmentation, 0.5);
    }

    #[test]
    fn test_abnormal_termination_is_corrupt() {
        let result = CorruptionScorer::new(10).score(&chain(&[5, 6], &[], ChainTermination::Truncated));
        assert!(result.is_corrupted);
        assert_eq!(result.anomalies(), 0);
    }

    #[test]
    fn test_threshold_from_geometry() {
        let geometry = FilesystemGeometry {
            bytes_per_sector: 512,
            sectors_per_cluster: 1,
            reserved_sectors: 1,
            num_fats: 1,
            fat_size: 1,
            root_cluster: 2,
            total_sectors: 1002,
            fat_start_sector: 1,
            data_start_sector: 2,
            cluster_count: 1000,
        };
        assert_eq!(CorruptionScorer::for_geometry(&geometry, 0.1).large_gap_threshold(), 100);
        assert_eq!(CorruptionScorer::for_geometry(&geometry, 0.0).large_gap_threshold(), 1);
    }
}
