/// Per-candidate recovery status and outcome
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::chain::{ChainTermination, ClusterChain};
use super::overwrite::OverwriteAnalysis;
use super::scoring::ClusterAnalysisResult;
use crate::fs::fat32::scanner::DirectoryEntryCandidate;
use crate::FileId;

/// Result of the final write for one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryOutcome {
    /// Every byte of the declared size came from clean clusters
    Success,
    /// Some bytes recovered, but clusters were skipped or the size fell short
    Partial,
    /// Nothing could be written
    Failed,
}

impl std::fmt::Display for RecoveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryOutcome::Success => write!(f, "success"),
            RecoveryOutcome::Partial => write!(f, "partial"),
            RecoveryOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Lifecycle of a candidate within one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateState {
    Discovered,
    ChainWalked,
    Analyzed,
    Written(RecoveryOutcome),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStatus {
    pub file_id: FileId,
    pub ordinal: u64,
    pub display_name: String,
    pub declared_size: u32,
    pub start_cluster: u32,

    pub is_corrupted: bool,
    pub has_fragmented_clusters: bool,
    pub fragmentation: f64,
    pub has_back_jumps: bool,
    pub back_jumps: u32,
    pub has_repeated_clusters: bool,
    pub repeated_clusters: u32,
    pub has_large_gaps: bool,
    pub large_gaps: u32,
    pub has_overwritten_clusters: bool,
    pub has_invalid_file_name: bool,
    pub has_invalid_extension: bool,

    pub expected_clusters: u32,
    pub recovered_clusters: u32,
    pub recovered_bytes: u64,
    /// Clusters left out of the output, in chain order
    pub problematic_clusters: Vec<u32>,

    pub termination: ChainTermination,
    pub inferred_clusters: u32,
    pub overwrite: OverwriteAnalysis,
    /// Rough likelihood that the output matches the original, `0.0..=1.0`
    pub recoverability: f64,
    pub state: CandidateState,
    pub outcome: RecoveryOutcome,
    pub output_path: Option<PathBuf>,
    pub sha256: Option<String>,
}

impl RecoveryStatus {
    /// Status after analysis, before any byte is read
    pub fn analyzed(
        candidate: &DirectoryEntryCandidate,
        chain: &ClusterChain,
        analysis: &ClusterAnalysisResult,
        overwrite: OverwriteAnalysis,
        expected_clusters: u32,
    ) -> Self {
        let mut problematic_clusters = Vec::new();
        for &cluster in &chain.clusters {
            if analysis.corrupted_clusters.contains(&cluster) || overwrite.is_overwritten(cluster) {
                problematic_clusters.push(cluster);
            }
        }

        Self {
            file_id: candidate.file_id,
            ordinal: candidate.ordinal,
            display_name: candidate.display_name(),
            declared_size: candidate.size,
            start_cluster: candidate.start_cluster,
            is_corrupted: analysis.is_corrupted,
            has_fragmented_clusters: analysis.fragmentation > 0.0,
            fragmentation: analysis.fragmentation,
            has_back_jumps: analysis.back_jumps > 0,
            back_jumps: analysis.back_jumps,
            has_repeated_clusters: analysis.repeated_clusters > 0,
            repeated_clusters: analysis.repeated_clusters,
            has_large_gaps: analysis.large_gaps > 0,
            large_gaps: analysis.large_gaps,
            has_overwritten_clusters: overwrite.has_overwrite,
            has_invalid_file_name: !candidate.has_valid_name(),
            has_invalid_extension: !candidate.has_valid_extension(),
            expected_clusters,
            recovered_clusters: 0,
            recovered_bytes: 0,
            problematic_clusters,
            termination: chain.termination,
            inferred_clusters: chain.inferred,
            overwrite,
            recoverability: 0.0,
            state: CandidateState::Analyzed,
            outcome: RecoveryOutcome::Failed,
            output_path: None,
            sha256: None,
        }
    }

    pub fn is_problematic(&self, cluster: u32) -> bool {
        self.problematic_clusters.contains(&cluster)
    }

    pub fn mark_problematic(&mut self, cluster: u32) {
        if !self.is_problematic(cluster) {
            self.problematic_clusters.push(cluster);
        }
    }

    /// Settle the outcome from what was actually recovered
    pub fn finish(&mut self, recovered_clusters: u32, recovered_bytes: u64, wrote_anything: bool) {
        self.recovered_clusters = recovered_clusters;
        self.recovered_bytes = recovered_bytes;

        self.outcome = if !wrote_anything {
            RecoveryOutcome::Failed
        } else if self.problematic_clusters.is_empty()
            && recovered_bytes == self.declared_size as u64
        {
            RecoveryOutcome::Success
        } else {
            RecoveryOutcome::Partial
        };

        self.recoverability = recoverability(
            self.outcome,
            self.overwrite.overwrite_percentage,
            self.fragmentation,
            self.is_corrupted,
        );
        self.state = CandidateState::Written(self.outcome);
    }
}

/// Recoverability estimate from overwrite share, fragmentation and corruption
pub fn recoverability(
    outcome: RecoveryOutcome,
    overwrite_percentage: f64,
    fragmentation: f64,
    is_corrupted: bool,
) -> f64 {
    if outcome == RecoveryOutcome::Failed {
        return 0.0;
    }

    let mut score = (1.0 - overwrite_percentage.clamp(0.0, 1.0))
        * (1.0 - fragmentation.clamp(0.0, 1.0) / 2.0);
    if is_corrupted {
        score *= 0.75;
    }
    score.clamp(0.0, 1.0)
}
