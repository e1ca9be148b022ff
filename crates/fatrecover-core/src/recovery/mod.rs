/// Chain reconstruction, damage analysis and the recovery pass
pub mod chain;
pub mod engine;
pub mod ledger;
pub mod overwrite;
pub mod scoring;
pub mod status;

pub use chain::{ChainOwner, ChainTermination, ClusterChain, ClusterChainWalker};
pub use engine::{PassResult, RecoveryConfig, RecoveryEngine, RecoveryProgress, RecoveryStage};
pub use ledger::{ClusterUsageLedger, ClusterUsageRecord, ROOT_DIRECTORY_ID};
pub use overwrite::OverwriteAnalysis;
pub use scoring::{ClusterAnalysisResult, CorruptionScorer};
pub use status::{recoverability, CandidateState, RecoveryOutcome, RecoveryStatus};
