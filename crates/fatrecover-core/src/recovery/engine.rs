/// Recovery orchestration: device, partitions, and the per-partition pass
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use super::chain::{ClusterChain, ClusterChainWalker};
use super::ledger::{ClusterUsageLedger, ClusterUsageRecord, ROOT_DIRECTORY_ID};
use super::overwrite;
use super::scoring::CorruptionScorer;
use super::status::RecoveryStatus;
use crate::device::{DeviceCategory, DeviceDescriptor, SectorSource, DEFAULT_BYTES_PER_SECTOR};
use crate::error::{RecoveryError, Result};
use crate::fs::fat32::fat::FatTable;
use crate::fs::fat32::scanner::{DeletedEntryScanner, DirectoryEntryCandidate};
use crate::fs::fat32::{read_geometry, FilesystemGeometry};
use crate::output::{digest_hex, RecoveryOutput};
use crate::partition::{detect_scheme, list_partitions, PartitionEntry};
use crate::{FileId, FilesystemType, PartitionOutcome, PartitionReport, RecoveryReport};

/// Recovery engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Chains may run this factor past the declared size before truncation
    pub chain_tolerance: f64,
    /// Jumps over this share of the volume's clusters count as large gaps
    pub large_gap_fraction: f64,
    /// Follow cleared FAT entries as contiguous clusters
    pub assume_contiguous: bool,
    pub max_directory_depth: usize,
    pub max_directory_clusters: usize,
    /// Only recover entries starting at this cluster
    pub target_cluster: Option<u32>,
    /// Only recover entries of this declared size
    pub target_size: Option<u32>,
    /// Compute statuses without reading or writing file data
    pub analyze_only: bool,
    pub device_bytes_per_sector: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            chain_tolerance: 1.5,
            large_gap_fraction: 0.1,
            assume_contiguous: true,
            max_directory_depth: 32,
            max_directory_clusters: 4096,
            target_cluster: None,
            target_size: None,
            analyze_only: false,
            device_bytes_per_sector: DEFAULT_BYTES_PER_SECTOR,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryProgress {
    pub stage: RecoveryStage,
    pub candidates_found: usize,
    pub candidates_done: usize,
    pub current_operation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStage {
    Initialization,
    PartitionDiscovery,
    DirectoryScanning,
    ChainWalking,
    Analysis,
    Writing,
    Complete,
}

/// Everything one partition pass produced
#[derive(Debug, Clone)]
pub struct PassResult {
    pub geometry: FilesystemGeometry,
    pub directories_scanned: usize,
    pub entries_scanned: usize,
    pub statuses: Vec<RecoveryStatus>,
}

pub struct RecoveryEngine {
    config: RecoveryConfig,
    progress_callback: Option<Box<dyn Fn(RecoveryProgress) + Send + Sync>>,
}

impl RecoveryEngine {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            progress_callback: None,
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: Fn(RecoveryProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
    }

    fn emit_progress(&self, stage: RecoveryStage, found: usize, done: usize, operation: String) {
        if let Some(callback) = &self.progress_callback {
            callback(RecoveryProgress {
                stage,
                candidates_found: found,
                candidates_done: done,
                current_operation: operation,
            });
        }
    }

    /// Recover every FAT32 volume reachable through `source`
    pub fn recover_device<S: SectorSource>(
        &self,
        source: &mut S,
        descriptor: &DeviceDescriptor,
        output: &mut dyn RecoveryOutput,
    ) -> Result<RecoveryReport> {
        self.emit_progress(
            RecoveryStage::Initialization,
            0,
            0,
            format!("Opening {}", descriptor.path.display()),
        );
        if !source.is_open() {
            source.reopen()?;
        }

        let mut report = match descriptor.category {
            DeviceCategory::Logical => self.recover_logical(source, descriptor, output)?,
            DeviceCategory::Physical => self.recover_physical(source, descriptor, output)?,
        };
        report.finish();

        self.emit_progress(
            RecoveryStage::Complete,
            report.totals.candidates,
            report.totals.candidates,
            "Recovery complete".to_string(),
        );
        tracing::info!(
            "Session {}: {} candidates, {} recovered, {} partial, {} failed",
            report.session_id,
            report.totals.candidates,
            report.totals.succeeded,
            report.totals.partial,
            report.totals.failed
        );

        Ok(report)
    }

    fn recover_logical<S: SectorSource>(
        &self,
        source: &mut S,
        descriptor: &DeviceDescriptor,
        output: &mut dyn RecoveryOutput,
    ) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::new(descriptor.clone());
        let mut partition = PartitionReport::new(0, source.start_lba(), FilesystemType::Unknown);

        let geometry = self.geometry_or_skip(source, &mut partition)?;
        source.close();
        if let Some(geometry) = geometry {
            source.reopen()?;
            partition.declared_filesystem = FilesystemType::Fat32;
            partition.sector_count = geometry.total_sectors;
            self.record_pass(source, geometry, &mut partition, output)?;
        }

        report.partitions.push(partition);
        Ok(report)
    }

    fn recover_physical<S: SectorSource>(
        &self,
        source: &mut S,
        descriptor: &DeviceDescriptor,
        output: &mut dyn RecoveryOutput,
    ) -> Result<RecoveryReport> {
        self.emit_progress(
            RecoveryStage::PartitionDiscovery,
            0,
            0,
            "Reading partition table".to_string(),
        );
        let detected = detect_scheme(source)?;
        let partitions = list_partitions(source, &detected)?;
        source.close();

        tracing::info!("{} partition(s) on {} disk", partitions.len(), detected.scheme);
        let mut report = RecoveryReport::new(descriptor.clone().with_scheme(detected.scheme));

        for (index, entry) in partitions.iter().enumerate() {
            let partition = self.recover_partition(source, index, entry, output)?;
            report.partitions.push(partition);
        }

        Ok(report)
    }

    fn recover_partition<S: SectorSource>(
        &self,
        source: &mut S,
        index: usize,
        entry: &PartitionEntry,
        output: &mut dyn RecoveryOutput,
    ) -> Result<PartitionReport> {
        let declared = entry.declared_filesystem();
        let mut partition = PartitionReport::new(index, entry.start_lba(), declared);
        partition.sector_count = entry.sector_count();
        partition.name = entry.name().map(str::to_string);

        if declared != FilesystemType::Fat32 {
            tracing::warn!(
                "Partition {} at LBA {}: declared {}, skipping",
                index,
                entry.start_lba(),
                declared
            );
            partition.outcome = PartitionOutcome::Skipped(format!("declared {} partition", declared));
            return Ok(partition);
        }

        source.set_start_lba(entry.start_lba());
        source.reopen()?;
        let geometry = self.geometry_or_skip(source, &mut partition)?;
        if let Some(geometry) = geometry {
            self.record_pass(source, geometry, &mut partition, output)?;
        }
        source.close();

        Ok(partition)
    }

    /// Geometry of the volume at sector 0, or `None` with the partition marked skipped
    fn geometry_or_skip<S: SectorSource>(
        &self,
        source: &mut S,
        partition: &mut PartitionReport,
    ) -> Result<Option<FilesystemGeometry>> {
        match read_geometry(source, 0) {
            Ok(geometry) => Ok(Some(geometry)),
            Err(e) if e.is_partition_local() => {
                tracing::warn!(
                    "Partition {} at LBA {} skipped: {}",
                    partition.index,
                    partition.start_lba,
                    e
                );
                partition.outcome = PartitionOutcome::Skipped(e.to_string());
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn record_pass<S: SectorSource>(
        &self,
        source: &mut S,
        geometry: FilesystemGeometry,
        partition: &mut PartitionReport,
        output: &mut dyn RecoveryOutput,
    ) -> Result<()> {
        match self.run_pass(source, partition.index, geometry, output) {
            Ok(pass) => {
                partition.geometry = Some(pass.geometry);
                partition.directories_scanned = pass.directories_scanned;
                partition.entries_scanned = pass.entries_scanned;
                partition.statuses = pass.statuses;
                partition.outcome = PartitionOutcome::Recovered;
                Ok(())
            }
            Err(e @ (RecoveryError::Output(_) | RecoveryError::Io(_))) => Err(e),
            Err(e) => {
                tracing::warn!("Partition {} pass aborted: {}", partition.index, e);
                partition.geometry = Some(geometry);
                partition.outcome = PartitionOutcome::Skipped(e.to_string());
                Ok(())
            }
        }
    }

    fn matches_filters(&self, candidate: &DirectoryEntryCandidate) -> bool {
        self.config
            .target_cluster
            .map_or(true, |cluster| candidate.start_cluster == cluster)
            && self
                .config
                .target_size
                .map_or(true, |size| candidate.size == size)
    }

    fn walker(&self) -> ClusterChainWalker {
        ClusterChainWalker {
            chain_tolerance: self.config.chain_tolerance,
            assume_contiguous: self.config.assume_contiguous,
            max_directory_clusters: self.config.max_directory_clusters,
        }
    }

    /// One scan/walk/analyze/write pass over a single FAT32 volume
    ///
    /// All chains are walked into a fresh ledger before any candidate is
    /// analyzed, so every overwrite decision sees every claim. The root
    /// directory has no entry of its own and is claimed first as a live
    /// owner. `partition` names the volume to the output.
    pub fn run_pass<S: SectorSource>(
        &self,
        source: &mut S,
        partition: usize,
        geometry: FilesystemGeometry,
        output: &mut dyn RecoveryOutput,
    ) -> Result<PassResult> {
        let mut fat = FatTable::new(geometry);

        self.emit_progress(
            RecoveryStage::DirectoryScanning,
            0,
            0,
            format!("Scanning directories from cluster {}", geometry.root_cluster),
        );
        let scanner = DeletedEntryScanner::new(
            geometry,
            self.config.max_directory_depth,
            self.config.max_directory_clusters,
        );
        let scan = scanner.scan(source, &mut fat, geometry.root_cluster)?;

        let mut entries: Vec<&DirectoryEntryCandidate> = scan.entries.iter().collect();
        entries.sort_by_key(|entry| entry.ordinal);
        let candidates: Vec<&DirectoryEntryCandidate> = entries
            .iter()
            .copied()
            .filter(|entry| entry.is_recovery_candidate() && self.matches_filters(entry))
            .collect();
        let found = candidates.len();

        self.emit_progress(
            RecoveryStage::ChainWalking,
            found,
            0,
            format!("Walking {} cluster chains", entries.len()),
        );
        let walker = self.walker();
        let mut ledger = ClusterUsageLedger::new();
        let mut chains: HashMap<FileId, ClusterChain> = HashMap::new();
        let root_chain = fat.live_chain(
            source,
            geometry.root_cluster,
            self.config.max_directory_clusters,
        )?;
        let cluster_size = geometry.cluster_size() as u64;
        for (index, &cluster) in root_chain.iter().enumerate() {
            ledger.claim(ClusterUsageRecord {
                cluster,
                file_id: ROOT_DIRECTORY_ID,
                ordinal: 0,
                deleted: false,
                write_offset: index as u64 * cluster_size,
            });
        }
        for entry in &entries {
            let chain = walker.walk(source, &mut fat, &mut ledger, entry);
            if entry.is_recovery_candidate() {
                chains.insert(entry.file_id, chain);
            }
        }
        tracing::debug!(
            "Ledger: {} claims over {} clusters, {} contended",
            ledger.total_claims(),
            ledger.cluster_count(),
            ledger.contended_clusters().count()
        );

        self.emit_progress(
            RecoveryStage::Analysis,
            found,
            0,
            "Analyzing chains".to_string(),
        );
        let scorer = CorruptionScorer::for_geometry(&geometry, self.config.large_gap_fraction);
        let mut planned = Vec::with_capacity(found);
        for candidate in &candidates {
            let Some(chain) = chains.remove(&candidate.file_id) else {
                continue;
            };
            let expected = geometry.clusters_for_size(candidate.size as u64);
            let analysis = scorer.score(&chain);
            let overwrite = overwrite::analyze(&ledger, &chain, candidate.ordinal, expected);
            let status = RecoveryStatus::analyzed(candidate, &chain, &analysis, overwrite, expected);
            planned.push((*candidate, chain, status));
        }

        let mut statuses = Vec::with_capacity(planned.len());
        for (done, (candidate, chain, mut status)) in planned.into_iter().enumerate() {
            self.emit_progress(
                RecoveryStage::Writing,
                found,
                done,
                format!("Recovering {}", status.display_name),
            );
            self.write_candidate(
                source,
                partition,
                &geometry,
                candidate,
                &chain,
                &mut status,
                output,
            )?;
            statuses.push(status);
        }

        tracing::info!(
            "Pass complete: {} entries, {} candidates recovered or analyzed",
            scan.entries.len(),
            statuses.len()
        );

        Ok(PassResult {
            geometry,
            directories_scanned: scan.directories_scanned,
            entries_scanned: scan.entries.len(),
            statuses,
        })
    }

    /// Stream the clean clusters of one candidate to the output
    ///
    /// The output file is begun at the first readable cluster, so a
    /// candidate with nothing recoverable leaves no file behind.
    #[allow(clippy::too_many_arguments)]
    fn write_candidate<S: SectorSource>(
        &self,
        source: &mut S,
        partition: usize,
        geometry: &FilesystemGeometry,
        candidate: &DirectoryEntryCandidate,
        chain: &ClusterChain,
        status: &mut RecoveryStatus,
        output: &mut dyn RecoveryOutput,
    ) -> Result<()> {
        let cluster_size = geometry.cluster_size() as u64;
        let size = candidate.size as u64;
        let analyze_only = self.config.analyze_only;

        let mut buffer = vec![0u8; cluster_size as usize];
        let mut hasher = Sha256::new();
        let mut begun = false;
        let mut recovered_clusters = 0u32;
        let mut recovered_bytes = 0u64;

        for (index, &cluster) in chain.clusters.iter().enumerate() {
            let offset = index as u64 * cluster_size;
            if offset >= size {
                break;
            }
            if status.is_problematic(cluster) {
                continue;
            }

            let take = (size - offset).min(cluster_size) as usize;
            if !analyze_only {
                if let Err(e) = read_cluster(source, geometry, cluster, &mut buffer) {
                    tracing::warn!(
                        "File {}: cluster {} unreadable, skipped: {}",
                        candidate.file_id,
                        cluster,
                        e
                    );
                    status.mark_problematic(cluster);
                    continue;
                }
                if !begun {
                    output.begin(partition, candidate)?;
                    begun = true;
                }
                output.write_chunk(&buffer[..take])?;
                hasher.update(&buffer[..take]);
            }
            recovered_clusters += 1;
            recovered_bytes += take as u64;
        }

        // An empty file is fully recovered once its (clean) chain exists
        let wrote_anything = recovered_bytes > 0 || (size == 0 && !chain.is_empty());
        status.finish(recovered_clusters, recovered_bytes, wrote_anything);

        if !analyze_only && wrote_anything {
            if !begun {
                output.begin(partition, candidate)?;
            }
            status.output_path = output.finish()?;
            status.sha256 = Some(digest_hex(hasher));
        }

        tracing::debug!(
            "File {} '{}': {} of {} bytes, {}",
            candidate.file_id,
            status.display_name,
            status.recovered_bytes,
            size,
            status.outcome
        );

        Ok(())
    }
}

fn read_cluster<S: SectorSource>(
    source: &mut S,
    geometry: &FilesystemGeometry,
    cluster: u32,
    buffer: &mut [u8],
) -> Result<()> {
    let sector = geometry.cluster_to_sector(cluster);
    if !geometry.is_valid_cluster(cluster)
        || sector + geometry.sectors_per_cluster as u64 > geometry.total_sectors
    {
        return Err(RecoveryError::ChainCorruption(format!(
            "cluster {} lies outside the volume",
            cluster
        )));
    }
    source.read_sector(sector, buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RecoveryConfig::default();
        assert_eq!(config.chain_tolerance, 1.5);
        assert_eq!(config.large_gap_fraction, 0.1);
        assert!(config.assume_contiguous);
        assert_eq!(config.device_bytes_per_sector, 512);
        assert!(!config.analyze_only);
    }

    #[test]
    fn test_partial_config_json() {
        let config: RecoveryConfig =
            serde_json::from_str(r#"{"target_cluster": 9, "analyze_only": true}"#).unwrap();
        assert_eq!(config.target_cluster, Some(9));
        assert!(config.analyze_only);
        assert_eq!(config.max_directory_depth, 32);
    }

    #[test]
    fn test_filters() {
        let engine = RecoveryEngine::new(RecoveryConfig {
            target_cluster: Some(9),
            target_size: Some(100),
            ..RecoveryConfig::default()
        });
        let mut candidate = DirectoryEntryCandidate {
            file_id: 1,
            ordinal: 1,
            short_name: *b"\xE5ILE    ",
            extension: *b"BIN",
            long_name: None,
            recovered_initial: None,
            attributes: 0x20,
            start_cluster: 9,
            size: 100,
            deleted: true,
            parent_cluster: 2,
            entry_cluster: 2,
            entry_index: 0,
            modified: None,
        };
        assert!(engine.matches_filters(&candidate));
        candidate.size = 101;
        assert!(!engine.matches_filters(&candidate));
        candidate.size = 100;
        candidate.start_cluster = 10;
        assert!(!engine.matches_filters(&candidate));
    }
}
