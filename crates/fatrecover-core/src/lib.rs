use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use uuid::Uuid;

pub mod device;
pub mod error;
pub mod fs;
pub mod output;
pub mod partition;
pub mod recovery;

// Re-export key types
pub use device::{DeviceCategory, DeviceDescriptor, DeviceSectorSource, MemorySectorSource, SectorSource};
pub use error::{RecoveryError, Result};
pub use fs::fat32::FilesystemGeometry;
pub use output::{DirectoryOutput, DiscardOutput, MemoryOutput, RecoveryOutput};
pub use partition::{PartitionEntry, PartitionScheme};
pub use recovery::{
    RecoveryConfig, RecoveryEngine, RecoveryOutcome, RecoveryProgress, RecoveryStage,
    RecoveryStatus,
};

/// Identifier of a scanned directory entry, unique within one pass
pub type FileId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilesystemType {
    Fat32,
    Ntfs,
    ExFat,
    Ext4,
    Unknown,
}

impl std::fmt::Display for FilesystemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilesystemType::Fat32 => write!(f, "FAT32"),
            FilesystemType::Ntfs => write!(f, "NTFS"),
            FilesystemType::ExFat => write!(f, "exFAT"),
            FilesystemType::Ext4 => write!(f, "EXT4"),
            FilesystemType::Unknown => write!(f, "unknown"),
        }
    }
}

/// What happened to one partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PartitionOutcome {
    Recovered,
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionReport {
    pub index: usize,
    pub start_lba: u64,
    pub sector_count: u64,
    pub declared_filesystem: FilesystemType,
    pub name: Option<String>,
    pub outcome: PartitionOutcome,
    pub geometry: Option<FilesystemGeometry>,
    pub directories_scanned: usize,
    pub entries_scanned: usize,
    pub statuses: Vec<RecoveryStatus>,
}

impl PartitionReport {
    pub fn new(index: usize, start_lba: u64, declared_filesystem: FilesystemType) -> Self {
        Self {
            index,
            start_lba,
            sector_count: 0,
            declared_filesystem,
            name: None,
            outcome: PartitionOutcome::Skipped("not scanned".to_string()),
            geometry: None,
            directories_scanned: 0,
            entries_scanned: 0,
            statuses: Vec::new(),
        }
    }

    pub fn is_recovered(&self) -> bool {
        self.outcome == PartitionOutcome::Recovered
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryTotals {
    pub partitions_recovered: usize,
    pub partitions_skipped: usize,
    pub candidates: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
    pub recovered_bytes: u64,
}

/// Results of one run over one device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub descriptor: DeviceDescriptor,
    pub partitions: Vec<PartitionReport>,
    pub totals: RecoveryTotals,
}

impl RecoveryReport {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            descriptor,
            partitions: Vec::new(),
            totals: RecoveryTotals::default(),
        }
    }

    /// Compute totals and stamp the end time
    pub fn finish(&mut self) {
        let mut totals = RecoveryTotals::default();
        for partition in &self.partitions {
            if partition.is_recovered() {
                totals.partitions_recovered += 1;
            } else {
                totals.partitions_skipped += 1;
            }
            for status in &partition.statuses {
                totals.candidates += 1;
                totals.recovered_bytes += status.recovered_bytes;
                match status.outcome {
                    RecoveryOutcome::Success => totals.succeeded += 1,
                    RecoveryOutcome::Partial => totals.partial += 1,
                    RecoveryOutcome::Failed => totals.failed += 1,
                }
            }
        }
        self.totals = totals;
        self.finished_at = Some(Utc::now());
    }

    pub fn statuses(&self) -> impl Iterator<Item = &RecoveryStatus> {
        self.partitions.iter().flat_map(|p| p.statuses.iter())
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .map_err(|e| RecoveryError::Output(format!("{}: {}", path.display(), e)))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|e| RecoveryError::Output(e.to_string()))?;
        writer.flush()?;
        tracing::info!("Report saved to {}", path.display());
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| RecoveryError::Output(e.to_string()))
    }
}

/// Open the device named by `descriptor` and run a full recovery
pub fn recover_device(
    descriptor: &DeviceDescriptor,
    config: RecoveryConfig,
    output: &mut dyn RecoveryOutput,
) -> Result<RecoveryReport> {
    tracing::info!(
        "Starting recovery on {} ({})",
        descriptor.path.display(),
        descriptor.category
    );
    let mut source = DeviceSectorSource::open(descriptor, config.device_bytes_per_sector)?;
    RecoveryEngine::new(config).recover_device(&mut source, descriptor, output)
}
