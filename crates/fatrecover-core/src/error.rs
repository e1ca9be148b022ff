/// Error taxonomy for device classification and recovery
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Drive specification matched neither a physical nor a logical pattern
    #[error("Invalid drive specification: {0}")]
    InvalidDriveSpec(String),

    /// Device could not be opened or its geometry queried
    #[error("Device unreadable: {0}")]
    DeviceUnreadable(String),

    /// Neither an MBR nor a GPT validated on the device
    #[error("Partition is neither MBR nor GPT")]
    UnknownPartitionScheme,

    /// Boot sector parsed but the filesystem is not FAT32
    #[error("Unsupported file system: {0}")]
    UnsupportedFilesystem(String),

    #[error("Invalid boot sector: {0}")]
    InvalidBootSector(String),

    #[error("Invalid partition table: {0}")]
    InvalidPartitionTable(String),

    /// Non-fatal chain anomaly; normally folded into a recovery status
    #[error("Cluster chain corruption: {0}")]
    ChainCorruption(String),

    #[error("Cannot read sector {sector}")]
    SectorReadFailure { sector: u64 },

    #[error("Output error: {0}")]
    Output(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecoveryError {
    /// Whether the error only affects the current partition
    pub fn is_partition_local(&self) -> bool {
        matches!(
            self,
            RecoveryError::UnsupportedFilesystem(_) | RecoveryError::InvalidBootSector(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RecoveryError>;
