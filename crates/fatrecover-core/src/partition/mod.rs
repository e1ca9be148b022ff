/// Partition scheme detection and partition enumeration
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod gpt;
pub mod mbr;

pub use gpt::{extract_gpt_partitions, GptHeader, GptPartitionEntry};
pub use mbr::{extract_mbr_partitions, Mbr, MbrPartitionEntry};

use crate::device::SectorSource;
use crate::error::{RecoveryError, Result};
use crate::FilesystemType;

/// MBR type codes this tool recognizes
pub const MBR_TYPE_FAT32_CHS: u8 = 0x0B;
pub const MBR_TYPE_FAT32_LBA: u8 = 0x0C;
pub const MBR_TYPE_FAT32_CHS_HIDDEN: u8 = 0x1B;
pub const MBR_TYPE_FAT32_LBA_HIDDEN: u8 = 0x1C;
pub const MBR_TYPE_NTFS_EXFAT: u8 = 0x07;
pub const MBR_TYPE_LINUX: u8 = 0x83;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionScheme {
    Mbr,
    Gpt,
    Unknown,
}

impl std::fmt::Display for PartitionScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionScheme::Mbr => write!(f, "MBR"),
            PartitionScheme::Gpt => write!(f, "GPT"),
            PartitionScheme::Unknown => write!(f, "unknown"),
        }
    }
}

/// Raw partition type as declared by the table
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionTypeId {
    Mbr(u8),
    Gpt(Uuid),
}

impl std::fmt::Display for PartitionTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionTypeId::Mbr(code) => write!(f, "0x{:02X}", code),
            PartitionTypeId::Gpt(guid) => write!(f, "{}", guid),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionEntry {
    Mbr(MbrPartitionEntry),
    Gpt(GptPartitionEntry),
}

impl PartitionEntry {
    pub fn start_lba(&self) -> u64 {
        match self {
            PartitionEntry::Mbr(p) => p.start_lba as u64,
            PartitionEntry::Gpt(p) => p.starting_lba,
        }
    }

    pub fn sector_count(&self) -> u64 {
        match self {
            PartitionEntry::Mbr(p) => p.total_sectors as u64,
            PartitionEntry::Gpt(p) => p.sector_count(),
        }
    }

    pub fn end_lba(&self) -> u64 {
        match self {
            PartitionEntry::Mbr(p) => (p.start_lba as u64 + p.total_sectors as u64).saturating_sub(1),
            PartitionEntry::Gpt(p) => p.ending_lba,
        }
    }

    pub fn type_id(&self) -> PartitionTypeId {
        match self {
            PartitionEntry::Mbr(p) => PartitionTypeId::Mbr(p.partition_type),
            PartitionEntry::Gpt(p) => PartitionTypeId::Gpt(p.partition_type_guid),
        }
    }

    /// Filesystem suggested by the partition type; the boot sector decides
    pub fn declared_filesystem(&self) -> FilesystemType {
        match self.type_id() {
            PartitionTypeId::Mbr(
                MBR_TYPE_FAT32_CHS
                | MBR_TYPE_FAT32_LBA
                | MBR_TYPE_FAT32_CHS_HIDDEN
                | MBR_TYPE_FAT32_LBA_HIDDEN,
            ) => FilesystemType::Fat32,
            PartitionTypeId::Mbr(MBR_TYPE_NTFS_EXFAT) => FilesystemType::Ntfs,
            PartitionTypeId::Mbr(MBR_TYPE_LINUX) => FilesystemType::Ext4,
            PartitionTypeId::Mbr(_) => FilesystemType::Unknown,
            PartitionTypeId::Gpt(guid)
                if guid == gpt::GUID_BASIC_DATA || guid == gpt::GUID_EFI_SYSTEM =>
            {
                FilesystemType::Fat32
            }
            PartitionTypeId::Gpt(guid) if guid == gpt::GUID_LINUX_FILESYSTEM => {
                FilesystemType::Ext4
            }
            PartitionTypeId::Gpt(_) => FilesystemType::Unknown,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            PartitionEntry::Gpt(p) if !p.partition_name.is_empty() => Some(&p.partition_name),
            _ => None,
        }
    }
}

/// Result of probing sectors 0 and 1
#[derive(Debug, Clone)]
pub struct SchemeDetection {
    pub scheme: PartitionScheme,
    pub mbr: Option<Mbr>,
    pub gpt: Option<GptHeader>,
}

/// Determine the partition scheme of a physical drive
///
/// Both tables are read; GPT wins when both validate, since a GPT disk
/// carries a protective MBR.
pub fn detect_scheme<S: SectorSource>(source: &mut S) -> Result<SchemeDetection> {
    let bytes_per_sector = source.bytes_per_sector()?.max(mbr::MBR_SIZE as u32);
    let mut sector = vec![0u8; bytes_per_sector as usize];

    source.read_sector(0, &mut sector)?;
    let mbr = Mbr::parse(&sector)?;

    let gpt = match source.read_sector(gpt::GPT_HEADER_LBA, &mut sector) {
        Ok(()) => Some(GptHeader::parse(&sector)?),
        Err(e) => {
            tracing::debug!("No readable GPT header: {}", e);
            None
        }
    };

    let gpt_valid = gpt.as_ref().map(|h| h.is_valid()).unwrap_or(false);
    let scheme = if gpt_valid {
        if let Some(header) = &gpt {
            if !header.header_crc_valid {
                tracing::warn!("GPT header CRC mismatch; using it anyway");
            }
        }
        if mbr.is_valid() && !mbr.is_protective() {
            tracing::warn!("Both a non-protective MBR and a GPT validate; using GPT");
        }
        PartitionScheme::Gpt
    } else if mbr.is_valid() {
        if mbr.is_protective() {
            tracing::warn!("Protective MBR found but the GPT header does not validate");
        }
        PartitionScheme::Mbr
    } else {
        PartitionScheme::Unknown
    };

    tracing::info!("Partition scheme: {}", scheme);

    Ok(SchemeDetection {
        scheme,
        mbr: Some(mbr),
        gpt,
    })
}

/// List the partitions of a drive whose scheme is detected
pub fn list_partitions<S: SectorSource>(
    source: &mut S,
    detected: &SchemeDetection,
) -> Result<Vec<PartitionEntry>> {
    match (detected.scheme, &detected.mbr, &detected.gpt) {
        (PartitionScheme::Gpt, _, Some(header)) => {
            let bytes_per_sector = source.bytes_per_sector()?;
            Ok(extract_gpt_partitions(source, header, bytes_per_sector)?
                .into_iter()
                .map(PartitionEntry::Gpt)
                .collect())
        }
        (PartitionScheme::Mbr, Some(mbr), _) => Ok(extract_mbr_partitions(mbr)
            .into_iter()
            .map(PartitionEntry::Mbr)
            .collect()),
        _ => Err(RecoveryError::UnknownPartitionScheme),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemorySectorSource;

    fn image_with(mbr_valid: bool, gpt_valid: bool) -> MemorySectorSource {
        let mut data = vec![0u8; 512 * 4];
        if mbr_valid {
            data[510] = 0x55;
            data[511] = 0xAA;
        }
        if gpt_valid {
            data[512..520].copy_from_slice(gpt::GPT_SIGNATURE);
        }
        MemorySectorSource::new(data, 512)
    }

    #[test]
    fn test_scheme_precedence() {
        let cases = [
            (true, true, PartitionScheme::Gpt),
            (false, true, PartitionScheme::Gpt),
            (true, false, PartitionScheme::Mbr),
            (false, false, PartitionScheme::Unknown),
        ];
        for (mbr_valid, gpt_valid, expected) in cases {
            let mut source = image_with(mbr_valid, gpt_valid);
            let detected = detect_scheme(&mut source).unwrap();
            assert_eq!(detected.scheme, expected, "mbr={mbr_valid} gpt={gpt_valid}");
        }
    }

    #[test]
    fn test_unknown_scheme_has_no_partitions() {
        let mut source = image_with(false, false);
        let detected = detect_scheme(&mut source).unwrap();
        assert!(matches!(
            list_partitions(&mut source, &detected),
            Err(RecoveryError::UnknownPartitionScheme)
        ));
    }

    #[test]
    fn test_declared_filesystems() {
        let mbr_entry = |ptype| {
            PartitionEntry::Mbr(MbrPartitionEntry {
                boot_indicator: 0,
                start_chs: mbr::Chs { head: 0, sector: 0, cylinder: 0 },
                partition_type: ptype,
                end_chs: mbr::Chs { head: 0, sector: 0, cylinder: 0 },
                start_lba: 63,
                total_sectors: 100,
            })
        };
        assert_eq!(mbr_entry(0x0C).declared_filesystem(), FilesystemType::Fat32);
        assert_eq!(mbr_entry(0x0B).declared_filesystem(), FilesystemType::Fat32);
        assert_eq!(mbr_entry(0x1B).declared_filesystem(), FilesystemType::Fat32);
        assert_eq!(mbr_entry(0x1C).declared_filesystem(), FilesystemType::Fat32);
        assert_eq!(mbr_entry(0x07).declared_filesystem(), FilesystemType::Ntfs);
        assert_eq!(mbr_entry(0x83).declared_filesystem(), FilesystemType::Ext4);
        assert_eq!(mbr_entry(0x05).declared_filesystem(), FilesystemType::Unknown);
        assert_eq!(mbr_entry(0x0C).end_lba(), 162);
        assert_eq!(mbr_entry(0x0C).type_id().to_string(), "0x0C");
    }
}
