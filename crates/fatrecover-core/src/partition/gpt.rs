//! GUID Partition Table parsing
//!
//! The header lives at LBA 1. Entries start at `partition_entry_lba` and are
//! packed `bytes_per_sector / entry_size` per sector.

use byteorder::{LittleEndian, ReadBytesExt};
use encoding_rs::UTF_16LE;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use uuid::Uuid;

use crate::device::SectorSource;
use crate::error::{RecoveryError, Result};

pub const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";
pub const GPT_HEADER_LBA: u64 = 1;
pub const GPT_HEADER_MIN_SIZE: usize = 92;
pub const GPT_ENTRY_MIN_SIZE: u32 = 128;

/// Upper bound on entry slots read from a header
pub const GPT_MAX_ENTRIES: u32 = 16384;

/// Microsoft basic data partition (FAT, exFAT and NTFS volumes)
pub const GUID_BASIC_DATA: Uuid = Uuid::from_u128(0xEBD0A0A2_B9E5_4433_87C0_68B6B72699C7);
/// EFI system partition (always FAT)
pub const GUID_EFI_SYSTEM: Uuid = Uuid::from_u128(0xC12A7328_F81F_11D2_BA4B_00A0C93EC93B);
/// Linux filesystem data
pub const GUID_LINUX_FILESYSTEM: Uuid = Uuid::from_u128(0x0FC63DAF_8483_4772_8E79_3D69D8477DE4);

#[derive(Debug, Clone)]
pub struct GptHeader {
    pub signature: [u8; 8],
    pub revision: u32,
    pub header_size: u32,
    pub header_crc32: u32,
    pub current_lba: u64,
    pub backup_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub disk_guid: Uuid,
    pub partition_entry_lba: u64,
    pub number_of_entries: u32,
    pub size_of_entry: u32,
    pub partition_entry_array_crc32: u32,
    /// Whether `header_crc32` matches the header bytes
    pub header_crc_valid: bool,
}

impl GptHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < GPT_HEADER_MIN_SIZE {
            return Err(RecoveryError::InvalidPartitionTable(
                "GPT header truncated".into(),
            ));
        }

        let mut cursor = Cursor::new(data);
        let mut signature = [0u8; 8];
        std::io::Read::read_exact(&mut cursor, &mut signature)?;
        let revision = cursor.read_u32::<LittleEndian>()?;
        let header_size = cursor.read_u32::<LittleEndian>()?;
        let header_crc32 = cursor.read_u32::<LittleEndian>()?;
        let _reserved = cursor.read_u32::<LittleEndian>()?;
        let current_lba = cursor.read_u64::<LittleEndian>()?;
        let backup_lba = cursor.read_u64::<LittleEndian>()?;
        let first_usable_lba = cursor.read_u64::<LittleEndian>()?;
        let last_usable_lba = cursor.read_u64::<LittleEndian>()?;
        let mut guid = [0u8; 16];
        std::io::Read::read_exact(&mut cursor, &mut guid)?;
        let partition_entry_lba = cursor.read_u64::<LittleEndian>()?;
        let number_of_entries = cursor.read_u32::<LittleEndian>()?;
        let size_of_entry = cursor.read_u32::<LittleEndian>()?;
        let partition_entry_array_crc32 = cursor.read_u32::<LittleEndian>()?;

        let header_crc_valid = header_checksum(data, header_size as usize)
            .map(|crc| crc == header_crc32)
            .unwrap_or(false);

        Ok(GptHeader {
            signature,
            revision,
            header_size,
            header_crc32,
            current_lba,
            backup_lba,
            first_usable_lba,
            last_usable_lba,
            disk_guid: Uuid::from_bytes_le(guid),
            partition_entry_lba,
            number_of_entries,
            size_of_entry,
            partition_entry_array_crc32,
            header_crc_valid,
        })
    }

    pub fn is_valid(&self) -> bool {
        &self.signature == GPT_SIGNATURE
    }
}

/// CRC32 of the header with its own checksum field zeroed
fn header_checksum(data: &[u8], header_size: usize) -> Option<u32> {
    if !(GPT_HEADER_MIN_SIZE..=data.len()).contains(&header_size) {
        return None;
    }
    let mut header = data[..header_size].to_vec();
    header[16..20].fill(0);
    Some(crc32fast::hash(&header))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GptPartitionEntry {
    pub partition_type_guid: Uuid,
    pub unique_partition_guid: Uuid,
    pub starting_lba: u64,
    pub ending_lba: u64,
    pub attributes: u64,
    pub partition_name: String,
}

impl GptPartitionEntry {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < GPT_ENTRY_MIN_SIZE as usize {
            return Err(RecoveryError::InvalidPartitionTable(
                "GPT partition entry truncated".into(),
            ));
        }

        let mut cursor = Cursor::new(data);
        let mut type_guid = [0u8; 16];
        std::io::Read::read_exact(&mut cursor, &mut type_guid)?;
        let mut unique_guid = [0u8; 16];
        std::io::Read::read_exact(&mut cursor, &mut unique_guid)?;
        let starting_lba = cursor.read_u64::<LittleEndian>()?;
        let ending_lba = cursor.read_u64::<LittleEndian>()?;
        let attributes = cursor.read_u64::<LittleEndian>()?;

        Ok(GptPartitionEntry {
            partition_type_guid: Uuid::from_bytes_le(type_guid),
            unique_partition_guid: Uuid::from_bytes_le(unique_guid),
            starting_lba,
            ending_lba,
            attributes,
            partition_name: decode_partition_name(&data[56..128]),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.partition_type_guid.is_nil()
    }

    pub fn sector_count(&self) -> u64 {
        if self.ending_lba < self.starting_lba {
            0
        } else {
            self.ending_lba - self.starting_lba + 1
        }
    }
}

/// Decode the 36 UTF-16LE code units of a partition name, stopping at NUL
fn decode_partition_name(data: &[u8]) -> String {
    let end = data
        .chunks_exact(2)
        .position(|unit| unit[0] == 0 && unit[1] == 0)
        .map(|units| units * 2)
        .unwrap_or(data.len());
    let (decoded, _, _) = UTF_16LE.decode(&data[..end]);
    decoded.into_owned()
}

/// Read every non-empty entry of the partition entry array
///
/// Reads whole sectors; an entry never straddles a sector boundary because
/// the entry size must divide the sector size.
pub fn extract_gpt_partitions<S: SectorSource>(
    source: &mut S,
    header: &GptHeader,
    bytes_per_sector: u32,
) -> Result<Vec<GptPartitionEntry>> {
    let entry_size = header.size_of_entry;
    if entry_size < GPT_ENTRY_MIN_SIZE || bytes_per_sector % entry_size != 0 {
        return Err(RecoveryError::InvalidPartitionTable(format!(
            "entry size {} incompatible with {}-byte sectors",
            entry_size, bytes_per_sector
        )));
    }
    if header.number_of_entries > GPT_MAX_ENTRIES {
        return Err(RecoveryError::InvalidPartitionTable(format!(
            "{} partition entries exceeds limit of {}",
            header.number_of_entries, GPT_MAX_ENTRIES
        )));
    }

    let entries_per_sector = bytes_per_sector / entry_size;
    let mut sector_buffer = vec![0u8; bytes_per_sector as usize];
    let mut hasher = crc32fast::Hasher::new();
    let mut partitions = Vec::new();

    let mut index = 0u32;
    while index < header.number_of_entries {
        let lba = header.partition_entry_lba + (index / entries_per_sector) as u64;
        source.read_sector(lba, &mut sector_buffer)?;

        for slot in 0..entries_per_sector {
            if index + slot >= header.number_of_entries {
                break;
            }
            let start = (slot * entry_size) as usize;
            let raw = &sector_buffer[start..start + entry_size as usize];
            hasher.update(raw);

            let entry = GptPartitionEntry::parse(raw)?;
            if !entry.is_empty() {
                tracing::debug!(
                    "GPT entry {}: type {} LBA {}-{} '{}'",
                    index + slot,
                    entry.partition_type_guid,
                    entry.starting_lba,
                    entry.ending_lba,
                    entry.partition_name
                );
                partitions.push(entry);
            }
        }

        index += entries_per_sector;
    }

    let crc = hasher.finalize();
    if crc != header.partition_entry_array_crc32 {
        tracing::warn!(
            "GPT partition entry array CRC mismatch: stored 0x{:08X}, computed 0x{:08X}",
            header.partition_entry_array_crc32,
            crc
        );
    }

    Ok(partitions)
}
