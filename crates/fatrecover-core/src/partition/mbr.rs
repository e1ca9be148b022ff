//! Master Boot Record parsing
//!
//! Layout of sector 0:
//! - 0x000-0x1BD: bootstrap code
//! - 0x1BE-0x1FD: four 16-byte partition entries
//! - 0x1FE-0x1FF: signature 0x55 0xAA (0xAA55 little-endian)

use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::error::{RecoveryError, Result};

pub const MBR_SIZE: usize = 512;
pub const MBR_SIGNATURE: u16 = 0xAA55;
pub const PARTITION_TABLE_OFFSET: usize = 446;
pub const PARTITION_ENTRY_SIZE: usize = 16;

/// Partition type used by a protective MBR in front of a GPT
pub const TYPE_GPT_PROTECTIVE: u8 = 0xEE;

/// Cylinder/head/sector address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chs {
    pub head: u8,
    pub sector: u8,
    pub cylinder: u16,
}

impl Chs {
    fn from_bytes(bytes: [u8; 3]) -> Self {
        Chs {
            head: bytes[0],
            sector: bytes[1] & 0x3F,
            cylinder: (((bytes[1] & 0xC0) as u16) << 2) | bytes[2] as u16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MbrPartitionEntry {
    pub boot_indicator: u8,
    pub start_chs: Chs,
    pub partition_type: u8,
    pub end_chs: Chs,
    pub start_lba: u32,
    pub total_sectors: u32,
}

impl MbrPartitionEntry {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < PARTITION_ENTRY_SIZE {
            return Err(RecoveryError::InvalidPartitionTable(
                "MBR partition entry truncated".into(),
            ));
        }

        let mut cursor = Cursor::new(data);
        let boot_indicator = cursor.read_u8()?;
        let mut start_chs = [0u8; 3];
        std::io::Read::read_exact(&mut cursor, &mut start_chs)?;
        let partition_type = cursor.read_u8()?;
        let mut end_chs = [0u8; 3];
        std::io::Read::read_exact(&mut cursor, &mut end_chs)?;
        let start_lba = cursor.read_u32::<LittleEndian>()?;
        let total_sectors = cursor.read_u32::<LittleEndian>()?;

        Ok(MbrPartitionEntry {
            boot_indicator,
            start_chs: Chs::from_bytes(start_chs),
            partition_type,
            end_chs: Chs::from_bytes(end_chs),
            start_lba,
            total_sectors,
        })
    }

    pub fn is_bootable(&self) -> bool {
        self.boot_indicator == 0x80
    }

    pub fn is_present(&self) -> bool {
        self.total_sectors != 0
    }
}

#[derive(Debug, Clone)]
pub struct Mbr {
    pub partition_table: [MbrPartitionEntry; 4],
    pub signature: u16,
}

impl Mbr {
    /// Parse sector 0 of a physical drive
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < MBR_SIZE {
            return Err(RecoveryError::InvalidPartitionTable(format!(
                "MBR needs {} bytes, got {}",
                MBR_SIZE,
                data.len()
            )));
        }

        let entry = |i: usize| {
            let start = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE;
            MbrPartitionEntry::parse(&data[start..start + PARTITION_ENTRY_SIZE])
        };
        let partition_table = [entry(0)?, entry(1)?, entry(2)?, entry(3)?];
        let signature = u16::from_le_bytes([data[510], data[511]]);

        Ok(Mbr {
            partition_table,
            signature,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.signature == MBR_SIGNATURE
    }

    /// Whether any slot is the 0xEE placeholder written in front of a GPT
    pub fn is_protective(&self) -> bool {
        self.partition_table
            .iter()
            .any(|p| p.is_present() && p.partition_type == TYPE_GPT_PROTECTIVE)
    }
}

/// Non-empty partition slots, in table order
pub fn extract_mbr_partitions(mbr: &Mbr) -> Vec<MbrPartitionEntry> {
    mbr.partition_table
        .iter()
        .filter(|p| p.is_present())
        .cloned()
        .collect()
}
