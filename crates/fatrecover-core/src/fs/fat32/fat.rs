//! FAT32 File Allocation Table access
//!
//! Each entry is 4 bytes; only the low 28 bits are significant.
//!
//! FAT Entry Values (after masking):
//! - 0x0000000: Free cluster (also what a deleted file's entries become)
//! - 0x0000001: Reserved
//! - 0x0000002-0xFFFFFF6: Next cluster in chain
//! - 0xFFFFFF7: Bad cluster
//! - 0xFFFFFF8-0xFFFFFFF: End of chain

use byteorder::{ByteOrder, LittleEndian};

use super::FilesystemGeometry;
use crate::device::SectorSource;
use crate::error::Result;

pub const FAT_ENTRY_SIZE: u64 = 4;
pub const FAT_ENTRY_MASK: u32 = 0x0FFF_FFFF;

/// Special FAT entry values
pub const FAT_ENTRY_FREE: u32 = 0x0000_0000;
pub const FAT_ENTRY_RESERVED: u32 = 0x0000_0001;
pub const FAT_ENTRY_BAD: u32 = 0x0FFF_FFF7;
pub const FAT_ENTRY_EOC_MIN: u32 = 0x0FFF_FFF8; // End of chain minimum

/// Decoded FAT entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatEntry {
    Free,
    Reserved,
    /// Link to another cluster; not yet checked against the volume size
    Next(u32),
    Bad,
    EndOfChain,
}

impl FatEntry {
    pub fn from_raw(raw: u32) -> Self {
        match raw & FAT_ENTRY_MASK {
            FAT_ENTRY_FREE => FatEntry::Free,
            FAT_ENTRY_RESERVED => FatEntry::Reserved,
            FAT_ENTRY_BAD => FatEntry::Bad,
            value if value >= FAT_ENTRY_EOC_MIN => FatEntry::EndOfChain,
            value => FatEntry::Next(value),
        }
    }
}

/// Reads FAT entries from the first FAT copy, one sector at a time
#[derive(Debug)]
pub struct FatTable {
    geometry: FilesystemGeometry,
    cached_sector: Option<u64>,
    buffer: Vec<u8>,
}

impl FatTable {
    pub fn new(geometry: FilesystemGeometry) -> Self {
        Self {
            geometry,
            cached_sector: None,
            buffer: vec![0u8; geometry.bytes_per_sector as usize],
        }
    }

    pub fn geometry(&self) -> &FilesystemGeometry {
        &self.geometry
    }

    /// Raw, masked FAT value for `cluster`
    pub fn raw_entry<S: SectorSource>(&mut self, source: &mut S, cluster: u32) -> Result<u32> {
        let byte_offset = cluster as u64 * FAT_ENTRY_SIZE;
        let bytes_per_sector = self.geometry.bytes_per_sector as u64;
        let sector = self.geometry.fat_start_sector + byte_offset / bytes_per_sector;

        if self.cached_sector != Some(sector) {
            self.cached_sector = None;
            source.read_sector(sector, &mut self.buffer)?;
            self.cached_sector = Some(sector);
        }

        let within = (byte_offset % bytes_per_sector) as usize;
        Ok(LittleEndian::read_u32(&self.buffer[within..within + 4]) & FAT_ENTRY_MASK)
    }

    pub fn entry<S: SectorSource>(&mut self, source: &mut S, cluster: u32) -> Result<FatEntry> {
        Ok(FatEntry::from_raw(self.raw_entry(source, cluster)?))
    }

    /// Follow a live chain, stopping at anything but a valid link
    ///
    /// Used for directories, whose chains are trusted up to `limit` clusters.
    pub fn live_chain<S: SectorSource>(
        &mut self,
        source: &mut S,
        start_cluster: u32,
        limit: usize,
    ) -> Result<Vec<u32>> {
        let mut chain = Vec::new();
        let mut visited = std::collections::HashSet::new();
        let mut current = start_cluster;

        while self.geometry.is_valid_cluster(current) && chain.len() < limit {
            if !visited.insert(current) {
                tracing::warn!("FAT chain loop detected at cluster {}", current);
                break;
            }
            chain.push(current);

            match self.entry(source, current)? {
                FatEntry::Next(next) => current = next,
                _ => break,
            }
        }

        Ok(chain)
    }
}
