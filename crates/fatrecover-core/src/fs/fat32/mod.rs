/// FAT32 file system support
use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::device::SectorSource;
use crate::error::{RecoveryError, Result};
use crate::FilesystemType;

// Sub-modules
pub mod directory;
pub mod fat;
pub mod scanner;

pub const BOOT_SECTOR_SIZE: usize = 512;
pub const BOOT_SECTOR_SIGNATURE: u16 = 0xAA55;

/// FAT32 boot sector (BIOS parameter block plus extended FAT32 fields)
#[derive(Debug, Clone)]
pub struct BootSector {
    pub jmp_boot: [u8; 3],
    pub oem_name: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sector_count: u16,
    pub num_fats: u8,
    pub root_entry_count: u16,
    pub total_sectors_16: u16,
    pub media: u8,
    pub fat_size_16: u16,
    pub sectors_per_track: u16,
    pub number_of_heads: u16,
    pub hidden_sectors: u32,
    pub total_sectors_32: u32,
    pub fat_size_32: u32,
    pub ext_flags: u16,
    pub fs_version: u16,
    pub root_cluster: u32,
    pub fs_info: u16,
    pub backup_boot_sector: u16,
    pub drive_number: u8,
    pub boot_signature: u8,
    pub volume_id: u32,
    pub volume_label: [u8; 11],
    pub file_system_type: [u8; 8],
    pub signature: u16,
}

impl BootSector {
    /// Parse a FAT32 boot sector from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < BOOT_SECTOR_SIZE {
            return Err(RecoveryError::InvalidBootSector(format!(
                "need {} bytes, got {}",
                BOOT_SECTOR_SIZE,
                data.len()
            )));
        }

        let mut cursor = Cursor::new(data);

        let mut jmp_boot = [0u8; 3];
        std::io::Read::read_exact(&mut cursor, &mut jmp_boot)?;
        let mut oem_name = [0u8; 8];
        std::io::Read::read_exact(&mut cursor, &mut oem_name)?;

        let bytes_per_sector = cursor.read_u16::<LittleEndian>()?;
        let sectors_per_cluster = cursor.read_u8()?;
        let reserved_sector_count = cursor.read_u16::<LittleEndian>()?;
        let num_fats = cursor.read_u8()?;
        let root_entry_count = cursor.read_u16::<LittleEndian>()?;
        let total_sectors_16 = cursor.read_u16::<LittleEndian>()?;
        let media = cursor.read_u8()?;
        let fat_size_16 = cursor.read_u16::<LittleEndian>()?;
        let sectors_per_track = cursor.read_u16::<LittleEndian>()?;
        let number_of_heads = cursor.read_u16::<LittleEndian>()?;
        let hidden_sectors = cursor.read_u32::<LittleEndian>()?;
        let total_sectors_32 = cursor.read_u32::<LittleEndian>()?;
        let fat_size_32 = cursor.read_u32::<LittleEndian>()?;
        let ext_flags = cursor.read_u16::<LittleEndian>()?;
        let fs_version = cursor.read_u16::<LittleEndian>()?;
        let root_cluster = cursor.read_u32::<LittleEndian>()?;
        let fs_info = cursor.read_u16::<LittleEndian>()?;
        let backup_boot_sector = cursor.read_u16::<LittleEndian>()?;

        // Skip 12 reserved bytes
        cursor.set_position(0x40);
        let drive_number = cursor.read_u8()?;
        let _reserved1 = cursor.read_u8()?;
        let boot_signature = cursor.read_u8()?;
        let volume_id = cursor.read_u32::<LittleEndian>()?;
        let mut volume_label = [0u8; 11];
        std::io::Read::read_exact(&mut cursor, &mut volume_label)?;
        let mut file_system_type = [0u8; 8];
        std::io::Read::read_exact(&mut cursor, &mut file_system_type)?;

        let signature = u16::from_le_bytes([data[510], data[511]]);

        Ok(BootSector {
            jmp_boot,
            oem_name,
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sector_count,
            num_fats,
            root_entry_count,
            total_sectors_16,
            media,
            fat_size_16,
            sectors_per_track,
            number_of_heads,
            hidden_sectors,
            total_sectors_32,
            fat_size_32,
            ext_flags,
            fs_version,
            root_cluster,
            fs_info,
            backup_boot_sector,
            drive_number,
            boot_signature,
            volume_id,
            volume_label,
            file_system_type,
            signature,
        })
    }

    /// Identify the file system from the 8-byte type label
    pub fn filesystem_type(&self) -> FilesystemType {
        match trim_label(&self.file_system_type) {
            b"FAT32" => FilesystemType::Fat32,
            b"NTFS" => FilesystemType::Ntfs,
            b"exFAT" => FilesystemType::ExFat,
            b"EXT4" => FilesystemType::Ext4,
            // NTFS and exFAT keep their identifier in the OEM field instead
            _ => match trim_label(&self.oem_name) {
                b"NTFS" => FilesystemType::Ntfs,
                b"EXFAT" => FilesystemType::ExFat,
                _ => FilesystemType::Unknown,
            },
        }
    }

    pub fn volume_label(&self) -> String {
        String::from_utf8_lossy(trim_label(&self.volume_label)).into_owned()
    }

    pub fn total_sectors(&self) -> u64 {
        if self.total_sectors_32 != 0 {
            self.total_sectors_32 as u64
        } else {
            self.total_sectors_16 as u64
        }
    }

    /// Derive the volume geometry, rejecting values that make it meaningless
    pub fn geometry(&self) -> Result<FilesystemGeometry> {
        let bps = self.bytes_per_sector as u32;
        if bps < 512 || !bps.is_power_of_two() {
            return Err(RecoveryError::InvalidBootSector(format!(
                "bytes per sector {}",
                bps
            )));
        }
        let spc = self.sectors_per_cluster as u32;
        if spc == 0 || !spc.is_power_of_two() {
            return Err(RecoveryError::InvalidBootSector(format!(
                "sectors per cluster {}",
                spc
            )));
        }
        if self.num_fats == 0 || self.fat_size_32 == 0 {
            return Err(RecoveryError::InvalidBootSector(format!(
                "{} FATs of {} sectors",
                self.num_fats, self.fat_size_32
            )));
        }

        let fat_start_sector = self.reserved_sector_count as u64;
        let data_start_sector = fat_start_sector + self.num_fats as u64 * self.fat_size_32 as u64;
        let total_sectors = self.total_sectors();
        if data_start_sector >= total_sectors {
            return Err(RecoveryError::InvalidBootSector(format!(
                "data region starts at sector {} of {}",
                data_start_sector, total_sectors
            )));
        }

        let data_clusters = (total_sectors - data_start_sector) / spc as u64;
        let fat_entries = self.fat_size_32 as u64 * bps as u64 / 4;
        let cluster_count = data_clusters.min(fat_entries.saturating_sub(2)) as u32;

        let geometry = FilesystemGeometry {
            bytes_per_sector: bps,
            sectors_per_cluster: spc,
            reserved_sectors: self.reserved_sector_count as u32,
            num_fats: self.num_fats as u32,
            fat_size: self.fat_size_32,
            root_cluster: self.root_cluster,
            total_sectors,
            fat_start_sector,
            data_start_sector,
            cluster_count,
        };

        if !geometry.is_valid_cluster(self.root_cluster) {
            return Err(RecoveryError::InvalidBootSector(format!(
                "root cluster {} outside 2..={}",
                self.root_cluster,
                geometry.max_cluster()
            )));
        }

        Ok(geometry)
    }
}

/// Cut a fixed-width label at the first space or NUL
fn trim_label(label: &[u8]) -> &[u8] {
    let end = label
        .iter()
        .position(|&b| b == b' ' || b == 0)
        .unwrap_or(label.len());
    &label[..end]
}

/// Geometry of one FAT32 volume; all cluster addressing goes through here
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemGeometry {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub reserved_sectors: u32,
    pub num_fats: u32,
    /// FAT size in sectors
    pub fat_size: u32,
    pub root_cluster: u32,
    pub total_sectors: u64,
    pub fat_start_sector: u64,
    pub data_start_sector: u64,
    /// Number of addressable data clusters
    pub cluster_count: u32,
}

impl FilesystemGeometry {
    pub fn cluster_size(&self) -> u32 {
        self.bytes_per_sector * self.sectors_per_cluster
    }

    /// Highest valid data cluster index
    pub fn max_cluster(&self) -> u32 {
        self.cluster_count.saturating_add(1)
    }

    pub fn is_valid_cluster(&self, cluster: u32) -> bool {
        (2..=self.max_cluster()).contains(&cluster)
    }

    /// First sector of a data cluster; callers validate the index first
    pub fn cluster_to_sector(&self, cluster: u32) -> u64 {
        self.data_start_sector + (cluster.saturating_sub(2) as u64) * self.sectors_per_cluster as u64
    }

    /// Clusters needed to hold `size` bytes, never less than one
    pub fn clusters_for_size(&self, size: u64) -> u32 {
        let clusters = size.div_ceil(self.cluster_size() as u64).max(1);
        clusters.min(u32::MAX as u64) as u32
    }
}

/// Read and decode the boot sector at `sector`
pub fn parse_boot_sector<S: SectorSource>(source: &mut S, sector: u64) -> Result<BootSector> {
    let bytes_per_sector = source.bytes_per_sector()?.max(BOOT_SECTOR_SIZE as u32);
    let mut buffer = vec![0u8; bytes_per_sector as usize];
    source.read_sector(sector, &mut buffer)?;

    let boot_sector = BootSector::parse(&buffer)?;
    if boot_sector.signature != BOOT_SECTOR_SIGNATURE {
        tracing::warn!(
            "Boot sector signature 0x{:04X} at sector {}",
            boot_sector.signature,
            sector
        );
    }
    Ok(boot_sector)
}

/// Read the boot sector and derive geometry, requiring FAT32
pub fn read_geometry<S: SectorSource>(source: &mut S, sector: u64) -> Result<FilesystemGeometry> {
    let boot_sector = parse_boot_sector(source, sector)?;

    let fs_type = boot_sector.filesystem_type();
    if fs_type != FilesystemType::Fat32 {
        return Err(RecoveryError::UnsupportedFilesystem(fs_type.to_string()));
    }

    let geometry = boot_sector.geometry()?;
    let device_bps = source.bytes_per_sector()?;
    if device_bps != geometry.bytes_per_sector {
        tracing::warn!(
            "Boot sector declares {}-byte sectors, device uses {}",
            geometry.bytes_per_sector,
            device_bps
        );
    }

    tracing::info!(
        "FAT32 volume '{}': {} clusters of {} bytes, FAT at sector {}, data at sector {}",
        boot_sector.volume_label(),
        geometry.cluster_count,
        geometry.cluster_size(),
        geometry.fat_start_sector,
        geometry.data_start_sector
    );

    Ok(geometry)
}

/// Human-readable summary of a FAT32 volume
pub fn get_filesystem_info<S: SectorSource>(source: &mut S) -> Result<String> {
    let boot_sector = parse_boot_sector(source, 0)?;
    let geometry = boot_sector.geometry()?;
    let volume_size_mb = geometry.total_sectors * geometry.bytes_per_sector as u64 / (1024 * 1024);

    Ok(format!(
        "FAT32 File System\n\
         - Volume Label: {}\n\
         - Volume ID: 0x{:08X}\n\
         - Bytes per Sector: {}\n\
         - Sectors per Cluster: {}\n\
         - Bytes per Cluster: {}\n\
         - Volume Size: {} MB\n\
         - Cluster Count: {}\n\
         - Reserved Sectors: {}\n\
         - FATs: {} x {} sectors\n\
         - Root Directory Cluster: {}",
        boot_sector.volume_label(),
        boot_sector.volume_id,
        geometry.bytes_per_sector,
        geometry.sectors_per_cluster,
        geometry.cluster_size(),
        volume_size_mb,
        geometry.cluster_count,
        geometry.reserved_sectors,
        geometry.num_fats,
        geometry.fat_size,
        geometry.root_cluster
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemorySectorSource;

    fn boot_sector_bytes(label: &[u8; 8]) -> Vec<u8> {
        let mut data = vec![0u8; 512];
        data[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
        data[3..11].copy_from_slice(b"MSWIN4.1");
        data[11..13].copy_from_slice(&512u16.to_le_bytes());
        data[13] = 8;
        data[14..16].copy_from_slice(&32u16.to_le_bytes());
        data[16] = 2;
        data[32..36].copy_from_slice(&100_000u32.to_le_bytes());
        data[36..40].copy_from_slice(&100u32.to_le_bytes());
        data[44..48].copy_from_slice(&2u32.to_le_bytes());
        data[71..82].copy_from_slice(b"RECOVERME  ");
        data[82..90].copy_from_slice(label);
        data[510] = 0x55;
        data[511] = 0xAA;
        data
    }

    #[test]
    fn test_geometry_derivation() {
        let boot = BootSector::parse(&boot_sector_bytes(b"FAT32   ")).unwrap();
        assert_eq!(boot.filesystem_type(), FilesystemType::Fat32);
        assert_eq!(boot.volume_label(), "RECOVERME");

        let geometry = boot.geometry().unwrap();
        assert_eq!(geometry.fat_start_sector, 32);
        assert_eq!(geometry.data_start_sector, 32 + 2 * 100);
        assert_eq!(geometry.cluster_size(), 4096);
        assert_eq!(geometry.cluster_count, (100_000 - 232) / 8);
        assert_eq!(geometry.cluster_to_sector(2), 232);
        assert_eq!(geometry.cluster_to_sector(3), 240);
    }

    #[test]
    fn test_filesystem_labels() {
        let cases: [(&[u8; 8], FilesystemType); 5] = [
            (b"FAT32   ", FilesystemType::Fat32),
            (b"NTFS    ", FilesystemType::Ntfs),
            (b"exFAT\0\0\0", FilesystemType::ExFat),
            (b"EXT4    ", FilesystemType::Ext4),
            (b"FAT16   ", FilesystemType::Unknown),
        ];
        for (label, expected) in cases {
            let boot = BootSector::parse(&boot_sector_bytes(label)).unwrap();
            assert_eq!(boot.filesystem_type(), expected);
        }
    }

    #[test]
    fn test_ntfs_oem_identifier() {
        let mut data = boot_sector_bytes(b"\0\0\0\0\0\0\0\0");
        data[3..11].copy_from_slice(b"NTFS    ");
        let boot = BootSector::parse(&data).unwrap();
        assert_eq!(boot.filesystem_type(), FilesystemType::Ntfs);
    }

    #[test]
    fn test_zero_sectors_per_cluster_rejected() {
        let mut data = boot_sector_bytes(b"FAT32   ");
        data[13] = 0;
        let boot = BootSector::parse(&data).unwrap();
        assert!(matches!(
            boot.geometry(),
            Err(RecoveryError::InvalidBootSector(_))
        ));
    }

    #[test]
    fn test_read_geometry_rejects_other_filesystems() {
        let mut source = MemorySectorSource::new(boot_sector_bytes(b"NTFS    "), 512);
        assert!(matches!(
            read_geometry(&mut source, 0),
            Err(RecoveryError::UnsupportedFilesystem(_))
        ));
    }

    #[test]
    fn test_geometry_recomputed_per_read() {
        let mut first = boot_sector_bytes(b"FAT32   ");
        let mut second = boot_sector_bytes(b"FAT32   ");
        first[14..16].copy_from_slice(&32u16.to_le_bytes());
        second[14..16].copy_from_slice(&64u16.to_le_bytes());
        first.extend_from_slice(&second);

        let mut source = MemorySectorSource::new(first, 512);
        let a = read_geometry(&mut source, 0).unwrap();
        let b = read_geometry(&mut source, 1).unwrap();
        assert_eq!(a.data_start_sector, 232);
        assert_eq!(b.data_start_sector, 264);
    }

    #[test]
    fn test_clusters_for_size() {
        let boot = BootSector::parse(&boot_sector_bytes(b"FAT32   ")).unwrap();
        let geometry = boot.geometry().unwrap();
        assert_eq!(geometry.clusters_for_size(0), 1);
        assert_eq!(geometry.clusters_for_size(4096), 1);
        assert_eq!(geometry.clusters_for_size(4097), 2);
    }
}
