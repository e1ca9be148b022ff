//! Synthetic FAT32 volumes and partitioned disks for integration tests
#![allow(dead_code)]

use std::collections::HashMap;

use fatrecover_core::fs::fat32::directory::{short_name_checksum, ATTR_LONG_NAME};
use fatrecover_core::partition::gpt::GUID_BASIC_DATA;

pub const BPS: usize = 512;
pub const RESERVED_SECTORS: usize = 32;
pub const FAT_SECTORS: usize = 8;
pub const NUM_FATS: usize = 2;
pub const DATA_START: usize = RESERVED_SECTORS + NUM_FATS * FAT_SECTORS;
pub const TOTAL_SECTORS: usize = 256;
/// Clusters 2..=CLUSTER_COUNT+1 are addressable
pub const CLUSTER_COUNT: u32 = (TOTAL_SECTORS - DATA_START) as u32;
pub const ROOT_CLUSTER: u32 = 2;
pub const EOC: u32 = 0x0FFF_FFFF;

pub const ATTR_ARCHIVE: u8 = 0x20;
pub const ATTR_DIRECTORY: u8 = 0x10;

/// A single-sector-per-cluster FAT32 volume built in memory
pub struct Fat32Image {
    data: Vec<u8>,
    next_slot: HashMap<u32, usize>,
}

impl Fat32Image {
    pub fn new() -> Self {
        let mut data = vec![0u8; TOTAL_SECTORS * BPS];
        let boot = &mut data[..BPS];
        boot[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
        boot[3..11].copy_from_slice(b"MSWIN4.1");
        boot[11..13].copy_from_slice(&(BPS as u16).to_le_bytes());
        boot[13] = 1;
        boot[14..16].copy_from_slice(&(RESERVED_SECTORS as u16).to_le_bytes());
        boot[16] = NUM_FATS as u8;
        boot[21] = 0xF8;
        boot[32..36].copy_from_slice(&(TOTAL_SECTORS as u32).to_le_bytes());
        boot[36..40].copy_from_slice(&(FAT_SECTORS as u32).to_le_bytes());
        boot[44..48].copy_from_slice(&ROOT_CLUSTER.to_le_bytes());
        boot[66] = 0x29;
        boot[67..71].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        boot[71..82].copy_from_slice(b"TESTVOL    ");
        boot[82..90].copy_from_slice(b"FAT32   ");
        boot[510] = 0x55;
        boot[511] = 0xAA;

        let mut image = Self {
            data,
            next_slot: HashMap::new(),
        };
        image.set_fat(0, 0x0FFF_FFF8);
        image.set_fat(1, EOC);
        image.set_fat(ROOT_CLUSTER, EOC);
        image
    }

    /// Write a FAT entry into every FAT copy
    pub fn set_fat(&mut self, cluster: u32, value: u32) {
        for copy in 0..NUM_FATS {
            let offset = (RESERVED_SECTORS + copy * FAT_SECTORS) * BPS + cluster as usize * 4;
            self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
    }

    /// Link `clusters` into a chain ending in EOC
    pub fn link_chain(&mut self, clusters: &[u32]) {
        for pair in clusters.windows(2) {
            self.set_fat(pair[0], pair[1]);
        }
        if let Some(&last) = clusters.last() {
            self.set_fat(last, EOC);
        }
    }

    pub fn cluster_offset(cluster: u32) -> usize {
        (DATA_START + (cluster as usize - 2)) * BPS
    }

    /// Spread `content` over `clusters`, one cluster at a time
    pub fn write_content(&mut self, clusters: &[u32], content: &[u8]) {
        for (cluster, chunk) in clusters.iter().zip(content.chunks(BPS)) {
            let offset = Self::cluster_offset(*cluster);
            self.data[offset..offset + chunk.len()].copy_from_slice(chunk);
        }
    }

    /// Append a raw 32-byte slot to the directory at `dir_cluster`
    pub fn push_slot(&mut self, dir_cluster: u32, slot: [u8; 32]) {
        let index = self.next_slot.entry(dir_cluster).or_insert(0);
        let offset = Self::cluster_offset(dir_cluster) + *index * 32;
        assert!(*index < BPS / 32, "directory cluster {} full", dir_cluster);
        self.data[offset..offset + 32].copy_from_slice(&slot);
        *index += 1;
    }

    /// A live file whose FAT chain is intact
    pub fn add_live_file(&mut self, dir_cluster: u32, name: &[u8; 11], clusters: &[u32], content: &[u8]) {
        self.write_content(clusters, content);
        self.link_chain(clusters);
        let start = clusters.first().copied().unwrap_or(0);
        self.push_slot(dir_cluster, short_slot(name, ATTR_ARCHIVE, start, content.len() as u32));
    }

    /// A deleted file: content left in place, FAT entries cleared, name marked
    pub fn add_deleted_file(&mut self, dir_cluster: u32, name: &[u8; 11], start: u32, clusters: &[u32], content: &[u8]) {
        self.write_content(clusters, content);
        for &cluster in clusters {
            self.set_fat(cluster, 0);
        }
        self.push_slot(dir_cluster, deleted_slot(name, ATTR_ARCHIVE, start, content.len() as u32));
    }

    /// A deleted file preceded by its deleted long-name fragment
    pub fn add_deleted_file_with_long_name(
        &mut self,
        dir_cluster: u32,
        name: &[u8; 11],
        long_name: &str,
        start: u32,
        content: &[u8],
    ) {
        let clusters: Vec<u32> = (0..content.len().div_ceil(BPS).max(1) as u32)
            .map(|i| start + i)
            .collect();
        let mut short = [0u8; 8];
        short.copy_from_slice(&name[..8]);
        let mut ext = [0u8; 3];
        ext.copy_from_slice(&name[8..]);
        let checksum = short_name_checksum(&short, &ext);

        self.push_slot(dir_cluster, lfn_slot(0xE5, checksum, long_name));
        self.add_deleted_file(dir_cluster, name, start, &clusters, content);
    }

    /// A subdirectory with `.` and `..` entries
    pub fn add_directory(&mut self, parent: u32, name: &[u8; 11], cluster: u32, deleted: bool) {
        let slot = if deleted {
            self.set_fat(cluster, 0);
            deleted_slot(name, ATTR_DIRECTORY, cluster, 0)
        } else {
            self.set_fat(cluster, EOC);
            short_slot(name, ATTR_DIRECTORY, cluster, 0)
        };
        self.push_slot(parent, slot);
        self.push_slot(cluster, short_slot(b".          ", ATTR_DIRECTORY, cluster, 0));
        self.push_slot(cluster, short_slot(b"..         ", ATTR_DIRECTORY, parent, 0));
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

pub fn short_slot(name: &[u8; 11], attributes: u8, cluster: u32, size: u32) -> [u8; 32] {
    let mut slot = [0u8; 32];
    slot[..11].copy_from_slice(name);
    slot[11] = attributes;
    slot[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
    // 2024-03-01 12:00:00
    slot[22..24].copy_from_slice(&(12u16 << 11).to_le_bytes());
    slot[24..26].copy_from_slice(&(((2024u16 - 1980) << 9) | (3 << 5) | 1).to_le_bytes());
    slot[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
    slot[28..32].copy_from_slice(&size.to_le_bytes());
    slot
}

pub fn deleted_slot(name: &[u8; 11], attributes: u8, cluster: u32, size: u32) -> [u8; 32] {
    let mut slot = short_slot(name, attributes, cluster, size);
    slot[0] = 0xE5;
    slot
}

/// Single LFN slot holding up to 13 characters
pub fn lfn_slot(sequence: u8, checksum: u8, text: &str) -> [u8; 32] {
    let mut units: Vec<u16> = text.encode_utf16().collect();
    assert!(units.len() <= 13);
    if units.len() < 13 {
        units.push(0);
    }
    units.resize(13, 0xFFFF);
    let bytes: Vec<u8> = units.iter().flat_map(|u| u.to_le_bytes()).collect();

    let mut slot = [0u8; 32];
    slot[0] = sequence;
    slot[1..11].copy_from_slice(&bytes[..10]);
    slot[11] = ATTR_LONG_NAME;
    slot[13] = checksum;
    slot[14..26].copy_from_slice(&bytes[10..22]);
    slot[28..32].copy_from_slice(&bytes[22..26]);
    slot
}

/// Deterministic, non-repeating test content
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(seed as u32 * 7) as u8)
        .collect()
}

/// MBR sector with the given `(type, start_lba, sectors)` slots
pub fn mbr_sector(slots: &[(u8, u32, u32)]) -> Vec<u8> {
    let mut sector = vec![0u8; BPS];
    for (index, &(kind, start, sectors)) in slots.iter().enumerate() {
        let offset = 446 + index * 16;
        sector[offset + 4] = kind;
        sector[offset + 8..offset + 12].copy_from_slice(&start.to_le_bytes());
        sector[offset + 12..offset + 16].copy_from_slice(&sectors.to_le_bytes());
    }
    sector[510] = 0x55;
    sector[511] = 0xAA;
    sector
}

/// Whole disk with an MBR and the given volumes at their start LBAs
pub fn mbr_disk(partitions: &[(u8, u32, &[u8])]) -> Vec<u8> {
    let slots: Vec<(u8, u32, u32)> = partitions
        .iter()
        .map(|&(kind, start, volume)| (kind, start, (volume.len() / BPS) as u32))
        .collect();
    let end = partitions
        .iter()
        .map(|&(_, start, volume)| start as usize * BPS + volume.len())
        .max()
        .unwrap_or(BPS);

    let mut disk = vec![0u8; end.max(BPS)];
    disk[..BPS].copy_from_slice(&mbr_sector(&slots));
    for &(_, start, volume) in partitions {
        let offset = start as usize * BPS;
        disk[offset..offset + volume.len()].copy_from_slice(volume);
    }
    disk
}

/// 128-byte GPT entry
pub fn gpt_entry(type_guid: [u8; 16], first_lba: u64, last_lba: u64, name: &str) -> Vec<u8> {
    let mut entry = vec![0u8; 128];
    entry[..16].copy_from_slice(&type_guid);
    entry[16] = 0x42;
    entry[32..40].copy_from_slice(&first_lba.to_le_bytes());
    entry[40..48].copy_from_slice(&last_lba.to_le_bytes());
    for (i, unit) in name.encode_utf16().take(36).enumerate() {
        entry[56 + i * 2..58 + i * 2].copy_from_slice(&unit.to_le_bytes());
    }
    entry
}

/// Disk with a protective MBR, a GPT header at LBA 1 and entries from LBA 2
pub fn gpt_disk(entries: &[Vec<u8>], volumes: &[(u64, &[u8])]) -> Vec<u8> {
    let end = volumes
        .iter()
        .map(|&(start, volume)| start as usize * BPS + volume.len())
        .max()
        .unwrap_or(0)
        .max(64 * BPS);
    let mut disk = vec![0u8; end];

    disk[..BPS].copy_from_slice(&mbr_sector(&[(0xEE, 1, (end / BPS) as u32 - 1)]));

    let array: Vec<u8> = entries.concat();
    let array_lba = 2usize;
    disk[array_lba * BPS..array_lba * BPS + array.len()].copy_from_slice(&array);

    let header = &mut disk[BPS..2 * BPS];
    header[..8].copy_from_slice(b"EFI PART");
    header[8..12].copy_from_slice(&0x0001_0000u32.to_le_bytes());
    header[12..16].copy_from_slice(&92u32.to_le_bytes());
    header[24..32].copy_from_slice(&1u64.to_le_bytes());
    header[32..40].copy_from_slice(&((end / BPS) as u64 - 1).to_le_bytes());
    header[40..48].copy_from_slice(&34u64.to_le_bytes());
    header[48..56].copy_from_slice(&((end / BPS) as u64 - 34).to_le_bytes());
    header[56] = 0x11;
    header[72..80].copy_from_slice(&(array_lba as u64).to_le_bytes());
    header[80..84].copy_from_slice(&(entries.len() as u32).to_le_bytes());
    header[84..88].copy_from_slice(&128u32.to_le_bytes());
    header[88..92].copy_from_slice(&crc32fast::hash(&array).to_le_bytes());
    let crc = crc32fast::hash(&header[..92]);
    header[16..20].copy_from_slice(&crc.to_le_bytes());

    for &(start, volume) in volumes {
        let offset = start as usize * BPS;
        disk[offset..offset + volume.len()].copy_from_slice(volume);
    }
    disk
}

pub fn basic_data_guid() -> [u8; 16] {
    GUID_BASIC_DATA.to_bytes_le()
}
