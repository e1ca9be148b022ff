//! FAT32 directory entry parsing
//!
//! Directories are arrays of 32-byte slots. The first byte of a slot marks
//! its state:
//! - 0x00: unused, and so is every slot after it
//! - 0xE5: deleted entry
//! - 0x05: live entry whose name really starts with 0xE5
//!
//! Long file names are stored in slots with attribute 0x0F placed directly
//! before their short entry, last fragment first.

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{NaiveDate, NaiveDateTime};
use encoding_rs::UTF_16LE;
use std::io::Cursor;

use crate::error::{RecoveryError, Result};

/// Directory entry size in bytes
pub const ENTRY_SIZE: usize = 32;

pub const MARKER_END_OF_DIRECTORY: u8 = 0x00;
pub const MARKER_DELETED: u8 = 0xE5;
pub const MARKER_ESCAPED_E5: u8 = 0x05;

/// File attributes
pub const ATTR_READ_ONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;
pub const ATTR_LONG_NAME: u8 = ATTR_READ_ONLY | ATTR_HIDDEN | ATTR_SYSTEM | ATTR_VOLUME_ID;
const ATTR_LONG_NAME_MASK: u8 = 0x3F;

/// Flag on the sequence byte of the last (first stored) LFN fragment
pub const LFN_LAST_FRAGMENT: u8 = 0x40;
/// UTF-16 bytes carried by one LFN slot (13 code units)
pub const LFN_NAME_BYTES: usize = 26;

/// One 32-byte directory slot
#[derive(Debug, Clone)]
pub enum DirectorySlot {
    /// No further entries in this directory
    End,
    LongName(LongNameFragment),
    Short(DirEntry),
}

impl DirectorySlot {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < ENTRY_SIZE {
            return Err(RecoveryError::ChainCorruption(
                "Insufficient data for directory entry".into(),
            ));
        }

        if data[0] == MARKER_END_OF_DIRECTORY {
            return Ok(DirectorySlot::End);
        }

        if data[11] & ATTR_LONG_NAME_MASK == ATTR_LONG_NAME {
            return Ok(DirectorySlot::LongName(LongNameFragment::parse(data)));
        }

        Ok(DirectorySlot::Short(DirEntry::parse(data)?))
    }
}

/// Short (8.3) directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: [u8; 8],
    pub extension: [u8; 3],
    pub attributes: u8,
    pub nt_reserved: u8,
    pub create_time_tenths: u8,
    pub create_time: u16,
    pub create_date: u16,
    pub access_date: u16,
    pub first_cluster_high: u16,
    pub write_time: u16,
    pub write_date: u16,
    pub first_cluster_low: u16,
    pub file_size: u32,
}

impl DirEntry {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let mut name = [0u8; 8];
        std::io::Read::read_exact(&mut cursor, &mut name)?;
        let mut extension = [0u8; 3];
        std::io::Read::read_exact(&mut cursor, &mut extension)?;

        Ok(DirEntry {
            name,
            extension,
            attributes: cursor.read_u8()?,
            nt_reserved: cursor.read_u8()?,
            create_time_tenths: cursor.read_u8()?,
            create_time: cursor.read_u16::<LittleEndian>()?,
            create_date: cursor.read_u16::<LittleEndian>()?,
            access_date: cursor.read_u16::<LittleEndian>()?,
            first_cluster_high: cursor.read_u16::<LittleEndian>()?,
            write_time: cursor.read_u16::<LittleEndian>()?,
            write_date: cursor.read_u16::<LittleEndian>()?,
            first_cluster_low: cursor.read_u16::<LittleEndian>()?,
            file_size: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn first_cluster(&self) -> u32 {
        ((self.first_cluster_high as u32) << 16) | self.first_cluster_low as u32
    }

    pub fn is_deleted(&self) -> bool {
        self.name[0] == MARKER_DELETED
    }

    pub fn is_directory(&self) -> bool {
        self.attributes & ATTR_DIRECTORY != 0
    }

    pub fn is_volume_label(&self) -> bool {
        self.attributes & ATTR_VOLUME_ID != 0
    }

    /// `.` and `..` entries
    pub fn is_dot_entry(&self) -> bool {
        self.name[0] == b'.' && self.name[1..].iter().all(|&b| b == b' ' || b == b'.')
    }

    /// Short name bytes with the 0x05 escape undone
    pub fn raw_name(&self) -> [u8; 8] {
        let mut name = self.name;
        if name[0] == MARKER_ESCAPED_E5 {
            name[0] = MARKER_DELETED;
        }
        name
    }

    /// Last write time, when the stored date/time is well formed
    pub fn modified(&self) -> Option<NaiveDateTime> {
        decode_fat_datetime(self.write_date, self.write_time)
    }
}

/// Decode packed FAT date and time fields
pub fn decode_fat_datetime(date: u16, time: u16) -> Option<NaiveDateTime> {
    let day = (date & 0x1F) as u32;
    let month = ((date >> 5) & 0x0F) as u32;
    let year = 1980 + (date >> 9) as i32;
    let seconds = ((time & 0x1F) * 2) as u32;
    let minutes = ((time >> 5) & 0x3F) as u32;
    let hours = (time >> 11) as u32;

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hours, minutes, seconds)
}

/// Checksum of an 8.3 name stored in each of its LFN fragments
pub fn short_name_checksum(name: &[u8; 8], extension: &[u8; 3]) -> u8 {
    name.iter()
        .chain(extension.iter())
        .fold(0u8, |sum, &b| {
            ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(b)
        })
}

/// Guess the first byte of a deleted short name from its LFN checksum
///
/// Deletion overwrites the first name byte, but the surviving fragments still
/// carry the checksum of the original. The uppercased first letter of the long
/// name is tried first, then every printable byte; the first match wins.
pub fn recover_short_name_initial(
    name: &[u8; 8],
    extension: &[u8; 3],
    checksum: u8,
    hint: Option<char>,
) -> Option<u8> {
    let hinted = hint
        .filter(|c| c.is_ascii())
        .map(|c| c.to_ascii_uppercase() as u8);

    hinted
        .into_iter()
        .chain(0x21u8..=0x7E)
        .find(|&candidate| {
            let mut guess = *name;
            guess[0] = candidate;
            short_name_checksum(&guess, extension) == checksum
        })
}

/// One long-file-name slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongNameFragment {
    /// Sequence byte; replaced by 0xE5 once the entry is deleted
    pub sequence: u8,
    pub checksum: u8,
    /// 13 UTF-16LE code units
    pub name_bytes: [u8; LFN_NAME_BYTES],
}

impl LongNameFragment {
    pub fn parse(data: &[u8]) -> Self {
        let mut name_bytes = [0u8; LFN_NAME_BYTES];
        name_bytes[..10].copy_from_slice(&data[1..11]);
        name_bytes[10..22].copy_from_slice(&data[14..26]);
        name_bytes[22..].copy_from_slice(&data[28..32]);

        LongNameFragment {
            sequence: data[0],
            checksum: data[13],
            name_bytes,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.sequence == MARKER_DELETED
    }
}

/// Join fragments collected in on-disk order into the long name
pub fn assemble_long_name(fragments: &[LongNameFragment]) -> Option<String> {
    if fragments.is_empty() {
        return None;
    }

    let mut bytes = Vec::with_capacity(fragments.len() * LFN_NAME_BYTES);
    for fragment in fragments.iter().rev() {
        bytes.extend_from_slice(&fragment.name_bytes);
    }

    let end = bytes
        .chunks_exact(2)
        .position(|unit| unit[0] == 0 && unit[1] == 0)
        .map(|units| units * 2)
        .unwrap_or(bytes.len());

    let (decoded, _, _) = UTF_16LE.decode(&bytes[..end]);
    let name = decoded.trim_end_matches('\u{FFFF}').to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_slot(name: &[u8; 11], attr: u8, cluster: u32, size: u32) -> [u8; 32] {
        let mut slot = [0u8; 32];
        slot[..11].copy_from_slice(name);
        slot[11] = attr;
        slot[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
        slot[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
        slot[28..32].copy_from_slice(&size.to_le_bytes());
        slot
    }

    fn lfn_slot(sequence: u8, checksum: u8, text: &str) -> [u8; 32] {
        let mut units: Vec<u16> = text.encode_utf16().collect();
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

    #[test]
    fn test_short_entry_fields() {
        let slot = short_slot(b"\xE5EPORT  PDF", ATTR_ARCHIVE, 0x0001_0023, 5000);
        match DirectorySlot::parse(&slot).unwrap() {
            DirectorySlot::Short(entry) => {
                assert!(entry.is_deleted());
                assert!(!entry.is_directory());
                assert_eq!(entry.first_cluster(), 0x0001_0023);
                assert_eq!(entry.file_size, 5000);
                assert_eq!(&entry.extension, b"PDF");
            }
            other => panic!("unexpected slot {:?}", other),
        }
    }

    #[test]
    fn test_end_marker_and_lfn_detection() {
        assert!(matches!(
            DirectorySlot::parse(&[0u8; 32]).unwrap(),
            DirectorySlot::End
        ));
        let slot = lfn_slot(0x41, 0, "a.txt");
        assert!(matches!(
            DirectorySlot::parse(&slot).unwrap(),
            DirectorySlot::LongName(_)
        ));
    }

    #[test]
    fn test_dot_entries() {
        let dot = DirEntry::parse(&short_slot(b".          ", ATTR_DIRECTORY, 5, 0)).unwrap();
        let dotdot = DirEntry::parse(&short_slot(b"..         ", ATTR_DIRECTORY, 0, 0)).unwrap();
        let normal = DirEntry::parse(&short_slot(b"DOCS       ", ATTR_DIRECTORY, 6, 0)).unwrap();
        assert!(dot.is_dot_entry());
        assert!(dotdot.is_dot_entry());
        assert!(!normal.is_dot_entry());
    }

    #[test]
    fn test_long_name_assembly_two_fragments() {
        // Stored last fragment first
        let name = "quarterly-report.xlsx";
        let frag2 = LongNameFragment::parse(&lfn_slot(0x42, 0, &name[13..]));
        let frag1 = LongNameFragment::parse(&lfn_slot(0x01, 0, &name[..13]));
        assert_eq!(assemble_long_name(&[frag2, frag1]).as_deref(), Some(name));
    }

    #[test]
    fn test_checksum_and_initial_recovery() {
        let original = *b"REPORT  ";
        let ext = *b"PDF";
        let checksum = short_name_checksum(&original, &ext);

        let mut deleted = original;
        deleted[0] = MARKER_DELETED;
        assert_ne!(short_name_checksum(&deleted, &ext), checksum);
        assert_eq!(
            recover_short_name_initial(&deleted, &ext, checksum, Some('r')),
            Some(b'R')
        );
    }

    #[test]
    fn test_fat_datetime() {
        // 2023-06-15 14:30:20
        let date = ((2023 - 1980) << 9) | (6 << 5) | 15;
        let time = (14 << 11) | (30 << 5) | 10;
        let dt = decode_fat_datetime(date, time).unwrap();
        assert_eq!(dt.to_string(), "2023-06-15 14:30:20");
        assert!(decode_fat_datetime(0, 0).is_none());
    }
}
