/// File system detection and module organization
pub mod fat32;

use crate::device::SectorSource;
use crate::error::Result;
use crate::FilesystemType;

/// Detect the file system whose boot sector sits at `sector`
///
/// NTFS, exFAT and EXT4 are only recognized so they can be reported and
/// skipped; FAT32 is the only type with a recovery path.
pub fn detect_filesystem<S: SectorSource>(source: &mut S, sector: u64) -> Result<FilesystemType> {
    let boot_sector = fat32::parse_boot_sector(source, sector)?;
    if boot_sector.signature != fat32::BOOT_SECTOR_SIGNATURE {
        return Ok(FilesystemType::Unknown);
    }
    Ok(boot_sector.filesystem_type())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemorySectorSource;

    #[test]
    fn test_detect_requires_signature() {
        let mut data = vec![0u8; 1024];
        data[82..90].copy_from_slice(b"FAT32   ");
        let mut source = MemorySectorSource::new(data.clone(), 512);
        assert_eq!(detect_filesystem(&mut source, 0).unwrap(), FilesystemType::Unknown);

        data[510] = 0x55;
        data[511] = 0xAA;
        let mut source = MemorySectorSource::new(data, 512);
        assert_eq!(detect_filesystem(&mut source, 0).unwrap(), FilesystemType::Fat32);
    }
}
