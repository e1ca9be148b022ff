/// Sector-level access to devices and raw images
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::{RecoveryError, Result};

pub mod classify;

pub use classify::{DeviceCategory, DeviceDescriptor};

/// Default sector size when the device cannot report one
pub const DEFAULT_BYTES_PER_SECTOR: u32 = 512;

/// Sector reads relative to a starting LBA
///
/// Physical drives start at LBA 0 for partition-table probing and are then
/// rebased onto each partition; logical volumes start at their own sector 0.
pub trait SectorSource {
    /// Fill `buf` with `buf.len()` bytes starting at `sector`
    fn read_sector(&mut self, sector: u64, buf: &mut [u8]) -> Result<()>;

    fn bytes_per_sector(&self) -> Result<u32>;

    fn is_open(&self) -> bool;

    fn reopen(&mut self) -> Result<()>;

    fn close(&mut self);

    /// Move sector 0 of this source to `start_lba` on the underlying device
    fn set_start_lba(&mut self, start_lba: u64);

    fn start_lba(&self) -> u64;
}

/// Copy `buf.len()` bytes for `sector` out of a whole-device byte image
fn copy_sector(
    data: &[u8],
    start_lba: u64,
    bytes_per_sector: u32,
    sector: u64,
    buf: &mut [u8],
) -> Result<()> {
    let absolute = start_lba
        .checked_add(sector)
        .ok_or(RecoveryError::SectorReadFailure { sector })?;
    let offset = absolute
        .checked_mul(bytes_per_sector as u64)
        .ok_or(RecoveryError::SectorReadFailure { sector })?;
    let end = offset
        .checked_add(buf.len() as u64)
        .ok_or(RecoveryError::SectorReadFailure { sector })?;

    if end > data.len() as u64 {
        tracing::debug!(
            "Short read at sector {} (+{}): {} > {}",
            sector,
            start_lba,
            end,
            data.len()
        );
        return Err(RecoveryError::SectorReadFailure { sector });
    }

    buf.copy_from_slice(&data[offset as usize..end as usize]);
    Ok(())
}

/// A memory-mapped device or image file
///
/// Physical and logical devices share this implementation; they differ only
/// in the starting offset.
pub struct DeviceSectorSource {
    path: PathBuf,
    category: DeviceCategory,
    start_lba: u64,
    bytes_per_sector: u32,
    mmap: Option<Mmap>,
}

impl DeviceSectorSource {
    /// Open the device named by a descriptor
    pub fn open(descriptor: &DeviceDescriptor, bytes_per_sector: u32) -> Result<Self> {
        let mut source = Self {
            path: descriptor.path.clone(),
            category: descriptor.category,
            start_lba: 0,
            bytes_per_sector,
            mmap: None,
        };
        source.reopen()?;
        Ok(source)
    }

    /// Open a physical drive with its sector 0 at `start_lba`
    pub fn physical<P: AsRef<Path>>(path: P, start_lba: u64, bytes_per_sector: u32) -> Result<Self> {
        let mut source = Self::open(
            &DeviceDescriptor::image(path.as_ref(), DeviceCategory::Physical),
            bytes_per_sector,
        )?;
        source.start_lba = start_lba;
        Ok(source)
    }

    /// Open a logical volume
    pub fn logical<P: AsRef<Path>>(path: P, bytes_per_sector: u32) -> Result<Self> {
        Self::open(
            &DeviceDescriptor::image(path.as_ref(), DeviceCategory::Logical),
            bytes_per_sector,
        )
    }

    pub fn category(&self) -> DeviceCategory {
        self.category
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn map(path: &Path) -> Result<Mmap> {
        let file = File::open(path).map_err(|e| {
            RecoveryError::DeviceUnreadable(format!("{}: {}", path.display(), e))
        })?;
        let size = file.metadata()?.len();
        if size == 0 {
            return Err(RecoveryError::DeviceUnreadable(format!(
                "{}: device reports zero length",
                path.display()
            )));
        }

        let mmap = unsafe { MmapOptions::new().map(&file) }.map_err(|e| {
            RecoveryError::DeviceUnreadable(format!("{}: {}", path.display(), e))
        })?;

        Ok(mmap)
    }
}

impl SectorSource for DeviceSectorSource {
    fn read_sector(&mut self, sector: u64, buf: &mut [u8]) -> Result<()> {
        let mmap = self
            .mmap
            .as_ref()
            .ok_or(RecoveryError::SectorReadFailure { sector })?;
        copy_sector(mmap, self.start_lba, self.bytes_per_sector, sector, buf)
    }

    fn bytes_per_sector(&self) -> Result<u32> {
        if self.bytes_per_sector == 0 {
            return Err(RecoveryError::DeviceUnreadable(format!(
                "{}: unknown sector size",
                self.path.display()
            )));
        }
        Ok(self.bytes_per_sector)
    }

    fn is_open(&self) -> bool {
        self.mmap.is_some()
    }

    fn reopen(&mut self) -> Result<()> {
        self.mmap = Some(Self::map(&self.path)?);
        tracing::debug!(
            "Opened {} ({:?}) at LBA {}",
            self.path.display(),
            self.category,
            self.start_lba
        );
        Ok(())
    }

    fn close(&mut self) {
        self.mmap = None;
    }

    fn set_start_lba(&mut self, start_lba: u64) {
        self.start_lba = start_lba;
    }

    fn start_lba(&self) -> u64 {
        self.start_lba
    }
}

/// An in-memory device image with the same contract as a real device
#[derive(Debug, Clone)]
pub struct MemorySectorSource {
    data: Vec<u8>,
    start_lba: u64,
    bytes_per_sector: u32,
    open: bool,
}

impl MemorySectorSource {
    pub fn new(data: Vec<u8>, bytes_per_sector: u32) -> Self {
        Self {
            data,
            start_lba: 0,
            bytes_per_sector,
            open: true,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl SectorSource for MemorySectorSource {
    fn read_sector(&mut self, sector: u64, buf: &mut [u8]) -> Result<()> {
        if !self.open {
            return Err(RecoveryError::SectorReadFailure { sector });
        }
        copy_sector(&self.data, self.start_lba, self.bytes_per_sector, sector, buf)
    }

    fn bytes_per_sector(&self) -> Result<u32> {
        if self.bytes_per_sector == 0 {
            return Err(RecoveryError::DeviceUnreadable("unknown sector size".into()));
        }
        Ok(self.bytes_per_sector)
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn reopen(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn set_start_lba(&mut self, start_lba: u64) {
        self.start_lba = start_lba;
    }

    fn start_lba(&self) -> u64 {
        self.start_lba
    }
}
