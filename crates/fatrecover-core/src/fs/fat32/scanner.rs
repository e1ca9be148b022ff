//! Directory tree walk collecting deleted entries and live cluster owners
//!
//! Every short entry found gets an ordinal from one pass-wide counter. Since
//! timestamps of deleted entries cannot be trusted, the ordinal stands in for
//! recency during overwrite analysis.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::directory::{
    assemble_long_name, recover_short_name_initial, short_name_checksum, DirEntry,
    DirectorySlot, LongNameFragment, ENTRY_SIZE, MARKER_DELETED,
};
use super::fat::FatTable;
use super::FilesystemGeometry;
use crate::device::SectorSource;
use crate::error::Result;
use crate::FileId;

/// Upper bound on LFN fragments for one name (255 characters)
const MAX_LFN_FRAGMENTS: usize = 20;

/// A directory entry found during the scan, deleted or live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntryCandidate {
    pub file_id: FileId,
    /// Discovery order within the pass
    pub ordinal: u64,
    /// Raw 8.3 name bytes; the first byte is the deletion marker when deleted
    pub short_name: [u8; 8],
    pub extension: [u8; 3],
    pub long_name: Option<String>,
    /// First short-name byte recovered from the LFN checksum
    pub recovered_initial: Option<u8>,
    pub attributes: u8,
    pub start_cluster: u32,
    pub size: u32,
    pub deleted: bool,
    /// First cluster of the containing directory
    pub parent_cluster: u32,
    /// Cluster holding this entry's slot
    pub entry_cluster: u32,
    /// Slot index within the containing directory
    pub entry_index: u32,
    pub modified: Option<NaiveDateTime>,
}

impl DirectoryEntryCandidate {
    pub fn is_directory(&self) -> bool {
        self.attributes & super::directory::ATTR_DIRECTORY != 0
    }

    /// Deleted regular file worth recovering
    pub fn is_recovery_candidate(&self) -> bool {
        self.deleted && !self.is_directory()
    }

    fn name_bytes(&self) -> [u8; 8] {
        let mut name = self.short_name;
        if name[0] == MARKER_DELETED && self.deleted {
            name[0] = self.recovered_initial.unwrap_or(b'_');
        }
        name
    }

    /// `NAME.EXT` form of the short name
    pub fn short_display_name(&self) -> String {
        let printable = |bytes: &[u8]| -> String {
            bytes
                .iter()
                .map(|&b| if (0x20..=0x7E).contains(&b) { b as char } else { '_' })
                .collect::<String>()
                .trim_end()
                .to_string()
        };

        let stem = printable(&self.name_bytes());
        let ext = printable(&self.extension);
        if ext.is_empty() {
            stem
        } else {
            format!("{}.{}", stem, ext)
        }
    }

    /// Long name when one survived, otherwise the short name
    pub fn display_name(&self) -> String {
        self.long_name
            .clone()
            .unwrap_or_else(|| self.short_display_name())
    }

    /// Name consists of printable characters only
    pub fn has_valid_name(&self) -> bool {
        if let Some(long) = &self.long_name {
            return !long.chars().any(|c| c.is_control());
        }

        let name = self.name_bytes();
        let stem_len = name.iter().rposition(|&b| b != b' ').map(|p| p + 1).unwrap_or(0);
        stem_len > 0 && name[..stem_len].iter().all(|&b| (0x20..=0x7E).contains(&b))
    }

    /// Extension is empty or ASCII alphanumeric, recognized or not
    pub fn has_valid_extension(&self) -> bool {
        self.extension
            .iter()
            .take_while(|&&b| b != b' ')
            .all(|b| b.is_ascii_alphanumeric())
            && self
                .extension
                .iter()
                .skip_while(|&&b| b != b' ')
                .all(|&b| b == b' ')
    }
}

/// Entries of one scan in discovery order
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub entries: Vec<DirectoryEntryCandidate>,
    pub directories_scanned: usize,
}

impl ScanResult {
    pub fn recovery_candidates(&self) -> impl Iterator<Item = &DirectoryEntryCandidate> {
        self.entries.iter().filter(|e| e.is_recovery_candidate())
    }
}

/// Recursive directory scanner with cycle and depth guards
pub struct DeletedEntryScanner {
    geometry: FilesystemGeometry,
    max_depth: usize,
    max_directory_clusters: usize,
    next_ordinal: u64,
    visited: HashSet<u32>,
    result: ScanResult,
}

impl DeletedEntryScanner {
    pub fn new(geometry: FilesystemGeometry, max_depth: usize, max_directory_clusters: usize) -> Self {
        Self {
            geometry,
            max_depth,
            max_directory_clusters,
            next_ordinal: 1,
            visited: HashSet::new(),
            result: ScanResult::default(),
        }
    }

    /// Scan the tree rooted at `start_cluster`
    pub fn scan<S: SectorSource>(
        mut self,
        source: &mut S,
        fat: &mut FatTable,
        start_cluster: u32,
    ) -> Result<ScanResult> {
        tracing::debug!("Scanning directory tree at cluster {}", start_cluster);
        self.scan_directory(source, fat, start_cluster, false, 0)?;

        tracing::info!(
            "Directory scan: {} directories, {} entries, {} deleted files",
            self.result.directories_scanned,
            self.result.entries.len(),
            self.result.recovery_candidates().count()
        );
        Ok(self.result)
    }

    fn scan_directory<S: SectorSource>(
        &mut self,
        source: &mut S,
        fat: &mut FatTable,
        start_cluster: u32,
        in_deleted_tree: bool,
        depth: usize,
    ) -> Result<()> {
        if depth > self.max_depth {
            tracing::warn!(
                "Directory at cluster {} exceeds depth {}; not descending",
                start_cluster,
                self.max_depth
            );
            return Ok(());
        }
        if !self.geometry.is_valid_cluster(start_cluster) || self.visited.contains(&start_cluster) {
            return Ok(());
        }

        // A deleted directory's FAT entries are cleared; only its first cluster is known
        let clusters = if in_deleted_tree {
            vec![start_cluster]
        } else {
            fat.live_chain(source, start_cluster, self.max_directory_clusters)?
        };

        self.result.directories_scanned += 1;
        let cluster_size = self.geometry.cluster_size() as usize;
        let mut buffer = vec![0u8; cluster_size];
        let mut pending: Vec<LongNameFragment> = Vec::new();
        let mut subdirectories: Vec<(u32, bool)> = Vec::new();
        let mut slot_index = 0u32;

        'clusters: for &cluster in &clusters {
            if !self.visited.insert(cluster) {
                tracing::warn!("Directory cluster {} already scanned; cycle skipped", cluster);
                break;
            }

            let sector = self.geometry.cluster_to_sector(cluster);
            if let Err(e) = source.read_sector(sector, &mut buffer) {
                tracing::warn!("Directory cluster {} unreadable: {}", cluster, e);
                break;
            }

            for raw in buffer.chunks_exact(ENTRY_SIZE) {
                let index = slot_index;
                slot_index += 1;

                let entry = match DirectorySlot::parse(raw)? {
                    DirectorySlot::End => break 'clusters,
                    DirectorySlot::LongName(fragment) => {
                        if pending.len() >= MAX_LFN_FRAGMENTS {
                            pending.clear();
                        }
                        pending.push(fragment);
                        continue;
                    }
                    DirectorySlot::Short(entry) => entry,
                };

                let fragments = std::mem::take(&mut pending);
                if entry.is_volume_label() || entry.is_dot_entry() {
                    continue;
                }

                let deleted = entry.is_deleted() || in_deleted_tree;
                let (long_name, recovered_initial) = attach_long_name(&entry, &fragments);

                let candidate = DirectoryEntryCandidate {
                    file_id: self.next_ordinal as FileId,
                    ordinal: self.next_ordinal,
                    short_name: entry.raw_name(),
                    extension: entry.extension,
                    long_name,
                    recovered_initial,
                    attributes: entry.attributes,
                    start_cluster: entry.first_cluster(),
                    size: entry.file_size,
                    deleted,
                    parent_cluster: start_cluster,
                    entry_cluster: cluster,
                    entry_index: index,
                    modified: entry.modified(),
                };
                self.next_ordinal += 1;

                tracing::debug!(
                    "Entry #{} '{}' cluster={} size={} deleted={}",
                    candidate.ordinal,
                    candidate.display_name(),
                    candidate.start_cluster,
                    candidate.size,
                    candidate.deleted
                );

                if candidate.is_directory() {
                    subdirectories.push((candidate.start_cluster, deleted));
                }
                self.result.entries.push(candidate);
            }
        }

        for (child, child_deleted) in subdirectories {
            if let Err(e) = self.scan_directory(source, fat, child, child_deleted, depth + 1) {
                tracing::warn!("Subdirectory at cluster {} skipped: {}", child, e);
            }
        }

        Ok(())
    }
}

/// Long name and recovered initial for a short entry
///
/// Live entries only accept fragments whose checksum matches. For deleted
/// entries the checksum cannot match directly, so it is used to recover the
/// overwritten first byte instead.
fn attach_long_name(
    entry: &DirEntry,
    fragments: &[LongNameFragment],
) -> (Option<String>, Option<u8>) {
    let Some(checksum) = fragments.last().map(|f| f.checksum) else {
        return (None, None);
    };
    if fragments.iter().any(|f| f.checksum != checksum) {
        return (None, None);
    }

    if entry.is_deleted() {
        if !fragments.iter().all(|f| f.is_deleted()) {
            return (None, None);
        }
        let long_name = assemble_long_name(fragments);
        let hint = long_name.as_ref().and_then(|n| n.chars().next());
        let initial = recover_short_name_initial(&entry.name, &entry.extension, checksum, hint);
        (long_name, initial)
    } else if short_name_checksum(&entry.name, &entry.extension) == checksum {
        (assemble_long_name(fragments), None)
    } else {
        tracing::debug!("Orphaned long name fragments before '{:?}'", entry.name);
        (None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &[u8; 8], ext: &[u8; 3], deleted: bool) -> DirectoryEntryCandidate {
        DirectoryEntryCandidate {
            file_id: 1,
            ordinal: 1,
            short_name: *name,
            extension: *ext,
            long_name: None,
            recovered_initial: None,
            attributes: 0x20,
            start_cluster: 5,
            size: 10,
            deleted,
            parent_cluster: 2,
            entry_cluster: 2,
            entry_index: 0,
            modified: None,
        }
    }

    #[test]
    fn test_deleted_display_name() {
        let c = candidate(b"\xE5OTES   ", b"TXT", true);
        assert_eq!(c.short_display_name(), "_OTES.TXT");

        let mut c = c;
        c.recovered_initial = Some(b'N');
        assert_eq!(c.display_name(), "NOTES.TXT");

        c.long_name = Some("notes for march.txt".into());
        assert_eq!(c.display_name(), "notes for march.txt");
    }

    #[test]
    fn test_name_validity() {
        assert!(candidate(b"\xE5OTES   ", b"TXT", true).has_valid_name());
        assert!(!candidate(b"\xE5O\x01ES   ", b"TXT", true).has_valid_name());
        assert!(!candidate(b"        ", b"TXT", false).has_valid_name());
    }

    #[test]
    fn test_extension_validity() {
        assert!(candidate(b"\xE5OTES   ", b"TXT", true).has_valid_extension());
        assert!(candidate(b"\xE5OTES   ", b"   ", true).has_valid_extension());
        assert!(candidate(b"\xE5OTES   ", b"MP3", true).has_valid_extension());
        assert!(!candidate(b"\xE5OTES   ", b"T~T", true).has_valid_extension());
        assert!(!candidate(b"\xE5OTES   ", b"T X", true).has_valid_extension());
    }

    #[test]
    fn test_live_entry_is_not_candidate() {
        assert!(!candidate(b"NOTES   ", b"TXT", false).is_recovery_candidate());
        let mut dir = candidate(b"\xE5OCS    ", b"   ", true);
        dir.attributes = 0x10;
        assert!(!dir.is_recovery_candidate());
    }
}
