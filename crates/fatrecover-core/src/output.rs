/// Destinations for recovered file contents
///
/// Files arrive one at a time and cluster by cluster: `begin`, any number of
/// `write_chunk` calls, then `finish`. File ids restart in every partition,
/// so outputs key files by partition index and file id together.
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{RecoveryError, Result};
use crate::fs::fat32::scanner::DirectoryEntryCandidate;
use crate::FileId;

/// Receives the recovered bytes of one candidate at a time
pub trait RecoveryOutput {
    /// Start the file for `candidate`, found in partition `partition`
    fn begin(&mut self, partition: usize, candidate: &DirectoryEntryCandidate) -> Result<()>;

    /// Append bytes to the file begun last
    fn write_chunk(&mut self, data: &[u8]) -> Result<()>;

    /// Close the current file; returns where it went, if anywhere
    fn finish(&mut self) -> Result<Option<PathBuf>>;
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    digest_hex(hasher)
}

pub fn digest_hex(hasher: Sha256) -> String {
    format!("{:x}", hasher.finalize())
}

/// Replace characters that are unsafe in host file names
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = cleaned.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct WrittenFile {
    pub partition: usize,
    pub file_id: FileId,
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

struct OpenFile {
    partition: usize,
    file_id: FileId,
    path: PathBuf,
    writer: BufWriter<File>,
    hasher: Sha256,
    size: u64,
}

/// Writes each candidate to `p<partition>_<ordinal>_<name>` inside a directory
///
/// Existing files are never replaced; a name collision is an output error.
pub struct DirectoryOutput {
    root: PathBuf,
    current: Option<OpenFile>,
    written: Vec<WrittenFile>,
}

impl DirectoryOutput {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        create_dir_all(&root).map_err(|e| {
            RecoveryError::Output(format!("cannot create {}: {}", root.display(), e))
        })?;
        Ok(Self {
            root,
            current: None,
            written: Vec::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn written(&self) -> &[WrittenFile] {
        &self.written
    }

    fn target_path(&self, partition: usize, candidate: &DirectoryEntryCandidate) -> PathBuf {
        let name = sanitize_file_name(&candidate.display_name());
        self.root
            .join(format!("p{}_{:05}_{}", partition, candidate.ordinal, name))
    }
}

impl RecoveryOutput for DirectoryOutput {
    fn begin(&mut self, partition: usize, candidate: &DirectoryEntryCandidate) -> Result<()> {
        if let Some(open) = &self.current {
            return Err(RecoveryError::Output(format!(
                "{} is still open",
                open.path.display()
            )));
        }

        let path = self.target_path(partition, candidate);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => {
                    RecoveryError::Output(format!("{} already exists", path.display()))
                }
                _ => RecoveryError::Output(format!("{}: {}", path.display(), e)),
            })?;

        self.current = Some(OpenFile {
            partition,
            file_id: candidate.file_id,
            path,
            writer: BufWriter::new(file),
            hasher: Sha256::new(),
            size: 0,
        });
        Ok(())
    }

    fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        let open = self
            .current
            .as_mut()
            .ok_or_else(|| RecoveryError::Output("no recovered file open".to_string()))?;
        open.writer
            .write_all(data)
            .map_err(|e| RecoveryError::Output(format!("{}: {}", open.path.display(), e)))?;
        open.hasher.update(data);
        open.size += data.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<Option<PathBuf>> {
        let Some(mut open) = self.current.take() else {
            return Err(RecoveryError::Output("no recovered file open".to_string()));
        };
        open.writer
            .flush()
            .map_err(|e| RecoveryError::Output(format!("{}: {}", open.path.display(), e)))?;

        let sha256 = digest_hex(open.hasher);
        tracing::debug!(
            "Wrote {} bytes to {} (sha256 {})",
            open.size,
            open.path.display(),
            sha256
        );

        self.written.push(WrittenFile {
            partition: open.partition,
            file_id: open.file_id,
            path: open.path.clone(),
            size: open.size,
            sha256,
        });
        Ok(Some(open.path))
    }
}

/// Keeps recovered bytes in memory, keyed by partition index and file id
#[derive(Debug, Default)]
pub struct MemoryOutput {
    files: BTreeMap<(usize, FileId), Vec<u8>>,
    current: Option<(usize, FileId)>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, partition: usize, file_id: FileId) -> Option<&[u8]> {
        self.files.get(&(partition, file_id)).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl RecoveryOutput for MemoryOutput {
    fn begin(&mut self, partition: usize, candidate: &DirectoryEntryCandidate) -> Result<()> {
        let key = (partition, candidate.file_id);
        if self.files.contains_key(&key) {
            return Err(RecoveryError::Output(format!(
                "file {} of partition {} already stored",
                candidate.file_id, partition
            )));
        }
        self.files.insert(key, Vec::new());
        self.current = Some(key);
        Ok(())
    }

    fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        let file = self
            .current
            .and_then(|key| self.files.get_mut(&key))
            .ok_or_else(|| RecoveryError::Output("no recovered file open".to_string()))?;
        file.extend_from_slice(data);
        Ok(())
    }

    fn finish(&mut self) -> Result<Option<PathBuf>> {
        self.current = None;
        Ok(None)
    }
}

/// Drops everything; for analysis-only runs
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardOutput;

impl RecoveryOutput for DiscardOutput {
    fn begin(&mut self, _partition: usize, _candidate: &DirectoryEntryCandidate) -> Result<()> {
        Ok(())
    }

    fn write_chunk(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<Option<PathBuf>> {
        Ok(None)
    }
}
