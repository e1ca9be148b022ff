/// Drive specification parsing
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RecoveryError, Result};
use crate::partition::PartitionScheme;

const DEVICE_NAMESPACE: &str = r"\\.\";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceCategory {
    /// Whole disk carrying a partition table
    Physical,
    /// Single volume starting at its own boot sector
    Logical,
}

impl std::fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceCategory::Physical => write!(f, "physical"),
            DeviceCategory::Logical => write!(f, "logical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub path: PathBuf,
    pub category: DeviceCategory,
    pub scheme: PartitionScheme,
}

impl DeviceDescriptor {
    /// Normalize user input into a canonical device path
    ///
    /// `"1"` and `"PhysicalDrive1"` name physical drive 1, `"e"` and `"E:"`
    /// name logical volume E.
    pub fn classify(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let upper = trimmed.to_ascii_uppercase();

        if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
            return Ok(Self::physical_drive(trimmed));
        }

        if upper.contains("PHYSICALDRIVE") {
            let digits: String = upper
                .chars()
                .rev()
                .take_while(|c| c.is_ascii_digit())
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            if !digits.is_empty() {
                return Ok(Self::physical_drive(&digits));
            }
        }

        let mut chars = upper.chars();
        let letter = chars.next();
        let rest: String = chars.collect();
        if let Some(letter) = letter {
            if letter.is_ascii_alphabetic() && (rest.is_empty() || rest == ":") {
                return Ok(Self {
                    path: PathBuf::from(format!("{}{}:", DEVICE_NAMESPACE, letter)),
                    category: DeviceCategory::Logical,
                    scheme: PartitionScheme::Unknown,
                });
            }
        }

        Err(RecoveryError::InvalidDriveSpec(input.to_string()))
    }

    /// Describe a raw image file, bypassing drive-name normalization
    pub fn image<P: AsRef<Path>>(path: P, category: DeviceCategory) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            category,
            scheme: PartitionScheme::Unknown,
        }
    }

    /// Complete the descriptor once the partition scheme has been detected
    pub fn with_scheme(self, scheme: PartitionScheme) -> Self {
        Self { scheme, ..self }
    }

    fn physical_drive(index: &str) -> Self {
        Self {
            path: PathBuf::from(format!("{}PhysicalDrive{}", DEVICE_NAMESPACE, index)),
            category: DeviceCategory::Physical,
            scheme: PartitionScheme::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_number_is_physical() {
        let d = DeviceDescriptor::classify("2").unwrap();
        assert_eq!(d.category, DeviceCategory::Physical);
        assert_eq!(d.path, PathBuf::from(r"\\.\PhysicalDrive2"));
        assert_eq!(d.scheme, PartitionScheme::Unknown);
    }

    #[test]
    fn test_physical_drive_name_any_case() {
        let d = DeviceDescriptor::classify(r"\\.\physicaldrive11").unwrap();
        assert_eq!(d.category, DeviceCategory::Physical);
        assert_eq!(d.path, PathBuf::from(r"\\.\PhysicalDrive11"));
    }

    #[test]
    fn test_letter_is_logical() {
        for input in ["e", "E", "e:", "E:"] {
            let d = DeviceDescriptor::classify(input).unwrap();
            assert_eq!(d.category, DeviceCategory::Logical);
            assert_eq!(d.path, PathBuf::from(r"\\.\E:"));
        }
    }

    #[test]
    fn test_invalid_specs() {
        for input in ["", "EF", "E:\\", "PhysicalDrive", "1a", "?"] {
            assert!(
                matches!(
                    DeviceDescriptor::classify(input),
                    Err(RecoveryError::InvalidDriveSpec(_))
                ),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_with_scheme_keeps_identity() {
        let d = DeviceDescriptor::classify("0")
            .unwrap()
            .with_scheme(PartitionScheme::Gpt);
        assert_eq!(d.scheme, PartitionScheme::Gpt);
        assert_eq!(d.category, DeviceCategory::Physical);
    }
}
