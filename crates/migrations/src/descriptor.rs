//! Migration file names
//!
//! A migration file is named `<timestamp>_<ClassName>.<ext>`, for example
//! `2025-03-04T12.50.00.000000_ErrorLog.rs`. The timestamp segment uses dots
//! instead of colons so it stays filesystem safe while still sorting
//! chronologically as a plain string.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::{MigrationError, MigrationResult};

/// A migration definition found on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationDescriptor {
    /// Base file name, used as the ledger key
    pub file_name: String,
    /// Directory the file was found in
    pub directory: PathBuf,
    /// Sort key taken from the first `_` segment
    pub timestamp_key: String,
    /// Expected migration type name, pascal-cased from the second segment
    pub class_name: String,
}

impl MigrationDescriptor {
    /// Parse a file name found in `directory`.
    ///
    /// Only the first two `_`-separated segments are used. A class segment
    /// that itself contains underscores is therefore truncated at the first
    /// one; keep migration names free of underscores.
    pub fn parse(
        file_name: &str,
        directory: impl Into<PathBuf>,
        extension: &str,
    ) -> MigrationResult<Self> {
        let invalid = |reason: &str| MigrationError::InvalidFileName {
            file_name: file_name.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = file_name.split('_');
        let timestamp_key = segments.next().unwrap_or_default();
        let class_segment = segments
            .next()
            .ok_or_else(|| invalid("expected <timestamp>_<ClassName>"))?;

        if timestamp_key.is_empty() {
            return Err(invalid("timestamp segment is empty"));
        }

        let suffix = format!(".{}", extension);
        let class_segment = class_segment
            .strip_suffix(suffix.as_str())
            .unwrap_or(class_segment);

        let class_name = pascal_case(class_segment);
        if class_name.is_empty() {
            return Err(invalid("class segment is empty"));
        }

        Ok(Self {
            file_name: file_name.to_string(),
            directory: directory.into(),
            timestamp_key: timestamp_key.to_string(),
            class_name,
        })
    }

    /// Parse the descriptor for a file path
    pub fn from_path(path: &Path, extension: &str) -> MigrationResult<Self> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| MigrationError::InvalidFileName {
                file_name: path.display().to_string(),
                reason: "file name is not valid UTF-8".to_string(),
            })?;
        let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();

        Self::parse(file_name, directory, extension)
    }

    /// Full path of the definition file
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

/// Pascal-case a name: words split on `-`, `_` or whitespace, each word's first
/// letter upper-cased, the rest kept as written.
pub fn pascal_case(value: &str) -> String {
    value
        .split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}
