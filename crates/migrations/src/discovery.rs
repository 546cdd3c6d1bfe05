//! Migration discovery
//!
//! Migrations live in a fixed list of roots: the framework's own folder, the
//! shared common folder, and `<modules>/<Name>/<Migrations>` for every module
//! installed when the paths are scanned. Each root is read one level deep;
//! nested directories are never descended into.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};
use trellis_core::MigrationSettings;

use crate::descriptor::MigrationDescriptor;
use crate::error::{MigrationError, MigrationResult};

/// The set of directories migrations are discovered in
#[derive(Debug, Clone)]
pub struct MigrationPaths {
    roots: Vec<PathBuf>,
    extension: String,
}

impl MigrationPaths {
    /// Resolve the migration roots described by `settings`.
    ///
    /// Module directories are listed once here, sorted by name. Modules
    /// installed afterwards are not seen until the paths are scanned again.
    pub fn scan(settings: &MigrationSettings) -> MigrationResult<Self> {
        let mut roots = vec![settings.framework_dir.clone(), settings.common_dir.clone()];

        if settings.modules_dir.is_dir() {
            let entries = fs::read_dir(&settings.modules_dir)
                .map_err(|e| MigrationError::io(&settings.modules_dir, e))?;

            let mut modules = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| MigrationError::io(&settings.modules_dir, e))?;
                let path = entry.path();
                if path.is_dir() {
                    modules.push(path);
                }
            }
            modules.sort();

            roots.extend(
                modules
                    .into_iter()
                    .map(|module| module.join(&settings.module_migrations_dir)),
            );
        }

        Ok(Self::from_roots(roots, &settings.extension))
    }

    /// Use an explicit list of roots
    pub fn from_roots(roots: Vec<PathBuf>, extension: &str) -> Self {
        Self {
            roots,
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    /// Every root, including ones that do not exist on disk
    pub fn directories(&self) -> &[PathBuf] {
        &self.roots
    }

    /// File extension of migration definitions
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// All migration files across every root, keyed by absolute path.
    ///
    /// Files with the migration extension but no `_` in their name (such as a
    /// `mod.rs` sitting next to the migrations) are ignored. The same file
    /// name appearing in two roots is an error, since the ledger only records
    /// file names.
    pub fn migration_files(&self) -> MigrationResult<BTreeMap<PathBuf, MigrationDescriptor>> {
        let mut files = BTreeMap::new();
        let mut seen: HashMap<String, PathBuf> = HashMap::new();

        for root in &self.roots {
            for descriptor in self.read_root(root)? {
                let path = descriptor.path();

                if let Some(first) = seen.insert(descriptor.file_name.clone(), path.clone()) {
                    return Err(MigrationError::DuplicateMigration {
                        file_name: descriptor.file_name,
                        first,
                        second: path,
                    });
                }

                files.insert(path, descriptor);
            }
        }

        Ok(files)
    }

    /// Locate one migration file by exact name. Names that are not a single
    /// path component are rejected.
    pub fn find(&self, file_name: &str) -> MigrationResult<Option<MigrationDescriptor>> {
        let mut components = Path::new(file_name).components();
        let is_plain_name = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !is_plain_name || file_name.contains(['/', '\\']) {
            return Err(MigrationError::InvalidFileName {
                file_name: file_name.to_string(),
                reason: "must be a bare file name".to_string(),
            });
        }

        for root in &self.roots {
            let candidate = root.join(file_name);
            if candidate.is_file() {
                let directory = absolute(root)?;
                return MigrationDescriptor::parse(file_name, directory, &self.extension).map(Some);
            }
        }

        Ok(None)
    }

    fn read_root(&self, root: &Path) -> MigrationResult<Vec<MigrationDescriptor>> {
        if !root.is_dir() {
            tracing::debug!("Skipping missing migrations directory {}", root.display());
            return Ok(Vec::new());
        }

        let directory = absolute(root)?;
        let entries = fs::read_dir(&directory).map_err(|e| MigrationError::io(&directory, e))?;

        let mut descriptors = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| MigrationError::io(&directory, e))?;
            let path = entry.path();

            if !path.is_file() || path.extension().map_or(true, |ext| ext != self.extension.as_str()) {
                continue;
            }

            match MigrationDescriptor::from_path(&path, &self.extension) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(MigrationError::InvalidFileName { file_name, reason }) => {
                    tracing::debug!("Ignoring {}: {}", file_name, reason);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(descriptors)
    }
}

fn absolute(path: &Path) -> MigrationResult<PathBuf> {
    fs::canonicalize(path).map_err(|e| MigrationError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), "// migration").unwrap();
    }

    fn settings(root: &Path) -> MigrationSettings {
        MigrationSettings {
            framework_dir: root.join("framework/migrations"),
            common_dir: root.join("common/migrations"),
            modules_dir: root.join("modules"),
            ..MigrationSettings::default()
        }
    }

    #[test]
    fn test_scan_lists_module_roots_in_name_order() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("modules/Sales/Migrations")).unwrap();
        fs::create_dir_all(temp.path().join("modules/Contacts/Migrations")).unwrap();
        fs::write(temp.path().join("modules/README.md"), "modules").unwrap();

        let paths = MigrationPaths::scan(&settings(temp.path())).unwrap();

        assert_eq!(
            paths.directories(),
            &[
                temp.path().join("framework/migrations"),
                temp.path().join("common/migrations"),
                temp.path().join("modules/Contacts/Migrations"),
                temp.path().join("modules/Sales/Migrations"),
            ]
        );
    }

    #[test]
    fn test_migration_files_across_roots() {
        let temp = TempDir::new().unwrap();
        touch(
            &temp.path().join("framework/migrations"),
            "2025-01-01T00.00.00.000000_CreateUsers.rs",
        );
        touch(
            &temp.path().join("modules/Crm/Migrations"),
            "2025-02-01T00.00.00.000000_CreateContacts.rs",
        );
        touch(&temp.path().join("modules/Crm/Migrations"), "mod.rs");
        touch(&temp.path().join("modules/Crm/Migrations"), "notes.txt");
        touch(
            &temp.path().join("modules/Crm/Migrations/nested"),
            "2025-03-01T00.00.00.000000_Nested.rs",
        );

        let paths = MigrationPaths::scan(&settings(temp.path())).unwrap();
        let files = paths.migration_files().unwrap();

        let mut names: Vec<_> = files.values().map(|d| d.class_name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["CreateContacts", "CreateUsers"]);
        assert!(files.keys().all(|path| path.is_absolute()));
    }

    #[test]
    fn test_duplicate_file_names_are_rejected() {
        let temp = TempDir::new().unwrap();
        let name = "2025-01-01T00.00.00.000000_CreateUsers.rs";
        touch(&temp.path().join("framework/migrations"), name);
        touch(&temp.path().join("common/migrations"), name);

        let paths = MigrationPaths::scan(&settings(temp.path())).unwrap();

        assert!(matches!(
            paths.migration_files(),
            Err(MigrationError::DuplicateMigration { ref file_name, .. }) if file_name == name
        ));
    }

    #[test]
    fn test_find_by_file_name() {
        let temp = TempDir::new().unwrap();
        let name = "2025-01-01T00.00.00.000000_CreateUsers.rs";
        touch(&temp.path().join("common/migrations"), name);

        let paths = MigrationPaths::scan(&settings(temp.path())).unwrap();

        let found = paths.find(name).unwrap().unwrap();
        assert_eq!(found.class_name, "CreateUsers");
        assert!(found.path().is_file());

        assert!(paths.find("2025-09-09T00.00.00.000000_Gone.rs").unwrap().is_none());
    }

    #[test]
    fn test_find_rejects_paths() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("common"), "2025-01-01T00.00.00.000000_Escape.rs");

        let paths = MigrationPaths::scan(&settings(temp.path())).unwrap();

        for name in [
            "../2025-01-01T00.00.00.000000_Escape.rs",
            "nested/2025-01-01T00.00.00.000000_Escape.rs",
            "..",
            "",
        ] {
            assert!(matches!(
                paths.find(name),
                Err(MigrationError::InvalidFileName { .. })
            ));
        }
    }
}
