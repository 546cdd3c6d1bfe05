//! New migration files
//!
//! `MigrationScaffold` writes an empty migration definition whose file name
//! and type name already satisfy the naming contract. The generated type
//! still has to be registered with the application's `MigrationRegistry`.

use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::descriptor::pascal_case;
use crate::error::{MigrationError, MigrationResult};

/// `chrono` format of the timestamp segment of a migration file name
pub const TIMESTAMP_KEY_FORMAT: &str = "%Y-%m-%dT%H.%M.%S%.6f";

/// Writes new migration files
#[derive(Debug, Clone)]
pub struct MigrationScaffold {
    extension: String,
}

impl Default for MigrationScaffold {
    fn default() -> Self {
        Self::new("rs")
    }
}

impl MigrationScaffold {
    pub fn new(extension: &str) -> Self {
        Self {
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    /// Type name for a human-entered migration name
    pub fn class_name(name: &str) -> MigrationResult<String> {
        let class_name = pascal_case(name);

        let valid = class_name
            .chars()
            .next()
            .map_or(false, |first| first.is_ascii_alphabetic())
            && class_name.chars().all(|c| c.is_ascii_alphanumeric());

        if !valid {
            return Err(MigrationError::InvalidFileName {
                file_name: name.to_string(),
                reason: "migration names must start with a letter and contain only letters, digits, spaces, '-' or '_'".to_string(),
            });
        }

        Ok(class_name)
    }

    /// `<timestamp>_<ClassName>.<ext>` for a migration created at `now`
    pub fn file_name(&self, class_name: &str, now: DateTime<Utc>) -> String {
        format!(
            "{}_{}.{}",
            now.format(TIMESTAMP_KEY_FORMAT),
            class_name,
            self.extension
        )
    }

    /// Create a migration named `name` in `directory` and return its path
    pub fn create(&self, name: &str, directory: &Path) -> MigrationResult<PathBuf> {
        self.create_at(name, directory, Utc::now())
    }

    pub fn create_at(&self, name: &str, directory: &Path, now: DateTime<Utc>) -> MigrationResult<PathBuf> {
        let class_name = Self::class_name(name)?;
        let file_name = self.file_name(&class_name, now);
        let timestamp_key = now.format(TIMESTAMP_KEY_FORMAT).to_string();

        fs::create_dir_all(directory).map_err(|e| MigrationError::io(directory, e))?;

        let path = directory.join(&file_name);
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| MigrationError::io(&path, e))?;

        file.write_all(render_template(&class_name, &timestamp_key).as_bytes())
            .map_err(|e| MigrationError::io(&path, e))?;

        tracing::info!("Created migration {}", path.display());
        Ok(path)
    }
}

fn render_template(class_name: &str, timestamp_key: &str) -> String {
    format!(
        r#"// Register with:
//     registry.register::<{class}>("{key}");

use trellis_migrations::{{DropKind, Migration, Schema}};

#[derive(Default)]
pub struct {class};

impl Migration for {class} {{
    fn up(&self, schema: &mut Schema) {{
        schema.create("table_name", |table| {{
            table.id("id");
            table.timestamps();
        }});
    }}

    fn down(&self, schema: &mut Schema) {{
        schema.drop("table_name", DropKind::Table);
    }}
}}
"#,
        class = class_name,
        key = timestamp_key
    )
}
