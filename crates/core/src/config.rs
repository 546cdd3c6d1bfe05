use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Name of the connection that `DATABASE_URL` configures
pub const DEFAULT_CONNECTION: &str = "default";

const CONNECTION_URL_PREFIX: &str = "DATABASE_URL_";

/// Configuration trait for environment-driven configuration sections
pub trait ConfigTrait: Sized {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self, ConfigError>;

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError>;

    /// Get configuration source information for debugging
    fn config_sources(&self) -> HashMap<String, ConfigSource>;
}

/// Where a configuration value came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    EnvVar(String),
    Default(String),
    Nested,
}

/// Environment enumeration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Testing,
    Production,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testing" | "test" => Ok(Environment::Testing),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidValue {
                field: "environment".to_string(),
                value: s.to_string(),
                expected: "development, testing, or production".to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Testing => write!(f, "testing"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Top-level configuration for the migration tooling
#[derive(Debug, Clone)]
pub struct TrellisConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub migrations: MigrationSettings,
    pub logging: LoggingConfig,
}

/// Named database connections
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    /// Connection name -> connection URL
    pub connections: BTreeMap<String, String>,
    /// Pool size for every named connection
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// URL for a named connection, if one was configured
    pub fn url(&self, name: &str) -> Option<&str> {
        self.connections.get(name).map(String::as_str)
    }

    /// URL for a named connection, failing with the variable the user has to set
    pub fn require_url(&self, name: &str) -> Result<&str, ConfigError> {
        self.url(name).ok_or_else(|| ConfigError::MissingEnvVar {
            var: connection_env_var(name),
        })
    }
}

/// Where migration definitions live and how the ledger is stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSettings {
    /// Migrations shipped with the framework itself
    pub framework_dir: PathBuf,
    /// Migrations shared by the whole application
    pub common_dir: PathBuf,
    /// Directory holding one sub-directory per installed module
    pub modules_dir: PathBuf,
    /// Folder name inside each module that holds its migrations
    pub module_migrations_dir: String,
    /// File extension of migration definition files, without the dot
    pub extension: String,
    /// Ledger table name
    pub table: String,
    /// Connection the ledger is stored on
    pub connection: String,
    /// Wrap each migration's statements in a transaction when the adapter allows it
    pub transactional: bool,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            framework_dir: PathBuf::from("framework/migrations"),
            common_dir: PathBuf::from("common/migrations"),
            modules_dir: PathBuf::from("modules"),
            module_migrations_dir: "Migrations".to_string(),
            extension: "rs".to_string(),
            table: "migrations".to_string(),
            connection: DEFAULT_CONNECTION.to_string(),
            transactional: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl ConfigTrait for TrellisConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let environment = get_env_or_default("APP_ENV", "development")?;
        let environment = Environment::from_str(&environment)?;

        Ok(TrellisConfig {
            environment,
            database: DatabaseConfig::from_env()?,
            migrations: MigrationSettings::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.migrations.validate()?;
        self.logging.validate()?;

        if !self.database.connections.is_empty()
            && self.database.url(&self.migrations.connection).is_none()
        {
            return Err(ConfigError::ValidationFailed {
                field: "connection".to_string(),
                reason: format!(
                    "ledger connection '{}' is not configured (set {})",
                    self.migrations.connection,
                    connection_env_var(&self.migrations.connection)
                ),
            });
        }

        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let mut sources = HashMap::new();
        sources.insert(
            "environment".to_string(),
            ConfigSource::EnvVar("APP_ENV".to_string()),
        );
        sources.insert("database".to_string(), ConfigSource::Nested);
        sources.insert("migrations".to_string(), ConfigSource::Nested);
        sources.insert("logging".to_string(), ConfigSource::Nested);
        sources
    }
}

impl ConfigTrait for DatabaseConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let mut connections = BTreeMap::new();

        if let Some(url) = get_env_optional("DATABASE_URL") {
            connections.insert(DEFAULT_CONNECTION.to_string(), url);
        }

        for (key, value) in env::vars() {
            if let Some(name) = key.strip_prefix(CONNECTION_URL_PREFIX) {
                if !name.is_empty() {
                    connections.insert(name.to_lowercase(), value);
                }
            }
        }

        let max_connections = get_env_or_default("DB_MAX_CONNECTIONS", "5")?;
        let max_connections = max_connections
            .parse::<u32>()
            .map_err(|_| ConfigError::InvalidValue {
                field: "max_connections".to_string(),
                value: max_connections,
                expected: "a positive integer".to_string(),
            })?;

        Ok(DatabaseConfig {
            connections,
            max_connections,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationFailed {
                field: "max_connections".to_string(),
                reason: "Pool size cannot be 0".to_string(),
            });
        }

        for (name, url) in &self.connections {
            if url.trim().is_empty() {
                return Err(ConfigError::ValidationFailed {
                    field: connection_env_var(name),
                    reason: "Database URL cannot be empty".to_string(),
                });
            }
        }

        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let mut sources = HashMap::new();
        for name in self.connections.keys() {
            sources.insert(
                format!("connections.{}", name),
                ConfigSource::EnvVar(connection_env_var(name)),
            );
        }
        sources.insert(
            "max_connections".to_string(),
            ConfigSource::EnvVar("DB_MAX_CONNECTIONS".to_string()),
        );
        sources
    }
}

impl ConfigTrait for MigrationSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = MigrationSettings::default();

        let transactional = get_env_or_default("MIGRATIONS_TRANSACTIONAL", "false")?;
        let transactional = parse_bool("transactional", &transactional)?;

        Ok(MigrationSettings {
            framework_dir: get_env_optional("MIGRATIONS_FRAMEWORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.framework_dir),
            common_dir: get_env_optional("MIGRATIONS_COMMON_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.common_dir),
            modules_dir: get_env_optional("MODULES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.modules_dir),
            module_migrations_dir: get_env_or_default(
                "MODULE_MIGRATIONS_DIR",
                &defaults.module_migrations_dir,
            )?,
            extension: get_env_or_default("MIGRATIONS_EXTENSION", &defaults.extension)?
                .trim_start_matches('.')
                .to_string(),
            table: get_env_or_default("MIGRATIONS_TABLE", &defaults.table)?,
            connection: get_env_or_default("MIGRATIONS_CONNECTION", &defaults.connection)?
                .to_lowercase(),
            transactional,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !is_identifier(&self.table) {
            return Err(ConfigError::InvalidValue {
                field: "table".to_string(),
                value: self.table.clone(),
                expected: "a plain SQL identifier".to_string(),
            });
        }

        if !is_identifier(&self.connection) {
            return Err(ConfigError::InvalidValue {
                field: "connection".to_string(),
                value: self.connection.clone(),
                expected: "a connection name made of letters, digits and underscores".to_string(),
            });
        }

        if self.extension.is_empty() {
            return Err(ConfigError::ValidationFailed {
                field: "extension".to_string(),
                reason: "Migration file extension cannot be empty".to_string(),
            });
        }

        if self.module_migrations_dir.is_empty() {
            return Err(ConfigError::ValidationFailed {
                field: "module_migrations_dir".to_string(),
                reason: "Module migrations folder name cannot be empty".to_string(),
            });
        }

        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let mut sources = HashMap::new();
        for (field, var) in [
            ("framework_dir", "MIGRATIONS_FRAMEWORK_DIR"),
            ("common_dir", "MIGRATIONS_COMMON_DIR"),
            ("modules_dir", "MODULES_DIR"),
            ("module_migrations_dir", "MODULE_MIGRATIONS_DIR"),
            ("extension", "MIGRATIONS_EXTENSION"),
            ("table", "MIGRATIONS_TABLE"),
            ("connection", "MIGRATIONS_CONNECTION"),
            ("transactional", "MIGRATIONS_TRANSACTIONAL"),
        ] {
            let source = if env::var(var).is_ok() {
                ConfigSource::EnvVar(var.to_string())
            } else {
                ConfigSource::Default(var.to_string())
            };
            sources.insert(field.to_string(), source);
        }
        sources
    }
}

impl ConfigTrait for LoggingConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let level = get_env_or_default("LOG_LEVEL", "info")?;
        let format = get_env_or_default("LOG_FORMAT", "compact")?;

        Ok(LoggingConfig { level, format })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "level".to_string(),
                value: self.level.clone(),
                expected: "trace, debug, info, warn, or error".to_string(),
            });
        }

        let valid_formats = ["compact", "pretty", "json"];
        if !valid_formats.contains(&self.format.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "format".to_string(),
                value: self.format.clone(),
                expected: "compact, pretty, or json".to_string(),
            });
        }

        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let mut sources = HashMap::new();
        sources.insert(
            "level".to_string(),
            ConfigSource::EnvVar("LOG_LEVEL".to_string()),
        );
        sources.insert(
            "format".to_string(),
            ConfigSource::EnvVar("LOG_FORMAT".to_string()),
        );
        sources
    }
}

/// Environment variable that configures a named connection
pub fn connection_env_var(name: &str) -> String {
    if name == DEFAULT_CONNECTION {
        "DATABASE_URL".to_string()
    } else {
        format!("{}{}", CONNECTION_URL_PREFIX, name.to_uppercase())
    }
}

fn is_identifier(value: &str) -> bool {
    static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    IDENTIFIER
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"))
        .is_match(value)
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: "true or false".to_string(),
        }),
    }
}

// Helper functions for environment variable handling
fn get_env_optional(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn get_env_or_default(key: &str, default: &str) -> Result<String, ConfigError> {
    Ok(env::var(key).unwrap_or_else(|_| default.to_string()))
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}")]
    MissingEnvVar { var: String },

    #[error("Invalid value for {field}: '{value}', expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Validation failed for {field}: {reason}")]
    ValidationFailed { field: String, reason: String },

    #[error("Logging initialization error: {message}")]
    Logging { message: String },
}
