use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub guard: GuardConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL; the path component is replaced by `name` when set
    pub url: Option<String>,
    pub name: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub enable_query_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Tables whose rows belong to a tenant and follow it into deactivation
    pub tenant_scoped_tables: Vec<String>,
    pub max_limit: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Persist audit records to `audit_logs`; otherwise they only go to tracing
    pub enable_audit_logging: bool,
}

/// Configuration keys addressable at runtime (CLI `config get`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    Environment,
    DatabaseName,
    DatabaseMaxConnections,
    DatabaseConnectionTimeout,
    DatabaseQueryLogging,
    TenantScopedTables,
    MaxLimit,
    AuditLogging,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Text(String),
    List(Vec<String>),
    Unset,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 8] = [
        ConfigKey::Environment,
        ConfigKey::DatabaseName,
        ConfigKey::DatabaseMaxConnections,
        ConfigKey::DatabaseConnectionTimeout,
        ConfigKey::DatabaseQueryLogging,
        ConfigKey::TenantScopedTables,
        ConfigKey::MaxLimit,
        ConfigKey::AuditLogging,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::Environment => "environment",
            ConfigKey::DatabaseName => "database.name",
            ConfigKey::DatabaseMaxConnections => "database.max_connections",
            ConfigKey::DatabaseConnectionTimeout => "database.connection_timeout",
            ConfigKey::DatabaseQueryLogging => "database.enable_query_logging",
            ConfigKey::TenantScopedTables => "guard.tenant_scoped_tables",
            ConfigKey::MaxLimit => "guard.max_limit",
            ConfigKey::AuditLogging => "security.enable_audit_logging",
        }
    }
}

impl std::str::FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown config key '{}'", s)))
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{}", b),
            ConfigValue::Int(i) => write!(f, "{}", i),
            ConfigValue::Text(s) => write!(f, "{}", s),
            ConfigValue::List(items) => write!(f, "{}", items.join(",")),
            ConfigValue::Unset => write!(f, "(unset)"),
        }
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, raw: &str, expected: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{}: '{}' is not {}", key, raw, expected)))
}

/// Tables every deployment must cascade into
pub const REQUIRED_SCOPED_TABLES: &[&str] = &["users", "files", "projects"];

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        Self::preset(environment).with_env_overrides()
    }

    /// Load a YAML file, then let the environment override it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: AppConfig = serde_yaml::from_str(&raw)?;
        config.with_env_overrides()
    }

    pub fn preset(environment: Environment) -> Self {
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
    }

    fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply `DATABASE_*`, `GUARD_*` and `SECURITY_*` overrides. A value that
    /// does not parse is an error rather than a silent fallback.
    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Database overrides
        if let Some(v) = lookup("DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Some(v) = lookup("DATABASE_NAME") {
            self.database.name = Some(v);
        }
        if let Some(v) = lookup("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_override("DATABASE_MAX_CONNECTIONS", &v, "a positive number")?;
        }
        if let Some(v) = lookup("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = parse_override("DATABASE_CONNECTION_TIMEOUT", &v, "a number of seconds")?;
        }
        if let Some(v) = lookup("DATABASE_ENABLE_QUERY_LOGGING") {
            self.database.enable_query_logging = parse_override("DATABASE_ENABLE_QUERY_LOGGING", &v, "true or false")?;
        }

        // Guard overrides
        if let Some(v) = lookup("GUARD_TENANT_SCOPED_TABLES") {
            self.guard.tenant_scoped_tables = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = lookup("GUARD_MAX_LIMIT") {
            // Empty lifts the cap
            self.guard.max_limit = match v.trim() {
                "" => None,
                raw => Some(parse_override("GUARD_MAX_LIMIT", raw, "a number")?),
            };
        }

        // Security overrides
        if let Some(v) = lookup("SECURITY_ENABLE_AUDIT_LOGGING") {
            self.security.enable_audit_logging = parse_override("SECURITY_ENABLE_AUDIT_LOGGING", &v, "true or false")?;
        }

        Ok(self)
    }

    /// Reject configurations the guard cannot run with. Called once at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid("database.max_connections must be at least 1".to_string()));
        }
        if let Some(limit) = self.guard.max_limit {
            if limit <= 0 {
                return Err(ConfigError::Invalid("guard.max_limit must be positive".to_string()));
            }
        }
        for table in &self.guard.tenant_scoped_tables {
            if !crate::filter::is_valid_identifier(table) {
                return Err(ConfigError::Invalid(format!("invalid tenant-scoped table name '{}'", table)));
            }
            if table == "tenants" {
                return Err(ConfigError::Invalid("'tenants' cannot be tenant-scoped".to_string()));
            }
        }
        for required in REQUIRED_SCOPED_TABLES {
            if !self.guard.tenant_scoped_tables.iter().any(|t| t == required) {
                return Err(ConfigError::Invalid(format!(
                    "guard.tenant_scoped_tables must include '{}'",
                    required
                )));
            }
        }
        Ok(())
    }

    /// Typed lookup by key
    pub fn get(&self, key: ConfigKey) -> ConfigValue {
        match key {
            ConfigKey::Environment => ConfigValue::Text(format!("{:?}", self.environment).to_lowercase()),
            ConfigKey::DatabaseName => self
                .database
                .name
                .clone()
                .map(ConfigValue::Text)
                .unwrap_or(ConfigValue::Unset),
            ConfigKey::DatabaseMaxConnections => ConfigValue::Int(self.database.max_connections as i64),
            ConfigKey::DatabaseConnectionTimeout => ConfigValue::Int(self.database.connection_timeout as i64),
            ConfigKey::DatabaseQueryLogging => ConfigValue::Bool(self.database.enable_query_logging),
            ConfigKey::TenantScopedTables => ConfigValue::List(self.guard.tenant_scoped_tables.clone()),
            ConfigKey::MaxLimit => self
                .guard
                .max_limit
                .map(|l| ConfigValue::Int(l as i64))
                .unwrap_or(ConfigValue::Unset),
            ConfigKey::AuditLogging => ConfigValue::Bool(self.security.enable_audit_logging),
        }
    }

    fn default_scoped_tables() -> Vec<String> {
        REQUIRED_SCOPED_TABLES.iter().map(|s| s.to_string()).collect()
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                url: None,
                name: None,
                max_connections: 5,
                connection_timeout: 30,
                enable_query_logging: true,
            },
            guard: GuardConfig {
                tenant_scoped_tables: Self::default_scoped_tables(),
                max_limit: Some(1000),
            },
            security: SecurityConfig {
                enable_audit_logging: true,
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                url: None,
                name: None,
                max_connections: 10,
                connection_timeout: 10,
                enable_query_logging: true,
            },
            guard: GuardConfig {
                tenant_scoped_tables: Self::default_scoped_tables(),
                max_limit: Some(500),
            },
            security: SecurityConfig {
                enable_audit_logging: true,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                url: None,
                name: None,
                max_connections: 20,
                connection_timeout: 5,
                enable_query_logging: false,
            },
            guard: GuardConfig {
                tenant_scoped_tables: Self::default_scoped_tables(),
                max_limit: Some(100),
            },
            security: SecurityConfig {
                enable_audit_logging: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_url(mut config: AppConfig) -> AppConfig {
        config.database.url = Some("postgres://localhost/nexio".to_string());
        config
    }

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: std::collections::HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_overrides_apply_parsed_values() {
        let config = AppConfig::preset(Environment::Development)
            .apply_overrides(overrides(&[
                ("DATABASE_URL", "postgres://db/nexio"),
                ("DATABASE_MAX_CONNECTIONS", "12"),
                ("GUARD_MAX_LIMIT", " 250 "),
                ("GUARD_TENANT_SCOPED_TABLES", "users, files,projects,tasks"),
                ("SECURITY_ENABLE_AUDIT_LOGGING", "false"),
            ]))
            .unwrap();
        assert_eq!(config.database.url.as_deref(), Some("postgres://db/nexio"));
        assert_eq!(config.database.max_connections, 12);
        assert_eq!(config.guard.max_limit, Some(250));
        assert_eq!(config.guard.tenant_scoped_tables, vec!["users", "files", "projects", "tasks"]);
        assert!(!config.security.enable_audit_logging);
    }

    #[test]
    fn test_unparseable_overrides_are_errors() {
        let typo = AppConfig::preset(Environment::Production).apply_overrides(overrides(&[("GUARD_MAX_LIMIT", "1O00")]));
        match typo {
            Err(ConfigError::Invalid(msg)) => assert!(msg.starts_with("GUARD_MAX_LIMIT: '1O00'"), "{}", msg),
            other => panic!("expected invalid config, got {:?}", other.map(|c| c.guard.max_limit)),
        }

        let negative = AppConfig::preset(Environment::Development)
            .apply_overrides(overrides(&[("DATABASE_MAX_CONNECTIONS", "-4")]));
        assert!(matches!(negative, Err(ConfigError::Invalid(_))));

        let flag = AppConfig::preset(Environment::Development)
            .apply_overrides(overrides(&[("SECURITY_ENABLE_AUDIT_LOGGING", "yes")]));
        assert!(matches!(flag, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_empty_max_limit_lifts_the_cap() {
        let config = AppConfig::preset(Environment::Production)
            .apply_overrides(overrides(&[("GUARD_MAX_LIMIT", "")]))
            .unwrap();
        assert_eq!(config.guard.max_limit, None);
    }

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::preset(Environment::Development);
        assert!(config.database.enable_query_logging);
        assert_eq!(config.guard.max_limit, Some(1000));
        assert_eq!(config.guard.tenant_scoped_tables, vec!["users", "files", "projects"]);
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::preset(Environment::Production);
        assert!(!config.database.enable_query_logging);
        assert_eq!(config.guard.max_limit, Some(100));
        assert!(config.security.enable_audit_logging);
    }

    #[test]
    fn validate_requires_database_url() {
        let config = AppConfig::preset(Environment::Development);
        assert!(matches!(config.validate(), Err(ConfigError::Missing("DATABASE_URL"))));
        assert!(with_url(config).validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_required_scoped_table() {
        let mut config = with_url(AppConfig::preset(Environment::Staging));
        config.guard.tenant_scoped_tables.retain(|t| t != "files");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validate_rejects_bad_identifiers() {
        let mut config = with_url(AppConfig::preset(Environment::Staging));
        config.guard.tenant_scoped_tables.push("notes; DROP TABLE x".to_string());
        assert!(config.validate().is_err());

        let mut config = with_url(AppConfig::preset(Environment::Staging));
        config.guard.tenant_scoped_tables.push("tenants".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn keys_round_trip_through_names() {
        for key in ConfigKey::ALL {
            assert_eq!(key.as_str().parse::<ConfigKey>().unwrap(), key);
        }
        assert!("backup.retention".parse::<ConfigKey>().is_err());
    }

    #[test]
    fn typed_lookup() {
        let config = AppConfig::preset(Environment::Production);
        assert_eq!(config.get(ConfigKey::MaxLimit), ConfigValue::Int(100));
        assert_eq!(config.get(ConfigKey::AuditLogging), ConfigValue::Bool(true));
        assert_eq!(config.get(ConfigKey::DatabaseName), ConfigValue::Unset);
        assert_eq!(config.get(ConfigKey::Environment).to_string(), "production");
    }

    #[test]
    fn yaml_config_parses() {
        let yaml = r#"
environment: Staging
database:
  url: postgres://db/nexio
  name: nexio_main
  max_connections: 4
  connection_timeout: 3
  enable_query_logging: false
guard:
  tenant_scoped_tables: [users, files, projects, tasks]
  max_limit: 50
security:
  enable_audit_logging: true
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.environment, Environment::Staging);
        assert_eq!(config.guard.tenant_scoped_tables.len(), 4);
        assert!(config.validate().is_ok());
    }
}
