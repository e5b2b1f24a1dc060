//! Step configuration loader.
//!
//! A step file names the target table, the column mappings and run options,
//! and optionally the SQL Server credentials. Credentials missing from the
//! file fall back to `MSSQL_*` environment variables (after `.env` loading).

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use crate::backend::ConnectionOptions;
use crate::error::InsertError;
use crate::expression::ValueExpression;
use crate::identifier::TableReference;
use crate::run::{InsertPlan, RunOptions};
use crate::statement::{self, ColumnMapping, PreparedStatement};
use crate::types::LogicalType;

const DEFAULT_DATA_TYPE: &str = "nvarchar";

/// Error type for configuration loading
#[derive(Debug)]
pub enum ConfigError {
    Io { path: String, source: std::io::Error },
    Parse(String),
    /// A required credential is absent from both the file and the environment
    MissingCredential(&'static str),
    InvalidValue { field: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "Failed to read config file {}: {}", path, source)
            }
            ConfigError::Parse(msg) => write!(f, "Failed to parse YAML: {}", msg),
            ConfigError::MissingCredential(name) => write!(
                f,
                "Missing credential '{}' (set it under 'credentials' or via MSSQL_{})",
                name,
                name.to_uppercase()
            ),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// One configured column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub column_name: String,
    #[serde(default = "default_data_type")]
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u8>,
    /// `None` when the key is absent; an explicit `null` is `Some(Null)`
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<JsonValue>,
}

fn default_data_type() -> String {
    DEFAULT_DATA_TYPE.to_string()
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<JsonValue>, D::Error>
where
    D: Deserializer<'de>,
{
    JsonValue::deserialize(deserializer).map(Some)
}

impl ColumnConfig {
    /// Convert to a mapping, resolving the type name
    pub fn to_mapping(&self) -> Result<ColumnMapping, InsertError> {
        let data_type: LogicalType = self.data_type.parse()?;
        let value = self.value.clone().ok_or_else(|| ConfigError::InvalidValue {
            field: format!("columns.{}.value", self.column_name),
            reason: "a value is required, e.g. \"={{ $json.field }}\"".to_string(),
        })?;

        Ok(ColumnMapping {
            column_name: self.column_name.clone(),
            data_type,
            length: self.length,
            precision: self.precision,
            scale: self.scale,
            value: ValueExpression::new(value),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvancedOptions {
    #[serde(default)]
    pub use_transaction: bool,
    /// Overrides the credential's setting when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_server_certificate: Option<bool>,
}

/// Credentials as written in the step file; every field may come from the environment instead
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialsConfig {
    pub user: Option<String>,
    pub password: Option<String>,
    pub server: Option<String>,
    pub database: Option<String>,
    pub port: Option<u16>,
    pub domain: Option<String>,
    pub encrypt: Option<bool>,
    pub trust_server_certificate: Option<bool>,
}

impl CredentialsConfig {
    /// Read every `MSSQL_*` variable through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            user: lookup("MSSQL_USER"),
            password: lookup("MSSQL_PASSWORD"),
            server: lookup("MSSQL_SERVER"),
            database: lookup("MSSQL_DATABASE"),
            port: parse_env(&lookup, "MSSQL_PORT")?,
            domain: lookup("MSSQL_DOMAIN").filter(|d| !d.is_empty()),
            encrypt: parse_env_bool(&lookup, "MSSQL_ENCRYPT")?,
            trust_server_certificate: parse_env_bool(&lookup, "MSSQL_TRUST_SERVER_CERTIFICATE")?,
        })
    }

    /// Read credentials from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Fill fields missing here from `fallback`
    pub fn or(self, fallback: CredentialsConfig) -> Self {
        Self {
            user: self.user.or(fallback.user),
            password: self.password.or(fallback.password),
            server: self.server.or(fallback.server),
            database: self.database.or(fallback.database),
            port: self.port.or(fallback.port),
            domain: self.domain.or(fallback.domain),
            encrypt: self.encrypt.or(fallback.encrypt),
            trust_server_certificate: self
                .trust_server_certificate
                .or(fallback.trust_server_certificate),
        }
    }
}

fn parse_env<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                field: key.to_string(),
                reason: e.to_string(),
            }),
    }
}

fn parse_env_bool<F>(lookup: &F, key: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "" => Ok(None),
            "1" | "true" | "yes" => Ok(Some(true)),
            "0" | "false" | "no" => Ok(Some(false)),
            other => Err(ConfigError::InvalidValue {
                field: key.to_string(),
                reason: format!("expected a boolean, got '{}'", other),
            }),
        },
    }
}

/// A complete insert step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub columns: Vec<ColumnConfig>,
    #[serde(default)]
    pub advanced: AdvancedOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialsConfig>,
}

impl StepConfig {
    /// Load a step from a YAML file.
    ///
    /// # Example
    /// ```ignore
    /// use insertmap::config::StepConfig;
    ///
    /// let step = StepConfig::load_from_file("demos/people.yaml")?;
    /// println!("{}", step.prepare()?.sql());
    /// ```
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn table_reference(&self) -> Result<TableReference, InsertError> {
        TableReference::parse(&self.table)
    }

    pub fn column_mappings(&self) -> Result<Vec<ColumnMapping>, InsertError> {
        self.columns.iter().map(ColumnConfig::to_mapping).collect()
    }

    /// Validate everything that can be checked without a connection and build the statement
    pub fn prepare(&self) -> Result<PreparedStatement, InsertError> {
        let table = self.table_reference()?;
        let columns = self.column_mappings()?;
        for column in &columns {
            column.value.validate().map_err(|reason| ConfigError::InvalidValue {
                field: format!("columns.{}.value", column.column_name),
                reason,
            })?;
        }
        statement::build(&table, &columns)
    }

    pub fn plan(&self) -> Result<InsertPlan, InsertError> {
        Ok(InsertPlan {
            statement: self.prepare()?,
            options: RunOptions {
                use_transaction: self.advanced.use_transaction,
            },
        })
    }

    /// Resolve connection options against an explicit fallback source
    pub fn connection_options_with(
        &self,
        fallback: CredentialsConfig,
    ) -> Result<ConnectionOptions, ConfigError> {
        let creds = self.credentials.clone().unwrap_or_default().or(fallback);

        let trust_server_certificate = self
            .advanced
            .trust_server_certificate
            .or(creds.trust_server_certificate)
            .unwrap_or(false);

        let domain = creds.domain.filter(|d| !d.is_empty());
        if cfg!(not(windows)) && domain.is_some() {
            return Err(ConfigError::InvalidValue {
                field: "credentials.domain".to_string(),
                reason: "Windows authentication is only available on Windows".to_string(),
            });
        }

        Ok(ConnectionOptions {
            user: creds.user.ok_or(ConfigError::MissingCredential("user"))?,
            password: creds.password.ok_or(ConfigError::MissingCredential("password"))?,
            server: creds.server.ok_or(ConfigError::MissingCredential("server"))?,
            database: creds.database.ok_or(ConfigError::MissingCredential("database"))?,
            port: creds.port,
            domain,
            encrypt: creds.encrypt.unwrap_or(true),
            trust_server_certificate,
        })
    }

    /// Resolve connection options, falling back to `MSSQL_*` environment variables
    pub fn connection_options(&self) -> Result<ConnectionOptions, ConfigError> {
        dotenv::dotenv().ok();
        self.connection_options_with(CredentialsConfig::from_env()?)
    }
}
