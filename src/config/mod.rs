// dbbackup/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::backup::compressor::CompressionKind;

pub const DEFAULT_BACKUP_FOLDER: &str = "/tmp";

/// Configuration exactly as supplied, before any validation. Field names are
/// the lowercase form of the environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    pub backup_folder: Option<PathBuf>,
    pub backup_filename_prefix: Option<String>,
    pub backup_file_rotation_count: Option<serde_json::Value>,
    pub compress: Option<String>,

    pub mysql_host: Option<String>,
    pub mysql_user: Option<String>,
    pub mysql_password: Option<String>,
    pub mysql_database_name: Option<String>,
    pub mysql_extra_dump_params: Option<String>,

    pub postgres_host: Option<String>,
    pub postgres_user: Option<String>,
    pub postgres_password: Option<String>,
    pub postgres_database_name: Option<String>,
    pub postgres_extra_dump_params: Option<String>,

    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_s3_bucket_name: Option<String>,
    pub aws_region: Option<String>,
    pub aws_s3_endpoint_url: Option<String>,
}

impl RawConfig {
    /// Builds the raw configuration from a variable lookup (normally `std::env::var`).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        RawConfig {
            backup_folder: lookup("BACKUP_FOLDER").map(PathBuf::from),
            backup_filename_prefix: lookup("BACKUP_FILENAME_PREFIX"),
            backup_file_rotation_count: lookup("BACKUP_FILE_ROTATION_COUNT")
                .map(serde_json::Value::String),
            compress: lookup("COMPRESS"),

            mysql_host: lookup("MYSQL_HOST"),
            mysql_user: lookup("MYSQL_USER"),
            mysql_password: lookup("MYSQL_PASSWORD"),
            mysql_database_name: lookup("MYSQL_DATABASE_NAME"),
            mysql_extra_dump_params: lookup("MYSQL_EXTRA_DUMP_PARAMS"),

            postgres_host: lookup("POSTGRES_HOST"),
            postgres_user: lookup("POSTGRES_USER"),
            postgres_password: lookup("POSTGRES_PASSWORD"),
            postgres_database_name: lookup("POSTGRES_DATABASE_NAME"),
            postgres_extra_dump_params: lookup("POSTGRES_EXTRA_DUMP_PARAMS"),

            aws_access_key_id: lookup("AWS_ACCESS_KEY_ID"),
            aws_secret_access_key: lookup("AWS_SECRET_ACCESS_KEY"),
            aws_s3_bucket_name: lookup("AWS_S3_BUCKET_NAME"),
            aws_region: lookup("AWS_REGION"),
            aws_s3_endpoint_url: lookup("AWS_S3_ENDPOINT_URL"),
        }
    }
}

/// Connection settings for one database engine.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub db_name: String,
    pub extra_params: String,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("user", &"***")
            .field("password", &"***")
            .field("db_name", &self.db_name)
            .field("extra_params", &self.extra_params)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct S3Config {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("access_key_id", &"***")
            .field("secret_access_key", &"***")
            .field("bucket_name", &self.bucket_name)
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}

/// Immutable, validated configuration for a single run.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backup_folder: PathBuf,
    pub filename_prefix: String,
    pub mysql: Option<DatabaseConfig>,
    pub postgres: Option<DatabaseConfig>,
    pub compress: Option<CompressionKind>,
    /// Retention limit; `None` disables rotation.
    pub file_rotation_count: Option<usize>,
    pub s3: Option<S3Config>,
}

impl AppConfig {
    pub fn load_from_env() -> Self {
        Self::from_raw(RawConfig::from_lookup(|key| std::env::var(key).ok()))
    }

    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw: RawConfig = serde_json::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })?;
        Ok(Self::from_raw(raw))
    }

    /// Validates raw values. Anything missing or invalid is treated as absent.
    pub fn from_raw(raw: RawConfig) -> Self {
        let mysql = database_config(
            "MySQL",
            &raw.mysql_host,
            &raw.mysql_user,
            &raw.mysql_password,
            &raw.mysql_database_name,
            &raw.mysql_extra_dump_params,
        );
        let postgres = database_config(
            "PostgreSQL",
            &raw.postgres_host,
            &raw.postgres_user,
            &raw.postgres_password,
            &raw.postgres_database_name,
            &raw.postgres_extra_dump_params,
        );

        let compress = non_empty(&raw.compress).and_then(|name| {
            let kind = CompressionKind::parse(name);
            if kind.is_none() {
                warn!("unrecognized compression '{}', compression disabled", name);
            }
            kind
        });

        let s3 = match (
            non_empty(&raw.aws_access_key_id),
            non_empty(&raw.aws_secret_access_key),
            non_empty(&raw.aws_s3_bucket_name),
        ) {
            (Some(key_id), Some(secret), Some(bucket)) => Some(S3Config {
                access_key_id: key_id.to_string(),
                secret_access_key: secret.to_string(),
                bucket_name: bucket.to_string(),
                region: non_empty(&raw.aws_region).map(str::to_string),
                endpoint_url: non_empty(&raw.aws_s3_endpoint_url).map(str::to_string),
            }),
            (None, None, None) => None,
            _ => {
                warn!("S3 configuration is incomplete (access key, secret key and bucket name are all required), upload disabled");
                None
            }
        };

        AppConfig {
            backup_folder: raw
                .backup_folder
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_FOLDER)),
            filename_prefix: raw.backup_filename_prefix.unwrap_or_default(),
            mysql,
            postgres,
            compress,
            file_rotation_count: parse_rotation_count(raw.backup_file_rotation_count.as_ref()),
            s3,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn database_config(
    engine: &str,
    host: &Option<String>,
    user: &Option<String>,
    password: &Option<String>,
    db_name: &Option<String>,
    extra_params: &Option<String>,
) -> Option<DatabaseConfig> {
    // An empty password is a valid passwordless account.
    match (non_empty(host), non_empty(user), password.as_deref(), non_empty(db_name)) {
        (Some(host), Some(user), Some(password), Some(db_name)) => Some(DatabaseConfig {
            host: host.to_string(),
            user: user.to_string(),
            password: password.to_string(),
            db_name: db_name.to_string(),
            extra_params: extra_params.clone().unwrap_or_default(),
        }),
        (None, None, None, None) => None,
        _ => {
            warn!("{} configuration is incomplete (host, user, password and database name are all required)", engine);
            None
        }
    }
}

fn parse_rotation_count(value: Option<&serde_json::Value>) -> Option<usize> {
    let count = match value? {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) if s.trim().is_empty() => return None,
        serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match count {
        Some(0) => None,
        Some(n) => usize::try_from(n).ok(),
        None => {
            warn!("invalid file rotation count {:?}, rotation disabled", value);
            None
        }
    }
}
