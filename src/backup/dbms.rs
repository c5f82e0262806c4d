// dbbackup/src/backup/dbms.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::utils::command::log_command_result;
use crate::utils::{CommandRunner, CommandTemplate, EnvironmentCheck, Placeholder};

const MYSQL_CHECK_COMMAND: &str = "mysqldump --version";
const MYSQL_BACKUP_COMMAND: CommandTemplate = CommandTemplate::new(
    "mysqldump --host={{host}} --user={{user}} --password={{password}} \
     --lock-tables --default-character-set=utf8 --skip-triggers \
     --databases '{{db_name}}' {{extra_params}} > {{backup_filepath}}",
);

const POSTGRES_CHECK_COMMAND: &str = "pg_dump --version";
const POSTGRES_BACKUP_COMMAND: CommandTemplate = CommandTemplate::new(
    "PGPASSWORD='{{password}}' pg_dump --host={{host}} --username={{user}} \
     --dbname='{{db_name}}' --file={{backup_filepath}} {{extra_params}}",
);

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbEngine {
    MySql,
    Postgres,
}

impl DbEngine {
    pub fn name(self) -> &'static str {
        match self {
            DbEngine::MySql => "mysql",
            DbEngine::Postgres => "postgres",
        }
    }

    fn check_command(self) -> &'static str {
        match self {
            DbEngine::MySql => MYSQL_CHECK_COMMAND,
            DbEngine::Postgres => POSTGRES_CHECK_COMMAND,
        }
    }

    fn backup_command(self) -> CommandTemplate {
        match self {
            DbEngine::MySql => MYSQL_BACKUP_COMMAND,
            DbEngine::Postgres => POSTGRES_BACKUP_COMMAND,
        }
    }
}

/// `<prefix>_<YYYYMMDDHHMMSS>Z.sql`, or without the prefix when it is empty.
pub fn backup_filename(now: DateTime<Utc>, prefix: &str) -> String {
    let filename = format!("{}Z.sql", now.format("%Y%m%d%H%M%S"));
    if prefix.is_empty() {
        filename
    } else {
        format!("{}_{}", prefix, filename)
    }
}

/// Produces a dump file for one engine through its command template.
pub struct DbmsProvider {
    engine: DbEngine,
    backup_folder: PathBuf,
    filename_prefix: String,
    runner: Arc<dyn CommandRunner>,
    check: EnvironmentCheck,
    file_path: Option<PathBuf>,
}

impl DbmsProvider {
    pub fn new(
        engine: DbEngine,
        backup_folder: &Path,
        filename_prefix: &str,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            engine,
            backup_folder: backup_folder.to_path_buf(),
            filename_prefix: filename_prefix.to_string(),
            runner,
            check: EnvironmentCheck::default(),
            file_path: None,
        }
    }

    pub fn engine(&self) -> DbEngine {
        self.engine
    }

    /// Path of the last dump attempt. Set even when the dump failed.
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub async fn check_environment(&mut self) -> Result<bool> {
        let check_command = self.engine.check_command();
        self.check.ensure(self.runner.as_ref(), check_command).await
    }

    /// Dumps `db.db_name` into the backup folder. `Ok(false)` means the tool is
    /// unavailable or exited non-zero.
    pub async fn create_backup(&mut self, db: &DatabaseConfig) -> Result<bool> {
        if !self.check_environment().await? {
            return Ok(false);
        }

        let file_path = self
            .backup_folder
            .join(backup_filename(Utc::now(), &self.filename_prefix));
        self.file_path = Some(file_path.clone());

        tokio::fs::create_dir_all(&self.backup_folder)
            .await
            .with_context(|| {
                format!(
                    "Failed to create backup folder: {}",
                    self.backup_folder.display()
                )
            })?;

        let values = HashMap::from([
            (Placeholder::Host, db.host.clone()),
            (Placeholder::User, db.user.clone()),
            (Placeholder::Password, db.password.clone()),
            (Placeholder::DbName, db.db_name.clone()),
            (Placeholder::BackupFilepath, file_path.to_string_lossy().into_owned()),
            (Placeholder::ExtraParams, db.extra_params.clone()),
        ]);
        let command = self.engine.backup_command().render(&values);

        info!("start creating the {} backup", self.engine.name());
        info!("   executing command: {}", command.loggable);

        let result = self
            .runner
            .run(&command.executable)
            .await
            .with_context(|| format!("Failed to run {} backup command", self.engine.name()))?;
        log_command_result("the backup creation", &result);

        Ok(result.success())
    }
}
