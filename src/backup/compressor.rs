// dbbackup/src/backup/compressor.rs
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::utils::command::log_command_result;
use crate::utils::{CommandRunner, CommandTemplate, EnvironmentCheck, Placeholder};

/// Supported compression tools. Both compress in place and remove the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionKind {
    Gzip,
    Bzip2,
}

impl CompressionKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "gzip" => Some(CompressionKind::Gzip),
            "bzip2" => Some(CompressionKind::Bzip2),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionKind::Gzip => "gzip",
            CompressionKind::Bzip2 => "bzip2",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            CompressionKind::Gzip => "gz",
            CompressionKind::Bzip2 => "bz2",
        }
    }

    fn check_command(self) -> &'static str {
        match self {
            CompressionKind::Gzip => "gzip --help",
            CompressionKind::Bzip2 => "bzip2 --help",
        }
    }

    fn compress_command(self) -> CommandTemplate {
        match self {
            CompressionKind::Gzip => CommandTemplate::new("gzip {{source_filepath}}"),
            CompressionKind::Bzip2 => CommandTemplate::new("bzip2 {{source_filepath}}"),
        }
    }
}

pub struct Compressor {
    kind: CompressionKind,
    runner: Arc<dyn CommandRunner>,
    check: EnvironmentCheck,
    source_path: Option<PathBuf>,
}

impl Compressor {
    pub fn new(kind: CompressionKind, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            kind,
            runner,
            check: EnvironmentCheck::default(),
            source_path: None,
        }
    }

    /// The compressed file: the last source path plus the tool's extension.
    pub fn file_path(&self) -> Option<PathBuf> {
        self.source_path.as_ref().map(|source| {
            let mut name = source.clone().into_os_string();
            name.push(".");
            name.push(self.kind.extension());
            PathBuf::from(name)
        })
    }

    pub async fn check_environment(&mut self) -> Result<bool> {
        let check_command = self.kind.check_command();
        self.check.ensure(self.runner.as_ref(), check_command).await
    }

    pub async fn compress_file(
        &mut self,
        source_path: &Path,
        dest_path: &str,
        extra_params: &str,
    ) -> Result<bool> {
        if !self.check_environment().await? {
            return Ok(false);
        }

        self.source_path = Some(source_path.to_path_buf());

        let values = HashMap::from([
            (Placeholder::SourceFilepath, source_path.to_string_lossy().into_owned()),
            (Placeholder::DestFilepath, dest_path.to_string()),
            (Placeholder::ExtraParams, extra_params.to_string()),
        ]);
        let command = self.kind.compress_command().render(&values);

        info!("start compressing the backup with {}", self.kind.name());
        info!("   executing command: {}", command.loggable);

        let result = self
            .runner
            .run(&command.executable)
            .await
            .with_context(|| format!("Failed to run {} command", self.kind.name()))?;
        log_command_result("the compression", &result);

        Ok(result.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ShellRunner;
    use crate::utils::command::fakes::FakeRunner;

    #[tokio::test]
    async fn test_gzip_command_and_path() -> Result<()> {
        let runner = Arc::new(FakeRunner::succeeding());
        let mut compressor = Compressor::new(CompressionKind::Gzip, runner.clone());

        assert!(compressor.compress_file(Path::new("/tmp/db_20240101000000Z.sql"), "", "").await?);
        assert_eq!(
            runner.calls(),
            vec![
                "gzip --help".to_string(),
                "gzip /tmp/db_20240101000000Z.sql".to_string()
            ]
        );
        assert_eq!(
            compressor.file_path(),
            Some(PathBuf::from("/tmp/db_20240101000000Z.sql.gz"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_bzip2_path() -> Result<()> {
        let runner = Arc::new(FakeRunner::succeeding());
        let mut compressor = Compressor::new(CompressionKind::Bzip2, runner.clone());

        assert!(compressor.compress_file(Path::new("/data/a.sql"), "", "").await?);
        assert_eq!(runner.calls()[1], "bzip2 /data/a.sql");
        assert_eq!(compressor.file_path(), Some(PathBuf::from("/data/a.sql.bz2")));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_tool_fails_without_compressing() -> Result<()> {
        let runner = Arc::new(FakeRunner::new(|_| 127));
        let mut compressor = Compressor::new(CompressionKind::Bzip2, runner.clone());

        assert!(!compressor.compress_file(Path::new("/data/a.sql"), "", "").await?);
        assert_eq!(runner.calls(), vec!["bzip2 --help".to_string()]);
        assert_eq!(compressor.file_path(), None);
        Ok(())
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() -> Result<()> {
        let runner = Arc::new(FakeRunner::new(|cmd| if cmd.contains("--help") { 0 } else { 1 }));
        let mut compressor = Compressor::new(CompressionKind::Gzip, runner);

        assert!(!compressor.compress_file(Path::new("/data/a.sql"), "", "").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_real_gzip_replaces_source() -> Result<()> {
        let mut compressor = Compressor::new(CompressionKind::Gzip, Arc::new(ShellRunner));
        if !compressor.check_environment().await? {
            return Ok(());
        }
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("dump.sql");
        std::fs::write(&source, "CREATE TABLE t (id int);\n")?;

        assert!(compressor.compress_file(&source, "", "").await?);
        let compressed = compressor.file_path().expect("compressed path");
        assert!(!source.exists());
        assert!(compressed.exists());
        Ok(())
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(CompressionKind::parse("gzip"), Some(CompressionKind::Gzip));
        assert_eq!(CompressionKind::parse("bzip2"), Some(CompressionKind::Bzip2));
        assert_eq!(CompressionKind::parse("GZIP"), None);
        assert_eq!(CompressionKind::parse("xz"), None);
    }
}
