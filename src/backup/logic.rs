// dbbackup/src/backup/logic.rs
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use super::compressor::Compressor;
use super::dbms::{DbEngine, DbmsProvider};
use super::object_store::{ObjectStoreClient, SessionFactory};
use crate::config::{AppConfig, DatabaseConfig};
use crate::errors::{PipelineError, PipelineResult, UploadFailure};
use crate::utils::CommandRunner;

/// One backup run: dump, compress, rotate, upload, clean up.
pub struct BackupPipeline<'a> {
    config: &'a AppConfig,
    runner: Arc<dyn CommandRunner>,
    store_factory: Arc<dyn SessionFactory>,
}

impl<'a> BackupPipeline<'a> {
    pub fn new(
        config: &'a AppConfig,
        runner: Arc<dyn CommandRunner>,
        store_factory: Arc<dyn SessionFactory>,
    ) -> Self {
        Self {
            config,
            runner,
            store_factory,
        }
    }

    pub async fn run(&self) -> PipelineResult<()> {
        let started = Instant::now();

        let (mut dbms, db) = self.create_dbms_instance()?;
        let dump_path = self.create_backup(&mut dbms, db).await?;
        let backup_file = self.compress_backup(dump_path).await?;
        let uploaded = self.upload_backup(&backup_file).await?;

        if uploaded {
            remove_local_file(&backup_file).await;
        } else {
            info!("backup kept on local storage at {}", backup_file.display());
        }

        info!(
            "operations completed in {:.6} secs",
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// MySQL wins when both engines are configured.
    fn create_dbms_instance(&self) -> PipelineResult<(DbmsProvider, &'a DatabaseConfig)> {
        let config: &'a AppConfig = self.config;
        let (engine, db) = if let Some(db) = &config.mysql {
            info!("Found a mysql configuration");
            (DbEngine::MySql, db)
        } else if let Some(db) = &config.postgres {
            info!("Found a postgres configuration");
            (DbEngine::Postgres, db)
        } else {
            return Err(PipelineError::NoDatabaseConfig);
        };

        let provider = DbmsProvider::new(
            engine,
            &config.backup_folder,
            &config.filename_prefix,
            Arc::clone(&self.runner),
        );
        Ok((provider, db))
    }

    async fn create_backup(
        &self,
        dbms: &mut DbmsProvider,
        db: &DatabaseConfig,
    ) -> PipelineResult<PathBuf> {
        let engine = dbms.engine().name();
        match dbms.create_backup(db).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(PipelineError::BackupFailed(format!(
                    "{} dump did not complete",
                    engine
                )));
            }
            Err(e) => return Err(PipelineError::BackupFailed(format!("{:#}", e))),
        }

        dbms.file_path().map(Path::to_path_buf).ok_or_else(|| {
            PipelineError::BackupFailed(format!("{} dump produced no file path", engine))
        })
    }

    async fn compress_backup(&self, dump_path: PathBuf) -> PipelineResult<PathBuf> {
        let Some(kind) = self.config.compress else {
            return Ok(dump_path);
        };

        let mut compressor = Compressor::new(kind, Arc::clone(&self.runner));
        match compressor.compress_file(&dump_path, "", "").await {
            Ok(true) => compressor.file_path().ok_or_else(|| {
                PipelineError::CompressionFailed(format!("{} produced no file path", kind.name()))
            }),
            Ok(false) => Err(PipelineError::CompressionFailed(format!(
                "{} did not compress {}",
                kind.name(),
                dump_path.display()
            ))),
            Err(e) => Err(PipelineError::CompressionFailed(format!("{:#}", e))),
        }
    }

    /// Returns whether the file was uploaded. Without S3 configuration the
    /// backup stays on local storage and the step succeeds.
    async fn upload_backup(&self, backup_file: &Path) -> PipelineResult<bool> {
        let Some(s3) = &self.config.s3 else {
            warn!("upload not configured, leaving the backup file in the local storage");
            return Ok(false);
        };

        let mut client = ObjectStoreClient::new(s3.clone(), Arc::clone(&self.store_factory));

        if let Some(max_file_count) = self.config.file_rotation_count {
            let rotated = client
                .rotate_files(max_file_count)
                .await
                .map_err(PipelineError::StoreClient)?;
            if !rotated {
                return Err(PipelineError::UploadFailed(if client.is_bucket_missing() {
                    UploadFailure::BucketNotFound
                } else {
                    UploadFailure::RotationIncomplete
                }));
            }
        }

        let uploaded = client
            .upload_file(backup_file)
            .await
            .map_err(PipelineError::StoreClient)?;
        // A transfer error surfaces as Err above; false means the bucket is missing.
        if !uploaded {
            return Err(PipelineError::UploadFailed(UploadFailure::BucketNotFound));
        }

        info!("uploaded {} to bucket {}", backup_file.display(), s3.bucket_name);
        Ok(true)
    }
}

async fn remove_local_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("removed temporary backup file {}", path.display()),
        Err(e) => error!("cannot remove temporary backup file {}: {}", path.display(), e),
    }
}
