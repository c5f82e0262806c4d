mod logic;
pub(crate) mod compressor;
pub(crate) mod dbms;
pub(crate) mod object_store;
pub(crate) mod s3_upload;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::errors::PipelineResult;
use crate::utils::ShellRunner;
use s3_upload::S3SessionFactory;

/// Public entry point for the backup process: runs the pipeline against the
/// real shell and the configured S3 store.
pub async fn run_backup_flow(app_config: &AppConfig) -> PipelineResult<()> {
    logic::BackupPipeline::new(app_config, Arc::new(ShellRunner), Arc::new(S3SessionFactory))
        .run()
        .await
}
