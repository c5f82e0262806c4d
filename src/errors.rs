use std::fmt;

use thiserror::Error;

/// Why the upload phase reported failure without the store client raising.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFailure {
    /// The configured bucket is not visible to the credentials.
    BucketNotFound,
    /// Rotation could not confirm that the oldest objects are gone.
    RotationIncomplete,
}

impl fmt::Display for UploadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadFailure::BucketNotFound => write!(f, "bucket not found"),
            UploadFailure::RotationIncomplete => write!(f, "rotation could not be confirmed"),
        }
    }
}

/// Terminal outcomes of a backup run. Each variant is a distinct exit code.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no usable database configuration")]
    NoDatabaseConfig,

    #[error("backup creation failed: {0}")]
    BackupFailed(String),

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("upload failed: {0}")]
    UploadFailed(UploadFailure),

    #[error("object store client error: {0:#}")]
    StoreClient(#[source] anyhow::Error),
}

impl PipelineError {
    pub const EXIT_DBMS_INSTANCE: u8 = 2;
    pub const EXIT_CREATE_BACKUP: u8 = 3;
    pub const EXIT_COMPRESS_BACKUP: u8 = 4;
    pub const EXIT_UPLOAD_BACKUP: u8 = 5;
    pub const EXIT_STORE_CLIENT: u8 = 6;

    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::NoDatabaseConfig => Self::EXIT_DBMS_INSTANCE,
            PipelineError::BackupFailed(_) => Self::EXIT_CREATE_BACKUP,
            PipelineError::CompressionFailed(_) => Self::EXIT_COMPRESS_BACKUP,
            PipelineError::UploadFailed(_) => Self::EXIT_UPLOAD_BACKUP,
            PipelineError::StoreClient(_) => Self::EXIT_STORE_CLIENT,
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
