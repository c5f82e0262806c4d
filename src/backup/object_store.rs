// dbbackup/src/backup/object_store.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::S3Config;

/// An object listed in the remote bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Remote calls available once credentials have been accepted locally.
#[async_trait]
pub trait StoreSession: Send + Sync {
    async fn list_buckets(&self) -> Result<Vec<String>>;
    /// All objects in `bucket`, in the store's listing order.
    async fn list_objects(&self, bucket: &str) -> Result<Vec<RemoteObject>>;
    async fn upload_file(&self, bucket: &str, key: &str, path: &Path) -> Result<()>;
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open_session(&self, config: &S3Config) -> Result<Arc<dyn StoreSession>>;
}

#[derive(Clone)]
struct ResolvedBucket {
    session: Arc<dyn StoreSession>,
    name: String,
}

enum StoreState {
    Uninitialized,
    SessionEstablished(Arc<dyn StoreSession>),
    BucketResolved(ResolvedBucket),
    BucketMissing,
    /// The session or the bucket lookup failed; nothing is retried.
    Unavailable(String),
}

/// Keys to delete so that one more upload reaches exactly `max_file_count`.
///
/// Nothing is selected while the bucket holds fewer than `max_file_count`
/// objects. Otherwise the oldest `len - (max_file_count - 1)` are chosen.
/// The sort is stable: equal timestamps keep listing order, and objects
/// without a timestamp count as oldest.
pub fn select_for_rotation(mut objects: Vec<RemoteObject>, max_file_count: usize) -> Vec<String> {
    if objects.len() < max_file_count {
        return Vec::new();
    }
    let delete_count = objects.len() - max_file_count.saturating_sub(1);
    objects.sort_by(|a, b| a.last_modified.cmp(&b.last_modified));
    objects
        .into_iter()
        .take(delete_count)
        .map(|object| object.key)
        .collect()
}

/// Bucket-scoped client. The session and the bucket are resolved lazily on
/// the first operation. A missing bucket or a failed lookup fails every
/// later operation without another remote call.
pub struct ObjectStoreClient {
    config: S3Config,
    factory: Arc<dyn SessionFactory>,
    state: StoreState,
}

impl ObjectStoreClient {
    pub fn new(config: S3Config, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            config,
            factory,
            state: StoreState::Uninitialized,
        }
    }

    pub fn is_bucket_missing(&self) -> bool {
        matches!(self.state, StoreState::BucketMissing)
    }

    async fn ensure_bucket(&mut self) -> Result<Option<ResolvedBucket>> {
        loop {
            match &self.state {
                StoreState::BucketResolved(bucket) => return Ok(Some(bucket.clone())),
                StoreState::BucketMissing => return Ok(None),
                StoreState::Unavailable(reason) => {
                    anyhow::bail!("Object store unavailable: {}", reason)
                }
                StoreState::Uninitialized => {
                    let opened = self
                        .factory
                        .open_session(&self.config)
                        .await
                        .context("Failed to create object store session");
                    self.state = match opened {
                        Ok(session) => StoreState::SessionEstablished(session),
                        Err(e) => return Err(self.give_up(e)),
                    };
                }
                StoreState::SessionEstablished(session) => {
                    let session = Arc::clone(session);
                    let name = self.config.bucket_name.clone();
                    info!("start looking for '{}' bucket", name);

                    let buckets = match session.list_buckets().await.context("Failed to list buckets") {
                        Ok(buckets) => buckets,
                        Err(e) => return Err(self.give_up(e)),
                    };
                    self.state = if buckets.iter().any(|b| *b == name) {
                        info!("the bucket is there");
                        StoreState::BucketResolved(ResolvedBucket { session, name })
                    } else {
                        error!("the bucket name '{}' is invalid or the bucket doesn't exist", name);
                        StoreState::BucketMissing
                    };
                }
            }
        }
    }

    fn give_up(&mut self, e: anyhow::Error) -> anyhow::Error {
        self.state = StoreState::Unavailable(format!("{:#}", e));
        e
    }

    /// Deletes the oldest objects so the next upload leaves `max_file_count`
    /// objects. Returns `true` only when a fresh listing confirms that every
    /// targeted key is gone.
    pub async fn rotate_files(&mut self, max_file_count: usize) -> Result<bool> {
        let Some(bucket) = self.ensure_bucket().await? else {
            return Ok(false);
        };

        info!("start rotating files");
        let started = Instant::now();

        let objects = bucket
            .session
            .list_objects(&bucket.name)
            .await
            .with_context(|| format!("Failed to list objects in bucket {}", bucket.name))?;
        let total = objects.len();
        let to_delete = select_for_rotation(objects, max_file_count);
        if to_delete.is_empty() {
            info!(
                "no need to rotate files, {} of {} allowed in the storage",
                total, max_file_count
            );
            return Ok(true);
        }

        for key in &to_delete {
            info!("   deleting file '{}'", key);
            if let Err(e) = bucket.session.delete_object(&bucket.name, key).await {
                warn!("   could not delete '{}': {:#}", key, e);
            }
        }

        let remaining = bucket
            .session
            .list_objects(&bucket.name)
            .await
            .with_context(|| format!("Failed to re-list objects in bucket {}", bucket.name))?;
        let lingering: Vec<&str> = remaining
            .iter()
            .filter(|object| to_delete.contains(&object.key))
            .map(|object| object.key.as_str())
            .collect();

        info!(
            "completed files rotation in {:.6} secs",
            started.elapsed().as_secs_f64()
        );

        if lingering.is_empty() {
            Ok(true)
        } else {
            error!("rotated files still present in the bucket: {:?}", lingering);
            Ok(false)
        }
    }

    /// Uploads `local_path` under its base file name, replacing any object
    /// with the same key.
    pub async fn upload_file(&mut self, local_path: &Path) -> Result<bool> {
        let Some(bucket) = self.ensure_bucket().await? else {
            return Ok(false);
        };

        let key = local_path
            .file_name()
            .with_context(|| format!("Backup path has no file name: {}", local_path.display()))?
            .to_string_lossy()
            .into_owned();

        info!("start uploading file '{}'", key);
        let started = Instant::now();

        bucket
            .session
            .upload_file(&bucket.name, &key, local_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to upload {} to bucket {} with key {}",
                    local_path.display(),
                    bucket.name,
                    key
                )
            })?;

        info!(
            "completed file upload in {:.6} secs",
            started.elapsed().as_secs_f64()
        );
        Ok(true)
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::{FakeFactory, InMemoryStore, dated_objects};
    use super::*;

    fn s3_config(bucket: &str) -> S3Config {
        S3Config {
            access_key_id: "AKIA".into(),
            secret_access_key: "secret".into(),
            bucket_name: bucket.into(),
            region: None,
            endpoint_url: None,
        }
    }

    fn client(store: &Arc<InMemoryStore>, bucket: &str) -> ObjectStoreClient {
        ObjectStoreClient::new(s3_config(bucket), Arc::new(FakeFactory(store.clone())))
    }

    fn object(key: &str, ts: Option<i64>) -> RemoteObject {
        RemoteObject {
            key: key.into(),
            last_modified: ts.and_then(|t| DateTime::from_timestamp(t, 0)),
        }
    }

    #[test]
    fn test_select_nothing_below_limit() {
        assert!(select_for_rotation(dated_objects(4), 5).is_empty());
        assert!(select_for_rotation(Vec::new(), 1).is_empty());
    }

    #[test]
    fn test_select_makes_room_for_one_more() {
        // 5 objects, limit 5: one deletion so the upload brings it back to 5.
        assert_eq!(select_for_rotation(dated_objects(5), 5), vec!["backup_0.sql"]);
        // 8 objects, limit 3: keep the 2 newest.
        assert_eq!(
            select_for_rotation(dated_objects(8), 3),
            (0..6).map(|i| format!("backup_{}.sql", i)).collect::<Vec<_>>()
        );
        // Limit 1 clears the bucket.
        assert_eq!(select_for_rotation(dated_objects(3), 1).len(), 3);
    }

    #[test]
    fn test_select_orders_by_timestamp_not_listing() {
        let objects = vec![
            object("c", Some(300)),
            object("a", Some(100)),
            object("b", Some(200)),
        ];
        assert_eq!(select_for_rotation(objects, 2), vec!["a", "b"]);
    }

    #[test]
    fn test_select_ties_keep_listing_order() {
        let objects = vec![
            object("z", Some(100)),
            object("y", Some(100)),
            object("x", Some(500)),
        ];
        assert_eq!(select_for_rotation(objects.clone(), 3), vec!["z"]);
        assert_eq!(select_for_rotation(objects, 2), vec!["z", "y"]);
    }

    #[test]
    fn test_select_untimestamped_objects_are_oldest() {
        let objects = vec![object("dated", Some(1)), object("undated", None)];
        assert_eq!(select_for_rotation(objects, 2), vec!["undated"]);
    }

    #[tokio::test]
    async fn test_rotation_below_limit_deletes_nothing() -> Result<()> {
        let store = Arc::new(InMemoryStore::with_bucket("backups", dated_objects(3)));
        let mut client = client(&store, "backups");

        assert!(client.rotate_files(5).await?);
        assert_eq!(store.keys().len(), 3);
        assert!(!store.calls().iter().any(|c| c.starts_with("delete")));
        Ok(())
    }

    #[tokio::test]
    async fn test_rotation_then_upload_reaches_limit() -> Result<()> {
        let store = Arc::new(InMemoryStore::with_bucket("backups", dated_objects(7)));
        let mut client = client(&store, "backups");
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("new_20240101000000Z.sql.gz");
        std::fs::write(&file, b"dump")?;

        assert!(client.rotate_files(4).await?);
        assert_eq!(store.keys(), vec!["backup_4.sql", "backup_5.sql", "backup_6.sql"]);
        assert!(client.upload_file(&file).await?);
        assert_eq!(store.keys().len(), 4);
        assert!(store.keys().contains(&"new_20240101000000Z.sql.gz".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_rotation_reports_deletions_that_did_not_take_effect() -> Result<()> {
        let mut store = InMemoryStore::with_bucket("backups", dated_objects(6));
        store.stuck_keys.insert("backup_1.sql".into());
        let store = Arc::new(store);
        let mut client = client(&store, "backups");

        assert!(!client.rotate_files(4).await?);
        // Best effort: the other deletions still went through.
        assert_eq!(
            store.keys(),
            vec!["backup_1.sql", "backup_3.sql", "backup_4.sql", "backup_5.sql"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_deletion_does_not_abort_the_rest() -> Result<()> {
        let mut store = InMemoryStore::with_bucket("backups", dated_objects(5));
        store.failing_keys.insert("backup_0.sql".into());
        let store = Arc::new(store);
        let mut client = client(&store, "backups");

        assert!(!client.rotate_files(4).await?);
        assert!(store.calls().contains(&"delete backups backup_1.sql".to_string()));
        assert!(!store.keys().contains(&"backup_1.sql".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_bucket_fails_every_operation() -> Result<()> {
        let store = Arc::new(InMemoryStore::with_bucket("backups", dated_objects(2)));
        let mut client = client(&store, "backupz");
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("a.sql");
        std::fs::write(&file, b"dump")?;

        assert!(!client.rotate_files(5).await?);
        assert!(client.is_bucket_missing());
        assert!(!client.upload_file(&file).await?);
        // Resolution is attempted once per client.
        assert_eq!(
            store.calls().iter().filter(|c| *c == "list_buckets").count(),
            1
        );
        assert_eq!(store.keys().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_session_and_bucket_resolve_once() -> Result<()> {
        let store = Arc::new(InMemoryStore::with_bucket("backups", Vec::new()));
        let mut client = client(&store, "backups");
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("a.sql");
        std::fs::write(&file, b"dump")?;

        assert!(client.rotate_files(2).await?);
        assert!(client.upload_file(&file).await?);
        assert!(client.upload_file(&file).await?);
        assert_eq!(
            store.calls().iter().filter(|c| *c == "list_buckets").count(),
            1
        );
        assert_eq!(store.keys(), vec!["a.sql"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_credentials_fail_every_operation() -> Result<()> {
        let mut store = InMemoryStore::with_bucket("backups", Vec::new());
        store.reject_credentials = true;
        let store = Arc::new(store);
        let mut client = client(&store, "backups");
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("a.sql");
        std::fs::write(&file, b"dump")?;

        assert!(client.rotate_files(3).await.is_err());
        assert!(client.rotate_files(3).await.is_err());
        let err = client.upload_file(&file).await.unwrap_err();
        assert!(format!("{:#}", err).contains("InvalidAccessKeyId"));
        assert!(!client.is_bucket_missing());
        assert_eq!(store.calls(), vec!["list_buckets"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_session_is_not_reopened() {
        struct RefusingFactory(std::sync::atomic::AtomicUsize);

        #[async_trait]
        impl SessionFactory for RefusingFactory {
            async fn open_session(&self, _config: &S3Config) -> Result<Arc<dyn StoreSession>> {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                anyhow::bail!("malformed endpoint")
            }
        }

        let factory = Arc::new(RefusingFactory(Default::default()));
        let mut client = ObjectStoreClient::new(s3_config("backups"), factory.clone());

        assert!(client.rotate_files(3).await.is_err());
        assert!(client.rotate_files(3).await.is_err());
        assert_eq!(factory.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upload_uses_base_file_name() -> Result<()> {
        let store = Arc::new(InMemoryStore::with_bucket("backups", Vec::new()));
        let mut client = client(&store, "backups");
        let dir = tempfile::tempdir()?;
        let nested = dir.path().join("deep").join("dir");
        std::fs::create_dir_all(&nested)?;
        let file = nested.join("shop_20240101000000Z.sql.bz2");
        std::fs::write(&file, b"dump")?;

        assert!(client.upload_file(&file).await?);
        assert!(store.calls().contains(&"upload backups shop_20240101000000Z.sql.bz2".to_string()));
        Ok(())
    }
}
