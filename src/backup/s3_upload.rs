// dbbackup/src/backup/s3_upload.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use chrono::{DateTime, Utc};
use s3::config::Region;
use s3::primitives::ByteStream;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::object_store::{RemoteObject, SessionFactory, StoreSession};
use crate::config::S3Config;

/// Opens sessions against S3 or an S3-compatible endpoint (Spaces, MinIO).
#[derive(Debug, Default, Clone)]
pub struct S3SessionFactory;

#[async_trait]
impl SessionFactory for S3SessionFactory {
    async fn open_session(&self, config: &S3Config) -> Result<Arc<dyn StoreSession>> {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .credentials_provider(s3::config::Credentials::new(
                &config.access_key_id,
                &config.secret_access_key,
                None, // session_token
                None, // expiry
                "Static", // provider_name
            ));
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint_url {
            debug!("using S3 endpoint {}", endpoint);
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        Ok(Arc::new(S3Session {
            client: s3::Client::new(&sdk_config),
        }))
    }
}

pub struct S3Session {
    client: s3::Client,
}

fn to_utc(timestamp: &s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.secs(), timestamp.subsec_nanos())
}

#[async_trait]
impl StoreSession for S3Session {
    async fn list_buckets(&self) -> Result<Vec<String>> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .context("ListBuckets request failed")?;
        Ok(output
            .buckets()
            .iter()
            .filter_map(|bucket| bucket.name().map(str::to_string))
            .collect())
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<RemoteObject>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .into_paginator()
            .send();

        let mut objects = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.with_context(|| format!("ListObjectsV2 on {} failed", bucket))?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    objects.push(RemoteObject {
                        key: key.to_string(),
                        last_modified: object.last_modified().and_then(to_utc),
                    });
                }
            }
        }
        Ok(objects)
    }

    async fn upload_file(&self, bucket: &str, key: &str, path: &Path) -> Result<()> {
        let body = ByteStream::from_path(path)
            .await
            .with_context(|| format!("Failed to create ByteStream from file: {}", path.display()))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .with_context(|| format!("PutObject {} on {} failed", key, bucket))?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("DeleteObject {} on {} failed", key, bucket))?;
        Ok(())
    }
}
