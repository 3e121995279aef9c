use crate::domain::{ArchiveStore, DomainError, DomainResult};
use anyhow::{Context, Result};
use async_nats::jetstream;
use async_trait::async_trait;
use tracing::debug;

/// Archive store on a JetStream object-store bucket; one object per archived record.
pub struct NatsArchiveStore {
    store: jetstream::object_store::ObjectStore,
}

impl NatsArchiveStore {
    pub async fn new(jetstream: &jetstream::Context, bucket_name: &str) -> Result<Self> {
        debug!(bucket = %bucket_name, "initializing archive object store");

        let store = match jetstream.get_object_store(bucket_name).await {
            Ok(store) => {
                debug!(bucket = %bucket_name, "archive bucket already exists");
                store
            }
            Err(_) => {
                debug!(bucket = %bucket_name, "creating archive bucket");
                jetstream
                    .create_object_store(jetstream::object_store::Config {
                        bucket: bucket_name.to_string(),
                        description: Some("hyperstream retention-window archive".to_string()),
                        ..Default::default()
                    })
                    .await
                    .context("failed to create archive bucket")?
            }
        };

        Ok(Self { store })
    }
}

#[async_trait]
impl ArchiveStore for NatsArchiveStore {
    async fn append(&self, path: &str, content: bytes::Bytes) -> DomainResult<()> {
        let mut reader = &content[..];
        self.store
            .put(path, &mut reader)
            .await
            .map_err(|e| DomainError::StorageError(format!("archive put {}: {}", path, e)))?;
        Ok(())
    }
}
