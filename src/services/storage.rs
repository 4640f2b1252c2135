use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use uuid::Uuid;

pub const DOCUMENT_CONTENT_TYPE: &str = "application/xml";

/// Object key holding the generated document for an entity.
pub fn document_key(entity_id: Uuid) -> String {
    format!("{entity_id}.xml")
}

/// Durable blob storage for generated NPC documents.
///
/// Writes are upserts: regenerating an entity overwrites its document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn put_document(&self, entity_id: Uuid, document: &str) -> Result<(), StorageError>;

    /// `Ok(None)` when no document has been written for the entity.
    async fn get_document(&self, entity_id: Uuid) -> Result<Option<String>, StorageError>;
}

/// Client for Cloudflare R2 object storage (S3-compatible).
pub struct R2Client {
    bucket: Box<Bucket>,
}

impl R2Client {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket })
    }

    /// Upload bytes to R2.
    pub async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(StorageError::S3)?;
        check_status(key, response.status_code())
    }

    /// Download bytes from R2. `Ok(None)` if the key does not exist.
    pub async fn download(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let response = self.bucket.get_object(key).await.map_err(StorageError::S3)?;
        if response.status_code() == 404 {
            return Ok(None);
        }
        check_status(key, response.status_code())?;
        Ok(Some(response.to_vec()))
    }
}

fn check_status(key: &str, status: u16) -> Result<(), StorageError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(StorageError::Status {
            key: key.to_string(),
            status,
        })
    }
}

#[async_trait]
impl DocumentStore for R2Client {
    async fn put_document(&self, entity_id: Uuid, document: &str) -> Result<(), StorageError> {
        self.upload(&document_key(entity_id), document.as_bytes(), DOCUMENT_CONTENT_TYPE)
            .await
    }

    async fn get_document(&self, entity_id: Uuid) -> Result<Option<String>, StorageError> {
        let key = document_key(entity_id);
        match self.download(&key).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| StorageError::Encoding(key)),
            None => Ok(None),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage returned status {status} for {key}")]
    Status { key: String, status: u16 },

    #[error("Stored document {0} is not valid UTF-8")]
    Encoding(String),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
