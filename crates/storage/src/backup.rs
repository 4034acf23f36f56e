//! Wraps a primary `ObjectStore` with an optional backup, consulted on reads
//! when the primary returns `NotFound`. Writes and deletes always target the
//! primary; the backup is a read-side fallback only.

use async_trait::async_trait;
use bf_capabilities::{
    ByteRange, MoveOptions, MultipartUpload, ObjectHead, ObjectStore, PutOptions, UploadedPart,
};
use bf_types::{PipelineError, Result};
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::AsyncRead;

pub struct BackupObjectStore {
    primary: Arc<dyn ObjectStore>,
    backup: Option<Arc<dyn ObjectStore>>,
}

impl BackupObjectStore {
    pub fn new(primary: Arc<dyn ObjectStore>, backup: Option<Arc<dyn ObjectStore>>) -> Self {
        Self { primary, backup }
    }
}

#[async_trait]
impl ObjectStore for BackupObjectStore {
    async fn put(
        &self,
        key: &str,
        body: Box<dyn AsyncRead + Send + Sync + Unpin>,
        opts: PutOptions,
    ) -> Result<()> {
        self.primary.put(key, body, opts).await
    }

    async fn put_bytes(&self, key: &str, body: Bytes, opts: PutOptions) -> Result<()> {
        self.primary.put_bytes(key, body, opts).await
    }

    async fn get(&self, key: &str, range: Option<ByteRange>) -> Result<(Bytes, String)> {
        match self.primary.get(key, range).await {
            Err(PipelineError::NotFound(_)) => match &self.backup {
                Some(backup) => backup.get(key, range).await,
                None => Err(PipelineError::NotFound(key.to_string())),
            },
            other => other,
        }
    }

    async fn head(&self, key: &str) -> Result<ObjectHead> {
        match self.primary.head(key).await {
            Err(PipelineError::NotFound(_)) => match &self.backup {
                Some(backup) => backup.head(key).await,
                None => Err(PipelineError::NotFound(key.to_string())),
            },
            other => other,
        }
    }

    async fn move_object(&self, src: &str, dst: &str, opts: MoveOptions) -> Result<()> {
        self.primary.move_object(src, dst, opts).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.primary.remove(key).await
    }

    async fn create_multipart_upload(&self, key: &str, opts: PutOptions) -> Result<MultipartUpload> {
        self.primary.create_multipart_upload(key, opts).await
    }

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        body: Bytes,
    ) -> Result<UploadedPart> {
        self.primary.upload_part(upload, part_number, body).await
    }

    async fn complete_multipart_upload(
        &self,
        upload: &MultipartUpload,
        parts: Vec<UploadedPart>,
    ) -> Result<()> {
        self.primary.complete_multipart_upload(upload, parts).await
    }

    async fn list_parts(&self, upload: &MultipartUpload) -> Result<Vec<UploadedPart>> {
        self.primary.list_parts(upload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryObjectStore;

    #[tokio::test]
    async fn falls_back_to_backup_on_not_found() {
        let primary = Arc::new(MemoryObjectStore::new());
        let backup = Arc::new(MemoryObjectStore::new());
        backup
            .put_bytes("k", Bytes::from_static(b"hello"), PutOptions::default())
            .await
            .unwrap();
        let store = BackupObjectStore::new(primary, Some(backup));
        let (bytes, _etag) = store.get("k", None).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn not_found_without_backup_stays_not_found() {
        let primary = Arc::new(MemoryObjectStore::new());
        let store = BackupObjectStore::new(primary, None);
        let err = store.get("missing", None).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }
}
