//! The `ObjectStore` capability: content-addressed blob storage for raw data
//! items, bundle headers, bundle payloads, and bundle transactions.

use async_trait::async_trait;
use bf_types::Result;
use bytes::Bytes;
use std::collections::HashMap;
use tokio::io::AsyncRead;

/// An inclusive byte range for a ranged `get`, mirroring an HTTP `Range: bytes=start-end` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

/// Metadata attached to a `put`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub metadata: HashMap<String, String>,
}

/// The result of a `head` call.
#[derive(Debug, Clone)]
pub struct ObjectHead {
    pub etag: String,
    pub content_length: u64,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Options controlling a `move` (copy-then-delete).
#[derive(Debug, Clone)]
pub struct MoveOptions {
    /// Parallelism for multipart copy of objects at or above `part_size`.
    pub parallelism: usize,
    /// Part size, in bytes, for multipart copy. Objects at or above 5 GiB
    /// must use multipart copy 
    pub part_size: u64,
}

impl Default for MoveOptions {
    fn default() -> Self {
        Self {
            parallelism: 10,
            part_size: 5 * 1024 * 1024 * 1024,
        }
    }
}

/// A handle for an in-progress multipart upload.
#[derive(Debug, Clone)]
pub struct MultipartUpload {
    pub upload_id: String,
    pub key: String,
}

/// One completed part of a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadedPart {
    pub part_number: i32,
    pub etag: String,
}

/// Durable, content-addressed blob storage. A `NotFound` error on any method
/// must be distinguishable from other errors so that callers
/// can treat it as "retry against the backup bucket" or "mark the data item
/// failed" rather than a generic fatal error.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes `body` to `key`. Must abort cleanly (leaving no partial object
    /// visible) if the input stream errors mid-write.
    async fn put(
        &self,
        key: &str,
        body: Box<dyn AsyncRead + Send + Sync + Unpin>,
        opts: PutOptions,
    ) -> Result<()>;

    /// Writes `body` to `key` in one call, for callers that already have the
    /// full payload in memory (bundle transaction envelopes, small headers).
    async fn put_bytes(&self, key: &str, body: Bytes, opts: PutOptions) -> Result<()>;

    /// Reads `key`, optionally restricted to `range`, returning the bytes and the object's etag.
    async fn get(&self, key: &str, range: Option<ByteRange>) -> Result<(Bytes, String)>;

    /// Fetches metadata for `key` without transferring its body.
    async fn head(&self, key: &str) -> Result<ObjectHead>;

    /// Copies `src` to `dst` then deletes `src`. Objects at or above
    /// `opts.part_size` use parallel multipart copy.
    async fn move_object(&self, src: &str, dst: &str, opts: MoveOptions) -> Result<()>;

    /// Deletes `key`. Not an error if `key` does not exist.
    async fn remove(&self, key: &str) -> Result<()>;

    async fn create_multipart_upload(&self, key: &str, opts: PutOptions) -> Result<MultipartUpload>;

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        body: Bytes,
    ) -> Result<UploadedPart>;

    async fn complete_multipart_upload(
        &self,
        upload: &MultipartUpload,
        parts: Vec<UploadedPart>,
    ) -> Result<()>;

    async fn list_parts(&self, upload: &MultipartUpload) -> Result<Vec<UploadedPart>>;
}
