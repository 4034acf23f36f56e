//! S3-backed `ObjectStore`. Ranged reads map to S3's `Range`
//! header; `move_object` copies then deletes, using multipart copy for
//! objects at or above `opts.part_size`.

use async_trait::async_trait;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bf_capabilities::{
    ByteRange, MoveOptions, MultipartUpload, ObjectHead, ObjectStore, PutOptions, UploadedPart,
};
use bf_types::{PipelineError, Result};
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt};

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(Client::new(&config), bucket)
    }
}

fn is_not_found(err: &aws_sdk_s3::error::SdkError<GetObjectError>) -> bool {
    matches!(
        err,
        aws_sdk_s3::error::SdkError::ServiceError(e) if matches!(e.err(), GetObjectError::NoSuchKey(_))
    )
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        key: &str,
        mut body: Box<dyn AsyncRead + Send + Sync + Unpin>,
        opts: PutOptions,
    ) -> Result<()> {
        let mut buf = Vec::new();
        body.read_to_end(&mut buf)
            .await
            .map_err(|e| PipelineError::Fatal(format!("reading put body for {key}: {e}")))?;
        self.put_bytes(key, Bytes::from(buf), opts).await
    }

    async fn put_bytes(&self, key: &str, body: Bytes, opts: PutOptions) -> Result<()> {
        let mut req = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body));
        if let Some(ct) = opts.content_type {
            req = req.content_type(ct);
        }
        for (k, v) in opts.metadata {
            req = req.metadata(k, v);
        }
        req.send()
            .await
            .map_err(|e| PipelineError::Fatal(format!("s3 put_object {key}: {e}")))?;
        Ok(())
    }

    async fn get(&self, key: &str, range: Option<ByteRange>) -> Result<(Bytes, String)> {
        let mut req = self.client.get_object().bucket(&self.bucket).key(key);
        if let Some(r) = range {
            req = req.range(format!("bytes={}-{}", r.start, r.end));
        }
        let resp = req.send().await.map_err(|e| {
            if is_not_found(&e) {
                PipelineError::MissingBlob(key.to_string())
            } else {
                PipelineError::Fatal(format!("s3 get_object {key}: {e}"))
            }
        })?;
        let etag = resp.e_tag().unwrap_or_default().trim_matches('"').to_string();
        let bytes = resp
            .body
            .collect()
            .await
            .map_err(|e| PipelineError::Fatal(format!("s3 get_object body {key}: {e}")))?
            .into_bytes();
        Ok((bytes, etag))
    }

    async fn head(&self, key: &str) -> Result<ObjectHead> {
        let resp = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("NotFound") || msg.contains("404") {
                    PipelineError::MissingBlob(key.to_string())
                } else {
                    PipelineError::Fatal(format!("s3 head_object {key}: {e}"))
                }
            })?;
        Ok(ObjectHead {
            etag: resp.e_tag().unwrap_or_default().trim_matches('"').to_string(),
            content_length: resp.content_length().unwrap_or_default().max(0) as u64,
            content_type: resp.content_type().map(str::to_string),
            metadata: resp
                .metadata()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .collect::<HashMap<_, _>>(),
        })
    }

    async fn move_object(&self, src: &str, dst: &str, opts: MoveOptions) -> Result<()> {
        let head = self.head(src).await?;
        if head.content_length >= opts.part_size {
            self.multipart_copy(src, dst, head.content_length, opts.part_size, opts.parallelism)
                .await?;
        } else {
            self.client
                .copy_object()
                .bucket(&self.bucket)
                .copy_source(format!("{}/{}", self.bucket, src))
                .key(dst)
                .send()
                .await
                .map_err(|e| PipelineError::Fatal(format!("s3 copy_object {src} -> {dst}: {e}")))?;
        }
        self.remove(src).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| PipelineError::Fatal(format!("s3 delete_object {key}: {e}")))?;
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str, opts: PutOptions) -> Result<MultipartUpload> {
        let mut req = self.client.create_multipart_upload().bucket(&self.bucket).key(key);
        if let Some(ct) = opts.content_type {
            req = req.content_type(ct);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| PipelineError::Fatal(format!("s3 create_multipart_upload {key}: {e}")))?;
        Ok(MultipartUpload {
            upload_id: resp.upload_id().unwrap_or_default().to_string(),
            key: key.to_string(),
        })
    }

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        body: Bytes,
    ) -> Result<UploadedPart> {
        let resp = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| PipelineError::Fatal(format!("s3 upload_part {} #{part_number}: {e}", upload.key)))?;
        Ok(UploadedPart {
            part_number,
            etag: resp.e_tag().unwrap_or_default().trim_matches('"').to_string(),
        })
    }

    async fn complete_multipart_upload(
        &self,
        upload: &MultipartUpload,
        parts: Vec<UploadedPart>,
    ) -> Result<()> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .into_iter()
                    .map(|p| {
                        CompletedPart::builder()
                            .part_number(p.part_number)
                            .e_tag(p.etag)
                            .build()
                    })
                    .collect(),
            ))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| PipelineError::Fatal(format!("s3 complete_multipart_upload {}: {e}", upload.key)))?;
        Ok(())
    }

    async fn list_parts(&self, upload: &MultipartUpload) -> Result<Vec<UploadedPart>> {
        let resp = self
            .client
            .list_parts()
            .bucket(&self.bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .send()
            .await
            .map_err(|e| PipelineError::Fatal(format!("s3 list_parts {}: {e}", upload.key)))?;
        Ok(resp
            .parts()
            .iter()
            .map(|p| UploadedPart {
                part_number: p.part_number().unwrap_or_default(),
                etag: p.e_tag().unwrap_or_default().trim_matches('"').to_string(),
            })
            .collect())
    }
}

impl S3ObjectStore {
    async fn multipart_copy(
        &self,
        src: &str,
        dst: &str,
        total_len: u64,
        part_size: u64,
        parallelism: usize,
    ) -> Result<()> {
        let upload = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(dst)
            .send()
            .await
            .map_err(|e| PipelineError::Fatal(format!("s3 create_multipart_upload (copy) {dst}: {e}")))?;
        let upload_id = upload.upload_id().unwrap_or_default().to_string();

        let mut ranges = Vec::new();
        let mut offset = 0u64;
        let mut part_number = 1i32;
        while offset < total_len {
            let end = (offset + part_size - 1).min(total_len - 1);
            ranges.push((part_number, offset, end));
            offset += part_size;
            part_number += 1;
        }

        let results = futures::stream::iter(ranges.into_iter().map(|(part_number, start, end)| {
            let client = self.client.clone();
            let bucket = self.bucket.clone();
            let src = src.to_string();
            let dst = dst.to_string();
            let upload_id = upload_id.clone();
            async move {
                let resp = client
                    .upload_part_copy()
                    .bucket(&bucket)
                    .key(&dst)
                    .upload_id(&upload_id)
                    .part_number(part_number)
                    .copy_source(format!("{bucket}/{src}"))
                    .copy_source_range(format!("bytes={start}-{end}"))
                    .send()
                    .await
                    .map_err(|e| {
                        PipelineError::Fatal(format!("s3 upload_part_copy {dst} part {part_number}: {e}"))
                    })?;
                let etag = resp
                    .copy_part_result()
                    .and_then(|r| r.e_tag())
                    .unwrap_or_default()
                    .trim_matches('"')
                    .to_string();
                Ok::<_, PipelineError>(CompletedPart::builder().part_number(part_number).e_tag(etag).build())
            }
        }))
        .buffer_unordered(parallelism.max(1))
        .collect::<Vec<_>>()
        .await;

        let mut parts = Vec::with_capacity(results.len());
        for r in results {
            parts.push(r?);
        }
        parts.sort_by_key(|p| p.part_number());

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(dst)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| PipelineError::Fatal(format!("s3 complete_multipart_upload (copy) {dst}: {e}")))?;
        Ok(())
    }
}
