//! Object operations: metadata, delete, listing and presigned URLs

use aws_sdk_s3::operation::head_object::HeadObjectOutput;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::DateTime;
use aws_sdk_s3::types::MetadataDirective;
use aws_sdk_s3::Client;
use log::{debug, info};
use std::time::Duration;

use super::error::from_sdk_error;
use crate::error::{StorageError, StorageErrorCode};
use crate::metadata::{ObjectMetadata, TransferMetadata};
use crate::storage::{ListOptions, ListResult, StorageRef};

/// Longest validity SigV4 allows for a presigned URL.
pub(crate) const DOWNLOAD_URL_EXPIRY: Duration = Duration::from_secs(7 * 24 * 3600);

const LIST_PAGE_SIZE: i32 = 1000;

pub(crate) async fn presigned_get_url(
    client: &Client,
    reference: &StorageRef,
    expires_in: Duration,
) -> Result<String, StorageError> {
    let presigning_config = PresigningConfig::expires_in(expires_in).map_err(|e| {
        StorageError::new(
            StorageErrorCode::Unknown,
            format!("Invalid presigning config: {}", e),
        )
    })?;

    let presigned_request = client
        .get_object()
        .bucket(&reference.bucket)
        .key(&reference.path)
        .presigned(presigning_config)
        .await
        .map_err(from_sdk_error)?;

    Ok(presigned_request.uri().to_string())
}

pub(crate) async fn delete(client: &Client, reference: &StorageRef) -> Result<(), StorageError> {
    client
        .delete_object()
        .bucket(&reference.bucket)
        .key(&reference.path)
        .send()
        .await
        .map_err(from_sdk_error)?;
    info!("delete: {}/{}", reference.bucket, reference.path);
    Ok(())
}

pub(crate) async fn head(
    client: &Client,
    reference: &StorageRef,
) -> Result<ObjectMetadata, StorageError> {
    let output = client
        .head_object()
        .bucket(&reference.bucket)
        .key(&reference.path)
        .send()
        .await
        .map_err(from_sdk_error)?;
    Ok(object_metadata(reference, &output))
}

/// Replace the settable metadata of an object.
///
/// S3 cannot edit metadata in place, so the object is copied onto itself
/// with the merged headers. Fields left unset in `update` keep their value;
/// custom entries are added to the existing ones.
pub(crate) async fn update_metadata(
    client: &Client,
    reference: &StorageRef,
    update: TransferMetadata,
) -> Result<ObjectMetadata, StorageError> {
    let current = head(client, reference).await?;
    let merged = merge(current.settable, update);

    let copy_source = format!("{}/{}", reference.bucket, reference.path);
    let request = client
        .copy_object()
        .bucket(&reference.bucket)
        .key(&reference.path)
        .copy_source(copy_source)
        .metadata_directive(MetadataDirective::Replace);
    apply_metadata!(request, Some(&merged))
        .send()
        .await
        .map_err(from_sdk_error)?;

    debug!("update_metadata: {}/{}", reference.bucket, reference.path);
    head(client, reference).await
}

fn merge(mut current: TransferMetadata, update: TransferMetadata) -> TransferMetadata {
    if update.cache_control.is_some() {
        current.cache_control = update.cache_control;
    }
    if update.content_disposition.is_some() {
        current.content_disposition = update.content_disposition;
    }
    if update.content_encoding.is_some() {
        current.content_encoding = update.content_encoding;
    }
    if update.content_language.is_some() {
        current.content_language = update.content_language;
    }
    if update.content_type.is_some() {
        current.content_type = update.content_type;
    }
    current.custom_metadata.extend(update.custom_metadata);
    current
}

/// One page of the objects and sub-directories directly under `reference`.
pub(crate) async fn list(
    client: &Client,
    reference: &StorageRef,
    options: ListOptions,
) -> Result<ListResult, StorageError> {
    let max_keys = i32::try_from(options.max_results).unwrap_or(LIST_PAGE_SIZE);
    list_page(client, reference, max_keys, options.page_token).await
}

pub(crate) async fn list_all(
    client: &Client,
    reference: &StorageRef,
) -> Result<ListResult, StorageError> {
    let mut result = ListResult::default();
    let mut token = None;
    loop {
        let page = list_page(client, reference, LIST_PAGE_SIZE, token).await?;
        result.items.extend(page.items);
        result.prefixes.extend(page.prefixes);
        match page.next_page_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    Ok(result)
}

async fn list_page(
    client: &Client,
    reference: &StorageRef,
    max_keys: i32,
    continuation_token: Option<String>,
) -> Result<ListResult, StorageError> {
    let response = client
        .list_objects_v2()
        .bucket(&reference.bucket)
        .prefix(directory_prefix(&reference.path))
        .delimiter("/")
        .max_keys(max_keys)
        .set_continuation_token(continuation_token)
        .send()
        .await
        .map_err(from_sdk_error)?;

    let items = response
        .contents()
        .iter()
        .filter_map(|obj| {
            let key = obj.key()?;
            // Skip directory markers
            if key.ends_with('/') {
                return None;
            }
            Some(key.to_string())
        })
        .collect();

    let prefixes = response
        .common_prefixes()
        .iter()
        .filter_map(|prefix| prefix.prefix())
        .map(|p| p.trim_end_matches('/').to_string())
        .collect();

    let next_page_token = if response.is_truncated().unwrap_or(false) {
        response.next_continuation_token().map(str::to_string)
    } else {
        None
    };

    Ok(ListResult {
        items,
        prefixes,
        next_page_token,
    })
}

/// `a/b` -> `a/b/`; the bucket root lists with an empty prefix.
fn directory_prefix(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

fn millis(time: Option<&DateTime>) -> i64 {
    time.and_then(|t| t.to_millis().ok()).unwrap_or(0)
}

fn object_metadata(reference: &StorageRef, output: &HeadObjectOutput) -> ObjectMetadata {
    // S3 keeps no creation time; the last write is the closest stand-in.
    let updated = millis(output.last_modified());
    ObjectMetadata {
        name: Some(reference.name().to_string()),
        bucket: Some(reference.bucket.clone()),
        generation: output.version_id().map(str::to_string),
        metageneration: None,
        full_path: reference.path.clone(),
        size: output.content_length().unwrap_or(0).max(0) as u64,
        creation_time_millis: updated,
        updated_time_millis: updated,
        md5_hash: output.e_tag().map(|tag| tag.trim_matches('"').to_string()),
        settable: TransferMetadata {
            cache_control: output.cache_control().map(str::to_string),
            content_disposition: output.content_disposition().map(str::to_string),
            content_encoding: output.content_encoding().map(str::to_string),
            content_language: output.content_language().map(str::to_string),
            content_type: output.content_type().map(str::to_string),
            custom_metadata: output
                .metadata()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
        },
    }
}
