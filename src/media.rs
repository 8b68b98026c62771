use bytes::Bytes;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::{error::AppError, storage::MediaHost};

/// Per-file ceiling for uploaded images.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

pub const AVATAR_FOLDER: &str = "avatars";
pub const COVER_FOLDER: &str = "covers";

pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Only image files are allowed")]
    NotAnImage,
    #[error("File exceeds the 5 MB limit")]
    TooLarge,
    #[error("media host upload failed: {0}")]
    Host(anyhow::Error),
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

/// Checks the file filter and pushes the bytes to the host.
pub async fn upload_image(
    host: &dyn MediaHost,
    folder: &str,
    item: UploadItem,
) -> Result<String, UploadError> {
    if !item.content_type.starts_with("image/") {
        return Err(UploadError::NotAnImage);
    }
    if item.body.len() > MAX_IMAGE_BYTES {
        return Err(UploadError::TooLarge);
    }
    let ext = ext_from_mime(&item.content_type).unwrap_or("bin");
    let key = format!("{}/{}.{}", folder, Uuid::new_v4(), ext);
    host.upload(&key, item.body, &item.content_type)
        .await
        .map_err(UploadError::Host)
}

/// Upload that must succeed. Absence and every failure are client errors.
pub async fn upload_required(
    host: &dyn MediaHost,
    folder: &str,
    item: Option<UploadItem>,
    missing_msg: &str,
) -> Result<String, AppError> {
    let item = item.ok_or_else(|| AppError::validation(missing_msg))?;
    match upload_image(host, folder, item).await {
        Ok(url) => Ok(url),
        Err(UploadError::Host(e)) => {
            warn!(error = %e, %folder, "required upload failed");
            Err(AppError::validation(missing_msg))
        }
        Err(e) => Err(AppError::validation(e.to_string())),
    }
}

/// Best-effort upload: any failure is logged and yields `None`.
pub async fn upload_optional(
    host: &dyn MediaHost,
    folder: &str,
    item: Option<UploadItem>,
) -> Option<String> {
    let item = item?;
    match upload_image(host, folder, item).await {
        Ok(url) => Some(url),
        Err(e) => {
            warn!(error = %e, %folder, "optional upload dropped");
            None
        }
    }
}

/// Best-effort removal of an image that will not be referenced after all.
pub async fn discard(host: &dyn MediaHost, url: &str) {
    if let Err(e) = host.delete(url).await {
        warn!(error = %e, %url, "orphaned media left on host");
    }
}
