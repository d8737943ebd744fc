use std::path::Path;

use anyhow::Context;
use axum::extract::multipart::{Field, MultipartError};
use axum::http::HeaderMap;
use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::ApiError;

/// The one multipart field name a profile picture may arrive under.
pub const UPLOAD_FIELD: &str = "profilePicture";
/// Public path prefix the stored files are served from.
pub const PUBLIC_PREFIX: &str = "/uploads";
pub const MAX_FILE_BYTES: usize = 5 * 1024 * 1024;
/// Body cap for multipart routes. Kept above MAX_FILE_BYTES so an oversized
/// file is rejected with a structured error rather than a bare 413.
pub const MULTIPART_BODY_LIMIT: usize = 10 * 1024 * 1024;

const ALLOWED_MIME: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/bmp",
    "image/tiff",
];
const ALLOWED_EXT: &[&str] = &["jpeg", "jpg", "png", "gif", "webp", "bmp", "tiff"];
const MAX_BASE_LEN: usize = 20;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Only image files are allowed (jpeg, jpg, png, gif, webp, bmp, tiff)")]
    InvalidType,
    #[error("File exceeds the 5 MB size limit")]
    TooLarge,
    #[error("Only one file can be uploaded per request")]
    TooManyFiles,
    #[error("Unexpected file field '{0}'; send the file as 'profilePicture'")]
    UnexpectedField(String),
    #[error("A file is required for this request")]
    Missing,
}

impl UploadError {
    pub fn code(&self) -> &'static str {
        match self {
            UploadError::InvalidType => "INVALID_FILE_TYPE",
            UploadError::TooLarge => "FILE_TOO_LARGE",
            UploadError::TooManyFiles => "TOO_MANY_FILES",
            UploadError::UnexpectedField(_) => "UNEXPECTED_FIELD",
            UploadError::Missing => "MISSING_FILE",
        }
    }
}

/// An image file buffered out of a multipart request.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

pub(crate) fn multipart_error(err: MultipartError) -> ApiError {
    ApiError::Validation(vec![format!("Malformed multipart body: {}", err)])
}

/// Checks the allow-lists and the size cap. The MIME type and the filename
/// extension must both pass, so a spoofed extension does not slip through.
pub fn validate_image(file_name: &str, content_type: &str, size: usize) -> Result<(), UploadError> {
    let mime = content_type.to_ascii_lowercase();
    if !ALLOWED_MIME.contains(&mime.as_str()) {
        return Err(UploadError::InvalidType);
    }
    let ext = extension(file_name).ok_or(UploadError::InvalidType)?;
    if !ALLOWED_EXT.contains(&ext.as_str()) {
        return Err(UploadError::InvalidType);
    }
    if size > MAX_FILE_BYTES {
        return Err(UploadError::TooLarge);
    }
    Ok(())
}

/// Buffers one file field into `slot`, enforcing the fixed field name, the
/// one-file-per-request rule and the allow-lists.
pub async fn read_image_field(
    field: Field<'_>,
    slot: &mut Option<ImageUpload>,
) -> Result<(), ApiError> {
    let name = field.name().unwrap_or_default().to_string();
    if name != UPLOAD_FIELD {
        return Err(UploadError::UnexpectedField(name).into());
    }
    if slot.is_some() {
        return Err(UploadError::TooManyFiles.into());
    }

    let file_name = field.file_name().unwrap_or_default().to_string();
    let content_type = field.content_type().unwrap_or_default().to_string();
    let bytes = field.bytes().await.map_err(multipart_error)?;
    validate_image(&file_name, &content_type, bytes.len())?;

    debug!(file = %file_name, size = bytes.len(), "buffered profile picture");
    *slot = Some(ImageUpload {
        file_name,
        content_type,
        bytes,
    });
    Ok(())
}

pub async fn ensure_upload_dir(dir: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("create upload dir {}", dir.display()))?;
    Ok(())
}

/// Writes the buffered file under a collision-resistant name and returns
/// the stored file name.
pub async fn store_image(dir: &Path, upload: &ImageUpload) -> anyhow::Result<String> {
    let name = stored_file_name(&upload.file_name);
    let path = dir.join(&name);
    tokio::fs::write(&path, &upload.bytes)
        .await
        .with_context(|| format!("write upload {}", path.display()))?;
    debug!(file = %name, size = upload.bytes.len(), "stored profile picture");
    Ok(name)
}

/// Best-effort removal of a stored file whose owning row never landed,
/// so a lost uniqueness race does not leave an orphan on disk.
pub async fn discard_image(dir: &Path, name: &str) {
    let path = dir.join(name);
    if let Err(err) = tokio::fs::remove_file(&path).await {
        warn!(file = %name, error = %err, "could not remove orphaned upload");
    }
}

/// `<sanitizedBase>-<epochMillis>-<randomHex>.<ext>`
pub fn stored_file_name(original: &str) -> String {
    let ext = extension(original).unwrap_or_else(|| "jpg".to_string());
    let base = sanitize_base(file_stem(original));
    let millis = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
    let suffix: u32 = rand::random();
    format!("{}-{}-{:08x}.{}", base, millis, suffix, ext)
}

pub fn public_url(base: &str, file_name: &str) -> String {
    format!("{}{}/{}", base.trim_end_matches('/'), PUBLIC_PREFIX, file_name)
}

/// Scheme + host of the incoming request, honoring a forwarding proxy.
pub fn request_base_url(headers: &HeaderMap, host: &str) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    format!("{}://{}", scheme, host)
}

fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn file_stem(name: &str) -> &str {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("")
}

fn sanitize_base(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .take(MAX_BASE_LEN)
        .collect();
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_every_allowed_pair() {
        for (mime, ext) in [
            ("image/jpeg", "jpeg"),
            ("image/jpg", "jpg"),
            ("image/png", "png"),
            ("image/gif", "gif"),
            ("image/webp", "webp"),
            ("image/bmp", "bmp"),
            ("image/tiff", "tiff"),
        ] {
            let name = format!("photo.{}", ext);
            assert!(
                validate_image(&name, mime, 1024).is_ok(),
                "{} / {} should pass",
                mime,
                ext
            );
        }
    }

    #[test]
    fn rejects_pdf_even_with_spoofed_extension() {
        let err = validate_image("resume.png", "application/pdf", 1024).unwrap_err();
        assert!(matches!(err, UploadError::InvalidType));
        assert_eq!(err.code(), "INVALID_FILE_TYPE");
    }

    #[test]
    fn rejects_spoofed_mime_with_bad_extension() {
        let err = validate_image("payload.exe", "image/png", 1024).unwrap_err();
        assert!(matches!(err, UploadError::InvalidType));
    }

    #[test]
    fn rejects_missing_extension_and_missing_mime() {
        assert!(matches!(
            validate_image("photo", "image/png", 10).unwrap_err(),
            UploadError::InvalidType
        ));
        assert!(matches!(
            validate_image("photo.png", "", 10).unwrap_err(),
            UploadError::InvalidType
        ));
    }

    #[test]
    fn mime_and_extension_checks_are_case_insensitive() {
        assert!(validate_image("PHOTO.PNG", "IMAGE/PNG", 10).is_ok());
    }

    #[test]
    fn six_megabytes_is_too_large_four_is_fine() {
        let err = validate_image("big.jpg", "image/jpeg", 6 * 1024 * 1024).unwrap_err();
        assert!(matches!(err, UploadError::TooLarge));
        assert!(validate_image("ok.jpg", "image/jpeg", 4 * 1024 * 1024).is_ok());
    }

    #[test]
    fn sanitizes_the_base_name() {
        assert_eq!(sanitize_base("My Photo (1)"), "My-Photo--1-");
        assert_eq!(sanitize_base("under_score-dash"), "under_score-dash");
        assert_eq!(sanitize_base(""), "image");
        assert_eq!(
            sanitize_base("a-very-long-original-file-name"),
            "a-very-long-original"
        );
        assert_eq!(sanitize_base("a-very-long-original").len(), MAX_BASE_LEN);
    }

    #[test]
    fn stored_name_has_the_documented_shape() {
        let name = stored_file_name("My Photo (1).PNG");
        let re = regex::Regex::new(r"^[A-Za-z0-9_-]{1,20}-\d{13}-[0-9a-f]{8}\.png$").unwrap();
        assert!(re.is_match(&name), "unexpected stored name: {}", name);
    }

    #[test]
    fn stored_names_do_not_collide() {
        let a = stored_file_name("photo.png");
        let b = stored_file_name("photo.png");
        assert_ne!(a, b);
    }

    #[test]
    fn public_url_joins_prefix_and_name() {
        assert_eq!(
            public_url("http://localhost:8080", "a-1-ff.png"),
            "http://localhost:8080/uploads/a-1-ff.png"
        );
        assert_eq!(
            public_url("https://api.example.com/", "a.png"),
            "https://api.example.com/uploads/a.png"
        );
    }

    #[test]
    fn base_url_honors_forwarded_proto() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            request_base_url(&headers, "localhost:8080"),
            "http://localhost:8080"
        );
        headers.insert("x-forwarded-proto", "https".parse().unwrap());
        assert_eq!(
            request_base_url(&headers, "api.example.com"),
            "https://api.example.com"
        );
    }

    #[tokio::test]
    async fn stores_the_file_on_disk() {
        let dir = std::env::temp_dir().join(format!("learnhub-uploads-{:08x}", rand::random::<u32>()));
        ensure_upload_dir(&dir).await.expect("create dir");

        let upload = ImageUpload {
            file_name: "avatar.png".into(),
            content_type: "image/png".into(),
            bytes: Bytes::from_static(b"\x89PNG fake bytes"),
        };
        let stored = store_image(&dir, &upload).await.expect("store");
        let written = tokio::fs::read(dir.join(&stored)).await.expect("read back");
        assert_eq!(written, b"\x89PNG fake bytes");
        assert!(stored.starts_with("avatar-"));
        assert!(stored.ends_with(".png"));

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn discard_removes_the_file_and_tolerates_a_missing_one() {
        let dir =
            std::env::temp_dir().join(format!("learnhub-uploads-{:08x}", rand::random::<u32>()));
        ensure_upload_dir(&dir).await.expect("create dir");

        let upload = ImageUpload {
            file_name: "avatar.png".into(),
            content_type: "image/png".into(),
            bytes: Bytes::from_static(b"orphan"),
        };
        let stored = store_image(&dir, &upload).await.expect("store");
        assert!(tokio::fs::try_exists(dir.join(&stored)).await.unwrap());

        discard_image(&dir, &stored).await;
        assert!(!tokio::fs::try_exists(dir.join(&stored)).await.unwrap());

        // a second discard of the same name must not panic
        discard_image(&dir, &stored).await;

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
