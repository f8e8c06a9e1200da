//! AWS SDK error mapping

use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use std::collections::HashMap;
use std::io;

use crate::error::{StorageError, StorageErrorCode};

lazy_static::lazy_static! {
    static ref SERVICE_CODES: HashMap<&'static str, StorageErrorCode> = {
        let mut codes = HashMap::new();
        codes.insert("NoSuchKey", StorageErrorCode::ObjectNotFound);
        codes.insert("NotFound", StorageErrorCode::ObjectNotFound);
        codes.insert("NoSuchBucket", StorageErrorCode::BucketNotFound);
        codes.insert("NoSuchUpload", StorageErrorCode::ObjectNotFound);
        codes.insert("AccessDenied", StorageErrorCode::NotAuthorized);
        codes.insert("AllAccessDisabled", StorageErrorCode::NotAuthorized);
        codes.insert("InvalidAccessKeyId", StorageErrorCode::NotAuthenticated);
        codes.insert("SignatureDoesNotMatch", StorageErrorCode::NotAuthenticated);
        codes.insert("ExpiredToken", StorageErrorCode::NotAuthenticated);
        codes.insert("SlowDown", StorageErrorCode::QuotaExceeded);
        codes.insert("QuotaExceeded", StorageErrorCode::QuotaExceeded);
        codes.insert("BadDigest", StorageErrorCode::InvalidChecksum);
        codes.insert("InvalidDigest", StorageErrorCode::InvalidChecksum);
        codes
    };
}

/// Storage code for an S3 service error code.
pub(crate) fn service_code(code: &str) -> StorageErrorCode {
    SERVICE_CODES
        .get(code)
        .copied()
        .unwrap_or(StorageErrorCode::Unknown)
}

/// Map an SDK failure onto a storage error.
///
/// Connection-level failures keep an `io::Error` cause so classification
/// can tell them apart from service rejections.
pub(crate) fn from_sdk_error<E, R>(err: SdkError<E, R>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let context = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::DispatchFailure(failure) => {
            let kind = if failure.is_timeout() {
                io::ErrorKind::TimedOut
            } else {
                io::ErrorKind::Other
            };
            StorageError::new(StorageErrorCode::Unknown, context.clone())
                .with_cause(io::Error::new(kind, context))
        }
        SdkError::TimeoutError(_) => {
            StorageError::new(StorageErrorCode::RetryLimitExceeded, context)
        }
        _ => {
            let code = err.code().map(service_code).unwrap_or(StorageErrorCode::Unknown);
            let message = err.message().map(str::to_string).unwrap_or(context);
            StorageError::new(code, message)
        }
    }
}

/// Map an HTTP status from a presigned request.
pub(crate) fn from_status(status: u16, body: &str) -> StorageError {
    let code = match status {
        401 => StorageErrorCode::NotAuthenticated,
        403 => StorageErrorCode::NotAuthorized,
        404 => StorageErrorCode::ObjectNotFound,
        429 => StorageErrorCode::QuotaExceeded,
        _ => StorageErrorCode::Unknown,
    };
    StorageError::new(code, format!("Download failed: {} - {}", status, body))
}
