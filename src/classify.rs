//! Maps raw backend failures onto stable `(code, message)` pairs

use std::error::Error;
use std::io;

use crate::error::{ErrorDetails, StorageError};

const DEADLINE_EXCEEDED: &str = "deadline-exceeded";
const UNAVAILABLE: &str = "unavailable";
const UNKNOWN: &str = "unknown";

/// Classify a failure raised by a storage backend.
///
/// A recognized [`StorageError`] (the failure itself or its immediate cause)
/// yields its symbolic code lower-cased and hyphenated. When the underlying
/// cause is a transport error the code is normalized: `deadline-exceeded` if
/// the transport reports a mid-flight cancellation, `unavailable` otherwise.
/// Anything else is `unknown` with the failure's own message.
pub fn classify(failure: &(dyn Error + 'static)) -> ErrorDetails {
    if let Some(storage) = find_storage_error(failure) {
        let code = match storage.source().and_then(transport_error) {
            Some(io_err) => transport_code(io_err),
            None => symbolic_code(storage.code.name()),
        };
        return ErrorDetails {
            code,
            message: storage.message.clone(),
        };
    }

    if let Some(io_err) = transport_error(failure) {
        return ErrorDetails {
            code: transport_code(io_err),
            message: failure.to_string(),
        };
    }

    ErrorDetails {
        code: UNKNOWN.to_string(),
        message: failure.to_string(),
    }
}

/// `OBJECT_NOT_FOUND` -> `object-not-found`
fn symbolic_code(name: &str) -> String {
    name.to_lowercase().replace('_', "-")
}

fn find_storage_error<'a>(failure: &'a (dyn Error + 'static)) -> Option<&'a StorageError> {
    failure
        .downcast_ref::<StorageError>()
        .or_else(|| failure.source()?.downcast_ref::<StorageError>())
}

fn transport_error<'a>(err: &'a (dyn Error + 'static)) -> Option<&'a io::Error> {
    err.downcast_ref::<io::Error>()
}

fn transport_code(err: &io::Error) -> String {
    if is_cancellation(err) {
        DEADLINE_EXCEEDED.to_string()
    } else {
        UNAVAILABLE.to_string()
    }
}

fn is_cancellation(err: &io::Error) -> bool {
    let message = err.to_string().to_lowercase();
    message.contains("canceled") || message.contains("cancelled")
}
