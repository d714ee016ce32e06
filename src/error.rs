//! Error taxonomy for ServiceAccount reconciliation.
//!
//! Every remote-path error is annotated with the identity of the object it
//! concerns so the driver can surface `namespace/name` without re-deriving it.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// The object is absent where the caller expected it to exist.
    /// Absence during existence checks is reported as `Ok(None)`, not this.
    #[error("service account {id} not found")]
    NotFound { id: String },

    /// Optimistic-concurrency retries were exhausted; the object kept
    /// changing under us.
    #[error("update conflict on {id} after {attempts} attempts")]
    Conflict { id: String, attempts: u32 },

    /// The desired state violates server-side constraints (duplicate
    /// identity, invalid field values). Surfaced verbatim, never retried.
    #[error("validation failed for {id}: {message}")]
    Validation { id: String, message: String },

    /// Transport-level failure; retried with bounded backoff before
    /// surfacing.
    #[error("transient error talking to the API server for {id}: {message}")]
    Transient { id: String, message: String },

    /// Import identifier did not match `<namespace>/<name>`.
    #[error("malformed identifier {0:?}: expected <namespace>/<name>")]
    MalformedIdentifier(String),

    /// The secret-set matcher could not verify the expected references.
    #[error("secret verification failed for {id}: {message}")]
    SecretMatch { id: String, message: String },

    /// Delete was issued but absence was not confirmed within the bound.
    #[error("delete of {id} not confirmed after {waited_secs}s")]
    DeleteTimeout { id: String, waited_secs: u64 },

    /// Local configuration problem (unreadable declaration file, missing
    /// name and generateName, and so on).
    #[error("configuration error: {0}")]
    Config(String),

    /// A kube client error that does not map onto the taxonomy above.
    #[error("kubernetes API error: {0}")]
    Kube(#[source] kube::Error),
}

impl Error {
    /// Whether a bounded local retry is worthwhile.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::Transient { .. } | Error::Conflict { .. })
    }

    /// Classify a raw kube client error for the object identified by `id`.
    ///
    /// 404 and 409 get their own variants because the reconciler branches on
    /// them; connection-level failures become [`Error::Transient`]; anything
    /// else is passed through as [`Error::Kube`].
    pub fn from_kube(err: kube::Error, id: &str) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Error::NotFound { id: id.to_string() },
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Error::Validation {
                    id: id.to_string(),
                    message: ae.message,
                }
            }
            kube::Error::Api(ae) if ae.code == 409 => Error::Conflict {
                id: id.to_string(),
                attempts: 1,
            },
            kube::Error::Api(ae) if ae.code == 422 || ae.code == 400 => Error::Validation {
                id: id.to_string(),
                message: ae.message,
            },
            kube::Error::HyperError(e) => Error::Transient {
                id: id.to_string(),
                message: e.to_string(),
            },
            kube::Error::Service(e) => Error::Transient {
                id: id.to_string(),
                message: e.to_string(),
            },
            other => Error::Kube(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} ({code})"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_not_found_classification() {
        let err = Error::from_kube(api_error(404, "NotFound"), "ns/sa");
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_conflict_vs_already_exists() {
        let conflict = Error::from_kube(api_error(409, "Conflict"), "ns/sa");
        assert!(conflict.is_retriable());

        // Duplicate identity on create is fatal, not a retriable conflict.
        let dup = Error::from_kube(api_error(409, "AlreadyExists"), "ns/sa");
        assert!(matches!(dup, Error::Validation { .. }));
        assert!(!dup.is_retriable());
    }

    #[test]
    fn test_validation_classification() {
        let err = Error::from_kube(api_error(422, "Invalid"), "ns/sa");
        assert!(matches!(err, Error::Validation { .. }));
    }
}
