//! Error types of the REST storage implementation.

use reqwest::StatusCode;
use thiserror::Error;

use crate::dao::storage::StorageError;

/// Convenient result alias returning [`RestDaoError`] failures.
pub type RestResult<T> = Result<T, RestDaoError>;

/// Failures that can occur while talking to the REST store.
#[derive(Debug, Error)]
pub enum RestDaoError {
    /// Required environment variable is missing.
    #[error("missing store environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build store client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// A request could not be sent.
    #[error("failed to send store request to `{path}`")]
    RequestSend {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// The store answered with an unexpected status code.
    #[error("unexpected store response status {status} for `{path}`")]
    RequestStatus { path: String, status: StatusCode },
}

impl From<RestDaoError> for StorageError {
    fn from(err: RestDaoError) -> Self {
        match err {
            RestDaoError::RequestStatus { status, .. } if status.is_client_error() => {
                StorageError::Rejected {
                    message: err.to_string(),
                }
            }
            err => StorageError::unavailable("REST store request failed".into(), err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_not_retried() {
        let err: StorageError = RestDaoError::RequestStatus {
            path: "votes".into(),
            status: StatusCode::CONFLICT,
        }
        .into();
        assert!(!err.is_retryable());

        let err: StorageError = RestDaoError::RequestStatus {
            path: "votes".into(),
            status: StatusCode::BAD_GATEWAY,
        }
        .into();
        assert!(err.is_retryable());
    }
}
