use thiserror::Error;

/// Error kinds as they leave the relay core.
///
/// Each variant corresponds to exactly one gRPC status code, so handlers can
/// bubble core failures with `?` and rely on the `From` conversion below for
/// the wire mapping.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Framing errors, unknown enum values, inconsistent declared sizes.
    #[error("{0}")]
    BadRequest(String),
    /// Ids that do not resolve, files that have vanished.
    #[error("{0}")]
    NotFound(String),
    /// Tag or transaction mismatches.
    #[error("{0}")]
    PermissionDenied(String),
    /// Session store quota rejection.
    #[error("{0}")]
    QuotaExceeded(String),
    /// Environmental (filesystem) refusal at open time.
    #[error("{0}")]
    FailedPrecondition(String),
    /// Incompatible API version.
    #[error("{0}")]
    Unavailable(String),
    /// Anything else.
    #[error("{0}")]
    Internal(String),
}

impl From<RelayError> for tonic::Status {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::BadRequest(msg) => tonic::Status::invalid_argument(msg),
            RelayError::NotFound(msg) => tonic::Status::not_found(msg),
            RelayError::PermissionDenied(msg) => tonic::Status::permission_denied(msg),
            RelayError::QuotaExceeded(msg) => tonic::Status::resource_exhausted(msg),
            RelayError::FailedPrecondition(msg) => tonic::Status::failed_precondition(msg),
            RelayError::Unavailable(msg) => tonic::Status::unavailable(msg),
            RelayError::Internal(msg) => tonic::Status::internal(msg),
        }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Internal(err.to_string())
    }
}
