use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ama_store::StoreError;

/// Errors returned by the REST handlers. The body is plain text; store
/// failures are logged and reported as a generic 500.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid room ID")]
    InvalidRoomId,
    #[error("invalid message ID")]
    InvalidMessageId,
    #[error("invalid json")]
    InvalidJson,
    #[error("room not found")]
    RoomNotFound,
    #[error("message not found")]
    MessageNotFound,
    #[error("something went wrong")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRoomId | Self::InvalidMessageId | Self::InvalidJson => {
                StatusCode::BAD_REQUEST
            }
            Self::RoomNotFound | Self::MessageNotFound => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map a store failure: `NotFound` becomes `not_found`, anything else is
    /// logged and becomes `Internal`.
    pub fn from_store(error: StoreError, not_found: ApiError) -> Self {
        if error.is_not_found() {
            return not_found;
        }
        tracing::error!(error = %error, "store operation failed");
        Self::Internal
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        tracing::error!(error = %error, "store operation failed");
        Self::Internal
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ApiError::InvalidRoomId.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::InvalidJson.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::RoomNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::MessageNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn store_not_found_maps_to_given_variant() {
        let err = ApiError::from_store(StoreError::NotFound("room".into()), ApiError::RoomNotFound);
        assert!(matches!(err, ApiError::RoomNotFound));
    }

    #[test]
    fn store_failure_is_internal() {
        let err = ApiError::from_store(StoreError::Database("locked".into()), ApiError::RoomNotFound);
        assert!(matches!(err, ApiError::Internal));
        assert_eq!(err.to_string(), "something went wrong");
    }
}
