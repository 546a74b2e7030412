use thiserror::Error;
use wavecast_core::CoreError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("request failed: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    #[error("store returned status {status}")]
    Status { status: u16 },

    #[error("store returned an unreadable body: {reason}")]
    Decode { reason: String },

    #[error("could not encode request body: {reason}")]
    Encode { reason: String },
}

impl From<StoreError> for CoreError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Status { status } if (400..500).contains(&status) => {
                Self::StoreRejected {
                    reason: format!("status {status}"),
                }
            }
            other => Self::StoreUnavailable {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_map_to_rejected() {
        let error: CoreError = StoreError::Status { status: 403 }.into();
        assert!(matches!(error, CoreError::StoreRejected { .. }));
    }

    #[test]
    fn test_server_errors_map_to_unavailable() {
        let error: CoreError = StoreError::Status { status: 503 }.into();
        assert!(matches!(error, CoreError::StoreUnavailable { .. }));
    }
}
