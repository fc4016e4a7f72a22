use thiserror::Error;

use crate::store::StoreError;

/// Failure taxonomy surfaced at the service boundary. Callers branch on the
/// variant to decide between prompting re-login, retrying, or giving up.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("missing required input: {0}")]
    InputMissing(&'static str),

    #[error("user is not authenticated{}", reauthorize_suffix(.reauthorize_url))]
    Unauthenticated { reauthorize_url: Option<String> },

    #[error("session expired: {reason}{}", reauthorize_suffix(.reauthorize_url))]
    SessionExpired {
        reason: String,
        reauthorize_url: Option<String>,
    },

    #[error("mail provider request failed: {0}")]
    Provider(String),

    #[error("credential store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

fn reauthorize_suffix(url: &Option<String>) -> String {
    match url {
        Some(url) => format!(" (reauthorize at {url})"),
        None => String::new(),
    }
}

impl ServiceError {
    pub fn unauthenticated() -> Self {
        Self::Unauthenticated {
            reauthorize_url: None,
        }
    }

    pub fn session_expired(reason: impl Into<String>) -> Self {
        Self::SessionExpired {
            reason: reason.into(),
            reauthorize_url: None,
        }
    }

    /// Attach a consent URL to auth-class failures so the surrounding
    /// application can prompt re-login without further diagnosis.
    pub fn with_reauthorize_url(mut self, url: &str) -> Self {
        match &mut self {
            Self::Unauthenticated { reauthorize_url }
            | Self::SessionExpired {
                reauthorize_url, ..
            } => {
                if reauthorize_url.is_none() {
                    *reauthorize_url = Some(url.to_string());
                }
            }
            _ => {}
        }
        self
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated { .. } | Self::SessionExpired { .. }
        )
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
