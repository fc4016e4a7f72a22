use chrono::Utc;
use reqwest::{Client, Url};
use serde::Deserialize;

use crate::config::OAuthConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::gmail::redact_response_body;
use crate::store::CredentialRecord;

const GMAIL_MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";

// Refresh slightly before the provider-reported expiry so an in-flight
// request never races the token's last second.
const EXPIRY_SKEW_MS: i64 = 60_000;

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

/// Outcome of an authorization-code exchange: everything the caller needs
/// to persist through the credential store. The store's merge rule covers
/// the case where `refresh_token` is absent.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expiry_date: i64,
}

/// Entry points of the OAuth flow: consent URL construction and the
/// authorization-code exchange. Holds no per-user state.
#[derive(Debug, Clone)]
pub struct Authenticator {
    http: Client,
    config: OAuthConfig,
}

impl Authenticator {
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    /// Builds the provider consent URL. `user_id` rides along as opaque
    /// `state` and comes back on the callback; `access_type=offline` plus
    /// `prompt=consent` force a refresh-token-bearing response.
    pub fn begin_authorization(&self, user_id: &str) -> ServiceResult<String> {
        if user_id.trim().is_empty() {
            return Err(ServiceError::InputMissing("user id"));
        }

        let url = Url::parse_with_params(
            &self.config.auth_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", GMAIL_MODIFY_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", user_id),
            ],
        )
        .map_err(|e| ServiceError::Provider(format!("invalid authorization endpoint: {e}")))?;

        Ok(url.to_string())
    }

    /// Exchanges an authorization code for tokens. The `state` parameter
    /// carries the user id the consent flow started with.
    pub async fn complete_authorization(
        &self,
        code: &str,
        state: &str,
    ) -> ServiceResult<TokenGrant> {
        if code.trim().is_empty() {
            return Err(ServiceError::InputMissing("authorization code"));
        }
        if state.trim().is_empty() {
            return Err(ServiceError::InputMissing("state"));
        }

        let token = request_token(
            &self.http,
            &self.config.token_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ],
            "exchange authorization code",
        )
        .await?;

        Ok(TokenGrant {
            user_id: state.to_string(),
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expiry_date: expiry_from_now(token.expires_in),
        })
    }

    /// Builds a request-signing session from a stored credential record.
    /// Performs no network I/O until the session is first used.
    pub fn attach(&self, credentials: CredentialRecord) -> Session {
        Session {
            http: self.http.clone(),
            config: self.config.clone(),
            credentials,
            rotated: false,
        }
    }
}

/// A live, request-signing handle for one user. Refreshes the access token
/// through the refresh grant when it has expired; rotation is reported via
/// [`Session::take_rotation`] so the caller can persist the new snapshot.
#[derive(Debug, Clone)]
pub struct Session {
    http: Client,
    config: OAuthConfig,
    credentials: CredentialRecord,
    rotated: bool,
}

impl Session {
    pub fn credentials(&self) -> &CredentialRecord {
        &self.credentials
    }

    /// The rotated credential snapshot, if any operation refreshed the
    /// token since the last call. The caller persists it.
    pub fn take_rotation(&mut self) -> Option<CredentialRecord> {
        if self.rotated {
            self.rotated = false;
            Some(self.credentials.clone())
        } else {
            None
        }
    }

    /// Returns a bearer token valid for at least the skew window,
    /// refreshing through the refresh grant when needed.
    pub async fn bearer_token(&mut self) -> ServiceResult<String> {
        if let Some(access_token) = &self.credentials.access_token {
            if !access_token_expired(self.credentials.expiry_date, Utc::now().timestamp_millis())
            {
                return Ok(access_token.clone());
            }
        }

        let Some(refresh_token) = self.credentials.refresh_token.clone() else {
            if self.credentials.access_token.is_none() {
                return Err(ServiceError::unauthenticated());
            }
            // Degraded record: the access token carried it this far, but
            // silent refresh is impossible. Fail closed.
            return Err(ServiceError::session_expired(
                "access token expired and no refresh token is stored",
            ));
        };

        tracing::debug!(user_id = %self.credentials.user_id, "refreshing expired access token");

        let token = request_token(
            &self.http,
            &self.config.token_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ],
            "refresh access token",
        )
        .await?;

        self.credentials.access_token = Some(token.access_token.clone());
        self.credentials.expiry_date = Some(expiry_from_now(token.expires_in));
        // Refresh grants rarely carry a new refresh token; keep the old
        // one unless the provider rotated it.
        if let Some(new_refresh) = token.refresh_token {
            self.credentials.refresh_token = Some(new_refresh);
        }
        self.rotated = true;

        Ok(token.access_token)
    }
}

async fn request_token(
    http: &Client,
    token_url: &str,
    form: &[(&str, &str)],
    context: &str,
) -> ServiceResult<TokenResponse> {
    let response = http
        .post(token_url)
        .form(form)
        .send()
        .await
        .map_err(|e| ServiceError::Provider(format!("{context}: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ServiceError::Provider(format!("{context}: read response: {e}")))?;

    if !status.is_success() {
        // invalid_grant means the refresh token or code is no longer
        // usable; only a fresh consent flow can recover.
        if body.contains("invalid_grant") {
            return Err(ServiceError::session_expired(format!(
                "token endpoint rejected the grant: {}",
                redact_response_body(&body)
            )));
        }
        return Err(ServiceError::Provider(format!(
            "{context}: status={status} body={}",
            redact_response_body(&body)
        )));
    }

    serde_json::from_str(&body)
        .map_err(|e| ServiceError::Provider(format!("{context}: decode token response: {e}")))
}

fn expiry_from_now(expires_in_seconds: i64) -> i64 {
    Utc::now().timestamp_millis() + expires_in_seconds.saturating_mul(1000)
}

fn access_token_expired(expiry_date: Option<i64>, now_ms: i64) -> bool {
    match expiry_date {
        Some(expiry) => expiry - EXPIRY_SKEW_MS <= now_ms,
        // No recorded expiry means the token's validity is unknown.
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{access_token_expired, Authenticator, TokenResponse, EXPIRY_SKEW_MS};
    use crate::config::OAuthConfig;
    use crate::error::ServiceError;
    use crate::store::CredentialRecord;

    fn config() -> OAuthConfig {
        OAuthConfig {
            client_id: "client-1".to_string(),
            client_secret: "secret-1".to_string(),
            redirect_uri: "http://localhost:3001/oauth2callback".to_string(),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
        }
    }

    fn record(
        access_token: Option<&str>,
        refresh_token: Option<&str>,
        expiry_date: Option<i64>,
    ) -> CredentialRecord {
        CredentialRecord {
            user_id: "user-1".to_string(),
            access_token: access_token.map(str::to_string),
            refresh_token: refresh_token.map(str::to_string),
            expiry_date,
        }
    }

    #[test]
    fn consent_url_carries_offline_access_and_state() {
        let auth = Authenticator::new(config());
        let url = auth.begin_authorization("user-1").expect("build url");

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("client_id=client-1"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("state=user-1"));
        assert!(url.contains("gmail.modify"));
    }

    #[test]
    fn consent_url_requires_a_user_id() {
        let auth = Authenticator::new(config());
        let err = auth.begin_authorization("  ").expect_err("must fail");
        assert!(matches!(err, ServiceError::InputMissing(_)));
    }

    #[test]
    fn token_response_deserializes() {
        let payload = r#"{"access_token":"ya29.abc","token_type":"Bearer","expires_in":3599,"refresh_token":"1//xyz","scope":"https://www.googleapis.com/auth/gmail.modify"}"#;
        let decoded: TokenResponse = serde_json::from_str(payload).expect("decode token response");
        assert_eq!(decoded.access_token, "ya29.abc");
        assert_eq!(decoded.refresh_token.as_deref(), Some("1//xyz"));
        assert_eq!(decoded.expires_in, 3599);
    }

    #[test]
    fn expiry_check_applies_the_skew_window() {
        let now = Utc::now().timestamp_millis();
        assert!(access_token_expired(Some(now - 1), now));
        assert!(access_token_expired(Some(now + EXPIRY_SKEW_MS - 1), now));
        assert!(!access_token_expired(Some(now + EXPIRY_SKEW_MS + 1_000), now));
        assert!(access_token_expired(None, now));
    }

    #[tokio::test]
    async fn valid_access_token_is_returned_without_refresh() {
        let auth = Authenticator::new(config());
        let expiry = Utc::now().timestamp_millis() + 3_600_000;
        let mut session = auth.attach(record(Some("A1"), Some("R1"), Some(expiry)));

        let token = session.bearer_token().await.expect("bearer token");
        assert_eq!(token, "A1");
        assert!(session.take_rotation().is_none());
    }

    #[tokio::test]
    async fn expired_token_without_refresh_fails_closed() {
        let auth = Authenticator::new(config());
        let expiry = Utc::now().timestamp_millis() - 1_000;
        let mut session = auth.attach(record(Some("A1"), None, Some(expiry)));

        let err = session.bearer_token().await.expect_err("must fail");
        assert!(matches!(err, ServiceError::SessionExpired { .. }));
    }

    #[tokio::test]
    async fn empty_record_is_unauthenticated() {
        let auth = Authenticator::new(config());
        let mut session = auth.attach(record(None, None, None));

        let err = session.bearer_token().await.expect_err("must fail");
        assert!(matches!(err, ServiceError::Unauthenticated { .. }));
    }

    #[tokio::test]
    async fn exchange_rejects_missing_inputs() {
        let auth = Authenticator::new(config());
        assert!(matches!(
            auth.complete_authorization("", "user-1").await,
            Err(ServiceError::InputMissing("authorization code"))
        ));
        assert!(matches!(
            auth.complete_authorization("code-1", "").await,
            Err(ServiceError::InputMissing("state"))
        ));
    }
}
