use serde::Serialize;
use tracing::{debug, warn};

use crate::aggregate::{aggregate, NewsletterBatch};
use crate::error::{ServiceError, ServiceResult};
use crate::gmail::{query, GmailClient};
use crate::normalize::normalize_message;
use crate::oauth::{Authenticator, Session};
use crate::store::{CredentialRecord, CredentialStore};

/// Result of one moderation call. Auth-class failures propagate as typed
/// errors instead; anything else the upstream rejects lands here with the
/// underlying message, and retrying is the caller's decision.
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(error: &ServiceError) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

enum MessageAction {
    MarkRead,
    MarkUnread,
    MoveToTrash,
    RestoreFromTrash,
}

impl MessageAction {
    fn describe(&self) -> &'static str {
        match self {
            Self::MarkRead => "mark read",
            Self::MarkUnread => "mark unread",
            Self::MoveToTrash => "move to trash",
            Self::RestoreFromTrash => "restore from trash",
        }
    }
}

/// The boundary the surrounding application talks to: wires the
/// credential store, the OAuth flow, and the provider client into the
/// fetch pipeline and the moderation actions.
pub struct NewsletterService {
    store: Box<dyn CredentialStore>,
    authenticator: Authenticator,
    client: GmailClient,
}

impl NewsletterService {
    pub fn new(
        store: Box<dyn CredentialStore>,
        authenticator: Authenticator,
        client: GmailClient,
    ) -> Self {
        Self {
            store,
            authenticator,
            client,
        }
    }

    pub fn begin_authorization(&self, user_id: &str) -> ServiceResult<String> {
        self.authenticator.begin_authorization(user_id)
    }

    /// Exchanges the authorization code carried back from consent and
    /// persists the grant. The store's merge rule keeps a previously
    /// known refresh token when the provider omitted one.
    pub async fn complete_authorization(
        &self,
        code: &str,
        state: &str,
    ) -> ServiceResult<CredentialRecord> {
        let grant = self.authenticator.complete_authorization(code, state).await?;
        let record = self
            .store
            .upsert(
                &grant.user_id,
                &grant.access_token,
                grant.refresh_token.as_deref(),
                grant.expiry_date,
            )
            .await?;

        debug!(user_id = %record.user_id, "stored credentials after code exchange");
        Ok(record)
    }

    /// Fetches, normalizes, sanitizes, and orders the user's newsletters.
    ///
    /// The two searches run concurrently and both must succeed. Detail
    /// fetches run one at a time to bound upstream load; any failure
    /// aborts the whole fetch so the returned counts are never partial.
    pub async fn list_newsletters(&self, user_id: &str) -> ServiceResult<NewsletterBatch> {
        if user_id.trim().is_empty() {
            return Err(ServiceError::InputMissing("user id"));
        }

        let mut session = self.session(user_id).await?;
        let token = self.bearer(&mut session).await?;

        let plan = query::plan();
        let (active, trashed) = tokio::try_join!(
            self.client
                .list_message_ids(&token, &plan.active, query::PAGE_SIZE),
            self.client
                .list_message_ids(&token, &plan.trash, query::PAGE_SIZE),
        )
        .map_err(|err| self.reauthorize_hint(user_id, err))?;

        debug!(
            user_id = %user_id,
            active = active.len(),
            trashed = trashed.len(),
            "newsletter searches returned message ids"
        );

        let mut newsletters = Vec::with_capacity(active.len() + trashed.len());
        for stub in active.iter().chain(trashed.iter()) {
            let raw = self
                .client
                .get_message(&token, &stub.id)
                .await
                .map_err(|err| self.reauthorize_hint(user_id, err))?;

            // Mail without an HTML body is out of scope, not an error.
            if let Some(newsletter) = normalize_message(&raw) {
                newsletters.push(newsletter);
            }
        }

        Ok(aggregate(newsletters))
    }

    pub async fn mark_read(&self, user_id: &str, message_id: &str) -> ServiceResult<ActionOutcome> {
        self.perform_action(user_id, message_id, MessageAction::MarkRead)
            .await
    }

    pub async fn mark_unread(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> ServiceResult<ActionOutcome> {
        self.perform_action(user_id, message_id, MessageAction::MarkUnread)
            .await
    }

    pub async fn move_to_trash(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> ServiceResult<ActionOutcome> {
        self.perform_action(user_id, message_id, MessageAction::MoveToTrash)
            .await
    }

    pub async fn restore_from_trash(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> ServiceResult<ActionOutcome> {
        self.perform_action(user_id, message_id, MessageAction::RestoreFromTrash)
            .await
    }

    async fn perform_action(
        &self,
        user_id: &str,
        message_id: &str,
        action: MessageAction,
    ) -> ServiceResult<ActionOutcome> {
        if user_id.trim().is_empty() {
            return Err(ServiceError::InputMissing("user id"));
        }
        if message_id.trim().is_empty() {
            return Err(ServiceError::InputMissing("message id"));
        }

        let mut session = self.session(user_id).await?;
        let token = self.bearer(&mut session).await?;

        let result = match action {
            MessageAction::MarkRead => self.client.remove_unread_label(&token, message_id).await,
            MessageAction::MarkUnread => self.client.add_unread_label(&token, message_id).await,
            MessageAction::MoveToTrash => self.client.trash_message(&token, message_id).await,
            MessageAction::RestoreFromTrash => {
                self.client.untrash_message(&token, message_id).await
            }
        };

        match result {
            Ok(()) => Ok(ActionOutcome::ok()),
            Err(err) if err.is_auth_error() => Err(self.reauthorize_hint(user_id, err)),
            Err(err) => {
                warn!(
                    user_id = %user_id,
                    message_id = %message_id,
                    "{} failed: {err}",
                    action.describe()
                );
                Ok(ActionOutcome::failed(&err))
            }
        }
    }

    /// Resolves the stored credential into a request-signing session.
    /// Absence of a record means the user never completed consent.
    async fn session(&self, user_id: &str) -> ServiceResult<Session> {
        let Some(record) = self.store.get(user_id).await? else {
            return Err(self.reauthorize_hint(user_id, ServiceError::unauthenticated()));
        };
        Ok(self.authenticator.attach(record))
    }

    /// Obtains a bearer token, persisting any token rotation before the
    /// token is used; a crash mid-fetch must not lose a fresh grant.
    async fn bearer(&self, session: &mut Session) -> ServiceResult<String> {
        let user_id = session.credentials().user_id.clone();
        let token = session
            .bearer_token()
            .await
            .map_err(|err| self.reauthorize_hint(&user_id, err))?;

        if let Some(snapshot) = session.take_rotation() {
            if let (Some(access), Some(expiry)) =
                (snapshot.access_token.as_deref(), snapshot.expiry_date)
            {
                self.store
                    .upsert(
                        &snapshot.user_id,
                        access,
                        snapshot.refresh_token.as_deref(),
                        expiry,
                    )
                    .await?;
            }
        }

        Ok(token)
    }

    /// Auth-class failures carry a consent URL so the surrounding
    /// application can prompt re-login without further diagnosis.
    fn reauthorize_hint(&self, user_id: &str, err: ServiceError) -> ServiceError {
        if !err.is_auth_error() {
            return err;
        }
        match self.authenticator.begin_authorization(user_id) {
            Ok(url) => err.with_reauthorize_url(&url),
            Err(_) => err,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::NewsletterService;
    use crate::config::OAuthConfig;
    use crate::error::ServiceError;
    use crate::gmail::GmailClient;
    use crate::oauth::Authenticator;
    use crate::store::{CredentialStore, MemoryStore};

    fn config() -> OAuthConfig {
        OAuthConfig {
            client_id: "client-1".to_string(),
            client_secret: "secret-1".to_string(),
            redirect_uri: "http://localhost:3001/oauth2callback".to_string(),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
        }
    }

    fn service_with_store(store: MemoryStore) -> NewsletterService {
        NewsletterService::new(
            Box::new(store),
            Authenticator::new(config()),
            GmailClient::new(),
        )
    }

    #[tokio::test]
    async fn list_requires_a_user_id() {
        let service = service_with_store(MemoryStore::new());
        let err = service.list_newsletters(" ").await.expect_err("must fail");
        assert!(matches!(err, ServiceError::InputMissing("user id")));
    }

    #[tokio::test]
    async fn actions_require_user_and_message_ids() {
        let service = service_with_store(MemoryStore::new());

        let err = service.mark_read("", "msg-1").await.expect_err("must fail");
        assert!(matches!(err, ServiceError::InputMissing("user id")));

        let err = service
            .move_to_trash("user-1", "")
            .await
            .expect_err("must fail");
        assert!(matches!(err, ServiceError::InputMissing("message id")));
    }

    #[tokio::test]
    async fn unknown_user_is_unauthenticated_with_a_reauthorize_url() {
        let service = service_with_store(MemoryStore::new());

        let err = service
            .list_newsletters("user-1")
            .await
            .expect_err("must fail");
        match err {
            ServiceError::Unauthenticated { reauthorize_url } => {
                let url = reauthorize_url.expect("reauthorize url attached");
                assert!(url.contains("state=user-1"));
            }
            other => panic!("expected Unauthenticated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_record_without_refresh_token_is_session_expired() {
        let store = MemoryStore::new();
        let expired = Utc::now().timestamp_millis() - 1_000;
        store
            .upsert("user-1", "A1", None, expired)
            .await
            .expect("seed credential");

        let service = service_with_store(store);
        let err = service
            .list_newsletters("user-1")
            .await
            .expect_err("must fail");
        match err {
            ServiceError::SessionExpired {
                reauthorize_url, ..
            } => {
                assert!(reauthorize_url.expect("reauthorize url").contains("state=user-1"));
            }
            other => panic!("expected SessionExpired, got {other:?}"),
        }
    }
}
