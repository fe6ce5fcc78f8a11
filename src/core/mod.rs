pub mod middleware;

use crate::auth::models::SessionCredential;
use crate::auth::refresh::{needs_refresh, TokenRefresher};
use chrono::Utc;
use middleware::IdTokenMiddleware;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Deserialize)]
pub struct FirebaseErrorResponse {
    pub error: FirebaseErrorDetails,
}

#[derive(Debug, Deserialize)]
pub struct FirebaseErrorDetails {
    pub code: u16,
    pub message: String,
    pub status: Option<String>,
    pub errors: Option<Vec<FirebaseSubError>>,
}

#[derive(Debug, Deserialize)]
pub struct FirebaseSubError {
    pub message: String,
    pub domain: Option<String>,
    pub reason: Option<String>,
}

impl FirebaseErrorResponse {
    pub fn display_message(&self) -> String {
        format!("{} (code: {})", self.error.message, self.error.code)
    }
}

pub async fn parse_error_response(response: reqwest::Response, default_msg: &str) -> String {
    let status = response.status();
    match response.json::<FirebaseErrorResponse>().await {
        Ok(error_resp) => error_resp.display_message(),
        Err(_) => format!("{}: {}", default_msg, status),
    }
}

/// The signed-in user shared by every client handed out by one `FirebaseApp`.
///
/// `FirebaseAuth` writes it on sign-in and clears it on sign-out; the data
/// clients read the id token from it on every request. A session built with
/// [`Session::with_refresher`] swaps an expiring id token for a new one first;
/// without a refresher the stored token is sent until it is replaced.
#[derive(Clone, Default, Debug)]
pub struct Session {
    inner: Arc<RwLock<Option<SessionCredential>>>,
    refresher: Option<TokenRefresher>,
    refreshing: Arc<Mutex<()>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_refresher(refresher: TokenRefresher) -> Self {
        Self {
            refresher: Some(refresher),
            ..Self::default()
        }
    }

    pub async fn credential(&self) -> Option<SessionCredential> {
        self.inner.read().await.clone()
    }

    pub async fn id_token(&self) -> Option<String> {
        self.inner
            .read()
            .await
            .as_ref()
            .map(|credential| credential.id_token.clone())
    }

    /// The id token to send now, refreshed first when it is about to expire.
    ///
    /// A failed refresh is logged and the stored token is returned; the
    /// service then rejects it and the caller sees that error.
    pub async fn fresh_id_token(&self) -> Option<String> {
        let Some(refresher) = &self.refresher else {
            return self.id_token().await;
        };

        let credential = self.credential().await?;
        if !needs_refresh(&credential, Utc::now()) {
            return Some(credential.id_token);
        }

        let _refreshing = self.refreshing.lock().await;
        // Another request may have refreshed while this one waited.
        let credential = self.credential().await?;
        if !needs_refresh(&credential, Utc::now()) {
            return Some(credential.id_token);
        }

        match refresher.refresh(&credential).await {
            Ok(fresh) => {
                let mut current = self.inner.write().await;
                match current.as_mut() {
                    Some(stored) if stored.refresh_token == credential.refresh_token => {
                        *stored = fresh;
                        Some(stored.id_token.clone())
                    }
                    // Signed out or replaced meanwhile.
                    other => other.as_ref().map(|c| c.id_token.clone()),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, uid = %credential.uid, "Id token refresh failed");
                Some(credential.id_token)
            }
        }
    }

    pub async fn replace(&self, credential: SessionCredential) {
        *self.inner.write().await = Some(credential);
    }

    pub async fn clear(&self) -> Option<SessionCredential> {
        self.inner.write().await.take()
    }

    pub async fn is_signed_in(&self) -> bool {
        self.inner.read().await.is_some()
    }
}

/// An authenticated data-service client.
///
/// Dereferences to a client that retries transient failures up to 3 times.
/// Requests that must not be replayed (pushes, commits, streamed uploads) go
/// through [`ApiClient::once`], which sends a single attempt.
#[derive(Clone)]
pub struct ApiClient {
    retrying: ClientWithMiddleware,
    once: ClientWithMiddleware,
}

impl ApiClient {
    pub fn new(token: IdTokenMiddleware) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        Self {
            retrying: ClientBuilder::new(Client::new())
                .with(RetryTransientMiddleware::new_with_policy(retry_policy))
                .with(token.clone())
                .build(),
            once: ClientBuilder::new(Client::new()).with(token).build(),
        }
    }

    pub fn once(&self) -> &ClientWithMiddleware {
        &self.once
    }
}

impl Deref for ApiClient {
    type Target = ClientWithMiddleware;

    fn deref(&self) -> &Self::Target {
        &self.retrying
    }
}
