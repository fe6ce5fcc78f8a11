//! Exchanges a refresh token for a new id token through the Secure Token API.

use super::models::{expiry_from, SessionCredential};
use super::AuthError;
use crate::core::middleware::ApiKeyMiddleware;
use crate::core::parse_error_response;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::{header, Client};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::Deserialize;

const SECURE_TOKEN_V1_API: &str = "https://securetoken.googleapis.com/v1";

/// Id tokens this close to expiry are refreshed before use.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// The Secure Token API answers in snake_case.
#[derive(Debug, Deserialize)]
struct RefreshTokenResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Clone)]
pub struct TokenRefresher {
    client: ClientWithMiddleware,
    base_url: String,
}

impl std::fmt::Debug for TokenRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRefresher")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl TokenRefresher {
    pub fn new(api_key: &str) -> Self {
        Self::new_with_url(api_key, SECURE_TOKEN_V1_API.to_string())
    }

    pub fn new_with_url(api_key: &str, base_url: String) -> Self {
        let client = ClientBuilder::new(Client::new())
            .with(ApiKeyMiddleware::new(api_key))
            .build();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Returns `credential` with a new id token, refresh token and expiry.
    pub async fn refresh(&self, credential: &SessionCredential) -> Result<SessionCredential, AuthError> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "refresh_token")
            .append_pair("refresh_token", &credential.refresh_token)
            .finish();

        let response = self
            .client
            .post(format!("{}/token", self.base_url))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::ApiError(
                parse_error_response(response, "Refresh token failed").await,
            ));
        }

        let result: RefreshTokenResponse = response.json().await?;
        tracing::debug!(uid = %credential.uid, "Refreshed id token");

        Ok(SessionCredential {
            id_token: result.id_token,
            refresh_token: result.refresh_token,
            expires_at: expiry_from(&result.expires_in, Utc::now()),
            ..credential.clone()
        })
    }
}

pub(crate) fn needs_refresh(credential: &SessionCredential, now: DateTime<Utc>) -> bool {
    credential.expires_at <= now + TimeDelta::seconds(EXPIRY_MARGIN_SECS)
}
