//! Firebase Authentication for client apps.
//!
//! `FirebaseAuth` talks to the Identity Toolkit REST API with the project's
//! web API key. It implements [`AuthService`], the seam the phone sign-in
//! flow in [`flow`] is written against, so the flow can be driven by any
//! backend (or a test double).
//!
//! Calls made through this client are never retried automatically: a failed
//! send-code or verify-code must be resubmitted by the user.

pub mod flow;
pub mod models;
pub mod otp;
pub mod refresh;


use crate::auth::models::{
    expiry_from, GetAccountInfoRequest, GetAccountInfoResponse, SendVerificationCodeRequest,
    SendVerificationCodeResponse, SessionCredential, SignInWithIdpRequest, SignInWithIdpResponse,
    SignInWithPhoneNumberRequest, SignInWithPhoneNumberResponse, UpdateProfileRequest,
    UpdateProfileResponse, UserRecord, VerificationChallenge, GOOGLE_PROVIDER_ID,
    PHONE_PROVIDER_ID,
};
use crate::core::middleware::ApiKeyMiddleware;
use crate::core::{parse_error_response, Session};
use chrono::Utc;
use reqwest::{header, Client};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

const IDENTITY_TOOLKIT_V1_API: &str = "https://identitytoolkit.googleapis.com/v1";

/// Redirect URI reported to `signInWithIdp`; the id token is passed in the
/// post body so no redirect actually happens.
const DEFAULT_REQUEST_URI: &str = "http://localhost";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    #[error("{0}")]
    ApiError(String),
    #[error("User not found")]
    UserNotFound,
    #[error("No user is signed in")]
    NotSignedIn,
    #[error("Identity provider error: {0}")]
    IdentityProvider(String),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// A token minted by an external identity provider (e.g. Google Sign-In).
#[derive(Clone, PartialEq, Eq)]
pub struct FederatedToken {
    pub provider_id: String,
    pub id_token: String,
}

impl FederatedToken {
    pub fn google(id_token: impl Into<String>) -> Self {
        Self {
            provider_id: GOOGLE_PROVIDER_ID.to_string(),
            id_token: id_token.into(),
        }
    }
}

impl std::fmt::Debug for FederatedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederatedToken")
            .field("provider_id", &self.provider_id)
            .finish_non_exhaustive()
    }
}

/// The remote authentication service the sign-in flow depends on.
#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Sends a one-time code to `phone_number` (E.164, country code included).
    async fn request_challenge(&self, phone_number: &str)
        -> Result<VerificationChallenge, AuthError>;

    /// Exchanges a challenge and the code the user received for a credential.
    async fn verify_challenge(
        &self,
        challenge: &VerificationChallenge,
        code: &str,
    ) -> Result<SessionCredential, AuthError>;

    /// Exchanges an external identity token for a credential.
    async fn verify_federated_token(
        &self,
        token: &FederatedToken,
    ) -> Result<SessionCredential, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;
}

/// Obtains a federated identity token, typically by running a platform
/// sign-in UI such as Google Sign-In.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self) -> Result<FederatedToken, AuthError>;
}

/// Client for the Identity Toolkit API.
#[derive(Clone)]
pub struct FirebaseAuth {
    client: ClientWithMiddleware,
    base_url: String,
    session: Session,
    recaptcha_token: Option<String>,
    request_uri: String,
}

impl FirebaseAuth {
    /// Creates a new `FirebaseAuth` instance.
    ///
    /// This is typically called via `FirebaseApp::auth()`.
    pub fn new(api_key: &str, session: Session) -> Self {
        Self::new_with_url(api_key, session, IDENTITY_TOOLKIT_V1_API.to_string())
    }

    /// Creates a client against a custom base URL, e.g. the auth emulator
    /// (`http://localhost:9099/identitytoolkit.googleapis.com/v1`).
    pub fn new_with_url(api_key: &str, session: Session, base_url: String) -> Self {
        let client = ClientBuilder::new(Client::new())
            .with(ApiKeyMiddleware::new(api_key))
            .build();

        Self::new_with_client(client, base_url, session)
    }

    pub(crate) fn new_with_client(
        client: ClientWithMiddleware,
        base_url: String,
        session: Session,
    ) -> Self {
        Self {
            client,
            base_url,
            session,
            recaptcha_token: None,
            request_uri: DEFAULT_REQUEST_URI.to_string(),
        }
    }

    /// Sets the app verification token sent along with phone verification
    /// requests.
    pub fn with_recaptcha_token(mut self, token: impl Into<String>) -> Self {
        self.recaptcha_token = Some(token.into());
        self
    }

    pub fn with_request_uri(mut self, request_uri: impl Into<String>) -> Self {
        self.request_uri = request_uri.into();
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn current_user(&self) -> Option<SessionCredential> {
        self.session.credential().await
    }

    async fn post<Req, Resp>(
        &self,
        endpoint: &str,
        request: &Req,
        failure: &str,
    ) -> Result<Resp, AuthError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, endpoint);

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::ApiError(parse_error_response(response, failure).await));
        }

        Ok(response.json().await?)
    }

    async fn id_token(&self) -> Result<String, AuthError> {
        self.session.fresh_id_token().await.ok_or(AuthError::NotSignedIn)
    }

    /// Fetches the signed-in user's account record.
    pub async fn lookup_profile(&self) -> Result<UserRecord, AuthError> {
        let request = GetAccountInfoRequest {
            id_token: self.id_token().await?,
        };

        let result: GetAccountInfoResponse = self
            .post("accounts:lookup", &request, "Get user failed")
            .await?;

        result
            .users
            .and_then(|mut users| users.pop())
            .ok_or(AuthError::UserNotFound)
    }

    /// Updates the signed-in user's display name and photo URL.
    ///
    /// `Some("")` deletes the attribute; `None` leaves it untouched.
    pub async fn update_profile(
        &self,
        display_name: Option<&str>,
        photo_url: Option<&str>,
    ) -> Result<SessionCredential, AuthError> {
        let mut current = self.session.credential().await.ok_or(AuthError::NotSignedIn)?;

        let mut request = UpdateProfileRequest {
            id_token: current.id_token.clone(),
            return_secure_token: true,
            ..Default::default()
        };
        let mut deleted = Vec::new();
        match display_name {
            Some("") => deleted.push("DISPLAY_NAME".to_string()),
            Some(name) => request.display_name = Some(name.to_string()),
            None => {}
        }
        match photo_url {
            Some("") => deleted.push("PHOTO_URL".to_string()),
            Some(url) => request.photo_url = Some(url.to_string()),
            None => {}
        }
        if !deleted.is_empty() {
            request.delete_attribute = Some(deleted);
        }

        let result: UpdateProfileResponse = self
            .post("accounts:update", &request, "Update profile failed")
            .await?;

        current.display_name = result.display_name;
        current.photo_url = result.photo_url;
        if let Some(email) = result.email {
            current.email = Some(email);
        }
        if let (Some(id_token), Some(refresh_token)) = (result.id_token, result.refresh_token) {
            current.id_token = id_token;
            current.refresh_token = refresh_token;
            if let Some(expires_in) = result.expires_in {
                current.expires_at = expiry_from(&expires_in, Utc::now());
            }
        }

        self.session.replace(current.clone()).await;
        tracing::info!(uid = %current.uid, "Updated user profile");
        Ok(current)
    }
}

#[async_trait::async_trait]
impl AuthService for FirebaseAuth {
    async fn request_challenge(
        &self,
        phone_number: &str,
    ) -> Result<VerificationChallenge, AuthError> {
        let request = SendVerificationCodeRequest {
            phone_number: phone_number.to_string(),
            recaptcha_token: self.recaptcha_token.clone(),
        };

        tracing::debug!("Requesting phone verification code");
        let result: SendVerificationCodeResponse = self
            .post(
                "accounts:sendVerificationCode",
                &request,
                "Send verification code failed",
            )
            .await?;

        Ok(VerificationChallenge {
            id: result.session_info,
            phone_number: phone_number.to_string(),
            issued_at: Utc::now(),
        })
    }

    async fn verify_challenge(
        &self,
        challenge: &VerificationChallenge,
        code: &str,
    ) -> Result<SessionCredential, AuthError> {
        let request = SignInWithPhoneNumberRequest {
            session_info: challenge.id.clone(),
            code: code.to_string(),
        };

        let result: SignInWithPhoneNumberResponse = self
            .post(
                "accounts:signInWithPhoneNumber",
                &request,
                "Verify code failed",
            )
            .await?;

        let credential = SessionCredential {
            uid: result.local_id,
            phone_number: result
                .phone_number
                .or_else(|| Some(challenge.phone_number.clone())),
            email: None,
            display_name: None,
            photo_url: None,
            provider_id: PHONE_PROVIDER_ID.to_string(),
            id_token: result.id_token,
            refresh_token: result.refresh_token,
            expires_at: expiry_from(&result.expires_in, Utc::now()),
            is_new_user: result.is_new_user,
        };

        self.session.replace(credential.clone()).await;
        tracing::info!(uid = %credential.uid, "Signed in with phone number");
        Ok(credential)
    }

    async fn verify_federated_token(
        &self,
        token: &FederatedToken,
    ) -> Result<SessionCredential, AuthError> {
        let post_body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("id_token", &token.id_token)
            .append_pair("providerId", &token.provider_id)
            .finish();

        let request = SignInWithIdpRequest {
            post_body,
            request_uri: self.request_uri.clone(),
            return_secure_token: true,
            return_idp_credential: true,
        };

        let result: SignInWithIdpResponse = self
            .post("accounts:signInWithIdp", &request, "Federated sign-in failed")
            .await?;

        let credential = SessionCredential {
            uid: result.local_id,
            phone_number: result.phone_number,
            email: result.email,
            display_name: result.display_name,
            photo_url: result.photo_url,
            provider_id: result
                .provider_id
                .unwrap_or_else(|| token.provider_id.clone()),
            id_token: result.id_token,
            refresh_token: result.refresh_token,
            expires_at: expiry_from(&result.expires_in, Utc::now()),
            is_new_user: result.is_new_user,
        };

        self.session.replace(credential.clone()).await;
        tracing::info!(
            uid = %credential.uid,
            provider = %credential.provider_id,
            "Signed in with federated identity"
        );
        Ok(credential)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if let Some(previous) = self.session.clear().await {
            tracing::info!(uid = %previous.uid, "Signed out");
        }
        Ok(())
    }
}
