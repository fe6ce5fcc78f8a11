use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Provider id Firebase reports for phone-number sign-ins.
pub const PHONE_PROVIDER_ID: &str = "phone";
/// Provider id for Google federated sign-ins.
pub const GOOGLE_PROVIDER_ID: &str = "google.com";

/// A pending phone verification issued by the auth service.
///
/// `id` is Firebase's opaque `sessionInfo`; it is only valid together with the
/// code that was sent to `phone_number`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationChallenge {
    pub id: String,
    pub phone_number: String,
    pub issued_at: DateTime<Utc>,
}

/// The result of a successful sign-in.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCredential {
    pub uid: String,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub provider_id: String,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub is_new_user: bool,
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredential")
            .field("uid", &self.uid)
            .field("phone_number", &self.phone_number)
            .field("email", &self.email)
            .field("provider_id", &self.provider_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl SessionCredential {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Decodes the payload of the id token without verifying its signature.
    ///
    /// The token came straight from the auth service over TLS; this is only
    /// used to read display information such as the sign-in provider.
    pub fn claims(&self) -> Option<IdTokenClaims> {
        let payload = self.id_token.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IdTokenClaims {
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub exp: i64,
    #[serde(default)]
    pub auth_time: Option<i64>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub firebase: Option<FirebaseClaims>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FirebaseClaims {
    pub sign_in_provider: Option<String>,
}

/// Lifetime assumed when the server's `expiresIn` is unusable.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

pub(crate) fn expiry_from(expires_in: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    // The API returns the lifetime in seconds as a decimal string.
    let lifetime = |seconds: i64| {
        TimeDelta::try_seconds(seconds).and_then(|delta| now.checked_add_signed(delta))
    };

    expires_in
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(lifetime)
        .or_else(|| lifetime(DEFAULT_TOKEN_LIFETIME_SECS))
        .unwrap_or(now)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendVerificationCodeRequest {
    pub phone_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recaptcha_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendVerificationCodeResponse {
    pub session_info: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInWithPhoneNumberRequest {
    pub session_info: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInWithPhoneNumberResponse {
    pub id_token: String,
    pub refresh_token: String,
    pub expires_in: String,
    pub local_id: String,
    pub phone_number: Option<String>,
    #[serde(default)]
    pub is_new_user: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInWithIdpRequest {
    pub post_body: String,
    pub request_uri: String,
    pub return_secure_token: bool,
    pub return_idp_credential: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInWithIdpResponse {
    pub local_id: String,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_in: String,
    pub provider_id: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub phone_number: Option<String>,
    #[serde(default)]
    pub is_new_user: bool,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub local_id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub phone_number: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    pub provider_user_info: Option<Vec<ProviderUserInfo>>,
    pub last_login_at: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderUserInfo {
    pub provider_id: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub federated_id: Option<String>,
    pub email: Option<String>,
    pub raw_id: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAccountInfoRequest {
    pub id_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAccountInfoResponse {
    pub users: Option<Vec<UserRecord>>,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub id_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_attribute: Option<Vec<String>>,
    pub return_secure_token: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileResponse {
    pub local_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<String>,
}
