//! The signed-in user's profile screen.

use crate::auth::models::{SessionCredential, UserRecord};
use crate::auth::{AuthError, FirebaseAuth};
use crate::navigation::{Navigator, Route};

/// What the profile screen shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub photo_url: Option<String>,
    pub sign_in_provider: Option<String>,
}

impl Profile {
    pub fn from_credential(credential: &SessionCredential) -> Self {
        let sign_in_provider = credential
            .claims()
            .and_then(|claims| claims.firebase)
            .and_then(|firebase| firebase.sign_in_provider)
            .or_else(|| Some(credential.provider_id.clone()));

        Self {
            uid: credential.uid.clone(),
            display_name: credential.display_name.clone(),
            email: credential.email.clone(),
            phone_number: credential.phone_number.clone(),
            photo_url: credential.photo_url.clone(),
            sign_in_provider,
        }
    }

    /// Fills in whatever the account record knows that the credential did not.
    pub fn merge(&mut self, record: UserRecord) {
        self.display_name = record.display_name.or(self.display_name.take());
        self.email = record.email.or(self.email.take());
        self.phone_number = record.phone_number.or(self.phone_number.take());
        self.photo_url = record.photo_url.or(self.photo_url.take());
    }

    /// Name to greet the user with.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.email.as_deref())
            .or(self.phone_number.as_deref())
            .unwrap_or(&self.uid)
    }
}

/// Loads the profile of the current session, refreshed from the account record.
pub async fn load(auth: &FirebaseAuth) -> Result<Profile, AuthError> {
    let credential = auth.current_user().await.ok_or(AuthError::NotSignedIn)?;
    let mut profile = Profile::from_credential(&credential);
    profile.merge(auth.lookup_profile().await?);
    Ok(profile)
}

/// Saves a new display name and returns the updated profile.
pub async fn rename(auth: &FirebaseAuth, display_name: &str) -> Result<Profile, AuthError> {
    let credential = auth
        .update_profile(Some(display_name.trim()), None)
        .await?;
    Ok(Profile::from_credential(&credential))
}

pub fn back_to_home<N: Navigator + ?Sized>(navigator: &N) {
    navigator.navigate(Route::Home);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Session;
    use chrono::Utc;
    use httpmock::prelude::*;
    use serde_json::json;

    fn credential() -> SessionCredential {
        SessionCredential {
            uid: "u1".to_string(),
            phone_number: Some("+919876543210".to_string()),
            email: None,
            display_name: None,
            photo_url: None,
            provider_id: "phone".to_string(),
            id_token: "id-token".to_string(),
            refresh_token: "refresh-token".to_string(),
            expires_at: Utc::now(),
            is_new_user: false,
        }
    }

    #[test]
    fn test_label_prefers_display_name() {
        let mut profile = Profile::from_credential(&credential());
        assert_eq!(profile.label(), "+919876543210");
        assert_eq!(profile.sign_in_provider.as_deref(), Some("phone"));

        profile.merge(UserRecord {
            local_id: "u1".to_string(),
            display_name: Some("John Doe".to_string()),
            email: Some("john.doe@example.com".to_string()),
            ..Default::default()
        });
        assert_eq!(profile.label(), "John Doe");
        assert_eq!(profile.phone_number.as_deref(), Some("+919876543210"));
    }

    #[tokio::test]
    async fn test_load_merges_account_record() {
        let server = MockServer::start();
        let session = Session::new();
        session.replace(credential()).await;
        let auth = FirebaseAuth::new_with_url("key", session, server.url("/v1"));

        server.mock(|when, then| {
            when.method(POST).path("/v1/accounts:lookup");
            then.status(200).json_body(json!({
                "users": [{ "localId": "u1", "email": "john.doe@example.com" }]
            }));
        });

        let profile = load(&auth).await.unwrap();
        assert_eq!(profile.email.as_deref(), Some("john.doe@example.com"));
        assert_eq!(profile.label(), "john.doe@example.com");
    }

    #[tokio::test]
    async fn test_load_requires_session() {
        let auth = FirebaseAuth::new_with_url("key", Session::new(), "http://127.0.0.1:9".into());
        assert!(matches!(load(&auth).await, Err(AuthError::NotSignedIn)));
    }
}
