//! Firebase client showcase.
//!
//! A [`FirebaseApp`] is built from the project's [`FirebaseOptions`] and hands
//! out clients for Authentication, the Realtime Database, Cloud Firestore and
//! Cloud Storage. All clients created by one app share a single [`Session`]:
//! once the user signs in through [`FirebaseAuth`], every data client sends
//! that user's id token.
//!
//! # Examples
//!
//! ```rust,ignore
//! use firebase_showcase::auth::AuthService;
//! use firebase_showcase::{FirebaseApp, FirebaseOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let app = FirebaseApp::new(FirebaseOptions::from_file("firebase.json")?);
//!
//! let auth = app.auth();
//! let challenge = auth.request_challenge("+919876543210").await?;
//! auth.verify_challenge(&challenge, "123456").await?;
//!
//! let tasks = firebase_showcase::tasks::TaskList::new(app.firestore());
//! tasks.add("Buy milk").await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod core;
pub mod navigation;
pub mod profile;
pub mod store;

#[cfg(feature = "database")]
pub mod chat;
#[cfg(feature = "database")]
pub mod database;

#[cfg(feature = "firestore")]
pub mod firestore;
#[cfg(feature = "firestore")]
pub mod tasks;

#[cfg(feature = "storage")]
pub mod gallery;
#[cfg(feature = "storage")]
pub mod storage;

pub use auth::refresh::TokenRefresher;
pub use auth::FirebaseAuth;
pub use config::{ConfigError, FirebaseOptions};
pub use core::Session;

#[cfg(feature = "database")]
use database::FirebaseDatabase;
#[cfg(feature = "firestore")]
use firestore::FirebaseFirestore;
#[cfg(feature = "storage")]
use storage::FirebaseStorage;

/// Entry point: one Firebase project, one signed-in user.
#[derive(Clone)]
pub struct FirebaseApp {
    options: FirebaseOptions,
    session: Session,
}

impl FirebaseApp {
    pub fn new(options: FirebaseOptions) -> Self {
        Self {
            session: Session::with_refresher(TokenRefresher::new(&options.api_key)),
            options,
        }
    }

    pub fn options(&self) -> &FirebaseOptions {
        &self.options
    }

    /// The session shared by every client this app creates.
    pub fn session(&self) -> Session {
        self.session.clone()
    }

    pub fn auth(&self) -> FirebaseAuth {
        FirebaseAuth::new(&self.options.api_key, self.session.clone())
    }

    #[cfg(feature = "database")]
    pub fn database(&self) -> FirebaseDatabase {
        FirebaseDatabase::new(self.session.clone(), self.options.database_url())
    }

    #[cfg(feature = "firestore")]
    pub fn firestore(&self) -> FirebaseFirestore {
        FirebaseFirestore::new(self.session.clone(), &self.options.project_id)
    }

    #[cfg(feature = "storage")]
    pub fn storage(&self) -> FirebaseStorage {
        FirebaseStorage::new(self.session.clone(), self.options.storage_bucket())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> FirebaseOptions {
        FirebaseOptions {
            api_key: "key".to_string(),
            project_id: "demo".to_string(),
            ..Default::default()
        }
    }

    #[cfg(all(feature = "database", feature = "firestore", feature = "storage"))]
    #[test]
    fn test_clients_use_project_defaults() {
        let app = FirebaseApp::new(options());

        assert_eq!(
            app.database().base_url(),
            "https://demo-default-rtdb.firebaseio.com"
        );
        assert_eq!(
            app.firestore().database(),
            "projects/demo/databases/(default)"
        );
        assert_eq!(app.storage().default_bucket(), "demo.appspot.com");
    }

    #[cfg(all(feature = "database", feature = "firestore"))]
    #[tokio::test]
    async fn test_clients_share_one_session() {
        use crate::auth::models::SessionCredential;
        use httpmock::prelude::*;

        let server = MockServer::start();
        let app = FirebaseApp::new(FirebaseOptions {
            database_url: Some(server.url("/")),
            ..options()
        });
        let other = app.clone();

        other
            .session()
            .replace(SessionCredential {
                uid: "u1".to_string(),
                phone_number: Some("+919876543210".to_string()),
                email: None,
                display_name: None,
                photo_url: None,
                provider_id: "phone".to_string(),
                id_token: "shared-token".to_string(),
                refresh_token: "refresh".to_string(),
                expires_at: chrono::Utc::now() + chrono::TimeDelta::hours(1),
                is_new_user: false,
            })
            .await;
        assert!(app.session().is_signed_in().await);

        let database_mock = server.mock(|when, then| {
            when.method(GET)
                .path("/messages.json")
                .query_param("auth", "shared-token");
            then.status(200).body("null");
        });
        let firestore_mock = server.mock(|when, then| {
            when.method(GET)
                .path("/v1/projects/demo/databases/(default)/documents/tasks/t1")
                .header("authorization", "Bearer shared-token");
            then.status(404).json_body(serde_json::json!({
                "error": { "code": 404, "message": "Document not found", "status": "NOT_FOUND" }
            }));
        });

        let messages: Option<serde_json::Value> =
            app.database().reference("messages").get().await.unwrap();
        assert_eq!(messages, None);

        let firestore = FirebaseFirestore::new_with_url(app.session(), server.url("/v1"), "demo");
        let task: Option<serde_json::Value> = firestore.doc("tasks/t1").get().await.unwrap();
        assert_eq!(task, None);

        database_mock.assert();
        firestore_mock.assert();

        other.session().clear().await;
        assert!(!app.session().is_signed_in().await);
    }
}
