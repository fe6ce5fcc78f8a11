//! Screen routes and the home menu.
//!
//! Routing itself belongs to the host UI. The library only announces where
//! to go next through a [`Navigator`].

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Home,
    Login,
    UserProfile,
    RealtimeDb,
    Firestore,
    CloudStorage,
}

impl Route {
    pub fn title(&self) -> &'static str {
        match self {
            Route::Home => "Firebase Features",
            Route::Login => "Authentication",
            Route::UserProfile => "User Profile",
            Route::RealtimeDb => "Realtime Database",
            Route::Firestore => "Cloud Firestore",
            Route::CloudStorage => "Cloud Storage",
        }
    }
}

/// Receives navigation requests from feature models.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
}

/// Forwards navigation requests over a channel for the UI loop to consume.
#[derive(Clone, Debug)]
pub struct ChannelNavigator {
    tx: mpsc::UnboundedSender<Route>,
}

impl ChannelNavigator {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Route>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Navigator for ChannelNavigator {
    fn navigate(&self, route: Route) {
        if self.tx.send(route).is_err() {
            tracing::warn!(?route, "Navigation receiver dropped");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MenuItem {
    pub title: &'static str,
    pub description: &'static str,
    pub route: Route,
}

const MENU: [MenuItem; 4] = [
    MenuItem {
        title: "Authentication",
        description: "Sign in with Phone number or Google",
        route: Route::Login,
    },
    MenuItem {
        title: "Firebase Realtime Database",
        description: "Real-time data sync and storage",
        route: Route::RealtimeDb,
    },
    MenuItem {
        title: "Firebase Cloud Firestore",
        description: "Flexible, scalable NoSQL cloud database",
        route: Route::Firestore,
    },
    MenuItem {
        title: "Cloud Storage",
        description: "Upload and manage images in Firebase Storage",
        route: Route::CloudStorage,
    },
];

/// The entries of the home screen, in display order.
pub fn menu() -> &'static [MenuItem] {
    &MENU
}
