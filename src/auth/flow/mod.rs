//! Phone number sign-in flow.
//!
//! [`PhoneAuthFlow`] drives the two round-trips of phone authentication
//! (send code, verify code) plus federated sign-in and logout. It owns the
//! input state a login screen renders: the phone number field, the six OTP
//! slots with their focus index, the loading flag and the last error.
//!
//! ```text
//!   Idle --submit_phone_number--> AwaitingCode --submit_code--> Authenticated
//!    ^  <--change_phone_number---      |  ^                          |
//!    |                                 +--+ resend_code              |
//!    +-------------------------------logout--------------------------+
//! ```
//!
//! At most one remote call runs at a time: while `loading` is set every
//! state-changing operation fails with [`FlowError::Busy`]. A failed remote
//! call leaves the flow exactly where it was and is never retried.


use crate::auth::models::{SessionCredential, VerificationChallenge};
use crate::auth::otp::{OneTimeCode, PhoneNumber, ValidationError, PHONE_NUMBER_LEN};
use crate::auth::{AuthError, AuthService, IdentityProvider};
use crate::navigation::{Navigator, Route};
use crate::store::{SessionStore, StoreError, LOGGED_IN_KEY, LOGGED_IN_VALUE};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Country code prepended to the national number when requesting a code.
pub const DEFAULT_COUNTRY_CODE: &str = "+91";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowConfig {
    pub country_code: String,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    AwaitingCode { challenge: VerificationChallenge },
    Authenticated { credential: SessionCredential },
}

impl FlowState {
    pub fn stage(&self) -> FlowStage {
        match self {
            FlowState::Idle => FlowStage::Idle,
            FlowState::AwaitingCode { .. } => FlowStage::AwaitingCode,
            FlowState::Authenticated { .. } => FlowStage::Authenticated,
        }
    }
}

/// [`FlowState`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    Idle,
    AwaitingCode,
    Authenticated,
}

#[derive(Error, Debug)]
pub enum FlowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Remote(#[from] AuthError),
    #[error("Failed to persist session: {0}")]
    Store(#[from] StoreError),
    #[error("{operation} is not available in the {stage:?} state")]
    InvalidState {
        operation: &'static str,
        stage: FlowStage,
    },
    #[error("Another request is already in progress")]
    Busy,
}

/// What a login screen needs to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSnapshot {
    pub stage: FlowStage,
    pub loading: bool,
    pub phone_input: String,
    pub otp: OneTimeCode,
    pub last_error: Option<String>,
    pub credential: Option<SessionCredential>,
}

#[derive(Debug)]
struct Inner {
    state: FlowState,
    loading: bool,
    phone_input: String,
    otp: OneTimeCode,
    last_error: Option<String>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: FlowState::Idle,
            loading: false,
            phone_input: String::new(),
            otp: OneTimeCode::new(),
            last_error: None,
        }
    }

    fn ensure(
        &self,
        operation: &'static str,
        allowed: impl Fn(FlowStage) -> bool,
    ) -> Result<(), FlowError> {
        if self.loading {
            return Err(FlowError::Busy);
        }
        let stage = self.state.stage();
        if !allowed(stage) {
            return Err(FlowError::InvalidState { operation, stage });
        }
        Ok(())
    }

    fn challenge(&self, operation: &'static str) -> Result<&VerificationChallenge, FlowError> {
        match &self.state {
            FlowState::AwaitingCode { challenge } => Ok(challenge),
            state => Err(FlowError::InvalidState {
                operation,
                stage: state.stage(),
            }),
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

/// Marks a remote call as in flight. Clears `loading` when completed, or
/// when dropped if the calling future is abandoned.
struct InFlight<'a> {
    inner: &'a Mutex<Inner>,
    done: bool,
}

impl<'a> InFlight<'a> {
    fn start(inner: &'a Mutex<Inner>, guard: &mut MutexGuard<'_, Inner>) -> Self {
        guard.loading = true;
        guard.last_error = None;
        Self { inner, done: false }
    }

    fn complete<R>(mut self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut inner = lock(self.inner);
        inner.loading = false;
        self.done = true;
        f(&mut inner)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.done {
            lock(self.inner).loading = false;
        }
    }
}

/// The phone / federated sign-in controller.
pub struct PhoneAuthFlow<A, S, N> {
    auth: A,
    store: S,
    navigator: N,
    config: FlowConfig,
    inner: Mutex<Inner>,
}

impl<A, S, N> PhoneAuthFlow<A, S, N>
where
    A: AuthService,
    S: SessionStore,
    N: Navigator,
{
    pub fn new(auth: A, store: S, navigator: N) -> Self {
        Self::with_config(auth, store, navigator, FlowConfig::default())
    }

    pub fn with_config(auth: A, store: S, navigator: N, config: FlowConfig) -> Self {
        Self {
            auth,
            store,
            navigator,
            config,
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn auth(&self) -> &A {
        &self.auth
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        let inner = lock(&self.inner);
        FlowSnapshot {
            stage: inner.state.stage(),
            loading: inner.loading,
            phone_input: inner.phone_input.clone(),
            otp: inner.otp.clone(),
            last_error: inner.last_error.clone(),
            credential: match &inner.state {
                FlowState::Authenticated { credential } => Some(credential.clone()),
                _ => None,
            },
        }
    }

    pub fn state(&self) -> FlowState {
        lock(&self.inner).state.clone()
    }

    pub fn stage(&self) -> FlowStage {
        lock(&self.inner).state.stage()
    }

    pub fn is_loading(&self) -> bool {
        lock(&self.inner).loading
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner).last_error.clone()
    }

    /// Acknowledges the error notification.
    pub fn dismiss_error(&self) {
        lock(&self.inner).last_error = None;
    }

    /// Replaces the phone number input. Non-digits are dropped and the input
    /// is capped at ten digits.
    pub fn set_phone_number(&self, text: &str) -> Result<(), FlowError> {
        let mut inner = lock(&self.inner);
        inner.ensure("set_phone_number", |stage| stage == FlowStage::Idle)?;
        inner.phone_input = text
            .chars()
            .filter(|c| c.is_ascii_digit())
            .take(PHONE_NUMBER_LEN)
            .collect();
        Ok(())
    }

    /// Whether the "send code" control is enabled.
    pub fn can_submit_phone(&self) -> bool {
        let inner = lock(&self.inner);
        !inner.loading
            && inner.state.stage() == FlowStage::Idle
            && PhoneNumber::parse(&inner.phone_input).is_ok()
    }

    /// Whether the "verify code" control is enabled.
    pub fn can_submit_code(&self) -> bool {
        let inner = lock(&self.inner);
        !inner.loading
            && inner.state.stage() == FlowStage::AwaitingCode
            && inner.otp.is_complete()
    }

    /// Requests a verification code for the entered phone number.
    pub async fn submit_phone_number(&self) -> Result<(), FlowError> {
        let (flight, phone_number) = {
            let mut inner = lock(&self.inner);
            inner.ensure("submit_phone_number", |stage| stage == FlowStage::Idle)?;
            let number = PhoneNumber::parse(&inner.phone_input)?;
            let flight = InFlight::start(&self.inner, &mut inner);
            (flight, number.with_country_code(&self.config.country_code))
        };

        tracing::info!("Sending verification code");
        let result = self.auth.request_challenge(&phone_number).await;

        flight.complete(|inner| match result {
            Ok(challenge) => {
                inner.otp.clear();
                inner.state = FlowState::AwaitingCode { challenge };
                tracing::debug!("Verification code sent, awaiting code");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Sending verification code failed");
                inner.last_error = Some(e.to_string());
                Err(FlowError::Remote(e))
            }
        })
    }

    /// Types into OTP slot `index`. See [`OneTimeCode::set_digit`].
    pub fn set_otp_digit(&self, index: usize, digit: &str) -> Result<(), FlowError> {
        let mut inner = lock(&self.inner);
        inner.ensure("set_otp_digit", |stage| stage == FlowStage::AwaitingCode)?;
        inner.otp.set_digit(index, digit)?;
        Ok(())
    }

    /// Backspace in OTP slot `index`. See [`OneTimeCode::backspace`].
    pub fn backspace_otp(&self, index: usize) -> Result<(), FlowError> {
        let mut inner = lock(&self.inner);
        inner.ensure("backspace_otp", |stage| stage == FlowStage::AwaitingCode)?;
        inner.otp.backspace(index)?;
        Ok(())
    }

    /// Verifies the entered code against the outstanding challenge.
    ///
    /// On failure the challenge and the typed digits are kept so the user can
    /// correct the code and try again.
    pub async fn submit_code(&self) -> Result<SessionCredential, FlowError> {
        let (flight, challenge, code) = {
            let mut inner = lock(&self.inner);
            inner.ensure("submit_code", |stage| stage == FlowStage::AwaitingCode)?;
            let code = inner.otp.code()?;
            let challenge = inner.challenge("submit_code")?.clone();
            (InFlight::start(&self.inner, &mut inner), challenge, code)
        };

        tracing::info!("Verifying code");
        let result = self.auth.verify_challenge(&challenge, &code).await;
        self.establish(flight, result).await
    }

    /// Signs in with a token from an external identity provider.
    pub async fn sign_in_with_federated_identity<P>(
        &self,
        provider: &P,
    ) -> Result<SessionCredential, FlowError>
    where
        P: IdentityProvider + ?Sized,
    {
        let flight = {
            let mut inner = lock(&self.inner);
            inner.ensure("sign_in_with_federated_identity", |stage| {
                stage != FlowStage::Authenticated
            })?;
            InFlight::start(&self.inner, &mut inner)
        };

        tracing::info!("Signing in with federated identity");
        let result = match provider.sign_in().await {
            Ok(token) => self.auth.verify_federated_token(&token).await,
            Err(e) => Err(e),
        };
        self.establish(flight, result).await
    }

    async fn establish(
        &self,
        flight: InFlight<'_>,
        result: Result<SessionCredential, AuthError>,
    ) -> Result<SessionCredential, FlowError> {
        let credential = match result {
            Ok(credential) => credential,
            Err(e) => {
                tracing::warn!(error = %e, "Sign-in failed");
                return flight.complete(|inner| {
                    inner.last_error = Some(e.to_string());
                    Err(FlowError::Remote(e))
                });
            }
        };

        if let Err(e) = self.store.set(LOGGED_IN_KEY, LOGGED_IN_VALUE).await {
            tracing::warn!(error = %e, "Persisting login failed, discarding session");
            if let Err(sign_out) = self.auth.sign_out().await {
                tracing::warn!(error = %sign_out, "Sign-out after failed persist also failed");
            }
            return flight.complete(|inner| {
                inner.last_error = Some(e.to_string());
                Err(FlowError::Store(e))
            });
        }

        flight.complete(|inner| {
            inner.otp.clear();
            inner.state = FlowState::Authenticated {
                credential: credential.clone(),
            };
        });
        tracing::info!(uid = %credential.uid, "Authenticated");
        self.navigator.navigate(Route::UserProfile);
        Ok(credential)
    }

    /// Requests a fresh code for the number the outstanding challenge was
    /// issued to. The old challenge is replaced only if the request succeeds.
    pub async fn resend_code(&self) -> Result<(), FlowError> {
        let (flight, phone_number) = {
            let mut inner = lock(&self.inner);
            inner.ensure("resend_code", |stage| stage == FlowStage::AwaitingCode)?;
            let phone_number = inner.challenge("resend_code")?.phone_number.clone();
            (InFlight::start(&self.inner, &mut inner), phone_number)
        };

        tracing::info!("Resending verification code");
        let result = self.auth.request_challenge(&phone_number).await;

        flight.complete(|inner| match result {
            Ok(challenge) => {
                inner.otp.clear();
                inner.state = FlowState::AwaitingCode { challenge };
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Resending verification code failed");
                inner.last_error = Some(e.to_string());
                Err(FlowError::Remote(e))
            }
        })
    }

    /// Abandons the outstanding challenge and returns to phone entry. The
    /// typed phone number is kept for editing.
    pub fn change_phone_number(&self) -> Result<(), FlowError> {
        let mut inner = lock(&self.inner);
        inner.ensure("change_phone_number", |stage| stage == FlowStage::AwaitingCode)?;
        inner.otp.clear();
        inner.state = FlowState::Idle;
        Ok(())
    }

    /// Signs out and resets every input.
    ///
    /// If the remote sign-out fails the flow stays authenticated. Once the
    /// credential is gone the flow always returns to `Idle`; a failure to
    /// clear the logged-in marker is still reported.
    pub async fn logout(&self) -> Result<(), FlowError> {
        let flight = {
            let mut inner = lock(&self.inner);
            inner.ensure("logout", |stage| stage == FlowStage::Authenticated)?;
            InFlight::start(&self.inner, &mut inner)
        };

        if let Err(e) = self.auth.sign_out().await {
            tracing::warn!(error = %e, "Sign-out failed");
            return flight.complete(|inner| {
                inner.last_error = Some(e.to_string());
                Err(FlowError::Remote(e))
            });
        }

        let cleared = self.store.remove(LOGGED_IN_KEY).await;

        flight.complete(|inner| {
            inner.state = FlowState::Idle;
            inner.phone_input.clear();
            inner.otp.clear();
            match cleared {
                Ok(()) => {
                    tracing::info!("Logged out");
                    Ok(())
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Clearing logged-in marker failed");
                    inner.last_error = Some(e.to_string());
                    Err(FlowError::Store(e))
                }
            }
        })
    }
}
