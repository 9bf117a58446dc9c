//! Session Module
//!
//! Owns the client-side authentication state: bootstrap from a persisted
//! token, login/register through the API, and logout. State is published on a
//! `watch` channel so views and the route guard always read the current value.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::api::{ApiClient, ApiError, AuthResponse, User};
use crate::guard::{Navigator, Route};
use crate::storage::StorageError;
use crate::token::TokenStore;

pub const LOGIN_FAILED_MESSAGE: &str = "Invalid email or password";
pub const REGISTER_FAILED_MESSAGE: &str = "Registration failed";
pub const SAVE_FAILED_MESSAGE: &str = "Could not save the session";

/// Snapshot of the authentication state.
///
/// `user` is the only source of the authenticated flag, so the two can never
/// disagree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    user: Option<User>,
    error: Option<String>,
    loading: bool,
    bootstrapped: bool,
}

/// Conceptual lifecycle position derived from a [`Session`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Unknown,
    Verifying,
    Authenticated(User),
    Anonymous,
}

impl Session {
    pub fn anonymous() -> Self {
        Self {
            bootstrapped: true,
            ..Self::default()
        }
    }

    pub fn verifying() -> Self {
        Self {
            loading: true,
            ..Self::default()
        }
    }

    pub fn authenticated(user: User) -> Self {
        Self {
            user: Some(user),
            bootstrapped: true,
            ..Self::default()
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    /// Whether startup verification has finished
    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    pub fn phase(&self) -> SessionPhase {
        match (&self.user, self.bootstrapped) {
            (Some(user), _) => SessionPhase::Authenticated(user.clone()),
            (None, true) => SessionPhase::Anonymous,
            (None, false) if self.loading => SessionPhase::Verifying,
            (None, false) => SessionPhase::Unknown,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid email or password")]
    InvalidCredentials(#[source] ApiError),

    #[error("Registration failed")]
    RegistrationRejected(#[source] ApiError),

    #[error("Another sign-in is already in progress")]
    Busy,

    #[error("Session changed while the request was in flight")]
    Superseded,

    #[error("Could not save the session: {0}")]
    Storage(#[source] StorageError),
}

#[derive(Debug, Clone, Copy)]
enum Credential {
    Login,
    Register,
}

impl Credential {
    fn failure_message(self) -> &'static str {
        match self {
            Credential::Login => LOGIN_FAILED_MESSAGE,
            Credential::Register => REGISTER_FAILED_MESSAGE,
        }
    }

    fn failure(self, source: ApiError) -> SessionError {
        match self {
            Credential::Login => SessionError::InvalidCredentials(source),
            Credential::Register => SessionError::RegistrationRejected(source),
        }
    }
}

/// Single owner of the session for one client process
pub struct SessionStore {
    api: ApiClient,
    tokens: TokenStore,
    navigator: Navigator,
    state: watch::Sender<Session>,
    generation: AtomicU64,
}

impl SessionStore {
    pub fn new(api: ApiClient, tokens: TokenStore, navigator: Navigator) -> Self {
        let (state, _) = watch::channel(Session::default());
        Self {
            api,
            tokens,
            navigator,
            state,
            generation: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    /// Bearer token for authenticated API calls, only while signed in
    pub fn bearer_token(&self) -> Option<String> {
        if !self.is_authenticated() {
            return None;
        }
        self.tokens.load().map(|token| token.value)
    }

    /// Restore a session from the persisted token. Runs once; later calls
    /// return the current phase. Verification failures are silent.
    pub async fn bootstrap(&self) -> SessionPhase {
        if self.state.borrow().bootstrapped {
            return self.snapshot().phase();
        }

        let Some(token) = self.tokens.load() else {
            info!("No persisted token, starting anonymous");
            self.state.send_modify(|s| {
                s.user = None;
                s.bootstrapped = true;
            });
            return self.snapshot().phase();
        };

        let claimed = self.state.send_if_modified(|s| {
            if s.loading || s.bootstrapped {
                return false;
            }
            s.loading = true;
            true
        });
        if !claimed {
            debug!("Bootstrap already running");
            return self.snapshot().phase();
        }

        let generation = self.next_generation();
        let flight = InFlight::bootstrap(&self.state);
        let outcome = self.api.verify(&token.value).await;

        flight.finish(|s| {
            s.bootstrapped = true;
            if !self.is_current(generation) {
                debug!("Discarding stale verification result");
                return;
            }
            match outcome {
                Ok(verified) => {
                    info!("Session restored for user: {}", verified.user.id);
                    s.user = Some(verified.user);
                }
                Err(e) => {
                    if e.is_unauthorized() {
                        info!("Persisted token rejected, continuing anonymous: {}", e);
                    } else {
                        warn!("Token verification failed, continuing anonymous: {}", e);
                    }
                    if let Err(e) = self.tokens.remove() {
                        warn!("Failed to remove rejected token: {}", e);
                    }
                    s.user = None;
                }
            }
        });

        self.snapshot().phase()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, SessionError> {
        self.authenticate(Credential::Login, email, password).await
    }

    /// Password confirmation is the caller's job and must happen before this.
    pub async fn register(&self, email: &str, password: &str) -> Result<User, SessionError> {
        self.authenticate(Credential::Register, email, password).await
    }

    /// Drop the token and the user. Safe to call repeatedly.
    ///
    /// The in-memory session is cleared even when the token file cannot be
    /// removed; the error tells the caller the token is still on disk.
    pub fn logout(&self) -> Result<(), StorageError> {
        // Anything still in flight belongs to the old session.
        self.generation.fetch_add(1, Ordering::SeqCst);

        let mut removed = Ok(());
        let changed = self.state.send_if_modified(|s| {
            removed = self.tokens.remove();
            let before = s.clone();
            s.user = None;
            s.error = None;
            s.bootstrapped = true;
            *s != before
        });

        if changed {
            info!("Logged out");
        } else {
            debug!("Logout with no active session");
        }
        if let Err(e) = &removed {
            error!("Failed to remove persisted token: {}", e);
        }
        self.navigator.navigate(Route::Home);
        removed
    }

    async fn authenticate(
        &self,
        kind: Credential,
        email: &str,
        password: &str,
    ) -> Result<User, SessionError> {
        let claimed = self.state.send_if_modified(|s| {
            if s.loading {
                return false;
            }
            s.loading = true;
            s.error = None;
            true
        });
        if !claimed {
            warn!("{:?} rejected: another operation is in flight", kind);
            return Err(SessionError::Busy);
        }

        let generation = self.next_generation();
        let flight = InFlight::new(&self.state);
        let outcome = match kind {
            Credential::Login => self.api.login(email, password).await,
            Credential::Register => self.api.register(email, password).await,
        };

        let mut result = Err(SessionError::Superseded);
        flight.finish(|s| {
            if !self.is_current(generation) {
                debug!("Discarding stale {:?} result", kind);
                return;
            }
            result = match outcome {
                // The user is only published once the token is on disk.
                Ok(AuthResponse { token, user }) => match self.tokens.save(&token) {
                    Ok(_) => {
                        s.user = Some(user.clone());
                        s.error = None;
                        s.bootstrapped = true;
                        Ok(user)
                    }
                    Err(e) => {
                        error!("Failed to persist token: {}", e);
                        s.error = Some(SAVE_FAILED_MESSAGE.to_string());
                        Err(SessionError::Storage(e))
                    }
                },
                Err(e) => {
                    warn!("{:?} failed: {}", kind, e);
                    s.error = Some(kind.failure_message().to_string());
                    Err(kind.failure(e))
                }
            };
        });

        if result.is_ok() {
            self.navigator.navigate(Route::Home);
        }
        result
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

/// Clears `loading` when an operation ends, including when its future is dropped.
/// A dropped bootstrap also settles the session as anonymous so guards stop waiting.
struct InFlight<'a> {
    state: &'a watch::Sender<Session>,
    settles_bootstrap: bool,
    finished: bool,
}

impl<'a> InFlight<'a> {
    fn new(state: &'a watch::Sender<Session>) -> Self {
        Self {
            state,
            settles_bootstrap: false,
            finished: false,
        }
    }

    fn bootstrap(state: &'a watch::Sender<Session>) -> Self {
        Self {
            settles_bootstrap: true,
            ..Self::new(state)
        }
    }

    fn finish(mut self, apply: impl FnOnce(&mut Session)) {
        self.state.send_modify(|s| {
            s.loading = false;
            apply(s);
        });
        self.finished = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        debug!("Operation cancelled, clearing loading flag");
        let settles_bootstrap = self.settles_bootstrap;
        self.state.send_if_modified(|s| {
            let mut changed = std::mem::replace(&mut s.loading, false);
            if settles_bootstrap && !s.bootstrapped {
                s.bootstrapped = true;
                changed = true;
            }
            changed
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: "u1".into(),
            email: "ann@example.com".into(),
            name: "Ann".into(),
        }
    }

    #[test]
    fn phases_follow_state() {
        assert_eq!(Session::default().phase(), SessionPhase::Unknown);
        assert_eq!(Session::verifying().phase(), SessionPhase::Verifying);
        assert_eq!(Session::anonymous().phase(), SessionPhase::Anonymous);
        assert_eq!(
            Session::authenticated(user()).phase(),
            SessionPhase::Authenticated(user())
        );
    }

    #[test]
    fn authenticated_flag_tracks_user() {
        assert!(!Session::anonymous().is_authenticated());
        assert!(!Session::verifying().is_authenticated());
        let session = Session::authenticated(user());
        assert!(session.is_authenticated());
        assert_eq!(session.user().map(|u| u.email.as_str()), Some("ann@example.com"));
    }

    #[test]
    fn failure_messages_are_fixed() {
        let err = Credential::Login.failure(ApiError::Network("refused".into()));
        assert_eq!(err.to_string(), LOGIN_FAILED_MESSAGE);
        let err = Credential::Register.failure(ApiError::Status {
            status: 409,
            message: "email taken".into(),
        });
        assert_eq!(err.to_string(), REGISTER_FAILED_MESSAGE);
    }

    #[test]
    fn in_flight_drop_clears_loading() {
        let (tx, rx) = watch::channel(Session::verifying());
        drop(InFlight::new(&tx));
        assert!(!rx.borrow().loading());
    }

    #[test]
    fn dropped_bootstrap_settles_anonymous() {
        let (tx, rx) = watch::channel(Session::verifying());
        drop(InFlight::bootstrap(&tx));
        let session = rx.borrow().clone();
        assert!(!session.loading());
        assert_eq!(session.phase(), SessionPhase::Anonymous);
    }

    #[test]
    fn dropped_login_keeps_bootstrap_state() {
        let (tx, rx) = watch::channel(Session::authenticated(user()));
        tx.send_modify(|s| s.loading = true);
        drop(InFlight::new(&tx));
        let session = rx.borrow().clone();
        assert!(!session.loading());
        assert!(session.is_authenticated());
    }

    #[test]
    fn in_flight_finish_applies_once() {
        let (tx, rx) = watch::channel(Session::verifying());
        InFlight::new(&tx).finish(|s| s.bootstrapped = true);
        let session = rx.borrow().clone();
        assert!(!session.loading());
        assert_eq!(session.phase(), SessionPhase::Anonymous);
    }
}
