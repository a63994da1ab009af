use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use multidb_common::{LoginRequest, RegisterRequest, Role, User};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::{ApiClient, ApiError};

/// Who is signed in, as far as this process knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Initial credential check or an auth call is in flight.
    Unknown,
    Authenticated(User),
    Anonymous,
}

impl SessionState {
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Self::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.user().map(|u| u.role)
    }
}

#[derive(Debug, Clone)]
struct Shared {
    state: Arc<watch::Sender<SessionState>>,
    /// Bumped on every transition; in-flight calls compare it to detect
    /// that something else (a 401, a logout) moved the session under them.
    epoch: Arc<AtomicU64>,
}

impl Shared {
    fn transition(&self, next: SessionState) -> SessionState {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(next)
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}

/// Holds the current session and runs the auth operations against the API.
///
/// One controller is built per application root and handed to every consumer.
/// Navigation is not its concern: callers observe [`SessionState`] (directly
/// or through [`SessionController::subscribe`]) and decide where to go.
#[derive(Debug)]
pub struct SessionController {
    api: Arc<ApiClient>,
    shared: Shared,
}

impl SessionController {
    pub fn new(api: ApiClient) -> Self {
        let (tx, _rx) = watch::channel(SessionState::Unknown);
        let shared = Shared {
            state: Arc::new(tx),
            epoch: Arc::new(AtomicU64::new(0)),
        };

        let api = api.on_unauthorized({
            let shared = shared.clone();
            move || {
                shared.transition(SessionState::Anonymous);
            }
        });

        Self {
            api: Arc::new(api),
            shared,
        }
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.state.borrow().is_loading()
    }

    pub fn is_authenticated(&self) -> bool {
        self.shared.state.borrow().is_authenticated()
    }

    pub fn current_user(&self) -> Option<User> {
        self.shared.state.borrow().user().cloned()
    }

    /// Resolves the startup state from persisted credentials.
    ///
    /// A token without a readable user snapshot is treated as corrupt and cleared.
    pub async fn check_auth(&self) -> SessionState {
        if self.api.token().await.is_none() {
            self.shared.transition(SessionState::Anonymous);
            return self.state();
        }

        match self.api.current_user().await {
            Ok(user) => {
                self.shared.transition(SessionState::Authenticated(user));
            }
            Err(e) => {
                warn!("stored session unusable, clearing it: {}", e);
                if let Err(e) = self.api.logout().await {
                    warn!("failed to clear credentials: {}", e);
                }
                self.shared.transition(SessionState::Anonymous);
            }
        }
        self.state()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let req = LoginRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        self.authenticate(self.api.login(&req)).await
    }

    pub async fn register(&self, req: &RegisterRequest) -> Result<User, ApiError> {
        self.authenticate(self.api.register(req)).await
    }

    /// Local sign-out. Safe to call from any state, any number of times.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let cleared = self.api.logout().await;
        self.shared.transition(SessionState::Anonymous);
        info!("signed out");
        cleared
    }

    async fn authenticate<F>(&self, call: F) -> Result<User, ApiError>
    where
        F: Future<Output = Result<User, ApiError>>,
    {
        let mut pending = PendingAuth::begin(&self.shared);
        let outcome = call.await;

        match &outcome {
            Ok(user) => {
                pending.settle();
                self.shared
                    .transition(SessionState::Authenticated(user.clone()));
            }
            Err(e) => {
                if !e.is_session_expired() {
                    pending.rollback();
                }
                pending.settle();
            }
        }
        outcome
    }
}

/// Puts the session in the loading state for the duration of one auth call
/// and puts the previous state back if the call is abandoned midway.
struct PendingAuth<'a> {
    shared: &'a Shared,
    previous: Option<SessionState>,
    epoch: u64,
}

impl<'a> PendingAuth<'a> {
    fn begin(shared: &'a Shared) -> Self {
        let previous = shared.transition(SessionState::Unknown);
        Self {
            shared,
            previous: Some(previous),
            epoch: shared.epoch(),
        }
    }

    /// Restores the previous state unless another transition happened meanwhile.
    fn rollback(&mut self) {
        if let Some(previous) = self.previous.take() {
            if self.shared.epoch() == self.epoch {
                self.shared.transition(previous);
            }
        }
    }

    fn settle(&mut self) {
        self.previous = None;
    }
}

impl Drop for PendingAuth<'_> {
    fn drop(&mut self) {
        self.rollback();
    }
}
