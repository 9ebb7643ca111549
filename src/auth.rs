use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{broadcast, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AuthError;
use crate::models::{AuthEvent, AuthUser, Session};

/// Role claim a session must carry to see the leaderboard.
pub const REQUIRED_ROLE: &str = "student";

/// How long gate initialization waits on the provider before treating the
/// session as absent.
pub const SESSION_INIT_TIMEOUT: Duration = Duration::from_secs(5);

const PROVIDER_TIMEOUT_SECS: u64 = 10;

/// Remote identity provider handle.
///
/// Implemented by the production HTTP client and by in-test stubs; the gate
/// never talks to a concrete provider directly.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Fetch the session for the currently held credentials, if any.
    async fn current_session(&self) -> Result<Option<Session>, AuthError>;

    /// Invalidate the current session.
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Subscribe to session-change notifications.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// HTTP/JSON identity provider client.
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    access_token: Mutex<Option<String>>,
    events: broadcast::Sender<AuthEvent>,
}

impl HttpIdentityProvider {
    pub fn new(
        base_url: &str,
        api_key: &str,
        access_token: Option<String>,
    ) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
            .build()?;
        let (events, _) = broadcast::channel(16);

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            access_token: Mutex::new(access_token),
            events,
        })
    }
}

/// Principal payload as returned by the provider's `/user` endpoint.
#[derive(Debug, Deserialize)]
struct UserPayload {
    id: Uuid,
    email: String,
    #[serde(default)]
    role: String,
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        let token = match self.access_token.lock().await.clone() {
            Some(token) => token,
            None => return Ok(None),
        };

        let response = self
            .client
            .get(format!("{}/user", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(&token)
            .send()
            .await?;

        // An expired or revoked token is "no session", not a failure.
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AuthError::Status(response.status()));
        }

        let body = response.text().await?;
        let user: UserPayload = serde_json::from_str(&body)?;

        Ok(Some(Session {
            access_token: token,
            user: AuthUser {
                id: user.id,
                email: user.email,
                role: user.role,
            },
        }))
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let token = self.access_token.lock().await.take();

        if let Some(token) = token {
            let response = self
                .client
                .post(format!("{}/logout", self.base_url))
                .header("apikey", &self.api_key)
                .bearer_auth(&token)
                .send()
                .await?;

            // 401 just means the token was already dead.
            if !response.status().is_success()
                && response.status() != reqwest::StatusCode::UNAUTHORIZED
            {
                return Err(AuthError::Status(response.status()));
            }
        }

        let _ = self.events.send(AuthEvent::SignedOut);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

/// Session gate in front of the identity provider.
///
/// Holds the last validated session and keeps it current by listening for
/// session-change notifications. Sessions whose role claim does not match
/// the required role are force-signed-out and presented as "not signed in";
/// provider failures and init timeouts resolve the same way instead of
/// propagating.
pub struct AuthGate<P: IdentityProvider> {
    provider: Arc<P>,
    required_role: String,
    state: Arc<watch::Sender<Option<Session>>>,
    cancel: CancellationToken,
}

impl<P: IdentityProvider> AuthGate<P> {
    /// Resolve the initial session within [`SESSION_INIT_TIMEOUT`] and start
    /// the session-change listener.
    pub async fn init(provider: Arc<P>, required_role: &str) -> Self {
        Self::init_with_timeout(provider, required_role, SESSION_INIT_TIMEOUT).await
    }

    pub async fn init_with_timeout(
        provider: Arc<P>,
        required_role: &str,
        init_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(None);
        let gate = Self {
            provider,
            required_role: required_role.to_string(),
            state: Arc::new(state),
            cancel: CancellationToken::new(),
        };

        // Subscribe before the initial lookup so a change landing in between
        // is not missed.
        let events = gate.provider.subscribe();

        let initial = match tokio::time::timeout(init_timeout, gate.provider.current_session())
            .await
        {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => {
                debug!(error = %err, "session lookup failed during init, treating as signed out");
                None
            }
            Err(_) => {
                debug!("session lookup timed out during init, treating as signed out");
                None
            }
        };
        let validated =
            validate_role(gate.provider.as_ref(), initial, &gate.required_role).await;
        gate.state.send_replace(validated);

        gate.spawn_listener(events);
        gate
    }

    fn spawn_listener(&self, mut events: broadcast::Receiver<AuthEvent>) {
        let provider = Arc::clone(&self.provider);
        let state = Arc::clone(&self.state);
        let required_role = self.required_role.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => {
                        match event {
                            Ok(event) => debug!(?event, "session change notification"),
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                debug!(skipped, "missed session notifications, revalidating")
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }

                        let session = match provider.current_session().await {
                            Ok(session) => session,
                            Err(err) => {
                                debug!(error = %err, "session refresh failed, treating as signed out");
                                None
                            }
                        };
                        // The lookup may have raced with teardown; a stale
                        // completion must not be applied.
                        if cancel.is_cancelled() {
                            break;
                        }
                        let validated =
                            validate_role(provider.as_ref(), session, &required_role).await;
                        state.send_replace(validated);
                    }
                }
            }
        });
    }

    pub fn current_session(&self) -> Option<Session> {
        self.state.borrow().clone()
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.state.borrow().as_ref().map(|session| session.user.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// Sign out at the provider and clear the gated session.
    pub async fn sign_out(&self) {
        if let Err(err) = self.provider.sign_out().await {
            debug!(error = %err, "sign-out request failed");
        }
        self.state.send_replace(None);
    }

    /// Re-fetch the session and re-validate its role claim. Returns whether
    /// the gate is authenticated afterwards.
    pub async fn refresh_auth(&self) -> bool {
        let session = match self.provider.current_session().await {
            Ok(session) => session,
            Err(err) => {
                debug!(error = %err, "session refresh failed, treating as signed out");
                None
            }
        };
        let validated = validate_role(self.provider.as_ref(), session, &self.required_role).await;
        let authenticated = validated.is_some();
        self.state.send_replace(validated);
        authenticated
    }
}

impl<P: IdentityProvider> Drop for AuthGate<P> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Enforce the role claim. A mismatch forces a provider sign-out and leaves
/// only a diagnostic log; the caller sees "no session" either way.
async fn validate_role<P>(
    provider: &P,
    session: Option<Session>,
    required_role: &str,
) -> Option<Session>
where
    P: IdentityProvider + ?Sized,
{
    let session = session?;
    if session.user.role == required_role {
        return Some(session);
    }

    warn!(
        user = %session.user.email,
        role = %session.user.role,
        required = %required_role,
        "session role does not match required role, forcing sign-out"
    );
    if let Err(err) = provider.sign_out().await {
        debug!(error = %err, "forced sign-out failed");
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct StubProvider {
        session: Mutex<Option<Session>>,
        sign_outs: AtomicUsize,
        events: broadcast::Sender<AuthEvent>,
        hang: bool,
        fail: bool,
    }

    impl StubProvider {
        fn with_session(session: Option<Session>) -> Arc<Self> {
            let (events, _) = broadcast::channel(16);
            Arc::new(Self {
                session: Mutex::new(session),
                sign_outs: AtomicUsize::new(0),
                events,
                hang: false,
                fail: false,
            })
        }

        fn hanging() -> Arc<Self> {
            let (events, _) = broadcast::channel(16);
            Arc::new(Self {
                session: Mutex::new(None),
                sign_outs: AtomicUsize::new(0),
                events,
                hang: true,
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            let (events, _) = broadcast::channel(16);
            Arc::new(Self {
                session: Mutex::new(None),
                sign_outs: AtomicUsize::new(0),
                events,
                hang: false,
                fail: true,
            })
        }

        async fn set_session(&self, session: Option<Session>) {
            *self.session.lock().await = session;
        }

        fn emit(&self, event: AuthEvent) {
            let _ = self.events.send(event);
        }

        fn sign_out_count(&self) -> usize {
            self.sign_outs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentityProvider for StubProvider {
        async fn current_session(&self) -> Result<Option<Session>, AuthError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail {
                return Err(AuthError::Status(
                    reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                ));
            }
            Ok(self.session.lock().await.clone())
        }

        async fn sign_out(&self) -> Result<(), AuthError> {
            self.sign_outs.fetch_add(1, Ordering::SeqCst);
            *self.session.lock().await = None;
            let _ = self.events.send(AuthEvent::SignedOut);
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
            self.events.subscribe()
        }
    }

    fn session(role: &str) -> Session {
        Session {
            access_token: "token-123".to_string(),
            user: AuthUser {
                id: Uuid::new_v4(),
                email: "avery.lee@groupscholar.com".to_string(),
                role: role.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn student_session_is_exposed() {
        let provider = StubProvider::with_session(Some(session("student")));
        let gate = AuthGate::init(Arc::clone(&provider), REQUIRED_ROLE).await;

        assert!(gate.is_authenticated());
        let user = gate.current_user().unwrap();
        assert_eq!(user.email, "avery.lee@groupscholar.com");
        assert_eq!(gate.current_session().unwrap().access_token, "token-123");
        assert_eq!(provider.sign_out_count(), 0);
    }

    #[tokio::test]
    async fn mismatched_role_forces_sign_out() {
        let provider = StubProvider::with_session(Some(session("instructor")));
        let gate = AuthGate::init(Arc::clone(&provider), REQUIRED_ROLE).await;

        assert!(!gate.is_authenticated());
        assert!(gate.current_session().is_none());
        assert_eq!(provider.sign_out_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn init_timeout_resolves_to_signed_out() {
        let provider = StubProvider::hanging();
        let gate = AuthGate::init_with_timeout(
            Arc::clone(&provider),
            REQUIRED_ROLE,
            Duration::from_millis(50),
        )
        .await;

        assert!(!gate.is_authenticated());
        assert_eq!(provider.sign_out_count(), 0);
    }

    #[tokio::test]
    async fn provider_error_resolves_to_signed_out() {
        let provider = StubProvider::failing();
        let gate = AuthGate::init(Arc::clone(&provider), REQUIRED_ROLE).await;

        assert!(!gate.is_authenticated());
    }

    #[tokio::test]
    async fn refresh_auth_revalidates_the_role_claim() {
        let provider = StubProvider::with_session(None);
        let gate = AuthGate::init(Arc::clone(&provider), REQUIRED_ROLE).await;
        assert!(!gate.is_authenticated());

        provider.set_session(Some(session("student"))).await;
        assert!(gate.refresh_auth().await);
        assert!(gate.is_authenticated());

        provider.set_session(Some(session("instructor"))).await;
        assert!(!gate.refresh_auth().await);
        assert!(!gate.is_authenticated());
        assert_eq!(provider.sign_out_count(), 1);
    }

    #[tokio::test]
    async fn sign_out_clears_the_gated_session() {
        let provider = StubProvider::with_session(Some(session("student")));
        let gate = AuthGate::init(Arc::clone(&provider), REQUIRED_ROLE).await;
        assert!(gate.is_authenticated());

        gate.sign_out().await;

        assert!(!gate.is_authenticated());
        assert_eq!(provider.sign_out_count(), 1);
    }

    #[tokio::test]
    async fn sign_in_notification_is_picked_up() {
        let provider = StubProvider::with_session(None);
        let gate = AuthGate::init(Arc::clone(&provider), REQUIRED_ROLE).await;
        assert!(!gate.is_authenticated());

        provider.set_session(Some(session("student"))).await;
        provider.emit(AuthEvent::SignedIn);

        tokio::time::timeout(Duration::from_secs(2), async {
            while !gate.is_authenticated() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("gate never observed the sign-in");
    }

    #[tokio::test]
    async fn dropped_gate_ignores_late_notifications() {
        let provider = StubProvider::with_session(None);
        let gate = AuthGate::init(Arc::clone(&provider), REQUIRED_ROLE).await;
        drop(gate);

        // A mismatched session arriving after teardown must not trigger the
        // forced sign-out path.
        provider.set_session(Some(session("instructor"))).await;
        provider.emit(AuthEvent::SignedIn);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(provider.sign_out_count(), 0);
    }
}
