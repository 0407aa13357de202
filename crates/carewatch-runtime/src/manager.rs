//! [`SessionManager`] – binds authentication to session lifecycles.
//!
//! Every successful sign-in builds a brand-new [`DashboardSession`] (fresh
//! snapshot, dispatch state `Idle`, new data-source subscription).  Signing
//! out stops the data source and discards the session; nothing carries over
//! to the next sign-in.
//!
//! `SessionStarted` is published before the session task exists, so every
//! event the session produces follows it on the bus.  A session that ends
//! on its own (its credential was revoked) counts as signed out.
//!
//! The data source is chosen from the [`Backend`] resolved at startup:
//!
//! | Backend | Authenticator | Data source |
//! |---|---|---|
//! | `Live` | [`RestAuthenticator`] | [`LiveFeed`] over [`RtdbChannel`] with the user's id token |
//! | `Simulated` | [`SimulatedAuthenticator`] | [`SimulatedFeed`] |

use std::sync::Arc;

use carewatch_middleware::{
    DataChannel, DataSource, EventBus, LiveFeed, RtdbChannel, SimulatedFeed, Topic,
};
use carewatch_types::{Backend, CareError, Event, EventPayload, Identity, SourceKind};
use tracing::{info, warn};

use crate::auth::{Authenticator, RestAuthenticator, SimulatedAuthenticator};
use crate::session::{DashboardSession, RunningSession, SessionHandle};

const EVENT_SOURCE: &str = "carewatch-runtime::manager";

/// Authentication lifecycle notifications.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    SignedIn(Identity),
    SignedOut,
}

struct ActiveSession {
    identity: Identity,
    running: RunningSession,
}

/// Owns the current session, if any.
pub struct SessionManager {
    backend: Backend,
    auth: Arc<dyn Authenticator>,
    bus: EventBus,
    channel: Option<Arc<dyn DataChannel>>,
    sim_seed: Option<u64>,
    active: Option<ActiveSession>,
}

impl SessionManager {
    /// Manager for `backend`, publishing on `bus`.
    pub fn new(backend: Backend, bus: EventBus) -> Self {
        let auth: Arc<dyn Authenticator> = match &backend {
            Backend::Live(live) => Arc::new(RestAuthenticator::new(live)),
            Backend::Simulated(_) => Arc::new(SimulatedAuthenticator),
        };
        Self {
            backend,
            auth,
            bus,
            channel: None,
            sim_seed: None,
            active: None,
        }
    }

    /// Replace the authenticator chosen from the backend.
    pub fn with_authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auth = auth;
        self
    }

    /// Run live sessions against `channel` instead of the hosted database.
    pub fn with_channel(mut self, channel: Arc<dyn DataChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Seed the simulated feed's RNG.
    pub fn with_sim_seed(mut self, seed: u64) -> Self {
        self.sim_seed = Some(seed);
        self
    }

    pub fn mode(&self) -> SourceKind {
        self.backend.kind()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The signed-in identity, if any.
    pub fn identity(&self) -> Option<&Identity> {
        self.live().map(|a| &a.identity)
    }

    /// Command handle of the current session, if any.
    pub fn handle(&self) -> Option<SessionHandle> {
        self.live().map(|a| a.running.handle())
    }

    fn live(&self) -> Option<&ActiveSession> {
        self.active.as_ref().filter(|a| !a.running.is_finished())
    }

    /// Manual dispatch on the current session.
    pub async fn call_robot(&self) -> Result<(), CareError> {
        match self.handle() {
            Some(handle) => handle.call_robot().await,
            None => Err(CareError::SessionClosed),
        }
    }

    /// Authenticate and, on success, start a fresh session.
    pub async fn sign_in(&mut self, email: &str, password: &str) -> Result<Identity, CareError> {
        let result = self.auth.sign_in(email, password).await;
        self.after_auth(result).await
    }

    /// Create an account and, on success, start a fresh session.
    pub async fn sign_up(&mut self, email: &str, password: &str) -> Result<Identity, CareError> {
        let result = self.auth.sign_up(email, password).await;
        self.after_auth(result).await
    }

    /// End the current session.  Returns `false` when nobody was signed in.
    pub async fn sign_out(&mut self) -> bool {
        let was_active = self.live().is_some();
        if let Err(e) = self.on_auth_event(AuthEvent::SignedOut).await {
            warn!(error = %e, "sign-out did not complete cleanly");
        }
        was_active
    }

    /// React to an authentication lifecycle change.
    ///
    /// `SignedIn` replaces any current session; `SignedOut` tears it down.
    pub async fn on_auth_event(&mut self, event: AuthEvent) -> Result<(), CareError> {
        match event {
            AuthEvent::SignedIn(identity) => {
                self.teardown().await?;
                self.publish(
                    Topic::Session,
                    EventPayload::SessionStarted {
                        email: identity.email.clone(),
                        mode: self.mode(),
                    },
                );
                let source = self.build_source(&identity);
                let running = match DashboardSession::new(source, self.bus.clone()).launch().await {
                    Ok(running) => running,
                    Err(e) => {
                        warn!(error = %e, "session could not start");
                        self.publish(Topic::Dispatch, EventPayload::FeedFault(e.to_string()));
                        self.publish(Topic::Session, EventPayload::SessionEnded);
                        return Err(e);
                    }
                };
                info!(email = %identity.email, mode = %self.mode(), "signed in");
                self.active = Some(ActiveSession { identity, running });
                Ok(())
            }
            AuthEvent::SignedOut => self.teardown().await,
        }
    }

    async fn after_auth(&mut self, result: Result<Identity, CareError>) -> Result<Identity, CareError> {
        let identity = match result {
            Ok(identity) => identity,
            Err(e) => {
                let message = match &e {
                    CareError::Auth(message) => message.clone(),
                    other => other.to_string(),
                };
                self.publish(Topic::Session, EventPayload::AuthFailed(message));
                return Err(e);
            }
        };
        self.on_auth_event(AuthEvent::SignedIn(identity.clone())).await?;
        Ok(identity)
    }

    async fn teardown(&mut self) -> Result<(), CareError> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        // A session that ended itself already announced it.
        let announce = !active.running.is_finished();
        let result = active.running.shutdown().await.map(|_| ());
        info!(email = %active.identity.email, "signed out");
        if announce {
            self.publish(Topic::Session, EventPayload::SessionEnded);
        }
        result
    }

    fn build_source(&self, identity: &Identity) -> Box<dyn DataSource> {
        match &self.backend {
            Backend::Live(live) => {
                let channel: Arc<dyn DataChannel> = match &self.channel {
                    Some(channel) => channel.clone(),
                    None => Arc::new(
                        RtdbChannel::new(live.database_url.clone())
                            .with_id_token(identity.id_token.clone()),
                    ),
                };
                Box::new(LiveFeed::new(channel))
            }
            Backend::Simulated(sim) => {
                let feed = SimulatedFeed::new(*sim);
                Box::new(match self.sim_seed {
                    Some(seed) => feed.with_seed(seed),
                    None => feed,
                })
            }
        }
    }

    fn publish(&self, topic: Topic, payload: EventPayload) {
        self.bus.publish_to(topic, Event::new(EVENT_SOURCE, payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use carewatch_types::SimulatedBackend;
    use std::time::Duration;

    struct RejectingAuthenticator;

    #[async_trait]
    impl Authenticator for RejectingAuthenticator {
        async fn sign_in(&self, _email: &str, _password: &str) -> Result<Identity, CareError> {
            Err(CareError::Auth("INVALID_PASSWORD".to_string()))
        }

        async fn sign_up(&self, _email: &str, _password: &str) -> Result<Identity, CareError> {
            Err(CareError::Auth("EMAIL_EXISTS".to_string()))
        }
    }

    fn simulated() -> Backend {
        Backend::Simulated(SimulatedBackend {
            period: Duration::from_secs(2),
        })
    }

    #[tokio::test]
    async fn rejected_sign_in_creates_no_session() {
        let bus = EventBus::default();
        let mut session_events = bus.subscribe_to(Topic::Session);
        let mut manager = SessionManager::new(simulated(), bus)
            .with_authenticator(Arc::new(RejectingAuthenticator));

        let err = manager.sign_in("a@b.c", "nope").await.unwrap_err();
        assert_eq!(err, CareError::Auth("INVALID_PASSWORD".to_string()));
        assert!(manager.identity().is_none());
        assert!(manager.handle().is_none());

        let event = session_events.recv().await.unwrap();
        assert!(matches!(event.payload, EventPayload::AuthFailed(ref m) if m == "INVALID_PASSWORD"));
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_sign_in_and_out() {
        let bus = EventBus::default();
        let mut session_events = bus.subscribe_to(Topic::Session);
        let mut manager = SessionManager::new(simulated(), bus).with_sim_seed(1);
        assert_eq!(manager.mode(), SourceKind::Simulated);

        let identity = manager.sign_in("demo@example.com", "password123").await.unwrap();
        assert_eq!(identity.email, "demo@example.com");
        assert!(manager.handle().is_some());
        assert!(matches!(
            session_events.recv().await.unwrap().payload,
            EventPayload::SessionStarted { mode: SourceKind::Simulated, .. }
        ));

        manager.call_robot().await.unwrap();

        assert!(manager.sign_out().await);
        assert!(manager.identity().is_none());
        assert!(matches!(session_events.recv().await.unwrap().payload, EventPayload::SessionEnded));
        assert!(!manager.sign_out().await);
        assert_eq!(manager.call_robot().await, Err(CareError::SessionClosed));
    }
}
