//! Session context
//!
//! Client-side view of the session for long-lived UI surfaces. It publishes
//! a [`SessionSnapshot`] through a `watch` channel, follows the session
//! client's auth events, and routes the user after a sign-out.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::models::{Session, User};
use crate::services::session::{AuthEventKind, SessionClient};
use crate::services::session_storage::SessionStorage;

/// Navigation hooks the context drives
pub trait Navigator: Send + Sync {
    /// Go to `path`
    fn push(&self, path: &str);
    /// Re-render the current view with fresh server state
    fn refresh(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loading,
    Authenticated,
    Anonymous,
}

/// What the UI renders from
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub session: Option<Session>,
    pub user: Option<User>,
}

impl SessionSnapshot {
    fn loading() -> Self {
        Self {
            phase: Phase::Loading,
            session: None,
            user: None,
        }
    }

    fn from_session(session: Option<Session>) -> Self {
        match session {
            Some(session) => Self {
                phase: Phase::Authenticated,
                user: session.user.clone(),
                session: Some(session),
            },
            None => Self {
                phase: Phase::Anonymous,
                session: None,
                user: None,
            },
        }
    }
}

/// Mounted session context
pub struct SessionContext<S: SessionStorage + 'static> {
    client: Arc<SessionClient<S>>,
    navigator: Arc<dyn Navigator>,
    sender: Arc<watch::Sender<SessionSnapshot>>,
    listener: Option<JoinHandle<()>>,
}

impl<S: SessionStorage + 'static> SessionContext<S> {
    /// Mount: publish the local session and start following auth events
    pub fn mount(client: Arc<SessionClient<S>>, navigator: Arc<dyn Navigator>) -> Self {
        let (sender, _) = watch::channel(SessionSnapshot::loading());
        let sender = Arc::new(sender);
        sender.send_replace(SessionSnapshot::from_session(client.get_session()));

        let mut subscription = client.on_auth_state_change();
        let listener = {
            let sender = sender.clone();
            let navigator = navigator.clone();
            tokio::spawn(async move {
                while let Some(event) = subscription.recv().await {
                    tracing::debug!("Auth state changed: {:?}", event.kind);
                    sender.send_replace(SessionSnapshot::from_session(event.session));
                    if event.kind == AuthEventKind::SignedOut {
                        navigator.refresh();
                    }
                }
            })
        };

        Self {
            client,
            navigator,
            sender,
            listener: Some(listener),
        }
    }

    /// Observe snapshots
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.sender.subscribe()
    }

    /// Latest snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.sender.borrow().clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.listener.is_some()
    }

    /// Sign out and go to the sign-in page
    pub async fn sign_out(&self) {
        if let Err(e) = self.client.sign_out().await {
            tracing::error!("Error signing out: {}", e);
        }
        self.navigator.push("/sign-in");
        self.navigator.refresh();
    }

    /// Re-read the local session and publish it
    pub fn refresh_session(&self) {
        if !self.is_mounted() {
            return;
        }
        self.sender
            .send_replace(SessionSnapshot::from_session(self.client.get_session()));
    }

    /// Stop following auth events; nothing is published afterwards
    pub fn unmount(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

impl<S: SessionStorage + 'static> Drop for SessionContext<S> {
    fn drop(&mut self) {
        self.unmount();
    }
}
