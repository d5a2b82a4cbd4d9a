//! Session gate: the client's sign-in state machine and the snapshot it owns.
//!
//! The gate only moves on identity-change notifications from the gateway's
//! watch channel. `sign_in`/`sign_out` call the gateway and then consume the
//! notification that results, so a session restored from disk and one begun
//! interactively go through the same path. Every state change is published
//! on a second watch channel (`subscribe_state`) for views that follow it.

use std::sync::Arc;

use tokio::sync::watch;

use crate::enrollment::{compute_dashboard_stats, registered_courses, DashboardStats};
use crate::error::{AuthError, Error, Result, ValidationError};
use crate::gateway::RemoteGateway;
use crate::models::{Account, Collection, Course, Identity, Role};
use crate::storage::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    SignedOut,
    /// Identity known, snapshot not loaded yet (or the last load failed).
    SigningIn,
    SignedIn(Role),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Login,
    Signup,
    Dashboard,
    Courses,
    MyCourses,
    Profile,
    Admin,
}

/// Everything the client knows about the signed-in account.
#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub identity: Option<Identity>,
    pub profile: Option<Account>,
    /// Every course document, inactive ones included.
    pub all_courses: Vec<Course>,
    /// Courses this account may browse: active ones, or all of them for admins.
    pub catalog: Vec<Course>,
    pub registered: Vec<Course>,
    pub stats: DashboardStats,
}

impl AppState {
    pub fn is_registered(&self, course_id: &str) -> bool {
        self.registered.iter().any(|course| course.id == course_id)
    }
}

pub struct SessionGate {
    gateway: Arc<dyn RemoteGateway>,
    changes: watch::Receiver<Option<Identity>>,
    state: watch::Sender<SessionState>,
    app: AppState,
}

impl SessionGate {
    pub fn new(gateway: Arc<dyn RemoteGateway>) -> Self {
        let changes = gateway.on_session_change();
        Self::with_changes(gateway, changes)
    }

    /// A gate that follows `changes` instead of the gateway's own channel.
    pub fn with_changes(gateway: Arc<dyn RemoteGateway>, changes: watch::Receiver<Option<Identity>>) -> Self {
        let (state, _) = watch::channel(SessionState::SignedOut);
        Self {
            gateway,
            changes,
            state,
            app: AppState::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that sees every state transition, also while `run` owns the gate.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    pub fn app(&self) -> &AppState {
        &self.app
    }

    pub fn gateway(&self) -> Arc<dyn RemoteGateway> {
        self.gateway.clone()
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self.state(), SessionState::SignedIn(_))
    }

    /// Apply whatever identity the gateway holds right now.
    pub async fn start(&mut self) -> Result<()> {
        let current = self.changes.borrow_and_update().clone();
        self.handle(current).await
    }

    /// Apply a pending notification, if one arrived since the last look.
    pub async fn sync(&mut self) -> Result<()> {
        if !self.changes.has_changed().unwrap_or(false) {
            return Ok(());
        }
        let current = self.changes.borrow_and_update().clone();
        self.handle(current).await
    }

    /// Follow notifications until the sending side goes away. Load failures
    /// are logged and leave the gate `SigningIn` until the next notification.
    pub async fn run(&mut self) {
        while self.changes.changed().await.is_ok() {
            let current = self.changes.borrow_and_update().clone();
            if let Err(e) = self.handle(current).await {
                tracing::warn!(error = %e, "could not load account data");
            }
        }
        tracing::debug!("session notifications closed");
    }

    pub async fn handle(&mut self, change: Option<Identity>) -> Result<()> {
        match change {
            None => {
                self.app = AppState::default();
                self.set_state(SessionState::SignedOut);
                tracing::info!("signed out");
                Ok(())
            }
            Some(identity) => {
                self.set_state(SessionState::SigningIn);
                let (app, role) = load_snapshot(self.gateway.as_ref(), identity).await?;
                tracing::info!(?role, courses = app.all_courses.len(), "signed in");
                self.app = app;
                self.set_state(SessionState::SignedIn(role));
                Ok(())
            }
        }
    }

    /// Reload profile, catalog and stats for the current identity.
    pub async fn refresh(&mut self) -> Result<()> {
        let identity = self.app.identity.clone().ok_or(AuthError::NotAuthenticated)?;
        let (app, role) = load_snapshot(self.gateway.as_ref(), identity).await?;
        self.app = app;
        self.set_state(SessionState::SignedIn(role));
        Ok(())
    }

    pub async fn sign_in(&mut self, email: &str, password: &str) -> Result<()> {
        if email.trim().is_empty() {
            return Err(ValidationError::missing("email").into());
        }
        if password.is_empty() {
            return Err(ValidationError::missing("password").into());
        }
        self.gateway.authenticate(email.trim(), password).await?;
        self.sync().await
    }

    pub async fn sign_out(&mut self) -> Result<()> {
        self.gateway.end_session().await?;
        self.sync().await
    }

    pub fn visible_pages(&self) -> Vec<Page> {
        match self.state() {
            SessionState::SignedOut | SessionState::SigningIn => vec![Page::Login, Page::Signup],
            SessionState::SignedIn(role) => {
                let mut pages = vec![Page::Dashboard, Page::Courses, Page::MyCourses, Page::Profile];
                if role == Role::Admin {
                    pages.push(Page::Admin);
                }
                pages
            }
        }
    }
}

async fn load_snapshot(gateway: &dyn RemoteGateway, identity: Identity) -> Result<(AppState, Role)> {
    let profile = load_account(gateway, &identity.account_id).await?;
    let all_courses = load_courses(gateway).await?;
    let role = profile.role;
    let catalog = match role {
        Role::Admin => all_courses.clone(),
        Role::Student => all_courses.iter().filter(|course| course.active).cloned().collect(),
    };
    let app = AppState {
        registered: registered_courses(&profile, &all_courses),
        stats: compute_dashboard_stats(&profile, &all_courses),
        identity: Some(identity),
        profile: Some(profile),
        all_courses,
        catalog,
    };
    Ok((app, role))
}

/// The account's profile document. A missing profile means the session no
/// longer refers to a real account.
pub(crate) async fn load_account(gateway: &dyn RemoteGateway, account_id: &str) -> Result<Account> {
    match gateway.get_document(Collection::Users, account_id).await {
        Ok(doc) => decode(&doc),
        Err(Error::NotFound { .. }) => Err(AuthError::NotAuthenticated.into()),
        Err(e) => Err(e),
    }
}

/// Every course that decodes. A malformed document is logged and skipped so
/// one bad record cannot lock the client out.
pub(crate) async fn load_courses(gateway: &dyn RemoteGateway) -> Result<Vec<Course>> {
    let docs = gateway.list_documents(Collection::Courses).await?;
    Ok(docs
        .iter()
        .filter_map(|doc| match decode::<Course>(doc) {
            Ok(course) => Some(course),
            Err(e) => {
                tracing::warn!(course_id = %doc.id, error = %e, "skipping course document");
                None
            }
        })
        .collect())
}

fn decode<T: serde::de::DeserializeOwned>(doc: &Document) -> Result<T> {
    doc.decode()
        .map_err(|e| Error::Remote(format!("malformed document {}: {e}", doc.id)))
}
