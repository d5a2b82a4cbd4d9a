//! The remote service as seen by the client core.
//!
//! `RemoteGateway` is the seam between the client logic (session gate,
//! enrollment, admin, profile) and the service that owns identities and
//! documents. `LocalGateway` runs the service in-process over `Storage` and
//! `IdentityService`; `crate::client::HttpGateway` speaks to the REST API.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::access;
use crate::auth::IdentityService;
use crate::error::{EnrollmentError, Error, Result};
use crate::models::{AccountId, Collection, Course, Identity, ProfileFields, Session};
use crate::report::{ReportEngine, ReportTable};
use crate::storage::{Document, FieldUpdates, Fields, Storage};

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn create_account(&self, email: &str, password: &str, profile: &ProfileFields) -> Result<AccountId>;

    /// Sign in. On success every `on_session_change` subscriber sees the
    /// new identity.
    async fn authenticate(&self, email: &str, password: &str) -> Result<Session>;

    /// Sign out; subscribers see `None`.
    async fn end_session(&self) -> Result<()>;

    fn current_identity(&self) -> Option<Identity>;

    fn on_session_change(&self) -> watch::Receiver<Option<Identity>>;

    async fn get_document(&self, collection: Collection, id: &str) -> Result<Document>;

    async fn set_document(&self, collection: Collection, id: &str, fields: Fields) -> Result<()>;

    async fn update_document(&self, collection: Collection, id: &str, updates: FieldUpdates) -> Result<()>;

    async fn add_document(&self, collection: Collection, fields: Fields) -> Result<String>;

    async fn list_documents(&self, collection: Collection) -> Result<Vec<Document>>;

    /// Register the signed-in account for a course, atomically on both sides.
    async fn enroll(&self, course_id: &str) -> Result<()>;

    /// Drop a course for the signed-in account, atomically on both sides.
    async fn withdraw(&self, course_id: &str) -> Result<()>;

    async fn change_password(&self, current: &str, new: &str) -> Result<()>;

    /// Run admin SQL over a snapshot of the catalog.
    async fn run_report(&self, sql: &str) -> Result<ReportTable>;
}

/// Session bookkeeping shared by both gateway implementations.
pub(crate) struct SessionSlot {
    changes: watch::Sender<Option<Identity>>,
    token: Mutex<Option<String>>,
}

impl SessionSlot {
    pub(crate) fn new(initial: Option<Session>) -> Self {
        let identity = initial.as_ref().map(|s| s.identity.clone());
        let (changes, _) = watch::channel(identity);
        Self {
            changes,
            token: Mutex::new(initial.map(|s| s.token)),
        }
    }

    pub(crate) fn token(&self) -> Option<String> {
        self.token.lock().ok().and_then(|token| token.clone())
    }

    pub(crate) fn identity(&self) -> Option<Identity> {
        self.changes.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.changes.subscribe()
    }

    pub(crate) fn begin(&self, session: &Session) {
        if let Ok(mut token) = self.token.lock() {
            *token = Some(session.token.clone());
        }
        self.changes.send_replace(Some(session.identity.clone()));
    }

    pub(crate) fn end(&self) -> Option<String> {
        let token = self.token.lock().ok().and_then(|mut token| token.take());
        self.changes.send_replace(None);
        token
    }
}

/// In-process gateway: the service logic runs in the caller's process.
pub struct LocalGateway {
    storage: Storage,
    identity: Arc<IdentityService>,
    session: SessionSlot,
}

impl LocalGateway {
    pub fn new(storage: Storage, identity: Arc<IdentityService>) -> Self {
        Self {
            storage,
            identity,
            session: SessionSlot::new(None),
        }
    }

    fn who(&self) -> Option<Identity> {
        self.session.identity()
    }
}

#[async_trait]
impl RemoteGateway for LocalGateway {
    async fn create_account(&self, email: &str, password: &str, profile: &ProfileFields) -> Result<AccountId> {
        self.identity.sign_up(email, password, profile)
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<Session> {
        let session = self.identity.authenticate(email, password)?;
        self.session.begin(&session);
        Ok(session)
    }

    async fn end_session(&self) -> Result<()> {
        if let Some(token) = self.session.end() {
            self.identity.end_session(&token);
        }
        Ok(())
    }

    fn current_identity(&self) -> Option<Identity> {
        self.who()
    }

    fn on_session_change(&self) -> watch::Receiver<Option<Identity>> {
        self.session.subscribe()
    }

    async fn get_document(&self, collection: Collection, id: &str) -> Result<Document> {
        access::require_identity(self.who().as_ref())?;
        Ok(self.storage.get_doc(collection, id)?)
    }

    async fn set_document(&self, collection: Collection, id: &str, fields: Fields) -> Result<()> {
        access::can_set(self.who().as_ref(), collection, &fields)?;
        Ok(self.storage.replace_doc(collection, id, &fields)?)
    }

    async fn update_document(&self, collection: Collection, id: &str, updates: FieldUpdates) -> Result<()> {
        access::can_update(self.who().as_ref(), collection, id, &updates)?;
        if access::touches_relation(&updates) {
            return Err(Error::Forbidden);
        }
        self.storage.update_doc(collection, id, &updates)?;
        Ok(())
    }

    async fn add_document(&self, collection: Collection, fields: Fields) -> Result<String> {
        access::can_set(self.who().as_ref(), collection, &fields)?;
        Ok(self.storage.add_doc(collection, &fields)?)
    }

    async fn list_documents(&self, collection: Collection) -> Result<Vec<Document>> {
        access::require_identity(self.who().as_ref())?;
        Ok(self.storage.list_docs(collection)?)
    }

    async fn enroll(&self, course_id: &str) -> Result<()> {
        let who = self.who().ok_or(EnrollmentError::NotAuthenticated)?;
        Ok(self.storage.enroll(&who.account_id, course_id)?)
    }

    async fn withdraw(&self, course_id: &str) -> Result<()> {
        let who = self.who().ok_or(EnrollmentError::NotAuthenticated)?;
        Ok(self.storage.withdraw(&who.account_id, course_id)?)
    }

    async fn change_password(&self, current: &str, new: &str) -> Result<()> {
        let who = access::require_identity(self.who().as_ref())?.clone();
        self.identity.change_password(&who, current, new)
    }

    async fn run_report(&self, sql: &str) -> Result<ReportTable> {
        access::require_admin(self.who().as_ref())?;
        let courses: Vec<Course> = self.storage.list_records(Collection::Courses)?;
        let engine = ReportEngine::new(&courses)?;
        Ok(engine.table(sql).await?)
    }
}
