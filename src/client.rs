//! HTTP implementation of `RemoteGateway` against the registry REST API.

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::watch;

use crate::error::{AuthError, EnrollmentError, Error, Result};
use crate::gateway::{RemoteGateway, SessionSlot};
use crate::models::{AccountId, Collection, Identity, ProfileFields, Session};
use crate::report::ReportTable;
use crate::rest::RestResponse;
use crate::storage::{Document, FieldUpdates, Fields};

pub struct HttpGateway {
    client: Client,
    base_url: String,
    session: SessionSlot,
    token_file: Option<PathBuf>,
}

impl HttpGateway {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            session: SessionSlot::new(None),
            token_file: None,
        }
    }

    /// Persist the session in `path` between runs, restoring any session
    /// already saved there.
    pub fn with_token_file(base_url: &str, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let saved = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<Session>(&raw).ok());
        if saved.is_some() {
            tracing::debug!(path = %path.display(), "restored saved session");
        }
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            session: SessionSlot::new(saved),
            token_file: Some(path),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn doc_url(&self, collection: Collection, id: Option<&str>) -> String {
        match id {
            Some(id) => self.url(&format!("/collections/{}/docs/{}", collection, id)),
            None => self.url(&format!("/collections/{}/docs", collection)),
        }
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        match self.session.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn save(&self, session: Option<&Session>) {
        let Some(path) = &self.token_file else {
            return;
        };
        let outcome = match session {
            Some(session) => serde_json::to_string(session)
                .map_err(std::io::Error::other)
                .and_then(|raw| std::fs::write(path, raw)),
            None => match std::fs::remove_file(path) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        if let Err(e) = outcome {
            tracing::warn!(path = %path.display(), error = %e, "could not update token file");
        }
    }
}

/// Decode a success body, or the service's `Error` from a failure body.
async fn read<T: DeserializeOwned>(response: Response) -> Result<T> {
    if response.status().is_success() {
        return Ok(response.json().await?);
    }
    Err(failure(response).await)
}

async fn acknowledge(response: Response) -> Result<()> {
    read::<RestResponse>(response).await.map(|_| ())
}

async fn failure(response: Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<Error>(&body) {
        Ok(err) => err,
        Err(_) if status == reqwest::StatusCode::UNAUTHORIZED => AuthError::InvalidToken.into(),
        Err(_) => Error::Remote(format!("{status}: {body}")),
    }
}

fn first_result(ack: RestResponse) -> Result<String> {
    ack.results
        .into_iter()
        .next()
        .ok_or_else(|| Error::Remote("response carried no id".to_owned()))
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn create_account(&self, email: &str, password: &str, profile: &ProfileFields) -> Result<AccountId> {
        let response = self
            .client
            .post(self.url("/signup"))
            .json(&json!({ "email": email, "password": password, "profile": profile }))
            .send()
            .await?;
        first_result(read(response).await?)
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<Session> {
        let response = self
            .client
            .post(self.url("/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let session: Session = read(response).await?;
        self.save(Some(&session));
        self.session.begin(&session);
        Ok(session)
    }

    async fn end_session(&self) -> Result<()> {
        if let Some(token) = self.session.token() {
            let outcome = self.client.post(self.url("/logout")).bearer_auth(token).send().await;
            if let Err(e) = outcome {
                tracing::warn!(error = %e, "logout request failed; clearing the local session anyway");
            }
        }
        self.save(None);
        self.session.end();
        Ok(())
    }

    fn current_identity(&self) -> Option<Identity> {
        self.session.identity()
    }

    fn on_session_change(&self) -> watch::Receiver<Option<Identity>> {
        self.session.subscribe()
    }

    async fn get_document(&self, collection: Collection, id: &str) -> Result<Document> {
        let response = self.authed(self.client.get(self.doc_url(collection, Some(id)))).send().await?;
        read(response).await
    }

    async fn set_document(&self, collection: Collection, id: &str, fields: Fields) -> Result<()> {
        let response = self
            .authed(self.client.put(self.doc_url(collection, Some(id))))
            .json(&fields)
            .send()
            .await?;
        acknowledge(response).await
    }

    async fn update_document(&self, collection: Collection, id: &str, updates: FieldUpdates) -> Result<()> {
        let response = self
            .authed(self.client.patch(self.doc_url(collection, Some(id))))
            .json(&updates)
            .send()
            .await?;
        acknowledge(response).await
    }

    async fn add_document(&self, collection: Collection, fields: Fields) -> Result<String> {
        let response = self
            .authed(self.client.post(self.doc_url(collection, None)))
            .json(&fields)
            .send()
            .await?;
        first_result(read(response).await?)
    }

    async fn list_documents(&self, collection: Collection) -> Result<Vec<Document>> {
        let response = self.authed(self.client.get(self.doc_url(collection, None))).send().await?;
        read(response).await
    }

    async fn enroll(&self, course_id: &str) -> Result<()> {
        if self.session.token().is_none() {
            return Err(EnrollmentError::NotAuthenticated.into());
        }
        let url = self.url(&format!("/courses/{}/enrollment", course_id));
        let response = self.authed(self.client.post(url)).send().await?;
        acknowledge(response).await
    }

    async fn withdraw(&self, course_id: &str) -> Result<()> {
        if self.session.token().is_none() {
            return Err(EnrollmentError::NotAuthenticated.into());
        }
        let url = self.url(&format!("/courses/{}/enrollment", course_id));
        let response = self.authed(self.client.delete(url)).send().await?;
        acknowledge(response).await
    }

    async fn change_password(&self, current: &str, new: &str) -> Result<()> {
        let response = self
            .authed(self.client.post(self.url("/password")))
            .json(&json!({ "current": current, "new": new }))
            .send()
            .await?;
        acknowledge(response).await
    }

    async fn run_report(&self, sql: &str) -> Result<ReportTable> {
        let response = self
            .authed(self.client.post(self.url("/reports/sql")))
            .json(&json!({ "sql": sql }))
            .send()
            .await?;
        read(response).await
    }
}
