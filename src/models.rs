use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type AccountId = String;
pub type CourseId = String;

/// Document collections known to the registry.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Users,
    Courses,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Courses => "courses",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "users" => Some(Self::Users),
            "courses" => Some(Self::Courses),
            _ => None,
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Admin,
}

/// Profile document stored under `users/{id}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: AccountId,
    #[serde(default)]
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub student_id: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub registered_course_ids: BTreeSet<CourseId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Name shown on the dashboard greeting.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.email
        } else {
            &self.name
        }
    }
}

/// Course document stored under `courses/{id}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: CourseId,
    pub code: String,
    pub name: String,
    pub department: String,
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub credits: u32,
    #[serde(default)]
    pub capacity: u32,
    #[serde(default)]
    pub instructor: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub registered_student_ids: BTreeSet<AccountId>,
    #[serde(default = "active_by_default")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

fn active_by_default() -> bool {
    true
}

impl Course {
    pub fn enrolled(&self) -> usize {
        self.registered_student_ids.len()
    }

    pub fn is_full(&self) -> bool {
        self.enrolled() >= self.capacity as usize
    }
}

/// Validated course fields, ready to be written as a new course document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewCourse {
    pub code: String,
    pub name: String,
    pub department: String,
    pub level: u32,
    pub credits: u32,
    pub capacity: u32,
    pub instructor: String,
    pub description: String,
}

/// Profile fields supplied at sign-up.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileFields {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub student_id: String,
    #[serde(default)]
    pub department: String,
}

/// Who is signed in.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub account_id: AccountId,
    pub email: String,
    pub role: Role,
}

/// A signed-in identity plus the bearer token that proves it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub identity: Identity,
}

/// Stored credential record, keyed by normalised email.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Credential {
    pub account_id: AccountId,
    pub email: String,
    pub password_hash: String,
}

/// JWT claims.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthPayload {
    pub sub: AccountId,
    pub email: String,
    pub role: Role,
    pub exp: usize,
    /// Unique per token, so revoking one session never revokes a later one.
    #[serde(default)]
    pub jti: String,
}

impl From<AuthPayload> for Identity {
    fn from(claims: AuthPayload) -> Self {
        Self {
            account_id: claims.sub,
            email: claims.email,
            role: claims.role,
        }
    }
}
