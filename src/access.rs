//! Who may touch which documents.
//!
//! Reads need a signed-in identity. Course documents are written only by
//! admins. A student may update their own profile but never its role,
//! email or enrollment list. Roster fields on either side change only
//! through enroll/withdraw, for admins too.

use crate::error::{AuthError, Error};
use crate::models::{Collection, Identity, Role};
use serde_json::Value;

use crate::storage::{FieldUpdates, Fields, REGISTERED_COURSES, REGISTERED_STUDENTS};

const PROTECTED_PROFILE_FIELDS: [&str; 3] = ["role", "email", REGISTERED_COURSES];

pub fn require_identity(identity: Option<&Identity>) -> Result<&Identity, Error> {
    identity.ok_or(Error::Auth(AuthError::NotAuthenticated))
}

pub fn require_admin(identity: Option<&Identity>) -> Result<&Identity, Error> {
    let identity = require_identity(identity)?;
    if identity.role != Role::Admin {
        tracing::warn!(account_id = %identity.account_id, "admin-only action refused");
        return Err(Error::Forbidden);
    }
    Ok(identity)
}

/// Full overwrite or creation of a document. A roster may only be written
/// empty; the store keeps whatever the enrollment path recorded.
pub fn can_set(identity: Option<&Identity>, collection: Collection, fields: &Fields) -> Result<(), Error> {
    let identity = require_identity(identity)?;
    if let Some(field) = carried_roster(fields) {
        tracing::warn!(account_id = %identity.account_id, %collection, field, "roster write refused");
        return Err(Error::Forbidden);
    }
    match (collection, identity.role) {
        (_, Role::Admin) => Ok(()),
        (Collection::Courses, Role::Student) | (Collection::Users, Role::Student) => {
            tracing::warn!(account_id = %identity.account_id, %collection, fields = fields.len(), "write refused");
            Err(Error::Forbidden)
        }
    }
}

/// Field-level update of an existing document.
pub fn can_update(
    identity: Option<&Identity>,
    collection: Collection,
    id: &str,
    updates: &FieldUpdates,
) -> Result<(), Error> {
    let identity = require_identity(identity)?;
    if identity.role == Role::Admin {
        return Ok(());
    }
    let allowed = match collection {
        Collection::Courses => false,
        Collection::Users => {
            identity.account_id == id
                && !updates
                    .keys()
                    .any(|field| PROTECTED_PROFILE_FIELDS.contains(&field.as_str()))
        }
    };
    if allowed {
        Ok(())
    } else {
        tracing::warn!(account_id = %identity.account_id, %collection, id, "update refused");
        Err(Error::Forbidden)
    }
}

fn carried_roster(fields: &Fields) -> Option<&'static str> {
    [REGISTERED_COURSES, REGISTERED_STUDENTS].into_iter().find(|field| match fields.get(*field) {
        None | Some(Value::Null) => false,
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    })
}

/// Rosters are maintained by the enrollment transaction only, even for admins.
pub fn touches_relation(updates: &FieldUpdates) -> bool {
    updates.contains_key(REGISTERED_COURSES) || updates.contains_key(REGISTERED_STUDENTS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FieldUpdate;
    use serde_json::json;

    fn who(role: Role) -> Identity {
        Identity {
            account_id: "a1".to_string(),
            email: "a1@uni.edu".to_string(),
            role,
        }
    }

    fn update(field: &str) -> FieldUpdates {
        FieldUpdates::from([(field.to_string(), FieldUpdate::Set(json!("x")))])
    }

    #[test]
    fn anonymous_callers_are_not_authenticated() {
        assert_eq!(
            can_update(None, Collection::Users, "a1", &update("department")),
            Err(Error::Auth(AuthError::NotAuthenticated))
        );
    }

    #[test]
    fn students_edit_only_their_own_unprotected_fields() {
        let student = who(Role::Student);
        assert!(can_update(Some(&student), Collection::Users, "a1", &update("department")).is_ok());
        assert_eq!(
            can_update(Some(&student), Collection::Users, "a2", &update("department")),
            Err(Error::Forbidden)
        );
        assert_eq!(
            can_update(Some(&student), Collection::Users, "a1", &update("role")),
            Err(Error::Forbidden)
        );
        assert_eq!(
            can_update(Some(&student), Collection::Courses, "c1", &update("active")),
            Err(Error::Forbidden)
        );
        assert_eq!(can_set(Some(&student), Collection::Courses, &Fields::new()), Err(Error::Forbidden));
    }

    #[test]
    fn admins_write_courses() {
        let admin = who(Role::Admin);
        assert!(can_set(Some(&admin), Collection::Courses, &Fields::new()).is_ok());
        assert!(can_update(Some(&admin), Collection::Courses, "c1", &update("active")).is_ok());
        assert!(require_admin(Some(&who(Role::Student))).is_err());
    }

    #[test]
    fn admins_cannot_write_a_roster_directly() {
        let admin = who(Role::Admin);
        let with_roster = |field: &str, value| -> Fields {
            [("code".to_string(), json!("BIO101")), (field.to_string(), value)].into_iter().collect()
        };
        assert_eq!(
            can_set(Some(&admin), Collection::Courses, &with_roster(REGISTERED_STUDENTS, json!(["x1", "x2", "x3"]))),
            Err(Error::Forbidden)
        );
        assert_eq!(
            can_set(Some(&admin), Collection::Users, &with_roster(REGISTERED_COURSES, json!(["c1"]))),
            Err(Error::Forbidden)
        );
        assert_eq!(
            can_set(Some(&admin), Collection::Courses, &with_roster(REGISTERED_STUDENTS, json!("x1"))),
            Err(Error::Forbidden)
        );
        assert!(can_set(Some(&admin), Collection::Courses, &with_roster(REGISTERED_STUDENTS, json!([]))).is_ok());
    }

    #[test]
    fn roster_fields_are_recognised() {
        assert!(touches_relation(&update(REGISTERED_STUDENTS)));
        assert!(!touches_relation(&update("active")));
    }
}
