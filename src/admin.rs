//! Admin course management: create, deactivate, list.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::Deserialize;

use crate::access;
use crate::error::{Error, Result, ValidationError};
use crate::models::{Collection, Course, CourseId, NewCourse};
use crate::session::{load_courses, SessionGate};
use crate::storage::{to_fields, FieldUpdate, FieldUpdates};

/// Raw course form input, as typed by the admin.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CourseForm {
    pub code: String,
    pub name: String,
    pub department: String,
    pub level: String,
    pub credits: String,
    pub capacity: String,
    pub instructor: String,
    pub description: String,
}

fn required(value: &str, field: &str) -> Result<String, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::missing(field));
    }
    Ok(value.to_owned())
}

fn whole_number(value: &str, field: &str) -> Result<u32, ValidationError> {
    let value = required(value, field)?;
    value.parse().map_err(|_| ValidationError::InvalidNumber {
        field: field.to_owned(),
        value,
    })
}

pub fn validate(form: &CourseForm) -> Result<NewCourse, ValidationError> {
    Ok(NewCourse {
        code: required(&form.code, "code")?,
        name: required(&form.name, "name")?,
        department: required(&form.department, "department")?,
        level: whole_number(&form.level, "level")?,
        credits: whole_number(&form.credits, "credits")?,
        capacity: whole_number(&form.capacity, "capacity")?,
        instructor: form.instructor.trim().to_owned(),
        description: form.description.trim().to_owned(),
    })
}

/// Validate the form, then write a new active course with an empty roster.
/// Nothing is sent to the service when validation fails.
pub async fn create_course(gate: &mut SessionGate, form: &CourseForm) -> Result<CourseId> {
    let course = validate(form)?;
    access::require_admin(gate.app().identity.as_ref())?;

    let record = Course {
        id: String::new(),
        code: course.code,
        name: course.name,
        department: course.department,
        level: course.level,
        credits: course.credits,
        capacity: course.capacity,
        instructor: course.instructor,
        description: course.description,
        registered_student_ids: BTreeSet::new(),
        active: true,
        created_at: Some(Utc::now()),
    };
    let fields = to_fields(&record).map_err(|e| Error::Remote(e.to_string()))?;
    let id = gate.gateway().add_document(Collection::Courses, fields).await?;
    tracing::info!(course_id = %id, code = %record.code, "course created");

    if let Err(e) = gate.refresh().await {
        tracing::warn!(error = %e, "catalog reload after course creation failed");
    }
    Ok(id)
}

/// Hide a course from students. Existing registrations are left alone.
pub async fn deactivate_course(gate: &mut SessionGate, course_id: &str) -> Result<()> {
    access::require_admin(gate.app().identity.as_ref())?;
    let updates = FieldUpdates::from([("active".to_owned(), FieldUpdate::Set(false.into()))]);
    gate.gateway()
        .update_document(Collection::Courses, course_id, updates)
        .await?;
    tracing::info!(course_id, "course deactivated");

    if let Err(e) = gate.refresh().await {
        tracing::warn!(error = %e, "catalog reload after deactivation failed");
    }
    Ok(())
}

/// Every course, inactive ones included, fresh from the service.
pub async fn list_courses(gate: &SessionGate) -> Result<Vec<Course>> {
    access::require_admin(gate.app().identity.as_ref())?;
    load_courses(gate.gateway().as_ref()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::enrollment;
    use crate::error::AuthError;
    use crate::gateway::tests::local_gateway;
    use crate::gateway::RemoteGateway;
    use crate::session::SessionState;

    fn form() -> CourseForm {
        CourseForm {
            code: " BIO101 ".into(),
            name: "Intro Biology".into(),
            department: "Biology".into(),
            level: "100".into(),
            credits: "3".into(),
            capacity: "30".into(),
            instructor: "Dr. Darwin".into(),
            description: String::new(),
        }
    }

    async fn gate_as(email: &str, password: &str) -> (SessionGate, Arc<dyn RemoteGateway>) {
        let gateway: Arc<dyn RemoteGateway> = Arc::new(local_gateway());
        let mut gate = SessionGate::new(gateway.clone());
        gate.sign_in(email, password).await.unwrap();
        (gate, gateway)
    }

    #[test]
    fn validation_trims_and_parses() {
        let course = validate(&form()).unwrap();
        assert_eq!(course.code, "BIO101");
        assert_eq!(course.capacity, 30);
        assert_eq!(course.description, "");
    }

    #[test]
    fn validation_reports_the_first_bad_field() {
        let mut bad = form();
        bad.credits = "three".into();
        assert_eq!(
            validate(&bad),
            Err(ValidationError::InvalidNumber {
                field: "credits".into(),
                value: "three".into()
            })
        );
        bad.capacity = "-1".into();
        bad.credits = "3".into();
        assert!(matches!(validate(&bad), Err(ValidationError::InvalidNumber { .. })));
        bad.capacity = "  ".into();
        assert_eq!(validate(&bad), Err(ValidationError::missing("capacity")));
    }

    #[tokio::test]
    async fn missing_name_is_rejected_without_a_write() {
        let (mut gate, gateway) = gate_as("admin@uni.edu", "admin123").await;
        let mut bad = form();
        bad.name = "   ".into();
        assert_eq!(
            create_course(&mut gate, &bad).await.unwrap_err(),
            Error::Validation(ValidationError::missing("name"))
        );
        assert!(gateway.list_documents(Collection::Courses).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn students_cannot_manage_courses() {
        let (mut gate, gateway) = gate_as("ada@uni.edu", "secret1").await;
        assert_eq!(create_course(&mut gate, &form()).await.unwrap_err(), Error::Forbidden);
        assert_eq!(deactivate_course(&mut gate, "c1").await.unwrap_err(), Error::Forbidden);
        assert!(gateway.list_documents(Collection::Courses).await.unwrap().is_empty());

        gate.sign_out().await.unwrap();
        assert_eq!(
            list_courses(&gate).await.unwrap_err(),
            Error::Auth(AuthError::NotAuthenticated)
        );
    }

    #[tokio::test]
    async fn deactivation_hides_the_course_but_keeps_registrations() {
        let (mut admin, gateway) = gate_as("admin@uni.edu", "admin123").await;
        let id = create_course(&mut admin, &form()).await.unwrap();
        assert_eq!(admin.app().catalog.len(), 1);
        let created = &list_courses(&admin).await.unwrap()[0];
        assert!(created.active);
        assert!(created.registered_student_ids.is_empty());
        assert!(created.created_at.is_some());

        // Same in-process service, now seen by a student.
        admin.sign_out().await.unwrap();
        let mut student = SessionGate::new(gateway.clone());
        student.sign_in("ada@uni.edu", "secret1").await.unwrap();
        enrollment::register(&mut student, &id).await.unwrap();
        student.sign_out().await.unwrap();

        admin.sign_in("admin@uni.edu", "admin123").await.unwrap();
        deactivate_course(&mut admin, &id).await.unwrap();
        let course = &list_courses(&admin).await.unwrap()[0];
        assert!(!course.active);
        assert_eq!(course.enrolled(), 1);

        admin.sign_out().await.unwrap();
        student.sign_in("ada@uni.edu", "secret1").await.unwrap();
        assert_eq!(student.state(), SessionState::SignedIn(crate::models::Role::Student));
        assert!(student.app().catalog.is_empty());
        assert!(student.app().is_registered(&id));
        enrollment::drop(&mut student, &id).await.unwrap();
    }

    #[tokio::test]
    async fn deactivating_a_missing_course_is_not_found() {
        let (mut gate, _) = gate_as("admin@uni.edu", "admin123").await;
        assert!(matches!(
            deactivate_course(&mut gate, "nope").await.unwrap_err(),
            Error::NotFound { .. }
        ));
    }
}
