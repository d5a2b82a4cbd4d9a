//! Sign-up, profile edits and password changes.

use chrono::Utc;
use serde_json::Value;

use crate::access;
use crate::config::ProfileVariant;
use crate::error::{Result, ValidationError};
use crate::gateway::RemoteGateway;
use crate::models::{AccountId, Collection, ProfileFields, Role};
use crate::session::SessionGate;
use crate::storage::{FieldUpdate, FieldUpdates};

#[derive(Debug, Clone, Default)]
pub struct SignupForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm: String,
    pub role: Role,
    pub student_id: String,
    pub department: String,
}

/// Editable part of the profile page.
#[derive(Debug, Clone, Default)]
pub struct ProfileForm {
    pub student_id: String,
    pub department: String,
}

fn required(value: &str, field: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::missing(field));
    }
    Ok(())
}

/// Check the form for the configured variant and return the profile to store.
/// Password strength and email format are the identity service's call.
pub fn validate_signup(form: &SignupForm, variant: ProfileVariant) -> Result<ProfileFields, ValidationError> {
    match variant {
        ProfileVariant::Minimal => {
            required(&form.email, "email")?;
            required(&form.password, "password")?;
            Ok(ProfileFields::default())
        }
        ProfileVariant::Rich => {
            required(&form.name, "name")?;
            required(&form.email, "email")?;
            required(&form.password, "password")?;
            required(&form.confirm, "confirm")?;
            if form.password != form.confirm {
                return Err(ValidationError::PasswordMismatch);
            }
            Ok(ProfileFields {
                name: form.name.trim().to_owned(),
                role: form.role,
                student_id: form.student_id.trim().to_owned(),
                department: form.department.trim().to_owned(),
            })
        }
    }
}

pub async fn sign_up(gateway: &dyn RemoteGateway, form: &SignupForm, variant: ProfileVariant) -> Result<AccountId> {
    let profile = validate_signup(form, variant)?;
    let id = gateway.create_account(form.email.trim(), &form.password, &profile).await?;
    tracing::info!(account_id = %id, ?variant, "account created");
    Ok(id)
}

/// Store student id and department on the signed-in account, stamping `updatedAt`.
pub async fn save_profile(gate: &mut SessionGate, form: &ProfileForm) -> Result<()> {
    let account_id = access::require_identity(gate.app().identity.as_ref())?
        .account_id
        .clone();
    let updates = FieldUpdates::from([
        ("studentId".to_owned(), FieldUpdate::Set(Value::from(form.student_id.trim()))),
        ("department".to_owned(), FieldUpdate::Set(Value::from(form.department.trim()))),
        ("updatedAt".to_owned(), FieldUpdate::Set(Value::from(Utc::now().to_rfc3339()))),
    ]);
    gate.gateway()
        .update_document(Collection::Users, &account_id, updates)
        .await?;
    tracing::info!(%account_id, "profile updated");
    gate.refresh().await
}

pub async fn change_password(gateway: &dyn RemoteGateway, current: &str, new: &str, confirm: &str) -> Result<()> {
    required(current, "current password")?;
    required(new, "new password")?;
    required(confirm, "confirm password")?;
    if new != confirm {
        return Err(ValidationError::PasswordMismatch.into());
    }
    gateway.change_password(current, new).await
}
