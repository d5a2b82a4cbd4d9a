//! Identity service: accounts, password checks and bearer tokens.
//!
//! Passwords are bcrypt hashes in the `credentials` tree; sessions are
//! stateless HS256 JWTs carrying the account id, email and role. Signing out
//! revokes the presented token until it would have expired anyway.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use bcrypt::{hash, verify};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::Value;

use crate::config::AuthSettings;
use crate::error::{AuthError, Error, StoreError};
use crate::models::{Account, AccountId, AuthPayload, Credential, Identity, ProfileFields, Role, Session};
use crate::storage::{to_fields, Storage, REGISTERED_COURSES};

/// Shortest password the identity service accepts.
pub const MIN_PASSWORD_LEN: usize = 6;

pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    hash(password, cost)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password, hash)
}

pub fn create_jwt(identity: &Identity, secret: &[u8], ttl_secs: u64) -> Result<String, jsonwebtoken::errors::Error> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    let claims = AuthPayload {
        sub: identity.account_id.clone(),
        email: identity.email.clone(),
        role: identity.role,
        exp: (now + ttl_secs) as usize,
        jti: uuid::Uuid::new_v4().simple().to_string(),
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

pub fn validate_jwt(token: &str, secret: &[u8]) -> Result<AuthPayload, jsonwebtoken::errors::Error> {
    let token_data = decode::<AuthPayload>(
        token,
        &DecodingKey::from_secret(secret),
        &Validation::new(Algorithm::HS256),
    )?;
    Ok(token_data.claims)
}

/// Loose shape check: something before and after a single `@`, and a dot in
/// the domain.
pub fn is_valid_email(email: &str) -> bool {
    match email.trim().split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.split('.').count() >= 2
                && domain.split('.').all(|part| !part.is_empty())
        }
        None => false,
    }
}

fn check_password_strength(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword {
            minimum: MIN_PASSWORD_LEN,
        });
    }
    Ok(())
}

fn hashing_failed(err: bcrypt::BcryptError) -> Error {
    tracing::error!(error = %err, "password hashing failed");
    Error::Remote("password hashing failed".to_owned())
}

pub struct IdentityService {
    storage: Storage,
    settings: AuthSettings,
    revoked: Mutex<HashSet<String>>,
}

impl IdentityService {
    pub fn new(storage: Storage, settings: AuthSettings) -> Self {
        Self {
            storage,
            settings,
            revoked: Mutex::new(HashSet::new()),
        }
    }

    /// Self-service sign-up. Choosing the admin role needs
    /// `allow_admin_signup`; otherwise admins come from `create_account`.
    pub fn sign_up(&self, email: &str, password: &str, profile: &ProfileFields) -> Result<AccountId, Error> {
        if profile.role == Role::Admin && !self.settings.allow_admin_signup {
            tracing::warn!(email = %email.trim(), "admin sign-up refused");
            return Err(Error::Forbidden);
        }
        self.create_account(email, password, profile)
    }

    /// Create credentials plus the `users/{id}` profile document. No role
    /// check: this is the seeding path.
    pub fn create_account(&self, email: &str, password: &str, profile: &ProfileFields) -> Result<AccountId, Error> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(AuthError::InvalidEmail.into());
        }
        check_password_strength(password)?;

        let account_id = uuid::Uuid::new_v4().simple().to_string();
        let credential = Credential {
            account_id: account_id.clone(),
            email: email.to_owned(),
            password_hash: hash_password(password, self.settings.bcrypt_cost).map_err(hashing_failed)?,
        };
        let account = Account {
            id: account_id.clone(),
            name: profile.name.trim().to_owned(),
            email: email.to_owned(),
            role: profile.role,
            student_id: profile.student_id.trim().to_owned(),
            department: profile.department.trim().to_owned(),
            registered_course_ids: Default::default(),
            created_at: Some(Utc::now()),
            updated_at: None,
        };
        let mut fields = to_fields(&account).map_err(StoreError::from)?;
        fields.insert(REGISTERED_COURSES.to_owned(), Value::Array(Vec::new()));

        match self.storage.create_account(&credential, &fields) {
            Ok(()) => {
                tracing::info!(%account_id, role = ?profile.role, "account created");
                Ok(account_id)
            }
            Err(StoreError::Exists { .. }) => Err(AuthError::DuplicateAccount.into()),
            Err(other) => Err(other.into()),
        }
    }

    /// Check a password and mint a session token.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<Session, Error> {
        let credential = self
            .storage
            .get_credential(email)?
            .ok_or(AuthError::InvalidCredentials)?;
        if !verify_password(password, &credential.password_hash).unwrap_or(false) {
            tracing::info!(email = %credential.email, "rejected sign-in");
            return Err(AuthError::InvalidCredentials.into());
        }

        let account: Account = self
            .storage
            .get_doc(crate::models::Collection::Users, &credential.account_id)?
            .decode()
            .map_err(StoreError::from)?;
        let identity = Identity {
            account_id: account.id,
            email: credential.email,
            role: account.role,
        };
        let token = create_jwt(&identity, self.settings.jwt_secret.as_bytes(), self.settings.token_ttl_secs)
            .map_err(|e| Error::Remote(e.to_string()))?;
        tracing::info!(account_id = %identity.account_id, "signed in");
        Ok(Session { token, identity })
    }

    /// Resolve a bearer token to the identity it was issued for.
    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        if self.is_revoked(token) {
            return Err(AuthError::InvalidToken);
        }
        validate_jwt(token, self.settings.jwt_secret.as_bytes())
            .map(Identity::from)
            .map_err(|_| AuthError::InvalidToken)
    }

    pub fn end_session(&self, token: &str) {
        if let Ok(mut revoked) = self.revoked.lock() {
            revoked.insert(token.to_owned());
        }
    }

    fn is_revoked(&self, token: &str) -> bool {
        self.revoked
            .lock()
            .map(|revoked| revoked.contains(token))
            .unwrap_or(false)
    }

    /// Re-check the current password, then store a hash of the new one.
    pub fn change_password(&self, identity: &Identity, current: &str, new: &str) -> Result<(), Error> {
        let mut credential = self
            .storage
            .get_credential(&identity.email)?
            .ok_or(AuthError::NotAuthenticated)?;
        if !verify_password(current, &credential.password_hash).unwrap_or(false) {
            return Err(AuthError::InvalidCredentials.into());
        }
        check_password_strength(new)?;
        credential.password_hash = hash_password(new, self.settings.bcrypt_cost).map_err(hashing_failed)?;
        self.storage.put_credential(&credential)?;
        tracing::info!(account_id = %identity.account_id, "password changed");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::Collection;

    pub(crate) fn test_settings() -> AuthSettings {
        AuthSettings {
            jwt_secret: "test-secret".to_string(),
            token_ttl_secs: 3600,
            bcrypt_cost: 4,
            allow_admin_signup: false,
        }
    }

    fn service() -> IdentityService {
        IdentityService::new(Storage::temporary().unwrap(), test_settings())
    }

    fn student() -> ProfileFields {
        ProfileFields {
            name: "Ada".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_password_hash_and_jwt_round_trip() {
        let hashed = hash_password("secret1", 4).unwrap();
        assert!(verify_password("secret1", &hashed).unwrap());
        assert!(!verify_password("wrong", &hashed).unwrap());

        let identity = Identity {
            account_id: "a1".to_string(),
            email: "ada@uni.edu".to_string(),
            role: Role::Admin,
        };
        let token = create_jwt(&identity, b"k", 60).unwrap();
        let claims = validate_jwt(&token, b"k").unwrap();
        assert_eq!(Identity::from(claims), identity);
        assert!(validate_jwt(&token, b"other").is_err());
    }

    #[test]
    fn email_shape_check() {
        assert!(is_valid_email("ada@uni.edu"));
        assert!(!is_valid_email("ada.uni.edu"));
        assert!(!is_valid_email("@uni.edu"));
        assert!(!is_valid_email("ada@uni"));
        assert!(!is_valid_email("ada@uni."));
    }

    #[test]
    fn sign_up_creates_profile_and_signs_in() {
        let identity = service();
        let id = identity.create_account("ada@uni.edu", "secret1", &student()).unwrap();

        let profile: Account = identity
            .storage
            .get_doc(Collection::Users, &id)
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(profile.name, "Ada");
        assert_eq!(profile.role, Role::Student);
        assert!(profile.registered_course_ids.is_empty());

        let session = identity.authenticate("ADA@uni.edu", "secret1").unwrap();
        assert_eq!(session.identity.account_id, id);
        assert_eq!(identity.verify(&session.token).unwrap(), session.identity);
    }

    #[test]
    fn sign_up_rejections() {
        let identity = service();
        assert_eq!(
            identity.create_account("nope", "secret1", &student()),
            Err(Error::Auth(AuthError::InvalidEmail))
        );
        assert_eq!(
            identity.create_account("ada@uni.edu", "123", &student()),
            Err(Error::Auth(AuthError::WeakPassword { minimum: 6 }))
        );
        identity.create_account("ada@uni.edu", "secret1", &student()).unwrap();
        assert_eq!(
            identity.create_account("ada@uni.edu", "secret2", &student()),
            Err(Error::Auth(AuthError::DuplicateAccount))
        );
    }

    #[test]
    fn admin_sign_up_needs_the_setting() {
        let admin = ProfileFields {
            role: Role::Admin,
            ..student()
        };
        let identity = service();
        assert_eq!(identity.sign_up("root@uni.edu", "secret1", &admin), Err(Error::Forbidden));
        assert!(identity.storage.get_credential("root@uni.edu").unwrap().is_none());
        assert!(identity.sign_up("ada@uni.edu", "secret1", &student()).is_ok());

        let open = IdentityService::new(
            Storage::temporary().unwrap(),
            AuthSettings {
                allow_admin_signup: true,
                ..test_settings()
            },
        );
        open.sign_up("root@uni.edu", "secret1", &admin).unwrap();
        assert_eq!(open.authenticate("root@uni.edu", "secret1").unwrap().identity.role, Role::Admin);
    }

    #[test]
    fn wrong_password_and_revoked_token() {
        let identity = service();
        identity.create_account("ada@uni.edu", "secret1", &student()).unwrap();
        assert_eq!(
            identity.authenticate("ada@uni.edu", "nope").unwrap_err(),
            Error::Auth(AuthError::InvalidCredentials)
        );
        assert_eq!(
            identity.authenticate("bob@uni.edu", "secret1").unwrap_err(),
            Error::Auth(AuthError::InvalidCredentials)
        );

        let session = identity.authenticate("ada@uni.edu", "secret1").unwrap();
        identity.end_session(&session.token);
        assert_eq!(identity.verify(&session.token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn password_change_requires_current_password() {
        let identity = service();
        identity.create_account("ada@uni.edu", "secret1", &student()).unwrap();
        let session = identity.authenticate("ada@uni.edu", "secret1").unwrap();

        assert_eq!(
            identity.change_password(&session.identity, "wrong", "secret2"),
            Err(Error::Auth(AuthError::InvalidCredentials))
        );
        identity.change_password(&session.identity, "secret1", "secret2").unwrap();
        assert!(identity.authenticate("ada@uni.edu", "secret1").is_err());
        assert!(identity.authenticate("ada@uni.edu", "secret2").is_ok());
    }
}
