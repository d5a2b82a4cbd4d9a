//! Runtime settings read from the environment (a `.env` file is honoured).

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_DATA_PATH: &str = "registry_data";
const DEV_JWT_SECRET: &str = "registry-dev-secret";

/// Which of the two sign-up/profile flavours the client presents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProfileVariant {
    /// Name, password confirmation, role choice, student id and department.
    #[default]
    Rich,
    /// Email and password only; every new account is a student.
    Minimal,
}

impl ProfileVariant {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "rich" => Some(Self::Rich),
            "minimal" => Some(Self::Minimal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub token_ttl_secs: u64,
    pub bcrypt_cost: u32,
    /// Whether anonymous sign-up may pick the admin role. Off by default;
    /// admins are then seeded out of band (see `load_data`).
    pub allow_admin_signup: bool,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub data_path: String,
    pub rest_addr: SocketAddr,
    pub auth: AuthSettings,
    pub notification_ttl: Duration,
    pub profile_variant: ProfileVariant,
    pub log_json: bool,
    pub log_dir: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_path: DEFAULT_DATA_PATH.to_owned(),
            rest_addr: SocketAddr::from(([0, 0, 0, 0], 11111)),
            auth: AuthSettings {
                jwt_secret: DEV_JWT_SECRET.to_owned(),
                token_ttl_secs: 3600,
                bcrypt_cost: bcrypt::DEFAULT_COST,
                allow_admin_signup: false,
            },
            notification_ttl: Duration::from_secs(5),
            profile_variant: ProfileVariant::Rich,
            log_json: false,
            log_dir: None,
        }
    }
}

impl Settings {
    /// Load `.env` (if any) and then read `REGISTRY_*` variables over the
    /// defaults. Unparseable values fall back to the default with a warning.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let jwt_secret = match lookup("REGISTRY_JWT_SECRET") {
            Some(secret) if !secret.is_empty() => secret,
            _ => {
                tracing::warn!("REGISTRY_JWT_SECRET not set, using the development secret");
                defaults.auth.jwt_secret.clone()
            }
        };

        Self {
            data_path: lookup("REGISTRY_DATA_PATH").unwrap_or(defaults.data_path),
            rest_addr: parsed(&lookup, "REGISTRY_REST_ADDR").unwrap_or(defaults.rest_addr),
            auth: AuthSettings {
                jwt_secret,
                token_ttl_secs: parsed(&lookup, "REGISTRY_TOKEN_TTL_SECS").unwrap_or(defaults.auth.token_ttl_secs),
                bcrypt_cost: parsed(&lookup, "REGISTRY_BCRYPT_COST").unwrap_or(defaults.auth.bcrypt_cost),
                allow_admin_signup: parsed(&lookup, "REGISTRY_ALLOW_ADMIN_SIGNUP")
                    .unwrap_or(defaults.auth.allow_admin_signup),
            },
            notification_ttl: parsed(&lookup, "REGISTRY_NOTIFICATION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.notification_ttl),
            profile_variant: lookup("REGISTRY_PROFILE_VARIANT")
                .and_then(|raw| ProfileVariant::parse(&raw))
                .unwrap_or(defaults.profile_variant),
            log_json: parsed(&lookup, "REGISTRY_LOG_JSON").unwrap_or(defaults.log_json),
            log_dir: lookup("REGISTRY_LOG_DIR").filter(|dir| !dir.is_empty()),
        }
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let settings = Settings::from_lookup(|_| None);
        assert_eq!(settings.data_path, "registry_data");
        assert_eq!(settings.rest_addr.port(), 11111);
        assert_eq!(settings.notification_ttl, Duration::from_secs(5));
        assert_eq!(settings.profile_variant, ProfileVariant::Rich);
        assert_eq!(settings.auth.token_ttl_secs, 3600);
        assert!(!settings.auth.allow_admin_signup);
    }

    #[test]
    fn environment_overrides_and_bad_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("REGISTRY_DATA_PATH", "/tmp/registry"),
            ("REGISTRY_REST_ADDR", "127.0.0.1:9000"),
            ("REGISTRY_TOKEN_TTL_SECS", "soon"),
            ("REGISTRY_NOTIFICATION_SECS", "3"),
            ("REGISTRY_PROFILE_VARIANT", "Minimal"),
            ("REGISTRY_JWT_SECRET", "s3cret"),
            ("REGISTRY_LOG_JSON", "true"),
            ("REGISTRY_ALLOW_ADMIN_SIGNUP", "true"),
        ]);
        let settings = Settings::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(settings.data_path, "/tmp/registry");
        assert_eq!(settings.rest_addr.port(), 9000);
        assert_eq!(settings.auth.token_ttl_secs, 3600);
        assert_eq!(settings.notification_ttl, Duration::from_secs(3));
        assert_eq!(settings.profile_variant, ProfileVariant::Minimal);
        assert_eq!(settings.auth.jwt_secret, "s3cret");
        assert!(settings.log_json);
        assert!(settings.auth.allow_admin_signup);
    }
}
