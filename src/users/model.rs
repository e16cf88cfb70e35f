use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{auth::password::MIN_PASSWORD_LEN, store::Document};

pub const DEFAULT_PHOTO: &str = "default.jpg";

/// Never leave the server.
pub const HIDDEN_FIELDS: &[&str] = &[
    "password",
    "passwordConfirm",
    "passwordChangedAt",
    "passwordResetToken",
    "passwordResetExpires",
    "active",
];

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    #[default]
    User,
    Guide,
    LeadGuide,
    Admin,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Role::User),
            "guide" => Some(Role::Guide),
            "lead-guide" => Some(Role::LeadGuide),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

fn default_photo() -> String {
    DEFAULT_PHOTO.to_string()
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(skip)]
    pub id: Uuid,
    #[serde(skip)]
    pub version: i64,
    pub name: String,
    pub email: String,
    #[serde(default = "default_photo")]
    pub photo: String,
    #[serde(default)]
    pub role: Role,
    /// Argon2 hash.
    #[serde(default)]
    pub password: String,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub password_changed_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_reset_token: Option<String>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub password_reset_expires: Option<OffsetDateTime>,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl User {
    pub fn from_document(doc: &Document) -> anyhow::Result<Self> {
        let mut user: User = serde_json::from_value(Value::Object(doc.body.clone()))
            .with_context(|| format!("decode user {}", doc.id))?;
        user.id = doc.id;
        user.version = doc.version;
        Ok(user)
    }

    pub fn to_body(&self) -> anyhow::Result<Map<String, Value>> {
        match serde_json::to_value(self).context("encode user")? {
            Value::Object(map) => Ok(map),
            _ => anyhow::bail!("user did not encode to an object"),
        }
    }

    /// Client-facing representation without secrets.
    pub fn public_json(&self) -> Value {
        json_without_hidden(self.to_body().unwrap_or_default(), self.id)
    }

    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or(&self.name)
    }

    /// True when the password changed after a token issued at `issued_at`
    /// (unix seconds). Sub-second precision is discarded.
    pub fn changed_password_after(&self, issued_at: i64) -> bool {
        self.password_changed_at
            .map_or(false, |changed| changed.unix_timestamp() > issued_at)
    }

    /// Stores a new hash. The change is back-dated by one second so a token
    /// issued right after the change is not considered stale.
    pub fn set_password(&mut self, hash: String, now: OffsetDateTime) {
        self.password = hash;
        self.password_changed_at = Some(now - Duration::seconds(1));
    }

    pub fn clear_reset(&mut self) {
        self.password_reset_token = None;
        self.password_reset_expires = None;
    }
}

fn json_without_hidden(mut body: Map<String, Value>, id: Uuid) -> Value {
    for field in HIDDEN_FIELDS {
        body.remove(*field);
    }
    body.insert("id".into(), Value::String(id.to_string()));
    Value::Object(body)
}

/// Validation messages for a prospective account.
pub fn validate_signup(name: &str, email: &str, password: &str, confirm: &str) -> Vec<String> {
    let mut errors = validate_profile(Some(name), Some(email));
    errors.extend(validate_new_password(password, confirm));
    errors
}

pub fn validate_profile(name: Option<&str>, email: Option<&str>) -> Vec<String> {
    let mut errors = Vec::new();
    if let Some(name) = name {
        if name.trim().is_empty() {
            errors.push("Please tell us your name!".to_string());
        }
    }
    if let Some(email) = email {
        if email.trim().is_empty() {
            errors.push("Please provide your email".to_string());
        } else if !is_valid_email(email) {
            errors.push("Please provide a valid email".to_string());
        }
    }
    errors
}

pub fn validate_new_password(password: &str, confirm: &str) -> Vec<String> {
    let mut errors = Vec::new();
    if password.is_empty() {
        errors.push("Please provide a password".to_string());
    } else if password.chars().count() < MIN_PASSWORD_LEN {
        errors.push(format!(
            "A password must have at least {MIN_PASSWORD_LEN} characters"
        ));
    }
    if confirm.is_empty() {
        errors.push("Please confirm your password".to_string());
    } else if password != confirm {
        errors.push("Passwords are not the same!".to_string());
    }
    errors
}

/// Schema check for a stored user body, used by the admin update path.
pub fn validate_body(body: &Map<String, Value>) -> Vec<String> {
    let mut errors = validate_profile(
        Some(body.get("name").and_then(Value::as_str).unwrap_or("")),
        Some(body.get("email").and_then(Value::as_str).unwrap_or("")),
    );
    if let Some(role) = body.get("role") {
        if role.as_str().and_then(Role::parse).is_none() {
            errors.push("Role is either: user, guide, lead-guide, admin".to_string());
        }
    }
    if let Some(photo) = body.get("photo") {
        if !photo.is_string() {
            errors.push("Photo must be a file name".to_string());
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            version: 0,
            name: "Leo Gillespie".into(),
            email: "leo@example.com".into(),
            photo: DEFAULT_PHOTO.into(),
            role: Role::Guide,
            password: "$argon2id$hash".into(),
            password_changed_at: None,
            password_reset_token: Some("abc".into()),
            password_reset_expires: Some(OffsetDateTime::now_utc()),
            active: true,
        }
    }

    #[test]
    fn public_json_strips_secrets() {
        let v = user().public_json();
        for field in HIDDEN_FIELDS {
            assert!(v.get(*field).is_none(), "{field} leaked");
        }
        assert_eq!(v["role"], "guide");
        assert_eq!(v["email"], "leo@example.com");
        assert!(v["id"].is_string());
    }

    #[test]
    fn body_roundtrips_through_document() {
        let u = user();
        let doc = Document {
            id: u.id,
            version: 4,
            created_at: OffsetDateTime::now_utc(),
            body: u.to_body().unwrap(),
        };
        let back = User::from_document(&doc).unwrap();
        assert_eq!(back.id, u.id);
        assert_eq!(back.version, 4);
        assert_eq!(back.role, Role::Guide);
        assert_eq!(back.password_reset_token.as_deref(), Some("abc"));
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let doc = Document {
            id: Uuid::new_v4(),
            version: 0,
            created_at: OffsetDateTime::now_utc(),
            body: json!({"name": "A", "email": "a@b.io"}).as_object().cloned().unwrap(),
        };
        let u = User::from_document(&doc).unwrap();
        assert_eq!(u.photo, DEFAULT_PHOTO);
        assert_eq!(u.role, Role::User);
        assert!(u.active);
    }

    #[test]
    fn password_change_is_backdated() {
        let mut u = user();
        let now = OffsetDateTime::now_utc();
        u.set_password("new".into(), now);
        let changed = u.password_changed_at.unwrap();
        assert_eq!((now - changed).whole_seconds(), 1);
        assert!(u.changed_password_after(now.unix_timestamp() - 10));
        assert!(!u.changed_password_after(now.unix_timestamp()));
    }

    #[test]
    fn signup_validation_messages() {
        assert!(validate_signup("Leo", "leo@example.com", "pass1234", "pass1234").is_empty());
        let errors = validate_signup("", "nope", "short", "other");
        assert_eq!(
            errors,
            vec![
                "Please tell us your name!",
                "Please provide a valid email",
                "A password must have at least 8 characters",
                "Passwords are not the same!",
            ]
        );
    }

    #[test]
    fn role_parsing_and_first_name() {
        assert_eq!(Role::parse("lead-guide"), Some(Role::LeadGuide));
        assert_eq!(Role::parse("root"), None);
        assert_eq!(user().first_name(), "Leo");
        let errors = validate_body(json!({"name": "A", "email": "a@b.io", "role": "root"}).as_object().unwrap());
        assert_eq!(errors.len(), 1);
    }
}
