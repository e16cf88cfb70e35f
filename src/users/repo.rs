//! Credential store: user lookup, creation and password persistence over the
//! document store. Inactive users are invisible to every lookup here.

use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use super::model::{normalize_email, validate_signup, User};
use crate::{
    auth::password::{hash_blocking, verify_blocking},
    error::{AppError, AppResult},
    query::{Predicate, QueryDescriptor},
    store::{Collection, DocumentStore},
};

pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirm: String,
}

pub struct UserStore<'a> {
    store: &'a dyn DocumentStore,
}

pub fn active_only() -> Predicate {
    Predicate::ne("active", false)
}

impl<'a> UserStore<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store }
    }

    async fn find_first(&self, filters: Vec<Predicate>) -> AppResult<Option<User>> {
        let mut query = QueryDescriptor::matching(filters);
        query.filters.push(active_only());
        let docs = self.store.find(Collection::Users, &query).await?;
        match docs.first() {
            Some(doc) => Ok(Some(User::from_document(doc)?)),
            None => Ok(None),
        }
    }

    pub async fn find_active(&self, id: Uuid) -> AppResult<Option<User>> {
        let Some(doc) = self.store.get(Collection::Users, id).await? else {
            return Ok(None);
        };
        let user = User::from_document(&doc)?;
        Ok(user.active.then_some(user))
    }

    pub async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        self.find_first(vec![Predicate::eq("email", normalize_email(email))])
            .await
    }

    pub async fn find_by_reset_hash(&self, hash: &str) -> AppResult<Option<User>> {
        self.find_first(vec![Predicate::eq("passwordResetToken", hash)])
            .await
    }

    /// Validates and persists a new account with role `user`.
    pub async fn create(&self, input: NewUser) -> AppResult<User> {
        let email = normalize_email(&input.email);
        let errors = validate_signup(&input.name, &email, &input.password, &input.password_confirm);
        if !errors.is_empty() {
            return Err(AppError::InvalidInput(errors));
        }
        let hash = hash_blocking(input.password).await?;
        let mut body = serde_json::Map::new();
        body.insert("name".into(), Value::String(input.name.trim().to_string()));
        body.insert("email".into(), Value::String(email));
        body.insert("password".into(), Value::String(hash));
        // Fill defaults through the model so stored documents are complete.
        let draft: User = serde_json::from_value(Value::Object(body))
            .map_err(|e| AppError::Internal(e.into()))?;
        let doc = self.store.insert(Collection::Users, draft.to_body()?).await?;
        debug!(user_id = %doc.id, "user created");
        Ok(User::from_document(&doc)?)
    }

    /// Returns the user only when the password matches. Unknown email and
    /// wrong password are indistinguishable to the caller.
    pub async fn check_credentials(&self, email: &str, password: &str) -> AppResult<Option<User>> {
        let Some(user) = self.find_by_email(email).await? else {
            warn!("login unknown email");
            return Ok(None);
        };
        if verify_blocking(password.to_string(), user.password.clone()).await? {
            Ok(Some(user))
        } else {
            warn!(user_id = %user.id, "login invalid password");
            Ok(None)
        }
    }

    pub async fn verify_password(&self, user: &User, candidate: &str) -> AppResult<bool> {
        Ok(verify_blocking(candidate.to_string(), user.password.clone()).await?)
    }

    /// Hashes and stores a new password and clears any pending reset.
    pub async fn change_password(&self, mut user: User, plain: String) -> AppResult<User> {
        let hash = hash_blocking(plain).await?;
        user.set_password(hash, OffsetDateTime::now_utc());
        user.clear_reset();
        self.save(&user).await
    }

    /// Compare-and-swap write of the whole user.
    pub async fn save(&self, user: &User) -> AppResult<User> {
        let doc = self
            .store
            .replace(Collection::Users, user.id, user.version, user.to_body()?)
            .await?
            .ok_or_else(AppError::not_found)?;
        Ok(User::from_document(&doc)?)
    }
}
