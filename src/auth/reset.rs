//! Single-use password reset tokens.
//!
//! The plaintext is handed out once (by email); only a keyed SHA-256 of it
//! is stored on the user together with its expiry.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use time::{Duration, OffsetDateTime};

use crate::users::model::User;

pub const RESET_TTL: Duration = Duration::minutes(10);

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct ResetToken {
    pub plain: String,
    pub hash: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetState {
    NoResetPending,
    ResetRequested,
    ResetExpired,
}

impl ResetState {
    pub fn of(user: &User, now: OffsetDateTime) -> Self {
        match (&user.password_reset_token, user.password_reset_expires) {
            (Some(_), Some(expires)) if expires > now => ResetState::ResetRequested,
            (Some(_), _) => ResetState::ResetExpired,
            _ => ResetState::NoResetPending,
        }
    }
}

pub fn hash_token(key: &[u8], plain: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(plain.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn generate(key: &[u8], now: OffsetDateTime) -> ResetToken {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let plain = hex::encode(bytes);
    ResetToken {
        hash: hash_token(key, &plain),
        plain,
        expires_at: now + RESET_TTL,
    }
}

impl ResetToken {
    /// Moves the user into `ResetRequested`.
    pub fn apply(&self, user: &mut User) {
        user.password_reset_token = Some(self.hash.clone());
        user.password_reset_expires = Some(self.expires_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::model::{Role, DEFAULT_PHOTO};
    use uuid::Uuid;

    const KEY: &[u8] = b"reset-key";

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            version: 0,
            name: "Ann".into(),
            email: "ann@example.com".into(),
            photo: DEFAULT_PHOTO.into(),
            role: Role::User,
            password: String::new(),
            password_changed_at: None,
            password_reset_token: None,
            password_reset_expires: None,
            active: true,
        }
    }

    #[test]
    fn token_hashes_to_stored_value() {
        let now = OffsetDateTime::now_utc();
        let token = generate(KEY, now);
        assert_eq!(token.plain.len(), 64);
        assert_eq!(hash_token(KEY, &token.plain), token.hash);
        assert_ne!(token.plain, token.hash);
        assert_ne!(hash_token(b"other-key", &token.plain), token.hash);
        assert_eq!(token.expires_at - now, Duration::minutes(10));
    }

    #[test]
    fn tokens_are_unique() {
        let now = OffsetDateTime::now_utc();
        assert_ne!(generate(KEY, now).plain, generate(KEY, now).plain);
    }

    #[test]
    fn state_follows_expiry() {
        let now = OffsetDateTime::now_utc();
        let mut u = user();
        assert_eq!(ResetState::of(&u, now), ResetState::NoResetPending);
        generate(KEY, now).apply(&mut u);
        assert_eq!(ResetState::of(&u, now), ResetState::ResetRequested);
        assert_eq!(
            ResetState::of(&u, now + Duration::minutes(11)),
            ResetState::ResetExpired
        );
        u.clear_reset();
        assert_eq!(ResetState::of(&u, now), ResetState::NoResetPending);
    }
}
