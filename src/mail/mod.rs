//! Transactional email: welcome and password reset messages, each rendered
//! as HTML with a plain-text alternative.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, instrument};

use crate::{state::AppState, users::model::User};

mod smtp;

pub use smtp::SmtpMailer;

pub const WELCOME_SUBJECT: &str = "Welcome to the Natours Family!";
pub const RESET_SUBJECT: &str = "Your password reset token (valid for only 10 minutes)";

#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> anyhow::Result<()>;
}

/// Used when no SMTP host is configured: messages only reach the log.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> anyhow::Result<()> {
        info!(to = %email.to, subject = %email.subject, body = %email.text, "email (not sent, no SMTP host)");
        Ok(())
    }
}

async fn send_template(
    state: &AppState,
    user: &User,
    template: &str,
    subject: &str,
    url: &str,
) -> anyhow::Result<()> {
    let ctx = json!({
        "firstName": user.first_name(),
        "url": url,
        "subject": subject,
    });
    let (html, text) = state.views.email(template, &ctx)?;
    state
        .mailer
        .send(Email {
            to: user.email.clone(),
            subject: subject.to_string(),
            html,
            text,
        })
        .await
}

#[instrument(skip(state, user, url), fields(user_id = %user.id))]
pub async fn send_welcome(state: &AppState, user: &User, url: &str) -> anyhow::Result<()> {
    send_template(state, user, "welcome", WELCOME_SUBJECT, url).await
}

#[instrument(skip(state, user, url), fields(user_id = %user.id))]
pub async fn send_password_reset(state: &AppState, user: &User, url: &str) -> anyhow::Result<()> {
    send_template(state, user, "password_reset", RESET_SUBJECT, url).await
}
