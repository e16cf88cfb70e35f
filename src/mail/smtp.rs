use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::debug;

use super::{Email, Mailer};
use crate::config::MailConfig;

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &MailConfig) -> anyhow::Result<Self> {
        let host = cfg.host.as_deref().context("EMAIL_HOST is not set")?;
        let builder = if cfg.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
        }
        .with_context(|| format!("smtp relay {host}"))?
        .port(cfg.port);
        let builder = match (&cfg.username, &cfg.password) {
            (Some(user), Some(pass)) => builder.credentials(Credentials::new(user.clone(), pass.clone())),
            _ => builder,
        };
        let from = format!("{} <{}>", cfg.from_name, cfg.from_address)
            .parse::<Mailbox>()
            .context("EMAIL_FROM")?;
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: Email) -> anyhow::Result<()> {
        let to = email
            .to
            .parse::<Mailbox>()
            .with_context(|| format!("recipient {}", email.to))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .multipart(MultiPart::alternative_plain_html(email.text, email.html))
            .context("build email")?;
        self.transport.send(message).await.context("smtp send")?;
        debug!(to = %email.to, subject = %email.subject, "email sent");
        Ok(())
    }
}
