//! Invitation emails.
//!
//! Sent over SMTP when `[email]` is configured. Otherwise the message is
//! only logged, which is what development setups want.

use anyhow::Result;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;

use crate::config::EmailConfig;

/// Everything an invitation email says
#[derive(Debug, Clone)]
pub struct InvitationEmail<'a> {
    pub to_email: &'a str,
    pub to_name: &'a str,
    pub organisation_name: &'a str,
    pub inviter_email: &'a str,
    pub accept_url: &'a str,
    pub expires_in_days: i64,
}

impl InvitationEmail<'_> {
    pub fn subject(&self) -> String {
        format!("Invitation to join {}", self.organisation_name)
    }
}

#[async_trait]
pub trait InvitationMailer: Send + Sync {
    async fn send_invitation(&self, email: &InvitationEmail<'_>) -> Result<()>;
}

/// Pick the mailer for a configuration
pub fn mailer_from_config(config: &EmailConfig) -> Arc<dyn InvitationMailer> {
    if config.is_configured() {
        Arc::new(SmtpMailer::new(config.clone()))
    } else {
        tracing::warn!("SMTP not configured, invitation emails will only be logged");
        Arc::new(LogMailer)
    }
}

/// Sends invitations through an SMTP relay
pub struct SmtpMailer {
    config: EmailConfig,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Send an email with HTML and plain text versions
    async fn send_email(
        &self,
        to_email: &str,
        to_name: &str,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<()> {
        let smtp_host = self
            .config
            .smtp_host
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("SMTP host not configured"))?;
        let from_address = self
            .config
            .from_address
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("From address not configured"))?;

        let from: Mailbox = format!("{} <{}>", self.config.from_name, from_address).parse()?;
        let to = Mailbox::new(Some(to_name.to_string()), to_email.parse()?);

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )?;

        let mailer = if self.config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        }
        .port(self.config.smtp_port);

        let mailer = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            mailer.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer
        };

        mailer.build().send(email).await?;

        tracing::info!(to = %to_email, subject = %subject, "Email sent");
        Ok(())
    }
}

#[async_trait]
impl InvitationMailer for SmtpMailer {
    async fn send_invitation(&self, email: &InvitationEmail<'_>) -> Result<()> {
        self.send_email(
            email.to_email,
            email.to_name,
            &email.subject(),
            &render_invitation_html(email),
            &render_invitation_text(email),
        )
        .await
    }
}

/// Logs invitations instead of sending them
pub struct LogMailer;

#[async_trait]
impl InvitationMailer for LogMailer {
    async fn send_invitation(&self, email: &InvitationEmail<'_>) -> Result<()> {
        tracing::info!(
            to = %email.to_email,
            subject = %email.subject(),
            "Invitation email not sent (SMTP not configured)"
        );
        Ok(())
    }
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn render_invitation_html(email: &InvitationEmail<'_>) -> String {
    let organisation = escape_html(email.organisation_name);
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{subject}</title></head>
<body style="font-family: Arial, sans-serif; background-color: #f5f5f5; margin: 0; padding: 0;">
  <div style="max-width: 600px; margin: 0 auto; padding: 20px; background-color: #ffffff;">
    <h2>You've been invited to join {organisation}</h2>
    <p>Hello {name},</p>
    <p>{inviter} has invited you to join their organisation on CRM Dashboard.</p>
    <div style="margin: 30px 0;">
      <a href="{url}" style="background-color: #4f46e5; color: white; padding: 12px 24px; text-decoration: none; border-radius: 4px; display: inline-block;">Accept Invitation</a>
    </div>
    <p>This invitation link will expire in {days} days.</p>
    <p>If you have any questions, please contact the person who invited you.</p>
  </div>
</body>
</html>"#,
        subject = escape_html(&email.subject()),
        organisation = organisation,
        name = escape_html(email.to_name),
        inviter = escape_html(email.inviter_email),
        url = escape_html(email.accept_url),
        days = email.expires_in_days,
    )
}

fn render_invitation_text(email: &InvitationEmail<'_>) -> String {
    format!(
        "Hello {name},\n\n\
         {inviter} has invited you to join {organisation} on CRM Dashboard.\n\n\
         Accept the invitation:\n{url}\n\n\
         This invitation link will expire in {days} days.\n",
        name = email.to_name,
        inviter = email.inviter_email,
        organisation = email.organisation_name,
        url = email.accept_url,
        days = email.expires_in_days,
    )
}
