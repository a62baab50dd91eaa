//! Outbound notifications. Only invitation emails exist today.

pub mod email;

pub use email::{mailer_from_config, InvitationEmail, InvitationMailer, LogMailer, SmtpMailer};
