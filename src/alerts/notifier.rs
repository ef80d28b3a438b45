//! Notification delivery for alerts

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};

use crate::config::{MailConfig, TlsMode};

/// Alert priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Normal,
    Urgent,
}

/// One outgoing alert
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub priority: Priority,
}

/// Delivers notifications over a single channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifierError>;
}

/// Logs notifications instead of delivering them
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifierError> {
        tracing::warn!(
            to = %notification.to,
            priority = ?notification.priority,
            subject = %notification.subject,
            "Alert (dry run): {}",
            notification.body
        );
        Ok(())
    }
}

/// Authenticated SMTP delivery
pub struct SmtpNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    /// Build the transport; no connection is made until the first send
    pub fn new(config: &MailConfig) -> Result<Self, NotifierError> {
        let from = parse_mailbox(&config.from)?;

        let builder = match config.tls {
            TlsMode::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)
                    .map_err(|e| NotifierError::Transport(e.to_string()))?
            }
            TlsMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.server)
                .map_err(|e| NotifierError::Transport(e.to_string()))?,
            TlsMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.server),
        };

        let mut builder = builder
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
            let password = config.password.clone().unwrap_or_default();
            builder = builder.credentials(Credentials::new(username.to_string(), password));
        }

        Ok(Self {
            mailer: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifierError> {
        let message = build_message(&self.from, notification)?;

        self.mailer
            .send(message)
            .await
            .map_err(|e| NotifierError::Transport(e.to_string()))?;

        tracing::info!(
            to = %notification.to,
            subject = %notification.subject,
            "Email sent"
        );

        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifierError> {
    address
        .parse::<Mailbox>()
        .map_err(|e| NotifierError::Address(format!("{}: {}", address, e)))
}

/// Build the MIME message, with importance headers for urgent alerts
pub fn build_message(from: &Mailbox, notification: &Notification) -> Result<Message, NotifierError> {
    let to = parse_mailbox(&notification.to)?;

    let (x_priority, priority, importance) = match notification.priority {
        Priority::Urgent => ("1", "urgent", "high"),
        Priority::Normal => ("3", "normal", "normal"),
    };

    Message::builder()
        .from(from.clone())
        .to(to)
        .subject(notification.subject.clone())
        .header(ContentType::TEXT_PLAIN)
        .header(XPriority(x_priority.to_string()))
        .header(PriorityHeader(priority.to_string()))
        .header(Importance(importance.to_string()))
        .body(notification.body.clone())
        .map_err(|e| NotifierError::Message(e.to_string()))
}

macro_rules! text_header {
    ($ty:ident, $name:literal) => {
        #[derive(Debug, Clone)]
        struct $ty(String);

        impl Header for $ty {
            fn name() -> HeaderName {
                HeaderName::new_from_ascii_str($name)
            }

            fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
                Ok(Self(s.to_string()))
            }

            fn display(&self) -> HeaderValue {
                HeaderValue::new(Self::name(), self.0.clone())
            }
        }
    };
}

text_header!(XPriority, "X-Priority");
text_header!(PriorityHeader, "Priority");
text_header!(Importance, "Importance");

/// Notifier errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum NotifierError {
    #[error("Invalid address: {0}")]
    Address(String),

    #[error("Message error: {0}")]
    Message(String),

    #[error("SMTP error: {0}")]
    Transport(String),
}
