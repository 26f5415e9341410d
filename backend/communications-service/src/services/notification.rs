//! Best-effort email alerts for new messages.
//!
//! Runs off the send path in a spawned task: one email per recipient,
//! at most once, failures logged and counted.

use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::EmailSettings;
use crate::error::{AppError, AppResult};
use crate::metrics::NOTIFICATION_FAILURES_TOTAL;
use crate::models::{MessageView, UserAccount};
use crate::store::ChatStore;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> AppResult<()>;
}

/// Async email transport wrapper (SMTP or no-op)
#[derive(Clone)]
pub struct EmailNotifier {
    transport: Option<Arc<AsyncSmtpTransport<Tokio1Executor>>>,
    from: Mailbox,
}

impl EmailNotifier {
    /// An empty SMTP host yields a notifier that only logs.
    pub fn new(config: &EmailSettings) -> AppResult<Self> {
        let from = config
            .smtp_from
            .parse::<Mailbox>()
            .map_err(|e| AppError::Config(format!("Invalid SMTP_FROM address: {e}")))?;

        let transport = if config.smtp_host.trim().is_empty() {
            warn!("SMTP host not configured; notifications will operate in no-op mode");
            None
        } else {
            let builder = if config.use_starttls {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            }
            .map_err(|e| AppError::Config(format!("Failed to configure SMTP transport: {e}")))?
            .port(config.smtp_port);

            let builder = if let (Some(username), Some(password)) =
                (&config.smtp_username, &config.smtp_password)
            {
                builder.credentials(Credentials::new(username.to_string(), password.to_string()))
            } else {
                builder
            };

            Some(Arc::new(builder.build()))
        };

        Ok(Self { transport, from })
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> AppResult<()> {
        let Some(transport) = &self.transport else {
            info!(subject, recipient, "notifier in no-op mode; skipping send");
            return Ok(());
        };

        let to = recipient
            .parse::<Mailbox>()
            .map_err(|e| AppError::Internal(format!("Invalid recipient address: {e}")))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| AppError::Internal(format!("Failed to build email: {e}")))?;

        transport
            .send(email)
            .await
            .map_err(|e| AppError::ServiceUnavailable(format!("Failed to send email: {e}")))?;
        info!(subject, "notification email sent");
        Ok(())
    }
}

/// Subject and plain-text body of a new-message alert
pub fn compose(sender_name: &str, content: &str, site_url: &str) -> (String, String) {
    let subject = format!("New Message from {sender_name}");
    let quoted = if content.is_empty() {
        "(attachment)".to_string()
    } else {
        content
            .lines()
            .map(|line| format!("> {line}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let body = format!(
        "You have received a new message from {sender_name}:\n\n{quoted}\n\n\
         Open the conversation: {site_url}/communications/\n"
    );
    (subject, body)
}

/// Participants other than the sender who want, and can receive, email
pub fn recipients(participants: &[UserAccount], sender_id: Option<i64>) -> Vec<String> {
    participants
        .iter()
        .filter(|p| Some(p.id) != sender_id)
        .filter_map(|p| p.notification_address().map(str::to_string))
        .collect()
}

#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn ChatStore>,
    notifier: Arc<dyn Notifier>,
    site_url: String,
}

impl NotificationService {
    pub fn new(store: Arc<dyn ChatStore>, notifier: Arc<dyn Notifier>, site_url: String) -> Self {
        Self {
            store,
            notifier,
            site_url,
        }
    }

    /// Alert the other participants about `view` in the background.
    /// System messages never notify.
    pub fn dispatch(&self, view: &MessageView) {
        if view.message.is_system {
            return;
        }

        let store = self.store.clone();
        let notifier = self.notifier.clone();
        let (subject, body) = compose(&view.sender_label(), &view.message.content, &self.site_url);
        let conversation_id = view.message.conversation_id;
        let sender_id = view.message.sender_id;
        let message_id = view.message.id;

        tokio::spawn(async move {
            let participants = match store.participant_accounts(conversation_id).await {
                Ok(participants) => participants,
                Err(e) => {
                    warn!(error = %e, message_id, "could not load notification recipients");
                    NOTIFICATION_FAILURES_TOTAL.inc();
                    return;
                }
            };

            for recipient in recipients(&participants, sender_id) {
                if let Err(e) = notifier.send(&recipient, &subject, &body).await {
                    warn!(error = %e, message_id, "notification email failed");
                    NOTIFICATION_FAILURES_TOTAL.inc();
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: i64, email: Option<&str>, notify: bool) -> UserAccount {
        UserAccount {
            id,
            username: format!("user{id}"),
            first_name: String::new(),
            last_name: String::new(),
            email: email.map(Into::into),
            role: "teacher".into(),
            email_notify: notify,
            is_active: true,
        }
    }

    #[test]
    fn compose_names_sender_and_links_inbox() {
        let (subject, body) = compose("Ms. Ade", "See you at 3pm", "https://school.example");
        assert_eq!(subject, "New Message from Ms. Ade");
        assert!(body.contains("> See you at 3pm"));
        assert!(body.contains("https://school.example/communications/"));
    }

    #[test]
    fn recipients_exclude_sender_and_opted_out() {
        let participants = vec![
            account(1, Some("a@x.org"), true),
            account(2, Some("b@x.org"), true),
            account(3, Some("c@x.org"), false),
            account(4, None, true),
        ];
        assert_eq!(recipients(&participants, Some(1)), vec!["b@x.org".to_string()]);
    }

    #[tokio::test]
    async fn noop_notifier_succeeds() {
        let notifier = EmailNotifier::new(&EmailSettings::default()).unwrap();
        assert!(!notifier.is_enabled());
        notifier.send("a@x.org", "s", "b").await.unwrap();
    }
}
