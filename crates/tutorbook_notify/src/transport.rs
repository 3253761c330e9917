// --- File: crates/tutorbook_notify/src/transport.rs ---
use lettre::message::{header::ContentType, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use tutorbook_common::{BoxFuture, MailError, MailReceipt, MailTransport, OutboundEmail};
use tutorbook_config::{AppConfig, MailConfig, SECRET_FROM_ENV};
use uuid::Uuid;

fn new_message_id() -> String {
    format!("<{}@tutorbook>", Uuid::new_v4())
}

fn parse_address(raw: &str) -> Result<Address, MailError> {
    raw.trim()
        .parse::<Address>()
        .map_err(|_| MailError::InvalidAddress(raw.to_string()))
}

/// SMTP delivery through lettre's async transport (rustls).
pub struct SmtpMailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    reply_to: Option<Mailbox>,
}

impl SmtpMailTransport {
    pub fn from_config(config: &MailConfig) -> Result<Self, MailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| MailError::NotConfigured(format!("SMTP relay error: {e}")))?;
        if let Some(port) = config.smtp_port {
            builder = builder.port(port);
        }
        let password = config
            .password
            .as_deref()
            .filter(|p| !p.is_empty() && *p != SECRET_FROM_ENV);
        if let (Some(username), Some(password)) = (config.username.as_deref(), password) {
            builder = builder.credentials(Credentials::new(username.to_string(), password.to_string()));
        }

        let from = Mailbox::new(config.from_name.clone(), parse_address(&config.from_address)?);
        let reply_to = match config.reply_to.as_deref() {
            Some(raw) => Some(Mailbox::new(None, parse_address(raw)?)),
            None => None,
        };

        Ok(Self {
            mailer: builder.build(),
            from,
            reply_to,
        })
    }

    fn build_message(&self, email: &OutboundEmail, message_id: &str) -> Result<Message, MailError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(Mailbox::new(None, parse_address(&email.to)?))
            .subject(email.subject.clone())
            .message_id(Some(message_id.to_string()));
        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(reply_to.clone());
        }

        let message = match &email.html_body {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(
                email.text_body.clone(),
                html.clone(),
            )),
            None => builder
                .header(ContentType::TEXT_PLAIN)
                .body(email.text_body.clone()),
        };
        message.map_err(|e| MailError::Build(e.to_string()))
    }
}

impl MailTransport for SmtpMailTransport {
    fn send(&self, email: OutboundEmail) -> BoxFuture<'_, MailReceipt, MailError> {
        Box::pin(async move {
            let message_id = new_message_id();
            let message = self.build_message(&email, &message_id)?;
            let response = self
                .mailer
                .send(message)
                .await
                .map_err(|e| MailError::Transport(e.to_string()))?;
            debug!(code = %response.code(), "[Notify] SMTP accepted {}", message_id);
            Ok(MailReceipt { message_id })
        })
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

/// Writes emails to the log instead of sending them.
#[derive(Debug, Default, Clone)]
pub struct LogMailTransport;

impl MailTransport for LogMailTransport {
    fn send(&self, email: OutboundEmail) -> BoxFuture<'_, MailReceipt, MailError> {
        Box::pin(async move {
            let message_id = new_message_id();
            info!(
                to = %email.to,
                message_id = %message_id,
                "[Notify] (log transport) {}",
                email.subject
            );
            debug!("[Notify] (log transport) body:\n{}", email.text_body);
            Ok(MailReceipt { message_id })
        })
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[derive(Default)]
struct RecordingState {
    sent: Vec<OutboundEmail>,
    failures_left: u32,
    always_fail: bool,
}

/// Keeps every delivered email in memory; failures can be scripted.
#[derive(Default, Clone)]
pub struct RecordingMailTransport {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingMailTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` sends fail with a transport error.
    pub async fn fail_next(&self, count: u32) {
        self.state.lock().await.failures_left = count;
    }

    pub async fn fail_always(&self, enabled: bool) {
        self.state.lock().await.always_fail = enabled;
    }

    pub async fn sent(&self) -> Vec<OutboundEmail> {
        self.state.lock().await.sent.clone()
    }

    pub async fn sent_to(&self, address: &str) -> Vec<OutboundEmail> {
        self.state
            .lock()
            .await
            .sent
            .iter()
            .filter(|e| e.to == address)
            .cloned()
            .collect()
    }
}

impl MailTransport for RecordingMailTransport {
    fn send(&self, email: OutboundEmail) -> BoxFuture<'_, MailReceipt, MailError> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.always_fail {
                return Err(MailError::Transport("451 scripted failure".to_string()));
            }
            if state.failures_left > 0 {
                state.failures_left -= 1;
                return Err(MailError::Transport("421 scripted failure".to_string()));
            }
            state.sent.push(email);
            Ok(MailReceipt {
                message_id: new_message_id(),
            })
        })
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// SMTP when enabled and configured, the log transport otherwise.
pub fn transport_from_config(config: &AppConfig) -> Result<Arc<dyn MailTransport>, MailError> {
    match (config.use_smtp, config.mail.as_ref()) {
        (true, Some(mail)) => {
            info!("[Notify] Using SMTP transport via {}", mail.smtp_host);
            Ok(Arc::new(SmtpMailTransport::from_config(mail)?))
        }
        (true, None) => Err(MailError::NotConfigured(
            "use_smtp is set but the [mail] section is missing".to_string(),
        )),
        (false, _) => {
            warn!("[Notify] SMTP disabled, emails are only logged");
            Ok(Arc::new(LogMailTransport))
        }
    }
}
