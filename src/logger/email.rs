//! Email notification
//!
//! Warnings and errors are forwarded by [`EmailLayer`] to a background
//! [`EmailNotifier`] which mails them using the configured transport.

use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use regex::Regex;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::config::EmailConfig;
use crate::error::{Error, Result};

/// Events logged from here are never forwarded, so a failing SMTP server
/// cannot feed itself
const EMAIL_TARGET: &str = "sll::email_notifier";

/// Build the notification message
pub fn build_message(config: &EmailConfig, body: &str) -> Result<Message> {
    let from: Mailbox = config
        .email
        .parse()
        .map_err(|e| email_error(config, format!("invalid sender: {}", e)))?;

    let mut builder = Message::builder().from(from).subject(config.subject.clone());
    for dest in &config.dest_email {
        let to: Mailbox = dest
            .parse()
            .map_err(|e| email_error(config, format!("invalid recipient {}: {}", dest, e)))?;
        builder = builder.to(to);
    }

    builder
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| email_error(config, e))
}

/// Send through an SMTPS server with login
pub async fn send_email(config: &EmailConfig, body: &str) -> Result<()> {
    let message = build_message(config, body)?;
    let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_server)
        .map_err(|e| email_error(config, e))?
        .port(config.port)
        .credentials(Credentials::new(config.email.clone(), config.password.clone()))
        .build();

    transport
        .send(message)
        .await
        .map_err(|e| email_error(config, e))?;
    Ok(())
}

/// Send through the unauthenticated local relay
pub async fn send_simple_email(config: &EmailConfig, body: &str) -> Result<()> {
    let message = build_message(config, body)?;
    let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous("localhost").build();

    transport
        .send(message)
        .await
        .map_err(|e| email_error(config, e))?;
    Ok(())
}

/// Send with whichever transport the config selects
pub async fn notify(config: &EmailConfig, body: &str) -> Result<()> {
    if config.simple {
        send_simple_email(config, body).await
    } else {
        send_email(config, body).await
    }
}

fn email_error(config: &EmailConfig, cause: impl std::fmt::Display) -> Error {
    Error::Email(format!(
        "Something went wrong while sending to {:?}\nSMTP: {}:{}\nFrom: {}\n{}",
        config.dest_email, config.smtp_server, config.port, config.email, cause
    ))
}

/// Remove ANSI color escapes so mails stay readable
pub(crate) fn strip_ansi(text: &str) -> String {
    static ANSI: OnceLock<Option<Regex>> = OnceLock::new();
    match ANSI.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").ok()) {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}

/// Delivery backend of the notifier
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn deliver(&self, body: &str) -> Result<()>;
}

/// SMTP delivery with the configured transport
pub struct SmtpMailer {
    config: EmailConfig,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn deliver(&self, body: &str) -> Result<()> {
        notify(&self.config, body).await
    }
}

/// Queue entry of the notifier
pub enum Notice {
    Mail(String),
    /// Acknowledged once every earlier entry has been handled
    Flush(std_mpsc::Sender<()>),
}

/// Mail sender running on its own thread and runtime, so it keeps working
/// while the caller blocks on [`NotifierHandle::flush`]
pub struct EmailNotifier;

impl EmailNotifier {
    /// Start the sender thread; returns the layer feeding it and a handle
    /// for flushing
    pub fn spawn<M: Mailer>(mailer: M) -> Result<(EmailLayer, NotifierHandle)> {
        let (tx, rx) = mpsc::unbounded_channel::<Notice>();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        std::thread::Builder::new()
            .name("sll-email".into())
            .spawn(move || runtime.block_on(run(mailer, rx)))?;

        Ok((EmailLayer::new(tx.clone()), NotifierHandle { tx }))
    }
}

async fn run<M: Mailer>(mailer: M, mut rx: mpsc::UnboundedReceiver<Notice>) {
    while let Some(notice) = rx.recv().await {
        match notice {
            Notice::Mail(body) => {
                if let Err(e) = mailer.deliver(&body).await {
                    tracing::error!(target: EMAIL_TARGET, "Email notification failed: {}", e);
                }
            }
            Notice::Flush(ack) => {
                // Flusher may have timed out already
                let _ = ack.send(());
            }
        }
    }
}

/// Handle to a running [`EmailNotifier`]
#[derive(Clone)]
pub struct NotifierHandle {
    tx: mpsc::UnboundedSender<Notice>,
}

impl NotifierHandle {
    /// Block until every mail queued before this call has been handed to
    /// the mailer. Returns false when `timeout` runs out first or the
    /// sender thread is gone.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = std_mpsc::channel();
        if self.tx.send(Notice::Flush(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_timeout(timeout).is_ok()
    }
}

/// Layer forwarding WARN and ERROR events to the notifier
pub struct EmailLayer {
    tx: mpsc::UnboundedSender<Notice>,
}

impl EmailLayer {
    pub fn new(tx: mpsc::UnboundedSender<Notice>) -> Self {
        Self { tx }
    }
}

impl<S: Subscriber> Layer<S> for EmailLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > Level::WARN || meta.target().starts_with(EMAIL_TARGET) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let mut body = format!("[{}] {}\n{}", meta.level(), meta.target(), visitor.message);
        for field in visitor.fields {
            body.push('\n');
            body.push_str(&field);
        }

        // Receiver gone means the sender thread has stopped
        let _ = self.tx.send(Notice::Mail(strip_ansi(&body)));
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::SubscriberExt;

    /// Records bodies after a delay, like a slow SMTP server
    struct SlowMailer {
        delay: Duration,
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Mailer for SlowMailer {
        async fn deliver(&self, body: &str) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.sent.lock().unwrap().push(body.to_string());
            Ok(())
        }
    }

    fn mail(notice: Notice) -> String {
        match notice {
            Notice::Mail(body) => body,
            Notice::Flush(_) => panic!("unexpected flush"),
        }
    }

    fn config() -> EmailConfig {
        EmailConfig {
            smtp_server: "smtp.example.com".into(),
            port: 465,
            email: "robot@example.com".into(),
            dest_email: vec!["ops@example.com".into(), "dev@example.com".into()],
            password: "secret".into(),
            subject: "Analytics Scripts".into(),
            simple: false,
        }
    }

    #[test]
    fn test_build_message() {
        let message = build_message(&config(), "disk full").unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Analytics Scripts"));
        assert!(raw.contains("ops@example.com"));
        assert!(raw.contains("disk full"));
    }

    #[test]
    fn test_build_message_rejects_bad_address() {
        let mut bad = config();
        bad.dest_email = vec!["not an address".into()];
        assert!(matches!(build_message(&bad, "x"), Err(Error::Email(_))));
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\u{1b}[31mred\u{1b}[0m text"), "red text");
    }

    #[test]
    fn test_layer_forwards_only_warnings_and_errors() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscriber = tracing_subscriber::registry().with(EmailLayer::new(tx));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("routine");
            tracing::warn!(table = "log_12", "slow query");
            tracing::error!(target: EMAIL_TARGET, "smtp down");
            tracing::error!("connection lost");
        });

        let first = mail(rx.try_recv().unwrap());
        assert!(first.contains("slow query"));
        assert!(first.contains("table=log_12"));
        assert!(first.starts_with("[WARN]"));

        let second = mail(rx.try_recv().unwrap());
        assert!(second.contains("connection lost"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_flush_waits_for_queued_mail() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mailer = SlowMailer {
            delay: Duration::from_millis(200),
            sent: sent.clone(),
        };
        let (layer, notifier) = EmailNotifier::spawn(mailer).unwrap();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("first failure");
            tracing::warn!("second failure");
        });

        assert!(notifier.flush(Duration::from_secs(10)));
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].contains("first failure"));
        assert!(sent[1].contains("second failure"));
    }

    #[test]
    fn test_flush_times_out_on_stuck_mailer() {
        let mailer = SlowMailer {
            delay: Duration::from_secs(30),
            sent: Arc::new(Mutex::new(Vec::new())),
        };
        let (layer, notifier) = EmailNotifier::spawn(mailer).unwrap();
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || tracing::error!("stuck"));

        assert!(!notifier.flush(Duration::from_millis(50)));
    }
}
