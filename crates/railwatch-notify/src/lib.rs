//! Outbound notification rendering and SMTP delivery.
//!
//! One run produces at most one email: every new relevant alert found in
//! the pass is rendered into a single plain-text digest. Delivery is
//! at-least-once; a failed send fails the run but is never retried from
//! a queue.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use railwatch_core::Alert;
use thiserror::Error;
use tracing::info;

pub const CRATE_NAME: &str = "railwatch-notify";

/// Line separating alert blocks in the digest body.
pub const ALERT_DELIMITER: &str = "===";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid mail address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("building message failed: {0}")]
    Compose(#[from] lettre::error::Error),
    #[error("smtp send failed: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

/// Renders alerts as `field: value` blocks separated by a delimiter
/// line, preserving input order. An empty slice renders to an empty
/// string; the caller skips delivery entirely in that case.
pub fn render_digest(alerts: &[Alert]) -> String {
    alerts
        .iter()
        .map(render_alert_block)
        .collect::<Vec<_>>()
        .join(&format!("{ALERT_DELIMITER}\n"))
}

fn render_alert_block(alert: &Alert) -> String {
    format!(
        "alert_id: {id}\n\
         url: {url}\n\
         title: {title}\n\
         description_html: {description}\n\
         start_date: {start}\n\
         end_date: {end}\n\
         l1_line_impacted: {impacted}\n",
        id = alert.id,
        url = alert.url,
        title = alert.title,
        description = alert.description_html,
        start = alert.start_date,
        end = alert.end_date,
        impacted = alert.line_impacted,
    )
}

/// Sends one plain-text message to the configured operator address.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// SMTP delivery over STARTTLS with optional credentials.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
    to: String,
}

impl SmtpNotifier {
    pub fn new(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        from: &str,
        to: &str,
    ) -> Result<Self, NotifyError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?.port(port);

        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }

        Ok(Self {
            transport: builder.build(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        let message = Message::builder()
            .from(self.from.parse()?)
            .to(self.to.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?;

        self.transport.send(message).await?;
        info!(subject, "notification email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use railwatch_core::PeriodBound;

    fn alert(id: &str, title: &str) -> Alert {
        Alert {
            id: id.to_string(),
            url: format!("https://example.test/alerts/{id}"),
            title: title.to_string(),
            description_html: "<p>detail</p>".to_string(),
            start_date: PeriodBound::from_epoch_secs(1_700_000_000),
            end_date: PeriodBound::Unknown,
            line_impacted: true,
        }
    }

    #[test]
    fn digest_renders_fields_in_fixed_order() {
        let body = render_digest(&[alert("42", "Service change")]);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines[0], "alert_id: 42");
        assert_eq!(lines[1], "url: https://example.test/alerts/42");
        assert_eq!(lines[2], "title: Service change");
        assert_eq!(lines[3], "description_html: <p>detail</p>");
        assert_eq!(lines[4], "start_date: 2023-11-14 22:13:20");
        assert_eq!(lines[5], "end_date: NULL");
        assert_eq!(lines[6], "l1_line_impacted: true");
    }

    #[test]
    fn digest_preserves_encounter_order_with_delimiters() {
        let body = render_digest(&[
            alert("a", "first"),
            alert("b", "second"),
            alert("c", "third"),
        ]);

        let first = body.find("alert_id: a").expect("first block");
        let second = body.find("alert_id: b").expect("second block");
        let third = body.find("alert_id: c").expect("third block");
        assert!(first < second && second < third);

        assert_eq!(body.matches("===\n").count(), 2);
        assert!(!body.ends_with("==="));
    }

    #[test]
    fn empty_digest_is_empty() {
        assert_eq!(render_digest(&[]), "");
    }
}
