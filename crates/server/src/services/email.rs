//! Confirmation email sender.
//!
//! Renders the order confirmation as multipart HTML+text via Askama and
//! dispatches it over SMTP with lettre. One templating path serves every
//! call site (webhook fulfillment, operator retry, operator resend): the QR
//! variant when an activation code is available, the degraded "payment
//! confirmed, eSIM on its way" variant otherwise.

use askama::Template;
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{MultiPart, SinglePart, header::ContentType},
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use secrecy::ExposeSecret;
use thiserror::Error;

use wandersim_core::{ActivationCode, Email};

use crate::config::EmailConfig;

/// Data rendered into a confirmation email.
#[derive(Debug, Clone)]
pub struct OrderConfirmation {
    pub order_number: String,
    pub destination_name: String,
    pub duration_days: i32,
    /// Pre-formatted amount, e.g. `19.99 USD`.
    pub amount: String,
    /// Present once provisioning has succeeded.
    pub activation_code: Option<ActivationCode>,
}

/// HTML template for a confirmation with a scannable QR code.
#[derive(Template)]
#[template(path = "email/confirmation_qr.html")]
struct ConfirmationQrHtml<'a> {
    order_number: &'a str,
    destination: &'a str,
    duration_days: i32,
    amount: &'a str,
    qr_image_url: &'a str,
    activation_code: &'a str,
}

/// Plain text template for a confirmation with activation details.
#[derive(Template)]
#[template(path = "email/confirmation_qr.txt")]
struct ConfirmationQrText<'a> {
    order_number: &'a str,
    destination: &'a str,
    duration_days: i32,
    amount: &'a str,
    activation_code: &'a str,
}

/// HTML template for the degraded "eSIM on its way" confirmation.
#[derive(Template)]
#[template(path = "email/confirmation_pending.html")]
struct ConfirmationPendingHtml<'a> {
    order_number: &'a str,
    destination: &'a str,
    duration_days: i32,
    amount: &'a str,
}

/// Plain text template for the degraded confirmation.
#[derive(Template)]
#[template(path = "email/confirmation_pending.txt")]
struct ConfirmationPendingText<'a> {
    order_number: &'a str,
    destination: &'a str,
    duration_days: i32,
    amount: &'a str,
}

/// Errors that can occur when sending email.
#[derive(Debug, Error)]
pub enum EmailError {
    /// SMTP transport error.
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    /// Failed to build email message.
    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Template rendering error.
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),
}

/// Sends order confirmation emails.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Render and send a confirmation to the customer.
    async fn send_confirmation(
        &self,
        to: &Email,
        confirmation: &OrderConfirmation,
    ) -> Result<(), EmailError>;
}

/// SMTP-backed [`Mailer`].
#[derive(Clone)]
pub struct SmtpMailer {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpMailer {
    /// Create a new mailer from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the SMTP relay configuration is invalid.
    pub fn new(config: &EmailConfig) -> Result<Self, SmtpError> {
        let credentials = Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.expose_secret().to_string(),
        );

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self {
            mailer,
            from_address: config.from_address.clone(),
        })
    }

    /// Send a multipart email with both plain text and HTML versions.
    async fn send_multipart_email(
        &self,
        to: &str,
        subject: &str,
        text_body: &str,
        html_body: &str,
    ) -> Result<(), EmailError> {
        let email = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|_| EmailError::InvalidAddress(self.from_address.clone()))?,
            )
            .to(to
                .parse()
                .map_err(|_| EmailError::InvalidAddress(to.to_string()))?)
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

        self.mailer.send(email).await?;

        tracing::info!(to = %to, subject = %subject, "Email sent successfully");
        Ok(())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_confirmation(
        &self,
        to: &Email,
        confirmation: &OrderConfirmation,
    ) -> Result<(), EmailError> {
        let (subject, html, text) = render_confirmation(confirmation)?;
        self.send_multipart_email(to.as_str(), &subject, &text, &html)
            .await
    }
}

/// Render subject, HTML body, and text body for a confirmation.
fn render_confirmation(
    confirmation: &OrderConfirmation,
) -> Result<(String, String, String), EmailError> {
    match &confirmation.activation_code {
        Some(code) => {
            let subject = format!(
                "Your {} eSIM is ready to install",
                confirmation.destination_name
            );
            let qr_image_url = code.qr_image_url();
            let html = ConfirmationQrHtml {
                order_number: &confirmation.order_number,
                destination: &confirmation.destination_name,
                duration_days: confirmation.duration_days,
                amount: &confirmation.amount,
                qr_image_url: &qr_image_url,
                activation_code: code.as_str(),
            }
            .render()?;
            let text = ConfirmationQrText {
                order_number: &confirmation.order_number,
                destination: &confirmation.destination_name,
                duration_days: confirmation.duration_days,
                amount: &confirmation.amount,
                activation_code: code.as_str(),
            }
            .render()?;
            Ok((subject, html, text))
        }
        None => {
            let subject = format!(
                "Payment confirmed - your {} eSIM is on its way",
                confirmation.destination_name
            );
            let html = ConfirmationPendingHtml {
                order_number: &confirmation.order_number,
                destination: &confirmation.destination_name,
                duration_days: confirmation.duration_days,
                amount: &confirmation.amount,
            }
            .render()?;
            let text = ConfirmationPendingText {
                order_number: &confirmation.order_number,
                destination: &confirmation.destination_name,
                duration_days: confirmation.duration_days,
                amount: &confirmation.amount,
            }
            .render()?;
            Ok((subject, html, text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmation(activation_code: Option<ActivationCode>) -> OrderConfirmation {
        OrderConfirmation {
            order_number: "WS-20260314-001".to_string(),
            destination_name: "Japan".to_string(),
            duration_days: 5,
            amount: "19.99 USD".to_string(),
            activation_code,
        }
    }

    #[test]
    fn test_render_qr_variant() {
        let code = ActivationCode::new("rsp.test.esim-go.io", "TEST-WS-20260314-001-A7F2B9")
            .expect("valid parts");
        let (subject, html, text) =
            render_confirmation(&confirmation(Some(code))).expect("render");

        assert_eq!(subject, "Your Japan eSIM is ready to install");
        assert!(html.contains("WS-20260314-001"));
        assert!(html.contains("api.qrserver.com"));
        assert!(html.contains("Scan the QR code"));
        assert!(text.contains("LPA:1$rsp.test.esim-go.io$TEST-WS-20260314-001-A7F2B9"));
    }

    #[test]
    fn test_render_pending_variant() {
        let (subject, html, text) = render_confirmation(&confirmation(None)).expect("render");

        assert_eq!(subject, "Payment confirmed - your Japan eSIM is on its way");
        assert!(html.contains("What happens next"));
        assert!(!html.contains("api.qrserver.com"));
        assert!(text.contains("WS-20260314-001"));
    }

    #[test]
    fn test_subject_references_destination() {
        let mut c = confirmation(None);
        c.destination_name = "South Korea".to_string();
        let (subject, _, _) = render_confirmation(&c).expect("render");
        assert!(subject.contains("South Korea"));
    }
}
